//! IAM roles, policies and statements.
//!
//! Statements are least-privilege allow-lists: each names its actions and the
//! narrowest resource ARNs available, using policy variables where the target
//! is only known at request time.

use serde_json::{json, Map, Value};

use crate::error::{Error, Result};
use crate::template::intrinsic::{concat, get_att, partition, reference};
use crate::template::{Arn, Resource, Scope, Stack};

/// Policy language version used by every document.
pub const POLICY_VERSION: &str = "2012-10-17";

/// Managed policy attached to every function role.
pub const LAMBDA_BASIC_EXECUTION: &str = "service-role/AWSLambdaBasicExecutionRole";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Effect {
    #[default]
    Allow,
    Deny,
}

impl Effect {
    fn as_str(self) -> &'static str {
        match self {
            Effect::Allow => "Allow",
            Effect::Deny => "Deny",
        }
    }
}

/// Who may assume a role.
#[derive(Debug, Clone, PartialEq)]
pub enum Principal {
    /// An AWS service, e.g. `lambda.amazonaws.com`
    Service(String),
    /// A web identity federation with trust conditions
    Federated {
        provider: String,
        conditions: Value,
        assume_action: String,
    },
    /// An account or role ARN
    Aws(Value),
}

impl Principal {
    pub fn service(name: impl Into<String>) -> Self {
        Principal::Service(name.into())
    }

    /// Trust policy statement for this principal.
    pub fn assume_role_statement(&self) -> Value {
        match self {
            Principal::Service(service) => json!({
                "Action": "sts:AssumeRole",
                "Effect": "Allow",
                "Principal": { "Service": service },
            }),
            Principal::Federated {
                provider,
                conditions,
                assume_action,
            } => json!({
                "Action": assume_action,
                "Condition": conditions,
                "Effect": "Allow",
                "Principal": { "Federated": provider },
            }),
            Principal::Aws(arn) => json!({
                "Action": "sts:AssumeRole",
                "Effect": "Allow",
                "Principal": { "AWS": arn },
            }),
        }
    }
}

/// One statement of a policy document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PolicyStatement {
    pub sid: Option<String>,
    pub effect: Effect,
    pub actions: Vec<String>,
    pub resources: Vec<Value>,
    pub conditions: Option<Value>,
}

impl PolicyStatement {
    pub fn allow() -> Self {
        Self::default()
    }

    pub fn deny() -> Self {
        Self {
            effect: Effect::Deny,
            ..Self::default()
        }
    }

    pub fn sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = Some(sid.into());
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.actions.push(action.into());
        self
    }

    pub fn actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions.extend(actions.into_iter().map(Into::into));
        self
    }

    pub fn resource(mut self, resource: impl Into<Value>) -> Self {
        self.resources.push(resource.into());
        self
    }

    pub fn resources<I, V>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.resources.extend(resources.into_iter().map(Into::into));
        self
    }

    pub fn condition(mut self, conditions: Value) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// JSON form; single actions and resources render as scalars.
    pub fn to_json(&self) -> Value {
        let mut statement = Map::new();
        statement.insert("Action".into(), scalar_or_list(self.actions.iter().cloned().map(Value::String).collect()));
        if let Some(conditions) = &self.conditions {
            statement.insert("Condition".into(), conditions.clone());
        }
        statement.insert("Effect".into(), Value::String(self.effect.as_str().into()));
        statement.insert("Resource".into(), scalar_or_list(self.resources.clone()));
        if let Some(sid) = &self.sid {
            statement.insert("Sid".into(), Value::String(sid.clone()));
        }
        Value::Object(statement)
    }
}

fn scalar_or_list(mut values: Vec<Value>) -> Value {
    if values.len() == 1 {
        values.remove(0)
    } else {
        Value::Array(values)
    }
}

/// A versioned list of statements.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PolicyDocument {
    pub statements: Vec<PolicyStatement>,
}

impl PolicyDocument {
    pub fn new(statements: impl IntoIterator<Item = PolicyStatement>) -> Self {
        Self {
            statements: statements.into_iter().collect(),
        }
    }

    pub fn add_statement(&mut self, statement: PolicyStatement) {
        self.statements.push(statement);
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn to_json(&self) -> Value {
        json!({
            "Statement": self.statements.iter().map(PolicyStatement::to_json).collect::<Vec<_>>(),
            "Version": POLICY_VERSION,
        })
    }
}

/// Properties of an `AWS::IAM::Role`.
#[derive(Debug, Clone)]
pub struct RoleProps {
    pub role_name: Option<String>,
    pub assumed_by: Principal,
    pub description: Option<String>,
    /// Inline policies by name
    pub inline_policies: Vec<(String, PolicyDocument)>,
    pub managed_policy_arns: Vec<Value>,
}

impl RoleProps {
    pub fn assumed_by(principal: Principal) -> Self {
        Self {
            role_name: None,
            assumed_by: principal,
            description: None,
            inline_policies: Vec::new(),
            managed_policy_arns: Vec::new(),
        }
    }

    pub fn role_name(mut self, name: impl Into<String>) -> Self {
        self.role_name = Some(name.into());
        self
    }

    pub fn inline_policy(mut self, name: impl Into<String>, document: PolicyDocument) -> Self {
        self.inline_policies.push((name.into(), document));
        self
    }

    pub fn managed_policy(mut self, arn: impl Into<Value>) -> Self {
        self.managed_policy_arns.push(arn.into());
        self
    }
}

/// Handle to a declared or existing role.
#[derive(Debug, Clone, PartialEq)]
pub struct Role {
    /// Logical id when declared in this stack
    pub logical_id: Option<String>,
    /// Role name expression (`Ref` for declared roles)
    pub name: Value,
    /// Role ARN expression
    pub arn: Value,
}

impl Role {
    /// Declares an `AWS::IAM::Role`.
    pub fn new(stack: &mut Stack, scope: &Scope, props: RoleProps) -> Result<Self> {
        let mut resource = Resource::new("AWS::IAM::Role")
            .property(
                "AssumeRolePolicyDocument",
                json!({
                    "Statement": [props.assumed_by.assume_role_statement()],
                    "Version": POLICY_VERSION,
                }),
            )
            .property("RoleName", props.role_name.clone())
            .property("Description", props.description.clone());

        if !props.inline_policies.is_empty() {
            let policies: Vec<Value> = props
                .inline_policies
                .iter()
                .map(|(name, document)| {
                    json!({ "PolicyDocument": document.to_json(), "PolicyName": name })
                })
                .collect();
            resource.set("Policies", policies);
        }
        if !props.managed_policy_arns.is_empty() {
            resource.set("ManagedPolicyArns", props.managed_policy_arns.clone());
        }

        let logical_id = stack.declare(scope, resource)?;
        Ok(Self {
            name: reference(&logical_id),
            arn: get_att(&logical_id, "Arn"),
            logical_id: Some(logical_id),
        })
    }

    /// An existing role looked up by name.
    pub fn from_name(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            logical_id: None,
            arn: Arn::new("iam", format!("role/{}", name)).region("").build(),
            name: Value::String(name),
        }
    }
}

/// ARN of an AWS managed policy, e.g. `service-role/AWSLambdaBasicExecutionRole`.
pub fn aws_managed_policy_arn(name: &str) -> Value {
    concat(vec![
        Value::from("arn:"),
        partition(),
        Value::from(format!(":iam::aws:policy/{}", name)),
    ])
}

/// Handle to an `AWS::IAM::ManagedPolicy`. Statements may be appended after
/// creation until the stack renders.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedPolicy {
    pub logical_id: String,
}

impl ManagedPolicy {
    pub fn new(
        stack: &mut Stack,
        scope: &Scope,
        name: Option<Value>,
        document: PolicyDocument,
        roles: Vec<Value>,
    ) -> Result<Self> {
        let mut resource = Resource::new("AWS::IAM::ManagedPolicy")
            .property("Description", "")
            .property("Path", "/")
            .property("PolicyDocument", document.to_json());
        if let Some(name) = name {
            resource.set("ManagedPolicyName", name);
        }
        if !roles.is_empty() {
            resource.set("Roles", roles);
        }
        let logical_id = stack.declare(scope, resource)?;
        Ok(Self { logical_id })
    }

    pub fn arn(&self) -> Value {
        reference(&self.logical_id)
    }

    /// Appends statements to the policy document.
    pub fn add_statements(
        &self,
        stack: &mut Stack,
        statements: impl IntoIterator<Item = PolicyStatement>,
    ) -> Result<()> {
        let resource = stack.resource_mut(&self.logical_id)?;
        let list = resource
            .properties
            .get_mut("PolicyDocument")
            .and_then(|document| document.get_mut("Statement"))
            .and_then(Value::as_array_mut)
            .ok_or_else(|| Error::validation(&self.logical_id, "policy document has no statement list"))?;
        list.extend(statements.into_iter().map(|s| s.to_json()));
        Ok(())
    }

    /// Attaches the policy to another role by name.
    pub fn attach_to_role(&self, stack: &mut Stack, role_name: Value) -> Result<()> {
        let resource = stack.resource_mut(&self.logical_id)?;
        match resource.properties.get_mut("Roles").and_then(Value::as_array_mut) {
            Some(roles) => roles.push(role_name),
            None => resource.set("Roles", vec![role_name]),
        }
        Ok(())
    }
}

/// Declares an inline `AWS::IAM::Policy` attached to the given roles.
pub fn declare_policy(
    stack: &mut Stack,
    scope: &Scope,
    document: PolicyDocument,
    roles: Vec<Value>,
) -> Result<String> {
    let logical_id = scope.logical_id();
    let resource = Resource::new("AWS::IAM::Policy")
        .property("PolicyDocument", document.to_json())
        .property("PolicyName", logical_id.clone())
        .property("Roles", roles);
    stack.add_resource(logical_id, resource)
}

/// Appends a statement to an `AWS::IAM::Policy` declared with [`declare_policy`].
pub fn append_to_policy(stack: &mut Stack, logical_id: &str, statement: PolicyStatement) -> Result<()> {
    let resource = stack.resource_mut(logical_id)?;
    let list = resource
        .properties
        .get_mut("PolicyDocument")
        .and_then(|document| document.get_mut("Statement"))
        .and_then(Value::as_array_mut)
        .ok_or_else(|| Error::validation(logical_id, "policy document has no statement list"))?;
    list.push(statement.to_json());
    Ok(())
}
