//! Lambda functions, permissions and event sources.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{json, Map, Value};

use super::asset::Asset;
use super::iam::{
    append_to_policy, aws_managed_policy_arn, declare_policy, PolicyDocument, PolicyStatement,
    Principal, Role, RoleProps, LAMBDA_BASIC_EXECUTION,
};
use crate::error::Result;
use crate::template::intrinsic::{get_att, reference};
use crate::template::{Resource, Scope, Stack};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Runtime {
    Python39,
    Python312,
    NodeJs18,
    /// Custom runtime, handler binary named `bootstrap`
    ProvidedAl2023,
}

impl Runtime {
    pub fn as_str(self) -> &'static str {
        match self {
            Runtime::Python39 => "python3.9",
            Runtime::Python312 => "python3.12",
            Runtime::NodeJs18 => "nodejs18.x",
            Runtime::ProvidedAl2023 => "provided.al2023",
        }
    }
}

/// Deployment package of a function.
#[derive(Debug, Clone, PartialEq)]
pub enum Code {
    /// Zip package from the assets bucket
    Asset(Asset),
    /// Container image URI
    Image(Value),
}

/// Properties of a function.
#[derive(Debug, Clone)]
pub struct FunctionProps {
    pub code: Code,
    /// Required for zip packages
    pub handler: Option<String>,
    /// Required for zip packages
    pub runtime: Option<Runtime>,
    pub function_name: Option<String>,
    pub memory_size: u32,
    pub timeout: Duration,
    pub environment: BTreeMap<String, Value>,
}

impl FunctionProps {
    pub fn new(code: Code) -> Self {
        Self {
            code,
            handler: None,
            runtime: None,
            function_name: None,
            memory_size: 128,
            timeout: Duration::from_secs(3),
            environment: BTreeMap::new(),
        }
    }

    pub fn handler(mut self, handler: impl Into<String>) -> Self {
        self.handler = Some(handler.into());
        self
    }

    pub fn runtime(mut self, runtime: Runtime) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn memory_size(mut self, megabytes: u32) -> Self {
        self.memory_size = megabytes;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }
}

/// Where a stream mapping starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartingPosition {
    Latest,
    TrimHorizon,
}

/// A table change stream feeding a function.
#[derive(Debug, Clone)]
pub struct StreamEventSource {
    pub stream_arn: Value,
    pub starting_position: StartingPosition,
    pub batch_size: u32,
    /// Bounded retries before a batch is dropped
    pub retry_attempts: Option<u32>,
    pub enabled: bool,
}

/// Invocation grant for a principal.
#[derive(Debug, Clone)]
pub struct Permission {
    pub principal: String,
    pub action: String,
    pub source_arn: Option<Value>,
    pub source_account: Option<Value>,
}

impl Permission {
    /// `lambda:InvokeFunction` for a service principal.
    pub fn invoke(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            action: "lambda:InvokeFunction".to_string(),
            source_arn: None,
            source_account: None,
        }
    }

    pub fn source_arn(mut self, arn: impl Into<Value>) -> Self {
        self.source_arn = Some(arn.into());
        self
    }

    pub fn source_account(mut self, account: impl Into<Value>) -> Self {
        self.source_account = Some(account.into());
        self
    }
}

/// Handle to a declared function and its execution role.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub logical_id: String,
    pub role: Role,
    scope: Scope,
}

impl Function {
    /// Declares the function together with its execution role.
    pub fn new(stack: &mut Stack, scope: &Scope, props: FunctionProps) -> Result<Self> {
        let role = Role::new(
            stack,
            &scope.child("ServiceRole"),
            RoleProps::assumed_by(Principal::service("lambda.amazonaws.com"))
                .managed_policy(aws_managed_policy_arn(LAMBDA_BASIC_EXECUTION)),
        )?;

        let mut resource = Resource::new("AWS::Lambda::Function")
            .property("FunctionName", props.function_name.clone())
            .property("MemorySize", props.memory_size)
            .property("Timeout", props.timeout.as_secs())
            .property("Role", role.arn.clone());

        match &props.code {
            Code::Asset(asset) => {
                let asset = stack.add_asset(asset.clone());
                resource.set("Code", asset.s3_location());
                resource.set("Handler", props.handler.clone());
                resource.set("Runtime", props.runtime.map(Runtime::as_str));
            }
            Code::Image(uri) => {
                resource.set("Code", json!({ "ImageUri": uri }));
                resource.set("PackageType", "Image");
            }
        }

        if !props.environment.is_empty() {
            let variables: Map<String, Value> = props.environment.clone().into_iter().collect();
            resource.set("Environment", json!({ "Variables": variables }));
        }

        if let Some(role_id) = &role.logical_id {
            resource = resource.depends_on(role_id.clone());
        }

        let logical_id = stack.declare(scope, resource)?;
        Ok(Self {
            logical_id,
            role,
            scope: scope.clone(),
        })
    }

    /// Handle to a function already declared at `scope`.
    pub(crate) fn existing(scope: &Scope) -> Self {
        let role_id = scope.child("ServiceRole").logical_id();
        Self {
            logical_id: scope.logical_id(),
            role: Role {
                name: reference(&role_id),
                arn: get_att(&role_id, "Arn"),
                logical_id: Some(role_id),
            },
            scope: scope.clone(),
        }
    }

    pub fn arn(&self) -> Value {
        get_att(&self.logical_id, "Arn")
    }

    pub fn name(&self) -> Value {
        reference(&self.logical_id)
    }

    fn default_policy_id(&self) -> String {
        self.scope.child("ServiceRole").child("DefaultPolicy").logical_id()
    }

    /// Adds a statement to the role's default policy, declaring it on first use.
    pub fn add_to_role_policy(&self, stack: &mut Stack, statement: PolicyStatement) -> Result<()> {
        let policy_id = self.default_policy_id();
        if stack.contains(&policy_id) {
            return append_to_policy(stack, &policy_id, statement);
        }

        declare_policy(
            stack,
            &self.scope.child("ServiceRole").child("DefaultPolicy"),
            PolicyDocument::new([statement]),
            vec![self.role.name.clone()],
        )?;
        stack.add_dependency(&self.logical_id, &policy_id)
    }

    /// Declares an `AWS::Lambda::Permission`.
    pub fn add_permission(&self, stack: &mut Stack, id: &str, permission: Permission) -> Result<String> {
        let resource = Resource::new("AWS::Lambda::Permission")
            .property("Action", permission.action)
            .property("FunctionName", self.arn())
            .property("Principal", permission.principal)
            .property("SourceArn", permission.source_arn)
            .property("SourceAccount", permission.source_account);
        stack.declare(&self.scope.child(id), resource)
    }

    /// Declares a stream mapping and grants stream read access.
    pub fn add_event_source(&self, stack: &mut Stack, source: StreamEventSource) -> Result<String> {
        self.add_to_role_policy(
            stack,
            PolicyStatement::allow().action("dynamodb:ListStreams").resource("*"),
        )?;
        self.add_to_role_policy(
            stack,
            PolicyStatement::allow()
                .actions([
                    "dynamodb:DescribeStream",
                    "dynamodb:GetRecords",
                    "dynamodb:GetShardIterator",
                ])
                .resource(source.stream_arn.clone()),
        )?;

        let position = match source.starting_position {
            StartingPosition::Latest => "LATEST",
            StartingPosition::TrimHorizon => "TRIM_HORIZON",
        };
        let resource = Resource::new("AWS::Lambda::EventSourceMapping")
            .property("BatchSize", source.batch_size)
            .property("Enabled", source.enabled)
            .property("EventSourceArn", source.stream_arn)
            .property("FunctionName", self.name())
            .property("MaximumRetryAttempts", source.retry_attempts)
            .property("StartingPosition", position)
            .depends_on(self.default_policy_id());
        stack.declare(&self.scope.child("DynamoDBEventSource"), resource)
    }
}
