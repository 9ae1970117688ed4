//! External calls embedded in the resource graph.
//!
//! Operations the declarative layer cannot express (role aliases, IoT policy
//! versions, endpoint and image digest lookups) are declared as custom
//! resources. Each carries a stable physical id, so repeated convergence runs
//! never duplicate side effects, and an explicit deletion behavior.
//!
//! One provider function per stack serves every [`AwsCustomResource`]; each
//! resource brings its own least-privilege policy attached to that function's
//! role.

use std::time::Duration;

use serde_json::{json, Map, Value};

use super::iam::{declare_policy, PolicyDocument, PolicyStatement};
use super::lambda::{Code, Function, FunctionProps, Runtime};
use crate::error::{Error, Result};
use crate::template::intrinsic::{get_att, reference, stringify};
use super::asset::AssetRoot;
use crate::template::{Resource, Scope, Stack};

/// Physical id reported back by an external call.
#[derive(Debug, Clone, PartialEq)]
pub enum PhysicalResourceId {
    /// A fixed identity, typically the name of the created object
    Of(String),
    /// A field of the call response
    FromResponse(String),
}

impl PhysicalResourceId {
    pub fn of(id: impl Into<String>) -> Self {
        PhysicalResourceId::Of(id.into())
    }

    fn to_json(&self) -> Value {
        match self {
            PhysicalResourceId::Of(id) => json!({ "id": id }),
            PhysicalResourceId::FromResponse(path) => json!({ "responsePath": path }),
        }
    }
}

/// A single provider API call.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalCall {
    /// SDK client name, e.g. `Iot`
    pub service: String,
    /// SDK method, e.g. `createRoleAlias`
    pub action: String,
    pub parameters: Option<Value>,
    pub physical_resource_id: PhysicalResourceId,
}

impl ExternalCall {
    pub fn new(
        service: impl Into<String>,
        action: impl Into<String>,
        physical_resource_id: PhysicalResourceId,
    ) -> Self {
        Self {
            service: service.into(),
            action: action.into(),
            parameters: None,
            physical_resource_id,
        }
    }

    pub fn parameters(mut self, parameters: Value) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// JSON-encoded payload as the provider function expects it.
    pub fn payload(&self) -> Value {
        let mut call = Map::new();
        call.insert("action".into(), Value::String(self.action.clone()));
        if let Some(parameters) = &self.parameters {
            call.insert("parameters".into(), parameters.clone());
        }
        call.insert("physicalResourceId".into(), self.physical_resource_id.to_json());
        call.insert("service".into(), Value::String(self.service.clone()));
        stringify(&Value::Object(call))
    }
}

/// What teardown does to the external object.
#[derive(Debug, Clone, PartialEq)]
pub enum OnDelete {
    /// Issue this call
    Call(ExternalCall),
    /// Deliberately leave the object alone (lookups, reads)
    NoOp,
}

/// Properties of an external call resource.
#[derive(Debug, Clone)]
pub struct AwsCustomResourceProps {
    /// Defaults to `on_update` when omitted
    pub on_create: Option<ExternalCall>,
    /// When omitted, updates are a no-op and the create result stays cached
    pub on_update: Option<ExternalCall>,
    pub on_delete: OnDelete,
    /// Statements granted to the provider for this resource only
    pub policy: Vec<PolicyStatement>,
    pub install_latest_sdk: bool,
}

impl AwsCustomResourceProps {
    pub fn new(on_delete: OnDelete) -> Self {
        Self {
            on_create: None,
            on_update: None,
            on_delete,
            policy: Vec::new(),
            install_latest_sdk: false,
        }
    }

    pub fn on_create(mut self, call: ExternalCall) -> Self {
        self.on_create = Some(call);
        self
    }

    pub fn on_update(mut self, call: ExternalCall) -> Self {
        self.on_update = Some(call);
        self
    }

    pub fn statement(mut self, statement: PolicyStatement) -> Self {
        self.policy.push(statement);
        self
    }

    pub fn install_latest_sdk(mut self) -> Self {
        self.install_latest_sdk = true;
        self
    }
}

/// Handle to a declared `Custom::AWS` resource.
#[derive(Debug, Clone, PartialEq)]
pub struct AwsCustomResource {
    pub logical_id: String,
}

impl AwsCustomResource {
    pub fn new(stack: &mut Stack, scope: &Scope, props: AwsCustomResourceProps) -> Result<Self> {
        let create = props
            .on_create
            .as_ref()
            .or(props.on_update.as_ref())
            .ok_or_else(|| Error::MissingLifecycleAction(scope.path()))?;

        let provider = Provider::AwsApi.ensure(stack)?;
        let policy_id = declare_policy(
            stack,
            &scope.child("CustomResourcePolicy"),
            PolicyDocument::new(props.policy.clone()),
            vec![provider.role.name.clone()],
        )?;

        let mut resource = Resource::new("Custom::AWS")
            .property("ServiceToken", provider.arn())
            .property("Create", create.payload())
            .property("InstallLatestAwsSdk", props.install_latest_sdk)
            .depends_on(policy_id);
        if let Some(update) = &props.on_update {
            resource.set("Update", update.payload());
        }
        if let OnDelete::Call(delete) = &props.on_delete {
            resource.set("Delete", delete.payload());
        }

        let logical_id = stack.declare(scope, resource)?;
        Ok(Self { logical_id })
    }

    /// A field of the call response, e.g. `endpointAddress`.
    pub fn get_response_field(&self, path: &str) -> Value {
        get_att(&self.logical_id, path)
    }
}

/// Handle to a generic custom resource backed by a provider function.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomResource {
    pub logical_id: String,
}

impl CustomResource {
    pub fn new(
        stack: &mut Stack,
        scope: &Scope,
        resource_type: &str,
        service_token: Value,
        properties: Value,
    ) -> Result<Self> {
        let resource = Resource::new(resource_type)
            .property("ServiceToken", service_token)
            .properties(properties);
        let logical_id = stack.declare(scope, resource)?;
        Ok(Self { logical_id })
    }

    pub fn reference(&self) -> Value {
        reference(&self.logical_id)
    }
}

/// Provider functions declared at most once per stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// Executes single SDK calls for `Custom::AWS`
    AwsApi,
    /// Writes bucket notification configuration
    BucketNotifications,
    /// Copies a bundle into a bucket and invalidates a distribution
    BucketDeployment,
    /// Pushes an image archive from the assets bucket into a repository
    ImageDeployment,
}

impl Provider {
    fn scope(self) -> Scope {
        Scope::new(match self {
            Provider::AwsApi => "AwsCustomResourceProvider",
            Provider::BucketNotifications => "BucketNotificationsHandler",
            Provider::BucketDeployment => "BucketDeploymentHandler",
            Provider::ImageDeployment => "ImageDeploymentHandler",
        })
    }

    fn package(self) -> &'static str {
        match self {
            Provider::AwsApi => AssetRoot::AWS_API_PROVIDER,
            Provider::BucketNotifications => AssetRoot::NOTIFICATIONS_PROVIDER,
            Provider::BucketDeployment => AssetRoot::DEPLOYMENT_PROVIDER,
            Provider::ImageDeployment => AssetRoot::IMAGE_DEPLOYMENT_PROVIDER,
        }
    }

    fn props(self, code: Code) -> FunctionProps {
        let props = FunctionProps::new(code);
        match self {
            Provider::AwsApi => props
                .handler("index.handler")
                .runtime(Runtime::NodeJs18)
                .timeout(Duration::from_secs(120)),
            Provider::BucketNotifications => props
                .handler("index.handler")
                .runtime(Runtime::Python312)
                .timeout(Duration::from_secs(300)),
            Provider::BucketDeployment => props
                .handler("index.handler")
                .runtime(Runtime::Python39)
                .timeout(Duration::from_secs(900)),
            Provider::ImageDeployment => props
                .handler("bootstrap")
                .runtime(Runtime::ProvidedAl2023)
                .memory_size(512)
                .timeout(Duration::from_secs(900)),
        }
    }

    /// Returns the stack's provider function, declaring it on first use.
    pub fn ensure(self, stack: &mut Stack) -> Result<Function> {
        let scope = self.scope();
        if stack.contains(&scope.logical_id()) {
            return Ok(Function::existing(&scope));
        }

        let asset = stack.asset_root()?.asset(self.package())?;
        tracing::debug!("Declaring {:?} provider in {}", self, stack.name());
        let function = Function::new(stack, &scope, self.props(Code::Asset(asset)))?;

        if self == Provider::BucketNotifications {
            function.add_to_role_policy(
                stack,
                PolicyStatement::allow()
                    .action("s3:PutBucketNotification")
                    .resource("*"),
            )?;
        }
        Ok(function)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixture_stack;

    fn endpoint_props() -> AwsCustomResourceProps {
        AwsCustomResourceProps::new(OnDelete::NoOp)
            .on_create(
                ExternalCall::new("Iot", "describeEndpoint", PhysicalResourceId::of("iotDataEndpoint"))
                    .parameters(json!({"endpointType": "iot:data-ats"})),
            )
            .statement(PolicyStatement::allow().action("iot:DescribeEndpoint").resource("*"))
    }

    #[test]
    fn test_create_only_lookup() {
        let (mut stack, _assets) = fixture_stack("Test");
        let lookup =
            AwsCustomResource::new(&mut stack, &Scope::new("DataEndpoint").child("Address"), endpoint_props())
                .unwrap();

        let resource = stack.resource(&lookup.logical_id).unwrap();
        assert_eq!(resource.resource_type, "Custom::AWS");
        assert_eq!(
            resource.properties["Create"],
            json!("{\"action\":\"describeEndpoint\",\"parameters\":{\"endpointType\":\"iot:data-ats\"},\"physicalResourceId\":{\"id\":\"iotDataEndpoint\"},\"service\":\"Iot\"}")
        );
        assert!(resource.properties.get("Update").is_none());
        assert!(resource.properties.get("Delete").is_none());
        assert!(resource.depends_on.contains("DataEndpointAddressCustomResourcePolicy"));
        assert_eq!(
            lookup.get_response_field("endpointAddress"),
            json!({"Fn::GetAtt": ["DataEndpointAddress", "endpointAddress"]})
        );
        stack.validate().unwrap();
    }

    #[test]
    fn test_provider_is_singleton() {
        let (mut stack, _assets) = fixture_stack("Test");
        AwsCustomResource::new(&mut stack, &Scope::new("A"), endpoint_props()).unwrap();
        AwsCustomResource::new(&mut stack, &Scope::new("B"), endpoint_props()).unwrap();

        assert_eq!(stack.resources_of_type("AWS::Lambda::Function").count(), 1);
        assert_eq!(stack.resources_of_type("AWS::IAM::Policy").count(), 2);
        let policy = stack.resource("BCustomResourcePolicy").unwrap();
        assert_eq!(
            policy.properties["Roles"],
            json!([{"Ref": "AwsCustomResourceProviderServiceRole"}])
        );
    }

    #[test]
    fn test_create_defaults_to_update() {
        let (mut stack, _assets) = fixture_stack("Test");
        let digest = ExternalCall::new(
            "ECR",
            "describeImages",
            PhysicalResourceId::FromResponse("imageDetails.0.imageDigest".into()),
        );
        let props = AwsCustomResourceProps::new(OnDelete::NoOp).on_update(digest.clone());
        let lookup = AwsCustomResource::new(&mut stack, &Scope::new("Digest"), props).unwrap();

        let resource = stack.resource(&lookup.logical_id).unwrap();
        assert_eq!(resource.properties["Create"], resource.properties["Update"]);
        assert_eq!(resource.properties["Create"], digest.payload());
    }

    #[test]
    fn test_missing_lifecycle_action() {
        let (mut stack, _assets) = fixture_stack("Test");
        let err = AwsCustomResource::new(
            &mut stack,
            &Scope::new("Broken"),
            AwsCustomResourceProps::new(OnDelete::NoOp),
        )
        .unwrap_err();
        assert!(matches!(err, Error::MissingLifecycleAction(ref path) if path == "Broken"));
    }

    #[test]
    fn test_provider_requires_asset_root() {
        let mut stack = Stack::new("Bare");
        let err = AwsCustomResource::new(&mut stack, &Scope::new("A"), endpoint_props()).unwrap_err();
        assert!(matches!(err, Error::ProviderNotConfigured(_)));
    }

    #[test]
    fn test_payload_embeds_tokens() {
        let call = ExternalCall::new("Iot", "createRoleAlias", PhysicalResourceId::of("Alias"))
            .parameters(json!({"roleAlias": "Alias", "roleArn": get_att("Role", "Arn")}));
        let payload = call.payload();
        let parts = payload["Fn::Join"][1].as_array().unwrap();
        assert!(parts.contains(&get_att("Role", "Arn")));
    }
}
