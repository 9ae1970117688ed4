//! Device identity.
//!
//! Cameras authenticate with X.509 certificates. A certificate exchanges
//! itself for temporary credentials of [`DeviceRole`] through a role alias,
//! and [`ThingPolicy`] governs what the device may do on the message broker.
//! Neither the role alias nor the IoT policy has a declarative resource, so
//! both go through external calls.

use serde_json::{json, Value};

use super::storage::{ConversionProps, Storage, StoragePaths, StorageCapability, StorageProps};
use crate::aws::custom::{AwsCustomResource, AwsCustomResourceProps, ExternalCall, OnDelete, PhysicalResourceId};
use crate::aws::iam::{ManagedPolicy, PolicyDocument, PolicyStatement, Principal, Role, RoleProps};
use crate::aws::lambda::Function;
use crate::error::Result;
use crate::template::intrinsic::{concat, stringify};
use crate::template::{format_arn, Arn, Scope, Stack};

pub const DEFAULT_ROLE_NAME: &str = "PinTheSkyRole";
pub const DEFAULT_ROLE_ALIAS_NAME: &str = "PinTheSkyRoleAlias";
pub const DEFAULT_THING_POLICY_NAME: &str = "PinTheSkyThingPolicy";

/// Topic devices publish their events on.
pub const EVENTS_OUTPUT_TOPIC: &str = "pinthesky/events/output";

/// Policy variable substituted with the connecting thing's name.
const THING_NAME: &str = "${iot:Connection.Thing.ThingName}";

/// Role assumed by device certificates, with upload access to the storage prefixes.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRole {
    pub role: Role,
    pub upload_policy: ManagedPolicy,
}

impl DeviceRole {
    pub fn new(
        stack: &mut Stack,
        scope: &Scope,
        storage: &dyn StorageCapability,
        role_name: Option<&str>,
        managed_policy_name: Option<&str>,
    ) -> Result<Self> {
        let role = Role::new(
            stack,
            &scope.child("Role"),
            RoleProps::assumed_by(Principal::service("credentials.iot.amazonaws.com"))
                .role_name(role_name.unwrap_or(DEFAULT_ROLE_NAME)),
        )?;

        let policy_name = match managed_policy_name {
            Some(name) => Value::from(name),
            None => concat(vec![storage.bucket_name(), Value::from("-policy")]),
        };
        let upload_policy = ManagedPolicy::new(
            stack,
            &scope.child("UploadPolicy"),
            Some(policy_name),
            PolicyDocument::new([PolicyStatement::allow()
                .actions(["s3:PutObject*", "s3:Abort*"])
                .resources([storage.motion_video_objects_arn(), storage.capture_objects_arn()])]),
            vec![role.name.clone()],
        )?;

        Ok(Self { role, upload_policy })
    }
}

/// Indirection that lets certificates assume [`DeviceRole`].
#[derive(Debug, Clone, PartialEq)]
pub struct RoleAlias {
    pub name: String,
    pub arn: Value,
}

impl RoleAlias {
    /// Declares `<scope>RoleAlias` with explicit create and delete calls.
    pub fn new(stack: &mut Stack, scope: &Scope, role: &Role, name: Option<&str>) -> Result<Self> {
        let name = name.unwrap_or(DEFAULT_ROLE_ALIAS_NAME).to_string();
        let arn = Arn::new("iot", "rolealias").resource_name(name.clone()).build();

        let create = ExternalCall::new("Iot", "createRoleAlias", PhysicalResourceId::of(&name))
            .parameters(json!({ "roleAlias": name, "roleArn": role.arn }));
        let delete = ExternalCall::new("Iot", "deleteRoleAlias", PhysicalResourceId::of(&name))
            .parameters(json!({ "roleAlias": name }));

        AwsCustomResource::new(
            stack,
            &scope.child("RoleAlias"),
            AwsCustomResourceProps::new(OnDelete::Call(delete))
                .on_create(create)
                .statement(
                    PolicyStatement::allow()
                        .actions(["iot:CreateRoleAlias", "iot:DeleteRoleAlias"])
                        .resource(arn.clone()),
                )
                .statement(
                    PolicyStatement::allow()
                        .actions(["iam:PassRole", "iam:GetRole"])
                        .resource(role.arn.clone()),
                ),
        )?;

        Ok(Self { name, arn })
    }
}

/// The IoT policy attached to every device certificate.
#[derive(Debug, Clone, PartialEq)]
pub struct ThingPolicy {
    pub name: String,
}

impl ThingPolicy {
    /// Declares `<scope>ThingPolicy`. Updates publish a new policy version
    /// and mark it as the default.
    pub fn new(stack: &mut Stack, scope: &Scope, role_alias: &RoleAlias, name: Option<&str>) -> Result<Self> {
        let name = name.unwrap_or(DEFAULT_THING_POLICY_NAME).to_string();
        let document = stringify(&Self::document(&role_alias.arn));

        let create = ExternalCall::new("Iot", "createPolicy", PhysicalResourceId::of(&name))
            .parameters(json!({ "policyDocument": document, "policyName": name }));
        let update = ExternalCall::new("Iot", "createPolicyVersion", PhysicalResourceId::of(&name))
            .parameters(json!({
                "policyDocument": document,
                "policyName": name,
                "setAsDefault": true,
            }));
        let delete = ExternalCall::new("Iot", "deletePolicy", PhysicalResourceId::of(&name))
            .parameters(json!({ "policyName": name }));

        AwsCustomResource::new(
            stack,
            &scope.child("ThingPolicy"),
            AwsCustomResourceProps::new(OnDelete::Call(delete))
                .on_create(create)
                .on_update(update)
                .install_latest_sdk()
                .statement(
                    PolicyStatement::allow()
                        .actions(["iot:CreatePolicy", "iot:CreatePolicyVersion", "iot:DeletePolicy"])
                        .resource(format_arn("iot", format!("policy/{}", name))),
                ),
        )?;

        Ok(Self { name })
    }

    /// Policy document granting each device access to its own topics only.
    pub fn document(role_alias_arn: &Value) -> Value {
        let topic = |path: &str| format_arn("iot", format!("topic/{}", path));
        let topic_filter = |path: &str| format_arn("iot", format!("topicfilter/{}", path));
        let input = format!("pinthesky/events/{}/input", THING_NAME);
        let shadow = format!("$aws/things/{}/shadow/name/pinthesky/*", THING_NAME);
        let jobs = format!("$aws/things/{}/jobs/*", THING_NAME);

        json!({
            "Statement": [
                {
                    "Action": ["iot:Connect"],
                    "Effect": "Allow",
                    "Resource": [format_arn("iot", format!("client/{}", THING_NAME))],
                },
                {
                    "Action": ["iot:Publish"],
                    "Effect": "Allow",
                    "Resource": [topic(EVENTS_OUTPUT_TOPIC), topic(&shadow), topic(&jobs)],
                },
                {
                    "Action": ["iot:Subscribe"],
                    "Effect": "Allow",
                    "Resource": [topic_filter(&input), topic_filter(&shadow), topic_filter(&jobs)],
                },
                {
                    "Action": ["iot:Receive"],
                    "Effect": "Allow",
                    "Resource": [topic(&input), topic(&shadow), topic(&jobs)],
                },
                {
                    "Action": ["iot:AssumeRoleWithCertificate"],
                    "Effect": "Allow",
                    "Resource": [role_alias_arn],
                },
            ],
            "Version": "2012-10-17",
        })
    }
}

/// Properties of [`DeviceConnection`].
#[derive(Debug, Clone, Default)]
pub struct DeviceConnectionProps {
    pub bucket_name: Option<String>,
    pub paths: StoragePaths,
    pub expire_motion_videos: Option<bool>,
    pub role_name: Option<String>,
    pub role_alias_name: Option<String>,
    pub policy_name: Option<String>,
    /// Attach the conversion worker with these parameters
    pub conversion: Option<ConversionProps>,
    /// Another stack subscribes to object events on the storage bucket
    pub shared_notifications: bool,
}

/// Everything a camera needs to connect and upload.
#[derive(Debug, Clone)]
pub struct DeviceConnection {
    pub storage: Storage,
    pub role: DeviceRole,
    pub role_alias: RoleAlias,
    pub thing_policy: ThingPolicy,
    pub conversion_function: Option<Function>,
}

impl DeviceConnection {
    pub fn new(stack: &mut Stack, scope: &Scope, props: DeviceConnectionProps) -> Result<Self> {
        let storage = Storage::owned(
            stack,
            &scope.child("Storage"),
            StorageProps {
                bucket_name: props.bucket_name.clone(),
                paths: props.paths.clone(),
                expire_motion_videos: props.expire_motion_videos.unwrap_or(true),
                shared_notifications: props.shared_notifications,
            },
        )?;

        let conversion_function = match props.conversion.clone() {
            Some(conversion) => Some(storage.add_conversion_function(stack, conversion)?),
            None => None,
        };

        let role = DeviceRole::new(
            stack,
            &scope.child("ThingRole"),
            &storage,
            props.role_name.as_deref(),
            None,
        )?;
        let role_alias = RoleAlias::new(
            stack,
            &scope.child("ThingRoleAlias"),
            &role.role,
            props.role_alias_name.as_deref(),
        )?;
        let thing_policy = ThingPolicy::new(
            stack,
            &scope.child("ThingPolicy"),
            &role_alias,
            props.policy_name.as_deref(),
        )?;

        tracing::info!(
            "Declared device connection with role alias {} and policy {}",
            role_alias.name,
            thing_policy.name
        );
        Ok(Self {
            storage,
            role,
            role_alias,
            thing_policy,
            conversion_function,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixture_stack;

    fn connection(stack: &mut Stack) -> DeviceConnection {
        DeviceConnection::new(
            stack,
            &Scope::new("Device"),
            DeviceConnectionProps {
                bucket_name: Some("farts-mcgeehee".into()),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_role_and_upload_policy() {
        let (mut stack, _assets) = fixture_stack("Test");
        let device = connection(&mut stack);

        let role = stack.resource("DeviceThingRoleRole").unwrap();
        assert_eq!(role.properties["RoleName"], "PinTheSkyRole");
        assert_eq!(
            role.properties["AssumeRolePolicyDocument"]["Statement"][0]["Principal"]["Service"],
            "credentials.iot.amazonaws.com"
        );

        let policy = stack.resource(&device.role.upload_policy.logical_id).unwrap();
        let statement = &policy.properties["PolicyDocument"]["Statement"][0];
        assert_eq!(statement["Action"], json!(["s3:PutObject*", "s3:Abort*"]));
        let resources = statement["Resource"].as_array().unwrap();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0]["Fn::Join"][1][1], "/motion_videos/*");
        assert_eq!(resources[1]["Fn::Join"][1][1], "/capture_images/*");
        assert_eq!(
            policy.properties["ManagedPolicyName"],
            json!({"Fn::Join": ["", [{"Ref": "DeviceStorageBucket"}, "-policy"]]})
        );
    }

    #[test]
    fn test_role_alias_lifecycle() {
        let (mut stack, _assets) = fixture_stack("Test");
        let device = connection(&mut stack);
        assert_eq!(device.role_alias.name, "PinTheSkyRoleAlias");

        let alias = stack.resource("DeviceThingRoleAliasRoleAlias").unwrap();
        assert!(alias.properties.get("Update").is_none());
        let delete = &alias.properties["Delete"];
        assert_eq!(
            delete.as_str().unwrap(),
            "{\"action\":\"deleteRoleAlias\",\"parameters\":{\"roleAlias\":\"PinTheSkyRoleAlias\"},\"physicalResourceId\":{\"id\":\"PinTheSkyRoleAlias\"},\"service\":\"Iot\"}"
        );
        // the role ARN is a token, so the create payload is a join
        assert!(alias.properties["Create"].get("Fn::Join").is_some());
    }

    #[test]
    fn test_thing_policy_versions() {
        let (mut stack, _assets) = fixture_stack("Test");
        connection(&mut stack);

        let policy = stack.resource("DeviceThingPolicyThingPolicy").unwrap();
        assert_eq!(policy.properties["InstallLatestAwsSdk"], true);
        let update = serde_json::to_string(&policy.properties["Update"]).unwrap();
        assert!(update.contains("createPolicyVersion"));
        assert!(update.contains("\\\"setAsDefault\\\":true"));
        let delete = policy.properties["Delete"].as_str().unwrap();
        assert!(delete.contains("deletePolicy"));
        stack.validate().unwrap();
    }

    #[test]
    fn test_thing_policy_document_uses_thing_name_variable() {
        let document = ThingPolicy::document(&json!("arn:alias"));
        let rendered = serde_json::to_string(&document).unwrap();
        assert!(rendered.contains(":client/${iot:Connection.Thing.ThingName}"));
        assert!(rendered.contains(":topicfilter/pinthesky/events/${iot:Connection.Thing.ThingName}/input"));
        assert!(rendered.contains(":topic/pinthesky/events/output"));
        assert_eq!(document["Statement"][4]["Resource"], json!(["arn:alias"]));
    }

    #[test]
    fn test_custom_names_and_conversion() {
        let (mut stack, _assets) = fixture_stack("Test");
        let device = DeviceConnection::new(
            &mut stack,
            &Scope::new("Device"),
            DeviceConnectionProps {
                role_name: Some("CustomRole".into()),
                policy_name: Some("CustomPolicy".into()),
                conversion: Some(ConversionProps::default()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(device.thing_policy.name, "CustomPolicy");
        assert!(device.conversion_function.is_some());
        assert_eq!(
            stack.resource("DeviceThingRoleRole").unwrap().properties["RoleName"],
            "CustomRole"
        );
        stack.validate().unwrap();
    }
}
