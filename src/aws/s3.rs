//! S3 buckets, lifecycle rules and event notifications.

use serde_json::{json, Value};

use super::custom::Provider;
use super::lambda::{Function, Permission};
use crate::error::Result;
use crate::template::intrinsic::{account_id, concat, get_att, reference, region, url_suffix};
use crate::template::{Arn, RemovalPolicy, Resource, Scope, Stack};

/// Storage class an object transitions into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    InfrequentAccess,
    Glacier,
    DeepArchive,
}

impl StorageClass {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageClass::InfrequentAccess => "STANDARD_IA",
            StorageClass::Glacier => "GLACIER",
            StorageClass::DeepArchive => "DEEP_ARCHIVE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleRule {
    pub prefix: String,
    pub expiration_days: Option<u32>,
    /// `(days, class)` pairs in ascending order
    pub transitions: Vec<(u32, StorageClass)>,
}

impl LifecycleRule {
    pub fn expire(prefix: impl Into<String>, days: u32) -> Self {
        Self {
            prefix: prefix.into(),
            expiration_days: Some(days),
            transitions: Vec::new(),
        }
    }

    pub fn transition(prefix: impl Into<String>, transitions: Vec<(u32, StorageClass)>) -> Self {
        Self {
            prefix: prefix.into(),
            expiration_days: None,
            transitions,
        }
    }

    fn to_json(&self) -> Value {
        let mut rule = json!({
            "Prefix": self.prefix,
            "Status": "Enabled",
        });
        if let Some(days) = self.expiration_days {
            rule["ExpirationInDays"] = json!(days);
        }
        if !self.transitions.is_empty() {
            rule["Transitions"] = self
                .transitions
                .iter()
                .map(|(days, class)| json!({"StorageClass": class.as_str(), "TransitionInDays": days}))
                .collect();
        }
        rule
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorsRule {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BucketProps {
    pub bucket_name: Option<String>,
    pub lifecycle_rules: Vec<LifecycleRule>,
    pub cors: Vec<CorsRule>,
    /// Blocks every form of public access
    pub private: bool,
    /// Stacks other than the owner also subscribe to object events, so the
    /// owner must not replace the bucket's whole notification configuration
    pub shared_notifications: bool,
}

/// Handle to a declared or imported bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    /// Logical id when the bucket is owned by this stack
    pub logical_id: Option<String>,
    pub name: Value,
    pub arn: Value,
    scope: Scope,
    shared_notifications: bool,
}

impl Bucket {
    /// Declares an `AWS::S3::Bucket`. Buckets are retained on teardown.
    pub fn new(stack: &mut Stack, scope: &Scope, props: BucketProps) -> Result<Self> {
        let mut resource = Resource::new("AWS::S3::Bucket")
            .property("BucketName", props.bucket_name.clone())
            .removal_policy(RemovalPolicy::Retain);

        if !props.lifecycle_rules.is_empty() {
            let rules: Vec<Value> = props.lifecycle_rules.iter().map(LifecycleRule::to_json).collect();
            resource.set("LifecycleConfiguration", json!({ "Rules": rules }));
        }
        if !props.cors.is_empty() {
            let rules: Vec<Value> = props
                .cors
                .iter()
                .map(|rule| {
                    json!({
                        "AllowedMethods": rule.allowed_methods,
                        "AllowedOrigins": rule.allowed_origins,
                    })
                })
                .collect();
            resource.set("CorsConfiguration", json!({ "CorsRules": rules }));
        }
        if props.private {
            resource.set(
                "PublicAccessBlockConfiguration",
                json!({
                    "BlockPublicAcls": true,
                    "BlockPublicPolicy": true,
                    "IgnorePublicAcls": true,
                    "RestrictPublicBuckets": true,
                }),
            );
        }

        let logical_id = stack.declare(scope, resource)?;
        Ok(Self {
            name: reference(&logical_id),
            arn: get_att(&logical_id, "Arn"),
            logical_id: Some(logical_id),
            scope: scope.clone(),
            shared_notifications: props.shared_notifications,
        })
    }

    /// A bucket owned elsewhere, referenced by name.
    pub fn from_name(scope: &Scope, name: impl Into<Value>) -> Self {
        let name = name.into();
        Self {
            logical_id: None,
            arn: Arn::new("s3", name.clone()).global().build(),
            name,
            scope: scope.clone(),
            shared_notifications: true,
        }
    }

    pub fn is_owned(&self) -> bool {
        self.logical_id.is_some()
    }

    /// Whether this stack's notification resource owns the bucket's entire
    /// notification configuration. Otherwise only its own subscriptions are
    /// merged in and removed.
    pub fn manages_notifications(&self) -> bool {
        self.is_owned() && !self.shared_notifications
    }

    /// ARN of the objects matching `pattern`, e.g. `motion_videos/*`.
    pub fn arn_for_objects(&self, pattern: &str) -> Value {
        concat(vec![self.arn.clone(), Value::from(format!("/{}", pattern))])
    }

    pub fn regional_domain_name(&self) -> Value {
        match &self.logical_id {
            Some(id) => get_att(id, "RegionalDomainName"),
            None => concat(vec![
                self.name.clone(),
                Value::from(".s3."),
                region(),
                Value::from("."),
                url_suffix(),
            ]),
        }
    }

    /// Invokes `function` for objects created under `prefix`.
    ///
    /// Every subscription of a bucket lands in one notifications resource.
    /// Imported and shared buckets merge the configuration with whatever
    /// other stacks already set up.
    pub fn add_object_created_notification(
        &self,
        stack: &mut Stack,
        function: &Function,
        prefix: &str,
    ) -> Result<()> {
        let provider = Provider::BucketNotifications.ensure(stack)?;

        let permission_id = function.add_permission(
            stack,
            &format!("AllowBucketNotificationsFrom{}", self.scope.logical_id()),
            Permission::invoke("s3.amazonaws.com")
                .source_arn(self.arn.clone())
                .source_account(account_id()),
        )?;

        let configuration = json!({
            "Events": ["s3:ObjectCreated:*"],
            "Filter": {"Key": {"FilterRules": [{"Name": "prefix", "Value": prefix}]}},
            "LambdaFunctionArn": function.arn(),
        });

        let notifications = self.scope.child("Notifications");
        let notifications_id = notifications.logical_id();
        if stack.contains(&notifications_id) {
            let resource = stack.resource_mut(&notifications_id)?;
            if let Some(list) = resource
                .properties
                .get_mut("NotificationConfiguration")
                .and_then(|c| c.get_mut("LambdaFunctionConfigurations"))
                .and_then(Value::as_array_mut)
            {
                list.push(configuration);
            }
            return stack.add_dependency(&notifications_id, &permission_id);
        }

        let resource = Resource::new("Custom::S3BucketNotifications")
            .property("BucketName", self.name.clone())
            .property("Managed", self.manages_notifications())
            .property(
                "NotificationConfiguration",
                json!({ "LambdaFunctionConfigurations": [configuration] }),
            )
            .property("ServiceToken", provider.arn())
            .depends_on(permission_id);
        stack.declare(&notifications, resource)?;
        tracing::debug!("Subscribed {} to {} objects", function.logical_id, prefix);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::asset::Asset;
    use crate::aws::lambda::{Code, FunctionProps};
    use crate::testing::fixture_stack;

    fn worker(stack: &mut Stack, id: &str) -> Function {
        Function::new(
            stack,
            &Scope::new(id),
            FunctionProps::new(Code::Image(json!("repo@sha256:abc"))),
        )
        .unwrap()
    }

    #[test]
    fn test_bucket_with_lifecycle() {
        let mut stack = Stack::new("Test");
        let bucket = Bucket::new(
            &mut stack,
            &Scope::new("Storage").child("Bucket"),
            BucketProps {
                bucket_name: Some("farts-mcgeehee".into()),
                lifecycle_rules: vec![
                    LifecycleRule::expire("motion_videos/", 30),
                    LifecycleRule::transition(
                        "motion_videos_converted/",
                        vec![(30, StorageClass::InfrequentAccess), (90, StorageClass::Glacier)],
                    ),
                ],
                ..Default::default()
            },
        )
        .unwrap();

        assert!(bucket.is_owned());
        let resource = stack.resource("StorageBucket").unwrap();
        assert_eq!(resource.properties["BucketName"], "farts-mcgeehee");
        assert_eq!(resource.deletion_policy, Some(RemovalPolicy::Retain));
        let rules = &resource.properties["LifecycleConfiguration"]["Rules"];
        assert_eq!(rules[0]["ExpirationInDays"], 30);
        assert_eq!(rules[1]["Transitions"][1]["StorageClass"], "GLACIER");
        assert!(rules[1].get("ExpirationInDays").is_none());
    }

    #[test]
    fn test_imported_bucket_arns() {
        let bucket = Bucket::from_name(&Scope::new("Storage"), "shared-bucket");
        assert!(!bucket.is_owned());
        let arn = bucket.arn_for_objects("capture_images/*");
        let parts = arn["Fn::Join"][1].as_array().unwrap();
        assert_eq!(parts.last().unwrap(), &json!(":s3:::shared-bucket/capture_images/*"));
    }

    #[test]
    fn test_notifications_share_one_resource() {
        let (mut stack, _assets) = fixture_stack("Test");
        let bucket = Bucket::new(&mut stack, &Scope::new("Storage").child("Bucket"), BucketProps::default())
            .unwrap();
        let convert = worker(&mut stack, "Convert");
        let index = worker(&mut stack, "Index");

        bucket
            .add_object_created_notification(&mut stack, &convert, "motion_videos/")
            .unwrap();
        bucket
            .add_object_created_notification(&mut stack, &index, "motion_videos_converted/")
            .unwrap();

        let notifications = stack.resource("StorageBucketNotifications").unwrap();
        assert_eq!(notifications.resource_type, "Custom::S3BucketNotifications");
        assert_eq!(notifications.properties["Managed"], true);
        let configs = notifications.properties["NotificationConfiguration"]["LambdaFunctionConfigurations"]
            .as_array()
            .unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(
            configs[1]["Filter"]["Key"]["FilterRules"][0]["Value"],
            "motion_videos_converted/"
        );
        assert!(notifications
            .depends_on
            .contains("ConvertAllowBucketNotificationsFromStorageBucket"));
        assert!(notifications
            .depends_on
            .contains("IndexAllowBucketNotificationsFromStorageBucket"));

        let permission = stack
            .resource("IndexAllowBucketNotificationsFromStorageBucket")
            .unwrap();
        assert_eq!(permission.properties["Principal"], "s3.amazonaws.com");
        assert_eq!(permission.properties["SourceAccount"], account_id());
        stack.validate().unwrap();
    }

    #[test]
    fn test_shared_bucket_notifications_are_unmanaged() {
        let (mut stack, _assets) = fixture_stack("Test");
        let bucket = Bucket::new(
            &mut stack,
            &Scope::new("Storage").child("Bucket"),
            BucketProps {
                shared_notifications: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(bucket.is_owned());
        assert!(!bucket.manages_notifications());

        let convert = worker(&mut stack, "Convert");
        bucket
            .add_object_created_notification(&mut stack, &convert, "motion_videos/")
            .unwrap();
        let notifications = stack.resource("StorageBucketNotifications").unwrap();
        assert_eq!(notifications.properties["Managed"], false);
        assert_eq!(notifications.properties["BucketName"], json!({"Ref": "StorageBucket"}));
    }

    #[test]
    fn test_imported_bucket_notifications_are_unmanaged() {
        let (mut stack, _assets) = fixture_stack("Test");
        let bucket = Bucket::from_name(&Scope::new("Storage"), "shared-bucket");
        let function = Function::new(
            &mut stack,
            &Scope::new("Index"),
            FunctionProps::new(Code::Asset(Asset::prebuilt("index", "beef"))),
        )
        .unwrap();
        bucket
            .add_object_created_notification(&mut stack, &function, "converted/")
            .unwrap();

        let notifications = stack.resource("StorageNotifications").unwrap();
        assert_eq!(notifications.properties["Managed"], false);
        assert_eq!(notifications.properties["BucketName"], "shared-bucket");
        assert!(stack.contains("BucketNotificationsHandlerServiceRoleDefaultPolicy"));
    }
}
