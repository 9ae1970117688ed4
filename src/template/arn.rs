//! ARN formatting for the deploying account and region.

use serde_json::Value;

use super::intrinsic::{account_id, concat, partition, region};

/// How the resource name is separated from the resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArnFormat {
    /// `arn:aws:svc:region:account:resource`
    NoResourceName,
    /// `arn:aws:svc:region:account:resource/name`
    #[default]
    SlashResourceName,
    /// `arn:aws:svc:region:account:resource:name`
    ColonResourceName,
}

/// Builder for an ARN in the current partition.
///
/// ```rust,ignore
/// let alias = Arn::new("iot", "rolealias").resource_name("PinTheSkyRoleAlias").build();
/// ```
#[derive(Debug, Clone)]
pub struct Arn {
    service: String,
    resource: Value,
    resource_name: Option<Value>,
    format: ArnFormat,
    region: Option<Value>,
    account: Option<Value>,
}

impl Arn {
    /// Starts an ARN for `service` and `resource`.
    pub fn new(service: impl Into<String>, resource: impl Into<Value>) -> Self {
        Self {
            service: service.into(),
            resource: resource.into(),
            resource_name: None,
            format: ArnFormat::default(),
            region: None,
            account: None,
        }
    }

    pub fn resource_name(mut self, name: impl Into<Value>) -> Self {
        self.resource_name = Some(name.into());
        self
    }

    pub fn format(mut self, format: ArnFormat) -> Self {
        self.format = format;
        self
    }

    pub fn region(mut self, region: impl Into<Value>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn account(mut self, account: impl Into<Value>) -> Self {
        self.account = Some(account.into());
        self
    }

    /// Omits region and account, as global services (S3) do.
    pub fn global(mut self) -> Self {
        self.region = Some(Value::String(String::new()));
        self.account = Some(Value::String(String::new()));
        self
    }

    /// Renders the ARN as a literal string or a `Fn::Join`.
    pub fn build(self) -> Value {
        let mut parts = vec![
            Value::from("arn:"),
            partition(),
            Value::from(format!(":{}:", self.service)),
            self.region.unwrap_or_else(region),
            Value::from(":"),
            self.account.unwrap_or_else(account_id),
            Value::from(":"),
            self.resource,
        ];

        if let Some(name) = self.resource_name {
            match self.format {
                ArnFormat::SlashResourceName => parts.push(Value::from("/")),
                ArnFormat::ColonResourceName => parts.push(Value::from(":")),
                ArnFormat::NoResourceName => {}
            }
            if self.format != ArnFormat::NoResourceName {
                parts.push(name);
            }
        }

        concat(parts)
    }
}

/// Shorthand for `Arn::new(service, resource).build()`.
pub fn format_arn(service: &str, resource: impl Into<Value>) -> Value {
    Arn::new(service, resource).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::intrinsic::reference;
    use serde_json::json;

    #[test]
    fn test_slash_resource_name() {
        let arn = Arn::new("iot", "rolealias")
            .resource_name("PinTheSkyRoleAlias")
            .build();
        assert_eq!(
            arn,
            json!({"Fn::Join": ["", [
                "arn:", {"Ref": "AWS::Partition"}, ":iot:", {"Ref": "AWS::Region"},
                ":", {"Ref": "AWS::AccountId"}, ":rolealias/PinTheSkyRoleAlias"
            ]]})
        );
    }

    #[test]
    fn test_colon_resource_name() {
        let arn = Arn::new("logs", "log-group")
            .resource_name("*")
            .format(ArnFormat::ColonResourceName)
            .build();
        let parts = arn["Fn::Join"][1].as_array().unwrap();
        assert_eq!(parts.last().unwrap(), &json!(":log-group:*"));
    }

    #[test]
    fn test_global_service_has_empty_region_and_account() {
        let arn = Arn::new("s3", "my-bucket").global().build();
        assert_eq!(
            arn,
            json!({"Fn::Join": ["", ["arn:", {"Ref": "AWS::Partition"}, ":s3:::my-bucket"]]})
        );
    }

    #[test]
    fn test_regionless_service() {
        let arn = Arn::new("iam", "role/ops").region("").build();
        assert_eq!(
            arn,
            json!({"Fn::Join": ["", [
                "arn:", {"Ref": "AWS::Partition"}, ":iam::", {"Ref": "AWS::AccountId"}, ":role/ops"
            ]]})
        );
    }

    #[test]
    fn test_token_resource() {
        let arn = Arn::new("execute-api", reference("Api"))
            .resource_name("*/*")
            .build();
        let parts = arn["Fn::Join"][1].as_array().unwrap();
        assert!(parts.contains(&json!({"Ref": "Api"})));
        assert_eq!(parts.last().unwrap(), &json!("/*/*"));
    }

    #[test]
    fn test_policy_variables_stay_literal() {
        let arn = format_arn("iot", "client/${iot:Connection.Thing.ThingName}");
        let parts = arn["Fn::Join"][1].as_array().unwrap();
        assert_eq!(
            parts.last().unwrap(),
            &json!(":client/${iot:Connection.Thing.ThingName}")
        );
    }
}
