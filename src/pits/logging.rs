//! Device log shipping.
//!
//! Cameras ship their daemon logs into one log group through the device role.

use serde_json::Value;

use super::device::DeviceRole;
use crate::aws::iam::PolicyStatement;
use crate::error::Result;
use crate::template::intrinsic::{concat, get_att};
use crate::template::{Arn, ArnFormat, Resource, Scope, Stack};

/// Retention applied when none is configured (two years).
pub const DEFAULT_RETENTION_DAYS: u32 = 731;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogGroupClass {
    #[default]
    Standard,
    InfrequentAccess,
}

impl LogGroupClass {
    fn as_str(self) -> &'static str {
        match self {
            LogGroupClass::Standard => "STANDARD",
            LogGroupClass::InfrequentAccess => "INFREQUENT_ACCESS",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeviceLoggingProps {
    pub log_group_name: Option<String>,
    pub log_group_class: LogGroupClass,
    pub retention_days: Option<u32>,
}

/// Handle to the device log group.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceLogging {
    pub logical_id: String,
}

impl DeviceLogging {
    /// Declares `<scope>LogGroup`.
    pub fn new(stack: &mut Stack, scope: &Scope, props: DeviceLoggingProps) -> Result<Self> {
        let resource = Resource::new("AWS::Logs::LogGroup")
            .property("LogGroupClass", props.log_group_class.as_str())
            .property("LogGroupName", props.log_group_name)
            .property(
                "RetentionInDays",
                props.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS),
            );
        let logical_id = stack.declare(&scope.child("LogGroup"), resource)?;
        Ok(Self { logical_id })
    }

    pub fn arn(&self) -> Value {
        get_att(&self.logical_id, "Arn")
    }

    /// Lets devices assuming `role` write their own log streams.
    pub fn allow_device_management(&self, stack: &mut Stack, role: &DeviceRole) -> Result<()> {
        role.upload_policy.add_statements(
            stack,
            [
                PolicyStatement::allow()
                    .actions([
                        "logs:CreateLogStream",
                        "logs:DescribeLogStreams",
                        "logs:PutLogEvents",
                    ])
                    .resource(concat(vec![self.arn(), Value::from(":log-stream:*")])),
                PolicyStatement::allow().action("logs:DescribeLogGroups").resource(
                    Arn::new("logs", "log-group")
                        .resource_name("*")
                        .format(ArnFormat::ColonResourceName)
                        .build(),
                ),
            ],
        )
    }
}
