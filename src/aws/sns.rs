//! SNS topics.

use serde_json::Value;

use crate::error::Result;
use crate::template::intrinsic::{get_att, reference};
use crate::template::{Resource, Scope, Stack};

/// Handle to a declared or existing topic.
#[derive(Debug, Clone, PartialEq)]
pub struct Topic {
    pub arn: Value,
    pub name: Value,
}

impl Topic {
    pub fn new(stack: &mut Stack, scope: &Scope, topic_name: &str, display_name: &str) -> Result<Self> {
        let resource = Resource::new("AWS::SNS::Topic")
            .property("DisplayName", display_name)
            .property("TopicName", topic_name);
        let logical_id = stack.declare(scope, resource)?;
        Ok(Self {
            arn: reference(&logical_id),
            name: get_att(&logical_id, "TopicName"),
        })
    }

    pub fn from_arn(arn: impl Into<Value>, name: impl Into<Value>) -> Self {
        Self {
            arn: arn.into(),
            name: name.into(),
        }
    }
}
