//! Device health tracking.
//!
//! Devices publish a `health_end` event after each heartbeat. A fan-out rule
//! republishes it to two basic-ingest rules: one upserts the latest row per
//! device, the other appends a historical row that expires. Failures of any
//! rule are republished to `<input>/error` instead of being dropped.
//!
//! A scheduled check marks devices whose latest heartbeat is older than the
//! check interval as unhealthy.

use std::time::Duration;

use serde_json::{json, Value};

use super::device::EVENTS_OUTPUT_TOPIC;
use crate::aws::dynamodb::Table;
use crate::aws::iam::{PolicyDocument, PolicyStatement, Principal, Role, RoleProps};
use crate::aws::lambda::{Code, Function, FunctionProps, Permission, Runtime};
use crate::aws::AssetRoot;
use crate::error::{Error, Result};
use crate::template::intrinsic::{account_id, get_att};
use crate::template::{Arn, Resource, Scope, Stack};

pub const DEFAULT_SQL_VERSION: &str = "2016-03-23";

/// Prefix of every health row key.
pub const HEALTH_KEY_PREFIX: &str = "DeviceHealth";

/// Historical rows expire after this long by default.
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Default interval of the scheduled check.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct DeviceHealthProps {
    pub input_topic: Option<String>,
    pub sql_version: Option<String>,
    pub table: Table,
    pub expiration: Option<Duration>,
}

/// Handle to the health rules.
#[derive(Debug, Clone)]
pub struct DeviceHealth {
    pub rules_role: Role,
    pub republish_rule_name: String,
    pub update_latest_rule_name: String,
    pub update_index_rule_name: String,
    table: Table,
    scope: Scope,
}

impl DeviceHealth {
    pub fn new(stack: &mut Stack, scope: &Scope, props: DeviceHealthProps) -> Result<Self> {
        let prefix = scope.logical_id();
        let republish_rule_name = format!("{}RuleFanOut", prefix);
        let update_latest_rule_name = format!("{}RuleLatest", prefix);
        let update_index_rule_name = format!("{}RuleIndex", prefix);
        let input_topic = props.input_topic.unwrap_or_else(|| EVENTS_OUTPUT_TOPIC.to_string());
        let error_topic = format!("{}/error", input_topic);
        let sql_version = props.sql_version.unwrap_or_else(|| DEFAULT_SQL_VERSION.to_string());
        let downstream = [&update_latest_rule_name, &update_index_rule_name];

        let rules_role = Role::new(
            stack,
            &scope.child("Role"),
            RoleProps::assumed_by(Principal::service("iot.amazonaws.com")).inline_policy(
                "RepublishAndIndex",
                PolicyDocument::new([
                    PolicyStatement::allow().action("iot:Publish").resources(
                        std::iter::once(topic_arn(&error_topic)).chain(
                            downstream
                                .iter()
                                .map(|rule| topic_arn(&format!("$aws/rules/{}", rule))),
                        ),
                    ),
                    PolicyStatement::allow()
                        .action("dynamodb:PutItem")
                        .resource(props.table.arn.clone()),
                ]),
            ),
        )?;

        let error_action = json!({
            "Republish": {"RoleArn": rules_role.arn, "Topic": error_topic},
        });
        let put_item = json!([{
            "DynamoDBv2": {
                "PutItem": {"TableName": props.table.name},
                "RoleArn": rules_role.arn,
            }
        }]);
        let rule = |name: &str, sql: String, actions: Value| {
            Resource::new("AWS::IoT::TopicRule")
                .property("RuleName", name)
                .property(
                    "TopicRulePayload",
                    json!({
                        "Actions": actions,
                        "AwsIotSqlVersion": sql_version,
                        "ErrorAction": error_action,
                        "RuleDisabled": false,
                        "Sql": sql,
                    }),
                )
        };

        let republish: Vec<Value> = downstream
            .iter()
            .map(|name| {
                json!({"Republish": {
                    "Qos": 1,
                    "RoleArn": rules_role.arn,
                    "Topic": format!("$$aws/rules/{}", name),
                }})
            })
            .collect();
        stack.declare(
            &scope.child("RuleFanOut"),
            rule(
                republish_rule_name.as_str(),
                format!(
                    "SELECT *, timestamp as createTime, timestamp as updateTime FROM '{}' WHERE name = \"health_end\"",
                    input_topic
                ),
                Value::Array(republish),
            ),
        )?;

        stack.declare(
            &scope.child("RuleLatest"),
            rule(
                update_latest_rule_name.as_str(),
                format!(
                    "SELECT *, \"{}:\" + accountid() + \":latest\" as PK, thing_name as SK",
                    HEALTH_KEY_PREFIX
                ),
                put_item.clone(),
            ),
        )?;

        let expiration = props.expiration.unwrap_or(DEFAULT_EXPIRATION);
        stack.declare(
            &scope.child("RuleIndex"),
            rule(
                update_index_rule_name.as_str(),
                format!(
                    "SELECT *, \"{}:\" + accountid() + \":\" + thing_name as PK, cast(timestamp as String) as SK, timestamp + {} as expiresIn",
                    HEALTH_KEY_PREFIX,
                    expiration.as_secs()
                ),
                put_item,
            ),
        )?;

        tracing::info!("Declared health rules on {}", input_topic);
        Ok(Self {
            rules_role,
            republish_rule_name,
            update_latest_rule_name,
            update_index_rule_name,
            table: props.table,
            scope: scope.clone(),
        })
    }

    /// Declares the periodic timeout check, invoked every `interval`.
    pub fn add_scheduled_check(&self, stack: &mut Stack, id: &str, interval: Duration) -> Result<Function> {
        let minutes = interval.as_secs() / 60;
        if minutes == 0 || interval.as_secs() % 60 != 0 {
            return Err(Error::validation(
                self.scope.child(id).path(),
                format!("check interval must be whole minutes, got {}s", interval.as_secs()),
            ));
        }

        let package = stack.asset_root()?.asset(AssetRoot::CHECK_HEALTH_HANDLER)?;
        let function = Function::new(
            stack,
            &self.scope.child(format!("{}Function", id)),
            FunctionProps::new(Code::Asset(package))
                .runtime(Runtime::Python312)
                .handler("index.handler")
                .timeout(Duration::from_secs(60))
                .env("ACCOUNT_ID", account_id())
                .env("RATE_IN_SECONDS", interval.as_secs().to_string())
                .env("TABLE_NAME", self.table.name.clone()),
        )?;
        function.add_to_role_policy(
            stack,
            PolicyStatement::allow()
                .actions(["dynamodb:Query", "dynamodb:PutItem"])
                .resource(self.table.arn.clone()),
        )?;

        let schedule = Resource::new("AWS::Events::Rule")
            .property("ScheduleExpression", rate_expression(minutes))
            .property("State", "ENABLED")
            .property("Targets", json!([{"Arn": function.arn(), "Id": "Target0"}]));
        let rule_id = stack.declare(&self.scope.child(format!("{}Schedule", id)), schedule)?;
        function.add_permission(
            stack,
            "SchedulePermission",
            Permission::invoke("events.amazonaws.com").source_arn(get_att(&rule_id, "Arn")),
        )?;

        tracing::debug!("Health check every {} minutes", minutes);
        Ok(function)
    }
}

fn topic_arn(name: &str) -> Value {
    Arn::new("iot", "topic").resource_name(name).build()
}

fn rate_expression(minutes: u64) -> String {
    if minutes == 1 {
        "rate(1 minute)".to_string()
    } else {
        format!("rate({} minutes)", minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixture_stack;

    fn health(stack: &mut Stack) -> DeviceHealth {
        DeviceHealth::new(
            stack,
            &Scope::new("DeviceHealth"),
            DeviceHealthProps {
                input_topic: None,
                sql_version: None,
                table: Table::from_attributes("PitsResources", None, vec![]),
                expiration: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_three_rules_share_error_action() {
        let mut stack = Stack::new("Test");
        let health = health(&mut stack);

        assert_eq!(health.republish_rule_name, "DeviceHealthRuleFanOut");
        let rules: Vec<_> = stack.resources_of_type("AWS::IoT::TopicRule").collect();
        assert_eq!(rules.len(), 3);
        for (_, rule) in &rules {
            let payload = &rule.properties["TopicRulePayload"];
            assert_eq!(payload["AwsIotSqlVersion"], "2016-03-23");
            assert_eq!(payload["ErrorAction"]["Republish"]["Topic"], "pinthesky/events/output/error");
        }

        let fan_out = &stack.resource("DeviceHealthRuleFanOut").unwrap().properties["TopicRulePayload"];
        assert_eq!(
            fan_out["Sql"],
            "SELECT *, timestamp as createTime, timestamp as updateTime FROM 'pinthesky/events/output' WHERE name = \"health_end\""
        );
        assert_eq!(fan_out["Actions"][0]["Republish"]["Topic"], "$$aws/rules/DeviceHealthRuleLatest");
        assert_eq!(fan_out["Actions"][1]["Republish"]["Topic"], "$$aws/rules/DeviceHealthRuleIndex");
        stack.validate().unwrap();
    }

    #[test]
    fn test_latest_and_index_keys() {
        let mut stack = Stack::new("Test");
        health(&mut stack);

        let latest = &stack.resource("DeviceHealthRuleLatest").unwrap().properties["TopicRulePayload"];
        assert_eq!(
            latest["Sql"],
            "SELECT *, \"DeviceHealth:\" + accountid() + \":latest\" as PK, thing_name as SK"
        );
        assert_eq!(latest["Actions"][0]["DynamoDBv2"]["PutItem"]["TableName"], "PitsResources");

        let index = &stack.resource("DeviceHealthRuleIndex").unwrap().properties["TopicRulePayload"];
        let sql = index["Sql"].as_str().unwrap();
        assert!(sql.contains("cast(timestamp as String) as SK"));
        assert!(sql.ends_with("timestamp + 2592000 as expiresIn"));
    }

    #[test]
    fn test_role_scoped_to_topics() {
        let mut stack = Stack::new("Test");
        health(&mut stack);

        let role = stack.resource("DeviceHealthRole").unwrap();
        let document = &role.properties["Policies"][0];
        assert_eq!(document["PolicyName"], "RepublishAndIndex");
        let publish = &document["PolicyDocument"]["Statement"][0];
        assert_eq!(publish["Resource"].as_array().unwrap().len(), 3);
        let rendered = serde_json::to_string(publish).unwrap();
        assert!(rendered.contains(":topic/$aws/rules/DeviceHealthRuleIndex"));
        assert!(rendered.contains(":topic/pinthesky/events/output/error"));
    }

    #[test]
    fn test_scheduled_check() {
        let (mut stack, _assets) = fixture_stack("Test");
        let health = health(&mut stack);
        let function = health
            .add_scheduled_check(&mut stack, "Check", DEFAULT_CHECK_INTERVAL)
            .unwrap();

        let resource = stack.resource(&function.logical_id).unwrap();
        assert_eq!(resource.properties["Runtime"], "python3.12");
        let env = &resource.properties["Environment"]["Variables"];
        assert_eq!(env["RATE_IN_SECONDS"], "300");
        assert_eq!(env["TABLE_NAME"], "PitsResources");

        let schedule = stack.resource("DeviceHealthCheckSchedule").unwrap();
        assert_eq!(schedule.properties["ScheduleExpression"], "rate(5 minutes)");
        assert!(stack.contains("DeviceHealthCheckFunctionSchedulePermission"));
        stack.validate().unwrap();
    }

    #[test]
    fn test_scheduled_check_rejects_partial_minutes() {
        let (mut stack, _assets) = fixture_stack("Test");
        let health = health(&mut stack);
        let err = health
            .add_scheduled_check(&mut stack, "Check", Duration::from_secs(90))
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert_eq!(rate_expression(1), "rate(1 minute)");
    }
}
