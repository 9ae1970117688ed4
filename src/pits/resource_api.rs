//! Resource API.
//!
//! One function behind an HTTP API serves the console: device metadata,
//! shadows, jobs, videos and captures. Its table doubles as the store for
//! device health rows and notification subscriptions.
//!
//! ## Table keys
//!
//! - `PK` / `SK` strings, `expiresIn` time-to-live
//! - `GS1` index on `GS1-PK` / `createTime`

use std::time::Duration;

use serde_json::{json, Value};

use super::endpoint::IotEndpoint;
use super::storage::{Storage, StorageCapability};
use crate::aws::apigw::{self, Api, Cors, DomainProps, Protocol, RouteAuthorization};
use crate::aws::dynamodb::{Attribute, GlobalSecondaryIndex, StreamViewType, Table, TableProps};
use crate::aws::iam::PolicyStatement;
use crate::aws::lambda::{Code, Function, FunctionProps, Permission, Runtime, StartingPosition, StreamEventSource};
use crate::aws::sns::Topic;
use crate::aws::AssetRoot;
use crate::error::{Error, Result};
use crate::template::intrinsic::{account_id, reference};
use crate::template::{Scope, Stack};

pub const DEFAULT_API_NAME: &str = "pits-api";
pub const TABLE_NAME: &str = "PitsResources";
pub const TOPIC_NAME: &str = "PitsNotifications";
pub const INDEX_NAME: &str = "GS1";
/// Attribute holding the expiry timestamp of a row.
pub const TIME_TO_LIVE_ATTRIBUTE: &str = "expiresIn";

/// Days an indexed video row lives.
const INDEX_EXPIRE_DAYS: u32 = 180;

/// JWT validation for every route.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiAuthorization {
    pub issuer: Value,
    pub audience: Vec<Value>,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ResourceApiProps {
    pub api_name: Option<String>,
    /// Declare `PitsResources` when absent
    pub table: Option<Table>,
    /// Declare `PitsNotifications` when absent
    pub topic: Option<Topic>,
    pub storage: Storage,
    pub enable_development_origin: bool,
    pub console_origin: Option<String>,
    pub authorization: Option<ApiAuthorization>,
    /// Resolved data endpoint; looked up in this stack when absent
    pub data_endpoint: Option<Value>,
}

/// Handle to the resource API and its backing resources.
#[derive(Debug, Clone)]
pub struct ResourceApi {
    pub table: Table,
    pub topic: Topic,
    pub storage: Storage,
    pub function: Function,
    pub api: Api,
    pub stage_id: String,
    pub authorizer_id: Option<String>,
    scope: Scope,
}

impl ResourceApi {
    pub fn new(stack: &mut Stack, scope: &Scope, props: ResourceApiProps) -> Result<Self> {
        let table = match props.table {
            Some(table) => table,
            None => Table::new(stack, &scope.child("Table"), Self::table_props())?,
        };
        let topic = match props.topic {
            Some(topic) => topic,
            None => Topic::new(stack, &scope.child("PitsNotifications"), TOPIC_NAME, "Pi In The Sky")?,
        };
        let data_endpoint = match props.data_endpoint {
            Some(address) => address,
            None => IotEndpoint::data(stack, scope)?.address,
        };

        let storage = props.storage;
        let package = stack.asset_root()?.asset(AssetRoot::API_PACKAGE)?;
        let function = Function::new(
            stack,
            &scope.child("Function"),
            FunctionProps::new(Code::Asset(package))
                .runtime(Runtime::Python39)
                .handler("pinthesky.resource.api")
                .memory_size(512)
                .timeout(Duration::from_secs(60))
                .env("BUCKET_NAME", storage.bucket_name())
                .env("DATA_ENDPOINT", data_endpoint)
                .env("IMAGE_PREFIX", storage.paths().capture.clone())
                .env("INDEX_NAME_1", INDEX_NAME)
                .env("TABLE_NAME", table.name.clone())
                .env("TOPIC_ARN", topic.arn.clone())
                .env("VIDEO_PREFIX", storage.paths().converted.clone()),
        )?;

        function.add_to_role_policy(
            stack,
            PolicyStatement::allow()
                .actions([
                    "dynamodb:GetItem",
                    "dynamodb:PutItem",
                    "dynamodb:DeleteItem",
                    "dynamodb:UpdateItem",
                    "dynamodb:BatchWriteItem",
                    "dynamodb:BatchGetItem",
                    "dynamodb:Query",
                ])
                .resource(table.arn.clone()),
        )?;
        for index_name in &table.index_names {
            function.add_to_role_policy(
                stack,
                PolicyStatement::allow()
                    .action("dynamodb:Query")
                    .resource(table.index_arn(index_name)),
            )?;
        }
        function.add_to_role_policy(
            stack,
            PolicyStatement::allow()
                .action("s3:Get*")
                .resources([storage.capture_objects_arn(), storage.converted_objects_arn()]),
        )?;
        function.add_to_role_policy(
            stack,
            PolicyStatement::allow().action("sns:Subscribe").resource(topic.arn.clone()),
        )?;
        function.add_to_role_policy(
            stack,
            PolicyStatement::allow().action("s3:ListBucket").resource(storage.bucket_arn()),
        )?;
        function.add_to_role_policy(
            stack,
            PolicyStatement::allow()
                .actions([
                    "iot:DescribeThing",
                    "iot:ListThingGroups",
                    "iot:ListThingsInThingGroup",
                    "iot:GetThingShadow",
                    "iot:UpdateThingShadow",
                    "iot:Publish",
                    "iot:CreateJob",
                    "iot:UpdateJob",
                    "iot:CancelJob",
                    "iot:CancelJobExecution",
                    "iot:DeleteJob",
                    "iot:ListJobExecutionsForJob",
                    "iot:DescribeJob",
                    "iot:DescribeJobExecution",
                    "sns:GetSubscriptionAttributes",
                    "sns:SetSubscriptionAttributes",
                    "sns:Unsubscribe",
                ])
                .resource("*"),
        )?;

        let allow_origins: Vec<String> = props
            .enable_development_origin
            .then(|| super::auth::DEVELOPMENT_ORIGIN.to_string())
            .into_iter()
            .chain(props.console_origin.clone())
            .collect();
        let api_name = props.api_name.unwrap_or_else(|| DEFAULT_API_NAME.to_string());
        let api = Api::new(
            stack,
            scope,
            "HttpApi",
            &api_name,
            Protocol::Http,
            "$request.method $request.path",
            Some(Cors {
                allow_credentials: true,
                allow_headers: ["Content-Type", "Content-Length", "Accept", "Authorization"]
                    .map(String::from)
                    .to_vec(),
                allow_methods: ["PUT", "POST", "GET", "OPTIONS", "DELETE"].map(String::from).to_vec(),
                allow_origins,
            }),
        )?;

        let integration = api.add_integration(
            stack,
            "FunctionIntegration",
            json!({
                "ConnectionType": "INTERNET",
                "IntegrationMethod": "POST",
                "IntegrationUri": function.arn(),
                "PayloadFormatVersion": "2.0",
                "TimeoutInMillis": 30000,
            }),
        )?;

        let mut authorizer_id = None;
        let default_authorization = match &props.authorization {
            Some(authorization) => {
                api.add_route(
                    stack,
                    "UnauthorizedRoute",
                    "OPTIONS /{proxy+}",
                    &integration,
                    RouteAuthorization::None,
                )?;
                let authorizer = api.add_authorizer(
                    stack,
                    "Authorization",
                    json!({
                        "AuthorizerType": "JWT",
                        "IdentitySource": ["$request.header.Authorization"],
                        "JwtConfiguration": {
                            "Audience": authorization.audience,
                            "Issuer": authorization.issuer,
                        },
                        "Name": format!("{}-auth", api_name),
                    }),
                )?;
                authorizer_id = Some(authorizer.clone());
                RouteAuthorization::Jwt {
                    authorizer_id: authorizer,
                    scopes: authorization.scopes.clone(),
                }
            }
            None => {
                tracing::warn!("Resource API {} has no authorizer; every route is public", api_name);
                RouteAuthorization::None
            }
        };

        let route = api.add_route(stack, "DefaultRoute", "$default", &integration, default_authorization)?;
        let stage_id = api.add_default_stage(stack, "DeploymentStage", &[route])?;

        function.add_permission(
            stack,
            "api-invoke",
            Permission::invoke("apigateway.amazonaws.com").source_arn(api.execute_arn("*/*")),
        )?;

        tracing::info!("Declared resource API {}", api_name);
        Ok(Self {
            table,
            topic,
            storage,
            function,
            api,
            stage_id,
            authorizer_id,
            scope: scope.clone(),
        })
    }

    /// `PitsResources`: provisioned 1/1, streamed, with the `GS1` index.
    pub fn table_props() -> TableProps {
        TableProps {
            table_name: Some(TABLE_NAME.to_string()),
            sort_key: Some(Attribute::string("SK")),
            read_capacity: 1,
            write_capacity: 1,
            time_to_live_attribute: Some(TIME_TO_LIVE_ATTRIBUTE.to_string()),
            stream: Some(StreamViewType::NewAndOldImages),
            global_secondary_indexes: vec![GlobalSecondaryIndex {
                index_name: INDEX_NAME.to_string(),
                partition_key: Attribute::string(format!("{}-PK", INDEX_NAME)),
                sort_key: Some(Attribute::number("createTime")),
                read_capacity: 1,
                write_capacity: 1,
            }],
            ..TableProps::new(Attribute::string("PK"))
        }
    }

    /// Indexes converted videos and republishes table changes as alerts.
    ///
    /// Declares `<id>IndexFunction`, fed by object-created events under the
    /// converted prefix, and `<id>AlertFunction`, fed by the table stream.
    pub fn add_notification(&self, stack: &mut Stack, id: &str, base_url: &str) -> Result<(Function, Function)> {
        let stream_arn = self.table.stream_arn.clone().ok_or_else(|| {
            Error::validation(self.scope.path(), "notifications need a table with a change stream")
        })?;

        let index_package = stack.asset_root()?.asset(AssetRoot::INDEX_CONVERSION_HANDLER)?;
        let index_function = Function::new(
            stack,
            &self.scope.child(format!("{}IndexFunction", id)),
            handler_props(Code::Asset(index_package))
                .env("ACCOUNT_ID", account_id())
                .env("EXPIRE_DAYS", INDEX_EXPIRE_DAYS.to_string())
                .env("TABLE_NAME", self.table.name.clone()),
        )?;
        index_function.add_to_role_policy(
            stack,
            PolicyStatement::allow().action("dynamodb:PutItem").resource(self.table.arn.clone()),
        )?;
        index_function.add_to_role_policy(
            stack,
            PolicyStatement::allow()
                .action("s3:Get*")
                .resource(self.storage.converted_objects_arn()),
        )?;
        self.storage.bucket().add_object_created_notification(
            stack,
            &index_function,
            &format!("{}/", self.storage.paths().converted),
        )?;

        let alert_package = stack.asset_root()?.asset(AssetRoot::PUBLISH_MOTION_HANDLER)?;
        let alert_function = Function::new(
            stack,
            &self.scope.child(format!("{}AlertFunction", id)),
            handler_props(Code::Asset(alert_package))
                .env("ACCOUNT_ID", account_id())
                .env("BASE_URL", base_url)
                .env("TABLE_NAME", self.table.name.clone())
                .env("TOPIC_ARN", self.topic.arn.clone()),
        )?;
        alert_function.add_to_role_policy(
            stack,
            PolicyStatement::allow().action("sns:Publish").resource(self.topic.arn.clone()),
        )?;
        alert_function.add_to_role_policy(
            stack,
            PolicyStatement::allow()
                .actions(["dynamodb:GetItem", "dynamodb:Query"])
                .resource(self.table.arn.clone()),
        )?;
        alert_function.add_event_source(
            stack,
            StreamEventSource {
                stream_arn,
                starting_position: StartingPosition::Latest,
                batch_size: 10,
                retry_attempts: Some(10),
                enabled: true,
            },
        )?;

        Ok((index_function, alert_function))
    }

    /// Serves the API under a custom domain.
    pub fn add_domain(&self, stack: &mut Stack, id: &str, props: &DomainProps) -> Result<String> {
        apigw::add_domain(
            stack,
            &self.scope,
            id,
            self.api.api_id(),
            reference(&self.stage_id),
            props,
        )
    }
}

fn handler_props(code: Code) -> FunctionProps {
    FunctionProps::new(code)
        .runtime(Runtime::Python312)
        .handler("index.handler")
        .memory_size(512)
        .timeout(Duration::from_secs(60))
}
