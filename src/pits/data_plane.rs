//! Realtime data plane.
//!
//! Consoles hold a WebSocket open to receive device events as they happen.
//! Connecting requires a user pool token, checked by a request authorizer
//! before the socket function sees the connection.

use std::time::Duration;

use serde_json::{json, Value};

use super::endpoint::IotEndpoint;
use super::resource_api::INDEX_NAME;
use crate::aws::apigw::{self, Api, DomainProps, Protocol, RouteAuthorization};
use crate::aws::dynamodb::Table;
use crate::aws::iam::{ManagedPolicy, PolicyDocument, PolicyStatement, Principal, Role, RoleProps};
use crate::aws::lambda::{Code, Function, FunctionProps, Permission, Runtime};
use crate::aws::AssetRoot;
use crate::error::Result;
use crate::template::intrinsic::{account_id, concat, partition, reference, region};
use crate::template::{Arn, Scope, Stack};

pub const DEFAULT_API_NAME: &str = "pits-data";

/// Routes served by the socket function.
pub const ROUTES: [&str; 4] = ["$connect", "$disconnect", "$default", "invoke"];

/// User pool the connect authorizer validates tokens against.
#[derive(Debug, Clone, PartialEq)]
pub struct DataAuthorization {
    pub user_pool_id: Value,
    pub client_id: Value,
}

#[derive(Debug, Clone)]
pub struct DataPlaneProps {
    pub name: Option<String>,
    pub table: Table,
    pub authorization: DataAuthorization,
    /// Role names that may push messages to open connections
    pub allowed_management_roles: Vec<String>,
    /// Resolved data endpoint; looked up in this stack when absent
    pub data_endpoint: Option<Value>,
}

/// Handle to the WebSocket API.
#[derive(Debug, Clone)]
pub struct DataPlane {
    pub api: Api,
    pub socket_function: Function,
    pub authorizer_function: Function,
    pub connection_policy: ManagedPolicy,
    pub stage_id: String,
    scope: Scope,
}

impl DataPlane {
    pub fn new(stack: &mut Stack, scope: &Scope, props: DataPlaneProps) -> Result<Self> {
        let data_endpoint = match props.data_endpoint {
            Some(address) => address,
            None => IotEndpoint::data(stack, scope)?.address,
        };
        let package = stack.asset_root()?.asset(AssetRoot::API_PACKAGE)?;
        let common = FunctionProps::new(Code::Asset(package))
            .runtime(Runtime::Python39)
            .memory_size(512)
            .timeout(Duration::from_secs(30))
            .env("ACCOUNT_ID", account_id())
            .env("DATA_ENDPOINT", data_endpoint)
            .env("INDEX_NAME_1", INDEX_NAME)
            .env("TABLE_NAME", props.table.name.clone());

        let socket_function = Function::new(
            stack,
            &scope.child("SocketFunction"),
            common.clone().handler("pinthesky.resource.api"),
        )?;
        let authorizer_function = Function::new(
            stack,
            &scope.child("AuthorizerFunction"),
            common
                .handler("pinthesky.auth.user_jwt")
                .env("USER_CLIENT_ID", props.authorization.client_id.clone())
                .env("USER_POOL_ID", props.authorization.user_pool_id.clone()),
        )?;

        socket_function.add_to_role_policy(
            stack,
            PolicyStatement::allow()
                .actions([
                    "dynamodb:GetItem",
                    "dynamodb:PutItem",
                    "dynamodb:DeleteItem",
                    "dynamodb:Query",
                ])
                .resource(props.table.arn.clone()),
        )?;
        socket_function.add_to_role_policy(
            stack,
            PolicyStatement::allow().action("iot:Publish").resource("*"),
        )?;

        let name = props.name.unwrap_or_else(|| DEFAULT_API_NAME.to_string());
        let api = Api::new(
            stack,
            scope,
            "WebsocketApi",
            &name,
            Protocol::WebSocket,
            "$request.body.action",
            None,
        )?;

        let roles: Vec<Value> = std::iter::once(socket_function.role.name.clone())
            .chain(props.allowed_management_roles.iter().map(|role| Value::from(role.as_str())))
            .collect();
        let connection_policy = ManagedPolicy::new(
            stack,
            &scope.child("ConnectionPolicy"),
            None,
            PolicyDocument::new([connection_statement(&api)]),
            roles,
        )?;

        let credentials_role = Role::new(
            stack,
            &scope.child("CredentialsRole"),
            RoleProps::assumed_by(Principal::service("apigateway.amazonaws.com")).inline_policy(
                "execution",
                PolicyDocument::new([
                    PolicyStatement::allow()
                        .actions(["logs:CreateLogGroup", "logs:CreateLogStream", "logs:PutLogEvents"])
                        .resource("*"),
                    PolicyStatement::allow().action("lambda:InvokeFunction").resource("*"),
                ]),
            ),
        )?;

        let mut routes = Vec::with_capacity(ROUTES.len());
        for route_key in ROUTES {
            let id = route_key.trim_start_matches('$');
            let integration = api.add_integration(
                stack,
                &format!("{}Integration", id),
                json!({
                    "CredentialsArn": credentials_role.arn,
                    "IntegrationMethod": "POST",
                    "IntegrationUri": invocation_uri(&socket_function),
                }),
            )?;

            let authorization = if route_key == "$connect" {
                let authorizer = api.add_authorizer(
                    stack,
                    &format!("{}Authorizer", id),
                    json!({
                        "AuthorizerCredentialsArn": credentials_role.arn,
                        "AuthorizerType": "REQUEST",
                        "AuthorizerUri": invocation_uri(&authorizer_function),
                        "IdentitySource": ["route.request.header.Authorization"],
                        "Name": format!("{}-auth", name),
                    }),
                )?;
                RouteAuthorization::Custom { authorizer_id: authorizer }
            } else {
                RouteAuthorization::None
            };

            routes.push(api.add_route(
                stack,
                &format!("{}Route", id),
                route_key,
                &integration,
                authorization,
            )?);
        }
        let stage_id = api.add_default_stage(stack, "DeploymentStage", &routes)?;

        for function in [&authorizer_function, &socket_function] {
            function.add_permission(
                stack,
                "SocketPermission",
                Permission::invoke("apigateway.amazonaws.com").source_arn(api.execute_arn("*/*")),
            )?;
        }

        tracing::info!("Declared data plane {} with {} routes", name, routes.len());
        Ok(Self {
            api,
            socket_function,
            authorizer_function,
            connection_policy,
            stage_id,
            scope: scope.clone(),
        })
    }

    /// Statement allowing a principal to push to open connections.
    pub fn connection_policy_statement(&self) -> PolicyStatement {
        connection_statement(&self.api)
    }

    /// Serves the socket under a custom domain.
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

fn connection_statement(api: &Api) -> PolicyStatement {
    PolicyStatement::allow()
        .actions(["execute-api:Invoke", "execute-api:ManageConnections"])
        .resource(Arn::new("execute-api", api.api_id()).resource_name("*").build())
}

/// Lambda invocation URI used by WebSocket integrations and authorizers.
fn invocation_uri(function: &Function) -> Value {
    concat(vec![
        Value::from("arn:"),
        partition(),
        Value::from(":apigateway:"),
        region(),
        Value::from(":lambda:path/2015-03-31/functions/"),
        function.arn(),
        Value::from("/invocations"),
    ])
}
