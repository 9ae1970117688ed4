//! API Gateway v2 APIs (HTTP and WebSocket) and custom domains.

use std::time::Duration;

use serde_json::{json, Value};

use super::route53::{cname_record, Certificate, HostedZone};
use crate::error::Result;
use crate::template::intrinsic::{concat, get_att, reference};
use crate::template::{Arn, Resource, Scope, Stack};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    WebSocket,
}

impl Protocol {
    fn as_str(self) -> &'static str {
        match self {
            Protocol::Http => "HTTP",
            Protocol::WebSocket => "WEBSOCKET",
        }
    }
}

/// Cross-origin settings of an HTTP API.
#[derive(Debug, Clone, PartialEq)]
pub struct Cors {
    pub allow_credentials: bool,
    pub allow_headers: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_origins: Vec<String>,
}

/// How a route is authorized.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteAuthorization {
    None,
    Jwt { authorizer_id: String, scopes: Vec<String> },
    Custom { authorizer_id: String },
}

/// Handle to a declared `AWS::ApiGatewayV2::Api`.
#[derive(Debug, Clone, PartialEq)]
pub struct Api {
    pub logical_id: String,
    scope: Scope,
}

impl Api {
    /// Declares the API at `<scope><id>`; its integrations, routes and
    /// stages are declared under `scope`.
    pub fn new(
        stack: &mut Stack,
        scope: &Scope,
        id: &str,
        name: &str,
        protocol: Protocol,
        route_selection_expression: &str,
        cors: Option<Cors>,
    ) -> Result<Self> {
        let mut resource = Resource::new("AWS::ApiGatewayV2::Api")
            .property("Name", name)
            .property("ProtocolType", protocol.as_str())
            .property("RouteSelectionExpression", route_selection_expression);
        if let Some(cors) = cors {
            resource.set(
                "CorsConfiguration",
                json!({
                    "AllowCredentials": cors.allow_credentials,
                    "AllowHeaders": cors.allow_headers,
                    "AllowMethods": cors.allow_methods,
                    "AllowOrigins": cors.allow_origins,
                }),
            );
        }

        let logical_id = stack.declare(&scope.child(id), resource)?;
        Ok(Self {
            logical_id,
            scope: scope.clone(),
        })
    }

    pub fn api_id(&self) -> Value {
        reference(&self.logical_id)
    }

    /// `execute-api` ARN for `resource_name` below this API, e.g. `*/*`.
    pub fn execute_arn(&self, resource_name: &str) -> Value {
        Arn::new("execute-api", self.api_id())
            .resource_name(resource_name)
            .build()
    }

    /// Declares an `AWS_PROXY` integration and returns its logical id.
    pub fn add_integration(&self, stack: &mut Stack, id: &str, properties: Value) -> Result<String> {
        let resource = Resource::new("AWS::ApiGatewayV2::Integration")
            .property("ApiId", self.api_id())
            .property("IntegrationType", "AWS_PROXY")
            .properties(properties);
        stack.declare(&self.scope.child(id), resource)
    }

    /// Declares a route targeting an integration.
    pub fn add_route(
        &self,
        stack: &mut Stack,
        id: &str,
        route_key: &str,
        integration_id: &str,
        authorization: RouteAuthorization,
    ) -> Result<String> {
        let mut resource = Resource::new("AWS::ApiGatewayV2::Route")
            .property("ApiId", self.api_id())
            .property("RouteKey", route_key)
            .property(
                "Target",
                concat(vec![Value::from("integrations/"), reference(integration_id)]),
            );

        match authorization {
            RouteAuthorization::None => {}
            RouteAuthorization::Jwt { authorizer_id, scopes } => {
                resource.set("AuthorizationType", "JWT");
                resource.set("AuthorizerId", reference(authorizer_id));
                if !scopes.is_empty() {
                    resource.set("AuthorizationScopes", scopes);
                }
            }
            RouteAuthorization::Custom { authorizer_id } => {
                resource.set("AuthorizationType", "CUSTOM");
                resource.set("AuthorizerId", reference(authorizer_id));
            }
        }

        stack.declare(&self.scope.child(id), resource)
    }

    pub fn add_authorizer(&self, stack: &mut Stack, id: &str, properties: Value) -> Result<String> {
        let resource = Resource::new("AWS::ApiGatewayV2::Authorizer")
            .property("ApiId", self.api_id())
            .properties(properties);
        stack.declare(&self.scope.child(id), resource)
    }

    /// Declares the auto-deployed `$default` stage after every given route.
    pub fn add_default_stage(&self, stack: &mut Stack, id: &str, routes: &[String]) -> Result<String> {
        let mut resource = Resource::new("AWS::ApiGatewayV2::Stage")
            .property("ApiId", self.api_id())
            .property("AutoDeploy", true)
            .property("StageName", "$default");
        for route in routes {
            resource = resource.depends_on(route.clone());
        }
        stack.declare(&self.scope.child(id), resource)
    }
}

/// Custom domain for an API stage.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainProps {
    pub certificate: Certificate,
    pub hosted_zone: HostedZone,
    pub domain_name: String,
}

/// Binds `domain_name` to an API stage.
///
/// Declares `<id>Name` (regional, TLS 1.2), `<id>Mapping` after the domain
/// exists, and `<id>CnameRecord` pointing at the regional domain name.
pub fn add_domain(
    stack: &mut Stack,
    scope: &Scope,
    id: &str,
    api_id: Value,
    stage: Value,
    props: &DomainProps,
) -> Result<String> {
    let domain = Resource::new("AWS::ApiGatewayV2::DomainName")
        .property("DomainName", props.domain_name.clone())
        .property(
            "DomainNameConfigurations",
            json!([{
                "CertificateArn": props.certificate.arn,
                "EndpointType": "REGIONAL",
                "SecurityPolicy": "TLS_1_2",
            }]),
        );
    let domain_id = stack.declare(&scope.child(format!("{}Name", id)), domain)?;

    let mapping = Resource::new("AWS::ApiGatewayV2::ApiMapping")
        .property("ApiId", api_id)
        .property("DomainName", props.domain_name.clone())
        .property("Stage", stage)
        .depends_on(domain_id.clone());
    stack.declare(&scope.child(format!("{}Mapping", id)), mapping)?;

    cname_record(
        stack,
        &scope.child(format!("{}CnameRecord", id)),
        &props.hosted_zone,
        &props.domain_name,
        get_att(&domain_id, "RegionalDomainName"),
        Duration::from_secs(300),
    )?;
    Ok(domain_id)
}
