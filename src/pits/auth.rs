//! Console user directory.
//!
//! ## Features
//!
//! - Invitation-only user pool with optional OTP second factor
//! - One OAuth client for the console, code and implicit grants
//! - Custom sign-in domain behind the shared certificate
//! - Optional identity pool mapping signed-in users to an IAM role

use std::time::Duration;

use serde_json::{json, Value};

use crate::aws::iam::{ManagedPolicy, PolicyDocument, PolicyStatement, Principal, Role, RoleProps};
use crate::aws::route53::{a_record, cname_record, Certificate, HostedZone, DEFAULT_TTL};
use crate::error::Result;
use crate::template::intrinsic::{concat, get_att, reference};
use crate::template::{RemovalPolicy, Resource, Scope, Stack};

pub const DEFAULT_POOL_NAME: &str = "pits-user-pool";

/// Origin of the console dev server.
pub const DEVELOPMENT_ORIGIN: &str = "http://localhost:3000";

/// Placeholder apex address; Cognito requires the parent domain to resolve.
pub const PLACEHOLDER_ADDRESS: &str = "198.51.100.1";

const COGNITO_IDENTITY: &str = "cognito-identity.amazonaws.com";

#[derive(Debug, Clone, Default)]
pub struct AuthorizationProps {
    pub pool_name: Option<String>,
    pub enable_development_origin: bool,
    pub custom_origin: Option<String>,
    pub identity_pool: Option<IdentityPoolProps>,
}

/// Federated identities for signed-in users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityPoolProps {
    pub identity_pool_name: String,
    pub role_name: Option<String>,
    pub policy_name: Option<String>,
}

/// Custom sign-in domain.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthDomainProps {
    pub certificate: Certificate,
    pub hosted_zone: HostedZone,
    pub domain_name: String,
    /// Declare the placeholder apex record first
    pub create_a_record: bool,
}

/// Handle to the user pool and its default client.
#[derive(Debug, Clone, PartialEq)]
pub struct Authorization {
    pub user_pool_id: String,
    pub client_id: String,
    pub pool_name: String,
    pub identity_pool_id: Option<String>,
    scope: Scope,
}

impl Authorization {
    pub fn new(stack: &mut Stack, scope: &Scope, props: AuthorizationProps) -> Result<Self> {
        let pool_name = props.pool_name.clone().unwrap_or_else(|| DEFAULT_POOL_NAME.to_string());

        let pool = Resource::new("AWS::Cognito::UserPool")
            .property(
                "AccountRecoverySetting",
                json!({"RecoveryMechanisms": [{"Name": "verified_email", "Priority": 1}]}),
            )
            .property("AdminCreateUserConfig", json!({"AllowAdminCreateUserOnly": true}))
            .property("AliasAttributes", json!(["email"]))
            .property("AutoVerifiedAttributes", json!(["email"]))
            .property(
                "EmailConfiguration",
                json!({
                    "EmailSendingAccount": "COGNITO_DEFAULT",
                    "ReplyToEmailAddress": "noreply@verificationemail.com",
                }),
            )
            .property("EnabledMfas", json!(["SOFTWARE_TOKEN_MFA"]))
            .property("MfaConfiguration", "OPTIONAL")
            .property(
                "Policies",
                json!({"PasswordPolicy": {
                    "MinimumLength": 12,
                    "RequireLowercase": true,
                    "RequireNumbers": true,
                    "RequireSymbols": true,
                    "RequireUppercase": true,
                }}),
            )
            .property("UsernameConfiguration", json!({"CaseSensitive": false}))
            .property("UserPoolName", pool_name.clone())
            .removal_policy(RemovalPolicy::Retain);
        let user_pool_id = stack.declare(&scope.child("UserPool"), pool)?;

        let origins: Vec<String> = props
            .enable_development_origin
            .then(|| DEVELOPMENT_ORIGIN.to_string())
            .into_iter()
            .chain(props.custom_origin.clone())
            .map(|origin| origin.trim_end_matches('/').to_string())
            .collect();
        if origins.is_empty() {
            tracing::warn!("No redirect origins for {}; the console cannot complete a sign-in", pool_name);
        }

        let client = Resource::new("AWS::Cognito::UserPoolClient")
            .property("AccessTokenValidity", minutes(Duration::from_secs(24 * 60 * 60)))
            .property("AllowedOAuthFlows", json!(["implicit", "code"]))
            .property("AllowedOAuthFlowsUserPoolClient", true)
            .property("AllowedOAuthScopes", json!(["openid", "profile", "email"]))
            .property(
                "CallbackURLs",
                redirect_urls(&origins, "login"),
            )
            .property("ClientName", format!("{}-client", pool_name))
            .property("EnableTokenRevocation", true)
            .property(
                "ExplicitAuthFlows",
                json!(["ALLOW_USER_PASSWORD_AUTH", "ALLOW_USER_SRP_AUTH", "ALLOW_REFRESH_TOKEN_AUTH"]),
            )
            .property("GenerateSecret", true)
            .property("IdTokenValidity", minutes(Duration::from_secs(24 * 60 * 60)))
            .property("LogoutURLs", redirect_urls(&origins, "logout"))
            .property("ReadAttributes", json!(["email", "email_verified", "name"]))
            .property("RefreshTokenValidity", minutes(Duration::from_secs(365 * 24 * 60 * 60)))
            .property("SupportedIdentityProviders", json!(["COGNITO"]))
            .property(
                "TokenValidityUnits",
                json!({"AccessToken": "minutes", "IdToken": "minutes", "RefreshToken": "minutes"}),
            )
            .property("UserPoolId", reference(&user_pool_id))
            .property("WriteAttributes", json!(["email", "name"]));
        let client_id = stack.declare(&scope.child("UserPool").child("Client"), client)?;

        let mut authorization = Self {
            user_pool_id,
            client_id,
            pool_name,
            identity_pool_id: None,
            scope: scope.clone(),
        };
        if let Some(identity_pool) = &props.identity_pool {
            authorization.identity_pool_id = Some(authorization.add_identity_pool(stack, identity_pool)?);
        }

        tracing::info!("Declared user pool {}", authorization.pool_name);
        Ok(authorization)
    }

    pub fn user_pool_ref(&self) -> Value {
        reference(&self.user_pool_id)
    }

    pub fn client_ref(&self) -> Value {
        reference(&self.client_id)
    }

    pub fn user_pool_arn(&self) -> Value {
        get_att(&self.user_pool_id, "Arn")
    }

    pub fn provider_name(&self) -> Value {
        get_att(&self.user_pool_id, "ProviderName")
    }

    /// Token issuer URL validated by JWT authorizers.
    pub fn issuer(&self) -> Value {
        concat(vec![Value::from("https://"), get_att(&self.user_pool_id, "ProviderURL")])
    }

    /// Binds a custom sign-in domain and aliases it in the zone.
    ///
    /// Returns the logical id of the `AWS::Cognito::UserPoolDomain`.
    pub fn add_domain(&self, stack: &mut Stack, id: &str, props: &AuthDomainProps) -> Result<String> {
        let mut domain = Resource::new("AWS::Cognito::UserPoolDomain")
            .property("CustomDomainConfig", json!({"CertificateArn": props.certificate.arn}))
            .property("Domain", props.domain_name.clone())
            .property("UserPoolId", self.user_pool_ref());

        if props.create_a_record {
            let record = a_record(
                stack,
                &self.scope.child(format!("{}ARecord", id)),
                &props.hosted_zone,
                "",
                &[PLACEHOLDER_ADDRESS],
                DEFAULT_TTL,
            )?;
            domain = domain.depends_on(record);
        }

        let domain_id = stack.declare(&self.scope.child("UserPool").child(id), domain)?;
        cname_record(
            stack,
            &self.scope.child(format!("{}AuthAliasRecord", id)),
            &props.hosted_zone,
            &props.domain_name,
            get_att(&domain_id, "CloudFrontDistribution"),
            DEFAULT_TTL,
        )?;
        Ok(domain_id)
    }

    fn add_identity_pool(&self, stack: &mut Stack, props: &IdentityPoolProps) -> Result<String> {
        let pool = Resource::new("AWS::Cognito::IdentityPool")
            .property("AllowUnauthenticatedIdentities", false)
            .property(
                "CognitoIdentityProviders",
                json!([{"ClientId": self.client_ref(), "ProviderName": self.provider_name()}]),
            )
            .property("IdentityPoolName", props.identity_pool_name.clone());
        let pool_id = stack.declare(&self.scope.child("IdentityPool"), pool)?;

        let mut role_props = RoleProps::assumed_by(Principal::Federated {
            provider: COGNITO_IDENTITY.to_string(),
            conditions: json!({
                "ForAnyValue:StringLike": {format!("{}:amr", COGNITO_IDENTITY): "authenticated"},
                "StringEquals": {format!("{}:aud", COGNITO_IDENTITY): reference(&pool_id)},
            }),
            assume_action: "sts:AssumeRoleWithWebIdentity".to_string(),
        });
        if let Some(name) = &props.role_name {
            role_props = role_props.role_name(name.clone());
        }
        let role = Role::new(stack, &self.scope.child("AuthenticatedRole"), role_props)?;

        ManagedPolicy::new(
            stack,
            &self.scope.child("AuthenticatedPolicy"),
            props.policy_name.clone().map(Value::from),
            PolicyDocument::new([PolicyStatement::allow()
                .actions(["mobileanalytics:PutEvents", "cognito-identity:*", "cognito-sync:*"])
                .resource("*")]),
            vec![role.name.clone()],
        )?;

        let attachment = Resource::new("AWS::Cognito::IdentityPoolRoleAttachment")
            .property("IdentityPoolId", reference(&pool_id))
            .property(
                "RoleMappings",
                json!({
                    self.pool_name.clone(): {
                        "AmbiguousRoleResolution": "AuthenticatedRole",
                        "IdentityProvider": concat(vec![self.provider_name(), Value::from(":"), self.client_ref()]),
                        "Type": "Token",
                    }
                }),
            )
            .property("Roles", json!({"authenticated": role.arn}));
        stack.declare(&self.scope.child("AuthenticatedAttachment"), attachment)?;
        Ok(pool_id)
    }
}

fn minutes(duration: Duration) -> u64 {
    duration.as_secs() / 60
}

fn redirect_urls(origins: &[String], path: &str) -> Value {
    origins
        .iter()
        .map(|origin| Value::from(format!("{}/{}", origin, path)))
        .collect()
}
