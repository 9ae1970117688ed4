//! Composes the provisioners into deployable stacks.
//!
//! The device connection stack always exists and owns the storage bucket,
//! the device identity and the single IoT data endpoint lookup. Every other
//! stack is optional and receives what it needs through exports, so the
//! deploy order falls out of the imports:
//!
//! ```text
//! PitsDeviceConnectionStack ─┬─> PitsResourceServiceStack ─┬─> PitsDataServiceStack
//! PitsAuthorizationStack ────┘                             └─> PitsDeviceHealthStack
//! PitsConsoleStack
//! ```

use serde_json::Value;

use super::auth::{AuthDomainProps, Authorization, AuthorizationProps, IdentityPoolProps, DEVELOPMENT_ORIGIN};
use super::console::{Console, ConsoleProps};
use super::data_plane::{DataAuthorization, DataPlane, DataPlaneProps};
use super::device::{DeviceConnection, DeviceConnectionProps};
use super::endpoint::IotEndpoint;
use super::health::{DeviceHealth, DeviceHealthProps};
use super::logging::{DeviceLogging, DeviceLoggingProps, LogGroupClass};
use super::resource_api::{ApiAuthorization, ResourceApi, ResourceApiProps, INDEX_NAME};
use super::storage::{ConversionProps, ImageRepository, Storage, StorageCapability};
use crate::app::App;
use crate::aws::apigw::DomainProps;
use crate::aws::dynamodb::Table;
use crate::aws::AssetRoot;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::template::{Scope, Stack};

pub const DEVICE_CONNECTION_STACK: &str = "PitsDeviceConnectionStack";
pub const AUTHORIZATION_STACK: &str = "PitsAuthorizationStack";
pub const RESOURCE_SERVICE_STACK: &str = "PitsResourceServiceStack";
pub const DATA_SERVICE_STACK: &str = "PitsDataServiceStack";
pub const DEVICE_HEALTH_STACK: &str = "PitsDeviceHealthStack";
pub const CONSOLE_STACK: &str = "PitsConsoleStack";

/// Values the authorization stack exports.
struct AuthExports {
    user_pool_id: Value,
    client_id: Value,
    issuer: Value,
}

/// Values the device connection stack exports.
struct DeviceExports {
    bucket_name: Value,
    data_endpoint: Value,
}

/// The whole Pi In The Sky deployment.
pub struct PitsInfra;

impl PitsInfra {
    /// Builds every stack enabled in `config`.
    pub fn build(config: &Config) -> Result<App> {
        config.check()?;
        Self::check_prerequisites(config)?;

        let assets = AssetRoot::new(&config.assets.root);
        let mut app = App::new();

        let device = Self::device_connection(&mut app, config, &assets)?;
        let auth = if config.authorization.enabled {
            Some(Self::authorization(&mut app, config, &assets)?)
        } else {
            None
        };

        if config.resource_api.enabled {
            let table = Self::resource_service(&mut app, config, &assets, &device, auth.as_ref())?;
            if config.data_plane.enabled {
                if let Some(auth) = &auth {
                    Self::data_service(&mut app, config, &assets, &device, auth, table.clone())?;
                }
            }
            if config.health.enabled {
                Self::device_health(&mut app, config, &assets, table)?;
            }
        }

        if config.console.enabled {
            Self::console(&mut app, config, &assets)?;
        }

        tracing::info!("Built {} stacks", app.stack_names().len());
        Ok(app)
    }

    fn check_prerequisites(config: &Config) -> Result<()> {
        if config.data_plane.enabled && !config.authorization.enabled {
            return Err(Error::invalid_config(
                "data_plane.enabled",
                "the data plane authorizes connections against the user pool; enable authorization",
            ));
        }
        for (key, enabled) in [
            ("data_plane.enabled", config.data_plane.enabled),
            ("health.enabled", config.health.enabled),
        ] {
            if enabled && !config.resource_api.enabled {
                return Err(Error::invalid_config(
                    key,
                    "needs the resources table; enable resource_api",
                ));
            }
        }
        Ok(())
    }

    fn new_stack(name: &str, description: &str, assets: &AssetRoot) -> Stack {
        Stack::new(name)
            .with_description(description)
            .with_asset_root(assets.clone())
    }

    fn device_connection(app: &mut App, config: &Config, assets: &AssetRoot) -> Result<DeviceExports> {
        let mut stack = Self::new_stack(
            DEVICE_CONNECTION_STACK,
            "Pi In The Sky device storage, identity and endpoints",
            assets,
        );
        let device_config = &config.device;
        let conversion = device_config.conversion.enabled.then(|| ConversionProps {
            framerate: device_config.conversion.framerate,
            conversion_format: device_config.conversion.format.clone(),
            capture_quality: device_config.conversion.capture_quality,
            repository: match &device_config.conversion.repository_name {
                Some(name) => ImageRepository::Existing(name.clone()),
                None => ImageRepository::Declare,
            },
            ..Default::default()
        });

        let connection = DeviceConnection::new(
            &mut stack,
            &Scope::new("DeviceConnection"),
            DeviceConnectionProps {
                bucket_name: Some(device_config.bucket_name.clone()),
                paths: device_config.paths(),
                expire_motion_videos: Some(device_config.expire_motion_videos),
                role_name: device_config.role_name.clone(),
                role_alias_name: device_config.role_alias_name.clone(),
                policy_name: device_config.policy_name.clone(),
                conversion,
                shared_notifications: config.resource_api.enabled && config.resource_api.notifications,
            },
        )?;

        if device_config.logging.enabled {
            let logging = DeviceLogging::new(
                &mut stack,
                &Scope::new("DeviceLogging"),
                DeviceLoggingProps {
                    log_group_name: device_config.logging.log_group_name.clone(),
                    log_group_class: if device_config.logging.infrequent_access {
                        LogGroupClass::InfrequentAccess
                    } else {
                        LogGroupClass::Standard
                    },
                    retention_days: Some(device_config.logging.retention_days),
                },
            )?;
            logging.allow_device_management(&mut stack, &connection.role)?;
        }

        let endpoints = Scope::new("Endpoints");
        let data_endpoint = IotEndpoint::data(&mut stack, &endpoints)?;
        let credentials_endpoint = IotEndpoint::credentials(&mut stack, &endpoints)?;
        stack.add_output(
            "CredentialsEndpoint",
            credentials_endpoint.address,
            Some("Endpoint devices exchange certificates for credentials at".to_string()),
        )?;
        stack.add_output("RoleAliasName", Value::from(connection.role_alias.name.clone()), None)?;
        stack.add_output("ThingPolicyName", Value::from(connection.thing_policy.name.clone()), None)?;
        app.add_stack(stack)?;

        Ok(DeviceExports {
            bucket_name: app.export(
                DEVICE_CONNECTION_STACK,
                "BucketName",
                connection.storage.bucket_name(),
            )?,
            data_endpoint: app.export(DEVICE_CONNECTION_STACK, "DataEndpoint", data_endpoint.address)?,
        })
    }

    fn authorization(app: &mut App, config: &Config, assets: &AssetRoot) -> Result<AuthExports> {
        let mut stack = Self::new_stack(AUTHORIZATION_STACK, "Pi In The Sky console users", assets);
        let auth_config = &config.authorization;
        let authorization = Authorization::new(
            &mut stack,
            &Scope::new("Authorization"),
            AuthorizationProps {
                pool_name: auth_config.pool_name.clone(),
                enable_development_origin: auth_config.enable_development_origin,
                custom_origin: config.console_origin(),
                identity_pool: auth_config.identity_pool_name.clone().map(|name| IdentityPoolProps {
                    identity_pool_name: name,
                    role_name: None,
                    policy_name: None,
                }),
            },
        )?;

        if let (Some(certificate), Some(hosted_zone), Some(domain_name)) = (
            config.dns.certificate(),
            config.dns.hosted_zone(),
            config.dns.domain(&auth_config.domain_prefix),
        ) {
            authorization.add_domain(
                &mut stack,
                "CustomDomain",
                &AuthDomainProps {
                    certificate,
                    hosted_zone,
                    domain_name,
                    create_a_record: auth_config.create_a_record,
                },
            )?;
        }
        app.add_stack(stack)?;

        Ok(AuthExports {
            user_pool_id: app.export(AUTHORIZATION_STACK, "UserPoolId", authorization.user_pool_ref())?,
            client_id: app.export(AUTHORIZATION_STACK, "UserPoolClientId", authorization.client_ref())?,
            issuer: app.export(AUTHORIZATION_STACK, "Issuer", authorization.issuer())?,
        })
    }

    fn resource_service(
        app: &mut App,
        config: &Config,
        assets: &AssetRoot,
        device: &DeviceExports,
        auth: Option<&AuthExports>,
    ) -> Result<Table> {
        let mut stack = Self::new_stack(RESOURCE_SERVICE_STACK, "Pi In The Sky resource API", assets);
        let api_config = &config.resource_api;
        let scope = Scope::new("ResourceService");
        let console_origin = config.console_origin();

        let api = ResourceApi::new(
            &mut stack,
            &scope,
            ResourceApiProps {
                api_name: api_config.api_name.clone(),
                table: None,
                topic: None,
                storage: Storage::imported(
                    &scope.child("Storage"),
                    device.bucket_name.clone(),
                    config.device.paths(),
                ),
                enable_development_origin: api_config.enable_development_origin,
                console_origin: console_origin.clone(),
                authorization: auth.map(|auth| ApiAuthorization {
                    issuer: auth.issuer.clone(),
                    audience: vec![auth.client_id.clone()],
                    scopes: vec![],
                }),
                data_endpoint: Some(device.data_endpoint.clone()),
            },
        )?;

        if api_config.notifications {
            let base_url = api_config
                .base_url
                .clone()
                .or(console_origin)
                .unwrap_or_else(|| DEVELOPMENT_ORIGIN.to_string());
            api.add_notification(&mut stack, "Notifications", &base_url)?;
        }

        if let Some(props) = Self::domain_props(config, &api_config.domain_prefix) {
            api.add_domain(&mut stack, "CustomDomain", &props)?;
        }
        app.add_stack(stack)?;

        let table_name = app.export(RESOURCE_SERVICE_STACK, "TableName", api.table.name.clone())?;
        let stream_arn = match &api.table.stream_arn {
            Some(arn) => Some(app.export(RESOURCE_SERVICE_STACK, "TableStreamArn", arn.clone())?),
            None => None,
        };
        app.export(RESOURCE_SERVICE_STACK, "TopicArn", api.topic.arn.clone())?;
        Ok(Table::from_attributes(
            table_name,
            stream_arn,
            vec![INDEX_NAME.to_string()],
        ))
    }

    fn data_service(
        app: &mut App,
        config: &Config,
        assets: &AssetRoot,
        device: &DeviceExports,
        auth: &AuthExports,
        table: Table,
    ) -> Result<()> {
        let mut stack = Self::new_stack(DATA_SERVICE_STACK, "Pi In The Sky realtime data plane", assets);
        let data_config = &config.data_plane;
        let data = DataPlane::new(
            &mut stack,
            &Scope::new("DataService"),
            DataPlaneProps {
                name: data_config.name.clone(),
                table,
                authorization: DataAuthorization {
                    user_pool_id: auth.user_pool_id.clone(),
                    client_id: auth.client_id.clone(),
                },
                allowed_management_roles: data_config.allowed_management_roles.clone(),
                data_endpoint: Some(device.data_endpoint.clone()),
            },
        )?;
        if let Some(props) = Self::domain_props(config, &data_config.domain_prefix) {
            data.add_domain(&mut stack, "CustomDomain", &props)?;
        }
        app.add_stack(stack)
    }

    fn device_health(app: &mut App, config: &Config, assets: &AssetRoot, table: Table) -> Result<()> {
        let mut stack = Self::new_stack(DEVICE_HEALTH_STACK, "Pi In The Sky device health", assets);
        let health = DeviceHealth::new(
            &mut stack,
            &Scope::new("DeviceHealth"),
            DeviceHealthProps {
                input_topic: None,
                sql_version: None,
                table,
                expiration: Some(config.health.expiration()),
            },
        )?;
        health.add_scheduled_check(&mut stack, "CheckHealth", config.health.check_interval())?;
        app.add_stack(stack)
    }

    fn console(app: &mut App, config: &Config, assets: &AssetRoot) -> Result<()> {
        let mut stack = Self::new_stack(CONSOLE_STACK, "Pi In The Sky console", assets);
        let domain = config.dns.domain(&config.console.domain_prefix);
        let console = Console::new(
            &mut stack,
            &Scope::new("Console"),
            ConsoleProps {
                bucket_name: config.console.bucket_name.clone(),
                certificate: domain.as_ref().and_then(|_| config.dns.certificate()),
                hosted_zone: domain.as_ref().and_then(|_| config.dns.hosted_zone()),
                domain_names: domain.map(|domain| vec![domain]),
                ..Default::default()
            },
        )?;
        stack.add_output("DistributionId", console.distribution_id, None)?;
        stack.add_output("DistributionDomainName", console.domain_name, None)?;
        app.add_stack(stack)
    }

    fn domain_props(config: &Config, prefix: &str) -> Option<DomainProps> {
        Some(DomainProps {
            certificate: config.dns.certificate()?,
            hosted_zone: config.dns.hosted_zone()?,
            domain_name: config.dns.domain(prefix)?,
        })
    }
}
