//! Configuration module for pits-infra
//!
//! Handles loading configuration from the first file found on the search
//! path, then applies environment overrides:
//! - Explicit path (`--config`)
//! - `PITS_CONFIG`
//! - Project configuration (`./pits.toml`, `./.pits.toml`)
//! - User configuration (`~/.pits/config.toml`)
//!
//! Files are read as TOML, YAML or JSON depending on their extension.
//! Hosted zone and certificate identifiers live here rather than in code so
//! that another account can deploy the same topology.

use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::aws::route53::{Certificate, HostedZone};
use crate::error::{Error, ErrorContext, Result};
use crate::pits::logging::DEFAULT_RETENTION_DAYS;
use crate::pits::storage::{
    StoragePaths, DEFAULT_CAPTURE_PATH, DEFAULT_CONVERTED_PATH, DEFAULT_MOTION_VIDEO_PATH,
};

pub const DEFAULT_ZONE_NAME: &str = "pits.philcali.me";
pub const DEFAULT_ZONE_ID: &str = "Z0039617ZTGC84RIQHA5";
pub const DEFAULT_CERTIFICATE_ID: &str = "a8492ec1-ec0e-42e2-b782-2491a6e8c5f1";
pub const DEFAULT_CONSOLE_BUCKET_NAME: &str = "philcali-pits-console";
pub const DEFAULT_DEVICE_BUCKET_NAME: &str = "philcali-pinthesky-storage";

static BUCKET_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9.-]*[a-z0-9]$").expect("valid bucket name pattern"));
static ACCOUNT_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{12}$").expect("valid account pattern"));
static REGION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]{2}(-gov)?-[a-z]+-\d$").expect("valid region pattern"));

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    /// Target account and region
    #[validate(nested)]
    pub environment: EnvironmentConfig,

    /// Hosted zone and certificate shared by every custom domain
    pub dns: DnsConfig,

    /// Device connection stack
    #[validate(nested)]
    pub device: DeviceConfig,

    pub authorization: AuthorizationConfig,

    pub resource_api: ResourceApiConfig,

    pub data_plane: DataPlaneConfig,

    #[validate(nested)]
    pub health: HealthConfig,

    #[validate(nested)]
    pub console: ConsoleConfig,

    /// Build artifacts
    pub assets: AssetsConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct EnvironmentConfig {
    #[validate(regex(path = *ACCOUNT_ID, message = "must be a 12 digit account id"))]
    pub account: Option<String>,

    #[validate(regex(path = *REGION, message = "must be a region such as us-east-1"))]
    pub region: Option<String>,
}

/// Leave a field unset to skip every custom domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    pub zone_name: Option<String>,
    pub zone_id: Option<String>,
    pub certificate_id: Option<String>,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            zone_name: Some(DEFAULT_ZONE_NAME.to_string()),
            zone_id: Some(DEFAULT_ZONE_ID.to_string()),
            certificate_id: Some(DEFAULT_CERTIFICATE_ID.to_string()),
        }
    }
}

impl DnsConfig {
    pub fn hosted_zone(&self) -> Option<HostedZone> {
        match (&self.zone_id, &self.zone_name) {
            (Some(id), Some(name)) => Some(HostedZone::from_attributes(id, name)),
            _ => None,
        }
    }

    pub fn certificate(&self) -> Option<Certificate> {
        self.certificate_id.as_deref().map(Certificate::from_id)
    }

    /// `<prefix>.<zone>` when custom domains are configured.
    pub fn domain(&self, prefix: &str) -> Option<String> {
        if self.hosted_zone().is_none() || self.certificate_id.is_none() {
            return None;
        }
        self.zone_name
            .as_deref()
            .map(|zone| format!("{}.{}", prefix, zone.trim_end_matches('.')))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DeviceConfig {
    #[validate(
        length(min = 3, max = 63, message = "must be between 3 and 63 characters"),
        regex(path = *BUCKET_NAME, message = "must be lowercase letters, digits, dots and hyphens")
    )]
    pub bucket_name: String,

    pub motion_video_path: String,
    pub converted_path: String,
    pub capture_path: String,
    pub snapshot_path: Option<String>,

    /// Expire raw motion videos after 30 days
    pub expire_motion_videos: bool,

    pub role_name: Option<String>,
    pub role_alias_name: Option<String>,
    pub policy_name: Option<String>,

    #[validate(nested)]
    pub conversion: ConversionConfig,

    pub logging: DeviceLoggingConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            bucket_name: DEFAULT_DEVICE_BUCKET_NAME.to_string(),
            motion_video_path: DEFAULT_MOTION_VIDEO_PATH.to_string(),
            converted_path: DEFAULT_CONVERTED_PATH.to_string(),
            capture_path: DEFAULT_CAPTURE_PATH.to_string(),
            snapshot_path: None,
            expire_motion_videos: true,
            role_name: None,
            role_alias_name: None,
            policy_name: None,
            conversion: ConversionConfig::default(),
            logging: DeviceLoggingConfig::default(),
        }
    }
}

impl DeviceConfig {
    pub fn paths(&self) -> StoragePaths {
        StoragePaths {
            motion_video: self.motion_video_path.clone(),
            converted: self.converted_path.clone(),
            capture: self.capture_path.clone(),
            snapshot: self.snapshot_path.clone(),
        }
        .normalized()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ConversionConfig {
    pub enabled: bool,

    #[validate(range(min = 1, max = 60))]
    pub framerate: u32,

    pub format: String,

    #[validate(range(min = 1, max = 100))]
    pub capture_quality: u32,

    /// Existing ECR repository holding `latest`; when unset `pits-convert` is
    /// declared and the built image archive is pushed into it
    pub repository_name: Option<String>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            framerate: 15,
            format: "mp4".to_string(),
            capture_quality: 90,
            repository_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceLoggingConfig {
    pub enabled: bool,
    pub log_group_name: Option<String>,
    pub retention_days: u32,
    pub infrequent_access: bool,
}

impl Default for DeviceLoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_group_name: None,
            retention_days: DEFAULT_RETENTION_DAYS,
            infrequent_access: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationConfig {
    pub enabled: bool,
    pub pool_name: Option<String>,
    pub enable_development_origin: bool,
    /// Subdomain of the sign-in pages
    pub domain_prefix: String,
    /// Declare a placeholder apex record; Cognito requires the parent to resolve
    pub create_a_record: bool,
    pub identity_pool_name: Option<String>,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pool_name: None,
            enable_development_origin: true,
            domain_prefix: "auth".to_string(),
            create_a_record: false,
            identity_pool_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceApiConfig {
    pub enabled: bool,
    pub api_name: Option<String>,
    pub enable_development_origin: bool,
    pub domain_prefix: String,
    /// Attach the index and alert workers
    pub notifications: bool,
    /// Link base used in alert messages; the console origin when unset
    pub base_url: Option<String>,
}

impl Default for ResourceApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_name: None,
            enable_development_origin: true,
            domain_prefix: "api".to_string(),
            notifications: true,
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataPlaneConfig {
    pub enabled: bool,
    pub name: Option<String>,
    pub domain_prefix: String,
    /// Extra role names allowed to push to open connections
    pub allowed_management_roles: Vec<String>,
}

impl Default for DataPlaneConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: None,
            domain_prefix: "data".to_string(),
            allowed_management_roles: vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,

    #[validate(range(min = 1, max = 1440))]
    pub check_interval_minutes: u64,

    #[validate(range(min = 1))]
    pub expiration_days: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_minutes: 5,
            expiration_days: 30,
        }
    }
}

impl HealthConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_minutes * 60)
    }

    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_days * 24 * 60 * 60)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,

    #[validate(
        length(min = 3, max = 63, message = "must be between 3 and 63 characters"),
        regex(path = *BUCKET_NAME, message = "must be lowercase letters, digits, dots and hyphens")
    )]
    pub bucket_name: Option<String>,

    pub domain_prefix: String,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bucket_name: Some(DEFAULT_CONSOLE_BUCKET_NAME.to_string()),
            domain_prefix: "console".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    /// Directory holding the packaged functions, providers and console bundle
    pub root: PathBuf,
    /// Shell command that produces the artifacts, run by `synth --build`
    pub build_command: Option<String>,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("build"),
            build_command: None,
        }
    }
}

impl Config {
    /// Load configuration from the search path and the environment
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = match Self::find_config_file(config_path)? {
            Some(path) => Self::from_file(&path)?,
            None => {
                tracing::debug!("No configuration file found, using defaults");
                Config::default()
            }
        };
        config.apply_env_overrides();
        config.check()?;
        Ok(config)
    }

    /// First existing file on the search path.
    ///
    /// An explicit path must exist; the other candidates are optional.
    fn find_config_file(explicit_path: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit_path {
            if !path.exists() {
                return Err(Error::Config(format!("{} does not exist", path.display())));
            }
            return Ok(Some(path.to_path_buf()));
        }
        Ok(Self::config_paths().into_iter().find(|path| path.exists()))
    }

    /// Candidate configuration files in priority order
    pub fn config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(env_config) = std::env::var("PITS_CONFIG") {
            paths.push(PathBuf::from(env_config));
        }
        paths.push(PathBuf::from("pits.toml"));
        paths.push(PathBuf::from(".pits.toml"));
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".pits").join("config.toml"));
        }
        paths
    }

    /// Parses a single file, by extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config: Config = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            "toml" => toml::from_str(&content)?,
            other => {
                return Err(Error::Config(format!(
                    "Unsupported config format '{}' for {}",
                    other,
                    path.display()
                )))
            }
        };
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(account) = std::env::var("PITS_ACCOUNT") {
            self.environment.account = Some(account);
        }

        if let Ok(region) = std::env::var("PITS_REGION") {
            self.environment.region = Some(region);
        }

        if let Ok(bucket) = std::env::var("PITS_DEVICE_BUCKET") {
            self.device.bucket_name = bucket;
        }

        if let Ok(bucket) = std::env::var("PITS_CONSOLE_BUCKET") {
            self.console.bucket_name = Some(bucket);
        }

        if let Ok(zone) = std::env::var("PITS_ZONE_NAME") {
            self.dns.zone_name = Some(zone);
        }

        if let Ok(zone) = std::env::var("PITS_ZONE_ID") {
            self.dns.zone_id = Some(zone);
        }

        if let Ok(certificate) = std::env::var("PITS_CERTIFICATE_ID") {
            self.dns.certificate_id = Some(certificate);
        }

        if let Ok(root) = std::env::var("PITS_ASSETS_ROOT") {
            self.assets.root = PathBuf::from(root);
        }
    }

    /// Runs the field validators, reporting the first offending key
    pub fn check(&self) -> Result<()> {
        self.validate().map_err(|errors| {
            let detail = errors.to_string();
            let key = detail.split(':').next().unwrap_or("config").trim().to_string();
            Error::invalid_config(key, detail)
        })?;

        let paths = self.device.paths();
        let written = [
            ("device.converted_path", paths.converted.clone()),
            ("device.capture_path", paths.capture.clone()),
            ("device.snapshot_path", paths.snapshot()),
        ];
        for (key, path) in &written {
            if StoragePaths::is_within(path, &paths.motion_video) {
                return Err(Error::invalid_config(
                    *key,
                    format!("'{}' must not be inside the motion video prefix '{}'", path, paths.motion_video),
                ));
            }
        }

        if self.device.conversion.enabled && StoragePaths::is_within(&paths.snapshot(), &paths.converted) {
            return Err(Error::invalid_config(
                "device.snapshot_path",
                format!("snapshots must not be inside the converted prefix '{}'", paths.converted),
            ));
        }
        Ok(())
    }

    /// Browser origin of the hosted console, when it has a custom domain
    pub fn console_origin(&self) -> Option<String> {
        if !self.console.enabled {
            return None;
        }
        self.dns
            .domain(&self.console.domain_prefix)
            .map(|domain| format!("https://{}", domain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.device.bucket_name, "philcali-pinthesky-storage");
        assert_eq!(config.console.bucket_name.as_deref(), Some("philcali-pits-console"));
        assert_eq!(config.health.check_interval(), Duration::from_secs(300));
        assert_eq!(config.assets.root, PathBuf::from("build"));
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_domains_follow_zone() {
        let config = Config::default();
        assert_eq!(config.dns.domain("api").as_deref(), Some("api.pits.philcali.me"));
        assert_eq!(config.console_origin().as_deref(), Some("https://console.pits.philcali.me"));

        let mut config = Config::default();
        config.dns.zone_id = None;
        assert!(config.dns.hosted_zone().is_none());
        assert!(config.dns.domain("api").is_none());
        assert!(config.console_origin().is_none());
    }

    #[test]
    fn test_rejects_bad_bucket_name() {
        let mut config = Config::default();
        config.device.bucket_name = "Not_A_Bucket".to_string();
        let err = config.check().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
        assert!(err.to_string().contains("bucket_name"));
    }

    #[test]
    fn test_rejects_bad_capture_quality() {
        let mut config = Config::default();
        config.device.conversion.capture_quality = 0;
        assert!(config.check().is_err());
    }

    #[test]
    fn test_rejects_snapshot_inside_converted_prefix() {
        let mut config = Config::default();
        config.device.snapshot_path = Some("motion_videos_converted/".to_string());
        let err = config.check().unwrap_err();
        assert!(err.to_string().contains("device.snapshot_path"));
    }

    #[test]
    fn test_rejects_snapshot_nested_in_converted_prefix() {
        let mut config = Config::default();
        config.device.snapshot_path = Some("motion_videos_converted/thumbs".to_string());
        let err = config.check().unwrap_err();
        assert!(err.to_string().contains("device.snapshot_path"));

        config.device.conversion.enabled = false;
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_rejects_prefixes_nested_in_motion_videos() {
        let mut config = Config::default();
        config.device.converted_path = "motion_videos/converted".to_string();
        let err = config.check().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
        assert!(err.to_string().contains("device.converted_path"));

        let mut config = Config::default();
        config.device.capture_path = "motion_videos/".to_string();
        assert!(config.check().unwrap_err().to_string().contains("device.capture_path"));

        let mut config = Config::default();
        config.device.snapshot_path = Some("motion_videos/snapshots".to_string());
        assert!(config.check().unwrap_err().to_string().contains("device.snapshot_path"));
    }

    #[test]
    fn test_sibling_prefixes_are_allowed() {
        let mut config = Config::default();
        config.device.snapshot_path = Some("motion_videos_converted_thumbs".to_string());
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [device]
            bucket_name = "farts-mcgeehee"

            [health]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.device.bucket_name, "farts-mcgeehee");
        assert_eq!(config.device.motion_video_path, "motion_videos");
        assert!(!config.health.enabled);
        assert!(config.console.enabled);
    }
}
