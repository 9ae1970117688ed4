//! Build artifacts referenced by templates.
//!
//! Function packages, provider packages and the console bundle are produced
//! by an external build step. Each is identified by the SHA-256 of its
//! content, and templates refer to `s3://<assets bucket>/<object key>`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::{Error, ErrorContext, Result};

/// Bootstrap bucket that an external publisher uploads assets into.
pub const ASSETS_BUCKET: &str = "cdk-hnb659fds-assets-${AWS::AccountId}-${AWS::Region}";

/// How an asset is uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Packaging {
    /// Directory archived into a zip
    ZipDirectory,
    /// File uploaded as is
    File,
}

/// A hashed build artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Asset {
    /// Path on disk
    pub path: PathBuf,
    /// Lowercase hex SHA-256 of the content
    pub hash: String,
    pub packaging: Packaging,
}

impl Asset {
    /// Hashes a file or directory.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::AssetNotFound(path.to_path_buf()));
        }
        let packaging = if path.is_dir() {
            Packaging::ZipDirectory
        } else {
            Packaging::File
        };
        Ok(Self {
            path: path.to_path_buf(),
            hash: hash_path(path)?,
            packaging,
        })
    }

    /// An asset whose hash was computed elsewhere.
    pub fn prebuilt(path: impl Into<PathBuf>, hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            hash: hash.into(),
            packaging: Packaging::File,
        }
    }

    /// Object key in the assets bucket.
    pub fn object_key(&self) -> String {
        match self.packaging {
            Packaging::ZipDirectory => format!("{}.zip", self.hash),
            Packaging::File => match self.path.extension().and_then(|ext| ext.to_str()) {
                Some(ext) => format!("{}.{}", self.hash, ext),
                None => self.hash.clone(),
            },
        }
    }

    /// Assets bucket name as a template expression.
    pub fn bucket_name() -> Value {
        json!({ "Fn::Sub": ASSETS_BUCKET })
    }

    /// `{"S3Bucket", "S3Key"}` as used by `AWS::Lambda::Function` code.
    pub fn s3_location(&self) -> Value {
        json!({
            "S3Bucket": Self::bucket_name(),
            "S3Key": self.object_key(),
        })
    }

    /// Entry written to the asset manifest.
    pub fn manifest_entry(&self) -> Value {
        json!({
            "path": self.path.display().to_string(),
            "hash": self.hash,
            "packaging": self.packaging,
            "objectKey": self.object_key(),
        })
    }
}

/// Directory that build artifacts are resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRoot {
    root: PathBuf,
}

impl AssetRoot {
    /// Well-known artifact locations under the root.
    pub const API_PACKAGE: &'static str = "api.zip";
    pub const AWS_API_PROVIDER: &'static str = "providers/aws-api";
    pub const NOTIFICATIONS_PROVIDER: &'static str = "providers/s3-notifications";
    pub const DEPLOYMENT_PROVIDER: &'static str = "providers/content-deployment";
    pub const IMAGE_DEPLOYMENT_PROVIDER: &'static str = "providers/image-deployment";
    pub const INDEX_CONVERSION_HANDLER: &'static str = "handlers/index_conversion";
    pub const PUBLISH_MOTION_HANDLER: &'static str = "handlers/publish_motion";
    pub const CHECK_HEALTH_HANDLER: &'static str = "handlers/check_health";
    pub const CONSOLE_BUNDLE: &'static str = "console";
    /// Conversion worker image saved with `docker save`
    pub const CONVERSION_IMAGE: &'static str = "images/convert.tar";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Hashes the artifact at `relative`.
    pub fn asset(&self, relative: &str) -> Result<Asset> {
        Asset::from_path(self.path(relative))
    }
}

/// SHA-256 over a file, or over every file below a directory.
///
/// Directory entries are visited in sorted order and contribute their
/// relative path (with `/` separators) followed by their bytes.
pub fn hash_path(path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();

    if path.is_file() {
        hasher.update(fs::read(path)?);
        return Ok(format!("{:x}", hasher.finalize()));
    }

    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", path.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(path)
            .unwrap_or_else(|_| entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        hasher.update(fs::read(entry.path())?);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Runs the packaging command before artifacts are hashed.
pub async fn run_build_command(command: &str, working_dir: &Path) -> Result<()> {
    let words = shell_words::split(command).map_err(|e| Error::BuildFailed {
        command: command.to_string(),
        message: e.to_string(),
    })?;
    let Some((program, args)) = words.split_first() else {
        return Err(Error::BuildFailed {
            command: command.to_string(),
            message: "empty command".to_string(),
        });
    };

    tracing::info!("Running build command: {}", command);
    let output = tokio::process::Command::new(program)
        .args(args)
        .current_dir(working_dir)
        .output()
        .await
        .map_err(|e| Error::BuildFailed {
            command: command.to_string(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::BuildFailed {
            command: command.to_string(),
            message: format!("exited with {}: {}", output.status, stderr.trim()),
        });
    }

    tracing::debug!("Build output: {}", String::from_utf8_lossy(&output.stdout).trim());
    Ok(())
}
