//! Error types for pits-infra.
//!
//! This module defines the error types used throughout the crate. Every error
//! surfaces to the operator running the synthesis command; nothing here is
//! retried or swallowed.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pits-infra operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for pits-infra.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Declaration Errors
    // ========================================================================
    /// Conflicting or missing properties on a construct.
    #[error("Invalid declaration for '{construct}': {message}")]
    Validation {
        /// Construct path that rejected its properties
        construct: String,
        /// Error message
        message: String,
    },

    /// Two resources were declared with the same logical id.
    #[error("Duplicate logical id '{logical_id}' in stack '{stack}'")]
    DuplicateLogicalId {
        /// Stack name
        stack: String,
        /// Logical id
        logical_id: String,
    },

    /// A declaration referenced a logical id that does not exist.
    #[error("'{from}' references undeclared resource '{to}'")]
    DanglingReference {
        /// Referencing node
        from: String,
        /// Missing node
        to: String,
    },

    /// The resource (or stack) graph contains a cycle.
    #[error("Dependency cycle detected between: {}", members.join(" -> "))]
    DependencyCycle {
        /// Nodes taking part in the cycle
        members: Vec<String>,
    },

    /// A resource or output could not be located.
    #[error("'{0}' not found")]
    NotFound(String),

    /// An operation is not available on this variant of a construct.
    #[error("Operation '{operation}' is not supported by {variant}")]
    Unsupported {
        /// Operation name
        operation: String,
        /// Variant description
        variant: String,
    },

    /// External call declared without any lifecycle action.
    #[error("External call '{0}' declares neither a create nor an update action")]
    MissingLifecycleAction(String),

    // ========================================================================
    // Asset Errors
    // ========================================================================
    /// A build artifact could not be found on disk.
    #[error("Asset not found: {0}")]
    AssetNotFound(PathBuf),

    /// A provider package was required but not configured.
    #[error("Provider package '{0}' is not configured")]
    ProviderNotConfigured(String),

    /// The packaging command failed.
    #[error("Build command '{command}' failed: {message}")]
    BuildFailed {
        /// Command line
        command: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // IO and Serialization Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Generic error with source.
    #[error("{message}")]
    Other {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Creates a new validation error.
    pub fn validation(construct: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            construct: construct.into(),
            message: message.into(),
        }
    }

    /// Creates a new unsupported operation error.
    pub fn unsupported(operation: impl Into<String>, variant: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
            variant: variant.into(),
        }
    }

    /// Creates a new invalid configuration error.
    pub fn invalid_config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Returns true if the error was raised while declaring resources, before
    /// anything was written.
    pub fn is_declaration_error(&self) -> bool {
        matches!(
            self,
            Error::Validation { .. }
                | Error::DuplicateLogicalId { .. }
                | Error::DanglingReference { .. }
                | Error::DependencyCycle { .. }
                | Error::Unsupported { .. }
                | Error::MissingLifecycleAction(_)
        )
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Validation { .. } | Error::Unsupported { .. } => 2,
            Error::DuplicateLogicalId { .. }
            | Error::DanglingReference { .. }
            | Error::DependencyCycle { .. } => 3,
            Error::Config(_) | Error::InvalidConfig { .. } => 4,
            Error::AssetNotFound(_) | Error::ProviderNotConfigured(_) | Error::BuildFailed { .. } => 5,
            _ => 1,
        }
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Adds context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Adds context with a closure that is only evaluated on error.
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Other {
            message: message.into(),
            source: Some(Box::new(e)),
        })
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Error::Other {
            message: f().into(),
            source: Some(Box::new(e)),
        })
    }
}
