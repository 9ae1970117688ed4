//! # pits-infra
//!
//! Typed infrastructure declarations for the Pi In The Sky camera system.
//! Every AWS resource the system needs is declared through Rust types and
//! rendered into deterministic CloudFormation JSON, one template per stack.
//!
//! ## Core Concepts
//!
//! - **Stack**: an ordered set of resources and outputs, rendered to one template
//! - **Scope**: construct path that yields stable logical ids
//! - **Provisioner**: a typed builder that declares one slice of the system
//! - **App**: every stack plus the exports wiring them together
//! - **Cloud assembly**: rendered templates and a manifest on disk
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         CLI Interface                        │
//! │                 (synth, diff, graph, list)                   │
//! └──────────────────────────────────────────────────────────────┘
//!                                │
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 Orchestrator (pits::PitsInfra)               │
//! │        config sections -> stacks -> exports and imports      │
//! └──────────────────────────────────────────────────────────────┘
//!                                │
//!          ┌─────────────────────┼─────────────────────┐
//!          ▼                     ▼                     ▼
//! ┌─────────────────┐  ┌──────────────────┐  ┌──────────────────┐
//! │  Provisioners   │  │  AWS primitives  │  │    Templates     │
//! │  (device, api,  │  │  (iam, lambda,   │  │  (stacks, graph, │
//! │   health, ...)  │  │   s3, custom)    │  │   diff, arns)    │
//! └─────────────────┘  └──────────────────┘  └──────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use pits_infra::prelude::*;
//!
//! let config = Config::load(None)?;
//! let app = PitsInfra::build(&config)?;
//! let assembly = app.synth()?;
//! assembly.write(Path::new("cdk.out")).await?;
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod prelude {
    //! Convenient re-exports of commonly used types.

    pub use crate::app::{App, CloudAssembly};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::pits::PitsInfra;
    pub use crate::template::{Resource, Scope, Stack, Template};
}

/// Error types and result aliases.
pub mod error;

/// Stacks, logical ids, intrinsic functions, dependency graphs and diffs.
pub mod template;

/// Typed AWS building blocks.
pub mod aws;

/// Pi In The Sky provisioners and the stack orchestrator.
pub mod pits;

/// Multi-stack application and cloud assembly output.
pub mod app;

/// Configuration loading and validation.
pub mod config;

#[cfg(test)]
mod testing;

pub use app::{App, CloudAssembly};
pub use config::Config;
pub use error::{Error, Result};
pub use pits::PitsInfra;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
