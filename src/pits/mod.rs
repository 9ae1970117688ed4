//! Pi In The Sky provisioners.
//!
//! Each provisioner declares one slice of the camera system into a stack and
//! returns handles the orchestrator threads into the next one:
//!
//! - [`storage`]: the device bucket, lifecycle rules and video conversion
//! - [`device`]: IoT role alias, thing policy and upload permissions
//! - [`endpoint`]: IoT data and credentials endpoint lookups
//! - [`logging`]: the shared device log group
//! - [`auth`]: console user pool, client and optional identity pool
//! - [`resource_api`]: the management API, its table and notification fan out
//! - [`data_plane`]: the realtime WebSocket API
//! - [`health`]: scheduled health checks and status transitions
//! - [`console`]: the hosted browser console
//! - [`orchestrator`]: composes everything into stacks

pub mod auth;
pub mod console;
pub mod data_plane;
pub mod device;
pub mod endpoint;
pub mod health;
pub mod logging;
pub mod orchestrator;
pub mod resource_api;
pub mod storage;

pub use orchestrator::PitsInfra;
