//! Typed AWS building blocks.
//!
//! Each type declares one or more resources into a [`Stack`](crate::template::Stack)
//! and returns a handle exposing the references (names, ARNs, attributes)
//! that dependents thread into their own declarations.
//!
//! ## Features
//!
//! - IAM roles, managed and inline policies with least-privilege statements
//! - Lambda functions with execution roles, permissions and stream sources
//! - Content-hashed build artifacts
//! - External calls as custom resources behind per-stack provider functions
//! - S3 buckets with lifecycle rules and notification subscriptions
//! - DynamoDB tables, SNS topics, API Gateway v2 APIs, DNS records and certificates

pub mod apigw;
pub mod asset;
pub mod custom;
pub mod dynamodb;
pub mod iam;
pub mod lambda;
pub mod route53;
pub mod s3;
pub mod sns;

pub use asset::{Asset, AssetRoot};
pub use custom::{AwsCustomResource, AwsCustomResourceProps, ExternalCall, OnDelete, PhysicalResourceId};
pub use iam::{ManagedPolicy, PolicyDocument, PolicyStatement, Principal, Role, RoleProps};
pub use lambda::{Code, Function, FunctionProps, Runtime};
