//! Device storage.
//!
//! Cameras upload motion videos and still captures into one bucket under
//! fixed prefixes. The prefixes are a contract shared with the conversion
//! worker and the index worker, so every declaration site reads them from
//! [`StoragePaths`].
//!
//! A bucket is either owned by the declaring stack ([`Storage::Owned`]) or
//! referenced by name from a stack that does not own its lifecycle
//! ([`Storage::Imported`]). Both expose [`StorageCapability`].

use std::time::Duration;

use serde_json::{json, Value};

use crate::aws::asset::{Asset, AssetRoot};
use crate::aws::custom::{
    AwsCustomResource, AwsCustomResourceProps, CustomResource, ExternalCall, OnDelete, PhysicalResourceId, Provider,
};
use crate::aws::iam::PolicyStatement;
use crate::aws::lambda::{Code, Function, FunctionProps};
use crate::aws::s3::{Bucket, BucketProps, LifecycleRule, StorageClass};
use crate::error::{Error, Result};
use crate::template::intrinsic::{account_id, concat, get_att, reference, region, url_suffix};
use crate::template::{Arn, RemovalPolicy, Resource, Scope, Stack};

pub const DEFAULT_MOTION_VIDEO_PATH: &str = "motion_videos";
pub const DEFAULT_CONVERTED_PATH: &str = "motion_videos_converted";
pub const DEFAULT_CAPTURE_PATH: &str = "capture_images";
/// Repository declared for the conversion image when none is supplied.
pub const DEFAULT_REPOSITORY_NAME: &str = "pits-convert";

/// Object key prefixes, without trailing slashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    pub motion_video: String,
    pub converted: String,
    pub capture: String,
    /// Defaults to `<motion_video>_snapshots`
    pub snapshot: Option<String>,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self {
            motion_video: DEFAULT_MOTION_VIDEO_PATH.to_string(),
            converted: DEFAULT_CONVERTED_PATH.to_string(),
            capture: DEFAULT_CAPTURE_PATH.to_string(),
            snapshot: None,
        }
    }
}

impl StoragePaths {
    /// Normalizes every prefix to have no trailing slash.
    pub fn normalized(mut self) -> Self {
        for path in [&mut self.motion_video, &mut self.converted, &mut self.capture] {
            *path = path.trim_end_matches('/').to_string();
        }
        self.snapshot = self.snapshot.map(|s| s.trim_end_matches('/').to_string());
        self
    }

    /// Snapshot prefix. Kept outside the converted prefix so snapshots are
    /// never indexed as videos.
    pub fn snapshot(&self) -> String {
        self.snapshot
            .clone()
            .unwrap_or_else(|| format!("{}_snapshots", self.motion_video))
    }

    /// True when `path` is `prefix` itself or a key prefix below it.
    pub fn is_within(path: &str, prefix: &str) -> bool {
        path == prefix || path.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/'))
    }
}

/// What every storage variant offers to dependents.
pub trait StorageCapability {
    fn bucket(&self) -> &Bucket;

    fn paths(&self) -> &StoragePaths;

    fn bucket_name(&self) -> Value {
        self.bucket().name.clone()
    }

    fn bucket_arn(&self) -> Value {
        self.bucket().arn.clone()
    }

    fn arn_for_objects(&self, pattern: &str) -> Value {
        self.bucket().arn_for_objects(pattern)
    }

    fn motion_video_objects_arn(&self) -> Value {
        self.arn_for_objects(&format!("{}/*", self.paths().motion_video))
    }

    fn converted_objects_arn(&self) -> Value {
        self.arn_for_objects(&format!("{}/*", self.paths().converted))
    }

    fn capture_objects_arn(&self) -> Value {
        self.arn_for_objects(&format!("{}/*", self.paths().capture))
    }

    fn snapshot_objects_arn(&self) -> Value {
        self.arn_for_objects(&format!("{}/*", self.paths().snapshot()))
    }
}

/// Properties of an owned bucket.
#[derive(Debug, Clone)]
pub struct StorageProps {
    pub bucket_name: Option<String>,
    pub paths: StoragePaths,
    /// Expire raw videos and tier converted videos
    pub expire_motion_videos: bool,
    /// Other stacks subscribe to object events on this bucket
    pub shared_notifications: bool,
}

impl Default for StorageProps {
    fn default() -> Self {
        Self {
            bucket_name: None,
            paths: StoragePaths::default(),
            expire_motion_videos: true,
            shared_notifications: false,
        }
    }
}

/// Where the conversion image lives.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ImageRepository {
    /// Declare `pits-convert` with AES256 encryption and push the built
    /// image archive into it
    #[default]
    Declare,
    /// Use an existing repository by name. It must already hold `latest`.
    Existing(String),
}

/// Conversion worker parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionProps {
    pub framerate: u32,
    pub conversion_format: String,
    pub capture_quality: u32,
    pub memory_size: u32,
    pub timeout: Duration,
    pub repository: ImageRepository,
}

impl Default for ConversionProps {
    fn default() -> Self {
        Self {
            framerate: 15,
            conversion_format: "mp4".to_string(),
            capture_quality: 90,
            memory_size: 1024,
            timeout: Duration::from_secs(120),
            repository: ImageRepository::Declare,
        }
    }
}

/// Device storage, owned or imported.
#[derive(Debug, Clone, PartialEq)]
pub enum Storage {
    Owned { bucket: Bucket, paths: StoragePaths, scope: Scope },
    Imported { bucket: Bucket, paths: StoragePaths },
}

impl Storage {
    /// Declares the bucket at `<scope>Bucket`.
    pub fn owned(stack: &mut Stack, scope: &Scope, props: StorageProps) -> Result<Self> {
        let paths = props.paths.normalized();

        let lifecycle_rules = if props.expire_motion_videos {
            vec![
                LifecycleRule::expire(format!("{}/", paths.motion_video), 30),
                LifecycleRule::transition(
                    format!("{}/", paths.converted),
                    vec![
                        (30, StorageClass::InfrequentAccess),
                        (90, StorageClass::Glacier),
                        (180, StorageClass::DeepArchive),
                    ],
                ),
            ]
        } else {
            tracing::warn!("Motion video expiration disabled for {}; raw videos are kept forever", scope);
            Vec::new()
        };

        let bucket = Bucket::new(
            stack,
            &scope.child("Bucket"),
            BucketProps {
                bucket_name: props.bucket_name,
                lifecycle_rules,
                shared_notifications: props.shared_notifications,
                ..Default::default()
            },
        )?;

        Ok(Storage::Owned {
            bucket,
            paths,
            scope: scope.clone(),
        })
    }

    /// References a bucket owned elsewhere. Nothing is declared.
    pub fn imported(scope: &Scope, bucket_name: impl Into<Value>, paths: StoragePaths) -> Self {
        Storage::Imported {
            bucket: Bucket::from_name(&scope.child("Bucket"), bucket_name),
            paths: paths.normalized(),
        }
    }

    /// The same bucket seen from a stack that does not own it.
    pub fn import_into(&self, scope: &Scope, bucket_name: impl Into<Value>) -> Self {
        Self::imported(scope, bucket_name, self.paths().clone())
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Storage::Owned { .. })
    }

    /// Attaches the video conversion worker to raw uploads.
    ///
    /// The worker image is pulled from ECR by digest; the digest of `latest`
    /// is looked up on every update so a pushed image redeploys the function.
    /// A declared repository starts empty, so the lookup waits for the image
    /// push and runs again whenever the archive changes.
    pub fn add_conversion_function(&self, stack: &mut Stack, props: ConversionProps) -> Result<Function> {
        let Storage::Owned { bucket, paths, scope } = self else {
            return Err(Error::unsupported("add_conversion_function", "imported storage"));
        };

        let (repository_name, push) = match &props.repository {
            ImageRepository::Declare => {
                let repository = Resource::new("AWS::ECR::Repository")
                    .property("EncryptionConfiguration", json!({"EncryptionType": "AES256"}))
                    .property("RepositoryName", DEFAULT_REPOSITORY_NAME)
                    .removal_policy(RemovalPolicy::Retain);
                let repository_id = stack.declare(&scope.child("ConvertECR"), repository)?;
                let push = push_image(stack, &scope.child("ConvertImage"), &repository_id)?;
                (reference(repository_id), Some(push))
            }
            ImageRepository::Existing(name) => (Value::from(name.clone()), None),
        };

        let describe = ExternalCall::new(
            "ECR",
            "describeImages",
            PhysicalResourceId::FromResponse("imageDetails.0.imageDigest".to_string()),
        )
        .parameters(json!({
            "imageIds": [{"imageTag": "latest"}],
            "repositoryName": repository_name,
        }));
        let digest = AwsCustomResource::new(
            stack,
            &scope.child("ConvertImageDigest"),
            AwsCustomResourceProps::new(OnDelete::NoOp)
                .on_update(describe)
                .statement(
                    PolicyStatement::allow()
                        .action("ecr:DescribeImages")
                        .resource(Arn::new("ecr", "repository").resource_name(repository_name.clone()).build()),
                ),
        )?;
        if let Some((deployment, archive)) = push {
            stack.add_dependency(&digest.logical_id, &deployment.logical_id)?;
            stack
                .resource_mut(&digest.logical_id)?
                .set("ImageArchiveHash", archive.hash);
        }

        let image_uri = concat(vec![
            account_id(),
            Value::from(".dkr.ecr."),
            region(),
            Value::from("."),
            url_suffix(),
            Value::from("/"),
            repository_name,
            Value::from("@"),
            digest.get_response_field("imageDetails.0.imageDigest"),
        ]);

        let function = Function::new(
            stack,
            &scope.child("ConvertFunction"),
            FunctionProps::new(Code::Image(image_uri))
                .memory_size(props.memory_size)
                .timeout(props.timeout)
                .env("CAPTURE_PATH", paths.capture.clone())
                .env("CAPTURE_QUALITY", props.capture_quality.to_string())
                .env("CONVERSION_FORMAT", props.conversion_format.clone())
                .env("CONVERSION_PATH", paths.converted.clone())
                .env("FRAMERATE", props.framerate.to_string())
                .env("SNAPSHOT_PATH", paths.snapshot()),
        )?;

        function.add_to_role_policy(
            stack,
            PolicyStatement::allow()
                .action("s3:GetObject")
                .resource(self.motion_video_objects_arn()),
        )?;
        function.add_to_role_policy(
            stack,
            PolicyStatement::allow().action("s3:PutObject").resources([
                self.converted_objects_arn(),
                self.snapshot_objects_arn(),
                self.capture_objects_arn(),
            ]),
        )?;

        bucket.add_object_created_notification(stack, &function, &format!("{}/", paths.motion_video))?;
        tracing::info!("Attached conversion worker to {}/", paths.motion_video);
        Ok(function)
    }
}

/// Copies the image archive from the assets bucket into the repository as
/// `latest`.
fn push_image(stack: &mut Stack, scope: &Scope, repository_id: &str) -> Result<(CustomResource, Asset)> {
    let archive = stack.asset_root()?.asset(AssetRoot::CONVERSION_IMAGE)?;
    let archive = stack.add_asset(archive);
    let provider = Provider::ImageDeployment.ensure(stack)?;
    let assets_bucket = Arn::new("s3", Asset::bucket_name()).global().build();
    provider.add_to_role_policy(
        stack,
        PolicyStatement::allow()
            .actions(["s3:GetObject*", "s3:GetBucket*", "s3:List*"])
            .resources([assets_bucket.clone(), concat(vec![assets_bucket, Value::from("/*")])]),
    )?;
    provider.add_to_role_policy(
        stack,
        PolicyStatement::allow().action("ecr:GetAuthorizationToken").resource("*"),
    )?;
    provider.add_to_role_policy(
        stack,
        PolicyStatement::allow()
            .actions([
                "ecr:BatchCheckLayerAvailability",
                "ecr:BatchGetImage",
                "ecr:CompleteLayerUpload",
                "ecr:InitiateLayerUpload",
                "ecr:PutImage",
                "ecr:UploadLayerPart",
            ])
            .resource(get_att(repository_id, "Arn")),
    )?;

    let deployment = CustomResource::new(
        stack,
        &scope.child("CustomResource"),
        "Custom::CDKECRDeployment",
        provider.arn(),
        json!({
            "DestImage": concat(vec![
                account_id(),
                Value::from(".dkr.ecr."),
                region(),
                Value::from("."),
                url_suffix(),
                Value::from("/"),
                reference(repository_id),
                Value::from(":latest"),
            ]),
            "SrcImage": concat(vec![
                Value::from("s3://"),
                Asset::bucket_name(),
                Value::from(format!("/{}", archive.object_key())),
            ]),
        }),
    )?;
    tracing::debug!("Pushing {} into {}", archive.path.display(), repository_id);
    Ok((deployment, archive))
}

impl StorageCapability for Storage {
    fn bucket(&self) -> &Bucket {
        match self {
            Storage::Owned { bucket, .. } | Storage::Imported { bucket, .. } => bucket,
        }
    }

    fn paths(&self) -> &StoragePaths {
        match self {
            Storage::Owned { paths, .. } | Storage::Imported { paths, .. } => paths,
        }
    }
}
