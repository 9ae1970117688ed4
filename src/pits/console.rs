//! Console hosting.
//!
//! The built single-page console is copied into a private bucket and served
//! through CloudFront. Unknown paths fall back to `/index.html` so client
//! side routing survives a hard refresh.

use std::time::Duration;

use serde_json::{json, Value};

use crate::aws::custom::{CustomResource, Provider};
use crate::aws::iam::{PolicyStatement, POLICY_VERSION};
use crate::aws::route53::{cname_record, Certificate, HostedZone};
use crate::aws::s3::{Bucket, BucketProps, CorsRule};
use crate::aws::{Asset, AssetRoot};
use crate::error::{Error, Result};
use crate::template::intrinsic::{concat, get_att, reference};
use crate::template::{Arn, Resource, Scope, Stack};

pub const INDEX_DOCUMENT: &str = "index.html";

/// TTL of the CNAME records and the cached error responses.
pub const CONSOLE_TTL: Duration = Duration::from_secs(5 * 60);

/// AWS managed `CachingOptimized` cache policy.
const CACHING_OPTIMIZED: &str = "658327ea-f89d-4fab-a63d-7e88639e58f6";

/// A distribution managed outside this stack.
#[derive(Debug, Clone, PartialEq)]
pub struct ExistingDistribution {
    pub distribution_id: Value,
    pub domain_name: Value,
}

#[derive(Debug, Clone, Default)]
pub struct ConsoleProps {
    pub bucket: Option<Bucket>,
    pub bucket_name: Option<String>,
    pub distribution: Option<ExistingDistribution>,
    pub certificate: Option<Certificate>,
    pub hosted_zone: Option<HostedZone>,
    pub domain_names: Option<Vec<String>>,
    /// Front-end bundle; resolved from the stack's asset root when absent
    pub source: Option<Asset>,
}

/// Handle to the hosted console.
#[derive(Debug, Clone)]
pub struct Console {
    pub bucket: Bucket,
    pub distribution_id: Value,
    pub domain_name: Value,
    pub deployment: CustomResource,
}

impl Console {
    pub fn new(stack: &mut Stack, scope: &Scope, props: ConsoleProps) -> Result<Self> {
        if props.bucket.is_some() && props.bucket_name.is_some() {
            return Err(Error::validation(
                scope.path(),
                "Cannot specify both a bucket and a bucketName.",
            ));
        }
        if props.distribution.is_some()
            && (props.certificate.is_some() || props.domain_names.is_some())
        {
            return Err(Error::validation(
                scope.path(),
                "Cannot specify both a distribution and properties for a managed distribution.",
            ));
        }

        let bucket = match props.bucket {
            Some(bucket) => bucket,
            None => Bucket::new(
                stack,
                &scope.child("Content"),
                BucketProps {
                    bucket_name: props.bucket_name.clone(),
                    cors: vec![CorsRule {
                        allowed_origins: vec!["*".into()],
                        allowed_methods: vec!["GET".into(), "HEAD".into()],
                    }],
                    private: true,
                    ..Default::default()
                },
            )?,
        };

        let (distribution_id, domain_name) = match props.distribution {
            Some(existing) => (existing.distribution_id, existing.domain_name),
            None => {
                let id = declare_distribution(
                    stack,
                    scope,
                    &bucket,
                    props.certificate.as_ref(),
                    props.domain_names.as_deref().unwrap_or_default(),
                )?;
                (reference(&id), get_att(&id, "DomainName"))
            }
        };

        if let (Some(zone), Some(domain_names)) = (&props.hosted_zone, &props.domain_names) {
            for (index, domain) in domain_names.iter().enumerate() {
                cname_record(
                    stack,
                    &scope.child(format!("DistributionCNAME{}", index + 1)),
                    zone,
                    domain,
                    domain_name.clone(),
                    CONSOLE_TTL,
                )?;
            }
        }

        let source = match props.source {
            Some(asset) => asset,
            None => stack.asset_root()?.asset(AssetRoot::CONSOLE_BUNDLE)?,
        };
        let deployment = deploy_bundle(stack, scope, &bucket, &distribution_id, source)?;

        tracing::info!("Declared console hosting under {}", scope);
        Ok(Self {
            bucket,
            distribution_id,
            domain_name,
            deployment,
        })
    }
}

/// Declares the origin access identity, its bucket grant and the
/// distribution. Returns the distribution's logical id.
fn declare_distribution(
    stack: &mut Stack,
    scope: &Scope,
    bucket: &Bucket,
    certificate: Option<&Certificate>,
    domain_names: &[String],
) -> Result<String> {
    let origin_scope = scope.child("Distribution").child("Origin1");
    let identity = Resource::new("AWS::CloudFront::CloudFrontOriginAccessIdentity").property(
        "CloudFrontOriginAccessIdentityConfig",
        json!({"Comment": format!("Identity for {}", origin_scope.path())}),
    );
    let identity_id = stack.declare(&origin_scope.child("S3Origin"), identity)?;

    // Imported buckets keep whatever policy their owner attached.
    if let Some(bucket_id) = &bucket.logical_id {
        let mut statement = PolicyStatement::allow()
            .action("s3:GetObject")
            .resource(bucket.arn_for_objects("*"))
            .to_json();
        if let Some(object) = statement.as_object_mut() {
            object.insert(
                "Principal".into(),
                json!({"CanonicalUser": get_att(&identity_id, "S3CanonicalUserId")}),
            );
        }
        let policy = Resource::new("AWS::S3::BucketPolicy")
            .property("Bucket", reference(bucket_id))
            .property(
                "PolicyDocument",
                json!({"Statement": [statement], "Version": POLICY_VERSION}),
            );
        stack.declare(&Scope::new(bucket_id.clone()).child("Policy"), policy)?;
    }

    let origin_id = origin_scope.logical_id();
    let error_responses: Vec<Value> = [403, 404]
        .into_iter()
        .map(|code| {
            json!({
                "ErrorCachingMinTTL": CONSOLE_TTL.as_secs(),
                "ErrorCode": code,
                "ResponseCode": 200,
                "ResponsePagePath": format!("/{}", INDEX_DOCUMENT),
            })
        })
        .collect();

    let mut config = json!({
        "CustomErrorResponses": error_responses,
        "DefaultCacheBehavior": {
            "AllowedMethods": ["GET", "HEAD", "OPTIONS"],
            "CachePolicyId": CACHING_OPTIMIZED,
            "CachedMethods": ["GET", "HEAD"],
            "Compress": true,
            "TargetOriginId": origin_id,
            "ViewerProtocolPolicy": "https-only",
        },
        "DefaultRootObject": INDEX_DOCUMENT,
        "Enabled": true,
        "HttpVersion": "http1.1",
        "IPV6Enabled": true,
        "Origins": [{
            "DomainName": bucket.regional_domain_name(),
            "Id": origin_id,
            "S3OriginConfig": {
                "OriginAccessIdentity": concat(vec![
                    Value::from("origin-access-identity/cloudfront/"),
                    reference(&identity_id),
                ]),
            },
        }],
        "PriceClass": "PriceClass_100",
    });
    if let Some(object) = config.as_object_mut() {
        if !domain_names.is_empty() {
            object.insert("Aliases".into(), json!(domain_names));
        }
        if let Some(certificate) = certificate {
            object.insert(
                "ViewerCertificate".into(),
                json!({
                    "AcmCertificateArn": certificate.arn,
                    "MinimumProtocolVersion": "TLSv1.2_2021",
                    "SslSupportMethod": "sni-only",
                }),
            );
        }
    }
    if certificate.is_none() && !domain_names.is_empty() {
        tracing::warn!("Aliases on {} without a certificate will be rejected by CloudFront", scope);
    }

    let resource = Resource::new("AWS::CloudFront::Distribution").property("DistributionConfig", config);
    stack.declare(&scope.child("Distribution"), resource)
}

/// Copies the bundle into the bucket and invalidates every cached path.
fn deploy_bundle(
    stack: &mut Stack,
    scope: &Scope,
    bucket: &Bucket,
    distribution_id: &Value,
    source: Asset,
) -> Result<CustomResource> {
    let source = stack.add_asset(source);
    let provider = Provider::BucketDeployment.ensure(stack)?;
    provider.add_to_role_policy(
        stack,
        PolicyStatement::allow()
            .actions(["s3:GetObject*", "s3:GetBucket*", "s3:List*"])
            .resources([
                Arn::new("s3", Asset::bucket_name()).global().build(),
                concat(vec![
                    Arn::new("s3", Asset::bucket_name()).global().build(),
                    Value::from("/*"),
                ]),
            ]),
    )?;
    provider.add_to_role_policy(
        stack,
        PolicyStatement::allow()
            .actions([
                "s3:GetObject*",
                "s3:GetBucket*",
                "s3:List*",
                "s3:DeleteObject*",
                "s3:PutObject",
                "s3:PutObjectLegalHold",
                "s3:PutObjectRetention",
                "s3:PutObjectTagging",
                "s3:PutObjectVersionTagging",
                "s3:Abort*",
            ])
            .resources([bucket.arn.clone(), bucket.arn_for_objects("*")]),
    )?;
    provider.add_to_role_policy(
        stack,
        PolicyStatement::allow()
            .actions(["cloudfront:GetInvalidation", "cloudfront:CreateInvalidation"])
            .resource("*"),
    )?;

    CustomResource::new(
        stack,
        &scope.child("Deployment").child("CustomResource"),
        "Custom::CDKBucketDeployment",
        provider.arn(),
        json!({
            "DestinationBucketName": bucket.name,
            "DistributionId": distribution_id,
            "DistributionPaths": ["/*"],
            "Prune": true,
            "SourceBucketNames": [Asset::bucket_name()],
            "SourceObjectKeys": [source.object_key()],
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixture_stack;

    fn managed_props() -> ConsoleProps {
        ConsoleProps {
            bucket_name: Some("philcali-pits-console".into()),
            certificate: Some(Certificate::from_id("a8492ec1-ec0e-42e2-b782-2491a6e8c5f1")),
            hosted_zone: Some(HostedZone::from_attributes("Z0039617ZTGC84RIQHA5", "pits.philcali.me")),
            domain_names: Some(vec!["console.pits.philcali.me".into()]),
            ..Default::default()
        }
    }

    #[test]
    fn test_rejects_bucket_and_bucket_name() {
        let (mut stack, _assets) = fixture_stack("Test");
        let err = Console::new(
            &mut stack,
            &Scope::new("Console"),
            ConsoleProps {
                bucket: Some(Bucket::from_name(&Scope::new("Existing"), "some-bucket")),
                bucket_name: Some("other-bucket".into()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("Cannot specify both a bucket and a bucketName."));
        assert_eq!(stack.resource_count(), 0);
    }

    #[test]
    fn test_rejects_distribution_with_managed_properties() {
        let (mut stack, _assets) = fixture_stack("Test");
        let err = Console::new(
            &mut stack,
            &Scope::new("Console"),
            ConsoleProps {
                distribution: Some(ExistingDistribution {
                    distribution_id: json!("E123"),
                    domain_name: json!("d123.cloudfront.net"),
                }),
                domain_names: Some(vec!["console.example.com".into()]),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(err.is_declaration_error());
        assert!(err.to_string().contains("properties for a managed distribution"));
    }

    #[test]
    fn test_managed_distribution() {
        let (mut stack, _assets) = fixture_stack("Test");
        let console = Console::new(&mut stack, &Scope::new("Console"), managed_props()).unwrap();

        let bucket = stack.resource("ConsoleContent").unwrap();
        assert_eq!(bucket.properties["BucketName"], "philcali-pits-console");
        assert_eq!(
            bucket.properties["CorsConfiguration"]["CorsRules"][0]["AllowedMethods"],
            json!(["GET", "HEAD"])
        );

        let distribution = stack.resource("ConsoleDistribution").unwrap();
        let config = &distribution.properties["DistributionConfig"];
        assert_eq!(config["PriceClass"], "PriceClass_100");
        assert_eq!(config["HttpVersion"], "http1.1");
        assert_eq!(config["DefaultCacheBehavior"]["ViewerProtocolPolicy"], "https-only");
        assert_eq!(config["ViewerCertificate"]["MinimumProtocolVersion"], "TLSv1.2_2021");
        assert_eq!(config["Aliases"], json!(["console.pits.philcali.me"]));
        for response in config["CustomErrorResponses"].as_array().unwrap() {
            assert_eq!(response["ResponseCode"], 200);
            assert_eq!(response["ResponsePagePath"], "/index.html");
            assert_eq!(response["ErrorCachingMinTTL"], 300);
        }
        assert_eq!(console.distribution_id, json!({"Ref": "ConsoleDistribution"}));

        let policy = stack.resource("ConsoleContentPolicy").unwrap();
        assert_eq!(
            policy.properties["PolicyDocument"]["Statement"][0]["Principal"]["CanonicalUser"],
            get_att("ConsoleDistributionOrigin1S3Origin", "S3CanonicalUserId")
        );
        stack.validate().unwrap();
    }

    #[test]
    fn test_cname_per_domain() {
        let (mut stack, _assets) = fixture_stack("Test");
        let mut props = managed_props();
        props.domain_names = Some(vec!["console.pits.philcali.me".into(), "www.pits.philcali.me".into()]);
        Console::new(&mut stack, &Scope::new("Console"), props).unwrap();

        let first = stack.resource("ConsoleDistributionCNAME1").unwrap();
        assert_eq!(first.properties["Name"], "console.pits.philcali.me.");
        assert_eq!(first.properties["TTL"], "300");
        assert_eq!(
            first.properties["ResourceRecords"],
            json!([{"Fn::GetAtt": ["ConsoleDistribution", "DomainName"]}])
        );
        assert!(stack.contains("ConsoleDistributionCNAME2"));
        assert!(!stack.contains("ConsoleDistributionCNAME3"));
    }

    #[test]
    fn test_deployment_invalidates_everything() {
        let (mut stack, _assets) = fixture_stack("Test");
        let console = Console::new(&mut stack, &Scope::new("Console"), ConsoleProps::default()).unwrap();

        let deployment = stack.resource(&console.deployment.logical_id).unwrap();
        assert_eq!(deployment.resource_type, "Custom::CDKBucketDeployment");
        assert_eq!(deployment.properties["DistributionPaths"], json!(["/*"]));
        assert_eq!(deployment.properties["DestinationBucketName"], json!({"Ref": "ConsoleContent"}));
        assert!(stack.assets().any(|asset| asset.path.ends_with("console")));
        assert!(stack.contains("BucketDeploymentHandler"));

        let distribution = stack.resource("ConsoleDistribution").unwrap();
        assert!(distribution.properties["DistributionConfig"].get("ViewerCertificate").is_none());
    }

    #[test]
    fn test_existing_distribution_and_bucket() {
        let (mut stack, _assets) = fixture_stack("Test");
        let console = Console::new(
            &mut stack,
            &Scope::new("Console"),
            ConsoleProps {
                bucket: Some(Bucket::from_name(&Scope::new("Shared"), "shared-console")),
                distribution: Some(ExistingDistribution {
                    distribution_id: json!("E123"),
                    domain_name: json!("d123.cloudfront.net"),
                }),
                ..Default::default()
            },
        )
        .unwrap();

        assert!(!stack.contains("ConsoleDistribution"));
        assert!(!stack.contains("ConsoleContent"));
        let deployment = stack.resource(&console.deployment.logical_id).unwrap();
        assert_eq!(deployment.properties["DistributionId"], "E123");
        assert_eq!(deployment.properties["DestinationBucketName"], "shared-console");
    }
}
