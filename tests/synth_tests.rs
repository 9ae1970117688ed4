//! End-to-end synthesis tests
//!
//! These tests build whole deployments from configuration and inspect the
//! rendered templates, the export wiring between stacks and the cloud
//! assembly written to disk.

mod common;

use common::*;
use pits_infra::app::{export_name, template_file, MANIFEST_FILE};
use pits_infra::pits::orchestrator::{
    AUTHORIZATION_STACK, CONSOLE_STACK, DATA_SERVICE_STACK, DEVICE_CONNECTION_STACK,
    DEVICE_HEALTH_STACK, RESOURCE_SERVICE_STACK,
};
use pits_infra::{Error, PitsInfra};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn device_template(bucket_name: &str) -> (Value, tempfile::TempDir) {
    let assets = assets_dir();
    let mut config = config_for(&assets);
    config.device.bucket_name = bucket_name.to_string();
    let app = PitsInfra::build(&config).unwrap();
    let template = rendered(app.stack(DEVICE_CONNECTION_STACK).unwrap());
    (template, assets)
}

// ============================================================================
// Device connection
// ============================================================================

#[test]
fn test_device_stack_exports_bucket_and_role() {
    let (template, _assets) = device_template("farts-mcgeehee");

    let buckets = resources_of_type(&template, "AWS::S3::Bucket");
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].1["Properties"]["BucketName"], "farts-mcgeehee");

    let roles = resources_of_type(&template, "AWS::IAM::Role");
    let device_roles = roles
        .iter()
        .filter(|(_, role)| role["Properties"]["RoleName"] == "PinTheSkyRole")
        .count();
    assert_eq!(device_roles, 1);

    let output = &template["Outputs"]["BucketName"];
    assert_eq!(
        output["Export"]["Name"],
        export_name(DEVICE_CONNECTION_STACK, "BucketName")
    );
    assert_eq!(output["Value"], json!({"Ref": buckets[0].0}));
}

#[test]
fn test_upload_policy_is_scoped_to_prefixes() {
    let (template, _assets) = device_template("farts-mcgeehee");

    let upload = resources_of_type(&template, "AWS::IAM::ManagedPolicy")
        .into_iter()
        .map(|(_, policy)| &policy["Properties"]["PolicyDocument"]["Statement"][0])
        .find(|statement| statement["Action"] == json!(["s3:PutObject*", "s3:Abort*"]))
        .expect("upload policy");

    let resources = upload["Resource"].as_array().unwrap();
    let suffixes: Vec<&str> = resources
        .iter()
        .map(|arn| arn["Fn::Join"][1][1].as_str().unwrap())
        .collect();
    assert_eq!(suffixes, vec!["/motion_videos/*", "/capture_images/*"]);
    assert!(!suffixes.contains(&"/*"));
}

#[test]
fn test_device_outputs_for_provisioning() {
    let (template, _assets) = device_template("farts-mcgeehee");
    let outputs = template["Outputs"].as_object().unwrap();
    for id in ["CredentialsEndpoint", "RoleAliasName", "ThingPolicyName", "DataEndpoint"] {
        assert!(outputs.contains_key(id), "missing output {}", id);
    }
    assert_eq!(template["Outputs"]["RoleAliasName"]["Value"], "PinTheSkyRoleAlias");
    assert_eq!(template["Outputs"]["ThingPolicyName"]["Value"], "PinTheSkyThingPolicy");
}

// ============================================================================
// Stack composition
// ============================================================================

#[test]
fn test_full_deployment_declares_six_stacks() {
    let assets = assets_dir();
    let app = PitsInfra::build(&config_for(&assets)).unwrap();

    let mut names = app.stack_names();
    names.sort();
    let mut expected = vec![
        AUTHORIZATION_STACK,
        CONSOLE_STACK,
        DATA_SERVICE_STACK,
        DEVICE_CONNECTION_STACK,
        DEVICE_HEALTH_STACK,
        RESOURCE_SERVICE_STACK,
    ];
    expected.sort();
    assert_eq!(names, expected);

    let teardown = app.teardown_order().unwrap();
    let mut deploy = app.deploy_order().unwrap();
    deploy.reverse();
    assert_eq!(teardown, deploy);
}

#[test]
fn test_imports_resolve_to_exports() {
    let assets = assets_dir();
    let app = PitsInfra::build(&config_for(&assets)).unwrap();
    let assembly = app.synth().unwrap();

    let health = assembly.stack(DEVICE_HEALTH_STACK).unwrap();
    assert_eq!(health.dependencies, vec![RESOURCE_SERVICE_STACK.to_string()]);

    let data = assembly.stack(DATA_SERVICE_STACK).unwrap();
    for prerequisite in [AUTHORIZATION_STACK, DEVICE_CONNECTION_STACK, RESOURCE_SERVICE_STACK] {
        assert!(
            data.dependencies.iter().any(|name| name == prerequisite),
            "{} should depend on {}",
            DATA_SERVICE_STACK,
            prerequisite
        );
    }

    assert!(assembly.stack(DEVICE_CONNECTION_STACK).unwrap().dependencies.is_empty());
    assert!(assembly.stack(CONSOLE_STACK).unwrap().dependencies.is_empty());
}

#[test]
fn test_authorizer_only_with_authorization() {
    let assets = assets_dir();
    let app = PitsInfra::build(&config_for(&assets)).unwrap();
    let template = rendered(app.stack(RESOURCE_SERVICE_STACK).unwrap());
    let authorizers = resources_of_type(&template, "AWS::ApiGatewayV2::Authorizer");
    assert_eq!(authorizers.len(), 1);
    assert_eq!(authorizers[0].1["Properties"]["AuthorizerType"], "JWT");

    let mut config = config_for(&assets);
    config.authorization.enabled = false;
    config.data_plane.enabled = false;
    let app = PitsInfra::build(&config).unwrap();
    assert!(app.stack(AUTHORIZATION_STACK).is_none());

    let template = rendered(app.stack(RESOURCE_SERVICE_STACK).unwrap());
    assert!(resources_of_type(&template, "AWS::ApiGatewayV2::Authorizer").is_empty());
    for (_, route) in resources_of_type(&template, "AWS::ApiGatewayV2::Route") {
        assert!(route["Properties"].get("AuthorizerId").is_none());
    }
}

#[test]
fn test_disabled_sections_are_skipped() {
    let assets = assets_dir();
    let mut config = config_for(&assets);
    config.authorization.enabled = false;
    config.resource_api.enabled = false;
    config.data_plane.enabled = false;
    config.health.enabled = false;
    config.console.enabled = false;

    let app = PitsInfra::build(&config).unwrap();
    assert_eq!(app.stack_names(), vec![DEVICE_CONNECTION_STACK.to_string()]);
}

#[test]
fn test_health_requires_resource_api() {
    let assets = assets_dir();
    let mut config = config_for(&assets);
    config.resource_api.enabled = false;
    config.data_plane.enabled = false;

    let err = PitsInfra::build(&config).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig { .. }));
    assert!(err.to_string().contains("health.enabled"));
    assert_eq!(err.exit_code(), 4);
}

#[test]
fn test_missing_artifacts_are_reported() {
    let assets = tempfile::TempDir::new().unwrap();
    let err = PitsInfra::build(&config_for(&assets)).unwrap_err();
    assert!(matches!(err, Error::AssetNotFound(_)));
    assert_eq!(err.exit_code(), 5);
}

// ============================================================================
// Custom domains
// ============================================================================

#[test]
fn test_custom_domains_follow_zone() {
    let assets = assets_dir();
    let app = PitsInfra::build(&config_for(&assets)).unwrap();

    let console = rendered(app.stack(CONSOLE_STACK).unwrap());
    let distribution = &resources_of_type(&console, "AWS::CloudFront::Distribution")[0].1;
    assert_eq!(
        distribution["Properties"]["DistributionConfig"]["Aliases"],
        json!(["console.pits.philcali.me"])
    );

    let records = resources_of_type(&console, "AWS::Route53::RecordSet");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].1["Properties"]["Type"], "CNAME");
}

#[test]
fn test_no_zone_means_default_domains() {
    let assets = assets_dir();
    let mut config = config_for(&assets);
    config.dns.zone_name = None;
    config.dns.zone_id = None;
    config.dns.certificate_id = None;

    let app = PitsInfra::build(&config).unwrap();
    let console = rendered(app.stack(CONSOLE_STACK).unwrap());
    let distribution = &resources_of_type(&console, "AWS::CloudFront::Distribution")[0].1;
    assert!(distribution["Properties"]["DistributionConfig"]
        .get("Aliases")
        .is_none());

    for stack in app.stacks() {
        let template = rendered(stack);
        assert!(
            resources_of_type(&template, "AWS::Route53::RecordSet").is_empty(),
            "{} declared a record without a zone",
            stack.name()
        );
    }
}

// ============================================================================
// Determinism and the cloud assembly
// ============================================================================

#[test]
fn test_rendering_is_deterministic() {
    let assets = assets_dir();
    let config = config_for(&assets);

    let first = PitsInfra::build(&config).unwrap().synth().unwrap();
    let second = PitsInfra::build(&config).unwrap().synth().unwrap();
    assert_eq!(first.order(), second.order());
    for (a, b) in first.stacks.iter().zip(&second.stacks) {
        assert_eq!(
            a.template.to_json_string().unwrap(),
            b.template.to_json_string().unwrap()
        );
    }
    assert_eq!(first.manifest(), second.manifest());
}

#[test]
fn test_asset_change_changes_object_key() {
    let assets = assets_dir();
    let config = config_for(&assets);
    let before = PitsInfra::build(&config).unwrap().synth().unwrap();

    std::fs::write(assets.path().join("api.zip"), "a newer api package").unwrap();
    let after = PitsInfra::build(&config).unwrap().synth().unwrap();

    let key = |assembly: &pits_infra::CloudAssembly| {
        let template = serde_json::to_value(&assembly.stack(RESOURCE_SERVICE_STACK).unwrap().template).unwrap();
        template["Resources"]["ResourceServiceFunction"]["Properties"]["Code"]["S3Key"].clone()
    };
    assert_ne!(key(&before), key(&after));
}

#[tokio::test]
async fn test_write_assembly() {
    let assets = assets_dir();
    let out = tempfile::TempDir::new().unwrap();
    let assembly = PitsInfra::build(&config_for(&assets)).unwrap().synth().unwrap();

    let written = assembly.write(out.path()).await.unwrap();
    assert_eq!(written.len(), 7);
    assert!(out.path().join(MANIFEST_FILE).exists());
    for name in assembly.order() {
        assert!(out.path().join(template_file(&name)).exists());
    }

    let manifest: Value =
        serde_json::from_str(&std::fs::read_to_string(out.path().join(MANIFEST_FILE)).unwrap()).unwrap();
    assert_eq!(manifest["order"], json!(assembly.order()));
    assert_eq!(
        manifest["stacks"][DEVICE_CONNECTION_STACK]["templateFile"],
        template_file(DEVICE_CONNECTION_STACK)
    );

    let first = std::fs::read(out.path().join(template_file(CONSOLE_STACK))).unwrap();
    assembly.write(out.path()).await.unwrap();
    let second = std::fs::read(out.path().join(template_file(CONSOLE_STACK))).unwrap();
    assert_eq!(first, second);

    let diffs = assembly.diff(out.path()).await.unwrap();
    assert!(diffs.iter().all(|diff| !diff.has_changes()));
}
