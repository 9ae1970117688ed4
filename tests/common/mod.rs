//! Shared fixtures for the pits-infra integration tests.
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::fs;
use std::path::Path;

use serde_json::Value;
use tempfile::TempDir;

use pits_infra::aws::AssetRoot;
use pits_infra::config::Config;
use pits_infra::template::Stack;

/// Artifact layout the provisioners expect, relative to the assets root.
const PACKAGES: &[(&str, &str)] = &[
    (AssetRoot::AWS_API_PROVIDER, "index.js"),
    (AssetRoot::NOTIFICATIONS_PROVIDER, "index.py"),
    (AssetRoot::DEPLOYMENT_PROVIDER, "index.py"),
    (AssetRoot::IMAGE_DEPLOYMENT_PROVIDER, "bootstrap"),
    (AssetRoot::INDEX_CONVERSION_HANDLER, "index.py"),
    (AssetRoot::PUBLISH_MOTION_HANDLER, "index.py"),
    (AssetRoot::CHECK_HEALTH_HANDLER, "index.py"),
    (AssetRoot::CONSOLE_BUNDLE, "index.html"),
];

/// Populates `dir` with every build artifact.
pub fn write_assets(dir: &Path) {
    let root = AssetRoot::new(dir);
    fs::write(root.path(AssetRoot::API_PACKAGE), "api package").unwrap();
    for (package, file) in PACKAGES {
        let path = root.path(package);
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join(file), format!("// {}", package)).unwrap();
    }
    let image = root.path(AssetRoot::CONVERSION_IMAGE);
    fs::create_dir_all(image.parent().unwrap()).unwrap();
    fs::write(image, "conversion image").unwrap();
}

/// A temporary build directory with every artifact.
pub fn assets_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_assets(dir.path());
    dir
}

/// Default configuration pointed at `assets`.
pub fn config_for(assets: &TempDir) -> Config {
    let mut config = Config::default();
    config.assets.root = assets.path().to_path_buf();
    config
}

/// A standalone stack that can resolve artifacts from `assets`.
pub fn stack_with_assets(name: &str, assets: &TempDir) -> Stack {
    Stack::new(name).with_asset_root(AssetRoot::new(assets.path()))
}

/// Rendered template of `stack` as a JSON document.
pub fn rendered(stack: &Stack) -> Value {
    stack.to_value().unwrap()
}

/// Resources of `template` with the given type.
pub fn resources_of_type<'a>(template: &'a Value, resource_type: &str) -> Vec<(&'a String, &'a Value)> {
    template["Resources"]
        .as_object()
        .map(|resources| {
            resources
                .iter()
                .filter(|(_, resource)| resource["Type"] == resource_type)
                .collect()
        })
        .unwrap_or_default()
}
