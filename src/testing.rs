//! Shared fixtures for unit tests.

use std::fs;

use tempfile::TempDir;

use crate::aws::asset::AssetRoot;
use crate::template::Stack;

/// Writes a minimal build directory with every artifact the provisioners use.
pub(crate) fn fixture_assets() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = AssetRoot::new(dir.path());
    fs::write(root.path(AssetRoot::API_PACKAGE), "api package").unwrap();
    for (package, file) in [
        (AssetRoot::AWS_API_PROVIDER, "index.js"),
        (AssetRoot::NOTIFICATIONS_PROVIDER, "index.py"),
        (AssetRoot::DEPLOYMENT_PROVIDER, "index.py"),
        (AssetRoot::IMAGE_DEPLOYMENT_PROVIDER, "bootstrap"),
        (AssetRoot::INDEX_CONVERSION_HANDLER, "index.py"),
        (AssetRoot::PUBLISH_MOTION_HANDLER, "index.py"),
        (AssetRoot::CHECK_HEALTH_HANDLER, "index.py"),
        (AssetRoot::CONSOLE_BUNDLE, "index.html"),
    ] {
        let path = root.path(package);
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join(file), package).unwrap();
    }
    let image = root.path(AssetRoot::CONVERSION_IMAGE);
    fs::create_dir_all(image.parent().unwrap()).unwrap();
    fs::write(image, "conversion image").unwrap();
    dir
}

/// A stack whose asset root points at [`fixture_assets`].
pub(crate) fn fixture_stack(name: &str) -> (Stack, TempDir) {
    let assets = fixture_assets();
    let stack = Stack::new(name).with_asset_root(AssetRoot::new(assets.path()));
    (stack, assets)
}
