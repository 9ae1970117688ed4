//! CloudFormation template model.
//!
//! A [`Stack`] is the unit of deployment: an ordered set of resource
//! declarations plus outputs. Rendering validates the declarations as a
//! dependency graph and produces a deterministic JSON template.
//!
//! ## Features
//!
//! - Insertion-ordered resources, sorted property keys
//! - Logical ids derived from construct scope paths
//! - Reference validation and cycle detection before anything is written
//! - Build artifacts registered per stack for the asset manifest

pub mod arn;
pub mod diff;
pub mod graph;
pub mod intrinsic;

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::aws::asset::{Asset, AssetRoot};
use crate::error::{Error, Result};

pub use arn::{format_arn, Arn, ArnFormat};
pub use graph::{DependencyGraph, EdgeKind};

/// Template format version emitted in every template.
pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// Construct path used to derive logical ids.
///
/// `Scope::new("Storage").child("Bucket")` has the logical id `StorageBucket`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    path: Vec<String>,
}

impl Scope {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            path: vec![id.into()],
        }
    }

    pub fn child(&self, id: impl Into<String>) -> Self {
        let mut path = self.path.clone();
        path.push(id.into());
        Self { path }
    }

    /// Last path segment.
    pub fn id(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }

    /// Slash separated construct path.
    pub fn path(&self) -> String {
        self.path.join("/")
    }

    /// Concatenated path with non-alphanumerics stripped.
    pub fn logical_id(&self) -> String {
        self.path
            .iter()
            .flat_map(|segment| segment.chars())
            .filter(char::is_ascii_alphanumeric)
            .collect()
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// What happens to the physical resource when its declaration is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RemovalPolicy {
    Delete,
    Retain,
}

/// A single resource declaration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    /// CloudFormation resource type
    #[serde(rename = "Type")]
    pub resource_type: String,
    /// Resource properties
    #[serde(rename = "Properties", skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    /// Explicit creation dependencies
    #[serde(rename = "DependsOn", skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<String>,
    #[serde(rename = "UpdateReplacePolicy", skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<RemovalPolicy>,
    #[serde(rename = "DeletionPolicy", skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<RemovalPolicy>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties: Map::new(),
            depends_on: BTreeSet::new(),
            update_replace_policy: None,
            deletion_policy: None,
        }
    }

    /// Sets a property. `null` values are dropped.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Merges every key of a JSON object into the properties.
    pub fn properties(mut self, properties: Value) -> Self {
        if let Value::Object(map) = properties {
            for (key, value) in map {
                self.set(key, value);
            }
        }
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let value = value.into();
        let key = key.into();
        if value.is_null() {
            self.properties.remove(&key);
        } else {
            self.properties.insert(key, value);
        }
    }

    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        self.depends_on.insert(logical_id.into());
        self
    }

    pub fn removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.update_replace_policy = Some(policy);
        self.deletion_policy = Some(policy);
        self
    }
}

/// A stack output, optionally exported for other stacks.
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub value: Value,
    pub description: Option<String>,
    pub export_name: Option<String>,
}

impl Output {
    fn to_json(&self) -> Value {
        let mut output = Map::new();
        if let Some(description) = &self.description {
            output.insert("Description".into(), Value::String(description.clone()));
        }
        if let Some(name) = &self.export_name {
            output.insert("Export".into(), json!({ "Name": name }));
        }
        output.insert("Value".into(), self.value.clone());
        Value::Object(output)
    }
}

/// A deployable unit of resource declarations.
#[derive(Debug, Clone)]
pub struct Stack {
    name: String,
    description: Option<String>,
    resources: IndexMap<String, Resource>,
    outputs: IndexMap<String, Output>,
    assets: IndexMap<String, Asset>,
    asset_root: Option<AssetRoot>,
}

impl Stack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            resources: IndexMap::new(),
            outputs: IndexMap::new(),
            assets: IndexMap::new(),
            asset_root: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Directory that build artifacts and provider packages are resolved from.
    pub fn with_asset_root(mut self, root: AssetRoot) -> Self {
        self.asset_root = Some(root);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn asset_root(&self) -> Result<&AssetRoot> {
        self.asset_root
            .as_ref()
            .ok_or_else(|| Error::ProviderNotConfigured(format!("asset root for {}", self.name)))
    }

    /// Declares a resource under the given logical id.
    pub fn add_resource(&mut self, logical_id: impl Into<String>, resource: Resource) -> Result<String> {
        let logical_id = logical_id.into();
        if self.resources.contains_key(&logical_id) {
            return Err(Error::DuplicateLogicalId {
                stack: self.name.clone(),
                logical_id,
            });
        }
        tracing::debug!(
            "Declared {} '{}' in {}",
            resource.resource_type,
            logical_id,
            self.name
        );
        self.resources.insert(logical_id.clone(), resource);
        Ok(logical_id)
    }

    /// Declares a resource at the logical id of a scope.
    pub fn declare(&mut self, scope: &Scope, resource: Resource) -> Result<String> {
        self.add_resource(scope.logical_id(), resource)
    }

    pub fn contains(&self, logical_id: &str) -> bool {
        self.resources.contains_key(logical_id)
    }

    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.get(logical_id)
    }

    pub fn resource_mut(&mut self, logical_id: &str) -> Result<&mut Resource> {
        self.resources
            .get_mut(logical_id)
            .ok_or_else(|| Error::NotFound(format!("{}/{}", self.name, logical_id)))
    }

    /// Resources in declaration order.
    pub fn resources(&self) -> impl Iterator<Item = (&String, &Resource)> {
        self.resources.iter()
    }

    /// Resources of a given type in declaration order.
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Resource)> + 'a {
        self.resources
            .iter()
            .filter(move |(_, resource)| resource.resource_type == resource_type)
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Makes `dependent` wait for `prerequisite`.
    pub fn add_dependency(&mut self, dependent: &str, prerequisite: &str) -> Result<()> {
        if !self.contains(prerequisite) {
            return Err(Error::DanglingReference {
                from: dependent.to_string(),
                to: prerequisite.to_string(),
            });
        }
        self.resource_mut(dependent)?
            .depends_on
            .insert(prerequisite.to_string());
        Ok(())
    }

    pub fn add_output(
        &mut self,
        output_id: impl Into<String>,
        value: Value,
        description: Option<String>,
    ) -> Result<()> {
        let output_id = output_id.into();
        if self.outputs.contains_key(&output_id) {
            return Err(Error::DuplicateLogicalId {
                stack: self.name.clone(),
                logical_id: output_id,
            });
        }
        self.outputs.insert(
            output_id,
            Output {
                value,
                description,
                export_name: None,
            },
        );
        Ok(())
    }

    /// Marks an output as exported under `export_name`.
    pub fn export_output(&mut self, output_id: &str, export_name: impl Into<String>) -> Result<()> {
        let output = self
            .outputs
            .get_mut(output_id)
            .ok_or_else(|| Error::NotFound(format!("{}/{}", self.name, output_id)))?;
        output.export_name = Some(export_name.into());
        Ok(())
    }

    pub fn output(&self, output_id: &str) -> Option<&Output> {
        self.outputs.get(output_id)
    }

    pub fn outputs(&self) -> impl Iterator<Item = (&String, &Output)> {
        self.outputs.iter()
    }

    /// Registers a build artifact, deduplicated by content hash.
    pub fn add_asset(&mut self, asset: Asset) -> Asset {
        self.assets
            .entry(asset.hash.clone())
            .or_insert(asset)
            .clone()
    }

    pub fn assets(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values()
    }

    /// Builds the resource dependency graph, rejecting references to
    /// undeclared resources.
    pub fn dependency_graph(&self) -> Result<DependencyGraph> {
        let mut graph = DependencyGraph::new();
        for (logical_id, resource) in &self.resources {
            graph.add_node(logical_id.clone(), resource.resource_type.clone());
        }

        for (logical_id, resource) in &self.resources {
            let properties = Value::Object(resource.properties.clone());
            for target in intrinsic::references(&properties) {
                graph.add_dependency(logical_id, &target, EdgeKind::Reference)?;
            }
            for target in &resource.depends_on {
                graph.add_dependency(logical_id, target, EdgeKind::Explicit)?;
            }
        }

        for (output_id, output) in &self.outputs {
            if let Some(target) = intrinsic::references(&output.value)
                .into_iter()
                .find(|target| !graph.contains(target))
            {
                return Err(Error::DanglingReference {
                    from: output_id.clone(),
                    to: target,
                });
            }
        }

        Ok(graph)
    }

    /// Validates the stack: no dangling references, no cycles.
    pub fn validate(&self) -> Result<()> {
        let graph = self.dependency_graph()?;
        if let Some(members) = graph.cycles().into_iter().next() {
            return Err(Error::DependencyCycle { members });
        }
        Ok(())
    }

    /// Renders the template document.
    pub fn render(&self) -> Result<Template> {
        self.validate()?;

        Ok(Template {
            format_version: TEMPLATE_FORMAT_VERSION.to_string(),
            description: self.description.clone(),
            resources: self.resources.clone(),
            outputs: self
                .outputs
                .iter()
                .map(|(id, output)| (id.clone(), output.to_json()))
                .collect(),
        })
    }

    /// Rendered template as a JSON value, for inspection.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.render()?)?)
    }

    /// Pretty JSON with a trailing newline, as written to disk.
    pub fn to_json_string(&self) -> Result<String> {
        self.render()?.to_json_string()
    }
}

/// A rendered template. Resources and outputs keep declaration order.
#[derive(Debug, Clone, Serialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "Resources")]
    pub resources: IndexMap<String, Resource>,
    #[serde(rename = "Outputs", skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, Value>,
}

impl Template {
    pub fn to_json_string(&self) -> Result<String> {
        let mut rendered = serde_json::to_string_pretty(self)?;
        rendered.push('\n');
        Ok(rendered)
    }
}
