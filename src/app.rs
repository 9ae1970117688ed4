//! Applications and cloud assemblies.
//!
//! An [`App`] is the set of stacks deployed together. Stacks share values
//! through exports: the producer gains an exported output named
//! `<stack>:<output>` and the consumer embeds `Fn::ImportValue` of that name.
//! Deploy order follows those imports, so a consumer is never deployed before
//! the stack it imports from, and teardown runs the other way around.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{json, Value};

use crate::aws::Asset;
use crate::error::{Error, ErrorContext, Result};
use crate::template::diff::StackDiff;
use crate::template::intrinsic::import_value;
use crate::template::{DependencyGraph, EdgeKind, Stack, Template};

/// Manifest written next to the templates.
pub const MANIFEST_FILE: &str = "manifest.json";

const MANIFEST_VERSION: &str = "1";

/// Name of the export for `output_id` in `stack`.
pub fn export_name(stack: &str, output_id: &str) -> String {
    format!("{}:{}", stack, output_id)
}

/// File name of a stack's template inside an assembly directory.
pub fn template_file(stack: &str) -> String {
    format!("{}.template.json", stack)
}

/// Named stacks plus the dependencies between them.
#[derive(Debug, Default)]
pub struct App {
    stacks: IndexMap<String, Stack>,
    /// (dependent, prerequisite) pairs added explicitly
    dependencies: BTreeSet<(String, String)>,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stack(&mut self, stack: Stack) -> Result<()> {
        let name = stack.name().to_string();
        if self.stacks.contains_key(&name) {
            return Err(Error::DuplicateLogicalId {
                stack: "app".to_string(),
                logical_id: name,
            });
        }
        tracing::debug!("Added stack {}", name);
        self.stacks.insert(name, stack);
        Ok(())
    }

    pub fn stack(&self, name: &str) -> Option<&Stack> {
        self.stacks.get(name)
    }

    pub fn stack_mut(&mut self, name: &str) -> Result<&mut Stack> {
        self.stacks
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("stack {}", name)))
    }

    pub fn stacks(&self) -> impl Iterator<Item = &Stack> {
        self.stacks.values()
    }

    pub fn stack_names(&self) -> Vec<String> {
        self.stacks.keys().cloned().collect()
    }

    /// Exports `value` from `producer` and returns the import expression.
    ///
    /// Exporting the same value twice under one id returns the same import;
    /// a different value under an existing id is rejected.
    pub fn export(&mut self, producer: &str, output_id: &str, value: Value) -> Result<Value> {
        let name = export_name(producer, output_id);
        let stack = self.stack_mut(producer)?;
        match stack.output(output_id) {
            Some(existing) if existing.value == value => {}
            Some(_) => {
                return Err(Error::DuplicateLogicalId {
                    stack: producer.to_string(),
                    logical_id: output_id.to_string(),
                })
            }
            None => {
                stack.add_output(output_id, value, None)?;
                stack.export_output(output_id, name.clone())?;
                tracing::debug!("Exported {}", name);
            }
        }
        Ok(import_value(name))
    }

    /// Orders `dependent` after `prerequisite` without an import.
    pub fn add_dependency(&mut self, dependent: &str, prerequisite: &str) -> Result<()> {
        for name in [dependent, prerequisite] {
            if !self.stacks.contains_key(name) {
                return Err(Error::NotFound(format!("stack {}", name)));
            }
        }
        self.dependencies
            .insert((dependent.to_string(), prerequisite.to_string()));
        Ok(())
    }

    /// Stack level graph built from imports and explicit dependencies.
    pub fn stack_graph(&self) -> Result<DependencyGraph> {
        let exports: BTreeMap<String, String> = self
            .stacks
            .values()
            .flat_map(|stack| {
                stack.outputs().filter_map(move |(_, output)| {
                    output
                        .export_name
                        .clone()
                        .map(|name| (name, stack.name().to_string()))
                })
            })
            .collect();

        let mut graph = DependencyGraph::new();
        for name in self.stacks.keys() {
            graph.add_node(name.clone(), "Stack");
        }
        for (name, stack) in &self.stacks {
            for import in stack_imports(stack) {
                let producer = exports.get(&import).ok_or_else(|| Error::DanglingReference {
                    from: name.clone(),
                    to: import.clone(),
                })?;
                if producer != name {
                    graph.add_dependency(name, producer, EdgeKind::Export)?;
                }
            }
        }
        for (dependent, prerequisite) in &self.dependencies {
            graph.add_dependency(dependent, prerequisite, EdgeKind::Explicit)?;
        }
        Ok(graph)
    }

    pub fn deploy_order(&self) -> Result<Vec<String>> {
        self.stack_graph()?.creation_order()
    }

    pub fn teardown_order(&self) -> Result<Vec<String>> {
        self.stack_graph()?.teardown_order()
    }

    /// Renders every stack in deploy order.
    pub fn synth(&self) -> Result<CloudAssembly> {
        let graph = self.stack_graph()?;
        let order = graph.creation_order()?;

        let mut stacks = Vec::with_capacity(order.len());
        for name in &order {
            let stack = self
                .stacks
                .get(name)
                .ok_or_else(|| Error::NotFound(format!("stack {}", name)))?;
            let mut dependencies = graph.direct_dependencies(name);
            dependencies.sort();
            stacks.push(SynthesizedStack {
                name: name.clone(),
                template: stack.render()?,
                dependencies,
                assets: stack.assets().cloned().collect(),
            });
            tracing::debug!("Rendered {} ({} resources)", name, stack.resource_count());
        }
        tracing::info!("Synthesized {} stacks", stacks.len());
        Ok(CloudAssembly { stacks })
    }
}

/// Export names a stack imports.
fn stack_imports(stack: &Stack) -> BTreeSet<String> {
    let mut imports = BTreeSet::new();
    for (_, resource) in stack.resources() {
        for value in resource.properties.values() {
            collect_imports(value, &mut imports);
        }
    }
    for (_, output) in stack.outputs() {
        collect_imports(&output.value, &mut imports);
    }
    imports
}

fn collect_imports(value: &Value, imports: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(name)) = map.get("Fn::ImportValue") {
                imports.insert(name.clone());
                return;
            }
            map.values().for_each(|v| collect_imports(v, imports));
        }
        Value::Array(items) => items.iter().for_each(|v| collect_imports(v, imports)),
        _ => {}
    }
}

/// A rendered stack.
#[derive(Debug, Clone, Serialize)]
pub struct SynthesizedStack {
    pub name: String,
    pub template: Template,
    /// Stacks this one imports from, sorted
    pub dependencies: Vec<String>,
    pub assets: Vec<Asset>,
}

/// Every rendered stack, in deploy order.
#[derive(Debug, Clone)]
pub struct CloudAssembly {
    pub stacks: Vec<SynthesizedStack>,
}

impl CloudAssembly {
    pub fn stack(&self, name: &str) -> Option<&SynthesizedStack> {
        self.stacks.iter().find(|stack| stack.name == name)
    }

    pub fn order(&self) -> Vec<String> {
        self.stacks.iter().map(|stack| stack.name.clone()).collect()
    }

    pub fn manifest(&self) -> Value {
        let stacks: serde_json::Map<String, Value> = self
            .stacks
            .iter()
            .map(|stack| {
                let assets: Vec<Value> = stack.assets.iter().map(Asset::manifest_entry).collect();
                (
                    stack.name.clone(),
                    json!({
                        "assets": assets,
                        "dependencies": stack.dependencies,
                        "templateFile": template_file(&stack.name),
                    }),
                )
            })
            .collect();
        json!({
            "order": self.order(),
            "stacks": stacks,
            "version": MANIFEST_VERSION,
        })
    }

    /// Writes every template and the manifest into `dir`.
    ///
    /// Returns the files written. Output is deterministic, so writing the
    /// same assembly twice leaves identical bytes.
    pub async fn write(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let mut written = Vec::with_capacity(self.stacks.len() + 1);
        for stack in &self.stacks {
            let path = dir.join(template_file(&stack.name));
            tokio::fs::write(&path, stack.template.to_json_string()?)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            written.push(path);
        }

        let path = dir.join(MANIFEST_FILE);
        let mut manifest = serde_json::to_string_pretty(&self.manifest())?;
        manifest.push('\n');
        tokio::fs::write(&path, manifest)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        written.push(path);

        tracing::info!("Wrote cloud assembly to {}", dir.display());
        Ok(written)
    }

    /// Compares each stack with the template previously written to `dir`.
    pub async fn diff(&self, dir: &Path) -> Result<Vec<StackDiff>> {
        let mut diffs = Vec::with_capacity(self.stacks.len());
        for stack in &self.stacks {
            let path = dir.join(template_file(&stack.name));
            let previous: Option<Value> = match tokio::fs::read_to_string(&path).await {
                Ok(content) => Some(serde_json::from_str(&content)?),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(e.into()),
            };
            let current = serde_json::to_value(&stack.template)?;
            diffs.push(StackDiff::compute(stack.name.clone(), previous.as_ref(), &current));
        }
        Ok(diffs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{Resource, Scope};

    fn app_with_import() -> App {
        let mut app = App::new();
        let mut producer = Stack::new("Producer");
        producer
            .declare(&Scope::new("Table"), Resource::new("AWS::DynamoDB::Table"))
            .unwrap();
        app.add_stack(producer).unwrap();
        app.add_stack(Stack::new("Consumer")).unwrap();

        let table = app
            .export("Producer", "TableName", json!({"Ref": "Table"}))
            .unwrap();
        app.stack_mut("Consumer")
            .unwrap()
            .declare(
                &Scope::new("Queue"),
                Resource::new("AWS::SQS::Queue").property("QueueName", table),
            )
            .unwrap();
        app
    }

    #[test]
    fn test_export_returns_import() {
        let mut app = app_with_import();
        let again = app
            .export("Producer", "TableName", json!({"Ref": "Table"}))
            .unwrap();
        assert_eq!(again, json!({"Fn::ImportValue": "Producer:TableName"}));
        let output = app.stack("Producer").unwrap().output("TableName").unwrap();
        assert_eq!(output.export_name.as_deref(), Some("Producer:TableName"));

        let err = app.export("Producer", "TableName", json!("other")).unwrap_err();
        assert!(matches!(err, Error::DuplicateLogicalId { .. }));
    }

    #[test]
    fn test_imports_order_stacks() {
        let app = app_with_import();
        assert_eq!(app.deploy_order().unwrap(), vec!["Producer", "Consumer"]);
        assert_eq!(app.teardown_order().unwrap(), vec!["Consumer", "Producer"]);
    }

    #[test]
    fn test_cycle_rejected() {
        let mut app = app_with_import();
        app.add_dependency("Producer", "Consumer").unwrap();
        let err = app.deploy_order().unwrap_err();
        assert!(matches!(err, Error::DependencyCycle { .. }));
    }

    #[test]
    fn test_dangling_import() {
        let mut app = App::new();
        let mut stack = Stack::new("Lonely");
        stack
            .declare(
                &Scope::new("Queue"),
                Resource::new("AWS::SQS::Queue").property("QueueName", import_value("Gone:Name")),
            )
            .unwrap();
        app.add_stack(stack).unwrap();
        assert!(matches!(
            app.synth().unwrap_err(),
            Error::DanglingReference { .. }
        ));
    }

    #[test]
    fn test_duplicate_stack() {
        let mut app = App::new();
        app.add_stack(Stack::new("A")).unwrap();
        assert!(app.add_stack(Stack::new("A")).is_err());
    }

    #[test]
    fn test_manifest_lists_dependencies() {
        let assembly = app_with_import().synth().unwrap();
        let manifest = assembly.manifest();
        assert_eq!(manifest["order"], json!(["Producer", "Consumer"]));
        assert_eq!(manifest["stacks"]["Consumer"]["dependencies"], json!(["Producer"]));
        assert_eq!(
            manifest["stacks"]["Producer"]["templateFile"],
            "Producer.template.json"
        );
    }

    #[tokio::test]
    async fn test_write_then_diff() {
        let dir = tempfile::tempdir().unwrap();
        let assembly = app_with_import().synth().unwrap();

        let before = assembly.diff(dir.path()).await.unwrap();
        assert!(before.iter().all(|diff| diff.new_stack));

        let written = assembly.write(dir.path()).await.unwrap();
        assert_eq!(written.len(), 3);
        let first = std::fs::read(dir.path().join("Producer.template.json")).unwrap();
        assembly.write(dir.path()).await.unwrap();
        let second = std::fs::read(dir.path().join("Producer.template.json")).unwrap();
        assert_eq!(first, second);

        let after = assembly.diff(dir.path()).await.unwrap();
        assert!(after.iter().all(|diff| !diff.has_changes()));
    }
}
