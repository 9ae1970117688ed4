//! Graph command
//!
//! Prints the stack dependency graph, or the resource graph of one stack,
//! in Graphviz DOT format.

use super::{CommandContext, Runnable};
use anyhow::{anyhow, Result};
use clap::Parser;
use serde_json::json;

/// Arguments for the graph command
#[derive(Parser, Debug, Clone)]
pub struct GraphArgs {
    /// Show the resources of this stack instead of the stacks
    #[arg(long)]
    pub stack: Option<String>,
}

#[async_trait::async_trait]
impl Runnable for GraphArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        let app = ctx.build_app()?;

        let (name, graph) = match &self.stack {
            Some(name) => {
                let stack = app.stack(name).ok_or_else(|| {
                    anyhow!(
                        "Unknown stack '{}', expected one of: {}",
                        name,
                        app.stack_names().join(", ")
                    )
                })?;
                (name.clone(), stack.dependency_graph()?)
            }
            None => ("pits".to_string(), app.stack_graph()?),
        };

        let dot = graph.to_dot(&name);
        if ctx.output.is_json() {
            let order = graph.creation_order()?;
            ctx.output.document(&json!({
                "type": "graph",
                "name": name,
                "order": order,
                "dot": dot,
            }));
        } else {
            ctx.output.raw(&dot);
        }
        Ok(0)
    }
}
