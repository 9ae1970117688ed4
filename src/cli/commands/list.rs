//! List command

use super::{CommandContext, Runnable};
use anyhow::Result;
use clap::Parser;
use serde_json::json;

/// Arguments for the list command
#[derive(Parser, Debug, Clone)]
pub struct ListArgs {
    /// Show teardown order instead of deploy order
    #[arg(long)]
    pub teardown: bool,
}

#[async_trait::async_trait]
impl Runnable for ListArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        let app = ctx.build_app()?;
        let order = if self.teardown {
            app.teardown_order()?
        } else {
            app.deploy_order()?
        };
        let graph = app.stack_graph()?;

        let mut rows = Vec::with_capacity(order.len());
        let mut entries = Vec::with_capacity(order.len());
        for name in &order {
            let Some(stack) = app.stack(name) else {
                continue;
            };
            let mut dependencies = graph.direct_dependencies(name);
            dependencies.sort();
            rows.push(vec![
                name.clone(),
                stack.resource_count().to_string(),
                dependencies.join(", "),
            ]);
            entries.push(json!({
                "name": name,
                "resources": stack.resource_count(),
                "dependencies": dependencies,
            }));
        }

        if ctx.output.is_json() {
            ctx.output.document(&json!({"type": "list", "stacks": entries}));
        } else {
            ctx.output
                .table(&["Stack", "Resources", "Depends on"], &rows);
        }
        Ok(0)
    }
}
