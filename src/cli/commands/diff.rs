//! Diff command
//!
//! Compares freshly rendered stacks with the templates of a previous synth.

use super::{CommandContext, Runnable};
use anyhow::Result;
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;

/// Arguments for the diff command
#[derive(Parser, Debug, Clone)]
pub struct DiffArgs {
    /// Cloud assembly directory to compare against
    #[arg(short = 'o', long, default_value = "cdk.out")]
    pub out: PathBuf,

    /// Exit with 1 when any stack changed
    #[arg(long)]
    pub exit_code: bool,
}

#[async_trait::async_trait]
impl Runnable for DiffArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        let app = ctx.build_app()?;
        let assembly = app.synth()?;
        let diffs = assembly.diff(&self.out).await?;
        let changed = diffs.iter().filter(|diff| diff.has_changes()).count();

        if ctx.output.is_json() {
            ctx.output.document(&json!({
                "type": "diff",
                "out": self.out,
                "changed": changed,
                "stacks": diffs,
            }));
        } else {
            ctx.output
                .section(&format!("Changes against {}", self.out.display()));
            for diff in &diffs {
                ctx.output.stack_diff(diff);
            }
            if changed == 0 {
                ctx.output.success("All stacks are up to date");
            }
        }

        Ok(if self.exit_code && changed > 0 { 1 } else { 0 })
    }
}
