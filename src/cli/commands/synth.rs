//! Synth command
//!
//! Renders every enabled stack and writes the cloud assembly: one template
//! per stack plus `manifest.json`.

use super::{CommandContext, Runnable};
use anyhow::Result;
use clap::Parser;
use pits_infra::aws::asset::run_build_command;
use serde_json::json;
use std::path::PathBuf;

/// Arguments for the synth command
#[derive(Parser, Debug, Clone)]
pub struct SynthArgs {
    /// Directory receiving the templates and manifest
    #[arg(short = 'o', long, default_value = "cdk.out")]
    pub out: PathBuf,

    /// Run the configured build command before hashing artifacts
    #[arg(long)]
    pub build: bool,
}

#[async_trait::async_trait]
impl Runnable for SynthArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        if self.build {
            match ctx.config.assets.build_command.as_deref() {
                Some(command) => {
                    let working_dir = std::env::current_dir()?;
                    ctx.output.info(&format!("Building artifacts: {}", command));
                    run_build_command(command, &working_dir).await?;
                }
                None => ctx
                    .output
                    .warning("--build given but assets.build_command is not configured"),
            }
        }

        let app = ctx.build_app()?;
        let assembly = app.synth()?;
        let written = assembly.write(&self.out).await?;

        if ctx.output.is_json() {
            let stacks: Vec<_> = assembly
                .stacks
                .iter()
                .map(|stack| {
                    json!({
                        "name": stack.name,
                        "resources": stack.template.resources.len(),
                        "outputs": stack.template.outputs.len(),
                        "dependencies": stack.dependencies,
                    })
                })
                .collect();
            ctx.output.document(&json!({
                "type": "synth",
                "out": self.out,
                "stacks": stacks,
                "files": written,
            }));
            return Ok(0);
        }

        ctx.output.section("Synthesized stacks");
        let rows: Vec<Vec<String>> = assembly
            .stacks
            .iter()
            .map(|stack| {
                vec![
                    stack.name.clone(),
                    stack.template.resources.len().to_string(),
                    stack.template.outputs.len().to_string(),
                    stack.assets.len().to_string(),
                ]
            })
            .collect();
        ctx.output
            .table(&["Stack", "Resources", "Outputs", "Assets"], &rows);
        if ctx.verbosity >= 2 {
            for path in &written {
                ctx.output.info(&format!("Wrote {}", path.display()));
            }
        }
        ctx.output.success(&format!(
            "Wrote {} files to {}",
            written.len(),
            self.out.display()
        ));
        Ok(0)
    }
}
