//! Subcommands module for the pits-infra CLI
//!
//! This module contains all the subcommand implementations.

pub mod diff;
pub mod graph;
pub mod list;
pub mod synth;

use crate::cli::output::OutputFormatter;
use anyhow::Result;
use pits_infra::{App, Config, PitsInfra};

/// Common context shared between commands
pub struct CommandContext {
    /// Configuration
    pub config: Config,
    /// Output formatter
    pub output: OutputFormatter,
    /// Verbosity level
    pub verbosity: u8,
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &crate::cli::Cli, config: Config) -> Self {
        let output = OutputFormatter::new(!cli.no_color, cli.is_json(), cli.verbosity());

        Self {
            config,
            output,
            verbosity: cli.verbosity(),
        }
    }

    /// Declares every enabled stack
    pub fn build_app(&self) -> pits_infra::Result<App> {
        PitsInfra::build(&self.config)
    }
}

/// Trait for runnable commands
#[async_trait::async_trait]
pub trait Runnable {
    /// Execute the command
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32>;
}
