//! CLI module for pits-infra
//!
//! This module provides the command-line interface, including argument
//! parsing and subcommand handling.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Declares the Pi In The Sky infrastructure and renders it to
/// CloudFormation templates.
#[derive(Parser, Debug, Clone)]
#[command(name = "pits-infra")]
#[command(author = "Pi In The Sky Contributors")]
#[command(version)]
#[command(about = "Synthesize the Pi In The Sky cloud infrastructure", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(long, global = true, default_value = "human")]
    pub output: OutputFormat,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true, env = "PITS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output with colors
    #[default]
    Human,
    /// JSON output for scripting
    Json,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Render every stack into a cloud assembly directory
    Synth(commands::synth::SynthArgs),

    /// Compare rendered stacks with an existing cloud assembly
    Diff(commands::diff::DiffArgs),

    /// Print the stack or resource dependency graph as DOT
    Graph(commands::graph::GraphArgs),

    /// List stacks in deploy order
    List(commands::list::ListArgs),
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }

    /// Check if JSON output is requested
    pub fn is_json(&self) -> bool {
        matches!(self.output, OutputFormat::Json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["pits-infra", "synth", "-o", "out"]).unwrap();
        match cli.command {
            Commands::Synth(args) => assert_eq!(args.out, PathBuf::from("out")),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_verbosity() {
        let cli = Cli::try_parse_from(["pits-infra", "-vvvv", "list"]).unwrap();
        assert_eq!(cli.verbosity(), 3);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "pits-infra",
            "graph",
            "--stack",
            "PitsConsoleStack",
            "--output",
            "json",
            "--no-color",
        ])
        .unwrap();
        assert!(cli.is_json());
        assert!(cli.no_color);
    }
}
