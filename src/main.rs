//! pits-infra - Pi In The Sky infrastructure synthesizer
//!
//! This is the main entry point for the pits-infra CLI.

mod cli;

use anyhow::Result;
use cli::commands::{CommandContext, Runnable};
use cli::output::OutputFormatter;
use cli::{Cli, Commands};
use pits_infra::Config;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Application version information
const VERSION: &str = env!("CARGO_PKG_VERSION");
const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Display version if verbose
    if cli.verbosity() >= 2 {
        eprintln!("pits-infra v{} by {}", VERSION, AUTHORS);
    }

    let exit_code = match run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            let output = OutputFormatter::new(!cli.no_color, cli.is_json(), cli.verbosity());
            output.error(&format!("{:#}", e));
            e.downcast_ref::<pits_infra::Error>()
                .map_or(1, pits_infra::Error::exit_code)
        }
    };

    std::process::exit(exit_code);
}

async fn run(cli: &Cli) -> Result<i32> {
    // Unlike a missing file, a broken one is fatal
    let config = Config::load(cli.config.as_deref())?;

    // Create command context
    let mut ctx = CommandContext::new(cli, config);

    // Execute the appropriate command
    let exit_code = match &cli.command {
        Commands::Synth(args) => args.run(&mut ctx).await?,
        Commands::Diff(args) => args.run(&mut ctx).await?,
        Commands::Graph(args) => args.run(&mut ctx).await?,
        Commands::List(args) => args.run(&mut ctx).await?,
    };
    ctx.output.flush();
    Ok(exit_code)
}

/// Initialize logging based on verbosity level
fn init_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(verbosity >= 3))
        .with(env_filter)
        .init();
}
