//! CLI command definitions and dispatch.

mod optimize;
mod version;

use clap::{Parser, Subcommand};

use a3s_stargz_core::{LogFormat, LogLevel};

pub use optimize::{resolve_config, OptimizeArgs};

/// A3S Stargz - optimize container images for lazy pulling.
#[derive(Parser)]
#[command(name = "a3s-stargz", version, about)]
pub struct Cli {
    /// Log output format (text, json)
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,

    /// Log level, overriding the config file (debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Rewrite an image or index as eStargz with prioritized files
    Optimize(OptimizeArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Dispatch a parsed CLI command to its handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Optimize(args) => optimize::execute(args, cli.log_level, cli.log_format).await,
        Command::Version(args) => version::execute(args).await,
    }
}
