//! # Meshwork CLI Module
//!
//! ## Available Commands
//!
//! - `serve` - Run the orchestrator until Ctrl+C
//! - `services` - List instances stored in the registry database
//! - `export` - Write a registry snapshot as JSON
//! - `config` - Print the effective configuration as TOML

mod commands;

use clap::{Parser, Subcommand};
use meshwork::MeshworkConfig;
use meshwork_core::MeshError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Meshwork - service mesh and event orchestration control plane
#[derive(Parser, Debug)]
#[command(name = "meshwork")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Registry database (overrides `registry.database`)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control plane
    Serve {
        /// Host for the registry API
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port for the registry API
        #[arg(short, long)]
        port: Option<u16>,

        /// Port for the API gateway (gateway disabled when unset)
        #[arg(short, long)]
        gateway_port: Option<u16>,
    },

    /// List registered service instances
    Services {
        /// Only show instances of this service
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Export the registry as a JSON snapshot
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print the effective configuration
    Config,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Resolve configuration: file, then environment, then CLI flags.
fn resolve_config(cli: &Cli) -> Result<MeshworkConfig, MeshError> {
    let mut config = MeshworkConfig::load(cli.config.as_deref())?;
    if let Some(database) = &cli.database {
        config.registry.database = Some(database.clone());
    }
    Ok(config)
}

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), MeshError> {
    let config = resolve_config(&cli)?;
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Serve {
            host,
            port,
            gateway_port,
        }) => cmd_serve(config, host, port, gateway_port).await,
        Some(Commands::Services { name }) => cmd_services(&config, name.as_deref(), json_mode),
        Some(Commands::Export { output }) => cmd_export(&config, &output),
        Some(Commands::Config) => cmd_config(&config),
        None => cmd_services(&config, None, json_mode),
    }
}
