//! Command line surface of `echoctl`.
//!
//! # Data Flow
//! ```text
//! registry() ── flags() ──▶ server subcommand arguments (config::params)
//! argv ──▶ clap ──▶ Cli
//!     server  → settings (file + env + flags) → watcher → orchestrator
//!     version → build details as text or JSON
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, Subcommand};

use crate::config::setup_command_params;
use crate::modules::{Registry, RpcModule, TelemetryModule};

pub mod server;
pub mod version;

/// Application name; selects the config directories and the env prefix.
pub const APP_NAME: &str = "echoctl";

#[derive(Debug, Parser)]
#[command(name = APP_NAME, version, about = "Echo service", long_about = None)]
pub struct Cli {
    /// Configuration file, instead of the discovered one
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Discard all log output
    #[arg(short, long, global = true)]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the RPC server
    Server,
    /// Show build details
    Version {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Registry holding every module the service is assembled from.
pub fn registry() -> Arc<Registry> {
    let registry = Arc::new(Registry::new(APP_NAME));
    registry.add(Arc::new(RpcModule::new()));
    registry.add(Arc::new(TelemetryModule::new()));
    registry
}

/// Command tree with the registry's module flags on the `server` subcommand.
pub fn command(registry: &Registry) -> clap::Command {
    let params = registry.flags();
    Cli::command().mut_subcommand("server", |cmd| setup_command_params(cmd, &params))
}

/// Parse `argv` and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    let registry = registry();
    let matches = command(&registry).get_matches();
    let cli = Cli::from_arg_matches(&matches)?;

    match &cli.command {
        Commands::Server => {
            let server_matches = matches
                .subcommand_matches("server")
                .cloned()
                .unwrap_or_else(ArgMatches::default);
            server::run(&cli, &server_matches, registry).await
        }
        Commands::Version { json } => version::print(*json),
    }
}
