//! Topology provisioner CLI
//!
//! A command-line tool for validating topology definitions, simulating
//! routing decisions, applying a topology locally, and querying a
//! running topologyd.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{apply, routes, status, validate};
use std::path::PathBuf;

/// Topology provisioner CLI
#[derive(Parser)]
#[command(name = "topo")]
#[command(author, version, about = "CLI for the topology provisioner", long_about = None)]
pub struct Cli {
    /// API endpoint URL of a running topologyd (can also be set via
    /// TOPO_API_URL env var)
    #[arg(long, env = "TOPO_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a topology definition file
    Validate {
        /// Path to the topology definition (defaults to TOPO_FILE or
        /// ./topology.json)
        file: Option<PathBuf>,
    },

    /// Show which routing rule a request path would hit
    Routes {
        /// Request path to evaluate, e.g. /api/users
        path: String,

        /// Path to the topology definition
        #[arg(long, short)]
        file: Option<PathBuf>,
    },

    /// Provision the topology in-process and report the resource graph
    Apply {
        /// Path to the topology definition
        file: Option<PathBuf>,
    },

    /// Query a running topologyd for health and routing state
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { file } => {
            let path = config::resolve_topology_path(file);
            validate::validate(&path, cli.format)?;
        }
        Commands::Routes { path, file } => {
            let topology_path = config::resolve_topology_path(file);
            routes::show_route(&topology_path, &path, cli.format)?;
        }
        Commands::Apply { file } => {
            let path = config::resolve_topology_path(file);
            apply::apply(&path, cli.format).await?;
        }
        Commands::Status => {
            let client = client::ApiClient::new(&cli.api_url)?;
            status::status(&client, cli.format).await?;
        }
    }

    Ok(())
}
