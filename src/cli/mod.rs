//! CLI module for plat
//!
//! Provides the environment subcommands:
//! - `plat up` - Create the cluster and deploy services
//! - `plat down` - Remove services (and optionally the cluster)
//! - `plat status` - Show cluster and service state
//! - `plat logs` - Stream a service's logs
//! - `plat doctor` - Check required tools
//! - `plat validate` - Check configuration without deploying
//! - `plat start|stop|restart` - Manage a single service
//! - `plat init` - Scaffold a new `.plat/` directory
//! - `plat config show|example` - Inspect configuration

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::scaffold::DEFAULT_PROJECT;
use crate::config::{ExecutionMode, Template};
use crate::tools::LogsOptions;

mod commands;
mod display;

pub use commands::*;
pub use display::*;

#[derive(Parser, Debug)]
#[command(name = "plat")]
#[command(about = "Local multi-service Kubernetes environments on k3d and helm")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to config file (default: .plat/config.yml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Execution mode: local (build from source) or artifact (registry images)
    #[arg(short, long, global = true, env = "PLAT_MODE", default_value = "artifact")]
    pub mode: ExecutionMode,

    /// Path to a .env file loaded before anything else
    #[arg(long, global = true, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the cluster if needed and deploy services
    Up(UpArgs),

    /// Remove deployed services
    Down(DownArgs),

    /// Show cluster and service status
    Status(StatusArgs),

    /// Stream logs from a service's pods
    Logs(LogsArgs),

    /// Check that k3d, helm, docker and kubectl are available
    Doctor,

    /// Validate the configuration without touching the cluster
    Validate(ValidateArgs),

    /// Deploy a single service
    Start(ServiceArgs),

    /// Remove a single service
    Stop(ServiceArgs),

    /// Redeploy a single service
    Restart(ServiceArgs),

    /// Create .plat/config.yml and .plat/local.yml for a new project
    Init(InitArgs),

    /// Inspect configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the resolved environment
    Show,

    /// Print an example config.yml and local.yml
    Example,
}

/// Arguments for the init command
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Environment name
    #[arg(default_value = DEFAULT_PROJECT)]
    pub project: String,

    /// Starting services: microservices, fullstack or backend-only
    #[arg(short, long, default_value = "microservices")]
    pub template: Template,

    /// Overwrite an existing .plat directory
    #[arg(short, long)]
    pub force: bool,

    /// Register sibling directories that look like service checkouts
    #[arg(long)]
    pub scan_local: bool,
}

/// Arguments for the up command
#[derive(Parser, Debug)]
pub struct UpArgs {
    /// Only these services (plus their dependencies)
    pub services: Vec<String>,

    /// Skip the k3d/helm availability check
    #[arg(long)]
    pub skip_checks: bool,
}

/// Arguments for the down command
#[derive(Parser, Debug)]
pub struct DownArgs {
    /// Also delete the k3d cluster
    #[arg(long)]
    pub cluster: bool,

    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,
}

/// Arguments for the status command
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Include chart, update time and query errors
    #[arg(short, long)]
    pub detailed: bool,

    /// Print the status as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the logs command
#[derive(Parser, Debug)]
pub struct LogsArgs {
    /// Service name
    pub service: String,

    /// Follow log output
    #[arg(short, long)]
    pub follow: bool,

    /// Lines to show from the end of the logs (0 for all)
    #[arg(long, default_value = "100")]
    pub tail: u32,

    /// Only logs newer than a relative duration like 5s, 2m or 3h
    #[arg(long)]
    pub since: Option<String>,

    /// Logs of the previous container instance
    #[arg(short, long)]
    pub previous: bool,

    /// Container name, for pods with more than one
    #[arg(long)]
    pub container: Option<String>,
}

impl LogsArgs {
    pub fn options(&self) -> LogsOptions {
        LogsOptions {
            follow: self.follow,
            tail: self.tail,
            since: self.since.clone(),
            previous: self.previous,
            container: self.container.clone(),
        }
    }
}

/// Arguments for the validate command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Treat values warnings as errors
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for single-service commands
#[derive(Parser, Debug)]
pub struct ServiceArgs {
    /// Service name
    pub service: String,
}
