//! plat: bring up local multi-service environments on k3d with helm
//!
//! - `config` loads and validates `.plat/config.yml` into an [`config::Environment`]
//! - `tools` drives the external tools (k3d, helm, kubectl) as subprocesses
//! - `orchestrator` levels services by dependency and deploys them concurrently
//! - `cli` holds argument parsing, commands and output formatting

pub mod cli;
pub mod config;
pub mod orchestrator;
pub mod tools;
