//! Command implementations for the CLI
//!
//! SBIO pattern: Commands return Results, I/O is handled by caller

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;
use tokio::io::AsyncWrite;

use super::{InitArgs, LogsArgs, UpArgs};
use crate::config::{self, scaffold, ConfigError, Environment, ExecutionMode, InitReport};
use crate::orchestrator::{
    compute_levels, values, AccessInfo, DependencyLevels, DownSummary, EnvironmentStatus,
    Orchestrator, OrchestratorError,
};
use crate::tools::kubectl::stream_logs;
use crate::tools::process::{tool_version, ProcessError, ProcessExecutor};

/// Set either of these to skip interactive confirmation
pub const AUTO_CONFIRM_VARS: &[&str] = &["CI", "PLAT_AUTO_CONFIRM"];

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No pods found for service '{0}'. Is the service deployed? Run 'plat status'")]
    NoPods(String),

    #[error("Aborted")]
    Aborted,
}

/// Result type for commands
pub type CommandResult<T> = Result<T, CommandError>;

// ============================================================================
// Confirmation (pure business logic)
// ============================================================================

/// Whether prompts should be answered automatically
pub fn auto_confirm() -> bool {
    auto_confirm_with(|var| std::env::var(var).ok())
}

/// Any of the confirmation variables set to a non-empty value
pub fn auto_confirm_with(lookup: impl Fn(&str) -> Option<String>) -> bool {
    AUTO_CONFIRM_VARS
        .iter()
        .any(|var| lookup(var).is_some_and(|value| !value.is_empty()))
}

pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

pub fn down_prompt(env: &Environment, delete_cluster: bool) -> String {
    if delete_cluster {
        format!(
            "Remove all services and delete cluster for '{}'? [y/N] ",
            env.name
        )
    } else {
        format!("Remove all services from '{}'? [y/N] ", env.name)
    }
}

// ============================================================================
// Environment commands
// ============================================================================

pub fn load(path: Option<&Path>, mode: ExecutionMode) -> CommandResult<Environment> {
    Ok(config::load_environment(path, mode)?)
}

/// Bring the environment (or the named services and their dependencies) up
pub async fn up(
    orchestrator: &Orchestrator,
    env: &Environment,
    args: &UpArgs,
) -> CommandResult<AccessInfo> {
    if !args.skip_checks {
        orchestrator.validate_prerequisites().await?;
    }

    if args.services.is_empty() {
        return Ok(orchestrator.up(env).await?);
    }

    let subset = env
        .subset(&args.services)
        .map_err(ConfigError::UnknownServices)?;
    Ok(orchestrator.up(&subset).await?)
}

pub async fn down(
    orchestrator: &Orchestrator,
    env: &Environment,
    delete_cluster: bool,
) -> CommandResult<DownSummary> {
    Ok(orchestrator.down(env, delete_cluster).await?)
}

pub async fn status(orchestrator: &Orchestrator, env: &Environment) -> CommandResult<EnvironmentStatus> {
    Ok(orchestrator.status(env).await?)
}

/// Single-service operations share one entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
}

pub async fn service_action(
    orchestrator: &Orchestrator,
    env: &Environment,
    name: &str,
    action: ServiceAction,
) -> CommandResult<()> {
    match action {
        ServiceAction::Start => orchestrator.start_service(env, name).await?,
        ServiceAction::Stop => orchestrator.stop_service(env, name).await?,
        ServiceAction::Restart => orchestrator.restart_service(env, name).await?,
    }
    Ok(())
}

/// Stream a service's pod logs into `sink`
pub async fn logs(
    executor: &dyn ProcessExecutor,
    env: &Environment,
    args: &LogsArgs,
    sink: &mut (dyn AsyncWrite + Unpin + Send),
) -> CommandResult<()> {
    let service = env
        .service(&args.service)
        .ok_or_else(|| ConfigError::UnknownServices(vec![args.service.clone()]))?;

    match stream_logs(
        executor,
        service.release_name(),
        env.namespace(),
        &args.options(),
        sink,
    )
    .await
    {
        Err(ProcessError::Failed { code: 1, .. }) => Err(CommandError::NoPods(service.name.clone())),
        other => Ok(other?),
    }
}

// ============================================================================
// Init / config
// ============================================================================

/// Scaffold `.plat/` under `root`
pub fn init(root: &Path, args: &InitArgs) -> CommandResult<InitReport> {
    let options = config::InitOptions {
        project: args.project.clone(),
        template: args.template,
        force: args.force,
        scan_local: args.scan_local,
    };
    Ok(config::init_project(root, &options)?)
}

/// Sample config.yml and local.yml
#[derive(Debug, Clone)]
pub struct ExampleFiles {
    pub config: String,
    pub local: String,
}

pub fn example_files() -> CommandResult<ExampleFiles> {
    Ok(ExampleFiles {
        config: scaffold::to_yaml(&scaffold::example_config())?,
        local: scaffold::to_yaml(&scaffold::example_local_config())?,
    })
}

// ============================================================================
// Doctor
// ============================================================================

/// Result of probing one external tool
#[derive(Debug, Clone)]
pub struct ToolCheck {
    pub name: &'static str,
    /// Needed by `up`/`down`; the others only for some commands
    pub required: bool,
    pub version: Option<String>,
    pub error: Option<String>,
    pub install_hint: &'static str,
}

impl ToolCheck {
    pub fn ok(&self) -> bool {
        self.version.is_some()
    }
}

struct Probe {
    name: &'static str,
    args: &'static [&'static str],
    required: bool,
    install_hint: &'static str,
}

const PROBES: &[Probe] = &[
    Probe {
        name: "k3d",
        args: &["version"],
        required: true,
        install_hint: "https://k3d.io/stable/#installation",
    },
    Probe {
        name: "helm",
        args: &["version", "--short"],
        required: true,
        install_hint: "https://helm.sh/docs/intro/install/",
    },
    Probe {
        name: "docker",
        args: &["info", "--format", "{{.ServerVersion}}"],
        required: true,
        install_hint: "https://docs.docker.com/get-docker/",
    },
    Probe {
        name: "kubectl",
        args: &["version", "--client"],
        required: false,
        install_hint: "https://kubernetes.io/docs/tasks/tools/",
    },
];

/// Probe every tool plat drives
pub async fn doctor(executor: &dyn ProcessExecutor) -> Vec<ToolCheck> {
    let mut checks = Vec::with_capacity(PROBES.len());
    for probe in PROBES {
        let (version, error) = match tool_version(executor, probe.name, probe.args).await {
            Ok(version) => (Some(version), None),
            Err(e) => (None, Some(e.to_string())),
        };
        checks.push(ToolCheck {
            name: probe.name,
            required: probe.required,
            version,
            error,
            install_hint: probe.install_hint,
        });
    }
    checks
}

pub fn doctor_passed(checks: &[ToolCheck]) -> bool {
    checks.iter().all(|c| c.ok() || !c.required)
}

// ============================================================================
// Validate
// ============================================================================

/// Result of validating a configuration
#[derive(Debug)]
pub struct ValidationResult {
    pub valid: bool,
    pub environment: Option<String>,
    pub services: usize,
    pub levels: DependencyLevels,
    /// Values problems per service
    pub warnings: BTreeMap<String, Vec<String>>,
    pub error: Option<String>,
}

impl ValidationResult {
    fn invalid(error: impl ToString) -> Self {
        Self {
            valid: false,
            environment: None,
            services: 0,
            levels: Vec::new(),
            warnings: BTreeMap::new(),
            error: Some(error.to_string()),
        }
    }
}

/// Load the configuration, level the services and resolve every service's
/// values. With `strict`, values warnings make the result invalid.
pub async fn validate(path: Option<&Path>, mode: ExecutionMode, strict: bool) -> ValidationResult {
    let env = match config::load_environment(path, mode) {
        Ok(env) => env,
        Err(e) => return ValidationResult::invalid(e),
    };

    let levels = match compute_levels(&env.services) {
        Ok(levels) => levels,
        Err(e) => return ValidationResult::invalid(e),
    };

    let warnings = values::validation_report(&env).await;
    ValidationResult {
        valid: !(strict && !warnings.is_empty()),
        environment: Some(env.name.clone()),
        services: env.services.len(),
        levels,
        warnings,
        error: None,
    }
}
