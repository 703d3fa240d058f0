//! kubectl helpers for reading service logs

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWrite;
use tracing::debug;

use super::process::{Command, ProcessError, ProcessExecutor};

const KUBECTL: &str = "kubectl";

/// Options for `kubectl logs`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogsOptions {
    pub follow: bool,
    /// Lines from the end; zero means everything
    pub tail: u32,
    pub since: Option<String>,
    pub previous: bool,
    pub container: Option<String>,
}

impl Default for LogsOptions {
    fn default() -> Self {
        Self {
            follow: false,
            tail: 100,
            since: None,
            previous: false,
            container: None,
        }
    }
}

/// Pods created by a helm chart carry the release name as instance label
pub fn instance_selector(release: &str) -> String {
    format!("app.kubernetes.io/instance={}", release)
}

/// Generate `kubectl logs` arguments for a release's pods
pub fn generate_logs_args(release: &str, namespace: &str, options: &LogsOptions) -> Vec<String> {
    let mut args = vec![
        "logs".to_string(),
        "-l".to_string(),
        instance_selector(release),
        "-n".to_string(),
        namespace.to_string(),
    ];

    if options.follow {
        args.push("--follow".to_string());
    }
    if options.tail > 0 {
        args.push("--tail".to_string());
        args.push(options.tail.to_string());
    }
    if let Some(since) = &options.since {
        args.push("--since".to_string());
        args.push(since.clone());
    }
    if options.previous {
        args.push("--previous".to_string());
    }
    if let Some(container) = &options.container {
        args.push("-c".to_string());
        args.push(container.clone());
    }
    args
}

/// Stream a release's logs into `sink` until kubectl exits
pub async fn stream_logs(
    executor: &dyn ProcessExecutor,
    release: &str,
    namespace: &str,
    options: &LogsOptions,
    sink: &mut (dyn AsyncWrite + Unpin + Send),
) -> Result<(), ProcessError> {
    let command = Command::new(KUBECTL).args(generate_logs_args(release, namespace, options));
    debug!("Running: {}", command.display());
    executor.stream(&command, sink).await
}
