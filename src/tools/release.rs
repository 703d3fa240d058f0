//! Release provider (helm)

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tempfile::TempPath;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::process::{self, Command, ProcessError, ProcessExecutor, SystemExecutor};

const HELM: &str = "helm";
const INSTALL_TIMEOUT: &str = "300s";

/// Errors that can occur during release operations
#[derive(Error, Debug)]
pub enum ReleaseError {
    #[error("Release '{0}' not found")]
    NotFound(String),

    #[error("Failed to add helm repository '{name}': {message}")]
    Repository { name: String, message: String },

    #[error("helm {action} of '{release}' failed (exit code {code}): {stderr}")]
    Failed {
        action: &'static str,
        release: String,
        code: i32,
        stderr: String,
    },

    #[error("Failed to write values file: {0}")]
    ValuesFile(String),

    #[error("Failed to parse helm output: {0}")]
    Parse(String),

    #[error("Command error: {0}")]
    Process(#[from] ProcessError),
}

/// Observed release state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReleaseState {
    Deployed,
    NotDeployed,
    Unknown,
    /// Any other state helm reports (failed, pending-install, ...)
    Other(String),
}

impl From<&str> for ReleaseState {
    fn from(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "deployed" => Self::Deployed,
            "not-deployed" => Self::NotDeployed,
            "unknown" => Self::Unknown,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for ReleaseState {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<ReleaseState> for String {
    fn from(value: ReleaseState) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ReleaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deployed => write!(f, "deployed"),
            Self::NotDeployed => write!(f, "not-deployed"),
            Self::Unknown => write!(f, "unknown"),
            Self::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Everything needed to install or upgrade one release
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub name: String,
    pub chart: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub namespace: String,
    /// Resolved values, passed to helm through a temporary file
    #[serde(default)]
    pub values: Map<String, Value>,
    #[serde(default)]
    pub values_files: Vec<PathBuf>,
}

/// Point-in-time release status. Never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseStatus {
    pub name: String,
    pub namespace: String,
    pub state: ReleaseState,
    #[serde(default)]
    pub chart: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub updated: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReleaseStatus {
    /// Synthetic status for a service that has no release yet
    pub fn not_deployed(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            state: ReleaseState::NotDeployed,
            chart: String::new(),
            version: String::new(),
            updated: String::new(),
            error: None,
        }
    }

    /// Status for a query that failed for a reason other than "not found"
    pub fn unknown(name: &str, namespace: &str, error: impl Into<String>) -> Self {
        Self {
            state: ReleaseState::Unknown,
            error: Some(error.into()),
            ..Self::not_deployed(name, namespace)
        }
    }
}

/// Summary entry from a release listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub name: String,
    pub namespace: String,
    pub state: ReleaseState,
    pub chart: String,
}

// ============================================================================
// SBIO: Trait for abstraction (allows fakes in tests)
// ============================================================================

#[async_trait]
pub trait ReleaseProvider: Send + Sync {
    async fn install_or_upgrade(&self, release: &Release) -> Result<(), ReleaseError>;

    /// Removing a release that does not exist succeeds
    async fn uninstall(&self, name: &str, namespace: &str) -> Result<(), ReleaseError>;

    /// Returns [`ReleaseError::NotFound`] when the release does not exist
    async fn release_status(&self, name: &str, namespace: &str)
        -> Result<ReleaseStatus, ReleaseError>;

    /// An empty namespace lists across all namespaces
    async fn list_releases(&self, namespace: &str) -> Result<Vec<ReleaseInfo>, ReleaseError>;

    async fn tool_version(&self) -> Result<String, ReleaseError>;
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

/// How the chart argument should be produced for a release
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChartSource {
    /// An http(s) repository that must be registered under `repo_name` first
    HttpRepository {
        repo_name: String,
        url: String,
        chart_ref: String,
    },
    /// Usable as-is: oci, an already configured repo, or a local path
    Direct(String),
}

impl ChartSource {
    pub fn chart_ref(&self) -> &str {
        match self {
            Self::HttpRepository { chart_ref, .. } => chart_ref,
            Self::Direct(chart_ref) => chart_ref,
        }
    }
}

/// Work out where a release's chart comes from. Without a repository the
/// chart is handed to helm unchanged (a `repo/chart` reference or a local
/// chart directory).
pub fn resolve_chart_source(release: &Release) -> ChartSource {
    match release.repository.as_deref().map(str::trim) {
        Some(repo) if repo.starts_with("http://") || repo.starts_with("https://") => {
            let repo_name = format!("plat-{}", release.name);
            ChartSource::HttpRepository {
                chart_ref: format!("{}/{}", repo_name, release.chart),
                repo_name,
                url: repo.to_string(),
            }
        }
        Some(repo) if !repo.is_empty() => ChartSource::Direct(format!(
            "{}/{}",
            repo.trim_end_matches('/'),
            release.chart
        )),
        _ => ChartSource::Direct(release.chart.clone()),
    }
}

/// Generate `helm upgrade --install` arguments
pub fn generate_install_args(
    release: &Release,
    chart_ref: &str,
    inline_values: Option<&Path>,
) -> Vec<String> {
    let mut args = vec![
        "upgrade".to_string(),
        "--install".to_string(),
        release.name.clone(),
        chart_ref.to_string(),
    ];

    if let Some(version) = release.version.as_deref().filter(|v| !v.is_empty()) {
        args.push("--version".to_string());
        args.push(version.to_string());
    }

    args.push("--namespace".to_string());
    args.push(release.namespace.clone());
    args.push("--create-namespace".to_string());

    for file in &release.values_files {
        args.push("--values".to_string());
        args.push(file.display().to_string());
    }

    if let Some(file) = inline_values {
        args.push("--values".to_string());
        args.push(file.display().to_string());
    }

    args.push("--wait".to_string());
    args.push("--timeout".to_string());
    args.push(INSTALL_TIMEOUT.to_string());
    args
}

/// Generate `helm uninstall` arguments
pub fn generate_uninstall_args(name: &str, namespace: &str) -> Vec<String> {
    let mut args = vec!["uninstall".to_string(), name.to_string()];
    if !namespace.is_empty() {
        args.push("--namespace".to_string());
        args.push(namespace.to_string());
    }
    args
}

/// Generate `helm status` arguments
pub fn generate_status_args(name: &str, namespace: &str) -> Vec<String> {
    let mut args = vec![
        "status".to_string(),
        name.to_string(),
        "--output".to_string(),
        "json".to_string(),
    ];
    if !namespace.is_empty() {
        args.push("--namespace".to_string());
        args.push(namespace.to_string());
    }
    args
}

/// Generate `helm list` arguments
pub fn generate_list_args(namespace: &str) -> Vec<String> {
    let mut args = vec!["list".to_string(), "--output".to_string(), "json".to_string()];
    if namespace.is_empty() {
        args.push("--all-namespaces".to_string());
    } else {
        args.push("--namespace".to_string());
        args.push(namespace.to_string());
    }
    args
}

#[derive(Debug, Default, Deserialize)]
struct HelmStatus {
    #[serde(default)]
    info: HelmStatusInfo,
    #[serde(default)]
    chart: HelmChart,
}

#[derive(Debug, Default, Deserialize)]
struct HelmStatusInfo {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    last_deployed: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct HelmChart {
    #[serde(default)]
    metadata: HelmChartMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct HelmChartMetadata {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HelmListEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    chart: String,
}

/// Parse `helm status --output json`
pub fn parse_release_status(
    name: &str,
    namespace: &str,
    stdout: &str,
) -> Result<ReleaseStatus, ReleaseError> {
    let parsed: HelmStatus =
        serde_json::from_str(stdout).map_err(|e| ReleaseError::Parse(e.to_string()))?;

    let state = parsed
        .info
        .status
        .as_deref()
        .map(ReleaseState::from)
        .unwrap_or(ReleaseState::Unknown);

    let metadata = parsed.chart.metadata;
    let version = metadata.version.clone().unwrap_or_default();
    let chart = match (metadata.name, metadata.version) {
        (Some(name), Some(version)) => format!("{}-{}", name, version),
        (Some(name), None) => name,
        _ => String::new(),
    };

    Ok(ReleaseStatus {
        name: name.to_string(),
        namespace: namespace.to_string(),
        state,
        chart,
        version,
        updated: parsed.info.last_deployed.unwrap_or_default(),
        error: None,
    })
}

/// Parse `helm list --output json`
pub fn parse_release_list(stdout: &str) -> Result<Vec<ReleaseInfo>, ReleaseError> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }
    let entries: Vec<HelmListEntry> =
        serde_json::from_str(stdout).map_err(|e| ReleaseError::Parse(e.to_string()))?;

    Ok(entries
        .into_iter()
        .map(|entry| ReleaseInfo {
            name: entry.name,
            namespace: entry.namespace,
            state: entry
                .status
                .as_deref()
                .map(ReleaseState::from)
                .unwrap_or(ReleaseState::Unknown),
            chart: entry.chart,
        })
        .collect())
}

/// Whether `helm repo list --output json` contains `name`
pub fn repository_listed(stdout: &str, name: &str) -> Result<bool, ReleaseError> {
    #[derive(Deserialize)]
    struct Repo {
        name: String,
    }

    if stdout.trim().is_empty() {
        return Ok(false);
    }
    let repos: Vec<Repo> =
        serde_json::from_str(stdout).map_err(|e| ReleaseError::Parse(e.to_string()))?;
    Ok(repos.iter().any(|r| r.name == name))
}

fn mentions_not_found(stderr: &str) -> bool {
    stderr.to_lowercase().contains("not found")
}

// ============================================================================
// SBIO: I/O implementation (helm CLI)
// ============================================================================

/// [`ReleaseProvider`] backed by the helm CLI
pub struct HelmProvider {
    executor: Arc<dyn ProcessExecutor>,
    temp_dir: PathBuf,
}

impl HelmProvider {
    pub fn new(executor: Arc<dyn ProcessExecutor>) -> Self {
        Self {
            executor,
            temp_dir: std::env::temp_dir(),
        }
    }

    /// Directory for the temporary inline-values files
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    async fn ensure_repository(&self, name: &str, url: &str) -> Result<(), ReleaseError> {
        let list = self
            .executor
            .execute(&Command::new(HELM).args(["repo", "list", "--output", "json"]))
            .await?;

        let exists = if list.success() {
            repository_listed(&list.stdout, name)?
        } else if list.stderr.contains("no repositories") {
            false
        } else {
            return Err(ReleaseError::Repository {
                name: name.to_string(),
                message: list.stderr,
            });
        };

        if exists {
            debug!("Helm repository {} already configured", name);
            return Ok(());
        }

        info!("Adding helm repository {} ({})", name, url);
        let add = self
            .executor
            .execute(&Command::new(HELM).args(["repo", "add", name, url]))
            .await?;
        if !add.success() {
            return Err(ReleaseError::Repository {
                name: name.to_string(),
                message: add.stderr,
            });
        }

        match self
            .executor
            .execute(&Command::new(HELM).args(["repo", "update"]))
            .await
        {
            Ok(result) if result.success() => {}
            Ok(result) => warn!("Failed to update helm repositories: {}", result.stderr),
            Err(e) => warn!("Failed to update helm repositories: {}", e),
        }
        Ok(())
    }

    /// The returned path deletes the file when dropped, including when the
    /// install is cancelled mid-flight.
    async fn write_values_file(&self, values: &Map<String, Value>) -> Result<TempPath, ReleaseError> {
        let yaml =
            serde_yaml::to_string(values).map_err(|e| ReleaseError::ValuesFile(e.to_string()))?;
        let path = self
            .temp_dir
            .join(format!("plat-values-{}.yaml", Uuid::new_v4()));
        tokio::fs::write(&path, yaml)
            .await
            .map_err(|e| ReleaseError::ValuesFile(format!("{}: {}", path.display(), e)))?;
        Ok(TempPath::from_path(path))
    }
}

impl Default for HelmProvider {
    fn default() -> Self {
        Self::new(Arc::new(SystemExecutor::new()))
    }
}

#[async_trait]
impl ReleaseProvider for HelmProvider {
    async fn install_or_upgrade(&self, release: &Release) -> Result<(), ReleaseError> {
        let source = resolve_chart_source(release);
        if let ChartSource::HttpRepository { repo_name, url, .. } = &source {
            self.ensure_repository(repo_name, url).await?;
        }

        let values_file = if release.values.is_empty() {
            None
        } else {
            Some(self.write_values_file(&release.values).await?)
        };

        let command = Command::new(HELM).args(generate_install_args(
            release,
            source.chart_ref(),
            values_file.as_deref(),
        ));
        info!("Installing release {} ({})", release.name, source.chart_ref());
        let result = self.executor.execute(&command).await;

        if let Some(path) = values_file {
            let shown = path.display().to_string();
            if let Err(e) = path.close() {
                debug!("Could not remove {}: {}", shown, e);
            }
        }

        let result = result?;
        if !result.success() {
            return Err(ReleaseError::Failed {
                action: "install",
                release: release.name.clone(),
                code: result.exit_code,
                stderr: result.stderr,
            });
        }
        Ok(())
    }

    async fn uninstall(&self, name: &str, namespace: &str) -> Result<(), ReleaseError> {
        let command = Command::new(HELM).args(generate_uninstall_args(name, namespace));
        let result = self.executor.execute(&command).await?;
        if result.success() {
            return Ok(());
        }
        if mentions_not_found(&result.stderr) {
            debug!("Release {} already absent", name);
            return Ok(());
        }
        Err(ReleaseError::Failed {
            action: "uninstall",
            release: name.to_string(),
            code: result.exit_code,
            stderr: result.stderr,
        })
    }

    async fn release_status(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<ReleaseStatus, ReleaseError> {
        let command = Command::new(HELM).args(generate_status_args(name, namespace));
        let result = self.executor.execute(&command).await?;
        if !result.success() {
            if mentions_not_found(&result.stderr) {
                return Err(ReleaseError::NotFound(name.to_string()));
            }
            return Err(ReleaseError::Failed {
                action: "status",
                release: name.to_string(),
                code: result.exit_code,
                stderr: result.stderr,
            });
        }
        parse_release_status(name, namespace, &result.stdout)
    }

    async fn list_releases(&self, namespace: &str) -> Result<Vec<ReleaseInfo>, ReleaseError> {
        let command = Command::new(HELM).args(generate_list_args(namespace));
        let result = self.executor.execute(&command).await?.check(HELM)?;
        parse_release_list(&result.stdout)
    }

    async fn tool_version(&self) -> Result<String, ReleaseError> {
        Ok(process::tool_version(self.executor.as_ref(), HELM, &["version", "--short"]).await?)
    }
}

// ============================================================================
// SBIO: Fake implementation for testing (no I/O)
// ============================================================================

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::Mutex;

    /// In-memory release store. Installed releases become `deployed`.
    #[derive(Default)]
    pub struct FakeReleaseProvider {
        pub releases: Mutex<BTreeMap<String, Release>>,
        pub installs: Mutex<Vec<String>>,
        pub uninstalls: Mutex<Vec<String>>,
        failing: HashSet<String>,
        failing_uninstall: HashSet<String>,
        hanging_uninstall: HashSet<String>,
        broken_status: HashSet<String>,
        foreign: Vec<String>,
    }

    impl FakeReleaseProvider {
        pub fn new() -> Self {
            Self::default()
        }

        /// Installs of these releases fail
        pub fn failing(mut self, names: &[&str]) -> Self {
            self.failing = names.iter().map(|s| s.to_string()).collect();
            self
        }

        /// Uninstalls of these releases fail and leave them in place
        pub fn failing_uninstall(mut self, names: &[&str]) -> Self {
            self.failing_uninstall = names.iter().map(|s| s.to_string()).collect();
            self
        }

        /// Uninstalls of these releases never finish
        pub fn hanging_uninstall(mut self, names: &[&str]) -> Self {
            self.hanging_uninstall = names.iter().map(|s| s.to_string()).collect();
            self
        }

        /// Status queries for these releases fail with a non-not-found error
        pub fn broken_status(mut self, names: &[&str]) -> Self {
            self.broken_status = names.iter().map(|s| s.to_string()).collect();
            self
        }

        /// Releases present in the namespace that belong to something else
        pub fn with_foreign(mut self, names: &[&str]) -> Self {
            self.foreign = names.iter().map(|s| s.to_string()).collect();
            self
        }

        pub fn with_installed(self, names: &[&str]) -> Self {
            {
                let mut releases = self.releases.lock().unwrap();
                for name in names {
                    releases.insert(
                        name.to_string(),
                        Release {
                            name: name.to_string(),
                            namespace: "default".to_string(),
                            ..Default::default()
                        },
                    );
                }
            }
            self
        }

        pub fn installs(&self) -> Vec<String> {
            self.installs.lock().unwrap().clone()
        }

        pub fn uninstalls(&self) -> Vec<String> {
            self.uninstalls.lock().unwrap().clone()
        }

        pub fn installed(&self, name: &str) -> Option<Release> {
            self.releases.lock().unwrap().get(name).cloned()
        }
    }

    #[async_trait]
    impl ReleaseProvider for FakeReleaseProvider {
        async fn install_or_upgrade(&self, release: &Release) -> Result<(), ReleaseError> {
            self.installs.lock().unwrap().push(release.name.clone());
            if self.failing.contains(&release.name) {
                return Err(ReleaseError::Failed {
                    action: "install",
                    release: release.name.clone(),
                    code: 1,
                    stderr: "timed out waiting for the condition".to_string(),
                });
            }
            self.releases
                .lock()
                .unwrap()
                .insert(release.name.clone(), release.clone());
            Ok(())
        }

        async fn uninstall(&self, name: &str, _namespace: &str) -> Result<(), ReleaseError> {
            self.uninstalls.lock().unwrap().push(name.to_string());
            if self.hanging_uninstall.contains(name) {
                std::future::pending::<()>().await;
            }
            if self.failing_uninstall.contains(name) {
                return Err(ReleaseError::Failed {
                    action: "uninstall",
                    release: name.to_string(),
                    code: 1,
                    stderr: "context deadline exceeded".to_string(),
                });
            }
            self.releases.lock().unwrap().remove(name);
            Ok(())
        }

        async fn release_status(
            &self,
            name: &str,
            namespace: &str,
        ) -> Result<ReleaseStatus, ReleaseError> {
            if self.broken_status.contains(name) {
                return Err(ReleaseError::Parse("unexpected end of input".to_string()));
            }
            match self.releases.lock().unwrap().get(name) {
                Some(release) => Ok(ReleaseStatus {
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                    state: ReleaseState::Deployed,
                    chart: release.chart.clone(),
                    version: release.version.clone().unwrap_or_default(),
                    updated: "2026-01-01 00:00:00".to_string(),
                    error: None,
                }),
                None => Err(ReleaseError::NotFound(name.to_string())),
            }
        }

        async fn list_releases(&self, namespace: &str) -> Result<Vec<ReleaseInfo>, ReleaseError> {
            let mut names: Vec<String> = self.releases.lock().unwrap().keys().cloned().collect();
            names.extend(self.foreign.iter().cloned());
            Ok(names
                .into_iter()
                .map(|name| ReleaseInfo {
                    name,
                    namespace: namespace.to_string(),
                    state: ReleaseState::Deployed,
                    chart: String::new(),
                })
                .collect())
        }

        async fn tool_version(&self) -> Result<String, ReleaseError> {
            Ok("v3.14.0".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::process::mock::ScriptedExecutor;
    use serde_json::json;
    use std::time::Duration;

    fn release(chart: &str, repository: Option<&str>) -> Release {
        Release {
            name: "api".to_string(),
            chart: chart.to_string(),
            repository: repository.map(str::to_string),
            namespace: "shop".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_release_state_parsing() {
        assert_eq!(ReleaseState::from("DEPLOYED"), ReleaseState::Deployed);
        assert_eq!(ReleaseState::from("not-deployed"), ReleaseState::NotDeployed);
        assert_eq!(
            ReleaseState::from("pending-install"),
            ReleaseState::Other("pending-install".to_string())
        );
        assert_eq!(ReleaseState::NotDeployed.to_string(), "not-deployed");
    }

    #[test]
    fn test_chart_source_http_repository() {
        let source =
            resolve_chart_source(&release("redis", Some("https://charts.bitnami.com/bitnami")));
        assert_eq!(
            source,
            ChartSource::HttpRepository {
                repo_name: "plat-api".to_string(),
                url: "https://charts.bitnami.com/bitnami".to_string(),
                chart_ref: "plat-api/redis".to_string(),
            }
        );
    }

    #[test]
    fn test_chart_source_oci_and_named() {
        let oci = resolve_chart_source(&release("redis", Some("oci://registry-1.docker.io/bitnamicharts")));
        assert_eq!(oci.chart_ref(), "oci://registry-1.docker.io/bitnamicharts/redis");

        let named = resolve_chart_source(&release("nginx", Some("stable")));
        assert_eq!(named.chart_ref(), "stable/nginx");
    }

    #[test]
    fn test_chart_source_without_repository() {
        assert_eq!(
            resolve_chart_source(&release("./charts/api", None))
                .chart_ref(),
            "./charts/api"
        );
        assert_eq!(
            resolve_chart_source(&release("bitnami/redis", Some("")))
                .chart_ref(),
            "bitnami/redis"
        );
        assert_eq!(
            resolve_chart_source(&release("microservice", None)),
            ChartSource::Direct("microservice".to_string())
        );
    }

    #[test]
    fn test_generate_install_args() {
        let mut r = release("./charts/api", None);
        r.version = Some("1.2.0".to_string());
        r.values_files = vec![PathBuf::from("/tmp/base.yml")];

        let args = generate_install_args(&r, "./charts/api", Some(Path::new("/tmp/inline.yaml")));
        assert_eq!(
            args,
            vec![
                "upgrade",
                "--install",
                "api",
                "./charts/api",
                "--version",
                "1.2.0",
                "--namespace",
                "shop",
                "--create-namespace",
                "--values",
                "/tmp/base.yml",
                "--values",
                "/tmp/inline.yaml",
                "--wait",
                "--timeout",
                "300s",
            ]
        );
    }

    #[test]
    fn test_generate_list_args_all_namespaces() {
        assert_eq!(
            generate_list_args(""),
            vec!["list", "--output", "json", "--all-namespaces"]
        );
        assert_eq!(
            generate_list_args("shop"),
            vec!["list", "--output", "json", "--namespace", "shop"]
        );
    }

    #[test]
    fn test_parse_release_status() {
        let stdout = r#"{
            "name": "api",
            "info": {"status": "DEPLOYED", "last_deployed": "2026-03-01T10:00:00Z"},
            "chart": {"metadata": {"name": "microservice", "version": "0.3.1"}}
        }"#;
        let status = parse_release_status("api", "shop", stdout).unwrap();
        assert_eq!(status.state, ReleaseState::Deployed);
        assert_eq!(status.chart, "microservice-0.3.1");
        assert_eq!(status.version, "0.3.1");
        assert_eq!(status.updated, "2026-03-01T10:00:00Z");
    }

    #[test]
    fn test_parse_release_status_sparse() {
        let status = parse_release_status("api", "shop", "{}").unwrap();
        assert_eq!(status.state, ReleaseState::Unknown);
        assert!(status.chart.is_empty());
    }

    #[test]
    fn test_parse_release_list() {
        let stdout = r#"[
            {"name": "api", "namespace": "shop", "status": "deployed", "chart": "microservice-0.3.1"},
            {"name": "db", "namespace": "shop", "status": "failed", "chart": "postgresql-12.1.0"}
        ]"#;
        let releases = parse_release_list(stdout).unwrap();
        assert_eq!(releases.len(), 2);
        assert_eq!(releases[1].state, ReleaseState::Other("failed".to_string()));
        assert!(parse_release_list("").unwrap().is_empty());
    }

    #[test]
    fn test_repository_listed() {
        let stdout = r#"[{"name": "plat-api", "url": "https://example.com"}]"#;
        assert!(repository_listed(stdout, "plat-api").unwrap());
        assert!(!repository_listed(stdout, "plat-web").unwrap());
    }

    #[tokio::test]
    async fn test_helm_uninstall_not_found_is_success() {
        let executor = Arc::new(ScriptedExecutor::new().on(
            "helm uninstall",
            1,
            "",
            "Error: uninstall: Release not loaded: api: release: not found",
        ));
        let provider = HelmProvider::new(executor);
        provider.uninstall("api", "shop").await.unwrap();
    }

    #[tokio::test]
    async fn test_helm_status_not_found() {
        let executor = Arc::new(ScriptedExecutor::new().on(
            "helm status",
            1,
            "",
            "Error: release: not found",
        ));
        let provider = HelmProvider::new(executor);
        assert!(matches!(
            provider.release_status("api", "shop").await,
            Err(ReleaseError::NotFound(name)) if name == "api"
        ));
    }

    #[tokio::test]
    async fn test_helm_install_adds_repository_and_cleans_values_file() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(
            ScriptedExecutor::new()
                .on("helm repo list", 0, "[]", "")
                .on("helm repo update", 1, "", "network unreachable"),
        );
        let provider = HelmProvider::new(executor.clone()).with_temp_dir(dir.path());

        let mut r = release("redis", Some("https://charts.example.com"));
        r.values = json!({"replicaCount": 2}).as_object().cloned().unwrap();
        provider.install_or_upgrade(&r).await.unwrap();

        let lines = executor.lines();
        assert_eq!(lines[0], "helm repo list --output json");
        assert_eq!(lines[1], "helm repo add plat-api https://charts.example.com");
        assert_eq!(lines[2], "helm repo update");
        assert!(lines[3].starts_with("helm upgrade --install api plat-api/redis --namespace shop"));
        assert!(lines[3].contains("plat-values-"));

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_install_removes_values_file() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor::new().hang_on("helm upgrade"));
        let provider = HelmProvider::new(executor.clone()).with_temp_dir(dir.path());

        let mut r = release("./charts/api", None);
        r.values = json!({"replicaCount": 2}).as_object().cloned().unwrap();
        let result =
            tokio::time::timeout(Duration::from_millis(50), provider.install_or_upgrade(&r)).await;

        assert!(result.is_err());
        assert!(executor.lines()[0].contains("plat-values-"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_helm_install_skips_known_repository() {
        let executor = Arc::new(ScriptedExecutor::new().on(
            "helm repo list",
            0,
            r#"[{"name": "plat-api", "url": "https://charts.example.com"}]"#,
            "",
        ));
        let provider = HelmProvider::new(executor.clone());
        provider
            .install_or_upgrade(&release("redis", Some("https://charts.example.com")))
            .await
            .unwrap();

        let lines = executor.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("helm upgrade --install"));
        assert!(!lines[1].contains("plat-values-"));
    }

    #[tokio::test]
    async fn test_helm_install_failure() {
        let executor = Arc::new(ScriptedExecutor::new().on(
            "helm upgrade",
            1,
            "",
            "timed out waiting for the condition",
        ));
        let provider = HelmProvider::new(executor);
        match provider
            .install_or_upgrade(&release("./charts/api", None))
            .await
        {
            Err(ReleaseError::Failed { action, release, .. }) => {
                assert_eq!(action, "install");
                assert_eq!(release, "api");
            }
            other => panic!("expected install failure, got {:?}", other),
        }
    }
}
