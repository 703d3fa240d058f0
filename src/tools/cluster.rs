//! Cluster lifecycle provider (k3d)

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::process::{self, Command, ProcessError, ProcessExecutor, SystemExecutor};

const K3D: &str = "k3d";

/// Errors that can occur during cluster operations
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Cluster '{0}' not found")]
    NotFound(String),

    #[error("Failed to create cluster '{name}': {message}")]
    CreateFailed { name: String, message: String },

    #[error("Failed to delete cluster '{name}': {message}")]
    DeleteFailed { name: String, message: String },

    #[error("Timed out after {seconds}s waiting for cluster '{name}' to be ready")]
    ReadyTimeout { name: String, seconds: u64 },

    #[error("Failed to parse k3d output: {0}")]
    Parse(String),

    #[error("Command error: {0}")]
    Process(#[from] ProcessError),
}

/// Observed cluster state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ClusterState {
    Running,
    NotFound,
    Error,
    /// Anything else the provider reports (e.g. "stopped")
    Other(String),
}

impl From<&str> for ClusterState {
    fn from(value: &str) -> Self {
        match value {
            "running" => Self::Running,
            "not-found" => Self::NotFound,
            "error" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for ClusterState {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<ClusterState> for String {
    fn from(value: ClusterState) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::NotFound => write!(f, "not-found"),
            Self::Error => write!(f, "error"),
            Self::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Point-in-time cluster status. Never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub name: String,
    pub state: ClusterState,
    pub servers: u32,
    pub agents: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClusterStatus {
    pub fn is_running(&self) -> bool {
        self.state == ClusterState::Running
    }
}

/// Summary entry from a cluster listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub name: String,
    pub state: ClusterState,
    pub servers: u32,
    pub agents: u32,
}

/// Everything needed to create a cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub servers: u32,
    pub agents: u32,
    /// Port mappings in k3d syntax, e.g. "8080:8080@loadbalancer"
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    /// Extra raw flags appended to the create command
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

// ============================================================================
// SBIO: Trait for abstraction (allows fakes in tests)
// ============================================================================

#[async_trait]
pub trait ClusterProvider: Send + Sync {
    async fn create_cluster(&self, spec: &ClusterSpec) -> Result<(), ClusterError>;

    async fn delete_cluster(&self, name: &str) -> Result<(), ClusterError>;

    /// Returns [`ClusterError::NotFound`] when no such cluster exists
    async fn cluster_status(&self, name: &str) -> Result<ClusterStatus, ClusterError>;

    async fn list_clusters(&self) -> Result<Vec<ClusterInfo>, ClusterError>;

    /// Version string of the backing tool; fails when it is unavailable
    async fn tool_version(&self) -> Result<String, ClusterError>;
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

/// Generate `k3d cluster create` arguments
pub fn generate_create_args(spec: &ClusterSpec) -> Vec<String> {
    let mut args = vec![
        "cluster".to_string(),
        "create".to_string(),
        spec.name.clone(),
    ];

    if let Some(image) = &spec.image {
        args.push("--image".to_string());
        args.push(image.clone());
    }

    if spec.servers > 0 {
        args.push("--servers".to_string());
        args.push(spec.servers.to_string());
    }

    if spec.agents > 0 {
        args.push("--agents".to_string());
        args.push(spec.agents.to_string());
    }

    for port in &spec.ports {
        args.push("--port".to_string());
        args.push(port.clone());
    }

    for volume in &spec.volumes {
        args.push("--volume".to_string());
        args.push(volume.clone());
    }

    for (key, value) in &spec.labels {
        args.push("--runtime-label".to_string());
        args.push(format!("{}={}@server:0", key, value));
    }

    args.extend(spec.options.iter().cloned());
    args
}

/// Generate `k3d cluster delete` arguments
pub fn generate_delete_args(name: &str) -> Vec<String> {
    vec!["cluster".to_string(), "delete".to_string(), name.to_string()]
}

/// Generate `k3d cluster get` arguments
pub fn generate_get_args(name: &str) -> Vec<String> {
    vec![
        "cluster".to_string(),
        "get".to_string(),
        name.to_string(),
        "-o".to_string(),
        "json".to_string(),
    ]
}

/// Generate `k3d cluster list` arguments
pub fn generate_list_args() -> Vec<String> {
    vec![
        "cluster".to_string(),
        "list".to_string(),
        "-o".to_string(),
        "json".to_string(),
    ]
}

#[derive(Debug, Deserialize)]
struct K3dCluster {
    #[serde(default)]
    name: String,
    #[serde(default)]
    nodes: Vec<K3dNode>,
}

#[derive(Debug, Deserialize)]
struct K3dNode {
    #[serde(default)]
    role: String,
    #[serde(rename = "State", default)]
    state: K3dNodeState,
}

#[derive(Debug, Default, Deserialize)]
struct K3dNodeState {
    #[serde(rename = "Running", default)]
    running: bool,
}

impl K3dCluster {
    fn summarize(&self) -> (ClusterState, u32, u32) {
        let servers: Vec<&K3dNode> = self
            .nodes
            .iter()
            .filter(|n| n.role.contains("server"))
            .collect();
        let agents = self.nodes.iter().filter(|n| n.role.contains("agent")).count();

        let state = if !servers.is_empty() && servers.iter().all(|n| n.state.running) {
            ClusterState::Running
        } else {
            ClusterState::Other("stopped".to_string())
        };

        (state, servers.len() as u32, agents as u32)
    }
}

fn parse_clusters(stdout: &str) -> Result<Vec<K3dCluster>, ClusterError> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(stdout).map_err(|e| ClusterError::Parse(e.to_string()))
}

/// Parse `k3d cluster get -o json` output for a single cluster
pub fn parse_cluster_status(name: &str, stdout: &str) -> Result<ClusterStatus, ClusterError> {
    let clusters = parse_clusters(stdout)?;
    let cluster = clusters
        .iter()
        .find(|c| c.name == name)
        .or_else(|| clusters.first())
        .ok_or_else(|| ClusterError::NotFound(name.to_string()))?;

    let (state, servers, agents) = cluster.summarize();
    Ok(ClusterStatus {
        name: name.to_string(),
        state,
        servers,
        agents,
        error: None,
    })
}

/// Parse `k3d cluster list -o json` output
pub fn parse_cluster_list(stdout: &str) -> Result<Vec<ClusterInfo>, ClusterError> {
    Ok(parse_clusters(stdout)?
        .iter()
        .map(|c| {
            let (state, servers, agents) = c.summarize();
            ClusterInfo {
                name: c.name.clone(),
                state,
                servers,
                agents,
            }
        })
        .collect())
}

/// k3d reports a missing cluster on stderr rather than with a distinct code
pub fn is_not_found(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("not found") || lower.contains("no nodes found")
}

// ============================================================================
// SBIO: I/O implementation (k3d CLI)
// ============================================================================

/// [`ClusterProvider`] backed by the k3d CLI
pub struct K3dProvider {
    executor: Arc<dyn ProcessExecutor>,
}

impl K3dProvider {
    pub fn new(executor: Arc<dyn ProcessExecutor>) -> Self {
        Self { executor }
    }
}

impl Default for K3dProvider {
    fn default() -> Self {
        Self::new(Arc::new(SystemExecutor::new()))
    }
}

#[async_trait]
impl ClusterProvider for K3dProvider {
    async fn create_cluster(&self, spec: &ClusterSpec) -> Result<(), ClusterError> {
        let command = Command::new(K3D).args(generate_create_args(spec));
        let result = self.executor.execute(&command).await?;
        if !result.success() {
            return Err(ClusterError::CreateFailed {
                name: spec.name.clone(),
                message: result.stderr,
            });
        }
        Ok(())
    }

    async fn delete_cluster(&self, name: &str) -> Result<(), ClusterError> {
        let command = Command::new(K3D).args(generate_delete_args(name));
        let result = self.executor.execute(&command).await?;
        if !result.success() {
            return Err(ClusterError::DeleteFailed {
                name: name.to_string(),
                message: result.stderr,
            });
        }
        Ok(())
    }

    async fn cluster_status(&self, name: &str) -> Result<ClusterStatus, ClusterError> {
        let command = Command::new(K3D).args(generate_get_args(name));
        let result = self.executor.execute(&command).await?;
        if !result.success() {
            if is_not_found(&result.stderr) {
                return Err(ClusterError::NotFound(name.to_string()));
            }
            return Err(ProcessError::Failed {
                program: K3D.to_string(),
                code: result.exit_code,
                stderr: result.stderr,
            }
            .into());
        }

        let status = parse_cluster_status(name, &result.stdout)?;
        debug!(
            "Cluster {} is {} ({} servers, {} agents)",
            name, status.state, status.servers, status.agents
        );
        Ok(status)
    }

    async fn list_clusters(&self) -> Result<Vec<ClusterInfo>, ClusterError> {
        let command = Command::new(K3D).args(generate_list_args());
        let result = self.executor.execute(&command).await?.check(K3D)?;
        parse_cluster_list(&result.stdout)
    }

    async fn tool_version(&self) -> Result<String, ClusterError> {
        Ok(process::tool_version(self.executor.as_ref(), K3D, &["version"]).await?)
    }
}

// ============================================================================
// SBIO: Fake implementation for testing (no I/O)
// ============================================================================


#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::process::mock::ScriptedExecutor;

    const GET_RUNNING: &str = r#"[{
        "name": "plat-shop",
        "nodes": [
            {"name": "k3d-plat-shop-server-0", "role": "server", "State": {"Running": true, "Status": "running"}},
            {"name": "k3d-plat-shop-serverlb", "role": "loadbalancer", "State": {"Running": true, "Status": "running"}}
        ]
    }]"#;

    #[test]
    fn test_cluster_state_roundtrip_strings() {
        assert_eq!(ClusterState::from("running"), ClusterState::Running);
        assert_eq!(ClusterState::from("not-found"), ClusterState::NotFound);
        assert_eq!(
            ClusterState::from("stopped"),
            ClusterState::Other("stopped".to_string())
        );
        assert_eq!(ClusterState::Other("stopped".into()).to_string(), "stopped");

        let json = serde_json::to_string(&ClusterState::NotFound).unwrap();
        assert_eq!(json, "\"not-found\"");
    }

    #[test]
    fn test_generate_create_args() {
        let spec = ClusterSpec {
            name: "plat-shop".to_string(),
            servers: 1,
            agents: 0,
            ports: vec!["80:80@loadbalancer".to_string()],
            options: vec!["--k3s-arg=--disable=traefik@server:0".to_string()],
            labels: BTreeMap::from([("plat.env".to_string(), "shop".to_string())]),
            ..Default::default()
        };

        let args = generate_create_args(&spec);
        assert_eq!(
            args,
            vec![
                "cluster",
                "create",
                "plat-shop",
                "--servers",
                "1",
                "--port",
                "80:80@loadbalancer",
                "--runtime-label",
                "plat.env=shop@server:0",
                "--k3s-arg=--disable=traefik@server:0",
            ]
        );
    }

    #[test]
    fn test_parse_cluster_status_running() {
        let status = parse_cluster_status("plat-shop", GET_RUNNING).unwrap();
        assert!(status.is_running());
        assert_eq!(status.servers, 1);
        assert_eq!(status.agents, 0);
    }

    #[test]
    fn test_parse_cluster_status_stopped() {
        let json = r#"[{"name": "plat-shop", "nodes": [
            {"role": "server", "State": {"Running": false}},
            {"role": "agent", "State": {"Running": false}}
        ]}]"#;
        let status = parse_cluster_status("plat-shop", json).unwrap();
        assert_eq!(status.state, ClusterState::Other("stopped".to_string()));
        assert_eq!(status.agents, 1);
    }

    #[test]
    fn test_parse_cluster_status_empty_is_not_found() {
        assert!(matches!(
            parse_cluster_status("plat-shop", "[]"),
            Err(ClusterError::NotFound(_))
        ));
        assert!(matches!(
            parse_cluster_status("plat-shop", ""),
            Err(ClusterError::NotFound(_))
        ));
    }

    #[test]
    fn test_parse_cluster_list() {
        let json = r#"[{"name": "plat-a", "nodes": []}, {"name": "other", "nodes": []}]"#;
        let clusters = parse_cluster_list(json).unwrap();
        let names: Vec<_> = clusters.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["plat-a", "other"]);
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(matches!(
            parse_cluster_list("not json"),
            Err(ClusterError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_k3d_status_not_found() {
        let executor = Arc::new(ScriptedExecutor::new().on(
            "k3d cluster get",
            1,
            "",
            "FATA[0000] No nodes found for given cluster",
        ));
        let provider = K3dProvider::new(executor);
        let result = provider.cluster_status("plat-shop").await;
        assert!(matches!(result, Err(ClusterError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_k3d_status_running() {
        let executor = Arc::new(ScriptedExecutor::new().on("k3d cluster get", 0, GET_RUNNING, ""));
        let provider = K3dProvider::new(executor.clone());
        let status = provider.cluster_status("plat-shop").await.unwrap();
        assert!(status.is_running());
        assert_eq!(executor.lines(), vec!["k3d cluster get plat-shop -o json"]);
    }

    #[tokio::test]
    async fn test_k3d_create_failure_carries_stderr() {
        let executor = Arc::new(ScriptedExecutor::new().on(
            "k3d cluster create",
            1,
            "",
            "port 80 already allocated",
        ));
        let provider = K3dProvider::new(executor);
        let spec = ClusterSpec {
            name: "plat-shop".to_string(),
            servers: 1,
            ..Default::default()
        };
        match provider.create_cluster(&spec).await {
            Err(ClusterError::CreateFailed { name, message }) => {
                assert_eq!(name, "plat-shop");
                assert!(message.contains("already allocated"));
            }
            other => panic!("expected CreateFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_k3d_delete() {
        let executor = Arc::new(ScriptedExecutor::new());
        let provider = K3dProvider::new(executor.clone());
        provider.delete_cluster("plat-shop").await.unwrap();
        assert_eq!(executor.lines(), vec!["k3d cluster delete plat-shop"]);
    }
}
