//! Environment-level operations: the entry point for the CLI

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};

use super::cluster::{cluster_name, ClusterManager};
use super::services::{DependencyLevels, ServiceError, ServiceOrchestrator, UndeploySummary};
use super::OrchestratorConfig;
use crate::config::{Environment, ExecutionMode, ResolvedService};
use crate::tools::cluster::{ClusterError, ClusterProvider, ClusterState, ClusterStatus, K3dProvider};
use crate::tools::process::{ProcessExecutor, SystemExecutor};
use crate::tools::release::{HelmProvider, ReleaseProvider, ReleaseState};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Required tool '{tool}' is not available: {message}")]
    Prerequisite { tool: String, message: String },

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Service error: {0}")]
    Services(#[from] ServiceError),

    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        operation: &'static str,
        seconds: u64,
    },

    #[error("Service '{0}' is not defined in this environment")]
    UnknownService(String),
}

/// Versions reported by the external tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolVersions {
    pub cluster_tool: String,
    pub release_tool: String,
}

/// How to reach one deployed service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub service: String,
    pub url: String,
}

/// Summary produced after a successful `up`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessInfo {
    pub environment: String,
    pub cluster: String,
    pub namespace: String,
    pub mode: ExecutionMode,
    pub levels: DependencyLevels,
    pub endpoints: Vec<ServiceEndpoint>,
    /// Locally built services and their source directories
    pub local_sources: BTreeMap<String, PathBuf>,
}

/// Summary produced by `down`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownSummary {
    pub undeploy: UndeploySummary,
    /// Set when undeploy could not run to completion (cycle, release
    /// listing failed, time limit reached)
    pub undeploy_error: Option<String>,
    pub cluster_deleted: bool,
}

/// Cluster part of an environment snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub name: String,
    pub state: ClusterState,
    pub servers: u32,
    pub agents: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<ClusterStatus> for ClusterSnapshot {
    fn from(status: ClusterStatus) -> Self {
        Self {
            name: status.name,
            state: status.state,
            servers: status.servers,
            agents: status.agents,
            error: status.error,
        }
    }
}

/// Per-service part of an environment snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub name: String,
    pub state: ReleaseState,
    pub version: String,
    pub is_local: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    pub chart: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub updated: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Point-in-time view of an environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentStatus {
    pub name: String,
    pub mode: ExecutionMode,
    pub cluster: ClusterSnapshot,
    pub services: BTreeMap<String, ServiceSnapshot>,
}

impl EnvironmentStatus {
    pub fn deployed_count(&self) -> usize {
        self.services
            .values()
            .filter(|s| s.state == ReleaseState::Deployed)
            .count()
    }
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

/// URL for a service's primary port, if it exposes one
pub fn service_url(service: &ResolvedService, domain: &str) -> Option<String> {
    let port = *service.ports.first()?;
    Some(if domain.is_empty() {
        format!("http://localhost:{}", port)
    } else if port == 80 {
        format!("http://{}.{}", service.name, domain)
    } else {
        format!("http://{}.{}:{}", service.name, domain, port)
    })
}

pub fn build_access_info(env: &Environment, levels: DependencyLevels) -> AccessInfo {
    AccessInfo {
        environment: env.name.clone(),
        cluster: cluster_name(&env.name),
        namespace: env.namespace().to_string(),
        mode: env.mode,
        levels,
        endpoints: env
            .services
            .values()
            .filter_map(|s| {
                service_url(s, &env.defaults.domain).map(|url| ServiceEndpoint {
                    service: s.name.clone(),
                    url,
                })
            })
            .collect(),
        local_sources: env
            .services
            .values()
            .filter(|s| s.is_local)
            .filter_map(|s| {
                s.local_source
                    .as_ref()
                    .map(|src| (s.name.clone(), src.path.clone()))
            })
            .collect(),
    }
}

fn service_snapshot(
    service: &ResolvedService,
    status: Option<crate::tools::release::ReleaseStatus>,
) -> ServiceSnapshot {
    let (state, updated, error) = match status {
        Some(status) => (status.state, status.updated, status.error),
        None => (ReleaseState::NotDeployed, String::new(), None),
    };
    ServiceSnapshot {
        name: service.name.clone(),
        state,
        version: service.version.clone(),
        is_local: service.is_local,
        local_path: service
            .local_source
            .as_ref()
            .filter(|_| service.is_local)
            .map(|src| src.path.clone()),
        chart: service.chart.name.clone(),
        ports: service.ports.clone(),
        updated,
        error,
    }
}

async fn within<T, E>(
    limit: Duration,
    operation: &'static str,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, OrchestratorError>
where
    OrchestratorError: From<E>,
{
    match timeout(limit, fut).await {
        Ok(result) => result.map_err(OrchestratorError::from),
        Err(_) => Err(OrchestratorError::Timeout {
            operation,
            seconds: limit.as_secs(),
        }),
    }
}

// ============================================================================
// SBIO: Facade over cluster and service management
// ============================================================================

pub struct Orchestrator {
    cluster_provider: Arc<dyn ClusterProvider>,
    release_provider: Arc<dyn ReleaseProvider>,
    clusters: ClusterManager,
    services: ServiceOrchestrator,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        cluster_provider: Arc<dyn ClusterProvider>,
        release_provider: Arc<dyn ReleaseProvider>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            clusters: ClusterManager::new(
                cluster_provider.clone(),
                config.ready_timeout,
                config.ready_interval,
            ),
            services: ServiceOrchestrator::new(release_provider.clone()),
            cluster_provider,
            release_provider,
            config,
        }
    }

    /// k3d and helm driven through `executor`
    pub fn with_executor(executor: Arc<dyn ProcessExecutor>, config: OrchestratorConfig) -> Self {
        Self::new(
            Arc::new(K3dProvider::new(executor.clone())),
            Arc::new(HelmProvider::new(executor)),
            config,
        )
    }

    pub fn system(config: OrchestratorConfig) -> Self {
        Self::with_executor(Arc::new(SystemExecutor::new()), config)
    }

    pub fn clusters(&self) -> &ClusterManager {
        &self.clusters
    }

    /// Both external tools must answer a version query
    pub async fn validate_prerequisites(&self) -> Result<ToolVersions, OrchestratorError> {
        let cluster_tool = self.cluster_provider.tool_version().await.map_err(|e| {
            OrchestratorError::Prerequisite {
                tool: "k3d".to_string(),
                message: e.to_string(),
            }
        })?;
        let release_tool = self.release_provider.tool_version().await.map_err(|e| {
            OrchestratorError::Prerequisite {
                tool: "helm".to_string(),
                message: e.to_string(),
            }
        })?;
        Ok(ToolVersions {
            cluster_tool,
            release_tool,
        })
    }

    /// Ensure the cluster, then deploy every service level by level
    pub async fn up(&self, env: &Environment) -> Result<AccessInfo, OrchestratorError> {
        info!("Starting environment {}", env.name);
        within(self.config.up_timeout, "up", async {
            self.clusters.ensure_cluster(env).await?;
            let levels = self.services.deploy_services(env).await?;
            let access = build_access_info(env, levels);
            info!(
                "Environment {} is ready ({} services)",
                env.name,
                env.services.len()
            );
            Ok::<_, OrchestratorError>(access)
        })
        .await
    }

    /// Remove services best-effort, then delete the cluster when asked to.
    /// Only a failed cluster deletion is fatal. Service removal and cluster
    /// deletion each get their own time limit, so a stuck uninstall cannot
    /// keep the cluster alive.
    pub async fn down(
        &self,
        env: &Environment,
        delete_cluster: bool,
    ) -> Result<DownSummary, OrchestratorError> {
        info!("Stopping environment {}", env.name);
        let mut summary = DownSummary::default();

        match within(
            self.config.down_timeout,
            "undeploy",
            self.services.undeploy_services(env),
        )
        .await
        {
            Ok(undeploy) => {
                if !undeploy.failed.is_empty() {
                    warn!("{} service(s) could not be removed", undeploy.failed.len());
                }
                summary.undeploy = undeploy;
            }
            Err(e) => {
                warn!("Service removal incomplete: {}", e);
                summary.undeploy_error = Some(e.to_string());
            }
        }

        if delete_cluster {
            within(
                self.config.down_timeout,
                "cluster deletion",
                self.clusters.delete_cluster(env),
            )
            .await?;
            summary.cluster_deleted = true;
        } else {
            info!("Cluster {} kept running", cluster_name(&env.name));
        }

        Ok(summary)
    }

    /// Snapshot of the cluster and every service. Sub-query failures are
    /// embedded in the snapshot; only the overall time limit can fail it.
    pub async fn status(&self, env: &Environment) -> Result<EnvironmentStatus, OrchestratorError> {
        within(self.config.status_timeout, "status", async {
            let (cluster, mut releases) = tokio::join!(
                self.clusters.cluster_status(env),
                self.services.service_statuses(env)
            );

            let cluster = match cluster {
                Ok(status) => ClusterSnapshot::from(status),
                Err(e) => ClusterSnapshot {
                    name: cluster_name(&env.name),
                    state: ClusterState::NotFound,
                    servers: 0,
                    agents: 0,
                    error: Some(e.to_string()),
                },
            };

            let services = env
                .services
                .values()
                .map(|s| (s.name.clone(), service_snapshot(s, releases.remove(&s.name))))
                .collect();

            Ok::<_, OrchestratorError>(EnvironmentStatus {
                name: env.name.clone(),
                mode: env.mode,
                cluster,
                services,
            })
        })
        .await
    }

    fn lookup<'a>(
        &self,
        env: &'a Environment,
        name: &str,
    ) -> Result<&'a ResolvedService, OrchestratorError> {
        env.service(name)
            .ok_or_else(|| OrchestratorError::UnknownService(name.to_string()))
    }

    /// Deploy a single service (its dependencies are assumed to be running)
    pub async fn start_service(&self, env: &Environment, name: &str) -> Result<(), OrchestratorError> {
        let service = self.lookup(env, name)?;
        within(self.config.up_timeout, "start", async {
            self.clusters.ensure_cluster(env).await?;
            self.services.deploy_service(env, service).await?;
            Ok::<_, OrchestratorError>(())
        })
        .await
    }

    pub async fn stop_service(&self, env: &Environment, name: &str) -> Result<(), OrchestratorError> {
        let service = self.lookup(env, name)?;
        within(self.config.down_timeout, "stop", async {
            self.services.undeploy_service(env, service).await
        })
        .await
    }

    pub async fn restart_service(
        &self,
        env: &Environment,
        name: &str,
    ) -> Result<(), OrchestratorError> {
        let service = self.lookup(env, name)?;
        within(self.config.up_timeout, "restart", async {
            self.clusters.ensure_cluster(env).await?;
            self.services.undeploy_service(env, service).await?;
            self.services.deploy_service(env, service).await?;
            Ok::<_, OrchestratorError>(())
        })
        .await
    }
}
