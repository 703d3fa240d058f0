//! Cluster identity and lifecycle for one environment

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::Environment;
use crate::tools::cluster::{ClusterError, ClusterInfo, ClusterProvider, ClusterSpec, ClusterStatus};

/// Every cluster plat manages carries this prefix
pub const CLUSTER_PREFIX: &str = "plat-";

const INGRESS_PORTS: [u32; 2] = [80, 443];
const DISABLE_TRAEFIK: &str = "--k3s-arg=--disable=traefik@server:0";

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

/// Deterministic cluster name so repeated runs target the same cluster
pub fn cluster_name(env_name: &str) -> String {
    format!("{}{}", CLUSTER_PREFIX, env_name)
}

pub fn is_plat_cluster(name: &str) -> bool {
    name.len() > CLUSTER_PREFIX.len() && name.starts_with(CLUSTER_PREFIX)
}

/// Service ports that need their own load balancer mapping, ascending
pub fn extra_ports(env: &Environment) -> Vec<u32> {
    env.services
        .values()
        .flat_map(|s| s.ports.iter().copied())
        .filter(|p| *p > 0 && !INGRESS_PORTS.contains(p))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Creation spec: one server, no agents, ingress ports plus service ports
pub fn build_cluster_spec(env: &Environment) -> ClusterSpec {
    let ports = INGRESS_PORTS
        .iter()
        .copied()
        .chain(extra_ports(env))
        .map(|p| format!("{}:{}@loadbalancer", p, p))
        .collect();

    let labels = BTreeMap::from([
        ("plat.env".to_string(), env.name.clone()),
        ("plat.domain".to_string(), env.defaults.domain.clone()),
        ("plat.namespace".to_string(), env.defaults.namespace.clone()),
    ]);

    ClusterSpec {
        name: cluster_name(&env.name),
        image: None,
        servers: 1,
        agents: 0,
        ports,
        volumes: Vec::new(),
        options: vec![DISABLE_TRAEFIK.to_string()],
        labels,
    }
}

// ============================================================================
// SBIO: I/O orchestration over the provider trait
// ============================================================================

/// Owns the `Absent -> Creating -> Ready -> Deleting -> Absent` lifecycle
pub struct ClusterManager {
    provider: Arc<dyn ClusterProvider>,
    ready_timeout: Duration,
    ready_interval: Duration,
}

impl ClusterManager {
    pub fn new(
        provider: Arc<dyn ClusterProvider>,
        ready_timeout: Duration,
        ready_interval: Duration,
    ) -> Self {
        Self {
            provider,
            ready_timeout,
            ready_interval,
        }
    }

    /// Make sure the environment's cluster exists and is running.
    /// A running cluster is left untouched.
    pub async fn ensure_cluster(&self, env: &Environment) -> Result<ClusterStatus, ClusterError> {
        let name = cluster_name(&env.name);

        match self.provider.cluster_status(&name).await {
            Ok(status) if status.is_running() => {
                debug!("Cluster {} already running", name);
                return Ok(status);
            }
            Ok(status) => info!("Cluster {} is {}, creating", name, status.state),
            Err(ClusterError::NotFound(_)) => info!("Cluster {} not found, creating", name),
            Err(e) => warn!("Could not query cluster {}: {}, creating", name, e),
        }

        let spec = build_cluster_spec(env);
        self.provider.create_cluster(&spec).await?;
        self.wait_until_ready(&name).await
    }

    async fn wait_until_ready(&self, name: &str) -> Result<ClusterStatus, ClusterError> {
        let deadline = Instant::now() + self.ready_timeout;

        loop {
            match self.provider.cluster_status(name).await {
                Ok(status) if status.is_running() => {
                    info!("Cluster {} is ready", name);
                    return Ok(status);
                }
                Ok(status) => debug!("Cluster {} is {}", name, status.state),
                Err(e) => debug!("Cluster {} not ready yet: {}", name, e),
            }

            if Instant::now() + self.ready_interval > deadline {
                return Err(ClusterError::ReadyTimeout {
                    name: name.to_string(),
                    seconds: self.ready_timeout.as_secs(),
                });
            }
            sleep(self.ready_interval).await;
        }
    }

    /// Deletion is trusted to be synchronous; absence is not polled for
    pub async fn delete_cluster(&self, env: &Environment) -> Result<(), ClusterError> {
        let name = cluster_name(&env.name);
        info!("Deleting cluster {}", name);
        self.provider.delete_cluster(&name).await
    }

    pub async fn cluster_status(&self, env: &Environment) -> Result<ClusterStatus, ClusterError> {
        self.provider.cluster_status(&cluster_name(&env.name)).await
    }

    /// Clusters created by plat, ignoring anything else k3d knows about
    pub async fn list_clusters(&self) -> Result<Vec<ClusterInfo>, ClusterError> {
        Ok(self
            .provider
            .list_clusters()
            .await?
            .into_iter()
            .filter(|c| is_plat_cluster(&c.name))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Defaults, ExecutionMode, ResolvedService};
    use crate::tools::cluster::mock::FakeClusterProvider;
    use crate::tools::cluster::ClusterState;

    fn env() -> Environment {
        let mut api = ResolvedService::new("api", "microservice");
        api.ports = vec![8080, 80];
        let mut web = ResolvedService::new("web", "microservice");
        web.ports = vec![3000, 8080, 443];
        Environment::new("shop", ExecutionMode::Artifact, Defaults::default())
            .with_service(api)
            .with_service(web)
    }

    fn manager(provider: Arc<FakeClusterProvider>) -> ClusterManager {
        ClusterManager::new(provider, Duration::from_millis(200), Duration::from_millis(10))
    }

    #[test]
    fn test_cluster_name() {
        assert_eq!(cluster_name("shop"), "plat-shop");
        assert!(is_plat_cluster("plat-shop"));
        assert!(!is_plat_cluster("plat-"));
        assert!(!is_plat_cluster("k3s-default"));
    }

    #[test]
    fn test_build_cluster_spec() {
        let spec = build_cluster_spec(&env());
        assert_eq!(spec.name, "plat-shop");
        assert_eq!(spec.servers, 1);
        assert_eq!(spec.agents, 0);
        assert_eq!(
            spec.ports,
            vec![
                "80:80@loadbalancer",
                "443:443@loadbalancer",
                "3000:3000@loadbalancer",
                "8080:8080@loadbalancer",
            ]
        );
        assert_eq!(spec.labels["plat.env"], "shop");
        assert_eq!(spec.labels["plat.domain"], "platform.local");
        assert_eq!(spec.labels["plat.namespace"], "default");
    }

    #[test]
    fn test_extra_ports_skip_unset_port() {
        let mut db = ResolvedService::new("db", "bitnami/postgresql");
        db.ports = vec![0, 5432];
        let env = env().with_service(db);
        assert_eq!(extra_ports(&env), vec![3000, 5432, 8080]);
    }

    #[tokio::test]
    async fn test_ensure_running_cluster_is_noop() {
        let provider = Arc::new(FakeClusterProvider::running());
        let status = manager(provider.clone()).ensure_cluster(&env()).await.unwrap();
        assert!(status.is_running());
        assert_eq!(provider.create_count(), 0);
    }

    #[tokio::test]
    async fn test_ensure_creates_and_waits() {
        let provider = Arc::new(
            FakeClusterProvider::new()
                .then_missing()
                .then_missing()
                .then_state(ClusterState::Other("starting".to_string()))
                .then_state(ClusterState::Running),
        );
        let status = manager(provider.clone()).ensure_cluster(&env()).await.unwrap();
        assert!(status.is_running());
        assert_eq!(provider.create_count(), 1);
        assert_eq!(*provider.status_calls.lock().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_ensure_times_out() {
        let provider = Arc::new(
            FakeClusterProvider::new().then_state(ClusterState::Other("stopped".to_string())),
        );
        let result = manager(provider).ensure_cluster(&env()).await;
        match result {
            Err(ClusterError::ReadyTimeout { name, .. }) => assert_eq!(name, "plat-shop"),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_failure_is_not_retried() {
        let provider = Arc::new(FakeClusterProvider::new().then_missing().failing_create());
        let result = manager(provider.clone()).ensure_cluster(&env()).await;
        assert!(matches!(result, Err(ClusterError::CreateFailed { .. })));
        assert_eq!(provider.create_count(), 1);
    }

    #[tokio::test]
    async fn test_list_filters_foreign_clusters() {
        let provider = Arc::new(
            FakeClusterProvider::new().with_clusters(&["plat-shop", "k3s-default", "plat-"]),
        );
        let clusters = manager(provider).list_clusters().await.unwrap();
        let names: Vec<_> = clusters.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["plat-shop"]);
    }

    #[tokio::test]
    async fn test_delete_cluster() {
        let provider = Arc::new(FakeClusterProvider::running());
        manager(provider.clone()).delete_cluster(&env()).await.unwrap();
        assert_eq!(*provider.deleted.lock().unwrap(), vec!["plat-shop".to_string()]);
    }
}
