//! Dependency leveling and concurrent per-level deploy/undeploy

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::values::{self, ValuesError};
use crate::config::{Environment, ResolvedService};
use crate::tools::release::{Release, ReleaseError, ReleaseProvider, ReleaseStatus};

/// One service that failed during a fan-out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceFailure {
    pub service: String,
    pub error: String,
}

impl fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.service, self.error)
    }
}

fn join_failures(failures: &[ServiceFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Dependency cycle detected among services: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    #[error("Service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },

    #[error("Unknown service '{0}'")]
    UnknownService(String),

    #[error("Deployment failed at level {level}: {}", join_failures(.failures))]
    DeployFailed {
        level: usize,
        failures: Vec<ServiceFailure>,
    },

    #[error("Failed to list releases in namespace '{namespace}': {source}")]
    ListReleases {
        namespace: String,
        #[source]
        source: ReleaseError,
    },

    #[error("Values error: {0}")]
    Values(#[from] ValuesError),

    #[error("Release error: {0}")]
    Release(#[from] ReleaseError),
}

impl ServiceError {
    /// Names of the services that failed, for deploy failures
    pub fn failed_services(&self) -> Vec<&str> {
        match self {
            Self::DeployFailed { failures, .. } => {
                failures.iter().map(|f| f.service.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// Levels of service names; members of one level never depend on each other
pub type DependencyLevels = Vec<Vec<String>>;

/// Outcome of a best-effort undeploy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndeploySummary {
    pub removed: Vec<String>,
    /// Services with no release in the namespace
    pub skipped: Vec<String>,
    pub failed: Vec<ServiceFailure>,
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

/// Group services into dependency levels (Kahn's algorithm).
///
/// Each service counts its own unresolved dependencies; every service whose
/// count is zero forms the next level (alphabetical). When nothing is ready
/// but services remain, the remainder contains a cycle and no levels are
/// returned.
pub fn compute_levels(
    services: &BTreeMap<String, ResolvedService>,
) -> Result<DependencyLevels, ServiceError> {
    let mut pending: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for (name, service) in services {
        let deps: BTreeSet<&str> = service.dependencies.iter().map(String::as_str).collect();
        for dep in &deps {
            if !services.contains_key(*dep) {
                return Err(ServiceError::UnknownDependency {
                    service: name.clone(),
                    dependency: dep.to_string(),
                });
            }
            dependents.entry(*dep).or_default().push(name.as_str());
        }
        pending.insert(name.as_str(), deps.len());
    }

    let mut levels = Vec::new();
    while !pending.is_empty() {
        let level: Vec<&str> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| *name)
            .collect();

        if level.is_empty() {
            return Err(ServiceError::DependencyCycle(
                pending.keys().map(|s| s.to_string()).collect(),
            ));
        }

        for name in &level {
            pending.remove(name);
            for dependent in dependents.get(name).into_iter().flatten() {
                if let Some(count) = pending.get_mut(dependent) {
                    *count = count.saturating_sub(1);
                }
            }
        }

        levels.push(level.into_iter().map(str::to_string).collect());
    }

    Ok(levels)
}

/// Everything helm needs to install one service
pub fn build_release(service: &ResolvedService, env: &Environment, values: values::Values) -> Release {
    Release {
        name: service.release_name().to_string(),
        chart: service.chart.name.clone(),
        repository: service.chart.repository.clone(),
        version: service.chart.version.clone(),
        namespace: env.namespace().to_string(),
        values,
        // The values file is already merged into `values`
        values_files: Vec::new(),
    }
}

/// Release names this environment owns; anything else in the namespace is left alone
pub fn expected_release_names(env: &Environment) -> HashSet<String> {
    env.services
        .values()
        .flat_map(|s| [s.name.clone(), s.release_name().to_string()])
        .collect()
}

// ============================================================================
// SBIO: I/O orchestration over the provider trait
// ============================================================================

/// Deploys and removes an environment's services in dependency order
pub struct ServiceOrchestrator {
    releases: Arc<dyn ReleaseProvider>,
}

impl ServiceOrchestrator {
    pub fn new(releases: Arc<dyn ReleaseProvider>) -> Self {
        Self { releases }
    }

    /// Resolve values and install or upgrade a single service
    pub async fn deploy_service(
        &self,
        env: &Environment,
        service: &ResolvedService,
    ) -> Result<(), ServiceError> {
        let values = values::resolve_values(service, env).await?;
        for warning in values::validate_values(service, &values)? {
            warn!("{}", warning);
        }

        let release = build_release(service, env, values);
        info!(
            "Deploying {} ({}, {})",
            service.name,
            release.chart,
            if service.is_local { "local" } else { service.version.as_str() }
        );
        self.releases.install_or_upgrade(&release).await?;
        info!("Deployed {}", service.name);
        Ok(())
    }

    /// Deploy every service, one level at a time. Services inside a level run
    /// concurrently; the first level with a failure ends the run once all of
    /// its services have finished.
    pub async fn deploy_services(&self, env: &Environment) -> Result<DependencyLevels, ServiceError> {
        let levels = compute_levels(&env.services)?;
        debug!("Deployment levels: {:?}", levels);

        for (index, level) in levels.iter().enumerate() {
            info!("Deploying level {}: {}", index, level.join(", "));

            let results = join_all(level.iter().map(|name| async move {
                let result = match env.service(name) {
                    Some(service) => self.deploy_service(env, service).await,
                    None => Err(ServiceError::UnknownService(name.clone())),
                };
                (name, result)
            }))
            .await;

            let failures: Vec<ServiceFailure> = results
                .into_iter()
                .filter_map(|(name, result)| {
                    result.err().map(|e| ServiceFailure {
                        service: name.clone(),
                        error: e.to_string(),
                    })
                })
                .collect();

            if !failures.is_empty() {
                for failure in &failures {
                    warn!("Failed to deploy {}", failure);
                }
                return Err(ServiceError::DeployFailed {
                    level: index,
                    failures,
                });
            }
        }

        Ok(levels)
    }

    /// Uninstall one service's release. A missing release is not an error.
    pub async fn undeploy_service(
        &self,
        env: &Environment,
        service: &ResolvedService,
    ) -> Result<(), ServiceError> {
        info!("Removing {}", service.name);
        self.releases
            .uninstall(service.release_name(), env.namespace())
            .await?;
        Ok(())
    }

    /// Remove every release this environment owns, in reverse dependency
    /// order. Individual failures are logged and collected, never fatal.
    pub async fn undeploy_services(&self, env: &Environment) -> Result<UndeploySummary, ServiceError> {
        let levels = compute_levels(&env.services)?;

        let namespace = env.namespace();
        let expected = expected_release_names(env);
        let installed: HashSet<String> = self
            .releases
            .list_releases(namespace)
            .await
            .map_err(|source| ServiceError::ListReleases {
                namespace: namespace.to_string(),
                source,
            })?
            .into_iter()
            .map(|r| r.name)
            .filter(|name| expected.contains(name))
            .collect();

        let mut summary = UndeploySummary::default();
        for (index, level) in levels.iter().enumerate().rev() {
            let (present, absent): (Vec<&String>, Vec<&String>) = level
                .iter()
                .partition(|name| {
                    env.service(name)
                        .map(|s| installed.contains(s.release_name()))
                        .unwrap_or(false)
                });
            summary.skipped.extend(absent.into_iter().cloned());
            if present.is_empty() {
                continue;
            }

            debug!("Undeploying level {}: {:?}", index, present);
            let results = join_all(present.into_iter().map(|name| async move {
                let result = match env.service(name) {
                    Some(service) => self.undeploy_service(env, service).await,
                    None => Err(ServiceError::UnknownService(name.clone())),
                };
                (name, result)
            }))
            .await;

            for (name, result) in results {
                match result {
                    Ok(()) => summary.removed.push(name.clone()),
                    Err(e) => {
                        warn!("Failed to remove {}: {}", name, e);
                        summary.failed.push(ServiceFailure {
                            service: name.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        Ok(summary)
    }

    /// Release status for every service. Never fails as a whole: a missing
    /// release is `not-deployed` and other errors become `unknown`.
    pub async fn service_statuses(&self, env: &Environment) -> BTreeMap<String, ReleaseStatus> {
        let namespace = env.namespace();
        let results = join_all(env.services.values().map(|service| async move {
            let release = service.release_name();
            let status = match self.releases.release_status(release, namespace).await {
                Ok(status) => status,
                Err(ReleaseError::NotFound(_)) => ReleaseStatus::not_deployed(release, namespace),
                Err(e) => {
                    debug!("Status query for {} failed: {}", release, e);
                    ReleaseStatus::unknown(release, namespace, e.to_string())
                }
            };
            (service.name.clone(), status)
        }))
        .await;

        results.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Defaults, ExecutionMode};
    use crate::tools::release::mock::FakeReleaseProvider;
    use crate::tools::release::ReleaseState;

    fn env(services: &[(&str, &[&str])]) -> Environment {
        services.iter().fold(
            Environment::new("shop", ExecutionMode::Artifact, Defaults::default()),
            |env, (name, deps)| {
                env.with_service(
                    ResolvedService::new(*name, "./charts/app").depends_on(deps.iter().copied()),
                )
            },
        )
    }

    #[test]
    fn test_levels_chain() {
        let env = env(&[("web", &["api"]), ("api", &["db"]), ("db", &[])]);
        let levels = compute_levels(&env.services).unwrap();
        assert_eq!(levels, vec![vec!["db"], vec!["api"], vec!["web"]]);
    }

    #[test]
    fn test_levels_independent_services_share_a_level() {
        let env = env(&[
            ("worker", &["db", "cache"]),
            ("cache", &[]),
            ("api", &["db"]),
            ("db", &[]),
        ]);
        let levels = compute_levels(&env.services).unwrap();
        assert_eq!(levels, vec![vec!["cache", "db"], vec!["api", "worker"]]);
    }

    #[test]
    fn test_levels_respect_dependencies() {
        let env = env(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["a", "b"]),
            ("d", &[]),
            ("e", &["d", "c"]),
            ("f", &["b", "b"]),
        ]);
        let levels = compute_levels(&env.services).unwrap();

        let mut seen: BTreeMap<String, usize> = BTreeMap::new();
        for (i, level) in levels.iter().enumerate() {
            let mut sorted = level.clone();
            sorted.sort();
            assert_eq!(&sorted, level);
            for name in level {
                assert!(seen.insert(name.clone(), i).is_none());
            }
        }
        assert_eq!(seen.len(), env.services.len());
        for (name, service) in &env.services {
            for dep in &service.dependencies {
                assert!(seen[dep] < seen[name], "{} must come before {}", dep, name);
            }
        }
    }

    #[test]
    fn test_levels_cycle() {
        let env = env(&[("a", &["b"]), ("b", &["a"]), ("c", &[])]);
        match compute_levels(&env.services) {
            Err(ServiceError::DependencyCycle(names)) => assert_eq!(names, vec!["a", "b"]),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_levels_unknown_dependency() {
        let env = env(&[("api", &["ghost"])]);
        assert!(matches!(
            compute_levels(&env.services),
            Err(ServiceError::UnknownDependency { .. })
        ));
    }

    #[tokio::test]
    async fn test_deploy_in_level_order() {
        let env = env(&[("web", &["api"]), ("api", &["db"]), ("db", &[])]);
        let releases = Arc::new(FakeReleaseProvider::new());
        let orchestrator = ServiceOrchestrator::new(releases.clone());

        orchestrator.deploy_services(&env).await.unwrap();
        assert_eq!(releases.installs(), vec!["db", "api", "web"]);

        let api = releases.installed("api").unwrap();
        assert_eq!(api.namespace, "default");
        assert_eq!(api.chart, "./charts/app");
        assert_eq!(api.values["image"]["repository"], "registry.local/api");
    }

    #[tokio::test]
    async fn test_deploy_failure_stops_after_level() {
        let env = env(&[("a", &[]), ("b", &[]), ("c", &["a"]), ("d", &["b"])]);
        let releases = Arc::new(FakeReleaseProvider::new().failing(&["a"]));
        let orchestrator = ServiceOrchestrator::new(releases.clone());

        let err = orchestrator.deploy_services(&env).await.unwrap_err();
        assert_eq!(err.failed_services(), vec!["a"]);
        assert!(err.to_string().contains("a:"));

        let installs = releases.installs();
        assert!(installs.contains(&"b".to_string()));
        assert!(!installs.contains(&"c".to_string()));
        assert!(!installs.contains(&"d".to_string()));
    }

    #[tokio::test]
    async fn test_deploy_cycle_has_no_side_effects() {
        let env = env(&[("a", &["b"]), ("b", &["a"])]);
        let releases = Arc::new(FakeReleaseProvider::new());
        let orchestrator = ServiceOrchestrator::new(releases.clone());

        assert!(matches!(
            orchestrator.deploy_services(&env).await,
            Err(ServiceError::DependencyCycle(_))
        ));
        assert!(releases.installs().is_empty());
    }

    #[tokio::test]
    async fn test_undeploy_reverse_order_and_foreign_releases() {
        let env = env(&[("web", &["api"]), ("api", &["db"]), ("db", &[]), ("docs", &[])]);
        let releases = Arc::new(
            FakeReleaseProvider::new()
                .with_installed(&["db", "api", "web"])
                .with_foreign(&["billing", "dbx"]),
        );
        let orchestrator = ServiceOrchestrator::new(releases.clone());

        let summary = orchestrator.undeploy_services(&env).await.unwrap();
        let uninstalls = releases.uninstalls();
        assert_eq!(uninstalls, vec!["web", "api", "db"]);
        assert_eq!(summary.removed, uninstalls);
        assert_eq!(summary.skipped, vec!["docs"]);
        assert!(summary.failed.is_empty());
    }

    #[tokio::test]
    async fn test_service_statuses_never_fail() {
        let env = env(&[("api", &[]), ("db", &[]), ("cache", &[])]);
        let releases = Arc::new(
            FakeReleaseProvider::new()
                .with_installed(&["db"])
                .broken_status(&["cache"]),
        );
        let orchestrator = ServiceOrchestrator::new(releases);

        let statuses = orchestrator.service_statuses(&env).await;
        assert_eq!(statuses.len(), 3);
        assert_eq!(statuses["api"].state, ReleaseState::NotDeployed);
        assert_eq!(statuses["db"].state, ReleaseState::Deployed);
        assert_eq!(statuses["cache"].state, ReleaseState::Unknown);
        assert!(statuses["cache"].error.is_some());
    }

    #[test]
    fn test_build_release_ignores_values_file() {
        let mut service = ResolvedService::new("api", "microservice");
        service.values_file = Some("api.yml".into());
        service.chart.version = Some("0.3.1".to_string());
        let env = env(&[]);
        let release = build_release(&service, &env, values::Values::new());
        assert!(release.values_files.is_empty());
        assert_eq!(release.version.as_deref(), Some("0.3.1"));
    }
}
