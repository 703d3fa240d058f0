pub mod cluster;
pub mod environment;
pub mod services;
pub mod values;

pub use cluster::{cluster_name, ClusterManager};
pub use environment::{
    AccessInfo, ClusterSnapshot, DownSummary, EnvironmentStatus, Orchestrator, OrchestratorError,
    ServiceEndpoint, ServiceSnapshot, ToolVersions,
};
pub use services::{
    compute_levels, DependencyLevels, ServiceError, ServiceFailure, ServiceOrchestrator,
    UndeploySummary,
};
pub use values::{deep_merge, Values, ValuesError};

use std::time::Duration;

/// Time limits for orchestration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How long to wait for a new cluster to report running
    pub ready_timeout: Duration,
    pub ready_interval: Duration,
    pub up_timeout: Duration,
    pub down_timeout: Duration,
    pub status_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(60),
            ready_interval: Duration::from_secs(2),
            up_timeout: Duration::from_secs(600),
            down_timeout: Duration::from_secs(300),
            status_timeout: Duration::from_secs(10),
        }
    }
}
