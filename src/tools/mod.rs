//! Adapters over the external tools: process execution, k3d, helm, kubectl

pub mod cluster;
pub mod kubectl;
pub mod process;
pub mod release;

pub use cluster::{
    ClusterError, ClusterInfo, ClusterProvider, ClusterSpec, ClusterState, ClusterStatus,
    K3dProvider,
};
pub use kubectl::LogsOptions;
pub use process::{Command, ExecuteResult, ProcessError, ProcessExecutor, SystemExecutor};
pub use release::{
    HelmProvider, Release, ReleaseError, ReleaseInfo, ReleaseProvider, ReleaseState,
    ReleaseStatus,
};
