//! Background Jobs
//!
//! - `workspace_reclaim`: removes abandoned job workspaces and watches disk
//!   utilization
//!
//! ```ignore
//! use prefab_gateway::jobs::{workspace_reclaim_task, WorkspaceReclaimConfig, WorkspaceReclaimMetrics};
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let metrics = Arc::new(WorkspaceReclaimMetrics::new());
//! tokio::spawn(workspace_reclaim_task(config, metrics.clone(), shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! ```

pub mod workspace_reclaim;

pub use workspace_reclaim::{
    sweep_once, workspace_reclaim_task, SweepReport, WorkspaceReclaimConfig,
    WorkspaceReclaimMetrics, WorkspaceReclaimSnapshot,
};
