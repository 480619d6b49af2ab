//! Workspace Reclamation Background Task
//!
//! Jobs normally destroy their own workspace. Directories left behind by a
//! crash or a failed cleanup are removed here once they are older than the
//! configured maximum age. After every sweep the task samples disk
//! utilization of the workspace volume and warns or alerts above the
//! configured thresholds.

use crate::config::WorkspaceConfig;
use crate::constants::{DISK_ALERT_THRESHOLD, DISK_WARN_THRESHOLD};
use crate::telemetry::metrics;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct WorkspaceReclaimConfig {
    pub root: PathBuf,

    /// How often to sweep (default: 300 seconds)
    pub sweep_interval: Duration,

    /// Top-level entries older than this are removed (default: 1 hour)
    pub max_age: Duration,

    pub warn_threshold: f64,
    pub alert_threshold: f64,
}

impl WorkspaceReclaimConfig {
    /// `None` when staging is disabled.
    pub fn from_workspace(config: &WorkspaceConfig) -> Option<Self> {
        config.root.as_ref().map(|root| Self {
            root: root.clone(),
            sweep_interval: config.sweep_interval,
            max_age: config.max_age,
            warn_threshold: DISK_WARN_THRESHOLD,
            alert_threshold: DISK_ALERT_THRESHOLD,
        })
    }
}

// ============================================================================
// METRICS
// ============================================================================

#[derive(Debug, Default)]
pub struct WorkspaceReclaimMetrics {
    pub sweeps: AtomicU64,
    pub workspaces_removed: AtomicU64,
    pub bytes_freed: AtomicU64,
    pub sweep_errors: AtomicU64,
    /// Last sampled utilization, in parts per million.
    pub utilization_ppm: AtomicU64,
}

impl WorkspaceReclaimMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> WorkspaceReclaimSnapshot {
        WorkspaceReclaimSnapshot {
            sweeps: self.sweeps.load(Ordering::Relaxed),
            workspaces_removed: self.workspaces_removed.load(Ordering::Relaxed),
            bytes_freed: self.bytes_freed.load(Ordering::Relaxed),
            sweep_errors: self.sweep_errors.load(Ordering::Relaxed),
            utilization: self.utilization_ppm.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct WorkspaceReclaimSnapshot {
    pub sweeps: u64,
    pub workspaces_removed: u64,
    pub bytes_freed: u64,
    pub sweep_errors: u64,
    pub utilization: f64,
}

// ============================================================================
// SWEEP
// ============================================================================

/// Result of one sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub removed: u64,
    pub bytes_freed: u64,
    /// Fraction of the volume in use after the sweep, if it could be read.
    pub utilization: Option<f64>,
}

fn entry_size(path: &Path) -> u64 {
    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return 0;
    };
    if !meta.is_dir() {
        return meta.len();
    }
    std::fs::read_dir(path)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| entry_size(&e.path()))
                .sum()
        })
        .unwrap_or(0)
}

fn disk_utilization(root: &Path) -> Option<f64> {
    let total = fs2::total_space(root).ok()?;
    let available = fs2::available_space(root).ok()?;
    if total == 0 {
        return None;
    }
    Some(1.0 - available as f64 / total as f64)
}

fn sweep_blocking(root: &Path, max_age: Duration, now: SystemTime) -> io::Result<SweepReport> {
    let mut report = SweepReport::default();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age <= max_age {
            continue;
        }

        let size = entry_size(&path);
        let removal = if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match removal {
            Ok(()) => {
                report.removed += 1;
                report.bytes_freed += size;
                tracing::debug!(path = %path.display(), age_secs = age.as_secs(), size, "Reclaimed workspace");
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to reclaim workspace");
            }
        }
    }
    report.utilization = disk_utilization(root);
    Ok(report)
}

/// Remove top-level entries of `root` older than `max_age` as of `now`.
pub async fn sweep_once(root: &Path, max_age: Duration, now: SystemTime) -> io::Result<SweepReport> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || sweep_blocking(&root, max_age, now))
        .await
        .map_err(io::Error::other)?
}

async fn run_sweep(config: &WorkspaceReclaimConfig, metrics_state: &WorkspaceReclaimMetrics) {
    metrics_state.sweeps.fetch_add(1, Ordering::Relaxed);
    let report = match sweep_once(&config.root, config.max_age, SystemTime::now()).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(root = %config.root.display(), error = %e, "Workspace sweep failed");
            metrics_state.sweep_errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    metrics_state
        .workspaces_removed
        .fetch_add(report.removed, Ordering::Relaxed);
    metrics_state
        .bytes_freed
        .fetch_add(report.bytes_freed, Ordering::Relaxed);
    if let Some(u) = report.utilization {
        metrics_state
            .utilization_ppm
            .store((u * 1_000_000.0) as u64, Ordering::Relaxed);
    }
    if let Some(m) = metrics() {
        m.record_reclaim(report.bytes_freed, report.utilization);
    }

    if report.removed > 0 {
        tracing::info!(
            removed = report.removed,
            bytes_freed = report.bytes_freed,
            "Workspace sweep completed"
        );
    } else {
        tracing::trace!("Workspace sweep completed with nothing to reclaim");
    }

    match report.utilization {
        Some(u) if u > config.alert_threshold => {
            tracing::error!(utilization = u, threshold = config.alert_threshold, "Workspace disk critically full");
        }
        Some(u) if u > config.warn_threshold => {
            tracing::warn!(utilization = u, threshold = config.warn_threshold, "Workspace disk filling up");
        }
        _ => {}
    }
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Sweep on a fixed interval until `shutdown_rx` flips to `true`.
///
/// A failed sweep is counted and logged; the loop keeps going.
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let metrics = Arc::new(WorkspaceReclaimMetrics::new());
/// tokio::spawn(workspace_reclaim_task(config, metrics.clone(), shutdown_rx));
/// // ...
/// let _ = shutdown_tx.send(true);
/// ```
pub async fn workspace_reclaim_task(
    config: WorkspaceReclaimConfig,
    metrics_state: Arc<WorkspaceReclaimMetrics>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<WorkspaceReclaimMetrics> {
    let mut sweep_interval = interval(config.sweep_interval);
    sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        root = %config.root.display(),
        sweep_interval_secs = config.sweep_interval.as_secs(),
        max_age_secs = config.max_age.as_secs(),
        "Workspace reclaim task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Workspace reclaim task shutting down");
                    break;
                }
            }
            _ = sweep_interval.tick() => {
                run_sweep(&config, &metrics_state).await;
            }
        }
    }

    let snapshot = metrics_state.snapshot();
    tracing::info!(
        sweeps = snapshot.sweeps,
        workspaces_removed = snapshot.workspaces_removed,
        bytes_freed = snapshot.bytes_freed,
        sweep_errors = snapshot.sweep_errors,
        "Workspace reclaim task completed"
    );

    metrics_state
}
