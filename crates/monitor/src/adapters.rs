//! Collaborators for running the guard without a platform integration.

use async_trait::async_trait;
use campaign_core::collaborators::{
    ActionExecutor, ActionRequest, ExecutionReport, ExecutionStatus, MetricsSource,
};
use campaign_core::error::{ExecutorError, SourceError};
use campaign_core::ingest::RawMetrics;
use campaign_core::types::{ActionType, ActionValue, DatePreset, MetricsSnapshot, UnitStatus};
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{debug, info};

/// Reads `<dir>/<unit_id>.json` raw platform records. A missing file means
/// the platform had no data for the unit and yields a zeroed snapshot.
pub struct FileMetricsSource {
    dir: PathBuf,
}

impl FileMetricsSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl MetricsSource for FileMetricsSource {
    async fn fetch(
        &self,
        unit_id: &str,
        preset: DatePreset,
    ) -> Result<MetricsSnapshot, SourceError> {
        let path = self.dir.join(format!("{unit_id}.json"));
        let now = Utc::now();

        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(unit_id, path = %path.display(), "no metrics file, reporting zeros");
                return Ok(MetricsSnapshot::empty(unit_id, now));
            }
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Err(SourceError::Auth(format!("{}: {e}", path.display())));
            }
            Err(e) => return Err(SourceError::Transport(format!("{}: {e}", path.display()))),
        };

        let record: RawMetrics = serde_json::from_str(&raw)
            .map_err(|e| SourceError::Malformed(format!("{}: {e}", path.display())))?;
        debug!(unit_id, ?preset, "metrics read from file");
        MetricsSnapshot::from_raw(unit_id, &record, now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedUnit {
    pub status: UnitStatus,
    pub budget: f64,
}

/// In-memory stand-in for the platform. Repeating a request for a unit
/// already in the target state reports [`ExecutionStatus::AlreadyInTargetState`].
#[derive(Default)]
pub struct SimulatedExecutor {
    units: DashMap<String, SimulatedUnit>,
    rejecting: DashSet<String>,
}

impl SimulatedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every request for `unit_id` fail until [`Self::accept`] is called.
    pub fn reject(&self, unit_id: &str) {
        self.rejecting.insert(unit_id.to_string());
    }

    pub fn accept(&self, unit_id: &str) {
        self.rejecting.remove(unit_id);
    }

    pub fn unit(&self, unit_id: &str) -> Option<SimulatedUnit> {
        self.units.get(unit_id).map(|u| *u)
    }
}

#[async_trait]
impl ActionExecutor for SimulatedExecutor {
    async fn apply(
        &self,
        unit_id: &str,
        request: &ActionRequest,
    ) -> Result<ExecutionReport, ExecutorError> {
        if self.rejecting.contains(unit_id) {
            return Err(ExecutorError::Rejected(format!(
                "{unit_id}: simulated rejection of {}",
                request.action
            )));
        }

        let mut unit = self.units.entry(unit_id.to_string()).or_insert(SimulatedUnit {
            status: UnitStatus::Active,
            budget: 0.0,
        });

        let changed = match (request.action, request.target) {
            (ActionType::ScaleUp | ActionType::ScaleDown, ActionValue::Budget(budget)) => {
                let changed = (unit.budget - budget).abs() > f64::EPSILON;
                unit.budget = budget;
                changed
            }
            (ActionType::Pause | ActionType::Resume, ActionValue::Status(status)) => {
                let changed = unit.status != status;
                unit.status = status;
                changed
            }
            (action, target) => {
                return Ok(ExecutionReport {
                    status: ExecutionStatus::Failed,
                    detail: format!("{action} cannot target {target}"),
                });
            }
        };

        if changed {
            info!(unit_id, action = %request.action, target = %request.target, "simulated action applied");
            Ok(ExecutionReport::applied(format!(
                "{} -> {}",
                request.action, request.target
            )))
        } else {
            Ok(ExecutionReport {
                status: ExecutionStatus::AlreadyInTargetState,
                detail: format!("already {}", request.target),
            })
        }
    }
}
