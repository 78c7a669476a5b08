use crate::error::{ExecutorError, SourceError};
use crate::types::{ActionType, ActionValue, DatePreset, MetricsSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Supplies one metrics snapshot per unit per cycle.
///
/// A unit with no data for the requested window must come back as a zeroed
/// snapshot, not an error.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn fetch(&self, unit_id: &str, preset: DatePreset)
        -> Result<MetricsSnapshot, SourceError>;
}

/// A change to apply on the advertising platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: ActionType,
    /// The new budget for scale actions or the target status for pause/resume.
    pub target: ActionValue,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Applied,
    /// The unit was already where the request wanted it. Counts as success.
    AlreadyInTargetState,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub status: ExecutionStatus,
    pub detail: String,
}

impl ExecutionReport {
    pub fn applied(detail: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Applied,
            detail: detail.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            ExecutionStatus::Applied | ExecutionStatus::AlreadyInTargetState
        )
    }
}

/// Applies actions on the platform. Implementations must be idempotent:
/// repeating a request for a unit already in the target state succeeds.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn apply(
        &self,
        unit_id: &str,
        request: &ActionRequest,
    ) -> Result<ExecutionReport, ExecutorError>;
}

/// Out-of-band approvals for large budget changes. A granted approval is
/// spent: the same grant never authorizes a second change.
pub trait ApprovalGate: Send + Sync {
    fn take_approval(
        &self,
        unit_id: &str,
        action: ActionType,
        new_budget: f64,
        now: DateTime<Utc>,
    ) -> bool;
}
