use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Reporting window requested from the metrics source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatePreset {
    #[default]
    Today,
    Yesterday,
    Last7Days,
    Last30Days,
}

// ─── Metrics ────────────────────────────────────────────────────────────────

/// One performance reading for a monitored unit (ad set), captured once per
/// cycle. Never mutated after capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub unit_id: String,
    #[serde(default)]
    pub unit_name: Option<String>,
    pub spend: f64,
    pub revenue: f64,
    pub clicks: u64,
    pub impressions: u64,
    pub conversions: u64,
    /// Percentage, e.g. `1.8` for 1.8%.
    pub ctr: f64,
    pub cpc: f64,
    pub frequency: f64,
    /// `None` when the platform does not report a quality ranking.
    #[serde(default)]
    pub quality_score: Option<f64>,
    pub daily_budget: f64,
    #[serde(default)]
    pub unit_created_at: Option<DateTime<Utc>>,
    pub captured_at: DateTime<Utc>,
}

impl MetricsSnapshot {
    /// A snapshot for a unit the platform reported no data for.
    pub fn empty(unit_id: impl Into<String>, captured_at: DateTime<Utc>) -> Self {
        Self {
            unit_id: unit_id.into(),
            unit_name: None,
            spend: 0.0,
            revenue: 0.0,
            clicks: 0,
            impressions: 0,
            conversions: 0,
            ctr: 0.0,
            cpc: 0.0,
            frequency: 0.0,
            quality_score: None,
            daily_budget: 0.0,
            unit_created_at: None,
            captured_at,
        }
    }

    /// Whole days since the unit was created, 0 when unknown.
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        self.unit_created_at
            .map(|created| (now - created).num_days().max(0))
            .unwrap_or(0)
    }

    pub fn display_name(&self) -> &str {
        self.unit_name.as_deref().unwrap_or(&self.unit_id)
    }
}

/// Derived financial view of a snapshot. Every field is finite: ratios with a
/// zero denominator resolve to 0 and overflowing results saturate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialMetrics {
    pub spend: f64,
    pub revenue: f64,
    pub roas: f64,
    /// Percentage.
    pub roi: f64,
    /// `revenue * margin - spend`.
    pub net_profit: f64,
    /// `net_profit / revenue`.
    pub profit_margin: f64,
    pub cost_per_acquisition: f64,
    pub lifetime_value: f64,
    pub payback_period_days: f64,
    /// Percentage of the daily budget spent.
    pub budget_utilization: f64,
    pub daily_budget: f64,
    pub remaining_budget: f64,
}

/// `value` when it is finite, otherwise `fallback`. Every float that reaches
/// the persisted state must be finite: JSON has no encoding for NaN or
/// infinity and serializes them as `null`.
pub fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// Infinities clamp to the largest finite value of the same sign; NaN becomes 0.
pub fn saturate(value: f64) -> f64 {
    finite_or(value.clamp(-f64::MAX, f64::MAX), 0.0)
}

// ─── Risk ───────────────────────────────────────────────────────────────────

pub const CRITICAL_RISK_SCORE: f64 = 85.0;
pub const HIGH_RISK_SCORE: f64 = 70.0;
pub const MEDIUM_RISK_SCORE: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= CRITICAL_RISK_SCORE {
            RiskLevel::Critical
        } else if score >= HIGH_RISK_SCORE {
            RiskLevel::High
        } else if score >= MEDIUM_RISK_SCORE {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// Weighted risk view of one unit in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub unit_id: String,
    pub financial_risk: f64,
    pub performance_risk: f64,
    pub operational_risk: f64,
    pub market_risk: f64,
    /// Weighted and clamped to `[0, 100]`.
    pub risk_score: f64,
    pub level: RiskLevel,
    pub risk_factors: Vec<String>,
    /// Parallel to `risk_factors`.
    pub mitigations: Vec<String>,
    pub assessed_at: DateTime<Utc>,
}

// ─── Alerts ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    BudgetOverrun,
    LowRoas,
    HighCpc,
    AudienceFatigue,
    CreativeFatigue,
    QualityDrop,
    SpendAnomaly,
    ConversionDrop,
    ExecutionFailure,
    PersistenceFailure,
}

impl AlertType {
    /// Raised from a threshold check on a unit's metrics, and cleared when a
    /// later evaluation of that unit no longer detects it.
    pub fn is_threshold(&self) -> bool {
        !matches!(self, AlertType::ExecutionFailure | AlertType::PersistenceFailure)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::BudgetOverrun => "budget_overrun",
            AlertType::LowRoas => "low_roas",
            AlertType::HighCpc => "high_cpc",
            AlertType::AudienceFatigue => "audience_fatigue",
            AlertType::CreativeFatigue => "creative_fatigue",
            AlertType::QualityDrop => "quality_drop",
            AlertType::SpendAnomaly => "spend_anomaly",
            AlertType::ConversionDrop => "conversion_drop",
            AlertType::ExecutionFailure => "execution_failure",
            AlertType::PersistenceFailure => "persistence_failure",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Medium,
    High,
    Critical,
}

/// Hint attached to an alert for the decision engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoAction {
    PauseIfEnabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// `<type>_<unit>_<YYYYmmdd_HHMMSS>`.
    pub id: String,
    pub unit_id: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub recommended_action: String,
    pub financial_impact: f64,
    pub timestamp: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default = "default_occurrences")]
    pub occurrences: u32,
    #[serde(default)]
    pub auto_action: Option<AutoAction>,
}

fn default_occurrences() -> u32 {
    1
}

impl Alert {
    pub fn make_id(unit_id: &str, alert_type: AlertType, at: DateTime<Utc>) -> String {
        format!("{}_{}_{}", alert_type, unit_id, at.format("%Y%m%d_%H%M%S"))
    }
}

// ─── Units and actions ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitStatus {
    #[default]
    Active,
    Paused,
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::Active => f.write_str("ACTIVE"),
            UnitStatus::Paused => f.write_str("PAUSED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    ScaleUp,
    ScaleDown,
    Pause,
    Resume,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::ScaleUp => "scale_up",
            ActionType::ScaleDown => "scale_down",
            ActionType::Pause => "pause",
            ActionType::Resume => "resume",
        }
    }

    pub fn changes_budget(&self) -> bool {
        matches!(self, ActionType::ScaleUp | ActionType::ScaleDown)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The before/after value of an action: a daily budget or an operational status.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionValue {
    Budget(f64),
    Status(UnitStatus),
}

impl fmt::Display for ActionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionValue::Budget(b) => write!(f, "{b:.2}"),
            ActionValue::Status(s) => write!(f, "{s}"),
        }
    }
}

/// An executed decision and the executor's verdict. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationAction {
    pub id: Uuid,
    pub unit_id: String,
    pub action: ActionType,
    pub old_value: ActionValue,
    pub new_value: ActionValue,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub emergency: bool,
}

/// Mutable per-unit control state, updated once per cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitState {
    pub status: UnitStatus,
    pub budget: f64,
    pub last_action_ts: Option<DateTime<Utc>>,
    /// Executions within the trailing hour as of the last update.
    pub hour_action_count: u32,
    /// Execution timestamps inside the trailing hour.
    #[serde(default)]
    pub recent_actions: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub last_optimized_at: Option<DateTime<Utc>>,
}

impl UnitState {
    pub fn new(budget: f64) -> Self {
        Self {
            status: UnitStatus::Active,
            budget,
            last_action_ts: None,
            hour_action_count: 0,
            recent_actions: Vec::new(),
            last_optimized_at: None,
        }
    }

    /// Executions inside the hour ending at `now`.
    pub fn actions_in_last_hour(&self, now: DateTime<Utc>) -> u32 {
        let cutoff = now - Duration::hours(1);
        self.recent_actions.iter().filter(|ts| **ts > cutoff).count() as u32
    }

    /// Count an execution attempt against the rolling hour window.
    pub fn record_action(&mut self, at: DateTime<Utc>) {
        self.recent_actions.push(at);
        self.last_action_ts = Some(at);
        self.prune_window(at);
    }

    /// Drop timestamps that left the window and resync the persisted count.
    pub fn prune_window(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(1);
        self.recent_actions.retain(|ts| *ts > cutoff);
        self.hour_action_count = self.recent_actions.len() as u32;
    }
}

// ─── Decisions ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Execute,
    NoAction,
    PendingApproval,
}

/// Why a decision did not turn into an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HoldReason {
    NoSpend,
    InsufficientData { conversions: u64, required: u64 },
    BudgetCeiling { proposed: f64, max: f64 },
    BudgetFloor { proposed: f64, min: f64 },
    RateLimited { count: u32, limit: u32 },
    CycleCapReached { limit: usize },
    ApprovalRequired { change_pct: f64, threshold: f64 },
    FetchFailed { message: String },
    EvaluationFailed { message: String },
}

impl fmt::Display for HoldReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HoldReason::NoSpend => write!(f, "no spend recorded"),
            HoldReason::InsufficientData {
                conversions,
                required,
            } => write!(f, "insufficient data ({conversions}/{required} conversions)"),
            HoldReason::BudgetCeiling { proposed, max } => {
                write!(f, "proposed budget {proposed:.2} exceeds ceiling {max:.2}")
            }
            HoldReason::BudgetFloor { proposed, min } => {
                write!(f, "proposed budget {proposed:.2} below floor {min:.2}")
            }
            HoldReason::RateLimited { count, limit } => {
                write!(f, "hourly action limit reached ({count}/{limit})")
            }
            HoldReason::CycleCapReached { limit } => {
                write!(f, "cycle action cap reached ({limit})")
            }
            HoldReason::ApprovalRequired {
                change_pct,
                threshold,
            } => write!(
                f,
                "budget change of {change_pct:.1}% exceeds {threshold:.1}% and needs approval"
            ),
            HoldReason::FetchFailed { message } => write!(f, "metrics fetch failed: {message}"),
            HoldReason::EvaluationFailed { message } => {
                write!(f, "evaluation failed: {message}")
            }
        }
    }
}

/// The decision engine's verdict for one unit in one cycle. Always produced,
/// including when nothing happens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub unit_id: String,
    /// The action the ROAS bands called for before any safety gate.
    pub candidate: Option<ActionType>,
    pub status: DecisionStatus,
    pub old_budget: f64,
    pub new_budget: Option<f64>,
    pub reason: String,
    #[serde(default)]
    pub hold: Option<HoldReason>,
    #[serde(default)]
    pub emergency: bool,
    pub roas: f64,
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    pub fn no_action(
        unit_id: impl Into<String>,
        old_budget: f64,
        roas: f64,
        reason: impl Into<String>,
        hold: Option<HoldReason>,
        decided_at: DateTime<Utc>,
    ) -> Self {
        Self {
            unit_id: unit_id.into(),
            candidate: None,
            status: DecisionStatus::NoAction,
            old_budget,
            new_budget: None,
            reason: reason.into(),
            hold,
            emergency: false,
            roas,
            decided_at,
        }
    }

    pub fn is_executable(&self) -> bool {
        self.status == DecisionStatus::Execute && self.candidate.is_some()
    }

    /// Keep the candidate for audit but stop it from executing.
    pub fn downgrade(mut self, status: DecisionStatus, hold: HoldReason) -> Self {
        self.reason = format!("{} [held: {}]", self.reason, hold);
        self.status = status;
        self.hold = Some(hold);
        self
    }
}
