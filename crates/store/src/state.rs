use campaign_core::config::StorageConfig;
use campaign_core::types::{
    saturate, Alert, AlertSeverity, Decision, FinancialMetrics, MetricsSnapshot,
    OptimizationAction, RiskAssessment, UnitState, UnitStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const STATE_VERSION: u32 = 1;

const DASHBOARD_RECENT_ALERTS: usize = 10;

/// Financial and risk view of one unit in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRecord {
    pub unit_id: String,
    pub financial: FinancialMetrics,
    pub risk: RiskAssessment,
    pub recorded_at: DateTime<Utc>,
}

/// Running totals across all monitored units.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialOverview {
    pub total_spend: f64,
    pub total_revenue: f64,
    pub total_profit: f64,
    pub overall_roas: f64,
    /// Spend since the start of `period`.
    pub current_period_spend: f64,
    /// Calendar month, `YYYY-MM`.
    #[serde(default)]
    pub period: String,
}

/// Outcome of the most recent save attempts. A document on disk always
/// carries the health as of the save that wrote it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistenceHealth {
    /// Failed saves since the last successful one.
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl PersistenceHealth {
    pub fn is_failing(&self) -> bool {
        self.consecutive_failures > 0
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures = 0;
        self.last_success_at = Some(now);
    }

    pub fn record_failure(&mut self, error: impl ToString, now: DateTime<Utc>) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error.to_string());
        self.last_failure_at = Some(now);
    }
}

/// Caps applied to the bounded collections on save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub max_active_alerts: usize,
    pub max_alert_history: usize,
    pub max_action_history: usize,
    pub max_decision_log: usize,
    pub max_assessment_history: usize,
}

impl From<&StorageConfig> for Retention {
    fn from(c: &StorageConfig) -> Self {
        Self {
            max_active_alerts: c.max_active_alerts,
            max_alert_history: c.max_alert_history,
            max_action_history: c.max_action_history,
            max_decision_log: c.max_decision_log,
            max_assessment_history: c.max_assessment_history,
        }
    }
}

impl Default for Retention {
    fn default() -> Self {
        Self::from(&StorageConfig::default())
    }
}

/// The single persisted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardState {
    pub version: u32,
    #[serde(default)]
    pub active_alerts: Vec<Alert>,
    #[serde(default)]
    pub alert_history: Vec<Alert>,
    #[serde(default)]
    pub action_history: Vec<OptimizationAction>,
    #[serde(default)]
    pub decision_log: Vec<Decision>,
    #[serde(default)]
    pub assessment_history: Vec<AssessmentRecord>,
    #[serde(default)]
    pub unit_states: BTreeMap<String, UnitState>,
    #[serde(default)]
    pub financial_overview: FinancialOverview,
    /// Latest snapshot per unit, for trend alerts and overview deltas.
    #[serde(default)]
    pub last_snapshots: BTreeMap<String, MetricsSnapshot>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cycle_count: u64,
    #[serde(default)]
    pub persistence: PersistenceHealth,
}

impl Default for GuardState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            active_alerts: Vec::new(),
            alert_history: Vec::new(),
            action_history: Vec::new(),
            decision_log: Vec::new(),
            assessment_history: Vec::new(),
            unit_states: BTreeMap::new(),
            financial_overview: FinancialOverview::default(),
            last_snapshots: BTreeMap::new(),
            last_updated: None,
            cycle_count: 0,
            persistence: PersistenceHealth::default(),
        }
    }
}

/// Keep the newest `max` entries.
fn keep_last<T>(items: &mut Vec<T>, max: usize) {
    if items.len() > max {
        items.drain(..items.len() - max);
    }
}

impl GuardState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unit_state_mut(&mut self, unit_id: &str, initial_budget: f64) -> &mut UnitState {
        self.unit_states
            .entry(unit_id.to_string())
            .or_insert_with(|| UnitState::new(initial_budget))
    }

    /// Fold a unit's new snapshot into the running overview and remember it.
    ///
    /// Snapshots from the same day are cumulative, so only the growth since
    /// the previous one counts; the first snapshot of a day counts in full.
    pub fn record_snapshot(&mut self, snapshot: &MetricsSnapshot, profit_margin: f64) {
        let (spend_delta, revenue_delta) = match self.last_snapshots.get(&snapshot.unit_id) {
            Some(prev) if prev.captured_at.date_naive() == snapshot.captured_at.date_naive() => (
                (snapshot.spend - prev.spend).max(0.0),
                (snapshot.revenue - prev.revenue).max(0.0),
            ),
            _ => (snapshot.spend, snapshot.revenue),
        };

        let period = snapshot.captured_at.format("%Y-%m").to_string();
        let o = &mut self.financial_overview;
        if o.period != period {
            o.period = period;
            o.current_period_spend = 0.0;
        }
        o.total_spend = saturate(o.total_spend + spend_delta);
        o.total_revenue = saturate(o.total_revenue + revenue_delta);
        o.total_profit = saturate(o.total_profit + revenue_delta * profit_margin - spend_delta);
        o.current_period_spend = saturate(o.current_period_spend + spend_delta);
        o.overall_roas = if o.total_spend > 0.0 {
            saturate(o.total_revenue / o.total_spend)
        } else {
            0.0
        };

        self.last_snapshots
            .insert(snapshot.unit_id.clone(), snapshot.clone());
    }

    pub fn trim(&mut self, limits: &Retention) {
        keep_last(&mut self.active_alerts, limits.max_active_alerts);
        keep_last(&mut self.alert_history, limits.max_alert_history);
        keep_last(&mut self.action_history, limits.max_action_history);
        keep_last(&mut self.decision_log, limits.max_decision_log);
        keep_last(&mut self.assessment_history, limits.max_assessment_history);
    }

    pub fn dashboard(&self) -> Dashboard {
        let o = &self.financial_overview;
        let count = |severity: AlertSeverity| {
            self.active_alerts
                .iter()
                .filter(|a| a.severity == severity)
                .count()
        };

        let mut recent: Vec<Alert> = self
            .active_alerts
            .iter()
            .filter(|a| a.severity >= AlertSeverity::High)
            .cloned()
            .collect();
        recent.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        recent.truncate(DASHBOARD_RECENT_ALERTS);

        let paused_units = self
            .unit_states
            .values()
            .filter(|u| u.status == UnitStatus::Paused)
            .count();

        Dashboard {
            total_spend: o.total_spend,
            total_revenue: o.total_revenue,
            total_profit: o.total_profit,
            overall_roas: o.overall_roas,
            current_period_spend: o.current_period_spend,
            critical_alerts: count(AlertSeverity::Critical),
            high_alerts: count(AlertSeverity::High),
            active_financial_impact: saturate(
                self.active_alerts.iter().map(|a| a.financial_impact).sum(),
            ),
            active_units: self.unit_states.len() - paused_units,
            paused_units,
            actions_recorded: self.action_history.len(),
            recent_alerts: recent,
            cycle_count: self.cycle_count,
            last_updated: self.last_updated,
            persistence: self.persistence.clone(),
        }
    }
}

/// Summary of the persisted state for operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub total_spend: f64,
    pub total_revenue: f64,
    pub total_profit: f64,
    pub overall_roas: f64,
    pub current_period_spend: f64,
    pub critical_alerts: usize,
    pub high_alerts: usize,
    pub active_financial_impact: f64,
    pub active_units: usize,
    pub paused_units: usize,
    pub actions_recorded: usize,
    /// Newest critical and high alerts first.
    pub recent_alerts: Vec<Alert>,
    pub cycle_count: u64,
    pub last_updated: Option<DateTime<Utc>>,
    pub persistence: PersistenceHealth,
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_core::types::AlertType;
    use chrono::{Duration, TimeZone};

    fn snap(unit: &str, spend: f64, revenue: f64, at: DateTime<Utc>) -> MetricsSnapshot {
        let mut s = MetricsSnapshot::empty(unit, at);
        s.spend = spend;
        s.revenue = revenue;
        s
    }

    fn alert(unit: &str, severity: AlertSeverity, impact: f64, at: DateTime<Utc>) -> Alert {
        Alert {
            id: Alert::make_id(unit, AlertType::LowRoas, at),
            unit_id: unit.to_string(),
            alert_type: AlertType::LowRoas,
            severity,
            title: "t".to_string(),
            message: "m".to_string(),
            recommended_action: "r".to_string(),
            financial_impact: impact,
            timestamp: at,
            last_seen: at,
            occurrences: 1,
            auto_action: None,
        }
    }

    #[test]
    fn test_overview_counts_same_day_deltas_once() {
        let morning = Utc.with_ymd_and_hms(2024, 3, 6, 9, 0, 0).unwrap();
        let mut state = GuardState::new();

        state.record_snapshot(&snap("u1", 100.0, 400.0, morning), 0.4);
        state.record_snapshot(&snap("u1", 250.0, 900.0, morning + Duration::minutes(15)), 0.4);

        let o = &state.financial_overview;
        assert!((o.total_spend - 250.0).abs() < 1e-9);
        assert!((o.total_revenue - 900.0).abs() < 1e-9);
        assert!((o.overall_roas - 3.6).abs() < 1e-9);
        // 900 * 0.4 - 250
        assert!((o.total_profit - 110.0).abs() < 1e-9);

        // New day: the cumulative counter restarted.
        state.record_snapshot(&snap("u1", 50.0, 100.0, morning + Duration::days(1)), 0.4);
        assert!((state.financial_overview.total_spend - 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_period_spend_resets_monthly() {
        let end_of_march = Utc.with_ymd_and_hms(2024, 3, 31, 20, 0, 0).unwrap();
        let mut state = GuardState::new();
        state.record_snapshot(&snap("u1", 500.0, 0.0, end_of_march), 0.4);
        assert!((state.financial_overview.current_period_spend - 500.0).abs() < 1e-9);

        state.record_snapshot(&snap("u1", 80.0, 0.0, end_of_march + Duration::hours(5)), 0.4);
        let o = &state.financial_overview;
        assert_eq!(o.period, "2024-04");
        assert!((o.current_period_spend - 80.0).abs() < 1e-9);
        assert!((o.total_spend - 580.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_spend_overview_roas_is_zero() {
        let mut state = GuardState::new();
        state.record_snapshot(&snap("u1", 0.0, 0.0, Utc::now()), 0.4);
        assert_eq!(state.financial_overview.overall_roas, 0.0);
    }

    #[test]
    fn test_overview_stays_finite_on_extreme_inputs() {
        let mut state = GuardState::new();
        let now = Utc::now();
        state.record_snapshot(&snap("u1", 1e-300, 1e10, now), 0.4);
        state.record_snapshot(&snap("u2", 0.0, f64::MAX, now), 0.4);
        state.record_snapshot(&snap("u3", 0.0, f64::MAX, now), 0.4);

        let o = &state.financial_overview;
        assert_eq!(o.total_revenue, f64::MAX);
        assert_eq!(o.overall_roas, f64::MAX);
        assert!(o.total_profit.is_finite());
    }

    #[test]
    fn test_persistence_health_tracks_streak() {
        let now = Utc::now();
        let mut health = PersistenceHealth::default();
        assert!(!health.is_failing());

        health.record_failure("disk full", now);
        health.record_failure("disk full", now + Duration::minutes(15));
        assert_eq!(health.consecutive_failures, 2);
        assert!(health.is_failing());

        health.record_success(now + Duration::minutes(30));
        assert!(!health.is_failing());
        assert_eq!(health.last_error.as_deref(), Some("disk full"));
        assert_eq!(health.last_failure_at, Some(now + Duration::minutes(15)));

        let mut state = GuardState::new();
        state.persistence = health.clone();
        assert_eq!(state.dashboard().persistence, health);
    }

    #[test]
    fn test_trim_keeps_newest() {
        let now = Utc::now();
        let mut state = GuardState::new();
        for i in 0..150 {
            state
                .active_alerts
                .push(alert(&format!("u{i}"), AlertSeverity::Medium, 0.0, now));
        }
        state.trim(&Retention::default());
        assert_eq!(state.active_alerts.len(), 100);
        assert_eq!(state.active_alerts[0].unit_id, "u50");
        assert_eq!(state.active_alerts[99].unit_id, "u149");
    }

    #[test]
    fn test_dashboard() {
        let now = Utc::now();
        let mut state = GuardState::new();
        state.active_alerts.push(alert("u1", AlertSeverity::Critical, 300.0, now));
        state.active_alerts.push(alert("u2", AlertSeverity::High, 50.0, now + Duration::seconds(1)));
        state.active_alerts.push(alert("u3", AlertSeverity::Medium, 10.0, now));
        state.unit_state_mut("u1", 1000.0).status = UnitStatus::Paused;
        state.unit_state_mut("u2", 1000.0);

        let d = state.dashboard();
        assert_eq!(d.critical_alerts, 1);
        assert_eq!(d.high_alerts, 1);
        assert!((d.active_financial_impact - 360.0).abs() < 1e-9);
        assert_eq!(d.paused_units, 1);
        assert_eq!(d.active_units, 1);
        assert_eq!(d.recent_alerts.len(), 2);
        assert_eq!(d.recent_alerts[0].unit_id, "u2");
    }

    #[test]
    fn test_missing_sections_default_on_load() {
        let state: GuardState = serde_json::from_str(r#"{"version": 1}"#).unwrap();
        assert_eq!(state, GuardState::new());
    }
}
