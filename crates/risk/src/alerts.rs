//! Threshold alerts and the active-alert lifecycle.

use campaign_core::config::RiskThresholds;
use campaign_core::types::{
    saturate, ActionType, Alert, AlertSeverity, AlertType, AutoAction, FinancialMetrics,
    MetricsSnapshot, RiskAssessment,
};
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct AlertGenerator {
    thresholds: RiskThresholds,
}

struct Draft {
    alert_type: AlertType,
    severity: AlertSeverity,
    title: String,
    message: String,
    recommended_action: &'static str,
    financial_impact: f64,
    auto_action: Option<AutoAction>,
}

fn pct_change(previous: f64, current: f64) -> f64 {
    if previous > 0.0 {
        saturate((current - previous) / previous * 100.0)
    } else {
        0.0
    }
}

impl AlertGenerator {
    pub fn new(thresholds: RiskThresholds) -> Self {
        Self { thresholds }
    }

    /// One alert per violated threshold. `previous` is the unit's snapshot
    /// from the prior cycle, used for trend alerts when it covers the same day.
    pub fn generate(
        &self,
        snapshot: &MetricsSnapshot,
        financial: &FinancialMetrics,
        assessment: &RiskAssessment,
        previous: Option<&MetricsSnapshot>,
        now: DateTime<Utc>,
    ) -> Vec<Alert> {
        let t = &self.thresholds;
        let mut drafts = Vec::new();

        if financial.spend > 0.0 && financial.roas < t.losing_money_roas {
            drafts.push(Draft {
                alert_type: AlertType::LowRoas,
                severity: AlertSeverity::Critical,
                title: "CRITICAL: unit losing money".to_string(),
                message: format!(
                    "ROAS of {:.2} is losing {:.2} (risk score {:.1}, {})",
                    financial.roas,
                    financial.net_profit.abs(),
                    assessment.risk_score,
                    assessment.level
                ),
                recommended_action: "Pause the unit immediately or optimize urgently",
                financial_impact: financial.net_profit.abs(),
                auto_action: Some(AutoAction::PauseIfEnabled),
            });
        }

        let utilization = financial.budget_utilization;
        if utilization > t.budget_utilization_warning {
            let severity = if utilization > t.budget_utilization_critical {
                AlertSeverity::Critical
            } else {
                AlertSeverity::High
            };
            drafts.push(Draft {
                alert_type: AlertType::BudgetOverrun,
                severity,
                title: "Budget overrun".to_string(),
                message: format!("Unit has used {utilization:.1}% of its daily budget"),
                recommended_action: "Review budget pacing and adjust if necessary",
                financial_impact: (financial.spend - financial.daily_budget).max(0.0),
                auto_action: None,
            });
        }

        if snapshot.cpc > t.max_cpc {
            drafts.push(Draft {
                alert_type: AlertType::HighCpc,
                severity: AlertSeverity::Medium,
                title: "High CPC".to_string(),
                message: format!(
                    "CPC of {:.2} is above the {:.2} ceiling",
                    snapshot.cpc, t.max_cpc
                ),
                recommended_action: "Optimize audience targeting or bidding strategy",
                financial_impact: (snapshot.cpc - t.max_cpc) * snapshot.clicks as f64,
                auto_action: None,
            });
        }

        if snapshot.frequency > t.max_frequency {
            drafts.push(Draft {
                alert_type: AlertType::AudienceFatigue,
                severity: AlertSeverity::Medium,
                title: "Audience fatigue detected".to_string(),
                message: format!(
                    "Frequency of {:.2} indicates audience fatigue",
                    snapshot.frequency
                ),
                recommended_action: "Expand audience or refresh creative",
                financial_impact: 0.0,
                auto_action: None,
            });
        }

        if snapshot.impressions > 0 && snapshot.ctr < t.min_ctr {
            drafts.push(Draft {
                alert_type: AlertType::CreativeFatigue,
                severity: AlertSeverity::Medium,
                title: "Creative fatigue detected".to_string(),
                message: format!(
                    "CTR of {:.2}% over {} impressions is below {:.2}%",
                    snapshot.ctr, snapshot.impressions, t.min_ctr
                ),
                recommended_action: "Rotate in fresh creative assets",
                financial_impact: 0.0,
                auto_action: None,
            });
        }

        if let Some(qs) = snapshot.quality_score {
            if qs < t.min_quality_score {
                drafts.push(Draft {
                    alert_type: AlertType::QualityDrop,
                    severity: AlertSeverity::Medium,
                    title: "Quality score below threshold".to_string(),
                    message: format!("Quality score of {qs:.1} may increase costs"),
                    recommended_action: "Improve ad relevance and landing page experience",
                    financial_impact: 0.0,
                    auto_action: None,
                });
            }
        }

        if let Some(prev) = previous.filter(|p| p.captured_at.date_naive() == now.date_naive()) {
            let spend_jump = pct_change(prev.spend, snapshot.spend);
            if spend_jump > t.spend_anomaly_pct {
                drafts.push(Draft {
                    alert_type: AlertType::SpendAnomaly,
                    severity: AlertSeverity::High,
                    title: "Spend anomaly".to_string(),
                    message: format!(
                        "Spend rose {:.0}% since the last cycle ({:.2} -> {:.2})",
                        spend_jump, prev.spend, snapshot.spend
                    ),
                    recommended_action: "Check for bid or budget changes made outside the guard",
                    financial_impact: snapshot.spend - prev.spend,
                    auto_action: None,
                });
            }

            let conversion_drop = -pct_change(prev.conversions as f64, snapshot.conversions as f64);
            if conversion_drop > t.conversion_drop_pct {
                drafts.push(Draft {
                    alert_type: AlertType::ConversionDrop,
                    severity: AlertSeverity::High,
                    title: "Conversion drop".to_string(),
                    message: format!(
                        "Conversions fell {:.0}% since the last cycle ({} -> {})",
                        conversion_drop, prev.conversions, snapshot.conversions
                    ),
                    recommended_action: "Verify tracking and landing page availability",
                    financial_impact: financial.cost_per_acquisition
                        * (prev.conversions.saturating_sub(snapshot.conversions)) as f64,
                    auto_action: None,
                });
            }
        }

        drafts
            .into_iter()
            .map(|d| Alert {
                id: Alert::make_id(&snapshot.unit_id, d.alert_type, now),
                unit_id: snapshot.unit_id.clone(),
                alert_type: d.alert_type,
                severity: d.severity,
                title: d.title,
                message: d.message,
                recommended_action: d.recommended_action.to_string(),
                financial_impact: saturate(d.financial_impact),
                timestamp: now,
                last_seen: now,
                occurrences: 1,
                auto_action: d.auto_action,
            })
            .collect()
    }

    /// Alert raised when the platform refused or failed to apply an action.
    pub fn execution_failure(
        unit_id: &str,
        action: ActionType,
        detail: &str,
        financial_impact: f64,
        now: DateTime<Utc>,
    ) -> Alert {
        Alert {
            id: Alert::make_id(unit_id, AlertType::ExecutionFailure, now),
            unit_id: unit_id.to_string(),
            alert_type: AlertType::ExecutionFailure,
            severity: AlertSeverity::High,
            title: format!("Failed to {action} unit"),
            message: detail.to_string(),
            recommended_action: "Verify platform access; the action is retried next cycle"
                .to_string(),
            financial_impact,
            timestamp: now,
            last_seen: now,
            occurrences: 1,
            auto_action: None,
        }
    }

    /// Alert raised when the guard state could not be saved. `scope` is the
    /// guard node, since no single unit is affected.
    pub fn persistence_failure(
        scope: &str,
        error: &str,
        consecutive_failures: u32,
        now: DateTime<Utc>,
    ) -> Alert {
        Alert {
            id: Alert::make_id(scope, AlertType::PersistenceFailure, now),
            unit_id: scope.to_string(),
            alert_type: AlertType::PersistenceFailure,
            severity: AlertSeverity::Critical,
            title: "Guard state not persisted".to_string(),
            message: format!("{consecutive_failures} consecutive failed saves: {error}"),
            recommended_action: "Check disk space and permissions on the state path".to_string(),
            financial_impact: 0.0,
            timestamp: now,
            last_seen: now,
            occurrences: 1,
            auto_action: None,
        }
    }
}

/// Outcome of merging one unit's detected alerts into the active set.
#[derive(Debug, Default)]
pub struct AlertReconciliation {
    /// Alerts that were not already active and were appended to history.
    pub emitted: Vec<Alert>,
    pub refreshed: usize,
    /// Active alerts whose condition cleared.
    pub resolved: Vec<Alert>,
}

/// Insert `alert` unless the same (unit, type) is already active and was seen
/// within `window`, in which case the active entry is refreshed in place.
/// Returns `true` when the alert is new.
pub fn upsert(
    active: &mut Vec<Alert>,
    history: &mut Vec<Alert>,
    alert: Alert,
    window: Duration,
) -> bool {
    let existing = active
        .iter()
        .position(|a| a.unit_id == alert.unit_id && a.alert_type == alert.alert_type);

    if let Some(idx) = existing {
        let current = &mut active[idx];
        if alert.timestamp - current.last_seen <= window {
            current.financial_impact = alert.financial_impact;
            current.severity = alert.severity;
            current.message = alert.message;
            current.last_seen = alert.timestamp;
            current.occurrences += 1;
            debug!(
                unit_id = %current.unit_id,
                alert_type = %current.alert_type,
                occurrences = current.occurrences,
                "alert refreshed"
            );
            return false;
        }
        // Stale duplicate: replace it with a fresh alert.
        active.remove(idx);
    }

    history.push(alert.clone());
    active.push(alert);
    true
}

/// Merge one evaluation's detected alerts for `unit_id` into the active set
/// and resolve any active threshold alert for that unit that was not
/// re-detected. Execution and persistence failures are resolved separately,
/// on success.
pub fn reconcile(
    active: &mut Vec<Alert>,
    history: &mut Vec<Alert>,
    unit_id: &str,
    detected: Vec<Alert>,
    window: Duration,
) -> AlertReconciliation {
    let mut outcome = AlertReconciliation::default();
    let detected_types: Vec<AlertType> = detected.iter().map(|a| a.alert_type).collect();

    for alert in detected {
        if upsert(active, history, alert.clone(), window) {
            outcome.emitted.push(alert);
        } else {
            outcome.refreshed += 1;
        }
    }

    let (cleared, kept): (Vec<Alert>, Vec<Alert>) = active.drain(..).partition(|a| {
        a.unit_id == unit_id
            && a.alert_type.is_threshold()
            && !detected_types.contains(&a.alert_type)
    });
    *active = kept;
    outcome.resolved = cleared;
    outcome
}

/// Remove the active alert of `alert_type` for `unit_id`, if any.
pub fn resolve(active: &mut Vec<Alert>, unit_id: &str, alert_type: AlertType) -> Option<Alert> {
    let idx = active
        .iter()
        .position(|a| a.unit_id == unit_id && a.alert_type == alert_type)?;
    Some(active.remove(idx))
}
