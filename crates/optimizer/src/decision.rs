//! ROAS-band state machine. Given one snapshot and the unit's state it always
//! yields a [`Decision`], including when nothing should happen, and never
//! touches anything outside its arguments.
//!
//! Precedence, first match wins:
//! 1. no spend recorded: no action
//! 2. ROAS at or below the emergency floor: pause, regardless of data volume
//! 3. too few conversions: no action
//! 4. paused and ROAS back above the scale-up band: resume
//! 5. active and ROAS at or above the scale-up band: scale up, within the ceiling
//! 6. active and ROAS inside the scale-down band: scale down, within the floor
//! 7. active and ROAS at or below the pause band: pause
//! 8. otherwise no action

use campaign_core::config::OptimizationRules;
use campaign_core::types::{
    saturate, ActionType, Alert, AlertSeverity, AutoAction, Decision, DecisionStatus,
    FinancialMetrics, HoldReason, MetricsSnapshot, UnitState, UnitStatus,
};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct DecisionEngine {
    rules: OptimizationRules,
}

impl DecisionEngine {
    pub fn new(rules: OptimizationRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &OptimizationRules {
        &self.rules
    }

    /// `alerts` are the unit's alerts from this evaluation; a critical alert
    /// tagged for auto-pause is cited in the pause reason.
    pub fn decide(
        &self,
        snapshot: &MetricsSnapshot,
        financial: &FinancialMetrics,
        unit: &UnitState,
        alerts: &[Alert],
        now: DateTime<Utc>,
    ) -> Decision {
        let r = &self.rules;
        let roas = financial.roas;
        let budget = unit.budget;
        let unit_id = snapshot.unit_id.as_str();

        if financial.spend <= 0.0 {
            return Decision::no_action(
                unit_id,
                budget,
                roas,
                HoldReason::NoSpend.to_string(),
                Some(HoldReason::NoSpend),
                now,
            );
        }

        let candidate = |action: ActionType, new_budget: Option<f64>, reason: String| Decision {
            unit_id: unit_id.to_string(),
            candidate: Some(action),
            status: DecisionStatus::Execute,
            old_budget: budget,
            new_budget,
            reason,
            hold: None,
            emergency: false,
            roas,
            decided_at: now,
        };

        if roas <= r.emergency_stop_roas {
            let mut decision = candidate(
                ActionType::Pause,
                None,
                format!(
                    "Emergency stop: ROAS {:.2} at or below floor {:.2}",
                    roas, r.emergency_stop_roas
                ),
            );
            decision.emergency = true;
            if unit.status == UnitStatus::Paused {
                decision.status = DecisionStatus::NoAction;
                decision.reason.push_str(" (already paused)");
            }
            return decision;
        }

        if snapshot.conversions < r.min_conversions_for_action {
            let hold = HoldReason::InsufficientData {
                conversions: snapshot.conversions,
                required: r.min_conversions_for_action,
            };
            return Decision::no_action(unit_id, budget, roas, hold.to_string(), Some(hold), now);
        }

        if unit.status == UnitStatus::Paused {
            if roas >= r.scale_up_roas {
                return candidate(
                    ActionType::Resume,
                    None,
                    format!(
                        "ROAS {:.2} recovered above {:.2}; resuming",
                        roas, r.scale_up_roas
                    ),
                );
            }
            return Decision::no_action(
                unit_id,
                budget,
                roas,
                format!("Unit paused; ROAS {roas:.2} below resume band {:.2}", r.scale_up_roas),
                None,
                now,
            );
        }

        if roas >= r.scale_up_roas {
            let proposed = saturate(budget * (1.0 + r.scale_up_pct / 100.0));
            let decision = candidate(
                ActionType::ScaleUp,
                Some(proposed),
                format!(
                    "High ROAS {:.2} >= {:.2}; +{:.0}% budget",
                    roas, r.scale_up_roas, r.scale_up_pct
                ),
            );
            if proposed > r.max_daily_spend_per_unit {
                return decision.downgrade(
                    DecisionStatus::NoAction,
                    HoldReason::BudgetCeiling {
                        proposed,
                        max: r.max_daily_spend_per_unit,
                    },
                );
            }
            return decision;
        }

        if roas > r.pause_roas && roas <= r.scale_down_roas {
            let proposed = saturate(budget * (1.0 - r.scale_down_pct / 100.0));
            let decision = candidate(
                ActionType::ScaleDown,
                Some(proposed),
                format!(
                    "Weak ROAS {:.2} <= {:.2}; -{:.0}% budget",
                    roas, r.scale_down_roas, r.scale_down_pct
                ),
            );
            if proposed < r.min_daily_spend {
                return decision.downgrade(
                    DecisionStatus::NoAction,
                    HoldReason::BudgetFloor {
                        proposed,
                        min: r.min_daily_spend,
                    },
                );
            }
            return decision;
        }

        if roas <= r.pause_roas {
            let mut reason = format!("ROAS {:.2} at or below pause band {:.2}", roas, r.pause_roas);
            if let Some(alert) = alerts.iter().find(|a| {
                a.severity == AlertSeverity::Critical
                    && a.auto_action == Some(AutoAction::PauseIfEnabled)
            }) {
                reason.push_str(&format!("; {}", alert.title));
            }
            return candidate(ActionType::Pause, None, reason);
        }

        Decision::no_action(
            unit_id,
            budget,
            roas,
            format!("ROAS {roas:.2} within target band"),
            None,
            now,
        )
    }
}
