//! Safety gates applied after the decision engine picks a candidate.
//!
//! A blocked decision keeps its candidate action and is downgraded to
//! `no_action` or `pending_approval` so the audit log shows what would have
//! happened. Emergency stops pass every gate.

use campaign_core::collaborators::ApprovalGate;
use campaign_core::config::SafetyConfig;
use campaign_core::types::{saturate, Decision, DecisionStatus, HoldReason, UnitState};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;

pub struct SafetyGate {
    safety: SafetyConfig,
    approvals: Arc<dyn ApprovalGate>,
}

impl SafetyGate {
    pub fn new(safety: SafetyConfig, approvals: Arc<dyn ApprovalGate>) -> Self {
        Self { safety, approvals }
    }

    /// Hourly rate limit, then the large-change approval gate.
    pub fn check(&self, decision: Decision, unit: &UnitState, now: DateTime<Utc>) -> Decision {
        if !decision.is_executable() || decision.emergency {
            return decision;
        }
        let Some(action) = decision.candidate else {
            return decision;
        };

        let count = unit.actions_in_last_hour(now);
        let limit = self.safety.max_actions_per_hour;
        if count >= limit {
            warn!(
                unit_id = %decision.unit_id,
                candidate = %action,
                count,
                limit,
                "hourly action limit reached, holding decision"
            );
            return decision.downgrade(
                DecisionStatus::NoAction,
                HoldReason::RateLimited { count, limit },
            );
        }

        if let Some(new_budget) = decision.new_budget.filter(|_| action.changes_budget()) {
            let change_pct = if decision.old_budget > 0.0 {
                saturate((new_budget - decision.old_budget).abs() / decision.old_budget * 100.0)
            } else {
                // Any change from a zero budget is unbounded.
                f64::MAX
            };
            let threshold = self.safety.large_change_approval_pct;
            if change_pct > threshold
                && !self
                    .approvals
                    .take_approval(&decision.unit_id, action, new_budget, now)
            {
                warn!(
                    unit_id = %decision.unit_id,
                    candidate = %action,
                    change_pct,
                    threshold,
                    "large budget change awaiting approval"
                );
                return decision.downgrade(
                    DecisionStatus::PendingApproval,
                    HoldReason::ApprovalRequired {
                        change_pct,
                        threshold,
                    },
                );
            }
        }

        decision
    }
}

/// Hold executable decisions beyond `limit` for this cycle, in slice order.
/// Emergency stops neither consume nor respect the cap. Returns how many
/// decisions were held.
pub fn enforce_cycle_cap(decisions: &mut [Decision], limit: usize) -> usize {
    let mut used = 0usize;
    let mut held = 0usize;
    for slot in decisions.iter_mut() {
        if !slot.is_executable() || slot.emergency {
            continue;
        }
        if used < limit {
            used += 1;
            continue;
        }
        warn!(
            unit_id = %slot.unit_id,
            candidate = ?slot.candidate,
            limit,
            "cycle action cap reached, holding decision"
        );
        let decision = slot.clone();
        *slot = decision.downgrade(DecisionStatus::NoAction, HoldReason::CycleCapReached { limit });
        held += 1;
    }
    held
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approvals::DenyAllApprovals;
    use campaign_core::types::ActionType;
    use chrono::Duration;

    struct AllowAll;

    impl ApprovalGate for AllowAll {
        fn take_approval(&self, _: &str, _: ActionType, _: f64, _: DateTime<Utc>) -> bool {
            true
        }
    }

    fn gate(approvals: Arc<dyn ApprovalGate>) -> SafetyGate {
        SafetyGate::new(SafetyConfig::default(), approvals)
    }

    fn scale_up(unit_id: &str, old: f64, new: f64) -> Decision {
        Decision {
            unit_id: unit_id.to_string(),
            candidate: Some(ActionType::ScaleUp),
            status: DecisionStatus::Execute,
            old_budget: old,
            new_budget: Some(new),
            reason: "High ROAS".to_string(),
            hold: None,
            emergency: false,
            roas: 6.0,
            decided_at: Utc::now(),
        }
    }

    fn emergency_pause(unit_id: &str) -> Decision {
        Decision {
            unit_id: unit_id.to_string(),
            candidate: Some(ActionType::Pause),
            status: DecisionStatus::Execute,
            old_budget: 1000.0,
            new_budget: None,
            reason: "Emergency stop".to_string(),
            hold: None,
            emergency: true,
            roas: 0.5,
            decided_at: Utc::now(),
        }
    }

    fn saturated_unit(now: DateTime<Utc>) -> UnitState {
        let mut unit = UnitState::new(1000.0);
        for i in 0..10 {
            unit.record_action(now - Duration::minutes(50 - i));
        }
        unit
    }

    #[test]
    fn test_passes_within_limits() {
        let now = Utc::now();
        let d = gate(Arc::new(DenyAllApprovals)).check(
            scale_up("u1", 1000.0, 1200.0),
            &UnitState::new(1000.0),
            now,
        );
        assert!(d.is_executable());
        assert!(d.hold.is_none());
    }

    #[test]
    fn test_rate_limit_downgrades() {
        let now = Utc::now();
        let d = gate(Arc::new(AllowAll)).check(
            scale_up("u1", 1000.0, 1200.0),
            &saturated_unit(now),
            now,
        );
        assert_eq!(d.status, DecisionStatus::NoAction);
        assert_eq!(d.candidate, Some(ActionType::ScaleUp));
        assert!(matches!(
            d.hold,
            Some(HoldReason::RateLimited {
                count: 10,
                limit: 10
            })
        ));
    }

    #[test]
    fn test_emergency_bypasses_rate_limit() {
        let now = Utc::now();
        let d = gate(Arc::new(DenyAllApprovals)).check(
            emergency_pause("u1"),
            &saturated_unit(now),
            now,
        );
        assert!(d.is_executable());
    }

    #[test]
    fn test_large_change_needs_approval() {
        let now = Utc::now();
        let unit = UnitState::new(1000.0);
        let d = gate(Arc::new(DenyAllApprovals)).check(scale_up("u1", 1000.0, 1600.0), &unit, now);
        assert_eq!(d.status, DecisionStatus::PendingApproval);
        assert!(matches!(d.hold, Some(HoldReason::ApprovalRequired { .. })));

        let d = gate(Arc::new(AllowAll)).check(scale_up("u1", 1000.0, 1600.0), &unit, now);
        assert!(d.is_executable());
    }

    #[test]
    fn test_one_approval_covers_one_large_change() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("approvals.json");
        std::fs::write(&path, r#"[{"unit_id": "u1", "action": "scale_up"}]"#).unwrap();
        let gate = gate(Arc::new(crate::approvals::FileApprovals::new(&path)));
        let now = Utc::now();

        let first = gate.check(scale_up("u1", 1000.0, 1600.0), &UnitState::new(1000.0), now);
        assert!(first.is_executable());

        let second = gate.check(
            scale_up("u1", 1600.0, 2560.0),
            &UnitState::new(1600.0),
            now + Duration::hours(2),
        );
        assert_eq!(second.status, DecisionStatus::PendingApproval);
    }

    #[test]
    fn test_exactly_threshold_does_not_need_approval() {
        let now = Utc::now();
        let d = gate(Arc::new(DenyAllApprovals)).check(
            scale_up("u1", 1000.0, 1500.0),
            &UnitState::new(1000.0),
            now,
        );
        assert!(d.is_executable());
    }

    #[test]
    fn test_cycle_cap_exempts_emergency() {
        let mut decisions = vec![
            scale_up("u1", 1000.0, 1200.0),
            emergency_pause("u2"),
            scale_up("u3", 1000.0, 1200.0),
            scale_up("u4", 1000.0, 1200.0),
        ];
        let held = enforce_cycle_cap(&mut decisions, 2);
        assert_eq!(held, 1);
        assert!(decisions[0].is_executable());
        assert!(decisions[1].is_executable());
        assert!(decisions[2].is_executable());
        assert_eq!(decisions[3].status, DecisionStatus::NoAction);
        assert!(matches!(
            decisions[3].hold,
            Some(HoldReason::CycleCapReached { limit: 2 })
        ));
    }
}
