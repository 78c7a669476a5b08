//! Per-unit pipeline: snapshot -> financial metrics -> risk -> alerts ->
//! decision -> safety gates. Synchronous and free of I/O so it can run on a
//! worker task and be replayed against stored snapshots.

use campaign_core::collaborators::ApprovalGate;
use campaign_core::config::GuardConfig;
use campaign_core::types::{
    Alert, Decision, FinancialMetrics, MetricsSnapshot, RiskAssessment, UnitState,
};
use campaign_optimizer::{DecisionEngine, SafetyGate};
use campaign_risk::{AlertGenerator, FinancialCalculator, RiskEngine, UnitContext};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

/// Everything one unit's evaluation reads. Owned so it can move into a task.
#[derive(Debug, Clone)]
pub struct UnitInput {
    pub snapshot: MetricsSnapshot,
    pub unit: UnitState,
    pub previous: Option<MetricsSnapshot>,
}

#[derive(Debug, Clone)]
pub struct UnitEvaluation {
    /// The snapshot after budget reconciliation with the unit state.
    pub snapshot: MetricsSnapshot,
    /// The unit state the decision was computed against.
    pub unit: UnitState,
    pub financial: FinancialMetrics,
    pub assessment: RiskAssessment,
    pub alerts: Vec<Alert>,
    pub decision: Decision,
}

pub struct UnitEvaluator {
    calculator: FinancialCalculator,
    risk: RiskEngine,
    alerts: AlertGenerator,
    decisions: DecisionEngine,
    gate: SafetyGate,
}

impl UnitEvaluator {
    pub fn new(config: &GuardConfig, approvals: Arc<dyn ApprovalGate>) -> Self {
        Self {
            calculator: FinancialCalculator::new(config.business.clone()),
            risk: RiskEngine::new(config.thresholds.clone(), config.business.clone()),
            alerts: AlertGenerator::new(config.thresholds.clone()),
            decisions: DecisionEngine::new(config.rules.clone()),
            gate: SafetyGate::new(config.safety.clone(), approvals),
        }
    }

    /// Starting budget for a unit seen for the first time.
    pub fn initial_budget(&self, snapshot: &MetricsSnapshot) -> f64 {
        if snapshot.daily_budget > 0.0 {
            snapshot.daily_budget
        } else {
            self.decisions.rules().min_daily_spend
        }
    }

    pub fn evaluate(&self, input: UnitInput, now: DateTime<Utc>) -> UnitEvaluation {
        let UnitInput {
            mut snapshot,
            mut unit,
            previous,
        } = input;

        // The platform's reported budget is authoritative when present.
        if snapshot.daily_budget > 0.0 {
            unit.budget = snapshot.daily_budget;
        } else {
            snapshot.daily_budget = unit.budget;
        }

        let financial = self.calculator.compute(&snapshot);
        let context = UnitContext {
            age_days: snapshot.age_days(now),
            last_optimized_at: unit.last_optimized_at,
        };
        let assessment = self.risk.assess(&snapshot, &financial, context, now);
        let alerts = self
            .alerts
            .generate(&snapshot, &financial, &assessment, previous.as_ref(), now);
        let candidate = self
            .decisions
            .decide(&snapshot, &financial, &unit, &alerts, now);
        let decision = self.gate.check(candidate, &unit, now);

        debug!(
            unit_id = %snapshot.unit_id,
            roas = financial.roas,
            risk_score = assessment.risk_score,
            level = %assessment.level,
            alerts = alerts.len(),
            status = ?decision.status,
            candidate = ?decision.candidate,
            "unit evaluated"
        );

        UnitEvaluation {
            snapshot,
            unit,
            financial,
            assessment,
            alerts,
            decision,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_core::types::{ActionType, AlertType, DecisionStatus};
    use campaign_optimizer::DenyAllApprovals;

    fn evaluator() -> UnitEvaluator {
        UnitEvaluator::new(&GuardConfig::default(), Arc::new(DenyAllApprovals))
    }

    fn input(spend: f64, revenue: f64, conversions: u64, budget: f64) -> UnitInput {
        let mut snapshot = MetricsSnapshot::empty("u1", Utc::now());
        snapshot.spend = spend;
        snapshot.revenue = revenue;
        snapshot.conversions = conversions;
        UnitInput {
            snapshot,
            unit: UnitState::new(budget),
            previous: None,
        }
    }

    #[test]
    fn test_pipeline_scale_up() {
        let e = evaluator().evaluate(input(1000.0, 6000.0, 10, 1000.0), Utc::now());
        assert_eq!(e.decision.candidate, Some(ActionType::ScaleUp));
        assert_eq!(e.decision.status, DecisionStatus::Execute);
        assert!((e.decision.new_budget.unwrap() - 1200.0).abs() < 1e-9);
        assert!((e.snapshot.daily_budget - 1000.0).abs() < f64::EPSILON);
        assert!((e.financial.budget_utilization - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_platform_budget_overrides_unit_state() {
        let mut i = input(1000.0, 6000.0, 10, 1000.0);
        i.snapshot.daily_budget = 2000.0;
        let e = evaluator().evaluate(i, Utc::now());
        assert!((e.unit.budget - 2000.0).abs() < f64::EPSILON);
        assert!((e.decision.new_budget.unwrap() - 2400.0).abs() < 1e-9);
    }

    #[test]
    fn test_emergency_pipeline_raises_losing_money_alert() {
        let e = evaluator().evaluate(input(1000.0, 700.0, 0, 1000.0), Utc::now());
        assert_eq!(e.decision.candidate, Some(ActionType::Pause));
        assert!(e.decision.emergency);
        assert!(e
            .alerts
            .iter()
            .any(|a| a.alert_type == AlertType::LowRoas));
        assert!(e.assessment.financial_risk >= 30.0);
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let now = Utc::now();
        let i = input(1000.0, 3200.0, 10, 1000.0);
        let a = evaluator().evaluate(i.clone(), now);
        let b = evaluator().evaluate(i, now);
        assert_eq!(a.decision, b.decision);
        assert_eq!(a.assessment, b.assessment);
    }

    #[test]
    fn test_initial_budget_falls_back_to_floor() {
        let snapshot = MetricsSnapshot::empty("u1", Utc::now());
        assert!((evaluator().initial_budget(&snapshot) - 500.0).abs() < f64::EPSILON);
    }
}
