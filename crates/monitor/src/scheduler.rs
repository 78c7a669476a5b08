//! Monitoring scheduler: drives fixed-interval cycles over the configured
//! units and owns the guard state between them.
//!
//! One cycle:
//! 1. fetch + evaluate every unit concurrently, bounded by `max_concurrency`
//! 2. apply the cycle action cap in configured unit order
//! 3. dispatch executable decisions concurrently, each under a timeout
//! 4. fold results into the state serially
//! 5. persist; on failure keep the in-memory state and retry next cycle
//!
//! The next cycle never starts before the previous one has persisted, so the
//! hourly counters it reads are always current.

use crate::evaluator::{UnitEvaluation, UnitEvaluator, UnitInput};
use campaign_core::collaborators::{
    ActionExecutor, ActionRequest, ApprovalGate, ExecutionReport, ExecutionStatus, MetricsSource,
};
use campaign_core::config::GuardConfig;
use campaign_core::error::{ExecutorError, SourceError};
use campaign_core::types::{
    ActionType, ActionValue, AlertType, Decision, HoldReason, OptimizationAction, UnitState,
    UnitStatus,
};
use campaign_optimizer::enforce_cycle_cap;
use campaign_risk::alerts::{self, AlertGenerator};
use campaign_store::{AssessmentRecord, GuardState, PersistenceStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Summary of one completed cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub units_evaluated: usize,
    pub unit_errors: usize,
    pub decisions: Vec<Decision>,
    pub actions: Vec<OptimizationAction>,
    pub alerts_emitted: usize,
    pub alerts_resolved: usize,
    pub persisted: bool,
    /// Why the save failed, when it did.
    pub persist_error: Option<String>,
    pub duration_ms: u64,
}

enum UnitOutcome {
    Evaluated(Box<UnitEvaluation>),
    Failed { unit_id: String, hold: HoldReason },
}

struct Execution {
    index: usize,
    request: ActionRequest,
    result: Result<ExecutionReport, ExecutorError>,
}

pub struct MonitoringScheduler {
    config: GuardConfig,
    source: Arc<dyn MetricsSource>,
    executor: Arc<dyn ActionExecutor>,
    store: Arc<dyn PersistenceStore>,
    evaluator: Arc<UnitEvaluator>,
    state: GuardState,
}

impl MonitoringScheduler {
    /// Build a scheduler and load the last durable state from `store`.
    pub fn new(
        config: GuardConfig,
        source: Arc<dyn MetricsSource>,
        executor: Arc<dyn ActionExecutor>,
        store: Arc<dyn PersistenceStore>,
        approvals: Arc<dyn ApprovalGate>,
    ) -> Self {
        let evaluator = Arc::new(UnitEvaluator::new(&config, approvals));
        let state = store.load();
        Self {
            config,
            source,
            executor,
            store,
            evaluator,
            state,
        }
    }

    pub fn state(&self) -> &GuardState {
        &self.state
    }

    /// Run cycles every `monitoring_interval` seconds until `shutdown` flips
    /// to `true` or its sender is dropped. A cycle in flight always completes,
    /// including its dispatched actions and the save.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.config.monitoring.monitoring_interval);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            node_id = %self.config.node_id,
            units = self.config.monitoring.units.len(),
            interval_secs = period.as_secs(),
            "monitoring scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_cycle().await;
                    info!(
                        cycle = report.cycle,
                        units = report.units_evaluated,
                        unit_errors = report.unit_errors,
                        actions = report.actions.len(),
                        alerts_emitted = report.alerts_emitted,
                        persisted = report.persisted,
                        duration_ms = report.duration_ms,
                        "cycle complete"
                    );
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("monitoring scheduler stopped");
    }

    /// Run one full cycle over the configured units.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let started = Instant::now();
        let started_at = Utc::now();
        let units = self.config.monitoring.units.clone();
        if units.is_empty() {
            warn!("no units configured for monitoring");
        }

        let outcomes = self.evaluate_units(&units, started_at).await;

        let mut decisions: Vec<Decision> = outcomes
            .iter()
            .map(|o| match o {
                UnitOutcome::Evaluated(e) => e.decision.clone(),
                UnitOutcome::Failed { unit_id, hold } => Decision::no_action(
                    unit_id.as_str(),
                    self.state
                        .unit_states
                        .get(unit_id)
                        .map(|u| u.budget)
                        .unwrap_or(0.0),
                    0.0,
                    hold.to_string(),
                    Some(hold.clone()),
                    started_at,
                ),
            })
            .collect();

        let capped = enforce_cycle_cap(&mut decisions, self.config.safety.max_actions_per_cycle);
        let downgraded = decisions
            .iter()
            .filter(|d| d.hold.is_some() && d.candidate.is_some())
            .count();
        metrics::counter!("guard.decisions_downgraded").increment(downgraded as u64);
        if capped > 0 {
            warn!(held = capped, "cycle action cap held decisions");
        }

        let executions = self.dispatch(&decisions).await;
        let report = self.apply(outcomes, decisions, executions, started_at);

        let persist_error = self.persist(Utc::now()).err();
        let duration_ms = started.elapsed().as_millis() as u64;
        metrics::counter!("guard.cycles").increment(1);
        metrics::histogram!("guard.cycle_latency_ms").record(duration_ms as f64);

        CycleReport {
            persisted: persist_error.is_none(),
            persist_error,
            duration_ms,
            ..report
        }
    }

    async fn evaluate_units(&self, units: &[String], now: DateTime<Utc>) -> Vec<UnitOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.monitoring.max_concurrency));
        let fetch_timeout = Duration::from_millis(self.config.monitoring.fetch_timeout_ms);
        let preset = self.config.monitoring.date_preset;
        let mut tasks = Vec::with_capacity(units.len());

        for unit_id in units {
            let sem = Arc::clone(&semaphore);
            let source = Arc::clone(&self.source);
            let evaluator = Arc::clone(&self.evaluator);
            let unit_state = self.state.unit_states.get(unit_id).cloned();
            let previous = self.state.last_snapshots.get(unit_id).cloned();
            let id = unit_id.clone();

            let task = tokio::spawn(async move {
                let _permit = sem
                    .acquire_owned()
                    .await
                    .map_err(|e| HoldReason::EvaluationFailed {
                        message: e.to_string(),
                    })?;

                let snapshot = match timeout(fetch_timeout, source.fetch(&id, preset)).await {
                    Ok(Ok(snapshot)) => snapshot,
                    Ok(Err(e)) => return Err(fetch_failed(&id, e)),
                    Err(_) => {
                        return Err(fetch_failed(
                            &id,
                            SourceError::Timeout(fetch_timeout.as_millis() as u64),
                        ))
                    }
                };

                let unit = unit_state
                    .unwrap_or_else(|| UnitState::new(evaluator.initial_budget(&snapshot)));
                let input = UnitInput {
                    snapshot,
                    unit,
                    previous,
                };
                Ok(evaluator.evaluate(input, now))
            });
            tasks.push((unit_id.clone(), task));
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        for (unit_id, task) in tasks {
            let outcome = match task.await {
                Ok(Ok(evaluation)) => UnitOutcome::Evaluated(Box::new(evaluation)),
                Ok(Err(hold)) => {
                    metrics::counter!("guard.unit_errors").increment(1);
                    UnitOutcome::Failed { unit_id, hold }
                }
                Err(e) => {
                    error!(unit_id = %unit_id, error = %e, "unit evaluation panicked");
                    metrics::counter!("guard.unit_errors").increment(1);
                    UnitOutcome::Failed {
                        unit_id,
                        hold: HoldReason::EvaluationFailed {
                            message: e.to_string(),
                        },
                    }
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn dispatch(&self, decisions: &[Decision]) -> Vec<Execution> {
        let semaphore = Arc::new(Semaphore::new(self.config.monitoring.max_concurrency));
        let execute_timeout = Duration::from_millis(self.config.monitoring.execute_timeout_ms);
        let mut tasks = Vec::new();

        for (index, decision) in decisions.iter().enumerate() {
            if !decision.is_executable() {
                continue;
            }
            let Some(request) = action_request(decision) else {
                continue;
            };
            let sem = Arc::clone(&semaphore);
            let executor = Arc::clone(&self.executor);
            let unit_id = decision.unit_id.clone();
            let req = request.clone();

            let task = tokio::spawn(async move {
                let _permit = sem
                    .acquire_owned()
                    .await
                    .map_err(|e| ExecutorError::Transport(e.to_string()))?;
                match timeout(execute_timeout, executor.apply(&unit_id, &req)).await {
                    Ok(result) => result,
                    Err(_) => Err(ExecutorError::Timeout(execute_timeout.as_millis() as u64)),
                }
            });
            tasks.push((index, request, task));
        }

        let mut executions = Vec::with_capacity(tasks.len());
        for (index, request, task) in tasks {
            let result = match task.await {
                Ok(result) => result,
                Err(e) => Err(ExecutorError::Transport(format!("executor task failed: {e}"))),
            };
            executions.push(Execution {
                index,
                request,
                result,
            });
        }
        executions
    }

    fn apply(
        &mut self,
        outcomes: Vec<UnitOutcome>,
        decisions: Vec<Decision>,
        executions: Vec<Execution>,
        now: DateTime<Utc>,
    ) -> CycleReport {
        let window = chrono::Duration::seconds(self.config.monitoring.alert_dedup_window_secs);
        let margin = self.config.business.profit_margin;
        let mut report = CycleReport {
            cycle: self.state.cycle_count + 1,
            started_at: now,
            units_evaluated: 0,
            unit_errors: 0,
            decisions: Vec::new(),
            actions: Vec::new(),
            alerts_emitted: 0,
            alerts_resolved: 0,
            persisted: false,
            persist_error: None,
            duration_ms: 0,
        };

        for outcome in outcomes {
            match outcome {
                UnitOutcome::Evaluated(evaluation) => {
                    let e = *evaluation;
                    report.units_evaluated += 1;
                    self.state.record_snapshot(&e.snapshot, margin);
                    self.state.assessment_history.push(AssessmentRecord {
                        unit_id: e.snapshot.unit_id.clone(),
                        financial: e.financial,
                        risk: e.assessment,
                        recorded_at: now,
                    });

                    let unit_id = e.snapshot.unit_id.clone();
                    let reconciled = alerts::reconcile(
                        &mut self.state.active_alerts,
                        &mut self.state.alert_history,
                        &unit_id,
                        e.alerts,
                        window,
                    );
                    for alert in &reconciled.emitted {
                        warn!(
                            unit_id = %alert.unit_id,
                            alert_type = %alert.alert_type,
                            severity = ?alert.severity,
                            impact = alert.financial_impact,
                            "{}",
                            alert.title
                        );
                    }
                    for alert in &reconciled.resolved {
                        info!(unit_id = %alert.unit_id, alert_type = %alert.alert_type, "alert resolved");
                    }
                    report.alerts_emitted += reconciled.emitted.len();
                    report.alerts_resolved += reconciled.resolved.len();
                    metrics::counter!("guard.alerts_emitted")
                        .increment(reconciled.emitted.len() as u64);

                    let unit = self.state.unit_state_mut(&unit_id, e.unit.budget);
                    unit.budget = e.unit.budget;
                    unit.prune_window(now);
                }
                UnitOutcome::Failed { unit_id, hold } => {
                    report.unit_errors += 1;
                    warn!(unit_id = %unit_id, reason = %hold, "unit skipped this cycle");
                    if let Some(unit) = self.state.unit_states.get_mut(&unit_id) {
                        unit.prune_window(now);
                    }
                }
            }
        }

        for execution in executions {
            let Some(decision) = decisions.get(execution.index) else {
                continue;
            };
            let action = self.record_execution(decision, execution, now);
            report.actions.push(action);
        }

        self.state.decision_log.extend(decisions.iter().cloned());
        report.decisions = decisions;
        self.state.cycle_count += 1;
        self.state.last_updated = Some(now);
        report
    }

    fn record_execution(
        &mut self,
        decision: &Decision,
        execution: Execution,
        now: DateTime<Utc>,
    ) -> OptimizationAction {
        let Execution {
            request, result, ..
        } = execution;
        let unit_id = decision.unit_id.as_str();
        let old_value = match request.action {
            ActionType::ScaleUp | ActionType::ScaleDown => ActionValue::Budget(decision.old_budget),
            ActionType::Pause => ActionValue::Status(UnitStatus::Active),
            ActionType::Resume => ActionValue::Status(UnitStatus::Paused),
        };

        let (success, detail) = match &result {
            Ok(report) => (report.is_success(), report.detail.clone()),
            Err(e) => (false, e.to_string()),
        };

        let unit = self.state.unit_state_mut(unit_id, decision.old_budget);
        // Every dispatched execution counts against the hourly window.
        unit.record_action(now);

        if success {
            match request.target {
                ActionValue::Budget(budget) => unit.budget = budget,
                ActionValue::Status(status) => unit.status = status,
            }
            unit.last_optimized_at = Some(now);
            metrics::counter!("guard.actions_executed").increment(1);
            info!(
                unit_id,
                action = %request.action,
                from = %old_value,
                to = %request.target,
                emergency = decision.emergency,
                already_applied = matches!(&result, Ok(r) if r.status == ExecutionStatus::AlreadyInTargetState),
                "action executed"
            );
            alerts::resolve(&mut self.state.active_alerts, unit_id, AlertType::ExecutionFailure);
        } else {
            metrics::counter!("guard.actions_failed").increment(1);
            error!(
                unit_id,
                action = %request.action,
                emergency = decision.emergency,
                error = %detail,
                "action failed"
            );
            let impact = self
                .state
                .last_snapshots
                .get(unit_id)
                .map(|s| if decision.emergency { s.spend } else { 0.0 })
                .unwrap_or(0.0);
            let alert =
                AlertGenerator::execution_failure(unit_id, request.action, &detail, impact, now);
            let window = chrono::Duration::seconds(self.config.monitoring.alert_dedup_window_secs);
            if alerts::upsert(
                &mut self.state.active_alerts,
                &mut self.state.alert_history,
                alert,
                window,
            ) {
                metrics::counter!("guard.alerts_emitted").increment(1);
            }
        }

        let action = OptimizationAction {
            id: Uuid::new_v4(),
            unit_id: unit_id.to_string(),
            action: request.action,
            old_value,
            new_value: request.target,
            reason: decision.reason.clone(),
            timestamp: now,
            success,
            detail,
            emergency: decision.emergency,
        };
        self.state.action_history.push(action.clone());
        action
    }

    /// Save the state. The saved document records this save as a success,
    /// so a recovering guard resolves its persistence alert in the same write.
    /// On failure the in-memory state carries the failure streak and an
    /// active critical alert until a save goes through.
    fn persist(&mut self, now: DateTime<Utc>) -> Result<(), String> {
        let scope = self.config.node_id.clone();
        let health = self.state.persistence.clone();
        let raised =
            alerts::resolve(&mut self.state.active_alerts, &scope, AlertType::PersistenceFailure);
        self.state.persistence.record_success(now);

        let Err(e) = self.store.save(&mut self.state) else {
            if health.is_failing() {
                info!(
                    failed_saves = health.consecutive_failures,
                    "guard state persisted again after failures"
                );
            }
            metrics::gauge!("guard.persist_consecutive_failures").set(0.0);
            return Ok(());
        };

        let message = e.to_string();
        self.state.persistence = health;
        self.state.persistence.record_failure(&message, now);
        let failures = self.state.persistence.consecutive_failures;
        self.state.active_alerts.extend(raised);
        let alert = AlertGenerator::persistence_failure(&scope, &message, failures, now);
        let window = chrono::Duration::seconds(self.config.monitoring.alert_dedup_window_secs);
        if alerts::upsert(
            &mut self.state.active_alerts,
            &mut self.state.alert_history,
            alert,
            window,
        ) {
            metrics::counter!("guard.alerts_emitted").increment(1);
        }

        metrics::counter!("guard.persist_errors").increment(1);
        metrics::gauge!("guard.persist_consecutive_failures").set(failures as f64);
        error!(
            error = %message,
            consecutive_failures = failures,
            "failed to persist guard state, retrying next cycle"
        );
        Err(message)
    }
}

fn fetch_failed(unit_id: &str, e: SourceError) -> HoldReason {
    warn!(unit_id, error = %e, "metrics fetch failed");
    HoldReason::FetchFailed {
        message: e.to_string(),
    }
}

fn action_request(decision: &Decision) -> Option<ActionRequest> {
    let action = decision.candidate?;
    let target = match action {
        ActionType::ScaleUp | ActionType::ScaleDown => ActionValue::Budget(decision.new_budget?),
        ActionType::Pause => ActionValue::Status(UnitStatus::Paused),
        ActionType::Resume => ActionValue::Status(UnitStatus::Active),
    };
    Some(ActionRequest {
        action,
        target,
        reason: decision.reason.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_core::types::DecisionStatus;

    fn decision(action: Option<ActionType>, new_budget: Option<f64>) -> Decision {
        Decision {
            unit_id: "u1".to_string(),
            candidate: action,
            status: DecisionStatus::Execute,
            old_budget: 1000.0,
            new_budget,
            reason: "r".to_string(),
            hold: None,
            emergency: false,
            roas: 1.0,
            decided_at: Utc::now(),
        }
    }

    #[test]
    fn test_action_request_targets() {
        let req = action_request(&decision(Some(ActionType::ScaleUp), Some(1200.0))).unwrap();
        assert_eq!(req.target, ActionValue::Budget(1200.0));

        let req = action_request(&decision(Some(ActionType::Resume), None)).unwrap();
        assert_eq!(req.target, ActionValue::Status(UnitStatus::Active));

        assert!(action_request(&decision(Some(ActionType::ScaleDown), None)).is_none());
        assert!(action_request(&decision(None, None)).is_none());
    }
}
