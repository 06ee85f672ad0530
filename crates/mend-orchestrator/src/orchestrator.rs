//! Plan execution engine
//!
//! Runs a plan's steps strictly in order against the worker pool. A failed
//! first attempt goes through recovery and, when recovery clears the
//! condition, exactly one retry. Execution never stops at a failed step: the
//! full sequence runs and the outcome is folded into one report.

use chrono::Utc;
use mend_core::config::MendConfig;
use mend_core::fail_open::fail_open;
use mend_core::{
    Alternative, AttemptRecord, DeviceAnalysis, ErrorInfo, ErrorKind, FinalStatus, MendError,
    Plan, PlanExecutionReport, Result, Step, Strategy,
};
use mend_metrics::{TelemetryEvent, TelemetrySink};
use mend_planning::StrategyPlanner;
use mend_workers::{Transport, WorkerPool, WorkerStatus};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::activity_logger::ActivityLogger;
use crate::events::{ProgressBus, ProgressEvent};
use crate::recovery::{HealingStatus, RecoveryExecutor, RecoveryManager};
use crate::state_machine::{transition, Action, Event, State, MAX_ATTEMPTS};

/// Shared collaborators for every plan run in the process
///
/// The worker pool and incident history are the only process-wide state.
/// They are owned here and handed to the orchestrator explicitly.
#[derive(Clone)]
pub struct RuntimeContext {
    pub pool: Arc<WorkerPool>,
    pub planner: Arc<StrategyPlanner>,
    pub recovery: Arc<RecoveryManager>,
    pub telemetry: Arc<dyn TelemetrySink>,
}

impl RuntimeContext {
    /// Standard pool, rule-based recovery, and planner built from config
    pub fn standard(
        config: &MendConfig,
        transport: Arc<dyn Transport>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self> {
        let executor = RecoveryExecutor::new(transport.clone(), config.recovery.recovery_timeout());

        Ok(Self {
            pool: Arc::new(WorkerPool::standard(&config.dispatcher, transport)),
            planner: Arc::new(StrategyPlanner::new(&config.planner)?),
            recovery: Arc::new(
                RecoveryManager::new(executor).with_enabled(config.recovery.enabled),
            ),
            telemetry,
        })
    }
}

/// Report plus the ranked fallbacks offered when the run did not unlock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub report: PlanExecutionReport,
    pub alternatives: Vec<Alternative>,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        self.report.overall_success
    }
}

/// Pool and recovery snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub workers: Vec<WorkerStatus>,
    pub recovery: HealingStatus,
}

pub struct Orchestrator {
    context: RuntimeContext,
    progress: ProgressBus,
    activity: Option<ActivityLogger>,
}

impl Orchestrator {
    pub fn new(context: RuntimeContext) -> Self {
        Self {
            context,
            progress: ProgressBus::default(),
            activity: None,
        }
    }

    pub fn with_activity_log(mut self, logger: ActivityLogger) -> Self {
        self.activity = Some(logger);
        self
    }

    pub fn context(&self) -> &RuntimeContext {
        &self.context
    }

    /// Receive per-step progress for every subsequent run
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    pub fn create_plan(&self, analysis: &DeviceAnalysis) -> Result<Plan> {
        self.context.planner.create_plan(analysis)
    }

    pub fn alternatives(
        &self,
        analysis: &DeviceAnalysis,
        excluding: Strategy,
    ) -> Result<Vec<Alternative>> {
        self.context.planner.alternatives(analysis, excluding)
    }

    /// Plan and execute in one call
    pub async fn run(
        &self,
        analysis: &DeviceAnalysis,
        cancel: CancellationToken,
    ) -> Result<ExecutionOutcome> {
        let plan = self.create_plan(analysis)?;
        self.execute_plan(&plan, analysis, cancel).await
    }

    /// Execute every step of `plan` and build the composite report
    ///
    /// Device and transport failures never produce `Err`; they are recorded
    /// in the report. Cancellation is checked before each step.
    pub async fn execute_plan(
        &self,
        plan: &Plan,
        analysis: &DeviceAnalysis,
        cancel: CancellationToken,
    ) -> Result<ExecutionOutcome> {
        if plan.device_id != analysis.device_id {
            return Err(MendError::Orchestrator(format!(
                "plan {} targets {} but the analysis is for {}",
                plan.id, plan.device_id, analysis.device_id
            )));
        }
        if plan.steps.is_empty() {
            return Err(MendError::Orchestrator(format!("plan {} has no steps", plan.id)));
        }
        // Alternatives are built from the same analysis after the run
        self.context.planner.validate(analysis)?;

        let started_at = Utc::now();
        info!(
            "Executing {} plan {} for {} ({} steps)",
            plan.strategy,
            plan.id,
            plan.device_id,
            plan.steps.len()
        );
        self.progress.publish(ProgressEvent::PlanStarted {
            plan_id: plan.id,
            strategy: plan.strategy,
            total_steps: plan.steps.len(),
        });
        self.emit(TelemetryEvent::PlanStarted {
            plan_id: plan.id,
            device_id: plan.device_id.clone(),
            strategy: plan.strategy,
            steps: plan.steps.len(),
        })
        .await;
        if let Some(log) = &self.activity {
            log.log_plan_start(plan).await;
        }

        let (state, mut actions) = transition(
            State::Idle,
            Event::StartPlan {
                strategy: plan.strategy.to_string(),
                steps: plan.steps.len(),
            },
        );
        let (mut state, ready) = transition(state, Event::PlanReady);
        actions.extend(ready);

        let mut queue: VecDeque<Action> = actions.into();
        let mut records: Vec<AttemptRecord> = Vec::new();
        let mut last_error: Option<ErrorInfo> = None;

        while let Some(action) = queue.pop_front() {
            let event = match action {
                Action::LogActivity { message } => {
                    debug!("plan {}: {}", plan.id, message);
                    continue;
                }
                Action::Finish { status } => {
                    debug!("plan {} reached {}", plan.id, status);
                    continue;
                }
                Action::DispatchStep { step, attempt } => {
                    if attempt == 1 && cancel.is_cancelled() {
                        info!("Plan {} cancelled before step {}", plan.id, step + 1);
                        Event::Cancel
                    } else {
                        match plan.steps.get(step) {
                            Some(definition) => {
                                let record = self.attempt(plan, step, attempt, definition).await;
                                let succeeded = record.result.success;
                                last_error = record.result.error.clone();
                                records.push(record);

                                if succeeded {
                                    Event::StepSucceeded
                                } else {
                                    if attempt >= MAX_ATTEMPTS {
                                        self.record_unrecovered(last_error.as_ref()).await;
                                    }
                                    Event::StepFailed
                                }
                            }
                            None => Event::Error {
                                message: format!("step index {} is out of range", step),
                            },
                        }
                    }
                }
                Action::Recover { step } => {
                    let error = last_error.take().unwrap_or_else(|| {
                        ErrorInfo::new(ErrorKind::Other, "step failed without error detail")
                    });
                    let recovered = self.recover(plan, step, &error).await;
                    Event::RecoveryFinished { recovered }
                }
            };

            let (next, actions) = transition(state, event);
            state = next;
            queue.extend(actions);
        }

        let final_status = match state {
            State::Completed { status } => status,
            State::Failed { error } => return Err(MendError::Orchestrator(error)),
            other => {
                return Err(MendError::Orchestrator(format!(
                    "plan run stopped in state {:?}",
                    other
                )))
            }
        };
        let overall_success = final_status == FinalStatus::Unlocked;

        let report = PlanExecutionReport {
            plan_id: plan.id,
            device_id: plan.device_id.clone(),
            strategy: plan.strategy,
            step_results: records,
            overall_success,
            final_status,
            started_at,
            finished_at: Utc::now(),
        };

        let alternatives = if final_status == FinalStatus::PartiallyLocked {
            self.alternatives(analysis, plan.strategy)?
        } else {
            Vec::new()
        };

        info!(
            "Plan {} finished: {} ({} attempts, {} retries)",
            plan.id,
            final_status,
            report.step_results.len(),
            report.retry_count()
        );
        if let Some(log) = &self.activity {
            log.log_plan_complete(&report, &alternatives).await;
        }
        self.progress.publish(ProgressEvent::PlanFinished {
            plan_id: plan.id,
            final_status,
            overall_success,
        });
        self.emit(TelemetryEvent::PlanFinished {
            plan_id: plan.id,
            final_status,
            overall_success,
        })
        .await;

        Ok(ExecutionOutcome {
            report,
            alternatives,
        })
    }

    pub async fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            workers: self.context.pool.status(),
            recovery: self.context.recovery.status().await,
        }
    }

    async fn attempt(
        &self,
        plan: &Plan,
        step_index: usize,
        attempt: u32,
        step: &Step,
    ) -> AttemptRecord {
        self.progress.publish(ProgressEvent::StepStarted {
            plan_id: plan.id,
            step_index,
            attempt,
            step_type: step.step_type.clone(),
        });

        let result = self.context.pool.dispatch(step).await;
        let record = AttemptRecord {
            step_index,
            attempt,
            result,
        };

        match &record.result.error {
            None => info!(
                "Step {}/{} {} succeeded (attempt {})",
                step_index + 1,
                plan.steps.len(),
                step.step_type,
                attempt
            ),
            Some(error) => warn!(
                "Step {}/{} {} failed (attempt {}): {}",
                step_index + 1,
                plan.steps.len(),
                step.step_type,
                attempt,
                error
            ),
        }

        if let Some(log) = &self.activity {
            log.log_attempt(&record).await;
        }
        self.progress.publish(ProgressEvent::StepFinished {
            plan_id: plan.id,
            record: record.clone(),
        });
        self.emit(TelemetryEvent::StepRecorded {
            plan_id: plan.id,
            record: record.clone(),
        })
        .await;

        record
    }

    async fn recover(&self, plan: &Plan, step_index: usize, error: &ErrorInfo) -> bool {
        let healing = self.context.recovery.handle_failure(error).await;
        debug!(
            "Recovery for step {} classified as {:?} (confidence {:.2})",
            step_index + 1,
            healing.plan.method,
            healing.plan.confidence
        );

        if let Some(log) = &self.activity {
            log.log_recovery(step_index, &healing).await;
        }
        self.progress.publish(ProgressEvent::RecoveryAttempted {
            plan_id: plan.id,
            step_index,
            method: healing.plan.method,
            recovered: healing.outcome.recovered,
        });
        let recovered = healing.outcome.recovered;
        self.emit(TelemetryEvent::Incident {
            incident: healing.incident,
        })
        .await;

        recovered
    }

    async fn record_unrecovered(&self, error: Option<&ErrorInfo>) {
        if let Some(error) = error {
            let incident = self.context.recovery.record_unhandled(error).await;
            self.emit(TelemetryEvent::Incident { incident }).await;
        }
    }

    async fn emit(&self, event: TelemetryEvent) {
        fail_open("telemetry::record", || self.context.telemetry.record(event)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_metrics::MetricsCollector;
    use mend_workers::SimulatedTransport;

    fn orchestrator(transport: SimulatedTransport) -> (Orchestrator, Arc<MetricsCollector>) {
        let metrics = Arc::new(MetricsCollector::default());
        let context =
            RuntimeContext::standard(&MendConfig::default(), Arc::new(transport), metrics.clone())
                .unwrap();
        (Orchestrator::new(context), metrics)
    }

    fn google_frp() -> DeviceAnalysis {
        DeviceAnalysis::new("pixel-1")
            .with_manufacturer("Google")
            .with_lock("frp_lock")
    }

    #[tokio::test]
    async fn test_clean_run_unlocks() {
        let (orchestrator, metrics) = orchestrator(SimulatedTransport::new());

        let outcome = orchestrator
            .run(&google_frp(), CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.report.final_status, FinalStatus::Unlocked);
        assert_eq!(outcome.report.strategy, Strategy::VulnerabilityExploit);
        assert_eq!(outcome.report.step_results.len(), 4);
        assert!(outcome.alternatives.is_empty());

        let summary = metrics.global_summary();
        assert_eq!(summary.step_attempts, 4);
        assert_eq!(summary.plans_unlocked, 1);
    }

    #[tokio::test]
    async fn test_mismatched_plan_is_rejected() {
        let (orchestrator, _) = orchestrator(SimulatedTransport::new());
        let plan = orchestrator.create_plan(&google_frp()).unwrap();
        let other = DeviceAnalysis::new("pixel-2").with_manufacturer("google");

        let err = orchestrator
            .execute_plan(&plan, &other, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MendError::Orchestrator(_)));
    }

    #[tokio::test]
    async fn test_empty_plan_is_rejected() {
        let transport = Arc::new(SimulatedTransport::new());
        let metrics = Arc::new(MetricsCollector::default());
        let context =
            RuntimeContext::standard(&MendConfig::default(), transport.clone(), metrics.clone())
                .unwrap();
        let orchestrator = Orchestrator::new(context);
        let mut plan = orchestrator.create_plan(&google_frp()).unwrap();
        plan.steps.clear();

        let err = orchestrator
            .execute_plan(&plan, &google_frp(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MendError::Orchestrator(_)));
        assert!(transport.calls().await.is_empty());
        assert_eq!(metrics.global_summary().plans_started, 0);
    }

    #[tokio::test]
    async fn test_foreign_plan_is_validated_before_dispatch() {
        let analysis = DeviceAnalysis::new("d1").with_lock("screen_lock");
        let mut lenient = MendConfig::default();
        lenient.planner.strict_analysis = false;
        let plan = StrategyPlanner::new(&lenient.planner)
            .unwrap()
            .create_plan(&analysis)
            .unwrap();

        let transport = Arc::new(SimulatedTransport::new());
        let context = RuntimeContext::standard(
            &MendConfig::default(),
            transport.clone(),
            Arc::new(MetricsCollector::default()),
        )
        .unwrap();
        let strict = Orchestrator::new(context);

        let err = strict
            .execute_plan(&plan, &analysis, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MendError::InvalidAnalysis(_)));
        assert!(transport.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_progress_events_are_published() {
        let (orchestrator, _) = orchestrator(SimulatedTransport::new());
        let mut rx = orchestrator.subscribe();

        orchestrator
            .run(&google_frp(), CancellationToken::new())
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(ProgressEvent::PlanStarted { .. })));
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::PlanFinished {
                overall_success: true,
                ..
            })
        ));
        let finished = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::StepFinished { .. }))
            .count();
        assert_eq!(finished, 4);
    }

    #[tokio::test]
    async fn test_failed_retry_records_second_incident() {
        let transport = SimulatedTransport::new()
            .with_persistent_fault("pattern_analysis", ErrorInfo::timeout("still silent"));
        let (orchestrator, metrics) = orchestrator(transport);

        let outcome = orchestrator
            .run(&google_frp(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.report.final_status, FinalStatus::PartiallyLocked);
        assert_eq!(outcome.report.attempts_for(1), 2);

        let status = orchestrator.status().await;
        assert_eq!(status.recovery.incidents_handled, 2);
        assert_eq!(status.recovery.resolved, 1);
        assert_eq!(metrics.global_summary().incidents, 2);
    }
}
