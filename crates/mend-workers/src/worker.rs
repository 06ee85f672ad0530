//! Worker contract and the per-worker state cell
//!
//! A [`Worker`] only knows how to carry out a step. The surrounding
//! [`WorkerHandle`] owns the `Idle -> Working -> {Completed, Error} -> Idle`
//! lifecycle, the per-step deadline, and the busy signal.

use async_trait::async_trait;
use mend_core::{ErrorInfo, Parameters, Step, StepResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard, TryLockError};
use tracing::{debug, warn};

use crate::transport::TransportResult;

/// A capability-bearing executor of steps
///
/// Implementations never retry internally; retry policy belongs to the
/// orchestrator.
#[async_trait]
pub trait Worker: Send + Sync {
    fn id(&self) -> &str;

    fn capabilities(&self) -> &BTreeSet<String>;

    async fn perform(&self, step: &Step) -> TransportResult<Parameters>;
}

/// Lifecycle state of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Working = 1,
    Completed = 2,
    Error = 3,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Working,
            2 => Self::Completed,
            3 => Self::Error,
            _ => Self::Idle,
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Working => write!(f, "working"),
            Self::Completed => write!(f, "completed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Arena entry for one worker
pub struct WorkerHandle {
    worker: Arc<dyn Worker>,
    state: AtomicU8,
    lease: Mutex<()>,
}

impl WorkerHandle {
    pub fn new(worker: Arc<dyn Worker>) -> Self {
        Self {
            worker,
            state: AtomicU8::new(WorkerState::Idle as u8),
            lease: Mutex::new(()),
        }
    }

    pub fn id(&self) -> &str {
        self.worker.id()
    }

    pub fn capabilities(&self) -> &BTreeSet<String> {
        self.worker.capabilities()
    }

    pub fn supports(&self, capability: &str) -> bool {
        self.worker.capabilities().contains(capability)
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Run one step under `deadline`
    ///
    /// Returns a `WorkerBusy` failure without touching the worker when a run
    /// is already in flight. Deadline expiry is reported as a timeout-kind
    /// failure.
    pub async fn run(&self, step: &Step, deadline: Duration) -> StepResult {
        let id = self.id().to_string();

        let claimed = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != WorkerState::Working as u8).then_some(WorkerState::Working as u8)
            });
        if claimed.is_err() {
            warn!("Worker {} rejected {}: busy", id, step.step_type);
            return StepResult::failed(
                &step.step_type,
                Some(id.clone()),
                ErrorInfo::worker_busy(&id),
                Duration::ZERO,
            );
        }

        debug!("Worker {} running {}", id, step.step_type);
        let started = Instant::now();
        let outcome = tokio::time::timeout(deadline, self.worker.perform(step)).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(Ok(payload)) => {
                self.set_state(WorkerState::Completed);
                StepResult::succeeded(&step.step_type, id, payload, elapsed)
            }
            Ok(Err(mut error)) => {
                self.set_state(WorkerState::Error);
                if error.context.is_empty() {
                    error.context = step.step_type.clone();
                }
                StepResult::failed(&step.step_type, Some(id), error, elapsed)
            }
            Err(_) => {
                self.set_state(WorkerState::Error);
                let error = ErrorInfo::timeout(format!(
                    "Step exceeded its deadline of {}s",
                    deadline.as_secs_f64()
                ))
                .with_context(step.step_type.clone());
                StepResult::failed(&step.step_type, Some(id), error, elapsed)
            }
        }
    }

    /// Return a finished worker to `Idle`
    pub fn release(&self) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != WorkerState::Working as u8).then_some(WorkerState::Idle as u8)
            });
    }

    pub(crate) async fn lease(&self) -> MutexGuard<'_, ()> {
        self.lease.lock().await
    }

    pub(crate) fn try_lease(&self) -> Result<MutexGuard<'_, ()>, TryLockError> {
        self.lease.try_lock()
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }
}
