//! Worker pool and step dispatcher
//!
//! The pool owns every worker in an arena, resolves a step's type to a
//! capability key through a static routing table, and guarantees at most one
//! in-flight `run` per worker through a per-entry lease.

use mend_core::config::DispatcherConfig;
use mend_core::{BusyPolicy, ErrorInfo, Step, StepResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::capability;
use crate::kinds::{ChannelWorker, ExploitWorker, PatternAnalysisWorker};
use crate::transport::Transport;
use crate::worker::{Worker, WorkerHandle, WorkerState};

/// Snapshot of one worker for status reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub id: String,
    pub state: WorkerState,
    pub capabilities: Vec<String>,
}

/// Process-wide pool of workers
pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
    routes: HashMap<String, String>,
    busy_policy: BusyPolicy,
    step_timeout: Duration,
}

impl WorkerPool {
    /// Create an empty pool with the standard routing table
    pub fn new(config: &DispatcherConfig) -> Self {
        Self {
            workers: Vec::new(),
            routes: default_routes(),
            busy_policy: config.busy_policy,
            step_timeout: config.step_timeout(),
        }
    }

    /// Pool with one channel, one exploit, and one pattern-analysis worker
    pub fn standard(config: &DispatcherConfig, transport: Arc<dyn Transport>) -> Self {
        Self::new(config)
            .with_worker(Arc::new(ChannelWorker::new(transport.clone())))
            .with_worker(Arc::new(ExploitWorker::new(transport.clone())))
            .with_worker(Arc::new(PatternAnalysisWorker::new(transport)))
    }

    pub fn with_worker(mut self, worker: Arc<dyn Worker>) -> Self {
        self.register(worker);
        self
    }

    /// Map an additional step type onto a capability key
    pub fn with_route(
        mut self,
        step_type: impl Into<String>,
        capability: impl Into<String>,
    ) -> Self {
        self.routes.insert(step_type.into(), capability.into());
        self
    }

    pub fn register(&mut self, worker: Arc<dyn Worker>) {
        debug!(
            "Registering worker {} with capabilities {:?}",
            worker.id(),
            worker.capabilities()
        );
        self.workers.push(WorkerHandle::new(worker));
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Capability key required by a step type
    pub fn capability_for(&self, step_type: &str) -> Option<&str> {
        self.routes.get(step_type).map(String::as_str)
    }

    /// First registered worker whose capabilities cover the step type
    pub fn select(&self, step_type: &str) -> Option<&WorkerHandle> {
        let capability = self.capability_for(step_type)?;
        self.workers.iter().find(|w| w.supports(capability))
    }

    /// Execute one step on a capability-matched worker
    ///
    /// Routing misses and busy workers are reported as failed results, never
    /// as errors, so the caller can move on to the next step.
    pub async fn dispatch(&self, step: &Step) -> StepResult {
        let Some(handle) = self.select(&step.step_type) else {
            warn!("No worker available for step type: {}", step.step_type);
            return StepResult::failed(
                &step.step_type,
                None,
                ErrorInfo::no_worker(&step.step_type),
                Duration::ZERO,
            );
        };

        let _lease = match self.busy_policy {
            BusyPolicy::Queue => handle.lease().await,
            BusyPolicy::FailFast => match handle.try_lease() {
                Ok(guard) => guard,
                Err(_) => {
                    warn!("Worker {} busy, failing {} fast", handle.id(), step.step_type);
                    return StepResult::failed(
                        &step.step_type,
                        Some(handle.id().to_string()),
                        ErrorInfo::worker_busy(handle.id()),
                        Duration::ZERO,
                    );
                }
            },
        };

        debug!("Dispatching {} to {}", step.step_type, handle.id());
        let result = handle.run(step, self.step_timeout).await;
        handle.release();
        result
    }

    pub fn status(&self) -> Vec<WorkerStatus> {
        self.workers
            .iter()
            .map(|w| WorkerStatus {
                id: w.id().to_string(),
                state: w.state(),
                capabilities: w.capabilities().iter().cloned().collect(),
            })
            .collect()
    }
}

/// Step type -> capability key
pub fn default_routes() -> HashMap<String, String> {
    [
        ("usb_communication", capability::USB_COMMUNICATION),
        ("vulnerability_exploit", capability::VULNERABILITY_EXPLOIT),
        ("pattern_analysis", capability::PATTERN_ANALYSIS),
        ("security_bypass", capability::VULNERABILITY_EXPLOIT),
    ]
    .into_iter()
    .map(|(step_type, cap)| (step_type.to_string(), cap.to_string()))
    .collect()
}
