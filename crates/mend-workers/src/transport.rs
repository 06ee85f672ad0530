//! Transport seam between workers/recovery and the device
//!
//! The physical protocol used to reach the device is outside this crate.
//! Workers and the recovery executor only see the [`Transport`] contract:
//! an operation either returns a payload or an [`ErrorInfo`] describing
//! the failure.

use async_trait::async_trait;
use mend_core::{ErrorInfo, Parameters, Step};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

pub type TransportResult<T> = std::result::Result<T, ErrorInfo>;

/// Result of a corrective action against the transport/driver layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remediation {
    /// Whether the underlying condition was cleared
    pub cleared: bool,
    pub details: String,
}

/// Opaque channel to the device
#[async_trait]
pub trait Transport: Send + Sync {
    /// Carry out `step` on behalf of `worker_id`
    async fn execute(&self, worker_id: &str, step: &Step) -> TransportResult<Parameters>;

    /// Apply a named corrective action
    async fn remediate(&self, action: &str) -> TransportResult<Remediation>;
}

/// Deterministic in-process transport
///
/// Every operation succeeds after `latency` unless a fault was injected for
/// that step type. One-shot faults are consumed in order, so a retry after
/// recovery sees the next queued fault or a success.
#[derive(Default)]
pub struct SimulatedTransport {
    latency: Duration,
    stalls: Mutex<HashMap<String, VecDeque<Duration>>>,
    faults: Mutex<HashMap<String, VecDeque<ErrorInfo>>>,
    persistent_faults: HashMap<String, ErrorInfo>,
    uncleared_actions: HashSet<String>,
    broken_actions: HashSet<String>,
    calls: Mutex<Vec<String>>,
    remediations: Mutex<Vec<String>>,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Hold the next execution of `step_type` for an extra `delay`
    pub fn with_stall(mut self, step_type: &str, delay: Duration) -> Self {
        self.stalls
            .get_mut()
            .entry(step_type.to_string())
            .or_default()
            .push_back(delay);
        self
    }

    /// Fail the next execution of `step_type` with `error`
    pub fn with_fault(mut self, step_type: &str, error: ErrorInfo) -> Self {
        self.faults
            .get_mut()
            .entry(step_type.to_string())
            .or_default()
            .push_back(error);
        self
    }

    /// Fail every execution of `step_type` with `error`
    pub fn with_persistent_fault(mut self, step_type: &str, error: ErrorInfo) -> Self {
        self.persistent_faults.insert(step_type.to_string(), error);
        self
    }

    /// `action` runs but reports the condition as still present
    pub fn with_uncleared_action(mut self, action: &str) -> Self {
        self.uncleared_actions.insert(action.to_string());
        self
    }

    /// `action` itself errors
    pub fn with_broken_action(mut self, action: &str) -> Self {
        self.broken_actions.insert(action.to_string());
        self
    }

    /// Step types executed so far, in call order
    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    /// Corrective actions applied so far, in call order
    pub async fn remediations(&self) -> Vec<String> {
        self.remediations.lock().await.clone()
    }

    async fn settle(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn execute(&self, worker_id: &str, step: &Step) -> TransportResult<Parameters> {
        self.calls.lock().await.push(step.step_type.clone());
        self.settle().await;

        let stall = self
            .stalls
            .lock()
            .await
            .get_mut(&step.step_type)
            .and_then(VecDeque::pop_front);
        if let Some(delay) = stall {
            debug!("{} stalled {:?} on {}", worker_id, delay, step.step_type);
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.persistent_faults.get(&step.step_type) {
            debug!("{} hit persistent fault on {}", worker_id, step.step_type);
            return Err(error.clone());
        }

        let injected = self
            .faults
            .lock()
            .await
            .get_mut(&step.step_type)
            .and_then(VecDeque::pop_front);
        if let Some(error) = injected {
            debug!("{} hit injected fault on {}", worker_id, step.step_type);
            return Err(error);
        }

        let mut payload = Parameters::new();
        payload.insert("acknowledged".to_string(), Value::Bool(true));
        payload.insert(
            "bytes_exchanged".to_string(),
            Value::from(128 + 16 * step.parameters.len() as u64),
        );
        Ok(payload)
    }

    async fn remediate(&self, action: &str) -> TransportResult<Remediation> {
        self.remediations.lock().await.push(action.to_string());
        self.settle().await;

        if self.broken_actions.contains(action) {
            return Err(ErrorInfo::transport(format!(
                "driver layer rejected action {}",
                action
            )));
        }

        let cleared = !self.uncleared_actions.contains(action);
        Ok(Remediation {
            cleared,
            details: if cleared {
                format!("{} applied, condition cleared", action)
            } else {
                format!("{} applied, condition persists", action)
            },
        })
    }
}
