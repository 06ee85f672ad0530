//! Per-step progress notifications
//!
//! The orchestrator publishes a [`ProgressEvent`] for every attempt and
//! recovery so a caller can surface live progress. Publishing never blocks and
//! never fails when nobody is listening.

use mend_core::{AttemptRecord, FinalStatus, Strategy};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::recovery::RecoveryMethod;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    PlanStarted {
        plan_id: Uuid,
        strategy: Strategy,
        total_steps: usize,
    },
    StepStarted {
        plan_id: Uuid,
        step_index: usize,
        attempt: u32,
        step_type: String,
    },
    StepFinished {
        plan_id: Uuid,
        record: AttemptRecord,
    },
    RecoveryAttempted {
        plan_id: Uuid,
        step_index: usize,
        method: Option<RecoveryMethod>,
        recovered: bool,
    },
    PlanFinished {
        plan_id: Uuid,
        final_status: FinalStatus,
        overall_success: bool,
    },
}

/// In-process fan-out of progress events
pub struct ProgressBus {
    sender: broadcast::Sender<ProgressEvent>,
}

impl ProgressBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: ProgressEvent) {
        // No receivers is not an error
        let _ = self.sender.send(event);
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(256)
    }
}
