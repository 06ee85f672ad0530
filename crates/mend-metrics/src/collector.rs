//! Telemetry feed for plan runs
//!
//! Every step attempt and every incident is pushed here for observability.
//! Nothing in the orchestrator reads this feed back to make decisions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mend_core::{AttemptRecord, FinalStatus, Incident, Result, Strategy};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Types of telemetry events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    PlanStarted {
        plan_id: Uuid,
        device_id: String,
        strategy: Strategy,
        steps: usize,
    },
    StepRecorded {
        plan_id: Uuid,
        record: AttemptRecord,
    },
    Incident {
        incident: Incident,
    },
    PlanFinished {
        plan_id: Uuid,
        final_status: FinalStatus,
        overall_success: bool,
    },
}

/// Append-only destination for telemetry
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn record(&self, event: TelemetryEvent) -> Result<()>;
}

/// Global counters across all plan runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalMetrics {
    pub plans_started: u32,
    pub plans_unlocked: u32,
    pub step_attempts: u32,
    pub failed_attempts: u32,
    pub retries: u32,
    pub incidents: u32,
}

/// In-memory sink keeping the most recent events
pub struct MetricsCollector {
    capacity: usize,
    feed: RwLock<VecDeque<(DateTime<Utc>, TelemetryEvent)>>,
    plans_started: AtomicU32,
    plans_unlocked: AtomicU32,
    step_attempts: AtomicU32,
    failed_attempts: AtomicU32,
    retries: AtomicU32,
    incidents: AtomicU32,
}

impl MetricsCollector {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            feed: RwLock::new(VecDeque::new()),
            plans_started: AtomicU32::new(0),
            plans_unlocked: AtomicU32::new(0),
            step_attempts: AtomicU32::new(0),
            failed_attempts: AtomicU32::new(0),
            retries: AtomicU32::new(0),
            incidents: AtomicU32::new(0),
        }
    }

    /// Most recent `count` events, oldest first
    pub async fn recent(&self, count: usize) -> Vec<TelemetryEvent> {
        let feed = self.feed.read().await;
        let skip = feed.len().saturating_sub(count);
        feed.iter().skip(skip).map(|(_, e)| e.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        self.feed.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.feed.read().await.is_empty()
    }

    pub fn global_summary(&self) -> GlobalMetrics {
        GlobalMetrics {
            plans_started: self.plans_started.load(Ordering::Relaxed),
            plans_unlocked: self.plans_unlocked.load(Ordering::Relaxed),
            step_attempts: self.step_attempts.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            incidents: self.incidents.load(Ordering::Relaxed),
        }
    }

    fn count(&self, event: &TelemetryEvent) {
        match event {
            TelemetryEvent::PlanStarted { .. } => {
                self.plans_started.fetch_add(1, Ordering::Relaxed);
            }
            TelemetryEvent::StepRecorded { record, .. } => {
                self.step_attempts.fetch_add(1, Ordering::Relaxed);
                if !record.result.success {
                    self.failed_attempts.fetch_add(1, Ordering::Relaxed);
                }
                if record.is_retry() {
                    self.retries.fetch_add(1, Ordering::Relaxed);
                }
            }
            TelemetryEvent::Incident { .. } => {
                self.incidents.fetch_add(1, Ordering::Relaxed);
            }
            TelemetryEvent::PlanFinished { final_status, .. } => {
                if *final_status == FinalStatus::Unlocked {
                    self.plans_unlocked.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl TelemetrySink for MetricsCollector {
    async fn record(&self, event: TelemetryEvent) -> Result<()> {
        self.count(&event);

        let mut feed = self.feed.write().await;
        if feed.len() == self.capacity {
            feed.pop_front();
        }
        debug!("telemetry: {:?}", event);
        feed.push_back((Utc::now(), event));
        Ok(())
    }
}
