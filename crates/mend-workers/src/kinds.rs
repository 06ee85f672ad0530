//! Built-in worker kinds
//!
//! Each kind declares its capability set and decorates the transport payload
//! with the fields callers expect from it.

use async_trait::async_trait;
use mend_core::{Parameters, Step};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::capability;
use crate::transport::{Transport, TransportResult};
use crate::worker::Worker;

fn capability_set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Low-level channel worker: handshakes, reboots, protocol exchanges
pub struct ChannelWorker {
    capabilities: BTreeSet<String>,
    transport: Arc<dyn Transport>,
}

impl ChannelWorker {
    pub const ID: &'static str = "usb_communication_agent";

    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            capabilities: capability_set(&[
                capability::USB_COMMUNICATION,
                "usb_control",
                "device_handshake",
                "protocol_analysis",
            ]),
            transport,
        }
    }
}

#[async_trait]
impl Worker for ChannelWorker {
    fn id(&self) -> &str {
        Self::ID
    }

    fn capabilities(&self) -> &BTreeSet<String> {
        &self.capabilities
    }

    async fn perform(&self, step: &Step) -> TransportResult<Parameters> {
        let mut payload = self.transport.execute(Self::ID, step).await?;
        payload.insert(
            "protocol_used".to_string(),
            Value::from(step.param("protocol").unwrap_or("adb")),
        );
        payload.insert("connection_stable".to_string(), Value::Bool(true));
        Ok(payload)
    }
}

/// Delivers a known vulnerability payload selected by the planner
pub struct ExploitWorker {
    capabilities: BTreeSet<String>,
    transport: Arc<dyn Transport>,
}

impl ExploitWorker {
    pub const ID: &'static str = "vulnerability_exploit_agent";

    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            capabilities: capability_set(&[
                capability::VULNERABILITY_EXPLOIT,
                "vulnerability_scanning",
                "exploit_development",
                "payload_execution",
            ]),
            transport,
        }
    }
}

#[async_trait]
impl Worker for ExploitWorker {
    fn id(&self) -> &str {
        Self::ID
    }

    fn capabilities(&self) -> &BTreeSet<String> {
        &self.capabilities
    }

    async fn perform(&self, step: &Step) -> TransportResult<Parameters> {
        let mut payload = self.transport.execute(Self::ID, step).await?;
        payload.insert(
            "exploit_id".to_string(),
            Value::from(step.param("exploit_id").unwrap_or("auto")),
        );
        payload.insert("exploit_executed".to_string(), Value::Bool(true));
        Ok(payload)
    }
}

/// Observes lock-screen and boot behaviour for the later steps
pub struct PatternAnalysisWorker {
    capabilities: BTreeSet<String>,
    transport: Arc<dyn Transport>,
}

impl PatternAnalysisWorker {
    pub const ID: &'static str = "pattern_analysis_agent";

    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            capabilities: capability_set(&[
                capability::PATTERN_ANALYSIS,
                "pattern_recognition",
                "behavior_analysis",
                "security_assessment",
            ]),
            transport,
        }
    }
}

#[async_trait]
impl Worker for PatternAnalysisWorker {
    fn id(&self) -> &str {
        Self::ID
    }

    fn capabilities(&self) -> &BTreeSet<String> {
        &self.capabilities
    }

    async fn perform(&self, step: &Step) -> TransportResult<Parameters> {
        let mut payload = self.transport.execute(Self::ID, step).await?;
        payload.insert(
            "target".to_string(),
            Value::from(step.param("target").unwrap_or("lock_screen")),
        );
        Ok(payload)
    }
}
