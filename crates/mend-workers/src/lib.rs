//! # mend-workers
//!
//! Workers, the worker pool, and the transport seam for Mend.
//!
//! - [`Worker`]: capability contract every worker kind implements
//! - [`WorkerPool`]: arena of workers with per-worker mutual exclusion that
//!   routes each step to exactly one capability-compatible worker
//! - [`Transport`]: opaque channel to the device, shared with recovery

mod kinds;
mod pool;
mod transport;
mod worker;

pub use kinds::{ChannelWorker, ExploitWorker, PatternAnalysisWorker};
pub use pool::{default_routes, WorkerPool, WorkerStatus};
pub use transport::{Remediation, SimulatedTransport, Transport, TransportResult};
pub use worker::{Worker, WorkerHandle, WorkerState};

/// Capability keys referenced by the routing table
pub mod capability {
    pub const USB_COMMUNICATION: &str = "usb_communication";
    pub const VULNERABILITY_EXPLOIT: &str = "vulnerability_exploit";
    pub const PATTERN_ANALYSIS: &str = "pattern_analysis";
}
