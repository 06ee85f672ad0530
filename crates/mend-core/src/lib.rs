//! # mend-core
//!
//! Core types for the Mend plan orchestration engine.
//!
//! Mend executes multi-step remediation plans against a device reachable only
//! through an unreliable channel. This crate holds the shared vocabulary:
//!
//! - Device analyses, strategies, steps, and plans
//! - Step results, attempt records, and execution reports
//! - Incidents and the error taxonomy
//! - Runtime configuration

pub mod config;
mod error;
pub mod fail_open;
mod types;

pub use config::{BusyPolicy, MendConfig};
pub use error::{MendError, Result};
pub use types::*;
