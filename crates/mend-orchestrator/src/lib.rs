//! # mend-orchestrator
//!
//! Plan execution for Mend.
//!
//! This crate provides:
//! - The [`Orchestrator`], running plan steps in order against the worker pool
//! - Failure classification and automated recovery with one bounded retry
//! - A pure state machine for execution control flow
//! - Progress events and a markdown activity log

pub mod activity_logger;
pub mod events;
mod orchestrator;
pub mod recovery;
pub mod state_machine;

pub use activity_logger::ActivityLogger;
pub use events::{ProgressBus, ProgressEvent};
pub use orchestrator::{ExecutionOutcome, Orchestrator, OrchestratorStatus, RuntimeContext};
pub use recovery::{
    method_families, Classifier, HealingResult, HealingStatus, RecoveryExecutor, RecoveryManager,
    RecoveryMethod, RecoveryOutcome, RecoveryPlan, RuleClassifier,
};
pub use state_machine::{transition, Action, Event, State};
