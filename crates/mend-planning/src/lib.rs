//! # mend-planning
//!
//! Strategy planning for Mend: turns a [`mend_core::DeviceAnalysis`] into a
//! [`mend_core::Plan`] with ordered steps, a risk assessment, a success
//! estimate, and ranked fallback strategies.

pub mod generators;
pub mod planner;
pub mod risk;
pub mod success;

pub use generators::{generate_steps, profile, StrategyProfile};
pub use planner::{select_strategy, StrategyPlanner};
pub use success::SuccessTable;
