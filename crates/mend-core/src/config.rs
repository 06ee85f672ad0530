//! Configuration management for Mend
//!
//! Runtime settings for the dispatcher, the recovery subsystem, the strategy
//! planner, and the telemetry feed. Every field has a default so a partial
//! `.mend/config.toml` is valid.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::{MendError, Result};

/// Manufacturer -> strategy name -> success probability
pub type SuccessTable = BTreeMap<String, BTreeMap<String, f64>>;

/// Repository-level Mend configuration
///
/// Loaded from `.mend/config.toml` in the working directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MendConfig {
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    #[serde(default)]
    pub planner: PlannerConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// What the dispatcher does when the selected worker is already running
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Wait for the worker to become free
    #[default]
    Queue,
    /// Report `WorkerBusy` immediately
    FailFast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default)]
    pub busy_policy: BusyPolicy,

    /// Per-step deadline; expiry is reported as a timeout-kind failure
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Disable to record failures without attempting automated recovery
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Reject analyses with missing fields instead of defaulting the strategy
    #[serde(default = "default_true")]
    pub strict_analysis: bool,

    #[serde(default = "default_max_fallbacks")]
    pub max_fallbacks: usize,

    /// Probability used when the success table has no entry
    #[serde(default = "default_success_probability")]
    pub default_success_probability: f64,

    /// Overrides merged on top of the built-in success table
    #[serde(default)]
    pub success_rates: SuccessTable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Number of events kept in the in-memory feed
    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,

    /// Write a markdown run log to `.mend/activity.md`
    #[serde(default = "default_true")]
    pub activity_log: bool,
}

// Default value providers
fn default_true() -> bool {
    true
}

fn default_step_timeout_secs() -> u64 {
    300
}

fn default_recovery_timeout_secs() -> u64 {
    120
}

fn default_max_fallbacks() -> usize {
    2
}

fn default_success_probability() -> f64 {
    0.5
}

fn default_feed_capacity() -> usize {
    1000
}

impl MendConfig {
    /// Load configuration from `.mend/config.toml` or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = root.join(".mend/config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Self = toml::from_str(&content)
                .map_err(|e| MendError::Config(format!("Failed to parse config file: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Write default configuration to `.mend/config.toml`
    pub fn write_default(root: &Path) -> Result<()> {
        let config_dir = root.join(".mend");
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| MendError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    /// Reject probabilities outside [0, 1] and zero deadlines
    pub fn validate(&self) -> Result<()> {
        let in_range = |p: f64| (0.0..=1.0).contains(&p);

        if !in_range(self.planner.default_success_probability) {
            return Err(MendError::Config(format!(
                "default_success_probability {} is outside [0, 1]",
                self.planner.default_success_probability
            )));
        }
        for (manufacturer, rates) in &self.planner.success_rates {
            if let Some((strategy, p)) = rates.iter().find(|(_, p)| !in_range(**p)) {
                return Err(MendError::Config(format!(
                    "success rate {} for {}/{} is outside [0, 1]",
                    p, manufacturer, strategy
                )));
            }
        }
        if self.dispatcher.step_timeout_secs == 0 {
            return Err(MendError::Config(
                "step_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl DispatcherConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

impl RecoveryConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            busy_policy: BusyPolicy::default(),
            step_timeout_secs: default_step_timeout_secs(),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            recovery_timeout_secs: default_recovery_timeout_secs(),
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            strict_analysis: true,
            max_fallbacks: default_max_fallbacks(),
            default_success_probability: default_success_probability(),
            success_rates: SuccessTable::new(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            feed_capacity: default_feed_capacity(),
            activity_log: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = MendConfig::default();
        assert_eq!(config.dispatcher.busy_policy, BusyPolicy::Queue);
        assert_eq!(config.dispatcher.step_timeout(), Duration::from_secs(300));
        assert!(config.recovery.enabled);
        assert!(config.planner.strict_analysis);
        assert_eq!(config.planner.max_fallbacks, 2);
        assert_eq!(config.telemetry.feed_capacity, 1000);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = MendConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.planner.default_success_probability, 0.5);
    }

    #[test]
    fn test_write_then_load_default() {
        let dir = TempDir::new().unwrap();
        MendConfig::write_default(dir.path()).unwrap();
        assert!(dir.path().join(".mend/config.toml").exists());

        let config = MendConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.dispatcher.step_timeout_secs, 300);
    }

    #[test]
    fn test_partial_file() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".mend")).unwrap();
        std::fs::write(
            dir.path().join(".mend/config.toml"),
            r#"
[dispatcher]
busy_policy = "fail_fast"

[planner.success_rates.motorola]
recovery_mode = 0.7
"#,
        )
        .unwrap();

        let config = MendConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.dispatcher.busy_policy, BusyPolicy::FailFast);
        assert_eq!(config.dispatcher.step_timeout_secs, 300);
        assert_eq!(config.planner.success_rates["motorola"]["recovery_mode"], 0.7);
        assert!(config.recovery.enabled);
    }

    #[test]
    fn test_rejects_out_of_range_rate() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".mend")).unwrap();
        std::fs::write(
            dir.path().join(".mend/config.toml"),
            "[planner.success_rates.acme]\ndirect_bypass = 1.5\n",
        )
        .unwrap();

        let err = MendConfig::load_or_default(dir.path()).unwrap_err();
        assert!(matches!(err, MendError::Config(_)));
    }
}
