//! Strategy success table keyed by manufacturer

use mend_core::config::PlannerConfig;
use mend_core::{MendError, Result, Strategy};
use std::collections::HashMap;

/// Lookup of empirical success probability per (manufacturer, strategy)
#[derive(Debug, Clone)]
pub struct SuccessTable {
    rates: HashMap<String, HashMap<Strategy, f64>>,
    default: f64,
}

impl SuccessTable {
    /// Built-in rates; entries not listed fall back to `default`
    pub fn builtin(default: f64) -> Self {
        let mut rates: HashMap<String, HashMap<Strategy, f64>> = HashMap::new();
        let entries = [
            ("samsung", Strategy::DirectBypass, 0.80),
            ("samsung", Strategy::BootloaderAccess, 0.90),
            ("apple", Strategy::CustomTool, 0.70),
            ("apple", Strategy::VulnerabilityExploit, 0.60),
            ("google", Strategy::VulnerabilityExploit, 0.85),
            ("google", Strategy::DirectBypass, 0.75),
        ];
        for (manufacturer, strategy, rate) in entries {
            rates
                .entry(manufacturer.to_string())
                .or_default()
                .insert(strategy, rate);
        }
        Self { rates, default }
    }

    /// Built-in rates with the configured overrides merged on top
    pub fn from_config(config: &PlannerConfig) -> Result<Self> {
        let mut table = Self::builtin(config.default_success_probability);
        for (manufacturer, overrides) in &config.success_rates {
            for (name, rate) in overrides {
                let strategy: Strategy = name.parse().map_err(MendError::Config)?;
                table.set(manufacturer, strategy, *rate);
            }
        }
        Ok(table)
    }

    pub fn set(&mut self, manufacturer: &str, strategy: Strategy, rate: f64) {
        self.rates
            .entry(manufacturer.to_lowercase())
            .or_default()
            .insert(strategy, rate);
    }

    pub fn probability(&self, manufacturer: Option<&str>, strategy: Strategy) -> f64 {
        manufacturer
            .and_then(|m| self.rates.get(m))
            .and_then(|by_strategy| by_strategy.get(&strategy))
            .copied()
            .unwrap_or(self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup_and_default() {
        let table = SuccessTable::builtin(0.5);
        assert_eq!(table.probability(Some("samsung"), Strategy::BootloaderAccess), 0.90);
        assert_eq!(table.probability(Some("samsung"), Strategy::RecoveryMode), 0.5);
        assert_eq!(table.probability(Some("nokia"), Strategy::DirectBypass), 0.5);
        assert_eq!(table.probability(None, Strategy::CustomTool), 0.5);
    }

    #[test]
    fn test_config_overrides() {
        let mut config = PlannerConfig::default();
        config
            .success_rates
            .entry("Motorola".to_string())
            .or_default()
            .insert("recovery_mode".to_string(), 0.7);
        config
            .success_rates
            .entry("samsung".to_string())
            .or_default()
            .insert("bootloader_access".to_string(), 0.4);

        let table = SuccessTable::from_config(&config).unwrap();
        assert_eq!(table.probability(Some("motorola"), Strategy::RecoveryMode), 0.7);
        assert_eq!(table.probability(Some("samsung"), Strategy::BootloaderAccess), 0.4);
        assert_eq!(table.probability(Some("samsung"), Strategy::DirectBypass), 0.80);
    }

    #[test]
    fn test_unknown_strategy_in_config() {
        let mut config = PlannerConfig::default();
        config
            .success_rates
            .entry("acme".to_string())
            .or_default()
            .insert("magic".to_string(), 0.9);

        assert!(matches!(
            SuccessTable::from_config(&config),
            Err(MendError::Config(_))
        ));
    }
}
