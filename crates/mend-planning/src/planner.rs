//! Strategy selection, plan creation, and fallback ranking

use mend_core::config::PlannerConfig;
use mend_core::{
    Alternative, DeviceAnalysis, LockKind, MendError, Plan, Result, Step, Strategy,
};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::generators::{generate_steps, profile, PER_STEP_SECS};
use crate::risk;
use crate::success::SuccessTable;

/// Manufacturer whose bootloader path is preferred
pub const BOOTLOADER_MANUFACTURER: &str = "samsung";
/// Manufacturer whose FRP exploit path is preferred
pub const FRP_EXPLOIT_MANUFACTURER: &str = "google";

/// Ordered selection rules, first match wins
///
/// Manufacturer-specific paths outrank the generic ones.
pub fn select_strategy(manufacturer: Option<&str>, locks: &BTreeSet<LockKind>) -> Strategy {
    if locks.contains(&LockKind::Bootloader) && manufacturer == Some(BOOTLOADER_MANUFACTURER) {
        Strategy::BootloaderAccess
    } else if locks.contains(&LockKind::Frp) && manufacturer == Some(FRP_EXPLOIT_MANUFACTURER) {
        Strategy::VulnerabilityExploit
    } else if locks.contains(&LockKind::Cloud) {
        Strategy::CustomTool
    } else if locks.len() > 2 {
        Strategy::Combination
    } else {
        Strategy::DirectBypass
    }
}

/// Turns a device analysis into an executable plan
pub struct StrategyPlanner {
    table: SuccessTable,
    strict: bool,
    max_fallbacks: usize,
}

impl StrategyPlanner {
    pub fn new(config: &PlannerConfig) -> Result<Self> {
        Ok(Self {
            table: SuccessTable::from_config(config)?,
            strict: config.strict_analysis,
            max_fallbacks: config.max_fallbacks,
        })
    }

    pub fn success_table(&self) -> &SuccessTable {
        &self.table
    }

    /// Pick the primary strategy, rejecting incomplete analyses in strict mode
    pub fn choose_strategy(&self, analysis: &DeviceAnalysis) -> Result<Strategy> {
        self.validate(analysis)?;
        let manufacturer = analysis.manufacturer_key();
        Ok(select_strategy(manufacturer.as_deref(), &analysis.locks))
    }

    /// Build the plan for one remediation attempt
    pub fn create_plan(&self, analysis: &DeviceAnalysis) -> Result<Plan> {
        let strategy = self.choose_strategy(analysis)?;
        let manufacturer = analysis.manufacturer_key();
        let steps = generate_steps(strategy, analysis);
        if steps.is_empty() {
            return Err(MendError::Other(format!(
                "strategy {} produced no steps",
                strategy
            )));
        }

        let plan = Plan {
            id: Uuid::new_v4(),
            device_id: analysis.device_id.clone(),
            strategy,
            estimated_duration_secs: estimate_duration_secs(strategy, &steps),
            steps,
            fallback_strategies: self.fallback_strategies(analysis, strategy),
            risk: risk::assess(analysis),
            success_probability: self.table.probability(manufacturer.as_deref(), strategy),
        };

        info!(
            "Planned {} for device {} ({} steps, p={:.2}, fallbacks {:?})",
            plan.strategy,
            plan.device_id,
            plan.steps.len(),
            plan.success_probability,
            plan.fallback_strategies
        );
        Ok(plan)
    }

    /// Every strategy except `primary`, best first, capped at `max_fallbacks`
    pub fn fallback_strategies(
        &self,
        analysis: &DeviceAnalysis,
        primary: Strategy,
    ) -> Vec<Strategy> {
        self.ranked(analysis, primary)
            .into_iter()
            .map(|(strategy, _)| strategy)
            .collect()
    }

    /// Ranked alternatives to offer after `excluding` failed overall
    pub fn alternatives(
        &self,
        analysis: &DeviceAnalysis,
        excluding: Strategy,
    ) -> Result<Vec<Alternative>> {
        self.validate(analysis)?;

        let alternatives: Vec<Alternative> = self
            .ranked(analysis, excluding)
            .into_iter()
            .map(|(strategy, success_probability)| Alternative {
                strategy,
                steps: generate_steps(strategy, analysis),
                success_probability,
                risk_level: profile(strategy).risk_level,
            })
            .collect();

        debug!(
            "Alternatives to {} for {}: {:?}",
            excluding,
            analysis.device_id,
            alternatives.iter().map(|a| a.strategy).collect::<Vec<_>>()
        );
        Ok(alternatives)
    }

    // Stable sort keeps declaration order among equal probabilities.
    fn ranked(&self, analysis: &DeviceAnalysis, excluding: Strategy) -> Vec<(Strategy, f64)> {
        let manufacturer = analysis.manufacturer_key();
        let mut scored: Vec<(Strategy, f64)> = Strategy::ALL
            .into_iter()
            .filter(|s| *s != excluding)
            .map(|s| (s, self.table.probability(manufacturer.as_deref(), s)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(self.max_fallbacks);
        scored
    }

    /// Check that `analysis` carries the fields selection depends on
    ///
    /// Strict planners reject a missing manufacturer; lenient ones log it.
    pub fn validate(&self, analysis: &DeviceAnalysis) -> Result<()> {
        if analysis.device_id.trim().is_empty() {
            return Err(MendError::InvalidAnalysis("device_id is missing".to_string()));
        }
        if analysis.manufacturer_key().is_none() {
            if self.strict {
                return Err(MendError::InvalidAnalysis(format!(
                    "manufacturer is missing for device {}",
                    analysis.device_id
                )));
            }
            warn!(
                "Manufacturer missing for device {}; selecting without it",
                analysis.device_id
            );
        }
        Ok(())
    }
}

pub fn estimate_duration_secs(strategy: Strategy, steps: &[Step]) -> u64 {
    profile(strategy).base_duration_secs + PER_STEP_SECS * steps.len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner() -> StrategyPlanner {
        StrategyPlanner::new(&PlannerConfig::default()).unwrap()
    }

    fn locks(ids: &[&str]) -> BTreeSet<LockKind> {
        ids.iter().map(|id| LockKind::from(*id)).collect()
    }

    #[test]
    fn test_rule_order() {
        let both = locks(&["bootloader_lock", "frp_lock"]);
        assert_eq!(
            select_strategy(Some("samsung"), &both),
            Strategy::BootloaderAccess
        );
        assert_eq!(
            select_strategy(Some("google"), &both),
            Strategy::VulnerabilityExploit
        );
        assert_eq!(
            select_strategy(Some("samsung"), &locks(&["frp_lock", "icloud_lock"])),
            Strategy::CustomTool
        );
        assert_eq!(
            select_strategy(
                Some("nokia"),
                &locks(&["frp_lock", "screen_lock", "carrier_lock"])
            ),
            Strategy::Combination
        );
        assert_eq!(
            select_strategy(Some("nokia"), &locks(&["screen_lock"])),
            Strategy::DirectBypass
        );
        assert_eq!(select_strategy(None, &BTreeSet::new()), Strategy::DirectBypass);
    }

    #[test]
    fn test_create_plan_for_samsung_bootloader() {
        let analysis = DeviceAnalysis::new("dev-1")
            .with_manufacturer("Samsung")
            .with_lock("bootloader_lock");
        let plan = planner().create_plan(&analysis).unwrap();

        assert_eq!(plan.strategy, Strategy::BootloaderAccess);
        assert!(!plan.steps.is_empty());
        assert_eq!(plan.risk.brick_probability, 0.3);
        assert_eq!(plan.success_probability, 0.90);
        assert_eq!(plan.estimated_duration_secs, 540 + 60 * plan.steps.len() as u64);
    }

    #[test]
    fn test_fallbacks_ranked_and_capped() {
        let analysis = DeviceAnalysis::new("dev-1")
            .with_manufacturer("samsung")
            .with_lock("bootloader_lock");
        let fallbacks = planner().fallback_strategies(&analysis, Strategy::BootloaderAccess);

        // direct_bypass (0.8) first, then the first 0.5 entry in declaration order
        assert_eq!(
            fallbacks,
            vec![Strategy::DirectBypass, Strategy::VulnerabilityExploit]
        );
    }

    #[test]
    fn test_missing_manufacturer_strict() {
        let analysis = DeviceAnalysis::new("dev-1").with_lock("bootloader_lock");
        let err = planner().create_plan(&analysis).unwrap_err();
        assert!(matches!(err, MendError::InvalidAnalysis(_)));
    }

    #[test]
    fn test_missing_manufacturer_lenient() {
        let config = PlannerConfig {
            strict_analysis: false,
            ..Default::default()
        };
        let planner = StrategyPlanner::new(&config).unwrap();
        let analysis = DeviceAnalysis::new("dev-1").with_lock("bootloader_lock");

        let plan = planner.create_plan(&analysis).unwrap();
        assert_eq!(plan.strategy, Strategy::DirectBypass);
        assert_eq!(plan.success_probability, 0.5);
    }

    #[test]
    fn test_missing_device_id_always_rejected() {
        let config = PlannerConfig {
            strict_analysis: false,
            ..Default::default()
        };
        let planner = StrategyPlanner::new(&config).unwrap();
        let analysis = DeviceAnalysis::new("  ").with_manufacturer("google");

        assert!(matches!(
            planner.create_plan(&analysis),
            Err(MendError::InvalidAnalysis(_))
        ));
    }

    #[test]
    fn test_alternatives_exclude_primary() {
        let analysis = DeviceAnalysis::new("dev-1")
            .with_manufacturer("google")
            .with_lock("frp_lock");
        let alternatives = planner()
            .alternatives(&analysis, Strategy::VulnerabilityExploit)
            .unwrap();

        assert_eq!(alternatives.len(), 2);
        assert_eq!(alternatives[0].strategy, Strategy::DirectBypass);
        assert_eq!(alternatives[0].success_probability, 0.75);
        assert!(alternatives
            .iter()
            .all(|a| a.strategy != Strategy::VulnerabilityExploit && !a.steps.is_empty()));
    }
}
