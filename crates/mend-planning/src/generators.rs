//! Per-strategy step generation
//!
//! Each [`Strategy`] maps to exactly one [`StrategyProfile`]. The match in
//! [`profile`] is exhaustive, so adding a strategy without a generator does
//! not compile.

use mend_core::{DeviceAnalysis, LockKind, RiskLevel, Step, Strategy};
use serde_json::Value;

/// Builds the ordered steps for a strategy
pub type StepGenerator = fn(&DeviceAnalysis) -> Vec<Step>;

/// Static facts attached to a strategy
#[derive(Clone, Copy)]
pub struct StrategyProfile {
    pub generator: StepGenerator,
    /// Fixed setup cost before any step runs
    pub base_duration_secs: u64,
    pub risk_level: RiskLevel,
}

/// Allowance added to the estimate for each step
pub const PER_STEP_SECS: u64 = 60;

pub fn profile(strategy: Strategy) -> StrategyProfile {
    match strategy {
        Strategy::DirectBypass => StrategyProfile {
            generator: direct_bypass_steps,
            base_duration_secs: 300,
            risk_level: RiskLevel::Low,
        },
        Strategy::VulnerabilityExploit => StrategyProfile {
            generator: vulnerability_steps,
            base_duration_secs: 600,
            risk_level: RiskLevel::High,
        },
        Strategy::RecoveryMode => StrategyProfile {
            generator: recovery_mode_steps,
            base_duration_secs: 420,
            risk_level: RiskLevel::Medium,
        },
        Strategy::BootloaderAccess => StrategyProfile {
            generator: bootloader_steps,
            base_duration_secs: 540,
            risk_level: RiskLevel::High,
        },
        Strategy::CustomTool => StrategyProfile {
            generator: custom_tool_steps,
            base_duration_secs: 900,
            risk_level: RiskLevel::Medium,
        },
        Strategy::Combination => StrategyProfile {
            generator: combination_steps,
            base_duration_secs: 1200,
            risk_level: RiskLevel::High,
        },
    }
}

/// Ordered steps for `strategy`, highest priority first
pub fn generate_steps(strategy: Strategy, analysis: &DeviceAnalysis) -> Vec<Step> {
    let steps = (profile(strategy).generator)(analysis);
    prioritize(steps)
}

fn prioritize(steps: Vec<Step>) -> Vec<Step> {
    let total = steps.len() as i32;
    steps
        .into_iter()
        .enumerate()
        .map(|(i, step)| step.with_priority(total - i as i32))
        .collect()
}

fn handshake() -> Step {
    Step::new("usb_communication")
        .with_param("action", "handshake")
        .with_param("protocol", "adb")
}

fn lock_list(analysis: &DeviceAnalysis) -> Value {
    Value::from(
        analysis
            .locks
            .iter()
            .map(|l| l.as_str().to_string())
            .collect::<Vec<_>>(),
    )
}

fn exploit_id(analysis: &DeviceAnalysis) -> String {
    analysis
        .security
        .known_vulnerabilities
        .first()
        .cloned()
        .unwrap_or_else(|| "auto".to_string())
}

fn direct_bypass_steps(analysis: &DeviceAnalysis) -> Vec<Step> {
    vec![
        handshake(),
        Step::new("pattern_analysis").with_param("target", "lock_screen"),
        Step::new("security_bypass")
            .with_param("method", Strategy::DirectBypass.as_str())
            .with_param("locks", lock_list(analysis)),
    ]
}

fn vulnerability_steps(analysis: &DeviceAnalysis) -> Vec<Step> {
    let mut probe = Step::new("pattern_analysis").with_param("target", "security_patch");
    if let Some(level) = &analysis.security.patch_level {
        probe = probe.with_param("patch_level", level.clone());
    }

    vec![
        handshake(),
        probe,
        Step::new("vulnerability_exploit").with_param("exploit_id", exploit_id(analysis)),
        Step::new("security_bypass")
            .with_param("method", Strategy::VulnerabilityExploit.as_str())
            .with_param("locks", lock_list(analysis)),
    ]
}

fn recovery_mode_steps(analysis: &DeviceAnalysis) -> Vec<Step> {
    vec![
        Step::new("usb_communication")
            .with_param("action", "reboot_recovery")
            .with_param("protocol", "adb"),
        Step::new("pattern_analysis").with_param("target", "recovery_menu"),
        Step::new("security_bypass")
            .with_param("method", Strategy::RecoveryMode.as_str())
            .with_param("locks", lock_list(analysis)),
    ]
}

// Bootloader access must precede exploit delivery.
fn bootloader_steps(analysis: &DeviceAnalysis) -> Vec<Step> {
    vec![
        Step::new("usb_communication")
            .with_param("action", "reboot_bootloader")
            .with_param("protocol", "fastboot"),
        Step::new("usb_communication")
            .with_param("action", "bootloader_unlock")
            .with_param("protocol", "fastboot"),
        Step::new("vulnerability_exploit").with_param("exploit_id", exploit_id(analysis)),
        Step::new("security_bypass")
            .with_param("method", Strategy::BootloaderAccess.as_str())
            .with_param("locks", lock_list(analysis)),
    ]
}

fn custom_tool_steps(analysis: &DeviceAnalysis) -> Vec<Step> {
    let tool = format!(
        "{}_account_tool",
        analysis.manufacturer_key().unwrap_or_else(|| "generic".to_string())
    );

    vec![
        handshake(),
        Step::new("pattern_analysis").with_param("target", "account_lock"),
        Step::new("security_bypass")
            .with_param("method", Strategy::CustomTool.as_str())
            .with_param("tool", tool),
    ]
}

fn combination_steps(analysis: &DeviceAnalysis) -> Vec<Step> {
    let mut steps = vec![handshake()];
    for lock in &analysis.locks {
        if *lock == LockKind::Bootloader {
            steps.push(
                Step::new("usb_communication")
                    .with_param("action", "bootloader_unlock")
                    .with_param("protocol", "fastboot"),
            );
        } else {
            steps.push(
                Step::new("security_bypass")
                    .with_param("method", Strategy::Combination.as_str())
                    .with_param("lock", lock.as_str().to_string()),
            );
        }
    }
    steps.push(Step::new("pattern_analysis").with_param("target", "verification"));
    steps
}
