//! Risk assessment
//!
//! A pure function of manufacturer and lock set. Execution history never
//! feeds back into it.

use mend_core::{DeviceAnalysis, LockKind, RiskAssessment};

const BOOTLOADER_BRICK_PROBABILITY: f64 = 0.3;
const FRP_DATA_LOSS_PROBABILITY: f64 = 0.1;

pub fn assess(analysis: &DeviceAnalysis) -> RiskAssessment {
    let manufacturer = analysis.manufacturer_key();

    let brick_probability = if analysis.has_lock(&LockKind::Bootloader) {
        BOOTLOADER_BRICK_PROBABILITY
    } else {
        0.0
    };
    let data_loss_probability =
        if analysis.has_lock(&LockKind::Frp) && manufacturer.as_deref() == Some("samsung") {
            FRP_DATA_LOSS_PROBABILITY
        } else {
            0.0
        };

    let mut security_risks = Vec::new();
    let vulnerabilities = analysis.security.known_vulnerabilities.len();
    if vulnerabilities > 0 {
        security_risks.push(format!(
            "Device exposes {} known vulnerabilit{}",
            vulnerabilities,
            if vulnerabilities == 1 { "y" } else { "ies" }
        ));
    }
    if analysis.security.encryption_enabled == Some(false) {
        security_risks.push("Storage is not encrypted".to_string());
    }
    if analysis.has_lock(&LockKind::Bootloader) {
        security_risks.push("Unlocking the bootloader may trigger a factory reset".to_string());
    }

    let mut recommendations = Vec::new();
    if brick_probability > 0.0 {
        recommendations.push("Charge the device above 50% before starting".to_string());
    }
    if data_loss_probability > 0.0 {
        recommendations.push("Back up user data before starting".to_string());
    }
    recommendations.push("Keep the device connected for the whole run".to_string());

    RiskAssessment {
        data_loss_probability,
        brick_probability,
        warranty_void: true,
        security_risks,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootloader_brick_risk() {
        let analysis = DeviceAnalysis::new("d")
            .with_manufacturer("samsung")
            .with_lock("bootloader_lock");
        let risk = assess(&analysis);

        assert_eq!(risk.brick_probability, 0.3);
        assert_eq!(risk.data_loss_probability, 0.0);
        assert!(risk.warranty_void);
        assert_eq!(risk.recommendations.len(), 2);
    }

    #[test]
    fn test_frp_data_loss_only_for_samsung() {
        let samsung = DeviceAnalysis::new("d")
            .with_manufacturer("Samsung")
            .with_lock("frp_lock");
        let google = DeviceAnalysis::new("d")
            .with_manufacturer("google")
            .with_lock("frp_lock");

        assert_eq!(assess(&samsung).data_loss_probability, 0.1);
        assert_eq!(assess(&google).data_loss_probability, 0.0);
    }

    #[test]
    fn test_security_risks_listed() {
        let mut analysis = DeviceAnalysis::new("d")
            .with_manufacturer("apple")
            .with_vulnerability("CVE-1")
            .with_vulnerability("CVE-2");
        analysis.security.encryption_enabled = Some(false);

        let risk = assess(&analysis);
        assert_eq!(risk.security_risks.len(), 2);
        assert!(risk.security_risks[0].contains("2 known vulnerabilities"));
    }
}
