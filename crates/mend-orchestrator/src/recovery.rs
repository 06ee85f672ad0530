//! Recovery classifier, executor, and incident history
//!
//! When a step fails the orchestrator hands the error to the
//! [`RecoveryManager`], which:
//! - Records an [`Incident`] regardless of what happens next
//! - Classifies the error into a [`RecoveryPlan`]
//! - Applies the chosen corrective action through the transport
//!
//! A recovery that itself errors is recorded and treated as "cannot
//! recover". It never triggers a second recovery.

use mend_core::{ErrorInfo, ErrorKind, Incident, MendError, Result};
use mend_workers::Transport;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Number of incidents reported by [`RecoveryManager::status`]
const RECENT_INCIDENTS: usize = 5;

/// Corrective action applied before the single retry of a failed step
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMethod {
    UsbConnectionReset,
    DriverReinstallation,
    CommunicationRetry,
    AlternativeUnlockMethod,
    GenericRetry,
}

impl RecoveryMethod {
    pub const ALL: [RecoveryMethod; 5] = [
        Self::UsbConnectionReset,
        Self::DriverReinstallation,
        Self::CommunicationRetry,
        Self::AlternativeUnlockMethod,
        Self::GenericRetry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UsbConnectionReset => "usb_connection_reset",
            Self::DriverReinstallation => "driver_reinstallation",
            Self::CommunicationRetry => "communication_retry",
            Self::AlternativeUnlockMethod => "alternative_unlock_method",
            Self::GenericRetry => "generic_retry",
        }
    }

    /// Problem family this method addresses
    pub fn family(&self) -> &'static str {
        match self {
            Self::UsbConnectionReset | Self::DriverReinstallation => "usb_issues",
            Self::CommunicationRetry => "communication_issues",
            Self::AlternativeUnlockMethod => "security_issues",
            Self::GenericRetry => "general_issues",
        }
    }
}

impl std::fmt::Display for RecoveryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Methods grouped by the problem family they address
pub fn method_families() -> BTreeMap<&'static str, Vec<RecoveryMethod>> {
    let mut families: BTreeMap<&'static str, Vec<RecoveryMethod>> = BTreeMap::new();
    for method in RecoveryMethod::ALL {
        families.entry(method.family()).or_default().push(method);
    }
    families
}

/// Classifier verdict for one error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPlan {
    pub can_recover: bool,
    pub method: Option<RecoveryMethod>,
    pub confidence: f64,
    pub estimated_time: String,
    #[serde(default)]
    pub manual_suggestions: Vec<String>,
}

impl RecoveryPlan {
    pub fn recoverable(method: RecoveryMethod, confidence: f64, estimated_time: &str) -> Self {
        Self {
            can_recover: true,
            method: Some(method),
            confidence,
            estimated_time: estimated_time.to_string(),
            manual_suggestions: Vec::new(),
        }
    }

    pub fn unrecoverable(suggestions: Vec<String>) -> Self {
        Self {
            can_recover: false,
            method: None,
            confidence: 0.0,
            estimated_time: "Unknown".to_string(),
            manual_suggestions: suggestions,
        }
    }
}

/// Result of applying a recovery plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryOutcome {
    pub recovered: bool,
    pub method: Option<RecoveryMethod>,
    pub details: String,
}

/// Maps a step error to a recovery plan
pub trait Classifier: Send + Sync {
    fn classify(&self, error: &ErrorInfo) -> RecoveryPlan;
}

/// Ordered kind/substring rules. The first matching rule wins.
///
/// A typed error kind always decides the method; message text is only
/// consulted for `ErrorKind::Other`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleClassifier;

impl RuleClassifier {
    fn by_message(message: &str) -> RecoveryPlan {
        let text = message.to_lowercase();
        let mentions = |words: &[&str]| words.iter().any(|w| text.contains(w));

        if mentions(&["usb"]) {
            usb_reset()
        } else if mentions(&["driver", "permission"]) {
            driver_reinstall()
        } else if mentions(&["timeout", "connection"]) {
            communication_retry()
        } else if mentions(&["security", "lock"]) {
            alternative_unlock()
        } else {
            generic_retry()
        }
    }
}

impl Classifier for RuleClassifier {
    fn classify(&self, error: &ErrorInfo) -> RecoveryPlan {
        match error.kind {
            // A routing miss repeats identically on retry
            ErrorKind::NoWorkerAvailable => RecoveryPlan::unrecoverable(vec![format!(
                "Register a worker that handles '{}' steps",
                error.context
            )]),
            // Contention, not a device fault: never touch the shared channel
            ErrorKind::WorkerBusy => generic_retry(),
            ErrorKind::Transport => usb_reset(),
            ErrorKind::Permission => driver_reinstall(),
            ErrorKind::Timeout => communication_retry(),
            ErrorKind::Security => alternative_unlock(),
            ErrorKind::Other => Self::by_message(&error.message),
        }
    }
}

fn usb_reset() -> RecoveryPlan {
    RecoveryPlan::recoverable(RecoveryMethod::UsbConnectionReset, 0.85, "30 seconds")
}

fn driver_reinstall() -> RecoveryPlan {
    RecoveryPlan::recoverable(RecoveryMethod::DriverReinstallation, 0.75, "2 minutes")
}

fn communication_retry() -> RecoveryPlan {
    RecoveryPlan::recoverable(RecoveryMethod::CommunicationRetry, 0.90, "1 minute")
}

fn alternative_unlock() -> RecoveryPlan {
    RecoveryPlan::recoverable(RecoveryMethod::AlternativeUnlockMethod, 0.65, "5 minutes")
}

fn generic_retry() -> RecoveryPlan {
    let mut plan = RecoveryPlan::recoverable(RecoveryMethod::GenericRetry, 0.50, "1 minute");
    plan.manual_suggestions = vec![
        "Check device connection".to_string(),
        "Restart the application".to_string(),
        "Verify device compatibility".to_string(),
    ];
    plan
}

/// Applies recovery plans against the transport/driver layer
pub struct RecoveryExecutor {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl RecoveryExecutor {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Apply the plan's method
    ///
    /// Returns `RecoverySystemFailure` when the corrective action errors or
    /// exceeds the recovery deadline.
    pub async fn execute(&self, plan: &RecoveryPlan) -> Result<RecoveryOutcome> {
        let Some(method) = plan.method.filter(|_| plan.can_recover) else {
            return Ok(RecoveryOutcome {
                recovered: false,
                method: None,
                details: "No automatic recovery method available".to_string(),
            });
        };

        info!("Executing recovery method: {}", method);
        let pending = self.transport.remediate(method.as_str());
        let remediation = tokio::time::timeout(self.timeout, pending)
            .await
            .map_err(|_| {
                MendError::RecoverySystemFailure(format!(
                    "{} did not finish within {:?}",
                    method, self.timeout
                ))
            })?
            .map_err(|e| MendError::RecoverySystemFailure(format!("{}: {}", method, e)))?;

        Ok(RecoveryOutcome {
            recovered: remediation.cleared,
            method: Some(method),
            details: remediation.details,
        })
    }
}

/// Everything produced while handling one failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingResult {
    pub plan: RecoveryPlan,
    pub outcome: RecoveryOutcome,
    pub incident: Incident,
}

/// Snapshot of the incident history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingStatus {
    pub enabled: bool,
    pub methods_loaded: usize,
    pub incidents_handled: usize,
    pub resolved: usize,
    pub success_rate: f64,
    pub recent: Vec<Incident>,
}

/// Owns the classifier, the executor, and the incident history
pub struct RecoveryManager {
    classifier: Box<dyn Classifier>,
    executor: RecoveryExecutor,
    enabled: bool,
    incidents: RwLock<Vec<Incident>>,
}

impl RecoveryManager {
    pub fn new(executor: RecoveryExecutor) -> Self {
        Self {
            classifier: Box::new(RuleClassifier),
            executor,
            enabled: true,
            incidents: RwLock::new(Vec::new()),
        }
    }

    pub fn with_classifier(mut self, classifier: impl Classifier + 'static) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    /// When disabled, failures are still recorded but never recovered
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn classify(&self, error: &ErrorInfo) -> RecoveryPlan {
        self.classifier.classify(error)
    }

    /// Record, classify, and attempt recovery for one failure
    pub async fn handle_failure(&self, error: &ErrorInfo) -> HealingResult {
        let mut incident = Incident::from_error(error);
        let plan = self.classify(error);

        let outcome = if !self.enabled {
            RecoveryOutcome {
                recovered: false,
                method: None,
                details: "Automated recovery is disabled".to_string(),
            }
        } else {
            match self.executor.execute(&plan).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Recovery failed for {}: {}", error, e);
                    RecoveryOutcome {
                        recovered: false,
                        method: plan.method,
                        details: e.to_string(),
                    }
                }
            }
        };

        incident.resolved = outcome.recovered;
        incident.recovery_method = outcome.method.map(|m| m.as_str().to_string());
        if !outcome.recovered {
            warn!("Incident not resolved: {} ({})", error, outcome.details);
        }

        self.incidents.write().await.push(incident.clone());
        HealingResult {
            plan,
            outcome,
            incident,
        }
    }

    /// Record a failure that will not be recovered, such as a failed retry
    pub async fn record_unhandled(&self, error: &ErrorInfo) -> Incident {
        let incident = Incident::from_error(error);
        self.incidents.write().await.push(incident.clone());
        incident
    }

    pub async fn incidents(&self) -> Vec<Incident> {
        self.incidents.read().await.clone()
    }

    pub async fn status(&self) -> HealingStatus {
        let incidents = self.incidents.read().await;
        let resolved = incidents.iter().filter(|i| i.resolved).count();
        let skip = incidents.len().saturating_sub(RECENT_INCIDENTS);

        HealingStatus {
            enabled: self.enabled,
            methods_loaded: RecoveryMethod::ALL.len(),
            incidents_handled: incidents.len(),
            resolved,
            success_rate: resolved as f64 / incidents.len().max(1) as f64,
            recent: incidents.iter().skip(skip).cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_workers::SimulatedTransport;

    fn manager(transport: SimulatedTransport) -> RecoveryManager {
        RecoveryManager::new(RecoveryExecutor::new(
            Arc::new(transport),
            Duration::from_secs(5),
        ))
    }

    #[test]
    fn test_classification_by_kind() {
        let classifier = RuleClassifier;

        let plan = classifier.classify(&ErrorInfo::transport("pipe closed"));
        assert_eq!(plan.method, Some(RecoveryMethod::UsbConnectionReset));
        assert_eq!(plan.confidence, 0.85);

        let plan = classifier.classify(&ErrorInfo::permission("denied"));
        assert_eq!(plan.method, Some(RecoveryMethod::DriverReinstallation));
        assert_eq!(plan.estimated_time, "2 minutes");

        let plan = classifier.classify(&ErrorInfo::timeout("no answer"));
        assert_eq!(plan.method, Some(RecoveryMethod::CommunicationRetry));
        assert_eq!(plan.confidence, 0.90);

        let plan = classifier.classify(&ErrorInfo::security("refused"));
        assert_eq!(plan.method, Some(RecoveryMethod::AlternativeUnlockMethod));
        assert_eq!(plan.confidence, 0.65);
    }

    #[test]
    fn test_classification_by_message_is_ordered() {
        let classifier = RuleClassifier;

        // "USB" outranks "timeout"
        let plan = classifier.classify(&ErrorInfo::new(ErrorKind::Other, "USB read timeout"));
        assert_eq!(plan.method, Some(RecoveryMethod::UsbConnectionReset));

        let plan = classifier.classify(&ErrorInfo::new(ErrorKind::Other, "Connection dropped"));
        assert_eq!(plan.method, Some(RecoveryMethod::CommunicationRetry));

        let plan = classifier.classify(&ErrorInfo::new(ErrorKind::Other, "screen lock engaged"));
        assert_eq!(plan.method, Some(RecoveryMethod::AlternativeUnlockMethod));
    }

    #[test]
    fn test_kind_outranks_message_text() {
        let classifier = RuleClassifier;

        let plan = classifier.classify(
            &ErrorInfo::timeout("usb channel stalled").with_context("usb_communication"),
        );
        assert_eq!(plan.method, Some(RecoveryMethod::CommunicationRetry));
        assert_eq!(plan.confidence, 0.90);

        let plan = classifier.classify(&ErrorInfo::security("usb debugging disabled"));
        assert_eq!(plan.method, Some(RecoveryMethod::AlternativeUnlockMethod));
    }

    #[test]
    fn test_busy_worker_gets_generic_retry() {
        let plan = RuleClassifier.classify(&ErrorInfo::worker_busy("usb_communication_agent"));
        assert_eq!(plan.method, Some(RecoveryMethod::GenericRetry));
        assert_ne!(plan.method, Some(RecoveryMethod::UsbConnectionReset));
    }

    #[test]
    fn test_generic_branch_has_suggestions() {
        let plan = RuleClassifier.classify(&ErrorInfo::new(ErrorKind::Other, "unexpected reply"));
        assert!(plan.can_recover);
        assert_eq!(plan.method, Some(RecoveryMethod::GenericRetry));
        assert_eq!(plan.confidence, 0.50);
        assert_eq!(plan.manual_suggestions.len(), 3);
        assert_eq!(plan.manual_suggestions[0], "Check device connection");
    }

    #[test]
    fn test_no_worker_is_unrecoverable() {
        let plan = RuleClassifier.classify(&ErrorInfo::no_worker("usb_communication"));
        assert!(!plan.can_recover);
        assert!(plan.method.is_none());
        assert!(plan.manual_suggestions[0].contains("usb_communication"));
    }

    #[test]
    fn test_method_families() {
        let families = method_families();
        assert_eq!(
            families["usb_issues"],
            vec![
                RecoveryMethod::UsbConnectionReset,
                RecoveryMethod::DriverReinstallation
            ]
        );
        assert_eq!(families.values().map(Vec::len).sum::<usize>(), 5);
    }

    #[tokio::test]
    async fn test_handle_failure_resolves_incident() {
        let manager = manager(SimulatedTransport::new());

        let result = manager.handle_failure(&ErrorInfo::timeout("slow")).await;
        assert!(result.outcome.recovered);
        assert!(result.incident.resolved);
        assert_eq!(
            result.incident.recovery_method.as_deref(),
            Some("communication_retry")
        );

        let status = manager.status().await;
        assert_eq!(status.incidents_handled, 1);
        assert_eq!(status.success_rate, 1.0);
    }

    #[tokio::test]
    async fn test_broken_recovery_is_recorded_not_retried() {
        let transport = SimulatedTransport::new().with_broken_action("driver_reinstallation");
        let manager = manager(transport);

        let result = manager.handle_failure(&ErrorInfo::permission("denied")).await;
        assert!(!result.outcome.recovered);
        assert!(result.outcome.details.contains("Recovery system failure"));
        assert!(!result.incident.resolved);
        assert_eq!(manager.incidents().await.len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_manager_records_only() {
        let transport = Arc::new(SimulatedTransport::new());
        let manager = RecoveryManager::new(RecoveryExecutor::new(
            transport.clone(),
            Duration::from_secs(5),
        ))
        .with_enabled(false);

        let result = manager.handle_failure(&ErrorInfo::transport("gone")).await;
        assert!(!result.outcome.recovered);
        assert!(transport.remediations().await.is_empty());
        assert_eq!(manager.status().await.incidents_handled, 1);
    }

    #[tokio::test]
    async fn test_status_keeps_last_five() {
        let manager = manager(SimulatedTransport::new().with_uncleared_action("generic_retry"));
        for i in 0..7 {
            manager
                .handle_failure(&ErrorInfo::new(ErrorKind::Other, format!("fault {}", i)))
                .await;
        }

        let status = manager.status().await;
        assert_eq!(status.incidents_handled, 7);
        assert_eq!(status.resolved, 0);
        assert_eq!(status.recent.len(), 5);
        assert_eq!(status.recent[0].message, "fault 2");
    }
}
