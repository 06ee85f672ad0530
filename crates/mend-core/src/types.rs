//! Core type definitions for Mend plan orchestration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use uuid::Uuid;

/// Free-form key/value mapping carried by steps and step outcomes
pub type Parameters = BTreeMap<String, Value>;

/// A lock detected on the device by the external classifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LockKind {
    Bootloader,
    Frp,
    Cloud,
    Screen,
    Carrier,
    /// Any identifier the classifier reports that we have no rule for
    Other(String),
}

impl LockKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Bootloader => "bootloader_lock",
            Self::Frp => "frp_lock",
            Self::Cloud => "icloud_lock",
            Self::Screen => "screen_lock",
            Self::Carrier => "carrier_lock",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for LockKind {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "bootloader_lock" | "bootloader" => Self::Bootloader,
            "frp_lock" | "frp" => Self::Frp,
            "icloud_lock" | "cloud_lock" | "icloud" => Self::Cloud,
            "screen_lock" | "screen" => Self::Screen,
            "carrier_lock" | "carrier" => Self::Carrier,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for LockKind {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<LockKind> for String {
    fn from(lock: LockKind) -> Self {
        lock.as_str().to_string()
    }
}

impl std::fmt::Display for LockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Security posture reported alongside the lock set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityAssessment {
    #[serde(default)]
    pub patch_level: Option<String>,
    #[serde(default)]
    pub encryption_enabled: Option<bool>,
    #[serde(default)]
    pub known_vulnerabilities: Vec<String>,
}

/// Output of the external device classifier. Immutable once produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceAnalysis {
    pub device_id: String,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub locks: BTreeSet<LockKind>,
    #[serde(default)]
    pub security: SecurityAssessment,
}

impl DeviceAnalysis {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Default::default()
        }
    }

    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    pub fn with_lock(mut self, lock: impl Into<LockKind>) -> Self {
        self.locks.insert(lock.into());
        self
    }

    pub fn with_vulnerability(mut self, id: impl Into<String>) -> Self {
        self.security.known_vulnerabilities.push(id.into());
        self
    }

    /// Lowercased manufacturer, or `None` when absent or blank
    pub fn manufacturer_key(&self) -> Option<String> {
        self.manufacturer
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_lowercase)
    }

    pub fn has_lock(&self, lock: &LockKind) -> bool {
        self.locks.contains(lock)
    }
}

/// Top-level remediation approach
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    DirectBypass,
    VulnerabilityExploit,
    RecoveryMode,
    BootloaderAccess,
    CustomTool,
    Combination,
}

impl Strategy {
    /// Every strategy, in declaration order
    pub const ALL: [Strategy; 6] = [
        Self::DirectBypass,
        Self::VulnerabilityExploit,
        Self::RecoveryMode,
        Self::BootloaderAccess,
        Self::CustomTool,
        Self::Combination,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectBypass => "direct_bypass",
            Self::VulnerabilityExploit => "vulnerability_exploit",
            Self::RecoveryMode => "recovery_mode",
            Self::BootloaderAccess => "bootloader_access",
            Self::CustomTool => "custom_tool",
            Self::Combination => "combination",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s.to_lowercase().replace('-', "_"))
            .ok_or_else(|| format!("Invalid strategy: {}", s))
    }
}

/// One unit of work in a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub priority: i32,
}

impl Step {
    pub fn new(step_type: impl Into<String>) -> Self {
        Self {
            step_type: step_type.into(),
            parameters: Parameters::new(),
            priority: 0,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// String parameter lookup
    pub fn param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }
}

/// Coarse risk bucket for a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Risk profile of an attempt; depends only on manufacturer and locks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub data_loss_probability: f64,
    pub brick_probability: f64,
    pub warranty_void: bool,
    pub security_risks: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Ordered steps plus metadata for one remediation attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub device_id: String,
    pub strategy: Strategy,
    pub steps: Vec<Step>,
    pub fallback_strategies: Vec<Strategy>,
    pub risk: RiskAssessment,
    pub success_probability: f64,
    pub estimated_duration_secs: u64,
}

impl Plan {
    pub fn estimated_duration(&self) -> Duration {
        Duration::from_secs(self.estimated_duration_secs)
    }
}

/// A ranked fallback offered when a plan fails overall
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub strategy: Strategy,
    pub steps: Vec<Step>,
    pub success_probability: f64,
    pub risk_level: RiskLevel,
}

/// Failure categories surfaced by workers, the dispatcher, and recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Channel or connection to the device broke
    Transport,
    /// Host permissions or drivers are missing
    Permission,
    /// Deadline expired before the device answered
    Timeout,
    /// Device-side security refused the operation
    Security,
    /// No worker in the pool covers the step type
    NoWorkerAvailable,
    /// The selected worker was already running a step
    WorkerBusy,
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Transport => "transport",
            Self::Permission => "permission",
            Self::Timeout => "timeout",
            Self::Security => "security",
            Self::NoWorkerAvailable => "no_worker_available",
            Self::WorkerBusy => "worker_busy",
            Self::Other => "other",
        };
        write!(f, "{}", name)
    }
}

/// Structured description of a non-fatal failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default)]
    pub context: String,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: String::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permission, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn security(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Security, message)
    }

    pub fn no_worker(step_type: &str) -> Self {
        Self::new(
            ErrorKind::NoWorkerAvailable,
            format!("No worker available for step type: {}", step_type),
        )
        .with_context(step_type)
    }

    pub fn worker_busy(worker_id: &str) -> Self {
        Self::new(ErrorKind::WorkerBusy, "Worker is already running a step")
            .with_context(worker_id)
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Outcome of one step execution attempt. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_type: String,
    pub success: bool,
    #[serde(default)]
    pub payload: Parameters,
    #[serde(default)]
    pub error: Option<ErrorInfo>,
    #[serde(default)]
    pub worker_id: Option<String>,
    pub duration_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

impl StepResult {
    pub fn succeeded(
        step_type: impl Into<String>,
        worker_id: impl Into<String>,
        payload: Parameters,
        duration: Duration,
    ) -> Self {
        Self {
            step_type: step_type.into(),
            success: true,
            payload,
            error: None,
            worker_id: Some(worker_id.into()),
            duration_ms: duration.as_millis() as u64,
            recorded_at: Utc::now(),
        }
    }

    pub fn failed(
        step_type: impl Into<String>,
        worker_id: Option<String>,
        error: ErrorInfo,
        duration: Duration,
    ) -> Self {
        Self {
            step_type: step_type.into(),
            success: false,
            payload: Parameters::new(),
            error: Some(error),
            worker_id,
            duration_ms: duration.as_millis() as u64,
            recorded_at: Utc::now(),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// A step result tagged with its position in the plan and attempt number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub step_index: usize,
    /// 1 for the original attempt, 2 for the retry
    pub attempt: u32,
    pub result: StepResult,
}

impl AttemptRecord {
    pub fn is_retry(&self) -> bool {
        self.attempt > 1
    }
}

/// Terminal status of a plan run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    Unlocked,
    PartiallyLocked,
    Cancelled,
}

impl std::fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unlocked => write!(f, "unlocked"),
            Self::PartiallyLocked => write!(f, "partially_locked"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Terminal artifact of one orchestrator run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanExecutionReport {
    pub plan_id: Uuid,
    pub device_id: String,
    pub strategy: Strategy,
    /// Every attempt in execution order, retries included
    pub step_results: Vec<AttemptRecord>,
    pub overall_success: bool,
    pub final_status: FinalStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PlanExecutionReport {
    /// Last recorded attempt for each executed step, in step order
    pub fn final_attempts(&self) -> Vec<&AttemptRecord> {
        let mut latest: BTreeMap<usize, &AttemptRecord> = BTreeMap::new();
        for record in &self.step_results {
            latest.insert(record.step_index, record);
        }
        latest.into_values().collect()
    }

    /// Number of attempts recorded for a step
    pub fn attempts_for(&self, step_index: usize) -> usize {
        self.step_results
            .iter()
            .filter(|r| r.step_index == step_index)
            .count()
    }

    pub fn retry_count(&self) -> usize {
        self.step_results.iter().filter(|r| r.is_retry()).count()
    }
}

/// A recorded failure event, independent of recovery outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub timestamp: DateTime<Utc>,
    pub error_kind: ErrorKind,
    pub context: String,
    pub message: String,
    pub resolved: bool,
    #[serde(default)]
    pub recovery_method: Option<String>,
}

impl Incident {
    pub fn from_error(error: &ErrorInfo) -> Self {
        Self {
            timestamp: Utc::now(),
            error_kind: error.kind,
            context: error.context.clone(),
            message: error.message.clone(),
            resolved: false,
            recovery_method: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_kind_from_identifier() {
        assert_eq!(LockKind::from("bootloader_lock"), LockKind::Bootloader);
        assert_eq!(LockKind::from("FRP_LOCK"), LockKind::Frp);
        assert_eq!(LockKind::from("cloud_lock"), LockKind::Cloud);
        assert_eq!(LockKind::from("icloud_lock"), LockKind::Cloud);
        assert_eq!(
            LockKind::from("sim_pin"),
            LockKind::Other("sim_pin".to_string())
        );
    }

    #[test]
    fn test_analysis_deserializes_lock_strings() {
        let json = r#"{
            "device_id": "dev-1",
            "manufacturer": "Samsung",
            "locks": ["bootloader_lock", "frp_lock", "bootloader_lock"]
        }"#;
        let analysis: DeviceAnalysis = serde_json::from_str(json).unwrap();

        assert_eq!(analysis.manufacturer_key().as_deref(), Some("samsung"));
        assert_eq!(analysis.locks.len(), 2);
        assert!(analysis.has_lock(&LockKind::Bootloader));
        assert!(analysis.security.known_vulnerabilities.is_empty());

        let back = serde_json::to_value(&analysis).unwrap();
        assert_eq!(back["locks"][0], "bootloader_lock");
    }

    #[test]
    fn test_blank_manufacturer_is_missing() {
        let analysis = DeviceAnalysis::new("dev").with_manufacturer("   ");
        assert_eq!(analysis.manufacturer_key(), None);
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!(
            "bootloader_access".parse::<Strategy>().unwrap(),
            Strategy::BootloaderAccess
        );
        assert_eq!(
            "Custom-Tool".parse::<Strategy>().unwrap(),
            Strategy::CustomTool
        );
        assert!("teleport".parse::<Strategy>().is_err());
    }

    #[test]
    fn test_step_serializes_type_field() {
        let step = Step::new("usb_communication")
            .with_param("protocol", "adb")
            .with_priority(3);
        let value = serde_json::to_value(&step).unwrap();

        assert_eq!(value["type"], "usb_communication");
        assert_eq!(value["parameters"]["protocol"], "adb");
        assert_eq!(step.param("protocol"), Some("adb"));
    }

    #[test]
    fn test_report_final_attempts_prefers_retry() {
        let ok = StepResult::succeeded("a", "w", Parameters::new(), Duration::ZERO);
        let bad = StepResult::failed("a", None, ErrorInfo::timeout("late"), Duration::ZERO);
        let report = PlanExecutionReport {
            plan_id: Uuid::new_v4(),
            device_id: "dev".to_string(),
            strategy: Strategy::DirectBypass,
            step_results: vec![
                AttemptRecord {
                    step_index: 0,
                    attempt: 1,
                    result: bad,
                },
                AttemptRecord {
                    step_index: 0,
                    attempt: 2,
                    result: ok.clone(),
                },
                AttemptRecord {
                    step_index: 1,
                    attempt: 1,
                    result: ok,
                },
            ],
            overall_success: true,
            final_status: FinalStatus::Unlocked,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };

        let finals = report.final_attempts();
        assert_eq!(finals.len(), 2);
        assert_eq!(finals[0].attempt, 2);
        assert!(finals.iter().all(|r| r.result.success));
        assert_eq!(report.attempts_for(0), 2);
        assert_eq!(report.retry_count(), 1);
    }
}
