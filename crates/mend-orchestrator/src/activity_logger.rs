//! Activity Logger - Human-readable plan run log in `.mend/activity.md`
//!
//! Records, for each plan run:
//! - The chosen strategy, risk, and step list
//! - Every attempt, retries included
//! - Recovery decisions
//! - The final status and any alternatives offered

use chrono::Utc;
use mend_core::fail_open::fail_open;
use mend_core::{Alternative, AttemptRecord, Plan, PlanExecutionReport};
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::recovery::HealingResult;

/// Activity logger for plan runs
pub struct ActivityLogger {
    output_path: PathBuf,
}

impl ActivityLogger {
    /// Create a logger writing to `activity.md` inside `mend_dir`
    pub fn new(mend_dir: PathBuf) -> Self {
        Self {
            output_path: mend_dir.join("activity.md"),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.output_path
    }

    /// Log the start of a plan run
    ///
    /// This operation is fail-open - logging failures won't affect the run
    pub async fn log_plan_start(&self, plan: &Plan) {
        fail_open("activity_logger::log_plan_start", || async {
            let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");

            let mut content = format!(
                "## Plan {} ({})\n\
                **Device**: {}\n\
                **Started**: {}\n\
                **Success probability**: {:.2}\n\
                **Brick risk**: {:.2}\n\n\
                **Steps**:\n",
                plan.id,
                plan.strategy,
                plan.device_id,
                timestamp,
                plan.success_probability,
                plan.risk.brick_probability,
            );
            for (i, step) in plan.steps.iter().enumerate() {
                content.push_str(&format!("{}. {}\n", i + 1, step.step_type));
            }
            content.push('\n');

            self.append_internal(&content).await
        })
        .await;
    }

    /// Log one step attempt
    ///
    /// This operation is fail-open - logging failures won't affect the run
    pub async fn log_attempt(&self, record: &AttemptRecord) {
        fail_open("activity_logger::log_attempt", || async {
            let result = &record.result;
            let outcome = match &result.error {
                None => "PASS".to_string(),
                Some(error) => format!("FAIL {}", error),
            };
            let retry = if record.is_retry() { " (retry)" } else { "" };

            let content = format!(
                "- Step {} `{}`{}: {} [{} ms, {}]\n",
                record.step_index + 1,
                result.step_type,
                retry,
                outcome,
                result.duration_ms,
                result.worker_id.as_deref().unwrap_or("no worker"),
            );

            self.append_internal(&content).await
        })
        .await;
    }

    /// Log a recovery decision
    ///
    /// This operation is fail-open - logging failures won't affect the run
    pub async fn log_recovery(&self, step_index: usize, healing: &HealingResult) {
        fail_open("activity_logger::log_recovery", || async {
            let method = healing
                .plan
                .method
                .map(|m| m.as_str())
                .unwrap_or("none");

            let mut content = format!(
                "  - Recovery for step {}: {} (confidence {:.2}) -> {}\n",
                step_index + 1,
                method,
                healing.plan.confidence,
                if healing.outcome.recovered {
                    "recovered"
                } else {
                    "not recovered"
                },
            );
            for suggestion in &healing.plan.manual_suggestions {
                content.push_str(&format!("    - Suggestion: {}\n", suggestion));
            }

            self.append_internal(&content).await
        })
        .await;
    }

    /// Log the end of a plan run
    ///
    /// This operation is fail-open - logging failures won't affect the run
    pub async fn log_plan_complete(
        &self,
        report: &PlanExecutionReport,
        alternatives: &[Alternative],
    ) {
        fail_open("activity_logger::log_plan_complete", || async {
            let icon = if report.overall_success { "✓" } else { "✗" };

            let mut content = format!(
                "\n**Status**: {} {}\n\
                **Attempts**: {} ({} retries)\n",
                icon,
                report.final_status,
                report.step_results.len(),
                report.retry_count(),
            );

            if !alternatives.is_empty() {
                content.push_str("**Alternatives**:\n");
                for alt in alternatives {
                    content.push_str(&format!(
                        "- {} (p={:.2}, risk {})\n",
                        alt.strategy, alt.success_probability, alt.risk_level
                    ));
                }
            }
            content.push_str("\n---\n\n");

            self.append_internal(&content).await
        })
        .await;
    }

    /// Append content to the activity log (internal, returns Result for fail_open)
    async fn append_internal(&self, content: &str) -> mend_core::Result<()> {
        if let Some(parent) = self.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output_path)
            .await?;

        file.write_all(content.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }
}
