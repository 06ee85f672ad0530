//! Mend CLI - plan orchestration over a simulated device transport
//!
//! Usage:
//!   mend init                         Write a default .mend/config.toml
//!   mend plan <analysis.json>         Show the plan for a device analysis
//!   mend run <analysis.json>          Plan and execute
//!   mend alternatives <analysis.json> Rank fallbacks to a failed strategy
//!   mend status                       Show workers and recovery methods

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mend_core::{DeviceAnalysis, ErrorInfo, ErrorKind, MendConfig, Plan, Strategy};
use mend_metrics::MetricsCollector;
use mend_orchestrator::{
    method_families, ActivityLogger, ExecutionOutcome, Orchestrator, RuntimeContext,
};
use mend_workers::SimulatedTransport;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "mend")]
#[command(author, version, about = "Device remediation plan orchestration")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration
    Init {
        /// Project path (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Show the plan for a device analysis
    Plan {
        /// Device analysis JSON file
        analysis: PathBuf,

        /// Print the full plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Plan and execute against the simulated transport
    Run {
        /// Device analysis JSON file
        analysis: PathBuf,

        /// Fail the next execution of a step type (step_type=kind:message)
        #[arg(long, value_parser = parse_fault)]
        fault: Vec<(String, ErrorInfo)>,

        /// Fail every execution of a step type (step_type=kind:message)
        #[arg(long, value_parser = parse_fault)]
        persistent_fault: Vec<(String, ErrorInfo)>,

        /// Simulated latency per transport call
        #[arg(long, default_value = "0")]
        latency_ms: u64,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rank fallback strategies for an analysis
    Alternatives {
        /// Device analysis JSON file
        analysis: PathBuf,

        /// Strategy that failed (defaults to the planned strategy)
        #[arg(long)]
        excluding: Option<Strategy>,
    },

    /// Show workers, recovery methods, and configuration
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init { path } => cmd_init(path),
        Commands::Plan { analysis, json } => cmd_plan(analysis, json).await,
        Commands::Run {
            analysis,
            fault,
            persistent_fault,
            latency_ms,
            json,
        } => cmd_run(analysis, fault, persistent_fault, latency_ms, json).await,
        Commands::Alternatives {
            analysis,
            excluding,
        } => cmd_alternatives(analysis, excluding).await,
        Commands::Status => cmd_status().await,
    }
}

fn cmd_init(path: PathBuf) -> Result<()> {
    info!("Initializing Mend in {:?}", path);

    MendConfig::write_default(&path).context("Failed to write default config")?;

    println!("Initialized Mend in {:?}", path);
    println!("Created:");
    println!("  .mend/config.toml");
    Ok(())
}

async fn cmd_plan(analysis: PathBuf, json: bool) -> Result<()> {
    let config = load_config()?;
    let orchestrator = build_orchestrator(&config, SimulatedTransport::new(), None)?.0;
    let analysis = load_analysis(&analysis).await?;

    let plan = orchestrator.create_plan(&analysis)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print_plan(&plan);
    }
    Ok(())
}

async fn cmd_run(
    analysis: PathBuf,
    faults: Vec<(String, ErrorInfo)>,
    persistent_faults: Vec<(String, ErrorInfo)>,
    latency_ms: u64,
    json: bool,
) -> Result<()> {
    let config = load_config()?;
    let analysis = load_analysis(&analysis).await?;

    let mut transport = SimulatedTransport::new().with_latency(Duration::from_millis(latency_ms));
    for (step_type, error) in faults {
        transport = transport.with_fault(&step_type, error);
    }
    for (step_type, error) in persistent_faults {
        transport = transport.with_persistent_fault(&step_type, error);
    }

    let activity_dir = config
        .telemetry
        .activity_log
        .then(|| PathBuf::from(".mend"));
    let (orchestrator, metrics) = build_orchestrator(&config, transport, activity_dir)?;

    let plan = orchestrator.create_plan(&analysis)?;
    if !json {
        print_plan(&plan);
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping before the next step");
            on_interrupt.cancel();
        }
    });

    let outcome = orchestrator.execute_plan(&plan, &analysis, cancel).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
        let summary = metrics.global_summary();
        println!(
            "\nTelemetry: {} attempts, {} failed, {} retries, {} incidents",
            summary.step_attempts, summary.failed_attempts, summary.retries, summary.incidents
        );
    }
    Ok(())
}

async fn cmd_alternatives(analysis: PathBuf, excluding: Option<Strategy>) -> Result<()> {
    let config = load_config()?;
    let orchestrator = build_orchestrator(&config, SimulatedTransport::new(), None)?.0;
    let analysis = load_analysis(&analysis).await?;

    let excluding = match excluding {
        Some(strategy) => strategy,
        None => orchestrator.create_plan(&analysis)?.strategy,
    };
    let alternatives = orchestrator.alternatives(&analysis, excluding)?;

    println!("Alternatives to {}", excluding);
    println!("=================");
    if alternatives.is_empty() {
        println!("  (none)");
    }
    for (rank, alt) in alternatives.iter().enumerate() {
        println!(
            "  {}. {} - p={:.2}, risk {}, {} steps",
            rank + 1,
            alt.strategy,
            alt.success_probability,
            alt.risk_level,
            alt.steps.len()
        );
    }
    Ok(())
}

async fn cmd_status() -> Result<()> {
    let config = load_config()?;
    let orchestrator = build_orchestrator(&config, SimulatedTransport::new(), None)?.0;
    let status = orchestrator.status().await;

    println!("Mend Status");
    println!("===========");

    println!("\nWorkers: {}", status.workers.len());
    for worker in &status.workers {
        println!(
            "  - {} [{:?}] {}",
            worker.id,
            worker.state,
            worker.capabilities.join(", ")
        );
    }

    println!(
        "\nRecovery: {} ({} methods)",
        if status.recovery.enabled {
            "enabled"
        } else {
            "disabled"
        },
        status.recovery.methods_loaded
    );
    for (family, methods) in method_families() {
        let names: Vec<&str> = methods.iter().map(|m| m.as_str()).collect();
        println!("  {}: {}", family, names.join(", "));
    }

    println!(
        "\nDispatcher: {:?}, step deadline {}s",
        config.dispatcher.busy_policy, config.dispatcher.step_timeout_secs
    );
    println!(
        "Planner: strict={}, max fallbacks {}",
        config.planner.strict_analysis, config.planner.max_fallbacks
    );
    Ok(())
}

fn load_config() -> Result<MendConfig> {
    MendConfig::load_or_default(Path::new(".")).context("Failed to load .mend/config.toml")
}

async fn load_analysis(path: &Path) -> Result<DeviceAnalysis> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read analysis file {:?}", path))?;
    serde_json::from_str(&content).context("Failed to parse device analysis JSON")
}

fn build_orchestrator(
    config: &MendConfig,
    transport: SimulatedTransport,
    activity_dir: Option<PathBuf>,
) -> Result<(Orchestrator, Arc<MetricsCollector>)> {
    let metrics = Arc::new(MetricsCollector::new(config.telemetry.feed_capacity));
    let context = RuntimeContext::standard(config, Arc::new(transport), metrics.clone())?;

    let mut orchestrator = Orchestrator::new(context);
    if let Some(dir) = activity_dir {
        orchestrator = orchestrator.with_activity_log(ActivityLogger::new(dir));
    }
    Ok((orchestrator, metrics))
}

fn print_plan(plan: &Plan) {
    println!("Plan {} for {}", plan.id, plan.device_id);
    println!("  Strategy: {}", plan.strategy);
    println!("  Success probability: {:.2}", plan.success_probability);
    println!(
        "  Risk: brick {:.2}, data loss {:.2}",
        plan.risk.brick_probability, plan.risk.data_loss_probability
    );
    println!("  Estimated duration: {}s", plan.estimated_duration_secs);
    println!("  Steps:");
    for (i, step) in plan.steps.iter().enumerate() {
        println!("    {}. {}", i + 1, step.step_type);
    }
    let fallbacks: Vec<String> = plan
        .fallback_strategies
        .iter()
        .map(|s| s.to_string())
        .collect();
    println!("  Fallbacks: {}", fallbacks.join(", "));
    for recommendation in &plan.risk.recommendations {
        println!("  * {}", recommendation);
    }
}

fn print_outcome(outcome: &ExecutionOutcome) {
    let report = &outcome.report;

    println!("\nAttempts:");
    for record in &report.step_results {
        let status = match &record.result.error {
            None => "ok".to_string(),
            Some(error) => error.to_string(),
        };
        println!(
            "  step {} attempt {} {}: {}",
            record.step_index + 1,
            record.attempt,
            record.result.step_type,
            status
        );
    }

    println!("\nResult: {}", report.final_status);
    if !outcome.alternatives.is_empty() {
        println!("Alternatives:");
        for alt in &outcome.alternatives {
            println!(
                "  - {} (p={:.2}, risk {})",
                alt.strategy, alt.success_probability, alt.risk_level
            );
        }
    }
}

/// Parse `step_type=kind:message`
fn parse_fault(s: &str) -> std::result::Result<(String, ErrorInfo), String> {
    let (step_type, rest) = s
        .split_once('=')
        .ok_or_else(|| format!("expected step_type=kind:message, got '{}'", s))?;
    let (kind, message) = rest.split_once(':').unwrap_or((rest, "injected fault"));

    let kind = match kind.trim().to_lowercase().as_str() {
        "transport" => ErrorKind::Transport,
        "permission" => ErrorKind::Permission,
        "timeout" => ErrorKind::Timeout,
        "security" => ErrorKind::Security,
        "other" => ErrorKind::Other,
        other => return Err(format!("unknown fault kind '{}'", other)),
    };
    if step_type.trim().is_empty() {
        return Err("fault step type is empty".to_string());
    }

    Ok((
        step_type.trim().to_string(),
        ErrorInfo::new(kind, message.trim()),
    ))
}
