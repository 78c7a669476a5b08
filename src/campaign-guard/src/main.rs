//! campaign-guard: autonomous budget guard for paid-advertising spend units.
//!
//! Loads configuration, wires the built-in collaborators and runs the
//! monitoring scheduler as a daemon or for a single cycle.

use anyhow::Context;
use campaign_core::collaborators::ApprovalGate;
use campaign_core::config::GuardConfig;
use campaign_core::ingest::RawMetrics;
use campaign_core::types::{MetricsSnapshot, UnitState};
use campaign_monitor::{
    FileMetricsSource, MonitoringScheduler, SimulatedExecutor, UnitEvaluator, UnitInput,
};
use campaign_optimizer::{DenyAllApprovals, FileApprovals};
use campaign_store::{JsonFileStore, PersistenceStore};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "campaign-guard")]
#[command(about = "Financial guard and budget optimizer for advertising spend units")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// State document path (overrides config)
    #[arg(long, global = true, env = "CAMPAIGN_GUARD__STORAGE__STATE_PATH")]
    state: Option<String>,

    /// Units to monitor, comma separated (overrides config)
    #[arg(long, global = true, value_delimiter = ',')]
    units: Option<Vec<String>>,

    /// Prometheus exporter port; enables the exporter
    #[arg(long, global = true)]
    metrics_port: Option<u16>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run monitoring cycles until interrupted
    Run,

    /// Run a single monitoring cycle and print its report
    Cycle,

    /// Print the dashboard summary of the persisted state
    Status,

    /// Evaluate one raw metrics record without executing or persisting anything
    Assess {
        /// Raw platform metrics record (JSON)
        snapshot: PathBuf,

        /// Unit id when the record does not carry one
        #[arg(long)]
        unit: Option<String>,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "campaign_guard=info,campaign_monitor=info,campaign_optimizer=info,campaign_store=info,campaign_risk=info"
            .into()
    });
    // stdout carries command output; logs go to stderr.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn start_metrics(config: &GuardConfig) -> anyhow::Result<()> {
    let addr = SocketAddr::new(
        config
            .metrics
            .host
            .parse()
            .with_context(|| format!("invalid metrics host {}", config.metrics.host))?,
        config.metrics.port,
    );
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    info!(%addr, "Metrics exporter started");
    Ok(())
}

fn approvals(config: &GuardConfig) -> Arc<dyn ApprovalGate> {
    match &config.approvals_path {
        Some(path) => {
            info!(path = %path, "large changes gated by approvals file");
            Arc::new(FileApprovals::new(path))
        }
        None => Arc::new(DenyAllApprovals),
    }
}

fn scheduler(config: GuardConfig) -> MonitoringScheduler {
    let source = Arc::new(FileMetricsSource::new(&config.source.metrics_dir));
    let executor = Arc::new(SimulatedExecutor::new());
    let store = Arc::new(JsonFileStore::from_config(&config.storage));
    let approvals = approvals(&config);
    MonitoringScheduler::new(config, source, executor, store, approvals)
}

async fn run(config: GuardConfig) -> anyhow::Result<()> {
    if config.metrics.enabled {
        if let Err(e) = start_metrics(&config) {
            error!(error = %e, "Failed to start metrics exporter");
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, finishing current cycle");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for interrupt");
                // Dropping the sender would stop the scheduler.
                std::future::pending::<()>().await;
            }
        }
    });

    let mut scheduler = scheduler(config);
    scheduler.run(shutdown_rx).await;
    Ok(())
}

async fn cycle(config: GuardConfig) -> anyhow::Result<()> {
    let mut scheduler = scheduler(config);
    let report = scheduler.run_cycle().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if let Some(e) = &report.persist_error {
        anyhow::bail!("cycle {} completed but state was not persisted: {e}", report.cycle);
    }
    Ok(())
}

fn status(config: &GuardConfig) -> anyhow::Result<()> {
    let store = JsonFileStore::from_config(&config.storage);
    let dashboard = store.load().dashboard();
    println!("{}", serde_json::to_string_pretty(&dashboard)?);
    Ok(())
}

fn assess(config: &GuardConfig, path: &Path, unit: Option<String>) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let record: RawMetrics = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a metrics record", path.display()))?;
    let unit_id = unit
        .or_else(|| record.unit_id.clone())
        .context("record has no unit id; pass --unit")?;

    let now = Utc::now();
    let snapshot = MetricsSnapshot::from_raw(&unit_id, &record, now)?;
    let evaluator = UnitEvaluator::new(config, Arc::new(DenyAllApprovals));
    let unit_state = UnitState::new(evaluator.initial_budget(&snapshot));
    let evaluation = evaluator.evaluate(
        UnitInput {
            snapshot,
            unit: unit_state,
            previous: None,
        },
        now,
    );

    let out = serde_json::json!({
        "snapshot": evaluation.snapshot,
        "financial": evaluation.financial,
        "risk": evaluation.assessment,
        "alerts": evaluation.alerts,
        "decision": evaluation.decision,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut config = match cli.config.as_deref() {
        Some(path) => GuardConfig::load(Some(path))
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => GuardConfig::load(None).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load config from environment, using defaults");
            GuardConfig::default()
        }),
    };

    if let Some(state) = cli.state {
        config.storage.state_path = state;
    }
    if let Some(units) = cli.units {
        config.monitoring.units = units;
    }
    if let Some(port) = cli.metrics_port {
        config.metrics.enabled = true;
        config.metrics.port = port;
    }
    config.validate()?;

    info!(
        node_id = %config.node_id,
        units = config.monitoring.units.len(),
        interval_secs = config.monitoring.monitoring_interval,
        state_path = %config.storage.state_path,
        "Configuration loaded"
    );

    match cli.command {
        Commands::Run => run(config).await,
        Commands::Cycle => cycle(config).await,
        Commands::Status => status(&config),
        Commands::Assess { snapshot, unit } => assess(&config, &snapshot, unit),
    }
}
