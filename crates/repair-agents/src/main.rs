//! Dry-run a repair scenario and print the session export.
//!
//! ```bash
//! repair-agents --scenario demos/fd_leak.toml
//! RUST_LOG=debug repair-agents --scenario demos/deadlock.toml --config orchestrator.toml
//! repair-agents --schema
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use repair_agents::Scenario;
use repair_coordination::{Orchestrator, OrchestratorConfig, SessionExport};
use tracing::{debug, info, warn};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Scenario file describing the defect and the scripted agents
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Orchestrator config file (used when the scenario has no [orchestrator] section)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Iteration ceiling (overrides the scenario and REPAIR_MAX_ITERATIONS)
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Print the JSON schema of the session export and exit
    #[arg(long, default_value_t = false)]
    schema: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if args.schema {
        println!(
            "{}",
            serde_json::to_string_pretty(&SessionExport::json_schema())?
        );
        return Ok(());
    }

    let Some(path) = args.scenario else {
        bail!("--scenario is required unless --schema is given");
    };
    let scenario = Scenario::from_path(&path)
        .with_context(|| format!("loading scenario {}", path.display()))?;

    let base = match &args.config {
        Some(config) => OrchestratorConfig::from_path(config)
            .with_context(|| format!("loading config {}", config.display()))?,
        None => OrchestratorConfig::default(),
    };
    let config = scenario.config_or(base);
    let max_iterations = args.max_iterations.or(scenario.max_iterations);

    info!(
        scenario = %scenario.name,
        defect = %scenario.defect.id,
        agents = scenario.agents.len(),
        max_iterations = max_iterations.unwrap_or(config.max_iterations),
        "Running scenario"
    );

    let registry = scenario.registry();
    for role in registry.missing_roles() {
        warn!(role = %role, "No agents for role; the session will escalate when it gets there");
    }

    let orchestrator = Orchestrator::new(config, registry);
    let mut events = orchestrator.bus().subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            debug!(event = event.event_type(), session_id = %event.session_id(), "Event");
            if event.is_terminal() {
                break;
            }
        }
    });

    let record = orchestrator
        .run_session(scenario.defect.to_reference(), max_iterations)
        .await
        .context("running session")?;
    drop(orchestrator);
    let _ = printer.await;

    info!(summary = %record.summary(), "Scenario finished");
    println!("{}", serde_json::to_string_pretty(&record.export())?);
    Ok(())
}
