use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use wavegen::config::Config;
use wavegen::core::{plan_waves, Manifest, RunContext, Unit, UnitGraph};
use wavegen::memory::MemoryMonitor;
use wavegen::orchestration::{
    CommandWorker, JsonDirSink, MemorySink, OrchestratorConfig, OutputSink, ProcessingOptions,
    ProcessingOrchestrator,
};
use wavegen::validation::{validate_templates_before_processing, DefaultValidator};
use wavegen::Result;

/// wavegen - dependency-aware parallel template processing
#[derive(Parser, Debug)]
#[command(name = "wavegen")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    WAVEGEN_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.wavegen/wavegen.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run every unit of a manifest through a shell command
    Run {
        /// Path to the TOML manifest
        manifest: PathBuf,

        /// Shell command executed once per unit (payload JSON on stdin)
        #[arg(long, short = 'c')]
        command: String,

        /// Write one JSON file per unit into this directory
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Per-attempt timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Retries after the first failed attempt
        #[arg(long)]
        retries: Option<u32>,

        /// Worker pool size
        #[arg(long)]
        max_workers: Option<usize>,
    },

    /// Validate a manifest without running it
    Validate {
        manifest: PathBuf,
    },

    /// Print the wave plan of a manifest
    Plan {
        manifest: PathBuf,
    },

    /// Print a memory snapshot
    Snapshot,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    wavegen::log::init_with_debug(cli.debug);

    match cli.command {
        Command::Run {
            manifest,
            command,
            output,
            timeout_ms,
            retries,
            max_workers,
        } => run_manifest(manifest, command, output, timeout_ms, retries, max_workers),
        Command::Validate { manifest } => run_validate(manifest),
        Command::Plan { manifest } => run_plan(manifest),
        Command::Snapshot => run_snapshot(),
    }
}

fn load_units(path: &Path) -> Result<Vec<Unit>> {
    Ok(Manifest::load(path)?.into_units())
}

fn run_manifest(
    manifest: PathBuf,
    command: String,
    output: Option<PathBuf>,
    timeout_ms: Option<u64>,
    retries: Option<u32>,
    max_workers: Option<usize>,
) -> Result<()> {
    let config = Config::load()?;
    let units = load_units(&manifest)?;
    info!(manifest = %manifest.display(), units = units.len(), "Run command");

    let mut orchestrator_config = OrchestratorConfig::from(&config);
    if max_workers.is_some() {
        orchestrator_config.max_workers = max_workers;
    }

    let sink: Arc<dyn OutputSink> = match output {
        Some(dir) => Arc::new(JsonDirSink::new(dir)),
        None => Arc::new(MemorySink::new()),
    };

    let options = ProcessingOptions {
        timeout: timeout_ms.map(Duration::from_millis),
        retries,
    };

    // Create async runtime for the orchestrator
    let rt = tokio::runtime::Runtime::new()?;
    let summary = rt.block_on(async {
        let mut orchestrator =
            ProcessingOrchestrator::builder(Arc::new(CommandWorker::new(command)))
                .sink(sink)
                .monitor(MemoryMonitor::from_config(&config))
                .config(orchestrator_config)
                .build();

        let outcome = orchestrator
            .process_templates(&units, RunContext::new(), options)
            .await;
        if let Err(e) = orchestrator.cleanup().await {
            tracing::warn!(error = %e, "cleanup failed");
        }
        outcome
    })?;

    let json_output = serde_json::json!({
        "run_id": summary.run_id.to_string(),
        "status": summary.to_string(),
        "waves": summary.waves,
        "duration_ms": summary.duration_ms,
        "results": summary.results,
        "failures": summary.failures,
    });
    println!("{}", serde_json::to_string_pretty(&json_output)?);

    if summary.is_clean() {
        Ok(())
    } else {
        std::process::exit(2);
    }
}

fn run_validate(manifest: PathBuf) -> Result<()> {
    let units = load_units(&manifest)?;
    validate_templates_before_processing(&DefaultValidator::new(), &units)?;
    println!("{}: {} units valid", manifest.display(), units.len());
    Ok(())
}

fn run_plan(manifest: PathBuf) -> Result<()> {
    let units = load_units(&manifest)?;
    println!("{}", serde_json::to_string_pretty(&plan_report(&units))?);
    Ok(())
}

/// Waves plus the graph facts that explain them. `topological_order` is
/// null when the units are cyclic.
fn plan_report(units: &[Unit]) -> serde_json::Value {
    let plan = plan_waves(units);
    let graph = UnitGraph::from_units(units);

    let dependents: serde_json::Map<String, serde_json::Value> = units
        .iter()
        .map(|unit| (unit.name.clone(), serde_json::json!(graph.dependents_of(&unit.name))))
        .collect();
    let topological_order = if graph.is_acyclic() {
        graph.topological_order().ok()
    } else {
        None
    };

    serde_json::json!({
        "waves": plan
            .waves
            .iter()
            .map(|wave| wave.names())
            .collect::<Vec<_>>(),
        "wave_count": plan.wave_count(),
        "max_width": plan.max_width(),
        "forced_breaks": plan.forced_breaks,
        "acyclic": graph.is_acyclic(),
        "topological_order": topological_order,
        "dependents": dependents,
    })
}

fn run_snapshot() -> Result<()> {
    let config = Config::load()?;
    let monitor = MemoryMonitor::from_config(&config);
    println!("{}", serde_json::to_string_pretty(&monitor.create_snapshot())?);
    Ok(())
}
