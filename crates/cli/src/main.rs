use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chunkflow_engine::simulation::{SinkHandles, Simulation, SimulationOptions, build_simulation};
use chunkflow_engine::{
    Checkpoint, CheckpointStore, ChunkPlanner, EngineConfig, JsonCheckpointStore, PassExecutor, RunReport, RunState, StepStatus,
    load_config, load_config_from_path, parse_pipeline_file,
};
use chunkflow_types::{ChunkStrategyKind, CoordinateBundle, PipelineDefinition};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Plan, simulate, and resume chunked pipeline runs.
#[derive(Parser, Debug)]
#[command(name = "chunkflow", version, about)]
struct Cli {
    /// Engine configuration file (defaults to $CHUNKFLOW_CONFIG_PATH or the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the coordinate schedule, one pass per line
    Plan {
        /// Pipeline document (YAML or JSON)
        file: PathBuf,
        /// round_robin or balanced; overrides the document and the configuration
        #[arg(long)]
        strategy: Option<ChunkStrategyKind>,
    },
    /// Run the pipeline against synthetic in-memory sources and sinks
    Simulate {
        file: PathBuf,
        #[arg(long)]
        strategy: Option<ChunkStrategyKind>,
        /// Write a JSON checkpoint after every pass into this directory
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,
        /// Inject a failure during the given pass
        #[arg(long)]
        fail_at_pass: Option<u64>,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Continue a failed run from its latest checkpoint
    Resume {
        file: PathBuf,
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,
        #[arg(long)]
        strategy: Option<ChunkStrategyKind>,
        #[arg(long)]
        json: bool,
    },
    /// List checkpoints stored in a directory
    Checkpoints {
        /// Checkpoint directory (defaults to the configured one)
        directory: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config_from_path(path)?,
        None => load_config()?,
    };

    match cli.command {
        Command::Plan { file, strategy } => run_plan(&config, &file, strategy),
        Command::Simulate {
            file,
            strategy,
            checkpoint_dir,
            fail_at_pass,
            json,
        } => run_simulate(&config, &file, strategy, checkpoint_dir, fail_at_pass, json),
        Command::Resume {
            file,
            checkpoint_dir,
            strategy,
            json,
        } => run_resume(&config, &file, strategy, checkpoint_dir, json),
        Command::Checkpoints { directory } => run_checkpoints(&config, directory),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_writer(std::io::stderr)
        .try_init();
}

/// `RUST_LOG` when set, `info` otherwise.
fn log_filter() -> EnvFilter {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    EnvFilter::new(filter)
}

/// Flag, then document, then configuration.
fn resolve_strategy(config: &EngineConfig, definition: &PipelineDefinition, flag: Option<ChunkStrategyKind>) -> ChunkStrategyKind {
    flag.or(definition.strategy).unwrap_or(config.strategy)
}

fn resolve_checkpoint_dir(config: &EngineConfig, flag: Option<PathBuf>) -> Option<PathBuf> {
    flag.or_else(|| {
        if config.checkpoint.enabled {
            config.checkpoint.directory.clone()
        } else {
            None
        }
    })
}

/// Where a simulated run keeps its checkpoints.
#[derive(Debug, PartialEq, Eq)]
enum CheckpointTarget {
    Directory(PathBuf),
    /// Enabled in configuration without a directory: only the planner's slot is filled.
    Memory,
    Disabled,
}

fn checkpoint_target(config: &EngineConfig, flag: Option<PathBuf>) -> CheckpointTarget {
    match resolve_checkpoint_dir(config, flag) {
        Some(directory) => CheckpointTarget::Directory(directory),
        None if config.checkpoint.enabled => CheckpointTarget::Memory,
        None => CheckpointTarget::Disabled,
    }
}

fn run_plan(config: &EngineConfig, file: &Path, strategy: Option<ChunkStrategyKind>) -> Result<()> {
    let definition = parse_pipeline_file(file)?;
    let strategy = resolve_strategy(config, &definition, strategy);
    let Simulation { steps, .. } = build_simulation(&definition, SimulationOptions::default())?;
    let planner = ChunkPlanner::new(&steps, strategy)?;

    println!(
        "{} ({}): {} passes",
        definition.pipeline,
        strategy,
        planner.pending_queue().len()
    );
    for (index, bundle) in planner.pending_queue().iter().enumerate() {
        println!("pass {:>4}: {}", index + 1, format_bundle(bundle));
    }
    Ok(())
}

fn run_simulate(
    config: &EngineConfig,
    file: &Path,
    strategy: Option<ChunkStrategyKind>,
    checkpoint_dir: Option<PathBuf>,
    fail_at_pass: Option<u64>,
    json: bool,
) -> Result<()> {
    let definition = parse_pipeline_file(file)?;
    let strategy = resolve_strategy(config, &definition, strategy);
    let Simulation { mut steps, sinks } = build_simulation(&definition, SimulationOptions { fail_at_pass })?;
    let mut planner = ChunkPlanner::new(&steps, strategy)?;

    let mut executor = PassExecutor::new();
    let target = checkpoint_target(config, checkpoint_dir);
    match &target {
        CheckpointTarget::Directory(directory) => {
            info!(directory = %directory.display(), "writing checkpoints");
            executor = executor.with_store(JsonCheckpointStore::new(directory));
        }
        CheckpointTarget::Memory => {
            warn!("checkpointing is enabled but no checkpoint directory is configured; checkpoints stay in memory");
            executor = executor.with_checkpointing(true);
        }
        CheckpointTarget::Disabled => {}
    }

    let mut run_state = RunState::new();
    let outcome = executor.run(&mut steps, &mut planner, &mut run_state);
    if let Some(report) = executor.report() {
        print_report(&definition, report, json)?;
    }
    print_sinks(&sinks);

    if let Err(error) = outcome {
        match &target {
            CheckpointTarget::Directory(directory) => warn!(
                "resume with: chunkflow resume {} --checkpoint-dir {}",
                file.display(),
                directory.display()
            ),
            CheckpointTarget::Memory | CheckpointTarget::Disabled => {
                warn!("no checkpoint directory configured; the run cannot be resumed")
            }
        }
        return Err(error).context(format!("pipeline '{}' failed", definition.pipeline));
    }
    Ok(())
}

fn run_resume(
    config: &EngineConfig,
    file: &Path,
    strategy: Option<ChunkStrategyKind>,
    checkpoint_dir: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let definition = parse_pipeline_file(file)?;
    let strategy = resolve_strategy(config, &definition, strategy);
    let directory = resolve_checkpoint_dir(config, checkpoint_dir).context("resume needs --checkpoint-dir or a configured checkpoint directory")?;

    let store = JsonCheckpointStore::new(&directory);
    let Some(checkpoint) = store.latest()? else {
        bail!("no checkpoints found in {}", directory.display());
    };
    info!(pass = checkpoint.pass, remaining = checkpoint.remaining_passes(), "resuming from checkpoint");

    let Simulation { mut steps, sinks } = build_simulation(&definition, SimulationOptions::default())?;
    let mut planner = ChunkPlanner::resume(&steps, strategy, checkpoint.parameter_index.clone())?;
    let mut run_state = checkpoint.run_state;
    let mut executor = PassExecutor::resuming(checkpoint.pass).with_store(store);

    let outcome = executor.run(&mut steps, &mut planner, &mut run_state);
    if let Some(report) = executor.report() {
        print_report(&definition, report, json)?;
    }
    println!("rows written since pass {}:", checkpoint.pass);
    print_sinks(&sinks);
    outcome.with_context(|| format!("resumed pipeline '{}' failed", definition.pipeline))?;
    Ok(())
}

fn run_checkpoints(config: &EngineConfig, directory: Option<PathBuf>) -> Result<()> {
    let directory = resolve_checkpoint_dir(config, directory).context("pass a checkpoint directory or configure one")?;
    let store = JsonCheckpointStore::new(&directory);
    let passes = store.passes()?;
    if passes.is_empty() {
        println!("No checkpoints in {}", directory.display());
        return Ok(());
    }

    for pass in passes {
        let Some(checkpoint) = store.load(pass)? else {
            continue;
        };
        println!("{}", format_checkpoint(&checkpoint));
    }
    Ok(())
}

fn format_bundle(bundle: &CoordinateBundle) -> String {
    if bundle.is_empty() {
        return "(no chunked sources)".to_string();
    }
    bundle
        .iter()
        .map(|(step_id, coordinate)| format!("{step_id}={coordinate}"))
        .collect::<Vec<_>>()
        .join("  ")
}

fn format_checkpoint(checkpoint: &Checkpoint) -> String {
    let metadata = checkpoint.run_state.metadata();
    format!(
        "pass {:>6}  saved {}  remaining {}  datasets {}  variables {}  rows {}",
        checkpoint.pass,
        checkpoint.saved_at.to_rfc3339(),
        checkpoint.remaining_passes(),
        metadata.dataset_count,
        metadata.variable_count,
        metadata.total_rows
    )
}

fn print_report(definition: &PipelineDefinition, report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!(
        "{}: {:?} after {} passes ({} succeeded, {} skipped, {} ignored)",
        definition.pipeline,
        report.status,
        report.pass_count(),
        report.count(StepStatus::Succeeded),
        report.count(StepStatus::Skipped),
        report.count(StepStatus::Ignored)
    );
    for pass in &report.passes {
        for outcome in &pass.outcomes {
            if let Some(message) = &outcome.message {
                println!("  pass {} {} {:?}: {message}", pass.pass, outcome.step_id, outcome.status);
            }
        }
    }
    Ok(())
}

fn print_sinks(sinks: &SinkHandles) {
    for (sink_id, destination) in sinks {
        match destination.lock() {
            Ok(table) => println!("  {sink_id}: {} rows", table.row_count()),
            Err(_) => println!("  {sink_id}: destination unavailable"),
        }
    }
}
