//! Corpusgraph CLI: plan and run the pipeline stages
//!
//! The graph is embedded; when `graph_snapshot` is configured it is loaded
//! before a run and saved after it, so a later run can pick up from the
//! stages that remain.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table};
use corpusgraph::graph::{GraphSnapshot, GraphStore};
use corpusgraph::pipeline::{ExecutionPlan, InputSource, PipelineParams, RunReport};
use corpusgraph::{
    EmbeddedGraph, GraphClient, LocalBlobStore, Orchestrator, PipelineConfig, RunConfig, SimpleStatistics, Stage,
};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "corpusgraph", version, about = "Graph-backed TF-IDF pipeline")]
struct Cli {
    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, clap::ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the enabled stages
    Run {
        /// Pipeline YAML file
        #[arg(long, short)]
        config: PathBuf,

        /// Run only these stages, ignoring the file's stage flags
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,
    },
    /// Show the execution plan without running anything
    Plan {
        /// Pipeline YAML file
        #[arg(long, short)]
        config: PathBuf,

        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,
    },
    /// List the stage catalogue and its dependencies
    Stages,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { config, only } => run_pipeline(&config, &only, &cli.format).await,
        Commands::Plan { config, only } => run_plan(&config, &only, &cli.format).await,
        Commands::Stages => {
            print_stages(&cli.format);
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Console logging filtered by `RUST_LOG` (default `info`), plus a plain
/// copy under `<log_dir>/<timestamp>/central.log` when configured
fn init_logging(log_dir: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = match log_dir {
        Some(dir) => {
            let run_dir = dir.join(chrono::Local::now().format("%Y%m%d_%H%M%S").to_string());
            fs::create_dir_all(&run_dir).with_context(|| format!("creating {}", run_dir.display()))?;
            let file = File::create(run_dir.join("central.log"))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

fn load_config(path: &Path, only: &[String]) -> Result<RunConfig> {
    let config = PipelineConfig::load(path)
        .with_context(|| format!("loading {}", path.display()))?
        .into_run_config()?;
    if only.is_empty() {
        return Ok(config);
    }
    let stages = only
        .iter()
        .map(|name| Stage::from_name(name).ok_or_else(|| anyhow!("unknown stage '{}'", name)))
        .collect::<Result<Vec<_>>>()?;
    Ok(config.with_only(stages)?)
}

fn open_graph(params: &PipelineParams) -> Result<EmbeddedGraph> {
    let store = match &params.graph_snapshot {
        Some(path) if path.is_file() => {
            let snapshot = GraphSnapshot::load(path).with_context(|| format!("reading {}", path.display()))?;
            let store = GraphStore::restore(snapshot)?;
            info!(
                nodes = store.node_count(),
                edges = store.edge_count(),
                snapshot = %path.display(),
                "Graph restored"
            );
            store
        }
        _ => GraphStore::new(),
    };
    Ok(EmbeddedGraph::with_store(Arc::new(RwLock::new(store))))
}

fn build_orchestrator(config: RunConfig, graph: &EmbeddedGraph) -> Orchestrator {
    let params = config.params();
    let client = GraphClient::new(Arc::new(graph.clone())).with_concurrency(params.concurrency);
    let blobs = Arc::new(LocalBlobStore::new(&params.blob_root));
    Orchestrator::new(config, client, blobs, Arc::new(SimpleStatistics::new()))
}

async fn run_pipeline(path: &Path, only: &[String], format: &OutputFormat) -> Result<()> {
    let config = load_config(path, only)?;
    init_logging(config.params().log_dir.as_deref())?;
    let snapshot = config.params().graph_snapshot.clone();

    let graph = open_graph(config.params())?;
    let orchestrator = build_orchestrator(config, &graph);

    let cancel = orchestrator.client().cancel_flag().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current batch");
            cancel.cancel();
        }
    });

    let result = orchestrator.run().await;

    // Merges are idempotent, so a partial graph is worth keeping
    if let Some(path) = snapshot {
        graph
            .store_read()
            .await
            .snapshot()
            .save(&path)
            .with_context(|| format!("saving {}", path.display()))?;
        info!(snapshot = %path.display(), "Graph saved");
    }

    print_report(&result?, format)
}

async fn run_plan(path: &Path, only: &[String], format: &OutputFormat) -> Result<()> {
    let config = load_config(path, only)?;
    init_logging(None)?;
    let graph = open_graph(config.params())?;
    let plan = build_orchestrator(config, &graph).plan().await?;
    print_plan(&plan, format)
}

fn print_plan(plan: &ExecutionPlan, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let stages: Vec<serde_json::Value> = plan
                .stages
                .iter()
                .map(|p| {
                    let inputs: Vec<serde_json::Value> = p
                        .inputs
                        .iter()
                        .map(|(artifact, source)| {
                            let from = match source {
                                InputSource::Upstream(stage) => stage.name().to_string(),
                                InputSource::Existing => "existing".to_string(),
                            };
                            serde_json::json!({"artifact": artifact.to_string(), "from": from})
                        })
                        .collect();
                    serde_json::json!({"stage": p.stage.name(), "inputs": inputs})
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&stages)?);
        }
        OutputFormat::Table => {
            if plan.stages.is_empty() {
                println!("(no stages enabled)");
                return Ok(());
            }
            let mut table = Table::new();
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["#", "Stage", "Inputs"]);
            for (index, planned) in plan.stages.iter().enumerate() {
                let inputs: Vec<String> = planned
                    .inputs
                    .iter()
                    .map(|(artifact, source)| match source {
                        InputSource::Upstream(stage) => format!("{} <- {}", artifact, stage),
                        InputSource::Existing => format!("{} (existing)", artifact),
                    })
                    .collect();
                table.add_row(vec![(index + 1).to_string(), planned.stage.name().to_string(), inputs.join("\n")]);
            }
            println!("{}", table);
        }
    }
    Ok(())
}

fn print_report(report: &RunReport, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let outcomes: Vec<serde_json::Value> = report
                .outcomes
                .iter()
                .map(|o| {
                    serde_json::json!({
                        "stage": o.stage.name(),
                        "elapsed_ms": o.elapsed.as_millis() as u64,
                        "outputs": o.outputs,
                        "metrics": o.metrics,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&outcomes)?);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["Stage", "Elapsed", "Outputs", "Metrics"]);
            for outcome in &report.outcomes {
                let metrics: Vec<String> = outcome.metrics.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                table.add_row(vec![
                    outcome.stage.name().to_string(),
                    format!("{:.2?}", outcome.elapsed),
                    outcome.outputs.len().to_string(),
                    metrics.join(" "),
                ]);
            }
            println!("{}", table);
            println!("{} stage(s) run", report.outcomes.len());
        }
    }
    Ok(())
}

fn print_stages(format: &OutputFormat) {
    let params = PipelineParams::default();
    let join = |artifacts: Vec<corpusgraph::pipeline::Artifact>| {
        artifacts.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
    };

    match format {
        OutputFormat::Json => {
            let stages: Vec<serde_json::Value> = Stage::ALL
                .iter()
                .map(|s| {
                    serde_json::json!({
                        "stage": s.name(),
                        "requires": join(s.requires(&params)),
                        "produces": join(s.produces()),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&stages).unwrap_or_default());
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["Stage", "Requires", "Produces"]);
            for stage in Stage::ALL {
                table.add_row(vec![
                    stage.name().to_string(),
                    join(stage.requires(&params)),
                    join(stage.produces()),
                ]);
            }
            println!("{}", table);
        }
    }
}
