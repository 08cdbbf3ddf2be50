mod config;
mod logging;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use flowforge_core::{Graph, analyze, detect_defects, validate_graph};
use flowforge_engine::{PipelineError, WorkflowPipeline};
use flowforge_llm::{BuildMode, GraphBuilder, LlmClient, PlanSource, ResponseCache};
use serde::Serialize;
use tracing::info;

use crate::config::Settings;

#[derive(Parser)]
#[command(
    name = "flowforge",
    version,
    about = "Build, wire and repair n8n workflows from natural-language prompts"
)]
struct Cli {
    /// Path to a TOML config file (defaults to ./flowforge.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for the JSON trace log
    #[arg(long, global = true, default_value = "logs")]
    log_dir: PathBuf,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a workflow from a prompt and create it in the store
    Build {
        prompt: String,
        /// interpret | exact
        #[arg(long)]
        mode: Option<BuildMode>,
        /// Rewrite the prompt with the oracle first
        #[arg(long)]
        enhance: bool,
        /// Fail instead of attaching orphan nodes
        #[arg(long)]
        strict: bool,
        /// Spread nodes out by depth
        #[arg(long)]
        relayout: bool,
        /// Print the graph without touching the store
        #[arg(long)]
        dry_run: bool,
        /// Activate the workflow after creating it
        #[arg(long)]
        activate: bool,
    },
    /// Infer missing connections on a stored workflow
    Connect {
        id: String,
        /// rules | oracle
        #[arg(long, default_value = "rules")]
        source: PlanSource,
    },
    /// Detect and fix parameter defects on a stored workflow
    Repair {
        id: String,
        /// rules | oracle
        #[arg(long, default_value = "rules")]
        source: PlanSource,
    },
    /// Apply a natural-language change to a stored workflow
    Modify { id: String, request: String },
    /// Analyze a workflow JSON file offline
    Analyze { file: PathBuf },
    /// Activate (or with --off, deactivate) a stored workflow
    Activate {
        id: String,
        #[arg(long)]
        off: bool,
    },
    /// Delete a stored workflow
    Delete { id: String },
    /// List stored workflows
    List,
    /// Check that the store is reachable with the configured credentials
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init(&cli.log_dir)?;
    let mut settings = config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Build {
            prompt,
            mode,
            enhance,
            strict,
            relayout,
            dry_run,
            activate,
        } => {
            let build = &mut settings.build;
            if let Some(mode) = mode {
                build.mode = mode;
            }
            build.enhance |= enhance;
            build.relayout |= relayout;
            if strict {
                build.inference.sweep_orphans = false;
            }
            if dry_run {
                return dry_run_build(&settings, &prompt, cli.json).await;
            }

            let mode = settings.build.mode;
            let pipeline = pipeline(&settings);
            let deployment = pipeline
                .deploy_from_prompt(&prompt, mode)
                .await
                .map_err(staged)?;
            if activate {
                pipeline
                    .activate(&deployment.workflow_id)
                    .await
                    .map_err(staged)?;
            }
            if cli.json {
                return print_json(&deployment);
            }
            println!(
                "Created workflow {} '{}' ({} nodes, {} connections)",
                deployment.workflow_id,
                deployment.graph.name,
                deployment.graph.nodes.len(),
                deployment.graph.connections.edge_count()
            );
            for edge in &deployment.audit.inferred_edges {
                println!("  + {} -> {} ({})", edge.source, edge.target, edge.reason);
            }
            for repair in &deployment.audit.repairs {
                println!("  ~ {}.{}: {}", repair.node_id, repair.field, repair.reason);
            }
            for warning in &deployment.audit.warnings {
                println!("  ! {}", warning);
            }
        }
        Command::Connect { id, source } => {
            let report = pipeline(&settings)
                .auto_connect(&id, source)
                .await
                .map_err(staged)?;
            if cli.json {
                return print_json(&report);
            }
            println!(
                "Connected {}/{} nodes (was {}), {} new connections ({} from the oracle)",
                report.connected_after,
                report.total_nodes,
                report.connected_before,
                report.inferred.len(),
                report.oracle_edges
            );
            for edge in &report.inferred {
                println!("  + {} -> {} ({})", edge.source, edge.target, edge.reason);
            }
            for warning in &report.warnings {
                println!("  ! {}", warning);
            }
        }
        Command::Repair { id, source } => {
            let report = pipeline(&settings)
                .auto_repair(&id, source)
                .await
                .map_err(staged)?;
            if cli.json {
                return print_json(&report);
            }
            println!(
                "{} defects, {} repairs ({} from the oracle), {} remaining",
                report.defects.len(),
                report.actions.len(),
                report.oracle_actions,
                report.remaining.len()
            );
            for action in &report.actions {
                println!(
                    "  ~ {}.{} = {}: {}",
                    action.node_id, action.field, action.proposed_value, action.reason
                );
            }
            for warning in &report.warnings {
                println!("  ! {}", warning);
            }
        }
        Command::Modify { id, request } => {
            let report = pipeline(&settings)
                .modify(&id, &request)
                .await
                .map_err(staged)?;
            if cli.json {
                return print_json(&report);
            }
            println!(
                "Applied {}/{} changes: {}",
                report.applied,
                report.proposed,
                report.summary.as_deref().unwrap_or("(no summary)")
            );
            for warning in &report.warnings {
                println!("  ! {}", warning);
            }
        }
        Command::Analyze { file } => analyze_file(&file, cli.json)?,
        Command::Activate { id, off } => {
            let pipeline = pipeline(&settings);
            let graph = if off {
                pipeline.deactivate(&id).await
            } else {
                pipeline.activate(&id).await
            }
            .map_err(staged)?;
            println!(
                "Workflow {} is {}",
                id,
                if graph.active { "active" } else { "inactive" }
            );
        }
        Command::Delete { id } => {
            pipeline(&settings).delete(&id).await.map_err(staged)?;
            println!("Deleted workflow {}", id);
        }
        Command::List => {
            let workflows = pipeline(&settings).list().await.map_err(staged)?;
            if cli.json {
                return print_json(&workflows);
            }
            for workflow in workflows {
                println!(
                    "{}\t{}\t{}",
                    workflow.id,
                    if workflow.active { "active" } else { "-" },
                    workflow.name
                );
            }
        }
        Command::Health => {
            let url = settings.store.api_url.clone();
            if !pipeline(&settings).health_check().await {
                anyhow::bail!("Workflow store at {} is not reachable", url);
            }
            println!("Workflow store at {} is reachable", url);
        }
    }

    Ok(())
}

fn pipeline(settings: &Settings) -> WorkflowPipeline {
    let pipeline = WorkflowPipeline::new(settings.llm.clone(), settings.store.clone())
        .with_options(settings.build.clone());
    match settings.cache_ttl {
        Some(ttl) => pipeline.with_cache(ResponseCache::new(ttl)),
        None => pipeline,
    }
}

fn staged(error: PipelineError) -> anyhow::Error {
    anyhow!("{} stage failed: {}", error.stage(), error)
}

async fn dry_run_build(settings: &Settings, prompt: &str, json: bool) -> Result<()> {
    let oracle = LlmClient::new(settings.llm.clone());
    let enhancer = LlmClient::new(settings.llm.for_enhancement());
    let output = GraphBuilder::new(&oracle, settings.build.clone())
        .with_enhancer(&enhancer)
        .build(prompt)
        .await
        .map_err(|e| staged(e.into()))?;
    info!("Dry run, nothing written to the store");

    if json {
        return print_json(&output.graph);
    }
    println!("{}", analyze(&output.graph).report(&output.graph));
    for warning in &output.audit.warnings {
        println!("  ! {}", warning);
    }
    Ok(())
}

#[derive(Serialize)]
struct FileAnalysis<'a> {
    name: &'a str,
    nodes: usize,
    connected: &'a [String],
    unconnected: &'a [String],
    defects: Vec<flowforge_core::Defect>,
    validation_error: Option<String>,
}

fn analyze_file(path: &Path, json: bool) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read workflow: {}", path.display()))?;
    let graph: Graph = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse workflow: {}", path.display()))?;

    let analysis = analyze(&graph);
    let defects = detect_defects(&graph);
    let validation_error = validate_graph(&graph).err().map(|e| e.to_string());

    if json {
        return print_json(&FileAnalysis {
            name: &graph.name,
            nodes: graph.nodes.len(),
            connected: &analysis.connected_node_ids,
            unconnected: &analysis.unconnected_node_ids,
            defects,
            validation_error,
        });
    }

    println!("{}", analysis.report(&graph));
    for defect in &defects {
        println!(
            "  defect {} on '{}': {}",
            defect.kind,
            defect.node_name,
            defect.kind.message()
        );
    }
    match validation_error {
        Some(error) => println!("  invalid: {}", error),
        None => println!("  valid"),
    }
    Ok(())
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
