// crates/gencli/src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use gencore::{ExecutionEvent, Graph, NodeKind, NodeSpec, Status};
use genruntime::{GenEngine, RunReport, RunnerRegistry, RuntimeConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "genflow")]
#[command(about = "Run content-generation graphs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a graph file
    Run {
        /// Path to graph JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// How to run the graph
        #[arg(short, long, value_enum, default_value_t = Mode::Dag)]
        mode: Mode,

        /// Node to run with `--mode selected`
        #[arg(short, long)]
        node: Option<String>,

        /// Concurrent nodes for `--mode dag` (1-8)
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Engine config JSON file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Kinds sent to the HTTP runner instead of the mock one (comma separated)
        #[arg(long, value_delimiter = ',')]
        remote: Vec<NodeKind>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a graph file
    Validate {
        /// Path to graph JSON file
        file: PathBuf,
    },

    /// List node kinds and their runners
    Kinds,

    /// Create an example graph
    Init {
        /// Output file path
        #[arg(short, long, default_value = "graph.json")]
        output: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Dag,
    All,
    Selected,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            mode,
            node,
            concurrency,
            config,
            remote,
            verbose,
        } => {
            init_logging(verbose);
            let config = match config {
                Some(path) => RuntimeConfig::from_file(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => RuntimeConfig::default(),
            };
            run_graph(file, mode, node, concurrency, config, &remote).await?;
        }

        Commands::Validate { file } => {
            validate_graph(&file)?;
        }

        Commands::Kinds => {
            list_kinds();
        }

        Commands::Init { output } => {
            create_example_graph(&output)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();
}

fn load_graph(file: &Path) -> Result<Graph> {
    let graph_json = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let graph: Graph = serde_json::from_str(&graph_json).with_context(|| format!("parsing {}", file.display()))?;
    Ok(graph)
}

fn default_registry(remote: &[NodeKind]) -> RunnerRegistry {
    let mut registry = RunnerRegistry::new();
    genrunners::register_all(&mut registry);
    genrunners::register_remote(&mut registry, remote);
    registry
}

async fn run_graph(
    file: PathBuf,
    mode: Mode,
    node: Option<String>,
    concurrency: Option<usize>,
    config: RuntimeConfig,
    remote: &[NodeKind],
) -> Result<()> {
    println!("🚀 Loading graph from: {}", file.display());
    let graph = load_graph(&file)?;
    println!("📋 Graph: {}", graph.name.as_deref().unwrap_or("(unnamed)"));
    println!("   Nodes: {}", graph.nodes.len());
    println!("   Edges: {}", graph.edges.len());
    println!();

    let engine = Arc::new(GenEngine::with_config(default_registry(remote), config));
    engine.load_graph(graph)?;

    // Subscribe to events for real-time output
    let mut events = engine.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(event);
        }
    });

    let canceller = engine.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("🛑 Cancel requested, waiting for running nodes to stop");
            canceller.cancel_all();
        }
    });

    let report = match mode {
        Mode::Dag => {
            let concurrency = concurrency.unwrap_or(engine.config().default_concurrency);
            engine.run_dag(concurrency).await?
        }
        Mode::All => engine.run_all().await?,
        Mode::Selected => {
            let Some(id) = node else {
                bail!("--mode selected requires --node <ID>");
            };
            engine.run_selected(&id).await?
        }
    };

    // Wait for events to finish printing
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    print_summary(&engine, &report);
    Ok(())
}

fn print_event(event: ExecutionEvent) {
    match event {
        ExecutionEvent::RunStarted { mode, nodes, .. } => {
            println!("▶️  {} run started ({} nodes)", mode, nodes);
        }
        ExecutionEvent::NodeStatus { node_id, to, .. } => match to {
            Status::Running => println!("  ⚡ Starting node: {}", node_id),
            Status::Success => println!("  ✅ Node {} succeeded", node_id),
            Status::Error => println!("  ❌ Node {} failed", node_id),
            Status::Canceled => println!("  🛑 Node {} canceled", node_id),
            _ => {}
        },
        ExecutionEvent::NodeLog { node_id, line, .. } => {
            println!("     ℹ️  [{}] {}", node_id, line);
        }
        ExecutionEvent::NodeProgress { node_id, percent, .. } => {
            println!("     📊 [{}] {}%", node_id, percent);
        }
        ExecutionEvent::NodeSample { .. } => {}
        ExecutionEvent::RunCompleted {
            succeeded,
            failed,
            canceled,
            duration_ms,
            ..
        } => {
            println!(
                "✨ Run finished in {}ms: {} succeeded, {} failed, {} canceled",
                duration_ms, succeeded, failed, canceled
            );
        }
    }
}

fn print_summary(engine: &GenEngine, report: &RunReport) {
    println!();
    println!("📊 Execution Summary:");
    println!("   Run ID: {}", report.run_id);
    println!("   Mode: {}", report.mode);

    let graph = engine.graph();
    for node in &graph.nodes {
        let Some(state) = engine.node_state(&node.id) else {
            continue;
        };
        println!(
            "   {} [{}] {} ({} result(s))",
            node.display_name(),
            node.kind,
            state.status,
            state.results.len()
        );
        if let Some(error) = &state.last_error {
            println!("     reason: {}", error);
        }
        if let Some(output) = state.last_result.as_ref().and_then(|r| r.output("output")) {
            println!("     output: {}", output);
        }
    }
}

fn validate_graph(file: &Path) -> Result<()> {
    println!("🔍 Validating graph: {}", file.display());

    let graph = load_graph(file)?;
    let index = graph.dependency_index()?;
    default_registry(&[]).ensure_covers(&graph)?;

    println!("✅ Graph is valid:");
    println!("   Name: {}", graph.name.as_deref().unwrap_or("(unnamed)"));
    println!("   Nodes: {}", graph.nodes.len());
    println!("   Edges: {}", graph.edges.len());

    let cycles = index.cycles();
    if !cycles.is_empty() {
        println!("⚠️  {} cycle(s) found; these nodes will end in error:", cycles.len());
        for cycle in cycles {
            println!("   • {}", cycle.join(" ↔ "));
        }
    }

    Ok(())
}

fn list_kinds() {
    println!("📦 Available Node Kinds:");
    println!();

    let registry = default_registry(&[]);
    for kind in registry.list_kinds() {
        if let Some((runner, metadata)) = registry.get_metadata(kind) {
            println!("  • {} → {} ({})", kind, runner, metadata.category);
            println!("    {}", metadata.description);
            for port in metadata.inputs {
                println!("    in  {}: {}", port.name, port.description);
            }
            for port in metadata.outputs {
                println!("    out {}: {}", port.name, port.description);
            }
        }
    }
}

fn create_example_graph(output: &Path) -> Result<()> {
    let mut graph = Graph::new();
    graph.name = Some("Product launch kit".to_string());

    let script = graph.add_node(
        NodeSpec::with_id("script", NodeKind::Text)
            .with_name("Launch script")
            .with_prompt("Write a 30 second launch script for a reusable coffee cup")
            .with_samples(3),
    );
    let cover = graph.add_node(
        NodeSpec::with_id("cover", NodeKind::Image)
            .with_name("Cover art")
            .with_prompt("Minimal product shot, warm light")
            .with_samples(2),
    );
    let voice = graph.add_node(
        NodeSpec::with_id("voice", NodeKind::Speech)
            .with_name("Narration")
            .with_prompt("Friendly narrator voice"),
    );
    let teaser = graph.add_node(
        NodeSpec::with_id("teaser", NodeKind::Video)
            .with_name("Teaser")
            .with_prompt("Slow pan across the product"),
    );

    graph.connect(script.clone(), "output", cover.clone(), "context");
    graph.connect(script, "output", voice, "context");
    graph.connect(cover, "output", teaser, "context");

    let json = serde_json::to_string_pretty(&graph)?;
    std::fs::write(output, json)?;

    println!("✨ Created example graph: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  genflow run --file {} --concurrency 2", output.display());

    Ok(())
}
