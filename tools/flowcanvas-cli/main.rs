use clap::{Parser, Subcommand};
use flowcanvas::prelude::*;
use itertools::Itertools;
use std::fs;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Projects workflow definitions onto a canvas graph and reconciles edited graphs
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Project a workflow definition to its node/edge graph
    Graph {
        /// Path to the workflow definition JSON file
        definition_path: String,
        /// Path to a context JSON file (agents, connected connectors, webhook base URL)
        #[arg(short, long)]
        context: Option<String>,
        /// Path to a layout configuration JSON file
        #[arg(short, long)]
        layout: Option<String>,
        /// Write the graph here instead of stdout
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Rebuild a workflow definition from an edited graph
    Reconcile {
        /// Path to the edited graph JSON file
        graph_path: String,
        /// Path to the definition the graph was projected from
        previous_path: String,
        /// Write the definition even when the graph has structural issues
        #[arg(long)]
        allow_issues: bool,
        /// Write the definition here instead of stdout
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Report the status of every step and all structural issues
    Check {
        /// Path to the workflow definition JSON file
        definition_path: String,
        /// Path to a context JSON file
        #[arg(short, long)]
        context: Option<String>,
    },
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Graph {
            definition_path,
            context,
            layout,
            output,
        } => run_graph(&definition_path, context.as_deref(), layout.as_deref(), output.as_deref()),
        Command::Reconcile {
            graph_path,
            previous_path,
            allow_issues,
            output,
        } => run_reconcile(&graph_path, &previous_path, allow_issues, output.as_deref()),
        Command::Check {
            definition_path,
            context,
        } => run_check(&definition_path, context.as_deref()),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("FLOWCANVAS_LOG")
        .unwrap_or_else(|_| EnvFilter::new("flowcanvas=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_definition(path: &str) -> WorkflowDefinition {
    WorkflowDefinition::from_file(path).unwrap_or_else(|e| {
        exit_with_error(&format!("Failed to load workflow from '{}': {}", path, e))
    })
}

fn load_context(path: Option<&str>) -> GraphContext {
    match path {
        Some(path) => GraphContext::from_file(path).unwrap_or_else(|e| {
            exit_with_error(&format!("Failed to load context from '{}': {}", path, e))
        }),
        None => GraphContext::default(),
    }
}

fn load_layout(path: Option<&str>) -> LayoutConfig {
    let Some(path) = path else {
        return LayoutConfig::default();
    };
    let json = fs::read_to_string(path).unwrap_or_else(|e| {
        exit_with_error(&format!("Failed to read layout file '{}': {}", path, e))
    });
    serde_json::from_str(&json)
        .unwrap_or_else(|e| exit_with_error(&format!("Failed to parse layout JSON: {}", e)))
}

fn write_output(json: &str, output: Option<&str>) {
    match output {
        Some(path) => {
            fs::write(path, json).unwrap_or_else(|e| {
                exit_with_error(&format!("Failed to write '{}': {}", path, e))
            });
            eprintln!("-> Wrote '{}'", path);
        }
        None => println!("{}", json),
    }
}

fn print_issues(issues: &[StructuralIssue]) {
    for issue in issues {
        eprintln!("  -> {}", issue);
    }
}

fn run_graph(
    definition_path: &str,
    context_path: Option<&str>,
    layout_path: Option<&str>,
    output: Option<&str>,
) {
    let definition = load_definition(definition_path);
    let context = load_context(context_path);
    let layout = load_layout(layout_path);

    let start = Instant::now();
    let graph = GraphProjector::builder(&definition, &context)
        .with_layout(layout)
        .build()
        .project();
    let duration = start.elapsed();

    eprintln!(
        "Projected '{}': {} nodes, {} edges in {:?}",
        definition.id,
        graph.nodes.len(),
        graph.edges.len(),
        duration
    );
    if !graph.is_clean() {
        eprintln!("{} structural issue(s):", graph.issues.len());
        print_issues(&graph.issues);
    }

    let json = serde_json::to_string_pretty(&graph)
        .unwrap_or_else(|e| exit_with_error(&format!("Failed to serialize graph: {}", e)));
    write_output(&json, output);
}

fn run_reconcile(graph_path: &str, previous_path: &str, allow_issues: bool, output: Option<&str>) {
    let previous = load_definition(previous_path);
    let graph_json = fs::read_to_string(graph_path).unwrap_or_else(|e| {
        exit_with_error(&format!("Failed to read graph file '{}': {}", graph_path, e))
    });
    let graph: CanvasGraph = serde_json::from_str(&graph_json)
        .unwrap_or_else(|e| exit_with_error(&format!("Failed to parse graph JSON: {}", e)));

    let definition = match from_graph(&graph, &previous) {
        Ok(definition) => definition,
        Err(err) => {
            eprintln!("{}:", err);
            print_issues(err.issues());
            if !allow_issues {
                exit_with_error("Refusing to write a definition with structural issues (use --allow-issues)");
            }
            err.into_definition()
        }
    };

    let json = definition
        .to_json_pretty()
        .unwrap_or_else(|e| exit_with_error(&format!("Failed to serialize definition: {}", e)));
    write_output(&json, output);
}

fn run_check(definition_path: &str, context_path: Option<&str>) {
    let definition = load_definition(definition_path);
    let context = load_context(context_path);
    let graph = to_graph(&definition, &context);

    println!("--- Workflow '{}' ---", definition.id);
    for node in graph.step_nodes() {
        println!("{:<24} {:<18} {:?}", node.id, node.renderer, node.data.status);
        for reason in &node.data.issues {
            println!("    - {}", reason);
        }
    }

    let counts = graph
        .step_nodes()
        .map(|n| n.data.status)
        .counts();
    println!("\n--- Summary ---");
    for status in [NodeStatus::Ready, NodeStatus::Draft, NodeStatus::Warning, NodeStatus::Error] {
        println!("{:<8} {}", format!("{:?}:", status), counts.get(&status).copied().unwrap_or(0));
    }

    if !graph.is_clean() {
        println!("\n{} structural issue(s):", graph.issues.len());
        for issue in &graph.issues {
            println!("  -> {}", issue);
        }
        std::process::exit(2);
    }
}

fn exit_with_error(message: &str) -> ! {
    eprintln!("\nError: {}", message);
    std::process::exit(1);
}
