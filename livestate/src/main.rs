//! Live execution state CLI.
//!
//! Validates and lays out workflow graph documents, replays execution traces
//! into render frames, and watches live executions over HTTP. Machine output
//! goes to stdout as JSON; diagnostics go to stderr via `RUST_LOG`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::warn;

use livestate::channel::TelemetryChannel;
use livestate::core::grouping::prune_groups;
use livestate::core::layout::{LayoutMode, layout};
use livestate::io::config::{LiveConfig, load_config};
use livestate::io::graph_store::{load_graph, write_graph};
use livestate::io::trace::load_trace;
use livestate::io::transport::HttpTransport;
use livestate::logging;
use livestate::view::{LiveView, attach};

#[derive(Parser)]
#[command(
    name = "livestate",
    version,
    about = "Live execution state and layout for workflow graphs"
)]
struct Cli {
    /// Config file. A missing file means built-in defaults.
    #[arg(long, global = true, default_value = "livestate.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a graph document against schema and invariants (unique ids, known endpoints, etc.).
    Validate {
        #[arg(long)]
        graph: PathBuf,
    },
    /// Compute node positions and print them as JSON.
    Layout {
        #[arg(long)]
        graph: PathBuf,
        /// horizontal, vertical, radial or hierarchical.
        #[arg(long, default_value = "hierarchical")]
        mode: LayoutMode,
        /// Write positions and recomputed groups back into the graph document.
        #[arg(short, long)]
        write: bool,
    },
    /// Replay a JSONL trace against a graph and print the resulting frame.
    Replay {
        #[arg(long)]
        graph: PathBuf,
        #[arg(long)]
        trace: PathBuf,
        /// Only accept events for this execution id.
        #[arg(long)]
        execution: Option<String>,
    },
    /// Stream a live execution, printing one frame per event (JSON lines).
    Watch {
        #[arg(long)]
        graph: PathBuf,
        #[arg(long)]
        execution: String,
        /// Base URL of the execution API.
        #[arg(long)]
        endpoint: String,
    },
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    match cli.command {
        Command::Validate { graph } => cmd_validate(&graph),
        Command::Layout { graph, mode, write } => cmd_layout(&config, &graph, mode, write),
        Command::Replay {
            graph,
            trace,
            execution,
        } => cmd_replay(&graph, &trace, execution.as_deref()),
        Command::Watch {
            graph,
            execution,
            endpoint,
        } => cmd_watch(&config, &graph, &execution, &endpoint),
    }
}

#[derive(Serialize)]
struct ValidateReport {
    nodes: usize,
    edges: usize,
    groups: usize,
}

fn cmd_validate(graph_path: &Path) -> Result<()> {
    let graph = load_graph(graph_path)?;
    print_json(&ValidateReport {
        nodes: graph.nodes.len(),
        edges: graph.edges.len(),
        groups: graph.groups.len(),
    })
}

fn cmd_layout(
    config: &LiveConfig,
    graph_path: &Path,
    mode: LayoutMode,
    write: bool,
) -> Result<()> {
    let mut graph = load_graph(graph_path)?;
    let positions = layout(&graph.nodes, &graph.edges, mode, &config.layout());
    if write {
        graph.apply_positions(&positions);
        graph.groups = prune_groups(&graph.groups, &positions, &config.grouping());
        write_graph(graph_path, &graph)?;
    }
    print_json(&positions)
}

fn cmd_replay(graph_path: &Path, trace_path: &Path, execution: Option<&str>) -> Result<()> {
    let mut view = LiveView::new(load_graph(graph_path)?);
    if let Some(execution_id) = execution {
        view.start_execution(execution_id);
    }
    let summary = view.ingest_trace(load_trace(trace_path)?);
    if summary.foreign > 0 {
        warn!(dropped = summary.foreign, "trace events for other executions ignored");
    }
    print_json(&view.frame())
}

fn cmd_watch(
    config: &LiveConfig,
    graph_path: &Path,
    execution_id: &str,
    endpoint: &str,
) -> Result<()> {
    let graph = load_graph(graph_path)?;
    let runtime = tokio::runtime::Runtime::new().context("start tokio runtime")?;
    runtime.block_on(async {
        let mut view = LiveView::new(graph);
        view.start_execution(execution_id);
        let view = Arc::new(Mutex::new(view));

        let mut channel = TelemetryChannel::new(HttpTransport::new(endpoint), config.channel());
        let _ingest = attach(&channel, Arc::clone(&view));
        let printer = Arc::clone(&view);
        let _printer = channel.subscribe(move |_| {
            let frame = printer.lock().unwrap_or_else(PoisonError::into_inner).frame();
            match serde_json::to_string(&frame) {
                Ok(line) => println!("{}", line),
                Err(err) => warn!(error = %err, "failed to serialize frame"),
            }
        });

        let mut handle = channel.connect(execution_id);
        let finished = tokio::select! {
            status = handle.finished() => status,
            signal = tokio::signal::ctrl_c() => {
                signal.context("listen for ctrl-c")?;
                None
            }
        };
        channel.disconnect();
        match finished {
            Some(status) => eprintln!("execution {} {}", execution_id, status),
            None => eprintln!("stopped watching {}", execution_id),
        }
        Ok::<(), anyhow::Error>(())
    })
}

/// Serialize `value` to pretty-printed JSON on stdout.
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{}", payload);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_layout_defaults_to_hierarchical() {
        let cli = Cli::parse_from(["livestate", "layout", "--graph", "graph.json"]);
        assert!(matches!(
            cli.command,
            Command::Layout {
                mode: LayoutMode::Hierarchical,
                write: false,
                ..
            }
        ));
        assert_eq!(cli.config, PathBuf::from("livestate.toml"));
    }

    #[test]
    fn parse_layout_mode_and_write() {
        let cli = Cli::parse_from([
            "livestate",
            "layout",
            "--graph",
            "g.json",
            "--mode",
            "radial",
            "-w",
            "--config",
            "c.toml",
        ]);
        assert!(matches!(
            cli.command,
            Command::Layout {
                mode: LayoutMode::Radial,
                write: true,
                ..
            }
        ));
        assert_eq!(cli.config, PathBuf::from("c.toml"));
    }

    #[test]
    fn parse_rejects_unknown_layout_mode() {
        assert!(
            Cli::try_parse_from(["livestate", "layout", "--graph", "g.json", "--mode", "spiral"])
                .is_err()
        );
    }

    #[test]
    fn parse_watch_requires_endpoint() {
        assert!(
            Cli::try_parse_from(["livestate", "watch", "--graph", "g.json", "--execution", "e1"])
                .is_err()
        );
        let cli = Cli::parse_from([
            "livestate",
            "watch",
            "--graph",
            "g.json",
            "--execution",
            "e1",
            "--endpoint",
            "http://localhost:8000",
        ]);
        assert!(matches!(cli.command, Command::Watch { .. }));
    }
}
