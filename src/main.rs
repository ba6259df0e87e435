mod format;

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use codewake::{Config, IndexOrchestrator, Watcher, WorkerMessage, WorkerOp, WorkerRequest};

/// codewake — multi-workspace semantic code index
#[derive(Parser)]
#[command(name = "codewake", about)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Workspace root directory (defaults to current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Print version information with logo
    #[arg(long)]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Index (or re-index) a workspace
    Ingest(IngestArgs),

    /// Run a semantic search query against a workspace's index
    Search(SearchArgs),

    /// Show a workspace's index status
    Status(StatusArgs),

    /// Watch a workspace for changes and re-index incrementally
    Watch(WatchArgs),

    /// Serve the worker IPC protocol over stdio (spoken by WorkerHost; not
    /// meant to be run interactively)
    Worker(WorkerArgs),
}

#[derive(Parser)]
struct IngestArgs {}

#[derive(Parser)]
struct SearchArgs {
    /// Search query string
    query: String,

    /// Maximum number of results to return
    #[arg(short, long, default_value_t = 10)]
    limit: usize,
}

#[derive(Parser)]
struct StatusArgs {}

#[derive(Parser)]
struct WatchArgs {}

#[derive(Parser)]
struct WorkerArgs {}

/// Construct the orchestrator for a single CLI invocation.
///
/// Data (vector tables, digest trees, embedding cache) lives under
/// `<workspace>/.codewake-index`, a self-contained per-workspace directory.
/// Distinct from `<workspace>/.codewake`, the dotenv-style config file read
/// by [`Config::load`] — the two must never share a path.
fn open_orchestrator(workspace: &PathBuf, config: &Config) -> anyhow::Result<IndexOrchestrator> {
    let data_dir = workspace.join(".codewake-index");
    Ok(IndexOrchestrator::new(
        data_dir,
        config.scan_slots,
        config.embedding_concurrency.max(1),
    )?)
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.no_color || std::env::var_os("NO_COLOR").is_some() {
        colored::control::set_override(false);
    }

    if cli.version {
        format::print_version();
        return Ok(());
    }

    codewake::logging::init(cli.verbose)?;

    let workspace = match &cli.root {
        Some(root) => root.clone(),
        None => std::env::current_dir()?,
    };
    let config = Config::load(&workspace)?;
    let json = cli.json;

    match cli.command {
        Some(Commands::Ingest(_args)) => {
            let orchestrator = open_orchestrator(&workspace, &config)?;

            let cancel = tokio_util::sync::CancellationToken::new();
            let cancel_clone = cancel.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                cancel_clone.cancel();
            });

            let interactive = !json && std::io::IsTerminal::is_terminal(&std::io::stdout());
            let bar = if interactive {
                let pb = indicatif::ProgressBar::new(0);
                pb.set_style(
                    indicatif::ProgressStyle::with_template("  {spinner:.green} [{pos}/{len}] {wide_bar:.cyan/dim} {percent}%")
                        .unwrap()
                        .progress_chars("█░░"),
                );
                pb.enable_steady_tick(std::time::Duration::from_millis(120));
                Some(pb)
            } else {
                None
            };

            let progress_fn = bar.as_ref().map(|pb| {
                let pb = pb.clone();
                move |done: usize, total: usize| {
                    pb.set_length(total as u64);
                    pb.set_position(done as u64);
                }
            });

            let result = match &progress_fn {
                Some(f) => orchestrator.index(&workspace, Some(f as &dyn codewake::index::ApplyProgress), &cancel).await,
                None => orchestrator.index(&workspace, None, &cancel).await,
            };

            if let Some(pb) = bar {
                pb.finish_and_clear();
            }
            result?;

            let status = orchestrator.status(&workspace).await?;
            if json {
                serde_json::to_writer_pretty(std::io::stdout(), &status)?;
                writeln!(std::io::stdout())?;
            } else {
                println!("  {} {}", "✓".green().bold(), "Indexing complete".bold());
                format::print_status(&status);
            }
        }
        Some(Commands::Search(args)) => {
            let orchestrator = open_orchestrator(&workspace, &config)?;
            let hits = orchestrator.retrieve(&workspace, &args.query, args.limit).await?;

            if json {
                serde_json::to_writer_pretty(std::io::stdout(), &hits)?;
                writeln!(std::io::stdout())?;
            } else {
                format::print_hits(&hits, &args.query);
            }
        }
        Some(Commands::Status(_args)) => {
            let orchestrator = open_orchestrator(&workspace, &config)?;
            let status = orchestrator.status(&workspace).await?;

            if json {
                serde_json::to_writer_pretty(std::io::stdout(), &status)?;
                writeln!(std::io::stdout())?;
            } else {
                format::print_status(&status);
            }
        }
        Some(Commands::Watch(_args)) => {
            let orchestrator = Arc::new(open_orchestrator(&workspace, &config)?);
            let watcher = Watcher::new(config.clone(), &workspace, Arc::clone(&orchestrator));

            let cancel = tokio_util::sync::CancellationToken::new();
            let cancel_clone = cancel.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                cancel_clone.cancel();
            });

            if json {
                let msg = serde_json::json!({"status": "watching", "workspace": workspace});
                serde_json::to_writer_pretty(std::io::stdout(), &msg)?;
                writeln!(std::io::stdout())?;
            } else {
                println!("  {} watching {}", "●".cyan().bold(), workspace.display());
            }

            watcher.watch(cancel).await?;
        }
        Some(Commands::Worker(_args)) => {
            run_worker_serve().await?;
        }
        None => {
            format::print_logo();
            println!("{}", "  Run `codewake --help` for usage information.".dimmed());
        }
    }

    Ok(())
}

/// Serve the worker protocol on stdin/stdout: read one [`WorkerRequest`]
/// per line, run it against an [`IndexOrchestrator`], and write back
/// `Progress`/`Result` messages as they occur. This is the subprocess side
/// of `WorkerHost`; it has no other caller.
async fn run_worker_serve() -> anyhow::Result<()> {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::sync::mpsc;

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WorkerMessage>();

    let writer_task = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = out_rx.recv().await {
            if let Ok(mut line) = serde_json::to_string(&message) {
                line.push('\n');
                if stdout.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                let _ = stdout.flush().await;
            }
        }
    });

    let orchestrators: Arc<parking_lot::Mutex<HashMap<PathBuf, Arc<IndexOrchestrator>>>> =
        Arc::new(parking_lot::Mutex::new(HashMap::new()));
    let cancels: Arc<parking_lot::Mutex<HashMap<PathBuf, CancellationToken>>> =
        Arc::new(parking_lot::Mutex::new(HashMap::new()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: WorkerRequest = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "worker received malformed request");
                continue;
            }
        };

        let out_tx = out_tx.clone();
        let orchestrators = Arc::clone(&orchestrators);
        let cancels = Arc::clone(&cancels);

        tokio::spawn(async move {
            let request_id = request.request_id;
            let result = handle_worker_request(request, &orchestrators, &cancels, &out_tx).await;
            let (ok, error) = match result {
                Ok(()) => (true, None),
                Err(e) => (false, Some(e.to_string())),
            };
            let _ = out_tx.send(WorkerMessage::Result { request_id, ok, error });
        });
    }

    drop(out_tx);
    writer_task.await.ok();
    Ok(())
}

/// Run a single [`WorkerRequest`] against the per-workspace orchestrator,
/// reusing it across requests for the same workspace. `Cancel` fires the
/// workspace's cancellation token and returns immediately rather than
/// waiting for the in-flight request it cancels.
async fn handle_worker_request(
    request: WorkerRequest,
    orchestrators: &Arc<parking_lot::Mutex<HashMap<PathBuf, Arc<IndexOrchestrator>>>>,
    cancels: &Arc<parking_lot::Mutex<HashMap<PathBuf, CancellationToken>>>,
    out_tx: &tokio::sync::mpsc::UnboundedSender<WorkerMessage>,
) -> anyhow::Result<()> {
    let workspace = request.workspace;

    if let WorkerOp::Cancel = &request.op {
        if let Some(token) = cancels.lock().get(&workspace) {
            token.cancel();
        }
        return Ok(());
    }

    let config = Config::load(&workspace)?;
    let orchestrator = {
        let mut guard = orchestrators.lock();
        match guard.get(&workspace) {
            Some(o) => Arc::clone(o),
            None => {
                let o = Arc::new(open_orchestrator(&workspace, &config)?);
                guard.insert(workspace.clone(), Arc::clone(&o));
                o
            }
        }
    };

    let cancel = cancels
        .lock()
        .entry(workspace.clone())
        .or_insert_with(CancellationToken::new)
        .clone();

    match request.op {
        WorkerOp::Index => {
            let request_id = request.request_id;
            let progress_tx = out_tx.clone();
            let progress = move |done: usize, total: usize| {
                let _ = progress_tx.send(WorkerMessage::Progress {
                    request_id,
                    progress: if total == 0 { 0.0 } else { done as f32 / total as f32 },
                    description: format!("{done}/{total} files"),
                    current_file: None,
                });
            };
            orchestrator
                .index(
                    &workspace,
                    Some(&progress as &dyn codewake::index::ApplyProgress),
                    &cancel,
                )
                .await?;
        }
        WorkerOp::OnFilesChanged { paths } => {
            orchestrator.on_files_changed(&workspace, &paths).await?;
        }
        WorkerOp::Cancel => unreachable!("handled above"),
    }

    cancels.lock().remove(&workspace);
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {:#}", e);
        process::exit(1);
    }
}
