mod config;
mod render;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail, ensure};
use clap::{Args, Parser, Subcommand};
use loopweave_core::{Graph, LoopReport, WorkflowDocument, repair_until_clean};
use loopweave_sync::doctor::{self, RepairOptions};
use loopweave_sync::{N8nClient, WorkflowBackend};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use config::{FileConfig, LoopArgs, RemoteArgs, load_config};

// ── CLI ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "loopweave",
    version,
    about = "Check and repair loop wiring in automation workflows"
)]
struct Cli {
    /// Server root, e.g. http://localhost:5678
    #[arg(long, env = "N8N_URL", global = true)]
    url: Option<String>,

    /// API key sent as X-N8N-API-KEY
    #[arg(long, env = "N8N_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,

    /// TOML file with [remote] and [loop] sections
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write JSON logs to a daily rotated file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List workflows on the server
    List,
    /// Download a workflow export
    Fetch {
        id: String,
        /// Write to this file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Report loop violations without changing anything
    Check {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        loop_args: LoopFlags,
        /// Print reports as JSON
        #[arg(long)]
        json: bool,
    },
    /// Wire missing loop edges and fix loop configuration
    Repair {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        loop_args: LoopFlags,
        /// Show what would change without writing
        #[arg(long)]
        dry_run: bool,
        /// Save the fetched workflow here before overwriting it
        #[arg(long)]
        backup_dir: Option<PathBuf>,
        /// Where to write a repaired local file (defaults to overwriting --file)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct SourceArgs {
    /// Remote workflow id
    #[arg(long)]
    workflow: Option<String>,
    /// Local workflow export
    #[arg(long)]
    file: Option<PathBuf>,
}

enum Source {
    Remote(String),
    Local(PathBuf),
}

impl SourceArgs {
    fn resolve(self) -> Result<Source> {
        match (self.workflow, self.file) {
            (Some(id), None) => Ok(Source::Remote(id)),
            (None, Some(path)) => Ok(Source::Local(path)),
            _ => bail!("Pass exactly one of --workflow or --file"),
        }
    }
}

#[derive(Args)]
struct LoopFlags {
    /// Loop node name; every loop node is checked when omitted
    #[arg(long = "loop")]
    node: Option<String>,
    /// First node of the loop body
    #[arg(long)]
    first_step: Option<String>,
    /// Last node of the loop body, wired back into the loop
    #[arg(long)]
    last_step: Option<String>,
    /// Node the done branch should reach
    #[arg(long)]
    completion_step: Option<String>,
    /// Required batch size of the loop node
    #[arg(long)]
    batch_size: Option<u64>,
}

impl From<LoopFlags> for LoopArgs {
    fn from(flags: LoopFlags) -> Self {
        Self {
            node: flags.node,
            first_step: flags.first_step,
            last_step: flags.last_step,
            completion_step: flags.completion_step,
            batch_size: flags.batch_size,
        }
    }
}

// ── Logging ─────────────────────────────────────────────────────

fn init_tracing(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,loopweave=info"));
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let (file, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log dir: {}", dir.display()))?;
            let appender = tracing_appender::rolling::RollingFileAppender::builder()
                .rotation(tracing_appender::rolling::Rotation::DAILY)
                .filename_prefix("loopweave")
                .filename_suffix("log")
                .build(dir)
                .context("Failed to create log file appender")?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(EnvFilter::new("info,loopweave=debug"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .init();
    Ok(guard)
}

// ── Commands ────────────────────────────────────────────────────

fn read_document(path: &Path) -> Result<WorkflowDocument> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read workflow: {}", path.display()))?;
    serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse workflow: {}", path.display()))
}

fn write_document(path: &Path, document: &WorkflowDocument) -> Result<()> {
    let json = serde_json::to_string_pretty(document).context("Failed to serialize workflow")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write workflow: {}", path.display()))
}

fn all_clean(reports: &[LoopReport]) -> bool {
    reports.iter().all(LoopReport::is_clean)
}

/// Returns whether every checked loop ended up clean.
async fn run(cli: Cli) -> Result<bool> {
    let file_config = match &cli.config {
        Some(path) => load_config(path)?,
        None => FileConfig::default(),
    };
    let remote_args = RemoteArgs {
        url: cli.url,
        api_key: cli.api_key,
    };
    let client = || -> Result<N8nClient> { Ok(N8nClient::new(file_config.remote(&remote_args)?)) };

    match cli.command {
        Command::List => {
            let workflows = client()?.list_workflows().await?;
            print!("{}", render::render_workflows(&workflows));
            Ok(true)
        }
        Command::Fetch { id, out } => {
            let document = client()?
                .fetch_workflow(&id)
                .await
                .with_context(|| format!("Failed to fetch workflow {}", id))?;
            match out {
                Some(path) => {
                    write_document(&path, &document)?;
                    info!("Saved workflow '{}' to {}", document.name, path.display());
                }
                None => println!("{}", serde_json::to_string_pretty(&document)?),
            }
            Ok(true)
        }
        Command::Check {
            source,
            loop_args,
            json,
        } => {
            let check = file_config.check_config(&loop_args.into());
            let reports = match source.resolve()? {
                Source::Remote(id) => doctor::diagnose(&client()?, &id, &check).await?,
                Source::Local(path) => {
                    let graph = Graph::from_document(read_document(&path)?)
                        .with_context(|| format!("Invalid workflow: {}", path.display()))?;
                    doctor::check_graph(&graph, &check)
                }
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                print!("{}", render::render_reports(&reports));
            }
            Ok(all_clean(&reports))
        }
        Command::Repair {
            source,
            loop_args,
            dry_run,
            backup_dir,
            out,
            json,
        } => {
            let loop_args: LoopArgs = loop_args.into();
            let check = file_config.check_config(&loop_args);
            ensure!(
                !check.loop_node.is_empty(),
                "repair needs a loop node: pass --loop or set [loop] node in the config"
            );
            let plan = file_config.repair_plan(&loop_args);

            match source.resolve()? {
                Source::Remote(id) => {
                    let options = RepairOptions {
                        dry_run,
                        backup_dir: file_config.backup_dir(backup_dir),
                    };
                    let summary = doctor::repair(&client()?, &id, &check, &plan, &options).await?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&summary)?);
                    } else {
                        print!("{}", render::render_summary(&summary, dry_run));
                    }
                    Ok(summary.is_clean())
                }
                Source::Local(path) => {
                    let mut graph = Graph::from_document(read_document(&path)?)
                        .with_context(|| format!("Invalid workflow: {}", path.display()))?;
                    let session = repair_until_clean(&mut graph, &check, &plan)
                        .with_context(|| format!("Failed to repair loop '{}'", check.loop_node))?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&session)?);
                    } else {
                        print!("{}", render::render_report(&session.before));
                        print!("{}", render::render_outcome(&session.outcome));
                        print!("{}", render::render_report(&session.after));
                    }
                    if !session.outcome.unresolved.is_empty() {
                        warn!(
                            "Not writing {}: {} violation(s) remain after repair",
                            path.display(),
                            session.outcome.unresolved.len()
                        );
                    } else if !dry_run && !session.outcome.is_noop() {
                        let target = out.unwrap_or(path);
                        write_document(&target, graph.document())?;
                        info!("Wrote repaired workflow to {}", target.display());
                    }
                    Ok(session.after.is_clean())
                }
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = match init_tracing(cli.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}
