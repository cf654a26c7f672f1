use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use braid_config::{BackendConfig, CompactionConfig, WorkflowDef};
use braid_runtime::{
  ApprovalGate, ChannelNotifier, EchoBackend, ExecutionEvent, HttpBackend, LoggingNotifier,
  ModelBackend, RetryingBackend, RunStatus, RuntimeConfig, StateBus, WorkflowRuntime,
};
use braid_store::{DEFAULT_USER, SessionRecorder, SessionStore, SqliteStore};
use braid_workflow::Workflow;

/// Braid - compose LLM units into sequential, parallel and looping workflows
#[derive(Parser)]
#[command(name = "braid")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.braid)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a workflow. The initial state is read as a JSON object from stdin.
  Run(RunArgs),

  /// Resolve and validate a workflow without running it
  Validate {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,
  },

  /// Search the recorded state of a user's past sessions
  Search {
    /// Words to look for, any of them may match
    query: String,

    /// User whose sessions are searched
    #[arg(long, default_value = DEFAULT_USER)]
    user: String,

    /// SQLite database for sessions (default: <data-dir>/braid.db)
    #[arg(long)]
    db: Option<PathBuf>,
  },
}

#[derive(Args)]
struct RunArgs {
  /// Path to the workflow file (JSON)
  workflow_file: PathBuf,

  /// Session to read state from and record the run into
  #[arg(long)]
  session: Option<String>,

  /// Owner of the session; `user:` keys are shared between their sessions
  #[arg(long, default_value = DEFAULT_USER)]
  user: String,

  /// SQLite database for sessions (default: <data-dir>/braid.db)
  #[arg(long)]
  db: Option<PathBuf>,

  /// Model backend config file (JSON)
  #[arg(long)]
  backend: Option<PathBuf>,

  /// Echo prompts instead of calling a model backend
  #[arg(long, conflicts_with = "backend")]
  dry_run: bool,

  /// Approve every approval request
  #[arg(long, conflicts_with = "reject")]
  approve: bool,

  /// Reject every approval request (the default)
  #[arg(long)]
  reject: bool,

  /// Timeout for units that do not set their own
  #[arg(long)]
  timeout_ms: Option<u64>,

  /// Compact the session history every N runs
  #[arg(long, requires = "session")]
  compact_interval: Option<usize>,

  /// Runs left uncompacted after each compaction
  #[arg(long, default_value_t = 0)]
  compact_overlap: usize,
}

fn main() -> Result<ExitCode> {
  init_tracing();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".braid"),
  };

  match cli.command {
    Some(Commands::Run(args)) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(run_workflow(args, data_dir))
    }
    Some(Commands::Validate { workflow_file }) => {
      let workflow = load_workflow(&workflow_file)?;
      eprintln!(
        "Workflow '{}' is valid ({} units)",
        workflow.workflow_id,
        workflow.root.units().len()
      );
      Ok(ExitCode::SUCCESS)
    }
    Some(Commands::Search { query, user, db }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(search_memory(query, user, db, data_dir))
    }
    None => {
      println!("braid - use --help to see available commands");
      Ok(ExitCode::SUCCESS)
    }
  }
}

fn init_tracing() {
  let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(env_filter)
    .with(fmt::layer().with_writer(io::stderr).with_target(false))
    .init();
}

async fn run_workflow(args: RunArgs, data_dir: PathBuf) -> Result<ExitCode> {
  let workflow = load_workflow(&args.workflow_file)?;
  eprintln!("Loaded workflow: {}", workflow.name);

  let payload = StateBus::from_json(read_payload_from_stdin()?)
    .context("payload on stdin must be a JSON object")?;

  // Session state first, the payload on top of it.
  let store: Option<Arc<dyn SessionStore>> = match &args.session {
    Some(session_id) => {
      let db_path = args.db.clone().unwrap_or_else(|| data_dir.join("braid.db"));
      let store = open_store(&db_path).await?;
      let session = store
        .open_session(session_id, &workflow.workflow_id, &args.user)
        .await
        .with_context(|| format!("failed to open session '{}'", session_id))?;
      if session.user_id != args.user {
        warn!(
          session_id = %session_id,
          session_user = %session.user_id,
          user = %args.user,
          "session belongs to a different user"
        );
      }
      if session.workflow_id != workflow.workflow_id {
        warn!(
          session_id = %session_id,
          session_workflow = %session.workflow_id,
          workflow_id = %workflow.workflow_id,
          "session was created for a different workflow"
        );
      }
      Some(store)
    }
    None => None,
  };

  let mut initial: StateBus = match (&store, &args.session) {
    (Some(store), Some(session_id)) => store
      .session_state(session_id)
      .await
      .context("failed to read session state")?
      .into_iter()
      .collect(),
    _ => StateBus::new(),
  };
  initial.merge(payload.iter().map(|(k, v)| (k.clone(), v.clone())));

  let missing: Vec<_> = workflow
    .inputs
    .iter()
    .filter(|key| !initial.contains_key(key))
    .cloned()
    .collect();
  if !missing.is_empty() {
    bail!("missing workflow inputs: {}", missing.join(", "));
  }

  let (tx, rx) = mpsc::unbounded_channel();
  let mut builder = WorkflowRuntime::builder(workflow)
    .config(RuntimeConfig {
      default_unit_timeout_ms: args.timeout_ms,
    })
    .notifier(LoggingNotifier)
    .notifier(ChannelNotifier::new(tx));

  if let Some(backend) = load_backend(&args)? {
    builder = builder.backend(backend);
  }

  if let (Some(store), Some(session_id)) = (store, &args.session) {
    let mut recorder = SessionRecorder::new(store, session_id.clone());
    if let Some(interval) = args.compact_interval {
      recorder = recorder.with_compaction(CompactionConfig {
        interval,
        overlap: args.compact_overlap,
      });
    }
    builder = builder.hook(recorder);
  }

  let runtime = builder.build().context("failed to build workflow runtime")?;

  let approver = tokio::spawn(answer_approvals(
    rx,
    runtime.approvals().clone(),
    args.approve && !args.reject,
  ));

  let cancel = CancellationToken::new();
  tokio::spawn({
    let cancel = cancel.clone();
    async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupt received, cancelling run");
        cancel.cancel();
      }
    }
  });

  let result = runtime
    .execute_workflow(initial, cancel)
    .wait()
    .await
    .context("workflow execution failed")?;

  approver.abort();

  eprintln!("Execution {}: {:?}", result.execution_id, result.status);
  if let Some(failure) = &result.failure {
    eprintln!(
      "Failed at '{}' ({}): {}",
      failure.node,
      failure.failed.join(", "),
      failure.message
    );
  }

  println!("{}", serde_json::to_string_pretty(&result.state)?);

  Ok(match result.status {
    RunStatus::Succeeded | RunStatus::CapReached => ExitCode::SUCCESS,
    RunStatus::Failed | RunStatus::Cancelled => ExitCode::FAILURE,
  })
}

async fn search_memory(
  query: String,
  user: String,
  db: Option<PathBuf>,
  data_dir: PathBuf,
) -> Result<ExitCode> {
  let db_path = db.unwrap_or_else(|| data_dir.join("braid.db"));
  let store = open_store(&db_path).await?;

  let matches = store
    .search_memory(&user, &query)
    .await
    .context("failed to search session memory")?;
  eprintln!("Found {} matching values", matches.len());
  println!("{}", serde_json::to_string_pretty(&matches)?);

  Ok(ExitCode::SUCCESS)
}

fn load_workflow(workflow_file: &Path) -> Result<Workflow> {
  let workflow_content = std::fs::read_to_string(workflow_file)
    .with_context(|| format!("failed to read workflow file: {}", workflow_file.display()))?;

  let workflow_def: WorkflowDef = serde_json::from_str(&workflow_content)
    .with_context(|| format!("failed to parse workflow file: {}", workflow_file.display()))?;

  braid_workflow::resolve(workflow_def).context("failed to resolve workflow")
}

async fn open_store(db_path: &Path) -> Result<Arc<dyn SessionStore>> {
  if let Some(parent) = db_path.parent() {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create directory: {}", parent.display()))?;
  }

  let store = SqliteStore::open(db_path)
    .await
    .with_context(|| format!("failed to open session database: {}", db_path.display()))?;
  Ok(Arc::new(store))
}

fn load_backend(args: &RunArgs) -> Result<Option<Arc<dyn ModelBackend>>> {
  if args.dry_run {
    return Ok(Some(Arc::new(EchoBackend)));
  }

  let Some(path) = &args.backend else {
    return Ok(None);
  };

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read backend config: {}", path.display()))?;
  let config: BackendConfig = serde_json::from_str(&content)
    .with_context(|| format!("failed to parse backend config: {}", path.display()))?;

  let api_key = std::env::var(&config.api_key_env)
    .with_context(|| format!("environment variable {} is not set", config.api_key_env))?;

  let backend = HttpBackend::new(&config, api_key).context("failed to create HTTP backend")?;
  info!(model = %config.model, endpoint = %config.endpoint, "using HTTP model backend");

  Ok(Some(Arc::new(RetryingBackend::new(backend, config.retry))))
}

/// Answer every approval request the same way.
async fn answer_approvals(
  mut events: mpsc::UnboundedReceiver<ExecutionEvent>,
  gate: ApprovalGate,
  approve: bool,
) {
  while let Some(event) = events.recv().await {
    if let ExecutionEvent::ApprovalRequested {
      unit, token, hint, ..
    } = event
    {
      if approve {
        info!(%unit, %hint, "approving request");
      } else {
        warn!(%unit, %hint, "rejecting request, pass --approve to accept");
      }
      if let Err(e) = gate.resolve(&token, approve) {
        warn!(%unit, error = %e, "failed to answer approval request");
      }
    }
  }
}

fn read_payload_from_stdin() -> Result<serde_json::Value> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    // No stdin pipe, use empty object
    Ok(serde_json::json!({}))
  } else {
    let mut input = String::new();
    io::stdin()
      .read_to_string(&mut input)
      .context("failed to read payload from stdin")?;

    if input.trim().is_empty() {
      Ok(serde_json::json!({}))
    } else {
      serde_json::from_str(&input).context("failed to parse payload JSON from stdin")
    }
  }
}
