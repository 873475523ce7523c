use anyhow::{anyhow, Context, Result};
use clap::error::ErrorKind as ClapErrorKind;
use clap::{Args, Parser, Subcommand, ValueEnum};
use mco_core::decision::{EXIT_INTERNAL, EXIT_USAGE};
use mco_core::model::{EnforcementMode, Mode, PathConstraints, RunResult, Task};
use mco_core::{ids, now_iso};
use mco_engine::artifacts::{self, ArtifactLayout};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{PolicyOverrides, DEFAULT_ARTIFACT_BASE, DEFAULT_STATE_FILE};

#[derive(Debug, Parser)]
#[command(name = "mco", version, about = "Dispatch one prompt to several AI coding-agent CLIs in parallel")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Review the repository with every provider and aggregate findings
    Review(RunArgs),

    /// Run a free-form task on every provider and collect their outputs
    Run(RunArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ResultModeArg {
    Artifact,
    Stdout,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EnforcementArg {
    Strict,
    Lenient,
}

impl From<EnforcementArg> for EnforcementMode {
    fn from(value: EnforcementArg) -> Self {
        match value {
            EnforcementArg::Strict => EnforcementMode::Strict,
            EnforcementArg::Lenient => EnforcementMode::Lenient,
        }
    }
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Repository the agents operate on
    #[arg(long)]
    repo: PathBuf,

    /// Prompt text sent to every provider
    #[arg(long, conflicts_with = "prompt_file")]
    prompt: Option<String>,

    /// Read the prompt from a file instead
    #[arg(long)]
    prompt_file: Option<PathBuf>,

    /// Providers to dispatch to, e.g. claude,codex
    #[arg(long, value_delimiter = ',')]
    providers: Option<Vec<String>>,

    /// Config file (default: ./mco.json when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Also print the run document to stdout
    #[arg(long)]
    json: bool,

    /// Where the result goes
    #[arg(long, value_enum, default_value = "artifact")]
    result_mode: ResultModeArg,

    /// Paths the agents may touch
    #[arg(long, value_delimiter = ',')]
    allow_paths: Option<Vec<String>>,

    /// Paths the task is about
    #[arg(long, value_delimiter = ',')]
    target_paths: Option<Vec<String>>,

    /// strict: reject un-honorable permission options; lenient: drop them
    #[arg(long, value_enum)]
    enforcement_mode: Option<EnforcementArg>,

    /// Cancel a provider when output stops growing for this many seconds
    #[arg(long)]
    stall_timeout: Option<u64>,

    /// Review mode: cancel a provider this many seconds after spawn (0 = off)
    #[arg(long)]
    review_hard_timeout: Option<u64>,

    /// Concurrent provider cap (0 = unbounded)
    #[arg(long)]
    max_parallelism: Option<usize>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion => 0,
                _ => EXIT_USAGE,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let (mode, args) = match cli.cmd {
        Command::Review(args) => (Mode::Review, args),
        Command::Run(args) => (Mode::Run, args),
    };

    let code = match run(mode, args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            EXIT_INTERNAL
        }
    };
    std::process::exit(code);
}

async fn run(mode: Mode, args: RunArgs) -> Result<i32> {
    let repo_path = match std::fs::canonicalize(&args.repo) {
        Ok(path) if path.is_dir() => path,
        _ => {
            eprintln!("error: --repo {} is not a directory", args.repo.display());
            return Ok(EXIT_USAGE);
        }
    };

    let prompt = match resolve_prompt(&args) {
        Ok(prompt) => prompt,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(EXIT_USAGE);
        }
    };

    // Flags override the file; the file overrides built-in defaults.
    let file = load_config(args.config.as_deref())?;
    let overrides = PolicyOverrides {
        stall_timeout_seconds: args.stall_timeout,
        review_hard_timeout_seconds: args.review_hard_timeout,
        max_provider_parallelism: args.max_parallelism,
        enforcement_mode: args.enforcement_mode.map(Into::into),
    };
    let policy = config::merge_policy(file.policy.as_ref(), &overrides);
    let provider_ids = config::merge_providers(file.providers.as_ref(), args.providers.as_ref());

    let adapters = match mco_adapters::adapters_for(&provider_ids) {
        Ok(adapters) => adapters,
        Err(msg) => {
            eprintln!("error: {msg}");
            return Ok(EXIT_USAGE);
        }
    };

    let artifact_base = PathBuf::from(
        file.artifact_base
            .clone()
            .unwrap_or_else(|| DEFAULT_ARTIFACT_BASE.to_string()),
    );
    let write_artifacts = matches!(args.result_mode, ResultModeArg::Artifact | ResultModeArg::Both);
    let print_doc = args.json || matches!(args.result_mode, ResultModeArg::Stdout | ResultModeArg::Both);

    let (task_id, layout) = if write_artifacts {
        let (task_id, layout) = ArtifactLayout::create_unique(&artifact_base)
            .with_context(|| format!("prepare artifact tree under {}", artifact_base.display()))?;
        (task_id, Some(layout))
    } else {
        (ids::new_task_id(), None)
    };

    let task = Arc::new(Task {
        task_id,
        mode,
        prompt,
        repo_path,
        provider_ids,
        policy,
        constraints: PathConstraints {
            allow_paths: args.allow_paths.unwrap_or_default(),
            target_paths: args.target_paths.unwrap_or_default(),
        },
    });

    info!(
        "task {} ({} providers, mode {:?})",
        task.task_id,
        task.provider_ids.len(),
        mode
    );

    let (interrupt_tx, interrupt_rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling providers");
            let _ = interrupt_tx.send(true);
        }
    });

    let raw_dir = layout.as_ref().map(|l| l.raw_dir());
    let run = mco_engine::execute_task(Arc::clone(&task), adapters, raw_dir, interrupt_rx).await?;

    if let Some(layout) = &layout {
        artifacts::write_run(layout, &run).context("write artifacts")?;
        info!("artifacts written to {}", layout.root().display());
    }
    if print_doc {
        println!("{}", serde_json::to_string_pretty(&run)?);
    }

    let state_file = PathBuf::from(
        file.state_file
            .clone()
            .unwrap_or_else(|| DEFAULT_STATE_FILE.to_string()),
    );
    write_state(&state_file, &run);

    Ok(run.decision.exit_code())
}

fn resolve_prompt(args: &RunArgs) -> Result<String> {
    match (&args.prompt, &args.prompt_file) {
        (Some(prompt), None) => Ok(prompt.clone()),
        (None, Some(path)) => std::fs::read_to_string(path)
            .map(|s| s.trim_end().to_string())
            .map_err(|e| anyhow!("cannot read --prompt-file {}: {e}", path.display())),
        (None, None) => Err(anyhow!("one of --prompt or --prompt-file is required")),
        (Some(_), Some(_)) => Err(anyhow!("--prompt and --prompt-file are mutually exclusive")),
    }
}

fn load_config(explicit: Option<&Path>) -> Result<config::FileConfig> {
    match explicit {
        Some(path) => config::load_file(path),
        None => {
            let default = Path::new("mco.json");
            if default.exists() {
                config::load_file(default)
            } else {
                Ok(config::FileConfig::default())
            }
        }
    }
}

/// Last-run metadata. Reserved surface: written best-effort, never read back.
fn write_state(path: &Path, run: &RunResult) {
    let doc = json!({
        "last_task_id": run.task_id,
        "decision": run.decision.as_str(),
        "ended_at": run.ended_at,
        "written_at": now_iso(),
    });
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }
    if let Err(e) = std::fs::write(path, serde_json::to_vec_pretty(&doc).unwrap_or_default()) {
        warn!("state file {} not written: {e}", path.display());
    }
}
