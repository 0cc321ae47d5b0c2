//! Matchmove CLI - Offline driver for the publish pipeline
//!
//! Commands: outputs, scan, validate, publish, load
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 when any task fails

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use matchmove_publish::host::LogProgress;
use matchmove_publish::model::EntityRef;
use matchmove_publish::offline::{JsonLedger, SceneSnapshot};
use matchmove_publish::{
    fetch_published_file, load_artifact, ConfigError, HostError, HostSession, LoadError,
    PipelineConfig, PublishContext, PublishPipeline, PublishRequest, Task, TrackingError, Tracking,
};

#[derive(Parser)]
#[command(name = "matchmove-cli")]
#[command(about = "Matchmove CLI - scan, validate, publish and load matchmove deliverables")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Pipeline configuration
    #[arg(short, long, default_value = "pipeline.toml")]
    config: PathBuf,

    /// Log filter, overrides RUST_LOG (e.g. `debug`, `matchmove_publish=trace`)
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured outputs
    Outputs,

    /// List publishable items in a scene
    Scan {
        #[command(flatten)]
        session: SessionArgs,
    },

    /// Run pre-publish checks
    Validate {
        #[command(flatten)]
        session: SessionArgs,
    },

    /// Validate, then publish every task that passed
    Publish {
        #[command(flatten)]
        session: SessionArgs,

        /// Tracking ledger (JSON)
        #[arg(short, long)]
        ledger: PathBuf,

        /// Publish comment
        #[arg(short = 'm', long, default_value = "")]
        comment: String,

        /// Fallback thumbnail
        #[arg(long)]
        thumbnail: Option<PathBuf>,

        /// Tracking task id the publishes are filed under
        #[arg(long)]
        task_id: Option<i64>,

        /// Primary publish every output depends on (defaults to the scene path)
        #[arg(long)]
        primary: Option<String>,
    },

    /// Load a published file into a scene
    Load {
        /// Engine name, e.g. tk-maya
        #[arg(long)]
        host: String,

        /// Scene snapshot (JSON); updated in place
        #[arg(short, long)]
        scene: PathBuf,

        /// Tracking ledger (JSON)
        #[arg(short, long)]
        ledger: PathBuf,

        /// Published file id
        #[arg(long)]
        id: i64,

        /// File to load
        path: String,
    },
}

#[derive(clap::Args)]
struct SessionArgs {
    /// Scene snapshot (JSON)
    #[arg(short, long)]
    scene: PathBuf,

    /// Publish context (JSON)
    #[arg(long)]
    context: PathBuf,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Tracking(#[from] TrackingError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Invalid {what} '{path}': {reason}")]
    Input {
        what: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("Work template '{0}' is not configured")]
    NoWorkTemplate(String),
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn emit(value: &impl Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(out) => println!("{}", out),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}

fn read_json<T: DeserializeOwned>(what: &'static str, path: &Path) -> Result<T, CliError> {
    let invalid = |reason: String| CliError::Input {
        what,
        path: path.to_path_buf(),
        reason,
    };
    let content = fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
    serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))
}

fn exit_for(failed: bool) -> ExitCode {
    if failed {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            emit(&json!({ "success": false, "error": e.to_string() }));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, CliError> {
    let config = PipelineConfig::load(&cli.config)?;
    info!(config = %cli.config.display(), "configuration loaded");

    match cli.command {
        Commands::Outputs => {
            emit(&config.outputs);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Scan { session } => {
            let templates = config.template_registry()?;
            let context: PublishContext = read_json("context", &session.context)?;
            let scene = SceneSnapshot::load(&session.scene)?;

            let pipeline = PublishPipeline::new(&config, &templates, &context);
            emit(&pipeline.scan(&scene));
            Ok(ExitCode::SUCCESS)
        }

        Commands::Validate { session } => {
            let templates = config.template_registry()?;
            let context: PublishContext = read_json("context", &session.context)?;
            let scene = SceneSnapshot::load(&session.scene)?;
            let mut exporter = scene.exporter();

            let pipeline = PublishPipeline::new(&config, &templates, &context);
            let tasks = pipeline.build_tasks(&pipeline.scan(&scene));
            let mut host = HostSession {
                scene: &scene,
                exporter: &mut exporter,
            };
            let failures = pipeline.validate(&tasks, &mut host, &mut LogProgress);

            emit(&json!({
                "valid": failures.is_empty(),
                "tasks": tasks,
                "failures": failures,
            }));
            Ok(exit_for(!failures.is_empty()))
        }

        Commands::Publish {
            session,
            ledger,
            comment,
            thumbnail,
            task_id,
            primary,
        } => {
            let templates = config.template_registry()?;
            let context: PublishContext = read_json("context", &session.context)?;
            let scene = SceneSnapshot::load(&session.scene)?;
            let mut exporter = scene.exporter();
            let mut client = JsonLedger::open(&ledger)?;

            let pipeline = PublishPipeline::new(&config, &templates, &context);
            let work_template = pipeline
                .work_template()
                .ok_or_else(|| CliError::NoWorkTemplate(config.work_template.clone()))?;

            let tasks = pipeline.build_tasks(&pipeline.scan(&scene));
            let mut host = HostSession {
                scene: &scene,
                exporter: &mut exporter,
            };
            let rejected = pipeline.validate(&tasks, &mut host, &mut LogProgress);
            let ready: Vec<Task> = tasks
                .into_iter()
                .filter(|task| !rejected.iter().any(|r| &r.task == task))
                .collect();

            let request = PublishRequest {
                comment,
                thumbnail_path: thumbnail,
                tracking_task: task_id.map(|id| EntityRef::new("Task", id)),
                primary_publish_path: primary
                    .or_else(|| scene.scene_path.clone())
                    .unwrap_or_default(),
            };
            let mut progress = LogProgress;
            let mut tracking = Tracking {
                client: &mut client,
                progress: &mut progress,
            };
            let report = pipeline.publish(&ready, work_template, &request, &mut host, &mut tracking);

            let failed = !rejected.is_empty() || !report.is_success();
            emit(&json!({
                "success": !failed,
                "rejected": rejected,
                "report": report,
            }));
            Ok(exit_for(failed))
        }

        Commands::Load {
            host,
            scene,
            ledger,
            id,
            path,
        } => {
            let client = JsonLedger::open(&ledger)?;
            let record = fetch_published_file(&client, id)?;
            let mut snapshot = SceneSnapshot::load(&scene)?;
            let mut errors: Vec<String> = vec![];

            let action = load_artifact(&host, &path, &record, &mut snapshot, &mut errors)?;
            if action.is_some() {
                snapshot.save(&scene)?;
            }

            emit(&json!({
                "success": errors.is_empty(),
                "action": action,
                "errors": errors,
            }));
            Ok(exit_for(!errors.is_empty()))
        }
    }
}
