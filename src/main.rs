mod cache;
mod config;
mod core;
mod dispatch;
mod engine;
mod error;
mod host;
mod interrupt;
mod reaper;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::ContainerConfig;
use crate::core::exit_code::ExitStatus;
use crate::core::project::resolve_project_root;
use crate::core::sentinel::{is_container_context, refusal_message};
use crate::dispatch::commands::TaskKind;
use crate::dispatch::{DispatchOptions, Dispatcher, RunResult, API_CONTAINER_PORT};
use crate::engine::{ContainerEngine, DockerEngine, EngineCapabilities};
use crate::error::ContainerError;
use crate::host::HostBridge;
use crate::interrupt::Interrupt;
use crate::reaper::{LogStreamer, Reaper};

/// Run the accessibility scanner inside a container
#[derive(Debug, Parser)]
#[command(name = "a11y-container", version)]
struct Cli {
    /// Project root (defaults to the nearest ancestor with pyproject.toml)
    #[arg(long, global = true)]
    project_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build (or rebuild) the cached image for the current sources
    Prepare,
    /// Run a one-off scan
    Run(RunArgs),
    /// Run a one-off scan, optionally staging a site archive first
    Scan {
        #[command(flatten)]
        run: RunArgs,
        /// Site archive copied to data/unzip/site.zip before the scan
        #[arg(long)]
        zip_path: Option<PathBuf>,
    },
    /// Scan a live site
    Live {
        #[command(flatten)]
        run: RunArgs,
        #[arg(long)]
        base_url: String,
        /// Comma separated page paths
        #[arg(long, default_value = "/")]
        pages: String,
    },
    /// Start the API server
    Serve {
        #[command(flatten)]
        run: RunArgs,
        #[arg(long, default_value_t = API_CONTAINER_PORT)]
        port: u16,
    },
    /// Show the cache key and whether its image exists
    CacheStatus,
    /// Exit 0 inside a task container, 2 elsewhere
    Guard,
}

#[derive(Debug, Clone, Copy, Args)]
struct RunArgs {
    /// Provision from scratch instead of using the cached image
    #[arg(long)]
    no_cache: bool,
    /// Rebuild the cached image before running
    #[arg(long, conflicts_with = "no_cache")]
    rebuild_cache: bool,
    /// Don't follow container output
    #[arg(long)]
    no_stream: bool,
}

impl RunArgs {
    fn options(&self, task: TaskKind) -> DispatchOptions {
        DispatchOptions::new(task)
            .with_cache(!self.no_cache)
            .with_rebuild(self.rebuild_cache)
            .with_streaming(!self.no_stream)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("a11y_container=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let interrupt = Interrupt::new();
    let status = match run(cli, interrupt.clone()).await {
        Ok(status) => status,
        Err(e) => {
            error!("{:#}", e);
            error_status(&e, &interrupt)
        }
    };
    info!("Exit code: {}", status.code());
    std::process::exit(status.code());
}

async fn run(cli: Cli, interrupt: Interrupt) -> Result<ExitStatus> {
    match &cli.command {
        Command::Guard => return Ok(guard()),
        Command::Scan {
            zip_path: Some(zip),
            ..
        } if !zip.is_file() => {
            error!("Zip file not found: {}", zip.display());
            return Ok(ExitStatus::Usage);
        }
        _ => {}
    }

    let root = resolve_project_root(cli.project_root.as_deref(), "pyproject.toml")?;
    let config = ContainerConfig::load(&root)
        .with_context(|| format!("Failed to load configuration for {}", root.display()))?;
    info!("Project root: {}", root.display());

    let engine: Arc<dyn ContainerEngine> =
        Arc::new(DockerEngine::connect().context("Failed to connect to the container engine")?);
    let caps = EngineCapabilities::detect(engine.as_ref()).await;

    interrupt.listen_for_ctrl_c();

    let host = HostBridge::new(&root, &config, caps);
    let streamer = LogStreamer::new(engine.clone(), interrupt.clone(), config.stop_timeout);
    let reaper = Reaper::new(engine.clone(), interrupt, config.stop_timeout);
    let dispatcher = Dispatcher::new(engine, config, host.clone(), streamer, reaper);

    let options = match cli.command {
        Command::Guard => unreachable!("handled before connecting to the engine"),
        Command::Prepare => {
            let image = dispatcher.images().prepare_cached_image().await?;
            println!("{}", image);
            return Ok(ExitStatus::Success);
        }
        Command::CacheStatus => {
            let images = dispatcher.images();
            let key = images.cache_key()?;
            let (image, state) = images.lookup().await?;
            println!("key:    {}", key.as_str());
            println!("image:  {}", image);
            println!("status: {}", state);
            return Ok(ExitStatus::Success);
        }
        Command::Run(run) => run.options(TaskKind::Scan),
        Command::Scan { run, zip_path } => {
            if let Some(zip) = zip_path {
                host.stage_site_archive(&zip)?;
            }
            run.options(TaskKind::Scan)
        }
        Command::Live {
            run,
            base_url,
            pages,
        } => run
            .options(TaskKind::LiveScan)
            .with_env("A11Y_BASE_URL", base_url)
            .with_env("A11Y_PAGES", pages),
        Command::Serve { run, port } => run.options(TaskKind::Serve).with_host_port(port),
    };

    let result = dispatcher.dispatch(&options).await?;
    Ok(exit_status(result))
}

fn exit_status(result: RunResult) -> ExitStatus {
    if result.interrupted {
        ExitStatus::Interrupted
    } else {
        ExitStatus::Task(result.exit_code)
    }
}

/// A failure after the user interrupted is reported as the interrupt
fn error_status(error: &anyhow::Error, interrupt: &Interrupt) -> ExitStatus {
    let cancelled = matches!(
        error.downcast_ref::<ContainerError>(),
        Some(ContainerError::Interrupted)
    );
    if cancelled || interrupt.is_requested() {
        ExitStatus::Interrupted
    } else {
        ExitStatus::Failure
    }
}

fn guard() -> ExitStatus {
    let env: HashMap<String, String> = std::env::vars().collect();
    if is_container_context(&env) {
        ExitStatus::Success
    } else {
        eprintln!("{}", refusal_message());
        ExitStatus::Usage
    }
}
