//! `factory` command line.
//!
//! Drives a project's feature list through the engine and prints lifecycle
//! events to stdout. Diagnostics go to stderr via `RUST_LOG`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use factory::agents::claude::ClaudeCliProvider;
use factory::engine::{Engine, FeatureOutcome};
use factory::error::{AlreadyRunningError, LoopAlreadyRunningError};
use factory::events::{BroadcastSink, render};
use factory::exit_codes;
use factory::feature::FeatureStatus;
use factory::io::config::load_config;
use factory::io::feature_store::{load_features, update_feature_status};
use factory::io::init::{FactoryPaths, InitOptions, init_factory};

#[derive(Parser)]
#[command(
    name = "factory",
    version,
    about = "Autonomous feature factory: implement and verify a feature backlog with a delegate agent"
)]
struct Cli {
    /// Project directory containing `.factory/`.
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.factory/` with an empty feature list and default config.
    Init {
        /// Overwrite an existing feature list and config.
        #[arg(short, long)]
        force: bool,
    },
    /// Print features in file order with their status.
    List,
    /// Implement one feature now.
    Run { id: String },
    /// Verify one implemented feature.
    Verify { id: String },
    /// Continue one feature from its execution log.
    Resume { id: String },
    /// Work through the backlog until every feature is verified (Ctrl-C stops).
    Loop,
    /// Set a feature's status (the status-update channel for delegates).
    UpdateStatus { id: String, status: FeatureStatus },
}

fn main() {
    factory::logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<AlreadyRunningError>().is_some()
        || err.downcast_ref::<LoopAlreadyRunningError>().is_some()
    {
        exit_codes::ALREADY_RUNNING
    } else {
        exit_codes::INVALID
    }
}

fn run(cli: Cli) -> Result<i32> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    runtime.block_on(dispatch(cli))
}

async fn dispatch(cli: Cli) -> Result<i32> {
    let root = cli.project;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::List => cmd_list(&root).await,
        Command::Run { id } => cmd_execute(&root, |engine| async move { engine.run_feature(&id).await }).await,
        Command::Verify { id } => {
            cmd_execute(&root, |engine| async move { engine.verify_feature(&id).await }).await
        }
        Command::Resume { id } => {
            cmd_execute(&root, |engine| async move { engine.resume_feature(&id).await }).await
        }
        Command::Loop => cmd_loop(&root).await,
        Command::UpdateStatus { id, status } => cmd_update_status(&root, &id, status).await,
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_factory(root, &InitOptions { force })?;
    println!("initialized {}", paths.factory_dir.display());
    Ok(exit_codes::OK)
}

async fn cmd_list(root: &Path) -> Result<i32> {
    let paths = FactoryPaths::new(root);
    for feature in load_features(&paths).await {
        println!("{:<12} {}  {}", feature.status, feature.id, feature.description);
    }
    Ok(exit_codes::OK)
}

async fn cmd_update_status(root: &Path, id: &str, status: FeatureStatus) -> Result<i32> {
    let paths = FactoryPaths::new(root);
    let feature = update_feature_status(&paths, id, status).await?;
    println!("Feature {} status set to {}", feature.id, feature.status);
    Ok(exit_codes::OK)
}

/// Engine wired to the `claude` CLI provider plus a task printing its events.
struct Session {
    engine: Engine,
    printer: JoinHandle<()>,
}

impl Session {
    fn open(root: &Path) -> Result<Self> {
        let paths = FactoryPaths::new(root);
        let config = load_config(&paths.config_path)
            .with_context(|| format!("load {}", paths.config_path.display()))?;
        let provider = Arc::new(ClaudeCliProvider::from_config(&config.agent));
        let sink = Arc::new(BroadcastSink::new(1024));
        let printer = spawn_printer(&sink);
        let engine = Engine::new(root, config, provider, sink);
        Ok(Self { engine, printer })
    }

    /// Drop the engine (closing the event channel) and wait for the printer to drain.
    async fn close(self) {
        drop(self.engine);
        if let Err(err) = self.printer.await {
            warn!(err = %err, "event printer failed");
        }
    }
}

fn spawn_printer(sink: &BroadcastSink) -> JoinHandle<()> {
    let mut rx = sink.subscribe();
    tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let _ = write!(stdout, "{}", render(&event));
                    let _ = stdout.flush();
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn cmd_execute<F, Fut>(root: &Path, execute: F) -> Result<i32>
where
    F: FnOnce(Engine) -> Fut,
    Fut: std::future::Future<Output = Result<FeatureOutcome>>,
{
    let session = Session::open(root)?;
    let outcome = execute(session.engine.clone()).await;
    session.close().await;
    let outcome = outcome?;
    println!(
        "{}: {} (status {})",
        outcome.feature_id,
        if outcome.passes { "passed" } else { "not passed" },
        outcome.status
    );
    Ok(if outcome.passes {
        exit_codes::OK
    } else {
        exit_codes::NOT_PASSED
    })
}

async fn cmd_loop(root: &Path) -> Result<i32> {
    let session = Session::open(root)?;
    let handle = session.engine.start_loop()?;

    let engine = session.engine.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping loop");
            engine.stop_loop();
        }
    });

    let joined = handle.join().await;
    interrupt.abort();
    let _ = interrupt.await;
    session.close().await;
    joined?;
    Ok(exit_codes::OK)
}
