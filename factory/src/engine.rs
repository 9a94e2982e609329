//! Per-project engine context.
//!
//! [`Engine`] owns the execution registry, the loop state and the event sink
//! for one project directory. Every entry point (direct run/verify/resume, the
//! auto loop, stop requests) goes through it, so the at-most-one-execution
//! rule holds across all of them. Clones share the same state.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::agents::provider::{AgentProvider, CancelToken};
use crate::core::transition::status_after_run;
use crate::core::types::ExecutionMode;
use crate::error::LoopAlreadyRunningError;
use crate::events::{EventSink, FactoryEvent};
use crate::feature::{Feature, FeatureStatus};
use crate::io::config::FactoryConfig;
use crate::io::execution_log;
use crate::io::feature_store::{current_status, find_feature, update_feature_status};
use crate::io::init::FactoryPaths;
use crate::looping::run_loop;
use crate::machine::FeatureMachine;
use crate::registry::{ExecutionClaim, ExecutionMeta, ExecutionRegistry};
use crate::supervisor;

/// What a finished execution reports to its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureOutcome {
    pub feature_id: String,
    /// False only when the execution was cancelled.
    pub success: bool,
    pub passes: bool,
    pub message: String,
    /// Status persisted at the end of the execution.
    pub status: FeatureStatus,
}

/// Snapshot returned by [`Engine::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    pub loop_running: bool,
    pub running_features: Vec<String>,
}

/// Handle to a spawned auto loop.
#[derive(Debug)]
pub struct LoopHandle {
    join: JoinHandle<()>,
}

impl LoopHandle {
    /// Wait until the loop task has exited (backlog exhausted or stopped).
    pub async fn join(self) -> Result<()> {
        self.join.await.context("join auto loop task")
    }
}

#[derive(Debug, Default)]
struct LoopState {
    /// Bumped on every start so a finishing loop only clears its own run.
    generation: u64,
    running: bool,
    cancel: Option<CancelToken>,
}

struct EngineInner {
    paths: FactoryPaths,
    config: FactoryConfig,
    provider: Arc<dyn AgentProvider>,
    sink: Arc<dyn EventSink>,
    registry: ExecutionRegistry,
    loop_state: Mutex<LoopState>,
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(
        root: impl Into<PathBuf>,
        config: FactoryConfig,
        provider: Arc<dyn AgentProvider>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                paths: FactoryPaths::new(root),
                config,
                provider,
                sink,
                registry: ExecutionRegistry::new(),
                loop_state: Mutex::new(LoopState::default()),
            }),
        }
    }

    pub fn paths(&self) -> &FactoryPaths {
        &self.inner.paths
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &ExecutionRegistry {
        &self.inner.registry
    }

    pub(crate) fn emit(&self, event: FactoryEvent) {
        self.inner.sink.emit(event);
    }

    /// Implement `feature_id` now, outside the loop.
    pub async fn run_feature(&self, feature_id: &str) -> Result<FeatureOutcome> {
        self.execute(feature_id, ExecutionMode::Implement).await
    }

    /// Check an implemented feature; failure leaves it `in_progress`.
    pub async fn verify_feature(&self, feature_id: &str) -> Result<FeatureOutcome> {
        self.execute(feature_id, ExecutionMode::Verify).await
    }

    /// Continue `feature_id` from its execution log with bounded retries.
    pub async fn resume_feature(&self, feature_id: &str) -> Result<FeatureOutcome> {
        self.execute(feature_id, ExecutionMode::Resume).await
    }

    /// Cancel one running execution. Returns false if it is not running or
    /// has not reached its delegate call yet.
    pub fn stop_feature(&self, feature_id: &str) -> bool {
        self.inner.registry.cancel(feature_id)
    }

    pub async fn has_context(&self, feature_id: &str) -> bool {
        execution_log::exists(&self.inner.paths, feature_id).await
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            loop_running: self.lock_loop().running,
            running_features: self.inner.registry.running_ids(),
        }
    }

    async fn execute(&self, feature_id: &str, mode: ExecutionMode) -> Result<FeatureOutcome> {
        let result = self.execute_direct(feature_id, mode).await;
        if let Err(err) = &result {
            error!(feature_id, %mode, err = %format!("{err:#}"), "execution failed");
            self.emit(FactoryEvent::error(format!("{err:#}"), Some(feature_id)));
        }
        result
    }

    async fn execute_direct(&self, feature_id: &str, mode: ExecutionMode) -> Result<FeatureOutcome> {
        let claim = self.claim(feature_id, mode)?;
        let feature = find_feature(&self.inner.paths, feature_id).await?;
        self.run_claimed(claim, feature, mode).await
    }

    pub(crate) fn claim(&self, feature_id: &str, mode: ExecutionMode) -> Result<ExecutionClaim> {
        let meta = ExecutionMeta {
            project_path: self.inner.paths.root.clone(),
            mode,
        };
        Ok(self.inner.registry.register(feature_id, meta)?)
    }

    /// Drive a claimed feature to completion and persist its status.
    ///
    /// The claim is released when this returns, on every path. A claim that was
    /// removed meanwhile (stopped) no longer owns the feature, so nothing is
    /// written for it.
    #[instrument(skip_all, fields(feature_id = %feature.id, mode = %mode))]
    pub(crate) async fn run_claimed(
        &self,
        claim: ExecutionClaim,
        feature: Feature,
        mode: ExecutionMode,
    ) -> Result<FeatureOutcome> {
        let paths = &self.inner.paths;
        self.emit(FactoryEvent::FeatureStart {
            feature_id: feature.id.clone(),
            mode,
            feature: feature.clone(),
        });
        let feature = update_feature_status(paths, &feature.id, FeatureStatus::InProgress).await?;

        let machine = FeatureMachine {
            paths,
            config: &self.inner.config,
            provider: self.inner.provider.as_ref(),
            sink: self.inner.sink.as_ref(),
        };
        let result = match mode {
            ExecutionMode::Implement | ExecutionMode::Verify => {
                machine.run(&claim, &feature, mode, None).await?
            }
            ExecutionMode::Resume => {
                let outcome = supervisor::resume(
                    &machine,
                    &claim,
                    &feature,
                    self.inner.config.resume.max_retries,
                )
                .await?;
                info!(attempts = outcome.attempts, decision = ?outcome.decision, "resume finished");
                outcome.result
            }
        };

        let status = if claim.is_active() {
            let current = find_feature(paths, &feature.id).await?.status;
            let status = status_after_run(mode, result.passes, current);
            if status != current {
                update_feature_status(paths, &feature.id, status).await?;
            }
            if status == FeatureStatus::Verified {
                // Delegate output after its status call can recreate the log.
                execution_log::delete(paths, &feature.id).await;
            }
            status
        } else {
            info!("execution was stopped, leaving the status to the next owner");
            current_status(paths, &feature.id)
                .await
                .unwrap_or(feature.status)
        };
        drop(claim);

        info!(passes = result.passes, aborted = result.aborted, %status, "execution finished");
        self.emit(FactoryEvent::FeatureComplete {
            feature_id: feature.id.clone(),
            passes: result.passes,
            message: result.message.clone(),
        });
        Ok(FeatureOutcome {
            feature_id: feature.id,
            success: !result.aborted,
            passes: result.passes,
            message: result.message,
            status,
        })
    }

    fn lock_loop(&self) -> MutexGuard<'_, LoopState> {
        self.inner
            .loop_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the auto loop on the current tokio runtime without waiting for it.
    pub fn start_loop(&self) -> Result<LoopHandle> {
        let (generation, cancel) = {
            let mut state = self.lock_loop();
            if state.running {
                return Err(LoopAlreadyRunningError.into());
            }
            state.generation += 1;
            state.running = true;
            let cancel = CancelToken::new();
            state.cancel = Some(cancel.clone());
            (state.generation, cancel)
        };
        info!(generation, "auto loop started");

        let body = tokio::spawn(run_loop(self.clone(), cancel));
        let engine = self.clone();
        let join = tokio::spawn(async move {
            if let Err(err) = body.await {
                error!(err = %err, "auto loop crashed");
                engine.emit(FactoryEvent::error(format!("auto loop crashed: {err}"), None));
                engine.stop_loop();
            }
            engine.finish_loop(generation);
        });
        Ok(LoopHandle { join })
    }

    /// Hard stop: clear the loop flag, cancel the loop and every registered
    /// execution, and empty the registry. Returns false if no loop was running.
    pub fn stop_loop(&self) -> bool {
        let (was_running, cancel) = {
            let mut state = self.lock_loop();
            let was_running = state.running;
            state.running = false;
            (was_running, state.cancel.take())
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        let stopped = self.inner.registry.stop_all();
        info!(was_running, stopped, "auto loop stopped");
        was_running
    }

    fn finish_loop(&self, generation: u64) {
        let mut state = self.lock_loop();
        if state.generation == generation && state.running {
            state.running = false;
            state.cancel = None;
        } else if state.generation != generation {
            debug!(generation, current = state.generation, "stale loop finished");
        }
    }
}
