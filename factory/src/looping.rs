//! The autonomous loop: implement the first unverified feature, repeat.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::agents::provider::CancelToken;
use crate::core::selector::next_open_feature;
use crate::core::types::ExecutionMode;
use crate::engine::Engine;
use crate::events::FactoryEvent;
use crate::io::feature_store::load_features;

/// Loop body spawned by [`Engine::start_loop`].
///
/// Exits when no unverified feature is left or when `cancel` fires. Failures
/// of one feature are reported and followed by a pause; they never end the loop.
pub(crate) async fn run_loop(engine: Engine, cancel: CancelToken) {
    let delays = engine.config().auto_loop.clone();
    let mut iteration = 0u64;
    while !cancel.is_cancelled() {
        iteration += 1;
        let features = load_features(engine.paths()).await;
        let Some(feature) = next_open_feature(&features).cloned() else {
            info!(iteration, "no unverified features left");
            engine.emit(FactoryEvent::LoopComplete {
                message: "All features verified".to_string(),
            });
            return;
        };

        let claim = match engine.claim(&feature.id, ExecutionMode::Implement) {
            Ok(claim) => claim,
            Err(err) => {
                debug!(feature_id = %feature.id, err = %err, "feature busy, waiting");
                if !pause(&cancel, delays.busy_delay()).await {
                    break;
                }
                continue;
            }
        };

        let feature_id = feature.id.clone();
        let delay = match engine.run_claimed(claim, feature, ExecutionMode::Implement).await {
            Ok(outcome) => {
                info!(iteration, feature_id = %outcome.feature_id, passes = outcome.passes, "loop iteration finished");
                delays.delay()
            }
            Err(err) => {
                warn!(iteration, feature_id = %feature_id, err = %format!("{err:#}"), "loop iteration failed");
                engine.emit(FactoryEvent::error(format!("{err:#}"), Some(&feature_id)));
                delays.error_delay()
            }
        };
        if !pause(&cancel, delay).await {
            break;
        }
    }
    info!(iteration, "auto loop stopped");
}

/// Sleep for `duration` unless cancelled first. Returns false on cancellation.
async fn pause(cancel: &CancelToken, duration: Duration) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
