//! In-flight execution bookkeeping.
//!
//! The registry owns the map from feature id to live execution. Registering is
//! the exclusive claim on a feature: while a claim exists no other execution
//! for that id can start, which is what keeps feature-list rewrites and
//! execution-log appends for one id from interleaving.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::agents::provider::CancelToken;
use crate::core::types::{ExecutionMode, Phase};
use crate::error::AlreadyRunningError;

/// Caller-supplied description of an execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionMeta {
    pub project_path: PathBuf,
    pub mode: ExecutionMode,
}

/// Point-in-time view of a registered execution.
#[derive(Debug, Clone)]
pub struct ExecutionSnapshot {
    pub feature_id: String,
    pub meta: ExecutionMeta,
    pub phase: Option<Phase>,
    /// A delegate call is in flight (its cancellation token is populated).
    pub stream_active: bool,
}

#[derive(Debug)]
struct Execution {
    serial: u64,
    meta: ExecutionMeta,
    phase: Option<Phase>,
    cancel: Option<CancelToken>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    next_serial: u64,
    entries: HashMap<String, Execution>,
}

/// Shared handle to the registry. Clones refer to the same map.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `feature_id`. Fails if an execution for it is already registered.
    ///
    /// The entry is removed when the returned claim is dropped, so every exit
    /// path of the execution (success, error, cancellation, panic) cleans up.
    pub fn register(
        &self,
        feature_id: &str,
        meta: ExecutionMeta,
    ) -> Result<ExecutionClaim, AlreadyRunningError> {
        let mut inner = self.lock();
        if inner.entries.contains_key(feature_id) {
            return Err(AlreadyRunningError {
                feature_id: feature_id.to_string(),
            });
        }
        inner.next_serial += 1;
        let serial = inner.next_serial;
        debug!(feature_id, mode = %meta.mode, serial, "execution registered");
        inner.entries.insert(
            feature_id.to_string(),
            Execution {
                serial,
                meta,
                phase: None,
                cancel: None,
            },
        );
        Ok(ExecutionClaim {
            registry: self.clone(),
            feature_id: feature_id.to_string(),
            serial,
        })
    }

    pub fn get(&self, feature_id: &str) -> Option<ExecutionSnapshot> {
        self.lock()
            .entries
            .get(feature_id)
            .map(|execution| ExecutionSnapshot {
                feature_id: feature_id.to_string(),
                meta: execution.meta.clone(),
                phase: execution.phase,
                stream_active: execution.cancel.is_some(),
            })
    }

    pub fn contains(&self, feature_id: &str) -> bool {
        self.lock().entries.contains_key(feature_id)
    }

    /// Trigger the execution's cancellation token.
    ///
    /// Returns false (and does nothing) if the id is not registered or its
    /// delegate call has not started yet.
    pub fn cancel(&self, feature_id: &str) -> bool {
        let inner = self.lock();
        match inner.entries.get(feature_id).and_then(|e| e.cancel.as_ref()) {
            Some(token) => {
                info!(feature_id, "cancelling execution");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the entry for `feature_id` regardless of who registered it.
    pub fn unregister(&self, feature_id: &str) {
        if self.lock().entries.remove(feature_id).is_some() {
            debug!(feature_id, "execution unregistered");
        }
    }

    /// Cancel every execution and clear the registry. Returns how many were removed.
    pub fn stop_all(&self) -> usize {
        let drained: Vec<(String, Execution)> = self.lock().entries.drain().collect();
        for (feature_id, execution) in &drained {
            if let Some(token) = &execution.cancel {
                token.cancel();
            }
            info!(feature_id = %feature_id, "execution stopped");
        }
        drained.len()
    }

    /// Ids of all registered executions, sorted.
    pub fn running_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_own_entry<R>(&self, feature_id: &str, serial: u64, f: impl FnOnce(&mut Execution) -> R) -> Option<R> {
        let mut inner = self.lock();
        inner
            .entries
            .get_mut(feature_id)
            .filter(|execution| execution.serial == serial)
            .map(f)
    }
}

/// Proof of registration for one execution, handed to the state machine for
/// the duration of its run.
///
/// Each claim only ever touches the entry it created: after `stop_all` or
/// `unregister` a new execution may register the same id, and the old claim
/// must not disturb it.
#[derive(Debug)]
pub struct ExecutionClaim {
    registry: ExecutionRegistry,
    feature_id: String,
    serial: u64,
}

impl ExecutionClaim {
    pub fn feature_id(&self) -> &str {
        &self.feature_id
    }

    /// False once the entry was removed (stopped or unregistered externally).
    pub fn is_active(&self) -> bool {
        self.registry
            .with_own_entry(&self.feature_id, self.serial, |_| ())
            .is_some()
    }

    pub fn set_phase(&self, phase: Phase) {
        self.registry
            .with_own_entry(&self.feature_id, self.serial, |execution| {
                execution.phase = Some(phase);
            });
    }

    /// Publish the token of the delegate call that is about to start.
    ///
    /// Returns false if the entry is already gone; the caller should not start
    /// the call then.
    pub fn attach_cancel(&self, token: CancelToken) -> bool {
        self.registry
            .with_own_entry(&self.feature_id, self.serial, |execution| {
                execution.cancel = Some(token);
            })
            .is_some()
    }

    /// Clear the token once the delegate call has ended.
    pub fn detach_cancel(&self) {
        self.registry
            .with_own_entry(&self.feature_id, self.serial, |execution| {
                execution.cancel = None;
            });
    }
}

impl Drop for ExecutionClaim {
    fn drop(&mut self) {
        let mut inner = self.registry.lock();
        let own = inner
            .entries
            .get(&self.feature_id)
            .is_some_and(|execution| execution.serial == self.serial);
        if own {
            inner.entries.remove(&self.feature_id);
            debug!(feature_id = %self.feature_id, "execution released");
        }
    }
}
