//! Handler registry: which chaincodes are launching and which have a live handler.
//!
//! Keyed by canonical name (`name:version`). An entry is created by [`Registry::launching`], becomes ready
//! when the chaincode's handler registers, and disappears on [`Registry::deregister`]. The entry's
//! [`LaunchState`] is shared by every caller waiting on the same launch.
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use cclife_model::{CcContext, ChaincodeMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{HandlerError, RegistryError};

/// Live connection to a running chaincode.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Send one message and wait for the chaincode's answer.
    async fn execute(
        &self,
        ctx: &CancellationToken,
        cccid: &CcContext,
        msg: ChaincodeMessage,
    ) -> Result<ChaincodeMessage, HandlerError>;
}

/// Outcome of one launch, observed by every caller of that launch.
///
/// The first notification wins; later ones are ignored.
#[derive(Debug, Default)]
pub struct LaunchState {
    done: CancellationToken,
    outcome: Mutex<Option<Result<(), String>>>,
}

impl LaunchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome and wake all waiters.
    pub fn notify(&self, outcome: Result<(), String>) {
        {
            let mut slot = self.outcome.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_some() {
                return;
            }
            *slot = Some(outcome);
        }
        self.done.cancel();
    }

    /// Resolves once an outcome has been recorded.
    pub async fn wait(&self) {
        self.done.cancelled().await
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Failure reason, if the launch failed.
    pub fn err(&self) -> Option<String> {
        match &*self.outcome.lock().unwrap_or_else(|e| e.into_inner()) {
            Some(Err(reason)) => Some(reason.clone()),
            _ => None,
        }
    }
}

pub trait Registry: Send + Sync {
    /// Handler of a ready chaincode.
    fn handler(&self, name: &str) -> Option<Arc<dyn Handler>>;

    /// Mark `name` as launching.
    ///
    /// Returns the launch state and whether a launch was already in progress (or done).
    /// Only the caller that gets `false` starts the container.
    fn launching(&self, name: &str) -> Result<(Arc<LaunchState>, bool), RegistryError>;

    /// Register the handler of a started chaincode and complete its launch.
    fn ready(&self, name: &str, handler: Arc<dyn Handler>) -> Result<(), RegistryError>;

    /// Complete the launch of `name` with an error. The entry stays until deregistered.
    fn failed(&self, name: &str, reason: &str);

    /// Drop the entry of `name`. Waiters of an unfinished launch observe a failure.
    fn deregister(&self, name: &str) -> Result<(), RegistryError>;
}

struct Entry {
    state: Arc<LaunchState>,
    handler: Option<Arc<dyn Handler>>,
}

/// In-memory [`Registry`].
pub struct HandlerRegistry {
    allow_unsolicited: bool,
    closed: AtomicBool,
    entries: Mutex<HashMap<String, Entry>>,
}

impl HandlerRegistry {
    /// `allow_unsolicited` accepts handlers of chaincodes this peer did not launch (developer mode).
    pub fn new(allow_unsolicited: bool) -> Self {
        Self {
            allow_unsolicited,
            closed: AtomicBool::new(false),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Refuse new launches. Existing handlers stay usable.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_launching(&self, name: &str) -> bool {
        self.entries()
            .get(name)
            .is_some_and(|e| e.handler.is_none() && !e.state.is_done())
    }

    /// Names with a ready handler, sorted.
    pub fn ready_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .entries()
            .iter()
            .filter(|(_, e)| e.handler.is_some())
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Registry for HandlerRegistry {
    fn handler(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.entries().get(name).and_then(|e| e.handler.clone())
    }

    fn launching(&self, name: &str) -> Result<(Arc<LaunchState>, bool), RegistryError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RegistryError::Closed);
        }
        let mut entries = self.entries();
        if let Some(entry) = entries.get(name) {
            trace!(name, "launch already in progress");
            return Ok((Arc::clone(&entry.state), true));
        }
        let state = Arc::new(LaunchState::new());
        entries.insert(
            name.to_string(),
            Entry {
                state: Arc::clone(&state),
                handler: None,
            },
        );
        debug!(name, "chaincode launching");
        Ok((state, false))
    }

    fn ready(&self, name: &str, handler: Arc<dyn Handler>) -> Result<(), RegistryError> {
        let mut entries = self.entries();
        match entries.get_mut(name) {
            Some(entry) if entry.handler.is_some() => Err(RegistryError::Duplicate(name.to_string())),
            Some(entry) if entry.state.err().is_some() => {
                Err(RegistryError::LaunchFailed(name.to_string()))
            }
            Some(entry) => {
                entry.handler = Some(handler);
                entry.state.notify(Ok(()));
                debug!(name, "chaincode handler ready");
                Ok(())
            }
            None if self.allow_unsolicited => {
                let state = Arc::new(LaunchState::new());
                state.notify(Ok(()));
                entries.insert(
                    name.to_string(),
                    Entry {
                        state,
                        handler: Some(handler),
                    },
                );
                debug!(name, "unsolicited chaincode handler accepted");
                Ok(())
            }
            None => {
                warn!(name, "rejecting handler of a chaincode that was not launched");
                Err(RegistryError::Unsolicited(name.to_string()))
            }
        }
    }

    fn failed(&self, name: &str, reason: &str) {
        match self.entries().get(name) {
            Some(entry) => entry.state.notify(Err(reason.to_string())),
            None => debug!(name, "no launch to fail"),
        }
    }

    fn deregister(&self, name: &str) -> Result<(), RegistryError> {
        let entry = self
            .entries()
            .remove(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        entry.state.notify(Err(format!("chaincode {name} deregistered")));
        debug!(name, "chaincode deregistered");
        Ok(())
    }
}
