//! Write-once result handle shared between a caller and the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::InferenceError;

/// Final outcome of one request
pub type Outcome = Result<String, InferenceError>;

/// Write-once container a caller waits on
///
/// Clones share the same slot. The first `resolve` wins; every later one is a
/// no-op, so the dispatcher can resolve after a caller has given up.
#[derive(Clone, Debug)]
pub struct ResultHandle {
    slot: Arc<watch::Sender<Option<Outcome>>>,
}

impl ResultHandle {
    /// A handle nobody has resolved yet
    pub fn pending() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { slot: Arc::new(tx) }
    }

    /// A handle that is already resolved
    pub fn resolved(outcome: Outcome) -> Self {
        let (tx, _rx) = watch::channel(Some(outcome));
        Self { slot: Arc::new(tx) }
    }

    /// Resolve the handle unless it already is
    ///
    /// Returns `true` only for the call that actually resolved it.
    pub fn resolve(&self, outcome: Outcome) -> bool {
        let mut outcome = Some(outcome);
        self.slot.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = outcome.take();
            true
        })
    }

    pub fn is_resolved(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Outcome without waiting, if there is one
    pub fn try_outcome(&self) -> Option<Outcome> {
        self.slot.borrow().clone()
    }

    /// Wait until the handle is resolved
    pub async fn wait(&self) -> Outcome {
        let mut rx = self.slot.subscribe();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone(),
            // The sender lives inside `self`, so the channel cannot close
            Err(_) => None,
        };
        outcome.unwrap_or(Err(InferenceError::Shutdown))
    }

    /// Wait at most `timeout`, failing with `CallerTimeout` when it elapses
    ///
    /// The handle stays pending for whoever resolves it later.
    pub async fn wait_timeout(&self, timeout: Duration) -> Outcome {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(InferenceError::CallerTimeout { timeout }),
        }
    }
}
