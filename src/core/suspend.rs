use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Cooperative suspension handle for a workflow run.
///
/// Wraps a [`CancellationToken`] with a reason and an optional suspend
/// payload. The token is the single cancellation channel: the runner polls
/// it at step boundaries, and step bodies may observe it to return early.
/// Steps that never check it simply run to completion.
#[derive(Clone)]
pub struct SuspendController {
    token: CancellationToken,
    reason: Arc<RwLock<Option<String>>>,
    payload: Arc<RwLock<Option<Value>>>,
}

impl SuspendController {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(RwLock::new(None)),
            payload: Arc::new(RwLock::new(None)),
        }
    }

    /// Request suspension with an optional human-readable reason.
    pub fn suspend(&self, reason: Option<&str>) {
        if let Some(reason) = reason {
            *self.reason.write() = Some(reason.to_string());
        }
        self.token.cancel();
    }

    /// Request suspension carrying a payload to be validated against the
    /// workflow's suspend schema.
    pub fn suspend_with_data(&self, reason: Option<&str>, data: Value) {
        *self.payload.write() = Some(data);
        self.suspend(reason);
    }

    /// Whether suspension has been requested.
    pub fn is_suspended(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    pub(crate) fn take_payload(&self) -> Option<Value> {
        self.payload.write().take()
    }

    /// The abort signal handed to step bodies.
    pub fn signal(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Resolves once suspension is requested.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}

impl Default for SuspendController {
    fn default() -> Self {
        Self::new()
    }
}

/// Factory for callers that want to suspend a run they are about to start.
pub fn create_suspend_controller() -> SuspendController {
    SuspendController::new()
}
