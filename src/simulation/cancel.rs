//! Cooperative cancellation of in-flight simulations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::ExecutionError;
use crate::node::NodeId;

/// Shared flag that asks in-flight simulations to stop.
///
/// Clones observe the same flag. Work checks it before each node and between
/// trial chunks, so a cancelled resolve stops at the next checkpoint.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fails with `Cancelled` for `node_id` once cancellation was requested.
    pub fn check(&self, node_id: &NodeId) -> Result<(), ExecutionError> {
        if self.is_cancelled() {
            return Err(ExecutionError::Cancelled {
                node_id: node_id.clone(),
            });
        }
        Ok(())
    }
}
