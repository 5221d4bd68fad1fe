use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Stops a running migration from dispatching further containers.
///
/// Containers already being migrated run to completion. Clones share state,
/// so a clone can be handed to another task and cancelled from there.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
