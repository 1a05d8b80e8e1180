//! View safety gate
//!
//! Holds back senders and view readers while a view exchange is in flight.
//! The gate is either stable or changing; waiters resume as soon as it
//! returns to stable.

use tokio::sync::watch;
use tracing::warn;

/// Blocks sends and view reads during a view change.
#[derive(Debug)]
pub struct ViewSafetyGate {
    changing: watch::Sender<bool>,
}

impl Default for ViewSafetyGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewSafetyGate {
    /// Create a gate in the stable state
    #[must_use]
    pub fn new() -> Self {
        let (changing, _) = watch::channel(false);
        Self { changing }
    }

    /// Move from stable to changing.
    ///
    /// # Panics
    /// Panics if a view exchange is already in progress.
    pub fn start_view_exchange(&self) {
        let was_changing = self.changing.send_replace(true);
        assert!(!was_changing, "view exchange started while one is in progress");
    }

    /// Move back to stable and wake every waiter
    pub fn end_view_exchange(&self) {
        if !self.changing.send_replace(false) {
            warn!("view exchange ended while none was in progress");
        }
    }

    /// Whether a view exchange is in progress
    #[must_use]
    pub fn is_changing(&self) -> bool {
        *self.changing.borrow()
    }

    /// Wait until no view exchange is in progress
    pub async fn wait_for_view_change_end(&self) {
        let mut receiver = self.changing.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = receiver.wait_for(|changing| !*changing).await;
    }
}
