//! Configuration for view synchronisation

use std::time::Duration;

use crate::error::{Error, Result};

/// Tunables for the binding, channels and controllers
#[derive(Debug, Clone)]
pub struct ViewSyncConfig {
    /// Attempts for join and multicast when the transport says "try again"
    pub retry_attempts: usize,
    /// Delay between those attempts
    pub retry_delay: Duration,
    /// Attempts to read a non-zero local node id
    pub local_id_attempts: usize,
    /// Delay between local node id attempts
    pub local_id_retry_delay: Duration,
    /// How long shutdown waits for background tasks
    pub shutdown_timeout: Duration,
}

impl Default for ViewSyncConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay: Duration::from_millis(100),
            local_id_attempts: 10,
            local_id_retry_delay: Duration::from_millis(50),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl ViewSyncConfig {
    /// Set transport retry attempts and delay
    #[must_use]
    pub const fn with_retry(mut self, attempts: usize, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    /// Set local node id lookup attempts and delay
    #[must_use]
    pub const fn with_local_id_retry(mut self, attempts: usize, delay: Duration) -> Self {
        self.local_id_attempts = attempts;
        self.local_id_retry_delay = delay;
        self
    }

    /// Set the shutdown timeout
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Check the configuration is usable
    ///
    /// # Errors
    /// Returns an error if any attempt count is zero.
    pub fn validate(&self) -> Result<()> {
        if self.retry_attempts == 0 {
            return Err(Error::Configuration(
                "retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.local_id_attempts == 0 {
            return Err(Error::Configuration(
                "local_id_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
