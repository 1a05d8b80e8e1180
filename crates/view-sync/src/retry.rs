//! Bounded retry of transport calls

use std::future::Future;
use std::time::Duration;

use proven_group_transport::GroupTransportError;
use tracing::warn;

use crate::error::{Error, Result};

/// Run `call` up to `attempts` times, sleeping `delay` between attempts.
///
/// Only transient ("try again") errors are retried; any other error is
/// returned immediately. Running out of attempts yields
/// `Error::RetriesExhausted`.
pub(crate) async fn with_retry<T, E, F, Fut>(
    operation: &'static str,
    attempts: usize,
    delay: Duration,
    mut call: F,
) -> Result<T>
where
    E: GroupTransportError,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let mut last = String::new();

    for attempt in 1..=attempts {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                warn!(
                    "{} attempt {}/{} failed: {}",
                    operation, attempt, attempts, e
                );
                last = e.to_string();
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(e) => return Err(Error::transport(&e)),
        }
    }

    Err(Error::RetriesExhausted {
        operation,
        attempts,
        last,
    })
}
