//! Retry policy for transient endpoint failures

use std::time::Duration;

use tracing::warn;

use crate::error::Result;

/// Backoff schedule for transient failures.
const BACKOFF: [Duration; 3] = [
    Duration::from_millis(500),
    Duration::from_secs(1),
    Duration::from_secs(2),
];

/// Run `op`, retrying up to three times on transient errors.
///
/// Permanent errors (authentication, permission denied, missing path)
/// surface immediately. The final transient error is returned once the
/// schedule is exhausted.
pub fn with_retry<T>(what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    for (attempt, delay) in BACKOFF.iter().enumerate() {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                warn!(
                    "Transient failure on {} (attempt {}): {}; retrying in {:?}",
                    what,
                    attempt + 1,
                    e,
                    delay
                );
                std::thread::sleep(*delay);
            }
            Err(e) => return Err(e),
        }
    }

    op().inspect_err(|e| warn!("Giving up on {} after retries: {}", what, e))
}
