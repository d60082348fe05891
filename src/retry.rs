//! Bounded retry with a fixed inter-attempt delay.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

/// Run `op` up to `max_attempts` times, sleeping `delay` between attempts.
/// The last error propagates once attempts are exhausted. `max_attempts`
/// of zero is treated as one attempt.
pub fn retry<T, F>(max_attempts: u32, delay: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1u32;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(error) if attempt < max_attempts => {
                warn!(attempt, max_attempts, error = %error, "operation failed; retrying");
                thread::sleep(delay);
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
