//! Bounded immediate-retry wrapper shared by voice-channel establishment
//! and doorbell notification.

use std::fmt::Display;

/// Invoke `action` until it succeeds or `max_attempts` invocations have
/// failed, retrying immediately with no backoff. Every failed attempt is
/// logged at warning level; the last error is returned on exhaustion and the
/// caller decides whether that is fatal.
pub fn with_attempts<T, E: Display>(
    what: &str,
    max_attempts: u32,
    mut action: impl FnMut() -> Result<T, E>,
) -> Result<T, E> {
    debug_assert!(max_attempts > 0);
    for attempt in 1..=max_attempts {
        match action() {
            Ok(value) => return Ok(value),
            Err(err) => {
                tracing::warn!(
                    "{} failed (attempt {}/{}): {}",
                    what,
                    attempt,
                    max_attempts,
                    err
                );
                if attempt == max_attempts {
                    return Err(err);
                }
            }
        }
    }
    unreachable!("attempt budget is at least one")
}
