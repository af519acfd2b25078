//! Retrying transient random source failures

use bleid_core::{IdentityError, Result, RetryPolicy};
use tracing::{debug, warn};

/// Call `attempt` until it succeeds, fails permanently, or `policy` is spent
///
/// Only transient errors are retried, sleeping the policy's backoff between
/// attempts. Exhausting the policy yields `AddressGenerationFailed`.
pub(crate) async fn retry_transient<T, F>(policy: &RetryPolicy, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut made = 0;
    loop {
        made += 1;
        match attempt() {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) if made >= max_attempts => {
                warn!("Giving up after {} attempts: {}", made, err);
                return Err(IdentityError::AddressGenerationFailed { attempts: made });
            }
            Err(err) => {
                let delay = policy.backoff_for(made);
                debug!("Attempt {} failed ({}), retrying in {:?}", made, err, delay);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
