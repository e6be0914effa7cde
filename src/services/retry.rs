use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoff;
use tracing::{debug, warn};

use crate::db::store::StoreError;

/// Bounded exponential backoff with jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Delay schedule for one retried operation. The attempt bound is
    /// enforced by the caller, so there is no elapsed-time cutoff.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.base_delay,
            initial_interval: self.base_delay,
            max_interval: self.max_delay,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }
}

/// Outcome of a compare-and-swap loop that did not commit.
#[derive(Debug)]
pub enum CasFailure<E> {
    /// The operation itself rejected the current state.
    Rejected(E),
    /// Every attempt lost its race.
    Exhausted { attempts: u32 },
    Store(StoreError),
}

/// Runs `attempt` until it succeeds, rejects, or has lost `max_attempts`
/// races. An attempt loses a race when it returns
/// `Err(CasStep::Store(StoreError::PreconditionFailed))`; it restarts from
/// its own reads.
pub async fn run_cas<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut attempt: F,
) -> Result<T, CasFailure<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CasStep<E>>>,
{
    let max_attempts = policy.max_attempts;
    let mut tries = 0;
    backoff::future::retry_notify(
        policy.backoff(),
        || {
            tries += 1;
            let current = tries;
            let pending = attempt();
            async move {
                match pending.await {
                    Ok(value) => Ok(value),
                    Err(CasStep::Reject(err)) => {
                        Err(backoff::Error::permanent(CasFailure::Rejected(err)))
                    }
                    Err(CasStep::Store(err)) if err.is_conflict() => {
                        if current >= max_attempts {
                            warn!(operation, attempts = current, "write conflict, giving up");
                            Err(backoff::Error::permanent(CasFailure::Exhausted { attempts: current }))
                        } else {
                            Err(backoff::Error::transient(CasFailure::Store(err)))
                        }
                    }
                    Err(CasStep::Store(err)) => Err(backoff::Error::permanent(CasFailure::Store(err))),
                }
            }
        },
        |_, delay: Duration| debug!(operation, ?delay, "write conflict, retrying"),
    )
    .await
}

/// Failure of a single CAS attempt.
#[derive(Debug)]
pub enum CasStep<E> {
    Reject(E),
    Store(StoreError),
}

impl<E> From<StoreError> for CasStep<E> {
    fn from(err: StoreError) -> Self {
        CasStep::Store(err)
    }
}
