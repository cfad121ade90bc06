use std::{
    fmt,
    future::Future,
    num::NonZeroU32,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use backon::{ConstantBuilder, Retryable as _};
use tracing::{debug, error, warn};

/// Fixed-delay retry budget for a single probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: NonZeroU32,
    delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_attempts: NonZeroU32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    #[must_use]
    pub const fn max_attempts(&self) -> NonZeroU32 {
        self.max_attempts
    }

    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }
}

#[derive(Debug, thiserror::Error)]
#[error("retry budget exhausted after {attempts} attempts: {source}")]
pub struct RetryExhausted<E> {
    attempts: u32,
    #[source]
    source: E,
}

impl<E> RetryExhausted<E> {
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub const fn last_error(&self) -> &E {
        &self.source
    }

    #[must_use]
    pub fn into_last_error(self) -> E {
        self.source
    }
}

/// Invokes `probe` until it succeeds or the policy runs out of attempts,
/// sleeping `policy.delay()` between a failure and the next attempt.
///
/// Attempts never overlap. The first success is returned as is; after the
/// last failed attempt the error of that attempt is returned.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, mut probe: F) -> Result<T, RetryExhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let max_attempts = policy.max_attempts.get();
    let backoff = ConstantBuilder::default()
        .with_delay(policy.delay)
        .with_max_times(usize::try_from(max_attempts - 1).unwrap_or(usize::MAX));
    let attempts = AtomicU32::new(0);

    let outcome = (|| {
        let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(attempt, max_attempts, "running probe");
        probe()
    })
    .retry(backoff)
    .notify(|source: &E, delay: Duration| {
        warn!(
            attempt = attempts.load(Ordering::Relaxed),
            max_attempts,
            %source,
            "probe failed, trying again in {delay:?}"
        );
    })
    .await;

    let attempts = attempts.load(Ordering::Relaxed);
    outcome.map_err(|source| {
        error!(attempts, max_attempts, %source, "probe failed, no attempts left");
        RetryExhausted { attempts, source }
    })
}
