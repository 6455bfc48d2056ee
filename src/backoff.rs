//! Retry and throttle primitives for outbound polling.
//!
//! Two separate mechanisms live here. [`do_with_backoff`] retries a single
//! request on transport errors, sleeping between attempts. [`BackoffStore`]
//! remembers which targets keep failing across scheduler ticks so the
//! orchestrator can skip them until their next allowed attempt.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::{Request, Response};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::FetchError;
use crate::fetch::HttpClient;

pub const BASE_BACKOFF: Duration = Duration::from_secs(1);
pub const MAX_BACKOFF: Duration = Duration::from_secs(120);
pub const BACKOFF_FACTOR: u32 = 2;
pub const JITTER_FACTOR: f64 = 0.5;

/// Doubles `delay`, capped at [`MAX_BACKOFF`].
pub fn next_delay(delay: Duration) -> Duration {
    delay.saturating_mul(BACKOFF_FACTOR).min(MAX_BACKOFF)
}

/// Runs `attempt` until it succeeds, fails with a non-retryable error, runs out
/// of retries, or `cancel` fires.
///
/// `max_retries = 0` retries until cancelled. Cancellation is checked before
/// every attempt and raced against every sleep, never against an attempt in
/// flight.
pub async fn retry_with_backoff<T, F, Fut>(
    cancel: &CancellationToken,
    max_retries: u32,
    mut attempt: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut delay = BASE_BACKOFF;
    let mut retries = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let err = match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => err,
        };

        if max_retries > 0 && retries >= max_retries {
            return Err(FetchError::RetriesExhausted {
                attempts: retries + 1,
                source: Box::new(err),
            });
        }

        debug!(
            attempt = retries + 1,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Transport failure, backing off"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay);
        retries += 1;
    }
}

/// Executes `request`, retrying transport-level failures.
///
/// Non-2xx responses are returned as-is; status handling is the caller's job.
pub async fn do_with_backoff<C: HttpClient + ?Sized>(
    cancel: &CancellationToken,
    client: &C,
    request: Request,
    max_retries: u32,
) -> Result<Response, FetchError> {
    retry_with_backoff(cancel, max_retries, || {
        let attempt = request.try_clone();
        async move {
            let attempt = attempt.ok_or(FetchError::NotRetryable)?;
            client.execute(attempt).await.map_err(FetchError::transport)
        }
    })
    .await
}

#[derive(Debug, Clone, Copy)]
struct BackoffEntry {
    delay: Duration,
    next_retry_at: DateTime<Utc>,
}

/// Per-target throttle state carried across scheduler ticks.
#[derive(Debug, Default)]
pub struct BackoffStore {
    entries: RwLock<HashMap<u32, BackoffEntry>>,
}

impl BackoffStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Earliest time the target may be attempted again, if it is backing off.
    pub fn next_retry_at(&self, id: u32) -> Option<DateTime<Utc>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(&id).map(|e| e.next_retry_at)
    }

    /// Nominal delay without jitter.
    pub fn current_delay(&self, id: u32) -> Option<Duration> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(&id).map(|e| e.delay)
    }

    pub fn is_throttled(&self, id: u32, now: DateTime<Utc>) -> bool {
        self.next_retry_at(id).is_some_and(|at| at > now)
    }

    /// Records another failure: doubles the delay and pushes the next allowed
    /// attempt out by the delay plus up to 50% jitter, capped at [`MAX_BACKOFF`].
    pub fn update_backoff(&self, id: u32) {
        let now = Utc::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        let previous = entries.get(&id).map_or(BASE_BACKOFF, |e| e.delay);
        let delay = next_delay(previous);
        let wait = with_jitter(delay);
        let wait = TimeDelta::from_std(wait).unwrap_or(TimeDelta::seconds(MAX_BACKOFF.as_secs() as i64));

        entries.insert(
            id,
            BackoffEntry {
                delay,
                next_retry_at: now + wait,
            },
        );
    }

    /// Clears all state for `id`.
    pub fn reset_backoff(&self, id: u32) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(&id);
    }
}

fn with_jitter(delay: Duration) -> Duration {
    let jitter = delay.mul_f64(rand::random::<f64>() * JITTER_FACTOR);
    (delay + jitter).min(MAX_BACKOFF)
}
