//! Cooldown-window retry
//!
//! After a transient failure every caller sharing the policy waits until the
//! cooldown has elapsed since the most recent failure, then tries again.
//! There is no attempt cap; an optional deadline bounds the total time spent
//! in one call. Permanent errors are returned immediately.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use crate::error::{DatastoreError, DatastoreResult};

pub const DEFAULT_RETRY_COOLDOWN: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    cooldown: Duration,
    deadline: Option<Duration>,
    last_failure: Arc<Mutex<Option<Instant>>>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_COOLDOWN, None)
    }
}

impl RetryPolicy {
    pub fn new(cooldown: Duration, deadline: Option<Duration>) -> Self {
        Self {
            cooldown,
            deadline,
            last_failure: Arc::new(Mutex::new(None)),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Run `attempt` until it succeeds or fails permanently
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> DatastoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DatastoreResult<T>>,
    {
        let started = Instant::now();
        loop {
            if let Some(resume_at) = self.resume_at() {
                tokio::time::sleep_until(resume_at).await;
            }

            match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    let now = Instant::now();
                    self.record_failure(now);

                    if let Some(deadline) = self.deadline {
                        if now.duration_since(started) + self.cooldown > deadline {
                            return Err(DatastoreError::DeadlineExceeded {
                                deadline,
                                last: Box::new(e),
                            });
                        }
                    }

                    warn!(
                        operation = %operation,
                        error = %e,
                        cooldown_ms = self.cooldown.as_millis() as u64,
                        "Transient datastore failure, retrying after cooldown"
                    );
                },
            }
        }
    }

    fn resume_at(&self) -> Option<Instant> {
        let last = *self.last_failure.lock().unwrap_or_else(PoisonError::into_inner);
        last.map(|at| at + self.cooldown)
            .filter(|resume_at| *resume_at > Instant::now())
    }

    fn record_failure(&self, at: Instant) {
        *self.last_failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(at);
    }
}
