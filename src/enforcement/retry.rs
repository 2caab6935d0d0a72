//! Retry layer for remote mutations
//!
//! Every attempt goes through the class rate limiter. Access-denied failures
//! stop immediately, an unban of someone who isn't banned counts as done, and
//! anything else is retried with exponential backoff.

use crate::enforcement::metrics::{MetricEvent, MetricsCollector};
use crate::enforcement::model::PerformanceSample;
use crate::enforcement::platform::Platform;
use crate::enforcement::rate_limit::{MutationClass, RateLimiters};
use crate::enforcement::store::Store;
use crate::enforcement::{RemoteError, RemoteErrorKind};
use std::future::Future;
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Attempts per mutation, including the first
pub const MAX_ATTEMPTS: u32 = 3;

/// Delay after the first failed attempt; doubles each time
pub const BASE_BACKOFF: Duration = Duration::from_millis(1000);

/// Wait before retrying after failed attempt number `attempt` (1-based)
#[must_use]
pub fn backoff_delay(attempt: u32) -> Duration {
    BASE_BACKOFF * 2u32.pow(attempt.saturating_sub(1))
}

/// A mutation that reached its goal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationSuccess {
    Applied,
    /// The remote state already matched, e.g. unbanning a non-banned user
    AlreadySatisfied,
}

/// A mutation that gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationFailure {
    /// Access denied; not retried
    Denied(RemoteError),
    /// Retryable failure on every attempt
    Exhausted(RemoteError),
}

/// Result of a retry-wrapped ban
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BanOutcome {
    Banned,
    Denied(RemoteError),
}

/// Executes remote mutations with pacing and bounded retry
#[derive(Clone)]
pub struct RetryExecutor {
    platform: Arc<dyn Platform>,
    limiters: Arc<RateLimiters>,
    store: Arc<dyn Store>,
    metrics: Arc<dyn MetricsCollector>,
}

impl RetryExecutor {
    pub fn new(
        platform: Arc<dyn Platform>,
        limiters: Arc<RateLimiters>,
        store: Arc<dyn Store>,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Self {
        Self {
            platform,
            limiters,
            store,
            metrics,
        }
    }

    /// Run `mutation` up to [`MAX_ATTEMPTS`] times
    pub async fn execute<F, Fut>(
        &self,
        class: MutationClass,
        mut mutation: F,
    ) -> Result<MutationSuccess, MutationFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), RemoteError>>,
    {
        let started = Instant::now();
        let limiter = self.limiters.get(class);

        let mut attempt = 1;
        loop {
            let error = match limiter.execute(&mut mutation).await {
                Ok(()) => {
                    self.record_success(class, started.elapsed()).await;
                    return Ok(MutationSuccess::Applied);
                }
                Err(e) => e,
            };
            self.metrics.record(MetricEvent::Error);

            if class == MutationClass::Unban && error.kind == RemoteErrorKind::UnknownBan {
                return Ok(MutationSuccess::AlreadySatisfied);
            }
            if error.kind.is_access_denied() {
                debug!(%class, %error, "Mutation denied, not retrying");
                return Err(MutationFailure::Denied(error));
            }
            if attempt >= MAX_ATTEMPTS {
                error!(%class, %error, "Mutation failed after {MAX_ATTEMPTS} attempts");
                return Err(MutationFailure::Exhausted(error));
            }

            let delay = backoff_delay(attempt);
            warn!(
                %class,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or_default(),
                %error,
                "Retrying mutation"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Ban with retry
    ///
    /// Access-denied comes back as [`BanOutcome::Denied`]; a transient failure
    /// that outlives every attempt is propagated as an error.
    pub async fn ban(
        &self,
        guild_id: u64,
        user_id: u64,
        reason: &str,
    ) -> Result<BanOutcome, RemoteError> {
        let platform = Arc::clone(&self.platform);
        let result = self
            .execute(MutationClass::Ban, || {
                let platform = Arc::clone(&platform);
                async move { platform.ban(guild_id, user_id, reason).await }
            })
            .await;

        match result {
            Ok(_) => Ok(BanOutcome::Banned),
            Err(MutationFailure::Denied(e)) => Ok(BanOutcome::Denied(e)),
            Err(MutationFailure::Exhausted(e)) => Err(e),
        }
    }

    /// Unban with retry; any failure collapses to `false`
    pub async fn unban(&self, guild_id: u64, user_id: u64, reason: &str) -> bool {
        let platform = Arc::clone(&self.platform);
        let result = self
            .execute(MutationClass::Unban, || {
                let platform = Arc::clone(&platform);
                async move { platform.unban(guild_id, user_id, reason).await }
            })
            .await;

        match result {
            Ok(_) => true,
            Err(MutationFailure::Denied(e) | MutationFailure::Exhausted(e)) => {
                warn!(guild_id, user_id, error = %e, "Unban failed");
                false
            }
        }
    }

    async fn record_success(&self, class: MutationClass, elapsed: Duration) {
        self.metrics.record(match class {
            MutationClass::Ban => MetricEvent::BanExecuted,
            MutationClass::Unban => MetricEvent::UnbanExecuted,
        });
        self.metrics.record(MetricEvent::Success);

        if let Err(e) = self
            .store
            .append_performance(PerformanceSample::new(class.to_string(), elapsed))
            .await
        {
            warn!(error = %e, "Failed to record performance sample");
        }
    }
}
