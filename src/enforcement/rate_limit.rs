//! Outbound mutation pacing
//!
//! Each mutation class gets its own single-lane queue. A call starts no sooner
//! than `delay` after the previous call in the same lane started, however fast
//! that call returned.

use std::future::Future;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Default spacing between mutations of one class
pub const DEFAULT_DELAY: Duration = Duration::from_millis(750);

/// Class of rate-limited remote mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum MutationClass {
    #[display("ban")]
    Ban,
    #[display("unban")]
    Unban,
}

/// FIFO pacer for one mutation class
#[derive(Debug)]
pub struct RateLimiter {
    delay: Duration,
    /// Start time of the last call; the lock is the queue
    last_start: Mutex<Option<Instant>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_DELAY)
    }
}

impl RateLimiter {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_start: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `f` once it is this call's turn
    ///
    /// Waiters are served in the order they called, and at most one `f` runs
    /// at a time.
    pub async fn execute<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut last_start = self.last_start.lock().await;
        if let Some(previous) = *last_start {
            tokio::time::sleep_until(previous + self.delay).await;
        }
        *last_start = Some(Instant::now());
        f().await
    }
}

/// One limiter per mutation class
#[derive(Debug)]
pub struct RateLimiters {
    ban: RateLimiter,
    unban: RateLimiter,
}

impl Default for RateLimiters {
    fn default() -> Self {
        Self::new(DEFAULT_DELAY)
    }
}

impl RateLimiters {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            ban: RateLimiter::new(delay),
            unban: RateLimiter::new(delay),
        }
    }

    #[must_use]
    pub fn get(&self, class: MutationClass) -> &RateLimiter {
        match class {
            MutationClass::Ban => &self.ban,
            MutationClass::Unban => &self.unban,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    fn recorder() -> Arc<StdMutex<Vec<(usize, Instant)>>> {
        Arc::new(StdMutex::new(Vec::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_are_spaced_and_ordered() {
        let limiter = RateLimiter::new(Duration::from_millis(750));
        let starts = recorder();

        let call = |n: usize| {
            let starts = Arc::clone(&starts);
            let limiter = &limiter;
            async move {
                limiter
                    .execute(|| async move {
                        starts.lock().unwrap().push((n, Instant::now()));
                        n
                    })
                    .await
            }
        };

        let (a, b, c) = tokio::join!(call(0), call(1), call(2));
        assert_eq!((a, b, c), (0, 1, 2));

        let starts = starts.lock().unwrap().clone();
        let order: Vec<usize> = starts.iter().map(|(n, _)| *n).collect();
        assert_eq!(order, vec![0, 1, 2]);
        for pair in starts.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= Duration::from_millis(750));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_spacing_counts_from_start_not_finish() {
        let limiter = RateLimiter::new(Duration::from_millis(750));
        let begin = Instant::now();

        // A slow call that outlasts the window lets the next one go immediately
        limiter
            .execute(|| tokio::time::sleep(Duration::from_secs(2)))
            .await;
        let second = limiter.execute(|| async { Instant::now() }).await;
        assert!(second - begin >= Duration::from_secs(2));
        assert!(second - begin < Duration::from_millis(2750));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_limiter_runs_immediately() {
        let limiter = RateLimiter::new(Duration::from_millis(750));
        limiter.execute(|| async {}).await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        let before = Instant::now();
        let started = limiter.execute(|| async { Instant::now() }).await;
        assert_eq!(started, before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_classes_do_not_block_each_other() {
        let limiters = RateLimiters::new(Duration::from_millis(750));
        let begin = Instant::now();
        limiters.get(MutationClass::Ban).execute(|| async {}).await;
        let unban_start = limiters
            .get(MutationClass::Unban)
            .execute(|| async { Instant::now() })
            .await;
        assert_eq!(unban_start, begin);
    }
}
