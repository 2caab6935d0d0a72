//! Runtime counters
//!
//! Components receive a collector explicitly instead of touching process-wide
//! state, so tests can observe exactly what a single engine did.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Something worth counting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricEvent {
    BanExecuted,
    UnbanExecuted,
    StrikeIssued,
    Success,
    Error,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub bans_executed: u64,
    pub unbans_executed: u64,
    pub strikes_issued: u64,
    pub successes: u64,
    pub errors: u64,
    pub uptime: Duration,
}

pub trait MetricsCollector: Send + Sync {
    fn record(&self, event: MetricEvent);

    fn snapshot(&self) -> MetricsSnapshot;
}

/// Atomic counter set
#[derive(Debug)]
pub struct PerformanceCounters {
    started: Instant,
    bans_executed: AtomicU64,
    unbans_executed: AtomicU64,
    strikes_issued: AtomicU64,
    successes: AtomicU64,
    errors: AtomicU64,
}

impl Default for PerformanceCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceCounters {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            bans_executed: AtomicU64::new(0),
            unbans_executed: AtomicU64::new(0),
            strikes_issued: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }
}

impl MetricsCollector for PerformanceCounters {
    fn record(&self, event: MetricEvent) {
        let counter = match event {
            MetricEvent::BanExecuted => &self.bans_executed,
            MetricEvent::UnbanExecuted => &self.unbans_executed,
            MetricEvent::StrikeIssued => &self.strikes_issued,
            MetricEvent::Success => &self.successes,
            MetricEvent::Error => &self.errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bans_executed: self.bans_executed.load(Ordering::Relaxed),
            unbans_executed: self.unbans_executed.load(Ordering::Relaxed),
            strikes_issued: self.strikes_issued.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            uptime: self.started.elapsed(),
        }
    }
}

/// Render a duration the way operators read it: "3d 4h", "12m 5s"
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    let minutes = seconds / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("{days}d {}h", hours % 24)
    } else if hours > 0 {
        format!("{hours}h {}m", minutes % 60)
    } else if minutes > 0 {
        format!("{minutes}m {}s", seconds % 60)
    } else {
        format!("{seconds}s")
    }
}
