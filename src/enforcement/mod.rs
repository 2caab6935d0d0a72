//! Blacklist enforcement engine
//!
//! Keeps the ban lists of every eligible guild in line with the global user
//! blacklist, punishes unbans of blacklisted users with per-guild strikes, and
//! leaves blacklisted guilds completely alone.

mod error;
pub mod metrics;
pub mod model;
pub mod notify;
pub mod operator;
pub mod platform;
pub mod rate_limit;
pub mod reconcile;
pub mod retry;
mod service;
pub mod silence;
pub mod store;
pub mod strike;
pub mod unban;

pub use error::{
    EnforcementError, EnforcementResult, RemoteError, RemoteErrorKind, StoreError, StoreResult,
};
pub use metrics::{MetricEvent, MetricsCollector, MetricsSnapshot, PerformanceCounters};
pub use model::{Actor, ActorType};
pub use platform::Platform;
pub use reconcile::ReconcileReport;
pub use service::EnforcementService;
pub use silence::SilenceGuard;
pub use store::{Store, YamlStore};
pub use strike::StrikeOutcome;
pub use unban::UnbanOutcome;

use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::oneshot;

/// Prefix for every ban reason the engine writes
pub const POLICY_TAG: &str = "[Sentinel]";

/// Runtime knobs the engine reads but never changes
#[derive(Debug, Clone)]
pub struct EnforcementSettings {
    pub exempt_guilds: HashSet<u64>,
    pub appeal_link: String,
    /// Minimum spacing between two mutations of the same class
    pub rate_limit_delay: Duration,
    /// Wait before reading the audit trail after an unban
    pub settle_delay: Duration,
    /// How old a matching audit entry may be
    pub audit_window: Duration,
    /// Treat a failed guild-blacklist lookup as silenced
    pub silence_on_store_error: bool,
}

impl Default for EnforcementSettings {
    fn default() -> Self {
        Self {
            exempt_guilds: HashSet::new(),
            appeal_link: String::new(),
            rate_limit_delay: rate_limit::DEFAULT_DELAY,
            settle_delay: Duration::from_millis(1000),
            audit_window: Duration::from_secs(30),
            silence_on_store_error: true,
        }
    }
}

impl EnforcementSettings {
    #[must_use]
    pub fn is_exempt(&self, guild_id: u64) -> bool {
        self.exempt_guilds.contains(&guild_id)
    }
}

/// Where a requested sweep sends its report
pub type SweepReply = oneshot::Sender<EnforcementResult<ReconcileReport>>;

/// Work items for the enforcement task
#[derive(Debug)]
pub enum EnforcementRequest {
    /// Run a full reconciliation sweep
    ///
    /// `reply` is dropped unanswered when a sweep is already running.
    Reconcile { reply: Option<SweepReply> },
    /// A ban was lifted somewhere
    UnbanDetected { guild_id: u64, user_id: u64 },
    /// Stop the enforcement task
    Shutdown,
}
