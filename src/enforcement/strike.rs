//! Per-guild strike counter
//!
//! A guild moves from unstruck to strike 1, then only ever forward. Each step
//! writes exactly one log row and hands off to the notification dispatcher
//! before returning.

use crate::enforcement::metrics::{MetricEvent, MetricsCollector};
use crate::enforcement::model::{Actor, PerformanceSample, StrikeSnapshot};
use crate::enforcement::notify::{DeliveryReport, Incident, NotificationDispatcher};
use crate::enforcement::platform::Platform;
use crate::enforcement::silence::SilenceGuard;
use crate::enforcement::store::Store;
use crate::enforcement::EnforcementResult;
use crate::ENFORCEMENT_TARGET;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Log action written for every increment
pub const STRIKE_ADDED: &str = "STRIKE_ADDED";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrikeOutcome {
    Recorded {
        strike_id: u64,
        count: u64,
        delivery: DeliveryReport,
    },
    /// The guild is silenced; nothing was written
    Skipped,
}

impl StrikeOutcome {
    #[must_use]
    pub fn count(&self) -> Option<u64> {
        match self {
            Self::Recorded { count, .. } => Some(*count),
            Self::Skipped => None,
        }
    }
}

pub struct StrikeEngine {
    platform: Arc<dyn Platform>,
    store: Arc<dyn Store>,
    silence: SilenceGuard,
    notifier: Arc<NotificationDispatcher>,
    metrics: Arc<dyn MetricsCollector>,
}

impl StrikeEngine {
    pub fn new(
        platform: Arc<dyn Platform>,
        store: Arc<dyn Store>,
        silence: SilenceGuard,
        notifier: Arc<NotificationDispatcher>,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Self {
        Self {
            platform,
            store,
            silence,
            notifier,
            metrics,
        }
    }

    /// Record one unban of blacklisted `user_id` in `guild_id`
    pub async fn add_strike(
        &self,
        guild_id: u64,
        user_id: u64,
        actor: Actor,
    ) -> EnforcementResult<StrikeOutcome> {
        if self.silence.is_silenced(guild_id).await {
            debug!(target: ENFORCEMENT_TARGET, guild_id, "Guild is silenced, no strike");
            return Ok(StrikeOutcome::Skipped);
        }
        let started = Instant::now();

        let guild_name = self
            .platform
            .guild_name(guild_id)
            .await
            .unwrap_or_else(|| "Unknown Guild".to_string());
        let blacklist_reason = match self.store.get_user(user_id).await {
            Ok(entry) => entry.map(|e| e.reason),
            Err(e) => {
                warn!(user_id, error = %e, "Could not read blacklist reason");
                None
            }
        };

        let record = self
            .store
            .increment_strike(
                guild_id,
                StrikeSnapshot {
                    guild_name,
                    user_id,
                    actor: actor.clone(),
                },
            )
            .await?;
        self.store
            .append_strike_log(
                &record,
                STRIKE_ADDED,
                &format!(
                    "Strike #{} - Unban attempt by {} on {user_id}",
                    record.count, actor.name
                ),
            )
            .await?;
        info!(
            target: ENFORCEMENT_TARGET,
            event = "strike",
            guild_id,
            user_id,
            strike = record.count,
            actor = %actor.name,
            actor_type = %actor.kind,
            "Strike added"
        );

        let delivery = self
            .notifier
            .notify(&Incident {
                guild_id,
                user_id,
                actor,
                strike: record.count,
                blacklist_reason,
            })
            .await;

        self.metrics.record(MetricEvent::StrikeIssued);
        if let Err(e) = self
            .store
            .append_performance(PerformanceSample::new("strike", started.elapsed()))
            .await
        {
            warn!(error = %e, "Failed to record performance sample");
        }

        Ok(StrikeOutcome::Recorded {
            strike_id: record.id,
            count: record.count,
            delivery,
        })
    }
}
