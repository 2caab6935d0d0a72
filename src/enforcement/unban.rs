//! Reaction to a lifted ban
//!
//! When a blacklisted user is unbanned in an eligible guild the engine works
//! out who did it, bans the user again and charges the guild a strike. The
//! re-ban and the strike are independent: one failing never stops the other.

use crate::enforcement::metrics::{MetricEvent, MetricsCollector};
use crate::enforcement::model::{Actor, ActorType};
use crate::enforcement::platform::{AuditEntry, Platform};
use crate::enforcement::rate_limit::{MutationClass, RateLimiters};
use crate::enforcement::silence::SilenceGuard;
use crate::enforcement::store::Store;
use crate::enforcement::strike::{StrikeEngine, StrikeOutcome};
use crate::enforcement::{EnforcementResult, EnforcementSettings, POLICY_TAG};
use crate::ENFORCEMENT_TARGET;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Mod log action for a circumvention attempt
pub const UNBAN_ATTEMPT: &str = "UNBAN_ATTEMPT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum IgnoreReason {
    #[display("exempt guild")]
    Exempt,
    #[display("silenced guild")]
    Silenced,
    #[display("user not blacklisted")]
    NotBlacklisted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnbanOutcome {
    Ignored(IgnoreReason),
    Enforced {
        actor: Actor,
        rebanned: bool,
        /// `None` when the strike could not be written
        strike: Option<StrikeOutcome>,
    },
}

pub struct UnbanListener {
    platform: Arc<dyn Platform>,
    store: Arc<dyn Store>,
    silence: SilenceGuard,
    limiters: Arc<RateLimiters>,
    strikes: Arc<StrikeEngine>,
    metrics: Arc<dyn MetricsCollector>,
    settings: Arc<EnforcementSettings>,
}

impl UnbanListener {
    pub fn new(
        platform: Arc<dyn Platform>,
        store: Arc<dyn Store>,
        silence: SilenceGuard,
        limiters: Arc<RateLimiters>,
        strikes: Arc<StrikeEngine>,
        metrics: Arc<dyn MetricsCollector>,
        settings: Arc<EnforcementSettings>,
    ) -> Self {
        Self {
            platform,
            store,
            silence,
            limiters,
            strikes,
            metrics,
            settings,
        }
    }

    /// Handle a ban removal for `user_id` in `guild_id`
    ///
    /// Fails only if the blacklist itself cannot be read.
    pub async fn on_unban_detected(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> EnforcementResult<UnbanOutcome> {
        if self.settings.is_exempt(guild_id) {
            debug!(target: ENFORCEMENT_TARGET, guild_id, user_id, "Exempt guild, ignoring unban");
            return Ok(UnbanOutcome::Ignored(IgnoreReason::Exempt));
        }
        if self.silence.is_silenced(guild_id).await {
            debug!(target: ENFORCEMENT_TARGET, guild_id, user_id, "Silenced guild, ignoring unban");
            return Ok(UnbanOutcome::Ignored(IgnoreReason::Silenced));
        }

        tokio::time::sleep(self.settings.settle_delay).await;

        if self.store.get_user(user_id).await?.is_none() {
            debug!(guild_id, user_id, "Unbanned user is not blacklisted");
            return Ok(UnbanOutcome::Ignored(IgnoreReason::NotBlacklisted));
        }
        info!(
            target: ENFORCEMENT_TARGET,
            event = "unban_detected",
            guild_id,
            user_id,
            "Blacklisted user was unbanned"
        );

        let actor = self.attribute(guild_id, user_id).await;
        let rebanned = self.reban(guild_id, user_id, &actor).await;

        let guild_name = self
            .platform
            .guild_name(guild_id)
            .await
            .unwrap_or_else(|| "Unknown Guild".to_string());
        if let Err(e) = self
            .store
            .append_mod_log(
                user_id,
                UNBAN_ATTEMPT,
                &format!(
                    "Server: {guild_name} ({guild_id}) | By: {} | Type: {}",
                    actor.name, actor.kind
                ),
            )
            .await
        {
            warn!(user_id, error = %e, "Failed to write unban attempt to mod log");
        }

        let strike = match self.strikes.add_strike(guild_id, user_id, actor.clone()).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(guild_id, user_id, error = %e, "Failed to add strike");
                None
            }
        };

        Ok(UnbanOutcome::Enforced {
            actor,
            rebanned,
            strike,
        })
    }

    /// Find the account behind the unban in the guild's audit trail
    async fn attribute(&self, guild_id: u64, user_id: u64) -> Actor {
        let window = chrono::Duration::from_std(self.settings.audit_window)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        let since = Utc::now() - window;

        let entries = match self.platform.unban_audit_entries(guild_id, since).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(guild_id, error = %e, "Failed to fetch audit log");
                return Actor::unknown();
            }
        };

        let executor = entries
            .into_iter()
            .filter(|entry| entry.target_id == Some(user_id) && entry.created_at > since)
            .max_by_key(|entry| entry.created_at)
            .and_then(|entry: AuditEntry| entry.executor);

        match executor {
            Some(identity) => Actor {
                name: identity.tag,
                id: Some(identity.id),
                kind: if identity.bot {
                    ActorType::Bot
                } else {
                    ActorType::User
                },
            },
            None => {
                debug!(guild_id, user_id, "No matching audit entry for unban");
                Actor::unknown()
            }
        }
    }

    /// Paced, single-attempt re-ban
    async fn reban(&self, guild_id: u64, user_id: u64, actor: &Actor) -> bool {
        let reason = format!("{POLICY_TAG} Re-ban after unban attempt by {}", actor.name);
        let platform = Arc::clone(&self.platform);
        let result = self
            .limiters
            .get(MutationClass::Ban)
            .execute(|| async move { platform.ban(guild_id, user_id, &reason).await })
            .await;

        match result {
            Ok(()) => {
                self.metrics.record(MetricEvent::BanExecuted);
                info!(target: ENFORCEMENT_TARGET, guild_id, user_id, "Re-banned user");
                true
            }
            Err(e) => {
                self.metrics.record(MetricEvent::Error);
                error!(guild_id, user_id, error = %e, "Failed to re-ban user");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enforcement::model::{GuildBlacklistEntry, UserBlacklistEntry};
    use crate::enforcement::notify::OwnerDelivery;
    use crate::enforcement::{RemoteError, RemoteErrorKind};
    use crate::testing::{Call, FakePlatform, harness};
    use tokio::time::Duration;

    const GUILD: u64 = 10;
    const OWNER: u64 = 900;
    const CHANNEL: u64 = 77;
    const HUMAN: u64 = 500;
    const BOT: u64 = 600;
    const USER: u64 = 42;

    fn platform() -> FakePlatform {
        FakePlatform::new()
            .with_guild(GUILD, "Gamma")
            .with_owner(GUILD, OWNER)
            .with_channel(GUILD, CHANNEL)
            .with_user(USER, "offender", false)
            .with_user(HUMAN, "moderator", false)
            .with_user(BOT, "helper-bot", true)
    }

    async fn blacklisted(h: &crate::testing::Harness) {
        h.store
            .upsert_user(UserBlacklistEntry::new(USER, "raiding", 1))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_human_unban_is_rebanned_and_struck() {
        let h = harness(platform(), EnforcementSettings::default());
        blacklisted(&h).await;
        h.platform.close_dms(OWNER);
        h.platform.push_audit(GUILD, USER, Some(HUMAN), Utc::now());

        let outcome = h
            .service
            .unban_listener()
            .on_unban_detected(GUILD, USER)
            .await
            .unwrap();

        let UnbanOutcome::Enforced {
            actor,
            rebanned,
            strike,
        } = outcome
        else {
            panic!("unban should be enforced");
        };
        assert_eq!(actor.kind, ActorType::User);
        assert_eq!(actor.id, Some(HUMAN));
        assert!(rebanned);
        assert!(h.platform.banned_in(GUILD).contains(&USER));

        let Some(StrikeOutcome::Recorded {
            count, delivery, ..
        }) = strike
        else {
            panic!("strike should be recorded");
        };
        assert_eq!(count, 1);
        assert!(delivery.actor_warned);
        assert_eq!(delivery.owner, OwnerDelivery::Fallback);
        assert_eq!(h.store.get_strike(GUILD).await.unwrap().unwrap().count, 1);

        assert_eq!(h.platform.dms_to(HUMAN).len(), 1);
        let posts = h.platform.posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].1, Some(OWNER));

        let logs = h.store.mod_logs(USER, 50).await.unwrap();
        assert_eq!(logs[0].action, UNBAN_ATTEMPT);
        assert_eq!(
            logs[0].details,
            "Server: Gamma (10) | By: moderator | Type: user"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_bot_unban_gets_no_actor_warning() {
        let h = harness(platform(), EnforcementSettings::default());
        blacklisted(&h).await;
        h.platform.push_audit(GUILD, USER, Some(BOT), Utc::now());

        let outcome = h
            .service
            .unban_listener()
            .on_unban_detected(GUILD, USER)
            .await
            .unwrap();

        let UnbanOutcome::Enforced { actor, rebanned, strike } = outcome else {
            panic!("unban should be enforced");
        };
        assert_eq!(actor.kind, ActorType::Bot);
        assert!(rebanned);
        assert_eq!(strike.and_then(|s| s.count()), Some(1));
        assert!(h.platform.dms_to(BOT).is_empty());
        assert_eq!(h.platform.dms_to(OWNER).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unattributed_unban_is_unknown() {
        let h = harness(platform(), EnforcementSettings::default());
        blacklisted(&h).await;
        // entry for another target and a stale one for ours
        h.platform.push_audit(GUILD, USER + 1, Some(HUMAN), Utc::now());
        h.platform.push_audit(
            GUILD,
            USER,
            Some(HUMAN),
            Utc::now() - chrono::Duration::minutes(5),
        );

        let outcome = h
            .service
            .unban_listener()
            .on_unban_detected(GUILD, USER)
            .await
            .unwrap();

        let UnbanOutcome::Enforced { actor, .. } = outcome else {
            panic!("unban should be enforced");
        };
        assert_eq!(actor, Actor::unknown());
        assert!(h.platform.dms_to(HUMAN).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reban_still_records_strike() {
        let h = harness(platform(), EnforcementSettings::default());
        blacklisted(&h).await;
        h.platform.always_fail(
            GUILD,
            USER,
            RemoteError::new(RemoteErrorKind::MissingPermissions, "Missing Permissions"),
        );

        let outcome = h
            .service
            .unban_listener()
            .on_unban_detected(GUILD, USER)
            .await
            .unwrap();

        let UnbanOutcome::Enforced { rebanned, strike, .. } = outcome else {
            panic!("unban should be enforced");
        };
        assert!(!rebanned);
        assert_eq!(strike.and_then(|s| s.count()), Some(1));
        // single attempt, no retry
        assert_eq!(h.platform.ban_attempt_times(GUILD, USER).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silenced_and_exempt_guilds_are_ignored() {
        let settings = EnforcementSettings {
            exempt_guilds: [GUILD + 1].into_iter().collect(),
            ..EnforcementSettings::default()
        };
        let h = harness(platform().with_guild(GUILD + 1, "Exempt"), settings);
        blacklisted(&h).await;
        h.store
            .insert_guild(GuildBlacklistEntry::new(GUILD, "abuse", 1))
            .await
            .unwrap();

        let silenced = h
            .service
            .unban_listener()
            .on_unban_detected(GUILD, USER)
            .await
            .unwrap();
        let exempt = h
            .service
            .unban_listener()
            .on_unban_detected(GUILD + 1, USER)
            .await
            .unwrap();

        assert_eq!(silenced, UnbanOutcome::Ignored(IgnoreReason::Silenced));
        assert_eq!(exempt, UnbanOutcome::Ignored(IgnoreReason::Exempt));
        assert!(h.platform.calls().is_empty());
        assert!(h.store.get_strike(GUILD).await.unwrap().is_none());
        assert!(h.store.mod_logs(USER, 50).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_audit_trail_to_settle() {
        let h = harness(platform(), EnforcementSettings::default());
        blacklisted(&h).await;

        let started = tokio::time::Instant::now();
        h.service
            .unban_listener()
            .on_unban_detected(GUILD, USER)
            .await
            .unwrap();

        let first_query = h
            .platform
            .calls()
            .iter()
            .position(|c| matches!(c, Call::AuditQuery { .. }));
        assert!(first_query.is_some());
        assert!(started.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbanned_non_blacklisted_user_is_ignored() {
        let h = harness(platform(), EnforcementSettings::default());

        let outcome = h
            .service
            .unban_listener()
            .on_unban_detected(GUILD, USER)
            .await
            .unwrap();

        assert_eq!(outcome, UnbanOutcome::Ignored(IgnoreReason::NotBlacklisted));
        assert_eq!(h.platform.ban_count(), 0);
    }
}
