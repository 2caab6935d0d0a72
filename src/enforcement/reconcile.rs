//! Blacklist reconciliation sweep
//!
//! Diffs the global user blacklist against each eligible guild's ban list and
//! bans whoever is missing. Running it again with nothing changed issues no
//! mutations, because already-banned pairs are skipped before any call.

use crate::enforcement::model::PerformanceSample;
use crate::enforcement::platform::{GuildInfo, Platform};
use crate::enforcement::retry::{BanOutcome, RetryExecutor};
use crate::enforcement::silence::SilenceGuard;
use crate::enforcement::store::Store;
use crate::enforcement::{EnforcementResult, EnforcementSettings, POLICY_TAG};
use crate::ENFORCEMENT_TARGET;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Why a guild or pair was left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum SkipReason {
    #[display("silenced")]
    Silenced,
    #[display("exempt")]
    Exempt,
    #[display("already banned")]
    AlreadyBanned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BannedEntry {
    pub user_id: u64,
    pub guild_id: u64,
    pub guild_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntry {
    pub user_id: u64,
    pub guild_id: u64,
    pub guild_name: String,
    pub reason: String,
}

/// A skipped guild (`user_id` is `None`) or a skipped pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub guild_id: u64,
    pub guild_name: String,
    pub user_id: Option<u64>,
    pub reason: SkipReason,
}

/// Aggregate result of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub banned: Vec<BannedEntry>,
    pub failed: Vec<FailedEntry>,
    pub skipped: Vec<SkippedEntry>,
}

impl ReconcileReport {
    /// Guild-level skip entry for `guild_id`, if any
    #[must_use]
    pub fn guild_skip(&self, guild_id: u64) -> Option<&SkippedEntry> {
        self.skipped
            .iter()
            .find(|s| s.guild_id == guild_id && s.user_id.is_none())
    }

    /// Bans applied to one user in this sweep
    #[must_use]
    pub fn bans_for(&self, user_id: u64) -> usize {
        self.banned.iter().filter(|b| b.user_id == user_id).count()
    }

    /// Short human summary with the first few failures
    #[must_use]
    pub fn summary(&self, max_failures: usize) -> String {
        let mut summary = format!(
            "Banned: {} | Failed: {} | Skipped: {}",
            self.banned.len(),
            self.failed.len(),
            self.skipped.len()
        );
        for failure in self.failed.iter().take(max_failures) {
            summary.push_str(&format!("\n• {}: {}", failure.guild_name, failure.reason));
        }
        if self.failed.len() > max_failures {
            summary.push_str(&format!(
                "\n...and {} more",
                self.failed.len() - max_failures
            ));
        }
        summary
    }
}

/// Result of lifting a user's bans after removal from the blacklist
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiftReport {
    pub unbanned: Vec<u64>,
    pub failed: Vec<u64>,
}

pub struct Reconciler {
    platform: Arc<dyn Platform>,
    store: Arc<dyn Store>,
    silence: SilenceGuard,
    retry: RetryExecutor,
    settings: Arc<EnforcementSettings>,
}

impl Reconciler {
    pub fn new(
        platform: Arc<dyn Platform>,
        store: Arc<dyn Store>,
        silence: SilenceGuard,
        retry: RetryExecutor,
        settings: Arc<EnforcementSettings>,
    ) -> Self {
        Self {
            platform,
            store,
            silence,
            retry,
            settings,
        }
    }

    /// Guild-level eligibility; the silence check always comes first
    async fn ineligible(&self, guild_id: u64) -> Option<SkipReason> {
        if self.silence.is_silenced(guild_id).await {
            return Some(SkipReason::Silenced);
        }
        if self.settings.is_exempt(guild_id) {
            return Some(SkipReason::Exempt);
        }
        None
    }

    /// Sweep every known guild
    ///
    /// Only a failure to read the blacklist itself aborts the sweep; every
    /// per-pair failure lands in [`ReconcileReport::failed`].
    pub async fn reconcile(&self) -> EnforcementResult<ReconcileReport> {
        let started = Instant::now();
        let sweep_id = Uuid::new_v4();
        let users = self.store.list_users().await?;
        let mut report = ReconcileReport::default();

        for guild in self.platform.guilds().await {
            if let Some(reason) = self.ineligible(guild.id).await {
                debug!(target: ENFORCEMENT_TARGET, %sweep_id, guild_id = guild.id, %reason, "Skipping guild");
                report.skipped.push(SkippedEntry {
                    guild_id: guild.id,
                    guild_name: guild.name.clone(),
                    user_id: None,
                    reason,
                });
                continue;
            }
            if users.is_empty() {
                continue;
            }

            let banned = self.current_bans(&guild).await;
            for user in &users {
                if banned.contains(&user.user_id) {
                    report.skipped.push(SkippedEntry {
                        guild_id: guild.id,
                        guild_name: guild.name.clone(),
                        user_id: Some(user.user_id),
                        reason: SkipReason::AlreadyBanned,
                    });
                    continue;
                }

                let reason = format!("{POLICY_TAG} {}", user.reason);
                match self.retry.ban(guild.id, user.user_id, &reason).await {
                    Ok(BanOutcome::Banned) => report.banned.push(BannedEntry {
                        user_id: user.user_id,
                        guild_id: guild.id,
                        guild_name: guild.name.clone(),
                    }),
                    Ok(BanOutcome::Denied(e)) => report.failed.push(FailedEntry {
                        user_id: user.user_id,
                        guild_id: guild.id,
                        guild_name: guild.name.clone(),
                        reason: e.to_string(),
                    }),
                    Err(e) => report.failed.push(FailedEntry {
                        user_id: user.user_id,
                        guild_id: guild.id,
                        guild_name: guild.name.clone(),
                        reason: format!("Failed after retries: {e}"),
                    }),
                }
            }
        }

        let elapsed = started.elapsed();
        if let Err(e) = self
            .store
            .append_performance(PerformanceSample::new("enforce_blacklist", elapsed))
            .await
        {
            warn!(error = %e, "Failed to record performance sample");
        }
        info!(
            target: ENFORCEMENT_TARGET,
            event = "reconcile",
            %sweep_id,
            banned = report.banned.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or_default(),
            "Blacklist enforcement completed"
        );
        Ok(report)
    }

    /// Unban `user_id` wherever the engine may act and the user is banned
    pub async fn lift(&self, user_id: u64, reason: &str) -> LiftReport {
        let mut report = LiftReport::default();
        for guild in self.platform.guilds().await {
            if self.silence.is_silenced(guild.id).await {
                continue;
            }
            let banned = match self.platform.bans(guild.id).await {
                Ok(banned) => banned,
                Err(e) => {
                    warn!(guild_id = guild.id, error = %e, "Could not fetch ban list for unban");
                    continue;
                }
            };
            if !banned.contains(&user_id) {
                continue;
            }
            if self.retry.unban(guild.id, user_id, reason).await {
                report.unbanned.push(guild.id);
            } else {
                report.failed.push(guild.id);
            }
        }
        info!(
            target: ENFORCEMENT_TARGET,
            event = "lift",
            user_id,
            unbanned = report.unbanned.len(),
            failed = report.failed.len(),
            "Lifted blacklist bans"
        );
        report
    }

    /// Ban list snapshot; an unreadable list counts as empty so bans are
    /// still attempted
    async fn current_bans(&self, guild: &GuildInfo) -> HashSet<u64> {
        match self.platform.bans(guild.id).await {
            Ok(banned) => banned,
            Err(e) => {
                warn!(
                    guild_id = guild.id,
                    guild = %guild.name,
                    error = %e,
                    "Could not fetch ban list, treating as empty"
                );
                HashSet::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enforcement::model::{GuildBlacklistEntry, UserBlacklistEntry};
    use crate::enforcement::{RemoteError, RemoteErrorKind};
    use crate::testing::{Call, FakePlatform, harness};

    const ALPHA: u64 = 100;
    const BRAVO: u64 = 200;
    const CHARLIE: u64 = 300;
    const USER: u64 = 42;

    fn platform() -> FakePlatform {
        FakePlatform::new()
            .with_guild(ALPHA, "Alpha")
            .with_guild(BRAVO, "Bravo")
            .with_owner(ALPHA, 9001)
            .with_channel(ALPHA, 1001)
    }

    #[tokio::test(start_paused = true)]
    async fn test_silenced_guild_is_skipped_and_untouched() {
        let h = harness(platform(), EnforcementSettings::default());
        h.store
            .insert_guild(GuildBlacklistEntry::new(ALPHA, "abuse", 1))
            .await
            .unwrap();
        h.store
            .upsert_user(UserBlacklistEntry::new(USER, "R", 1))
            .await
            .unwrap();

        let report = h.service.reconciler().reconcile().await.unwrap();

        assert_eq!(report.banned.len(), 1);
        assert_eq!(report.banned[0].guild_id, BRAVO);
        assert_eq!(
            report.guild_skip(ALPHA).map(|s| s.reason),
            Some(SkipReason::Silenced)
        );
        assert!(h.platform.banned_in(ALPHA).is_empty());
        assert!(h.platform.calls_touching(ALPHA).is_empty());
        assert!(h.platform.audit_logs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_sweep_issues_no_mutations() {
        let h = harness(platform(), EnforcementSettings::default());
        h.store
            .upsert_user(UserBlacklistEntry::new(USER, "R", 1))
            .await
            .unwrap();
        h.store
            .upsert_user(UserBlacklistEntry::new(USER + 1, "R2", 1))
            .await
            .unwrap();

        let first = h.service.reconciler().reconcile().await.unwrap();
        assert_eq!(first.banned.len(), 4);
        let bans_after_first = h.platform.ban_count();

        let second = h.service.reconciler().reconcile().await.unwrap();
        assert!(second.banned.is_empty());
        assert!(second.failed.is_empty());
        assert_eq!(second.skipped.len(), 4);
        assert!(
            second
                .skipped
                .iter()
                .all(|s| s.reason == SkipReason::AlreadyBanned)
        );
        assert_eq!(h.platform.ban_count(), bans_after_first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exempt_guild_is_skipped() {
        let settings = EnforcementSettings {
            exempt_guilds: [BRAVO].into_iter().collect(),
            ..EnforcementSettings::default()
        };
        let h = harness(platform(), settings);
        h.store
            .upsert_user(UserBlacklistEntry::new(USER, "R", 1))
            .await
            .unwrap();

        let report = h.service.reconciler().reconcile().await.unwrap();

        assert_eq!(
            report.guild_skip(BRAVO).map(|s| s.reason),
            Some(SkipReason::Exempt)
        );
        assert!(h.platform.banned_in(BRAVO).is_empty());
        assert!(h.platform.banned_in(ALPHA).contains(&USER));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_isolated_per_pair() {
        let h = harness(
            platform().with_guild(CHARLIE, "Charlie"),
            EnforcementSettings::default(),
        );
        h.store
            .upsert_user(UserBlacklistEntry::new(USER, "R", 1))
            .await
            .unwrap();
        h.store
            .upsert_user(UserBlacklistEntry::new(USER + 1, "R", 1))
            .await
            .unwrap();
        h.platform.always_fail(
            BRAVO,
            USER,
            RemoteError::new(RemoteErrorKind::MissingPermissions, "Missing Permissions"),
        );
        h.platform
            .always_fail(CHARLIE, USER + 1, RemoteError::transient("503"));

        let report = h.service.reconciler().reconcile().await.unwrap();

        // 3 guilds x 2 users, two of which fail
        assert_eq!(report.banned.len(), 4);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.skipped.len(), 0);
        assert!(h.platform.banned_in(BRAVO).contains(&(USER + 1)));
        assert!(h.platform.banned_in(CHARLIE).contains(&USER));
        assert!(h.platform.banned_in(ALPHA).contains(&USER));
        assert!(report.summary(5).contains("Bravo"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ban_reason_carries_policy_tag() {
        let h = harness(platform(), EnforcementSettings::default());
        h.store
            .upsert_user(UserBlacklistEntry::new(USER, "raiding", 1))
            .await
            .unwrap();

        h.service.reconciler().reconcile().await.unwrap();

        let reasons: Vec<String> = h
            .platform
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Ban { reason, .. } => Some(reason),
                _ => None,
            })
            .collect();
        assert_eq!(reasons.len(), 2);
        assert!(reasons.iter().all(|r| r == "[Sentinel] raiding"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_ban_list_still_attempts_bans() {
        let p = platform();
        p.fail_ban_list(BRAVO);
        let h = harness(p, EnforcementSettings::default());
        h.store
            .upsert_user(UserBlacklistEntry::new(USER, "R", 1))
            .await
            .unwrap();

        let report = h.service.reconciler().reconcile().await.unwrap();
        assert_eq!(report.bans_for(USER), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lift_skips_silenced_guilds() {
        let h = harness(platform(), EnforcementSettings::default());
        h.platform.set_banned(ALPHA, USER);
        h.platform.set_banned(BRAVO, USER);
        h.store
            .insert_guild(GuildBlacklistEntry::new(ALPHA, "abuse", 1))
            .await
            .unwrap();

        let report = h.service.reconciler().lift(USER, "appeal accepted").await;

        assert_eq!(report.unbanned, vec![BRAVO]);
        assert!(h.platform.banned_in(ALPHA).contains(&USER));
        assert!(!h.platform.banned_in(BRAVO).contains(&USER));
    }
}
