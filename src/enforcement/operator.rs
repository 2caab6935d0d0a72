//! Operator actions and queries
//!
//! Everything the command layer can ask of the engine. Mutations here are
//! operator-initiated, so store failures propagate instead of being logged
//! away; audit-channel posts stay best-effort.

use crate::enforcement::metrics::{MetricsCollector, MetricsSnapshot};
use crate::enforcement::model::{
    GuildBlacklistEntry, ModLogEntry, StrikeLogEntry, StrikeRecord, UserBlacklistEntry,
};
use crate::enforcement::platform::{GuildInfo, Notice, Platform, Severity};
use crate::enforcement::reconcile::{LiftReport, ReconcileReport, Reconciler};
use crate::enforcement::silence::SilenceGuard;
use crate::enforcement::store::Store;
use crate::enforcement::{EnforcementError, EnforcementResult, EnforcementSettings};
use crate::ENFORCEMENT_TARGET;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Entries per listing page
pub const PAGE_SIZE: usize = 10;

/// Mod log rows shown per subject
pub const MOD_LOG_LIMIT: usize = 50;

pub const BLACKLISTED: &str = "BLACKLISTED";
pub const UNBLACKLISTED: &str = "UNBLACKLISTED";
pub const SERVER_BLACKLISTED: &str = "SERVER_BLACKLISTED";
pub const SERVER_UNBLACKLISTED: &str = "SERVER_UNBLACKLISTED";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlacklistReport {
    pub entry: UserBlacklistEntry,
    pub reconcile: ReconcileReport,
    /// Whether the blacklisted user was told
    pub dm_delivered: bool,
}

impl BlacklistReport {
    #[must_use]
    pub fn bans_applied(&self) -> usize {
        self.reconcile.bans_for(self.entry.user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnblacklistReport {
    pub entry: UserBlacklistEntry,
    pub lift: LiftReport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub entry: UserBlacklistEntry,
    /// Guilds where the user is banned right now
    pub banned_in: Vec<GuildInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrikeSummary {
    pub record: StrikeRecord,
    pub latest: Option<StrikeLogEntry>,
}

/// One page of a newest-first listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based, clamped to the last page
    pub page: usize,
    pub total_pages: usize,
    pub total: usize,
}

impl<T> Page<T> {
    fn slice(all: Vec<T>, page: usize) -> Self {
        let total = all.len();
        let total_pages = total.div_ceil(PAGE_SIZE).max(1);
        let page = page.clamp(1, total_pages);
        let items = all
            .into_iter()
            .skip((page - 1) * PAGE_SIZE)
            .take(PAGE_SIZE)
            .collect();
        Self {
            items,
            page,
            total_pages,
            total,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionStats {
    pub action: String,
    pub count: usize,
    pub average_ms: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceReport {
    pub snapshot: MetricsSnapshot,
    /// Last 24 hours, sorted by action name
    pub actions: Vec<ActionStats>,
}

pub struct Operator {
    platform: Arc<dyn Platform>,
    store: Arc<dyn Store>,
    silence: SilenceGuard,
    reconciler: Arc<Reconciler>,
    metrics: Arc<dyn MetricsCollector>,
    settings: Arc<EnforcementSettings>,
}

impl Operator {
    pub fn new(
        platform: Arc<dyn Platform>,
        store: Arc<dyn Store>,
        silence: SilenceGuard,
        reconciler: Arc<Reconciler>,
        metrics: Arc<dyn MetricsCollector>,
        settings: Arc<EnforcementSettings>,
    ) -> Self {
        Self {
            platform,
            store,
            silence,
            reconciler,
            metrics,
            settings,
        }
    }

    /// Add or replace a user's blacklist entry and enforce it everywhere
    pub async fn blacklist_user(
        &self,
        user_id: u64,
        reason: &str,
        by: u64,
    ) -> EnforcementResult<BlacklistReport> {
        let entry = UserBlacklistEntry::new(user_id, reason, by);
        self.store.upsert_user(entry.clone()).await?;
        self.store
            .append_mod_log(user_id, BLACKLISTED, &format!("Reason: {reason} | By: {by}"))
            .await?;
        info!(target: ENFORCEMENT_TARGET, event = "blacklist_user", user_id, by, "User blacklisted");

        let reconcile = self.reconciler.reconcile().await?;
        let bans_applied = reconcile.bans_for(user_id);

        let mut notice = Notice::new("Global Blacklist Notice", Severity::Critical)
            .description("You have been globally blacklisted from the network.")
            .field("Reason", reason, false)
            .field("Bans Applied", format!("{bans_applied} server(s)"), true);
        if !self.settings.appeal_link.is_empty() {
            notice = notice.field(
                "Appeal",
                format!(
                    "If you believe this was a mistake, you can appeal at:\n{}",
                    self.settings.appeal_link
                ),
                false,
            );
        }
        let dm_delivered = match self.platform.direct_message(user_id, &notice).await {
            Ok(()) => true,
            Err(e) => {
                info!(user_id, error = %e, "Could not DM blacklisted user");
                false
            }
        };

        self.audit(
            Notice::new("User Blacklisted", Severity::Critical)
                .description(format!("<@{user_id}> has been blacklisted globally"))
                .field("User ID", user_id.to_string(), true)
                .field("Reason", reason, true)
                .field("Moderator", format!("<@{by}>"), true)
                .field("Bans Applied", bans_applied.to_string(), true)
                .field("DM Status", if dm_delivered { "Sent" } else { "Failed" }, true),
        )
        .await;

        Ok(BlacklistReport {
            entry,
            reconcile,
            dm_delivered,
        })
    }

    /// Remove a user from the blacklist and lift the bans it caused
    pub async fn unblacklist_user(
        &self,
        user_id: u64,
        reason: &str,
        by: u64,
    ) -> EnforcementResult<UnblacklistReport> {
        let entry = self
            .store
            .remove_user(user_id)
            .await?
            .ok_or(EnforcementError::NotBlacklisted(user_id))?;
        self.store
            .append_mod_log(user_id, UNBLACKLISTED, &format!("Reason: {reason} | By: {by}"))
            .await?;
        info!(target: ENFORCEMENT_TARGET, event = "unblacklist_user", user_id, by, "User unblacklisted");

        let lift = self.reconciler.lift(user_id, "Removed from global blacklist").await;

        self.audit(
            Notice::new("User Unblacklisted", Severity::Success)
                .description(format!("<@{user_id}> has been removed from the blacklist"))
                .field("User ID", user_id.to_string(), true)
                .field("Reason", reason, true)
                .field("Moderator", format!("<@{by}>"), true)
                .field("Unbanned In", format!("{} server(s)", lift.unbanned.len()), true),
        )
        .await;

        Ok(UnblacklistReport { entry, lift })
    }

    /// Put a guild under total silence; the process stays in it
    pub async fn blacklist_guild(
        &self,
        guild_id: u64,
        reason: &str,
        by: u64,
    ) -> EnforcementResult<GuildBlacklistEntry> {
        let entry = GuildBlacklistEntry::new(guild_id, reason, by);
        if !self.store.insert_guild(entry.clone()).await? {
            return Err(EnforcementError::AlreadyBlacklisted(guild_id));
        }
        self.store
            .append_mod_log(
                guild_id,
                SERVER_BLACKLISTED,
                &format!("Reason: {reason} | By: {by}"),
            )
            .await?;
        info!(target: ENFORCEMENT_TARGET, event = "blacklist_guild", guild_id, by, "Guild blacklisted");

        let name = self.guild_label(guild_id).await;
        self.audit(
            Notice::new("Server Blacklisted", Severity::Critical)
                .description(format!("Server **{name}** ({guild_id}) has been blacklisted"))
                .field("Server ID", guild_id.to_string(), true)
                .field("Reason", reason, true)
                .field("Moderator", format!("<@{by}>"), true),
        )
        .await;

        Ok(entry)
    }

    pub async fn unblacklist_guild(
        &self,
        guild_id: u64,
        reason: &str,
        by: u64,
    ) -> EnforcementResult<GuildBlacklistEntry> {
        let entry = self
            .store
            .remove_guild(guild_id)
            .await?
            .ok_or(EnforcementError::NotBlacklisted(guild_id))?;
        self.store
            .append_mod_log(
                guild_id,
                SERVER_UNBLACKLISTED,
                &format!("Reason: {reason} | By: {by}"),
            )
            .await?;
        info!(target: ENFORCEMENT_TARGET, event = "unblacklist_guild", guild_id, by, "Guild unblacklisted");

        let name = self.guild_label(guild_id).await;
        self.audit(
            Notice::new("Server Unblacklisted", Severity::Success)
                .description(format!("Server **{name}** ({guild_id}) has been removed from the blacklist"))
                .field("Server ID", guild_id.to_string(), true)
                .field("Reason", reason, true)
                .field("Moderator", format!("<@{by}>"), true),
        )
        .await;

        Ok(entry)
    }

    /// Look up a user and the guilds currently banning them
    pub async fn search(&self, user_id: u64) -> EnforcementResult<Option<SearchResult>> {
        let Some(entry) = self.store.get_user(user_id).await? else {
            return Ok(None);
        };
        let mut banned_in = Vec::new();
        for guild in self.platform.guilds().await {
            if self.silence.is_silenced(guild.id).await {
                continue;
            }
            match self.platform.bans(guild.id).await {
                Ok(bans) if bans.contains(&user_id) => banned_in.push(guild),
                Ok(_) => {}
                Err(e) => warn!(guild_id = guild.id, error = %e, "Could not fetch ban list"),
            }
        }
        Ok(Some(SearchResult { entry, banned_in }))
    }

    /// Strike state for a guild; a silenced guild reports nothing
    pub async fn strikes(&self, guild_id: u64) -> EnforcementResult<Option<StrikeSummary>> {
        if self.silence.is_silenced(guild_id).await {
            return Ok(None);
        }
        let Some(record) = self.store.get_strike(guild_id).await? else {
            return Ok(None);
        };
        let latest = self.store.strike_logs(record.id).await?.into_iter().next();
        Ok(Some(StrikeSummary { record, latest }))
    }

    pub async fn users_page(&self, page: usize) -> EnforcementResult<Page<UserBlacklistEntry>> {
        Ok(Page::slice(self.store.list_users().await?, page))
    }

    pub async fn guilds_page(&self, page: usize) -> EnforcementResult<Page<GuildBlacklistEntry>> {
        Ok(Page::slice(self.store.list_guilds().await?, page))
    }

    pub async fn mod_logs(&self, subject_id: u64) -> EnforcementResult<Vec<ModLogEntry>> {
        Ok(self.store.mod_logs(subject_id, MOD_LOG_LIMIT).await?)
    }

    /// Counters plus per-action timings over the last day
    pub async fn performance(&self) -> EnforcementResult<PerformanceReport> {
        let samples = self
            .store
            .performance_since(Utc::now() - ChronoDuration::hours(24))
            .await?;

        let mut totals: BTreeMap<String, (usize, u64)> = BTreeMap::new();
        for sample in samples {
            let (count, sum) = totals.entry(sample.action).or_default();
            *count += 1;
            *sum += sample.duration_ms;
        }
        #[allow(clippy::cast_precision_loss)]
        let actions = totals
            .into_iter()
            .map(|(action, (count, sum))| ActionStats {
                action,
                count,
                average_ms: sum as f64 / count as f64,
            })
            .collect();

        Ok(PerformanceReport {
            snapshot: self.metrics.snapshot(),
            actions,
        })
    }

    async fn guild_label(&self, guild_id: u64) -> String {
        self.platform
            .guild_name(guild_id)
            .await
            .unwrap_or_else(|| "Unknown".to_string())
    }

    async fn audit(&self, notice: Notice) {
        if let Err(e) = self.platform.audit_log(&notice).await {
            warn!(title = %notice.title, error = %e, "Failed to post audit notice");
        }
    }
}
