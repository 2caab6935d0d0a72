//! Discord implementation of the platform seams

use crate::enforcement::platform::{
    AuditEntry, GuildDirectory, GuildInfo, IdentityResolver, Messenger, Notice, Severity,
    UserIdentity,
};
use crate::enforcement::{RemoteError, RemoteErrorKind};
use crate::BOT_NAME;
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{
    Cache, ChannelId, ChannelType, CreateEmbed, CreateEmbedFooter, CreateMessage, GuildId, Http,
    Timestamp, UserId, UserPagination,
};
use serenity::model::guild::audit_log::{Action, MemberAction};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Embed colour for a severity
#[must_use]
pub fn severity_colour(severity: Severity) -> u32 {
    match severity {
        Severity::Info => 0x0058_65F2,
        Severity::Success => 0x0057_F287,
        Severity::Notice => 0x00FF_A500,
        Severity::Warning => 0x00FF_6600,
        Severity::Critical => 0x00FF_0000,
    }
}

/// Render a notice as an embed
#[must_use]
pub fn notice_embed(notice: &Notice) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title(&notice.title)
        .colour(severity_colour(notice.severity))
        .timestamp(Timestamp::now());
    if !notice.description.is_empty() {
        embed = embed.description(&notice.description);
    }
    for field in &notice.fields {
        embed = embed.field(&field.name, &field.value, field.inline);
    }
    let footer = notice
        .footer
        .clone()
        .unwrap_or_else(|| format!("{BOT_NAME} blacklist system"));
    embed.footer(CreateEmbedFooter::new(footer))
}

fn snowflake_time(timestamp: Timestamp) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp.unix_timestamp(), 0).unwrap_or_else(Utc::now)
}

/// Platform backed by a serenity HTTP client and gateway cache
#[derive(Clone)]
pub struct SerenityPlatform {
    http: Arc<Http>,
    cache: Arc<Cache>,
    /// `None` when no audit channel is configured
    log_channel: Option<ChannelId>,
}

impl SerenityPlatform {
    pub fn new(http: Arc<Http>, cache: Arc<Cache>, log_channel_id: u64) -> Self {
        Self {
            http,
            cache,
            log_channel: (log_channel_id != 0).then(|| ChannelId::new(log_channel_id)),
        }
    }

    /// Guild owning the audit channel; `None` when no channel is set or it is
    /// not a guild channel
    pub async fn log_channel_guild(&self) -> Result<Option<u64>, RemoteError> {
        let Some(log_channel) = self.log_channel else {
            return Ok(None);
        };
        let channel = log_channel.to_channel(&*self.http).await?;
        Ok(channel.guild().map(|c| c.guild_id.get()))
    }

    /// First text channel by position where the bot may send messages,
    /// read from the cache
    fn cached_writable_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        let guild = self.cache.guild(guild_id)?;
        let me = guild.members.get(&self.cache.current_user().id)?;
        let mut channels: Vec<_> = guild
            .channels
            .values()
            .filter(|c| c.kind == ChannelType::Text)
            .filter(|c| guild.user_permissions_in(c, me).send_messages())
            .collect();
        channels.sort_by_key(|c| (c.position, c.id));
        channels.first().map(|c| c.id)
    }
}

#[async_trait::async_trait]
impl GuildDirectory for SerenityPlatform {
    async fn guilds(&self) -> Vec<GuildInfo> {
        self.cache
            .guilds()
            .into_iter()
            .map(|id| GuildInfo {
                id: id.get(),
                name: self
                    .cache
                    .guild(id)
                    .map_or_else(|| "Unknown Guild".to_string(), |g| g.name.clone()),
            })
            .collect()
    }

    async fn guild_name(&self, guild_id: u64) -> Option<String> {
        self.cache
            .guild(GuildId::new(guild_id))
            .map(|g| g.name.clone())
    }

    async fn bans(&self, guild_id: u64) -> Result<HashSet<u64>, RemoteError> {
        // Discord pages ban lists at 1000 entries by default
        const PAGE: usize = 1000;
        let guild_id = GuildId::new(guild_id);
        let mut banned = HashSet::new();
        let mut after = None;
        loop {
            let page = guild_id
                .bans(&*self.http, after.map(UserPagination::After), None)
                .await?;
            let full = page.len() >= PAGE;
            after = page.last().map(|b| b.user.id);
            banned.extend(page.into_iter().map(|b| b.user.id.get()));
            if !full || after.is_none() {
                return Ok(banned);
            }
        }
    }

    async fn ban(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<(), RemoteError> {
        GuildId::new(guild_id)
            .ban_with_reason(&*self.http, UserId::new(user_id), 0, reason)
            .await?;
        Ok(())
    }

    async fn unban(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<(), RemoteError> {
        self.http
            .remove_ban(GuildId::new(guild_id), UserId::new(user_id), Some(reason))
            .await?;
        Ok(())
    }

    async fn owner(&self, guild_id: u64) -> Result<u64, RemoteError> {
        let guild_id = GuildId::new(guild_id);
        let cached = self.cache.guild(guild_id).map(|g| g.owner_id);
        let owner_id = match cached {
            Some(owner_id) => owner_id,
            None => guild_id.to_partial_guild(&*self.http).await?.owner_id,
        };
        Ok(owner_id.get())
    }

    async fn writable_channel(&self, guild_id: u64) -> Option<u64> {
        self.cached_writable_channel(GuildId::new(guild_id))
            .map(ChannelId::get)
    }

    async fn unban_audit_entries(
        &self,
        guild_id: u64,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>, RemoteError> {
        let logs = GuildId::new(guild_id)
            .audit_logs(
                &*self.http,
                Some(Action::Member(MemberAction::BanRemove)),
                None,
                None,
                Some(5),
            )
            .await?;

        let mut entries = Vec::new();
        for entry in logs.entries {
            let created_at = snowflake_time(entry.id.created_at());
            if created_at <= since {
                continue;
            }
            let executor = self.resolve_user(entry.user_id.get()).await.ok();
            entries.push(AuditEntry {
                target_id: entry.target_id.map(|id| id.get()),
                executor,
                created_at,
            });
        }
        Ok(entries)
    }
}

#[async_trait::async_trait]
impl IdentityResolver for SerenityPlatform {
    async fn resolve_user(&self, user_id: u64) -> Result<UserIdentity, RemoteError> {
        let user = UserId::new(user_id).to_user(&*self.http).await?;
        Ok(UserIdentity {
            id: user_id,
            tag: user.tag(),
            bot: user.bot,
        })
    }
}

#[async_trait::async_trait]
impl Messenger for SerenityPlatform {
    async fn direct_message(&self, user_id: u64, notice: &Notice) -> Result<(), RemoteError> {
        let channel = UserId::new(user_id)
            .create_dm_channel(&*self.http)
            .await?;
        channel
            .id
            .send_message(&*self.http, CreateMessage::new().embed(notice_embed(notice)))
            .await?;
        debug!(user_id, title = %notice.title, "Direct message sent");
        Ok(())
    }

    async fn post(
        &self,
        channel_id: u64,
        mention: Option<u64>,
        notice: &Notice,
    ) -> Result<(), RemoteError> {
        let mut message = CreateMessage::new().embed(notice_embed(notice));
        if let Some(user_id) = mention {
            message = message.content(format!("<@{user_id}>"));
        }
        ChannelId::new(channel_id)
            .send_message(&*self.http, message)
            .await?;
        Ok(())
    }

    async fn audit_log(&self, notice: &Notice) -> Result<(), RemoteError> {
        let Some(log_channel) = self.log_channel else {
            return Err(RemoteError::new(
                RemoteErrorKind::NotFound,
                "No log channel configured",
            ));
        };
        log_channel
            .send_message(&*self.http, CreateMessage::new().embed(notice_embed(notice)))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strike_colours_escalate() {
        assert_eq!(severity_colour(Severity::for_strike(1)), 0xFFA500);
        assert_eq!(severity_colour(Severity::for_strike(2)), 0xFF6600);
        assert_eq!(severity_colour(Severity::for_strike(9)), 0xFF0000);
    }

    #[test]
    fn test_snowflake_time_is_seconds_precise() {
        let at = snowflake_time(Timestamp::from_unix_timestamp(1_700_000_000).unwrap());
        assert_eq!(at.timestamp(), 1_700_000_000);
    }
}
