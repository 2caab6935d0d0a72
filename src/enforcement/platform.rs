//! Remote platform seams
//!
//! The enforcement core talks to guilds, users and channels only through these
//! traits. `crate::discord::SerenityPlatform` implements them against the
//! Discord API.

use crate::enforcement::RemoteError;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// A guild the bot is a member of
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildInfo {
    pub id: u64,
    pub name: String,
}

/// A resolved account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: u64,
    pub tag: String,
    pub bot: bool,
}

impl UserIdentity {
    /// Stand-in for accounts that could not be resolved
    #[must_use]
    pub fn placeholder(id: u64) -> Self {
        Self {
            id,
            tag: "Unknown User".to_string(),
            bot: false,
        }
    }
}

/// A ban-removal entry from a guild's audit trail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub target_id: Option<u64>,
    pub executor: Option<UserIdentity>,
    pub created_at: DateTime<Utc>,
}

/// How loudly a notice should read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    /// First strike
    Notice,
    /// Second strike
    Warning,
    /// Third strike and beyond, blacklist actions
    Critical,
}

impl Severity {
    #[must_use]
    pub fn for_strike(count: u64) -> Self {
        match count {
            0 | 1 => Self::Notice,
            2 => Self::Warning,
            _ => Self::Critical,
        }
    }
}

/// Embed limits, in characters
pub const TITLE_LIMIT: usize = 256;
pub const DESCRIPTION_LIMIT: usize = 4096;
pub const FIELD_NAME_LIMIT: usize = 256;
pub const FIELD_VALUE_LIMIT: usize = 1024;
pub const FOOTER_LIMIT: usize = 2048;

/// Cut `text` to at most `limit` characters, marking the cut with an ellipsis
fn clip(text: String, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        None => text,
        Some(_) => {
            let mut clipped: String = text.chars().take(limit.saturating_sub(1)).collect();
            clipped.push('…');
            clipped
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoticeField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Presentation-neutral message body
///
/// Builders clip every part to its embed limit, so user-supplied reasons can
/// never make a message undeliverable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub fields: Vec<NoticeField>,
    pub footer: Option<String>,
}

impl Notice {
    pub fn new(title: impl Into<String>, severity: Severity) -> Self {
        Self {
            title: clip(title.into(), TITLE_LIMIT),
            description: String::new(),
            severity,
            fields: Vec::new(),
            footer: None,
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = clip(description.into(), DESCRIPTION_LIMIT);
        self
    }

    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(NoticeField {
            name: clip(name.into(), FIELD_NAME_LIMIT),
            value: clip(value.into(), FIELD_VALUE_LIMIT),
            inline,
        });
        self
    }

    #[must_use]
    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(clip(footer.into(), FOOTER_LIMIT));
        self
    }

    /// Value of the first field with this name
    #[must_use]
    pub fn field_value(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }
}

/// Guild enumeration and ban-state access
#[async_trait::async_trait]
pub trait GuildDirectory: Send + Sync {
    /// Every guild the bot currently sees
    async fn guilds(&self) -> Vec<GuildInfo>;

    async fn guild_name(&self, guild_id: u64) -> Option<String>;

    /// Snapshot of the guild's ban list
    async fn bans(&self, guild_id: u64) -> Result<HashSet<u64>, RemoteError>;

    async fn ban(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<(), RemoteError>;

    async fn unban(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<(), RemoteError>;

    async fn owner(&self, guild_id: u64) -> Result<u64, RemoteError>;

    /// First text channel the bot may post in, by position
    async fn writable_channel(&self, guild_id: u64) -> Option<u64>;

    /// Ban-removal audit entries created after `since`
    async fn unban_audit_entries(
        &self,
        guild_id: u64,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>, RemoteError>;
}

/// Resolves user ids to display identities
#[async_trait::async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve_user(&self, user_id: u64) -> Result<UserIdentity, RemoteError>;

    /// Resolve, degrading to a placeholder on any failure
    async fn resolve_or_placeholder(&self, user_id: u64) -> UserIdentity {
        self.resolve_user(user_id)
            .await
            .unwrap_or_else(|_| UserIdentity::placeholder(user_id))
    }
}

/// Outbound message delivery
#[async_trait::async_trait]
pub trait Messenger: Send + Sync {
    async fn direct_message(&self, user_id: u64, notice: &Notice) -> Result<(), RemoteError>;

    /// Post in a guild channel, optionally mentioning a user
    async fn post(
        &self,
        channel_id: u64,
        mention: Option<u64>,
        notice: &Notice,
    ) -> Result<(), RemoteError>;

    /// Post to the central audit channel
    async fn audit_log(&self, notice: &Notice) -> Result<(), RemoteError>;
}

/// Everything the core needs from the remote side
pub trait Platform: GuildDirectory + IdentityResolver + Messenger {}

impl<T: GuildDirectory + IdentityResolver + Messenger> Platform for T {}
