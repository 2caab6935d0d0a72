//! Persistent records owned by the blacklist store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user on the global blacklist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBlacklistEntry {
    pub user_id: u64,
    pub reason: String,
    pub added_at: DateTime<Utc>,
    /// Operator who added the entry
    pub added_by: u64,
}

impl UserBlacklistEntry {
    pub fn new(user_id: u64, reason: impl Into<String>, added_by: u64) -> Self {
        Self {
            user_id,
            reason: reason.into(),
            added_at: Utc::now(),
            added_by,
        }
    }
}

/// A guild under total silence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildBlacklistEntry {
    pub guild_id: u64,
    pub reason: String,
    pub added_at: DateTime<Utc>,
    pub added_by: u64,
    #[serde(default)]
    pub notified: bool,
}

impl GuildBlacklistEntry {
    pub fn new(guild_id: u64, reason: impl Into<String>, added_by: u64) -> Self {
        Self {
            guild_id,
            reason: reason.into(),
            added_at: Utc::now(),
            added_by,
            notified: false,
        }
    }
}

/// Who lifted a ban, as far as the audit trail tells us
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    #[display("user")]
    User,
    #[display("bot")]
    Bot,
    #[default]
    #[display("unknown")]
    Unknown,
}

/// The acting account behind an unban
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Display tag, or "Unknown" when unattributed
    pub name: String,
    pub id: Option<u64>,
    pub kind: ActorType,
}

impl Actor {
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            name: "Unknown".to_string(),
            id: None,
            kind: ActorType::Unknown,
        }
    }

    /// Name shown in notices, flagging bot-driven unbans
    #[must_use]
    pub fn display(&self) -> String {
        match self.kind {
            ActorType::Bot => format!("{} (via bot command)", self.name),
            ActorType::User | ActorType::Unknown => self.name.clone(),
        }
    }
}

impl Default for Actor {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Per-guild strike counter with a snapshot of the latest offender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrikeRecord {
    pub id: u64,
    pub guild_id: u64,
    pub guild_name: String,
    /// Blacklisted user from the most recent incident
    pub user_id: u64,
    pub actor: Actor,
    pub last_timestamp: DateTime<Utc>,
    /// Starts at 1, never decreases
    pub count: u64,
}

/// Snapshot written into a strike record on each increment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrikeSnapshot {
    pub guild_name: String,
    pub user_id: u64,
    pub actor: Actor,
}

/// Append-only audit row, one per strike increment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrikeLogEntry {
    pub id: u64,
    pub guild_id: u64,
    pub guild_name: String,
    pub strike_record_id: u64,
    pub action: String,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

/// Whether the one-time fallback owner notice was posted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerNotificationStatus {
    pub guild_id: u64,
    pub dm_attempted: bool,
    pub last_attempt: DateTime<Utc>,
}

/// Timing of a completed action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub action: String,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl PerformanceSample {
    pub fn new(action: impl Into<String>, duration: std::time::Duration) -> Self {
        Self {
            action: action.into(),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            timestamp: Utc::now(),
        }
    }
}

/// Operator and incident history keyed by the affected user or guild
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModLogEntry {
    pub id: u64,
    pub subject_id: u64,
    pub action: String,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}
