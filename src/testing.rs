//! In-memory platform used by unit tests

use crate::enforcement::platform::{
    AuditEntry, GuildDirectory, GuildInfo, IdentityResolver, Messenger, Notice, UserIdentity,
};
use crate::enforcement::{
    EnforcementService, EnforcementSettings, PerformanceCounters, RemoteError, RemoteErrorKind,
    YamlStore,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

/// A full engine over a fake platform and an in-memory store
pub struct Harness {
    pub platform: Arc<FakePlatform>,
    pub store: Arc<YamlStore>,
    pub metrics: Arc<PerformanceCounters>,
    pub service: EnforcementService,
}

pub fn harness(platform: FakePlatform, settings: EnforcementSettings) -> Harness {
    let platform = Arc::new(platform);
    let store = Arc::new(YamlStore::in_memory());
    let metrics = Arc::new(PerformanceCounters::new());
    let service = EnforcementService::new(
        platform.clone(),
        store.clone(),
        metrics.clone(),
        settings,
    );
    Harness {
        platform,
        store,
        metrics,
        service,
    }
}

/// Side effect observed by the fake
#[derive(Debug, Clone)]
pub enum Call {
    BanList { guild_id: u64 },
    Ban { guild_id: u64, user_id: u64, reason: String, at: Instant },
    Unban { guild_id: u64, user_id: u64, reason: String },
    Owner { guild_id: u64 },
    AuditQuery { guild_id: u64 },
    Dm { user_id: u64, notice: Notice },
    Post { channel_id: u64, mention: Option<u64>, notice: Notice },
    AuditLog { notice: Notice },
}

#[derive(Default)]
struct State {
    guilds: Vec<GuildInfo>,
    bans: HashMap<u64, HashSet<u64>>,
    owners: HashMap<u64, u64>,
    channels: HashMap<u64, u64>,
    users: HashMap<u64, UserIdentity>,
    audit: HashMap<u64, Vec<AuditEntry>>,
    closed_dms: HashSet<u64>,
    scripted: HashMap<(u64, u64), VecDeque<RemoteError>>,
    always: HashMap<(u64, u64), RemoteError>,
    ban_list_failures: HashSet<u64>,
    calls: Vec<Call>,
}

#[derive(Default)]
pub struct FakePlatform {
    state: Mutex<State>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn with_guild(self, id: u64, name: &str) -> Self {
        self.with_state(|s| {
            s.guilds.push(GuildInfo {
                id,
                name: name.to_string(),
            });
        });
        self
    }

    pub fn with_owner(self, guild_id: u64, owner_id: u64) -> Self {
        self.with_state(|s| s.owners.insert(guild_id, owner_id));
        self
    }

    pub fn with_channel(self, guild_id: u64, channel_id: u64) -> Self {
        self.with_state(|s| s.channels.insert(guild_id, channel_id));
        self
    }

    pub fn with_user(self, id: u64, tag: &str, bot: bool) -> Self {
        self.with_state(|s| {
            s.users.insert(
                id,
                UserIdentity {
                    id,
                    tag: tag.to_string(),
                    bot,
                },
            )
        });
        self
    }

    pub fn close_dms(&self, user_id: u64) {
        self.with_state(|s| s.closed_dms.insert(user_id));
    }

    pub fn set_banned(&self, guild_id: u64, user_id: u64) {
        self.with_state(|s| s.bans.entry(guild_id).or_default().insert(user_id));
    }

    pub fn lift_ban(&self, guild_id: u64, user_id: u64) {
        self.with_state(|s| s.bans.entry(guild_id).or_default().remove(&user_id));
    }

    pub fn push_audit(&self, guild_id: u64, target_id: u64, executor: Option<u64>, at: DateTime<Utc>) {
        self.with_state(|s| {
            let executor = executor.map(|id| {
                s.users
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| UserIdentity::placeholder(id))
            });
            s.audit.entry(guild_id).or_default().push(AuditEntry {
                target_id: Some(target_id),
                executor,
                created_at: at,
            });
        });
    }

    /// Fail the next mutations on (guild, user) with these errors, in order
    pub fn script_failures(&self, guild_id: u64, user_id: u64, errors: Vec<RemoteError>) {
        self.with_state(|s| s.scripted.insert((guild_id, user_id), errors.into()));
    }

    pub fn always_fail(&self, guild_id: u64, user_id: u64, error: RemoteError) {
        self.with_state(|s| s.always.insert((guild_id, user_id), error));
    }

    pub fn fail_ban_list(&self, guild_id: u64) {
        self.with_state(|s| s.ban_list_failures.insert(guild_id));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.with_state(|s| s.calls.clone())
    }

    pub fn clear_calls(&self) {
        self.with_state(|s| s.calls.clear());
    }

    pub fn banned_in(&self, guild_id: u64) -> HashSet<u64> {
        self.with_state(|s| s.bans.get(&guild_id).cloned().unwrap_or_default())
    }

    pub fn ban_attempt_times(&self, guild_id: u64, user_id: u64) -> Vec<Instant> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Ban {
                    guild_id: g,
                    user_id: u,
                    at,
                    ..
                } if g == guild_id && u == user_id => Some(at),
                _ => None,
            })
            .collect()
    }

    pub fn ban_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Ban { .. }))
            .count()
    }

    pub fn unban_attempt_count(&self, guild_id: u64, user_id: u64) -> usize {
        self.calls()
            .iter()
            .filter(|c| {
                matches!(c, Call::Unban { guild_id: g, user_id: u, .. } if *g == guild_id && *u == user_id)
            })
            .count()
    }

    /// Delivered DMs to `user_id`
    pub fn dms_to(&self, user_id: u64) -> Vec<Notice> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Dm { user_id: u, notice } if u == user_id => Some(notice),
                _ => None,
            })
            .collect()
    }

    pub fn posts(&self) -> Vec<(u64, Option<u64>, Notice)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Post {
                    channel_id,
                    mention,
                    notice,
                } => Some((channel_id, mention, notice)),
                _ => None,
            })
            .collect()
    }

    pub fn audit_logs(&self) -> Vec<Notice> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::AuditLog { notice } => Some(notice),
                _ => None,
            })
            .collect()
    }

    /// Every call that touched `guild_id` directly
    pub fn calls_touching(&self, guild_id: u64) -> Vec<Call> {
        let channel = self.with_state(|s| s.channels.get(&guild_id).copied());
        self.calls()
            .into_iter()
            .filter(|c| match c {
                Call::BanList { guild_id: g }
                | Call::Ban { guild_id: g, .. }
                | Call::Unban { guild_id: g, .. }
                | Call::Owner { guild_id: g }
                | Call::AuditQuery { guild_id: g } => *g == guild_id,
                Call::Post { channel_id, .. } => Some(*channel_id) == channel,
                Call::Dm { .. } | Call::AuditLog { .. } => false,
            })
            .collect()
    }

    fn take_failure(s: &mut State, guild_id: u64, user_id: u64) -> Option<RemoteError> {
        if let Some(error) = s.always.get(&(guild_id, user_id)) {
            return Some(error.clone());
        }
        s.scripted
            .get_mut(&(guild_id, user_id))
            .and_then(VecDeque::pop_front)
    }
}

#[async_trait::async_trait]
impl GuildDirectory for FakePlatform {
    async fn guilds(&self) -> Vec<GuildInfo> {
        self.with_state(|s| s.guilds.clone())
    }

    async fn guild_name(&self, guild_id: u64) -> Option<String> {
        self.with_state(|s| {
            s.guilds
                .iter()
                .find(|g| g.id == guild_id)
                .map(|g| g.name.clone())
        })
    }

    async fn bans(&self, guild_id: u64) -> Result<HashSet<u64>, RemoteError> {
        self.with_state(|s| {
            s.calls.push(Call::BanList { guild_id });
            if s.ban_list_failures.contains(&guild_id) {
                return Err(RemoteError::new(RemoteErrorKind::MissingPermissions, "ban list"));
            }
            Ok(s.bans.get(&guild_id).cloned().unwrap_or_default())
        })
    }

    async fn ban(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<(), RemoteError> {
        self.with_state(|s| {
            s.calls.push(Call::Ban {
                guild_id,
                user_id,
                reason: reason.to_string(),
                at: Instant::now(),
            });
            if let Some(error) = Self::take_failure(s, guild_id, user_id) {
                return Err(error);
            }
            s.bans.entry(guild_id).or_default().insert(user_id);
            Ok(())
        })
    }

    async fn unban(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<(), RemoteError> {
        self.with_state(|s| {
            s.calls.push(Call::Unban {
                guild_id,
                user_id,
                reason: reason.to_string(),
            });
            if let Some(error) = Self::take_failure(s, guild_id, user_id) {
                return Err(error);
            }
            if s.bans.entry(guild_id).or_default().remove(&user_id) {
                Ok(())
            } else {
                Err(RemoteError::new(RemoteErrorKind::UnknownBan, "Unknown Ban"))
            }
        })
    }

    async fn owner(&self, guild_id: u64) -> Result<u64, RemoteError> {
        self.with_state(|s| {
            s.calls.push(Call::Owner { guild_id });
            s.owners
                .get(&guild_id)
                .copied()
                .ok_or_else(|| RemoteError::new(RemoteErrorKind::NotFound, "Unknown Guild"))
        })
    }

    async fn writable_channel(&self, guild_id: u64) -> Option<u64> {
        self.with_state(|s| s.channels.get(&guild_id).copied())
    }

    async fn unban_audit_entries(
        &self,
        guild_id: u64,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>, RemoteError> {
        self.with_state(|s| {
            s.calls.push(Call::AuditQuery { guild_id });
            Ok(s.audit
                .get(&guild_id)
                .map(|entries| {
                    entries
                        .iter()
                        .filter(|e| e.created_at > since)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        })
    }
}

#[async_trait::async_trait]
impl IdentityResolver for FakePlatform {
    async fn resolve_user(&self, user_id: u64) -> Result<UserIdentity, RemoteError> {
        self.with_state(|s| {
            s.users
                .get(&user_id)
                .cloned()
                .ok_or_else(|| RemoteError::new(RemoteErrorKind::NotFound, "Unknown User"))
        })
    }
}

#[async_trait::async_trait]
impl Messenger for FakePlatform {
    async fn direct_message(&self, user_id: u64, notice: &Notice) -> Result<(), RemoteError> {
        self.with_state(|s| {
            if s.closed_dms.contains(&user_id) {
                return Err(RemoteError::new(
                    RemoteErrorKind::CannotMessage,
                    "Cannot send messages to this user",
                ));
            }
            s.calls.push(Call::Dm {
                user_id,
                notice: notice.clone(),
            });
            Ok(())
        })
    }

    async fn post(
        &self,
        channel_id: u64,
        mention: Option<u64>,
        notice: &Notice,
    ) -> Result<(), RemoteError> {
        self.with_state(|s| {
            s.calls.push(Call::Post {
                channel_id,
                mention,
                notice: notice.clone(),
            });
        });
        Ok(())
    }

    async fn audit_log(&self, notice: &Notice) -> Result<(), RemoteError> {
        self.with_state(|s| {
            s.calls.push(Call::AuditLog {
                notice: notice.clone(),
            });
        });
        Ok(())
    }
}
