//! Blacklist store
//!
//! Source of truth for blacklists, strikes and their audit trails. The
//! production store keeps every table in memory. Keyed tables are written back
//! to a YAML file after each mutation; the log tables only ever have rows
//! appended. A write that fails is rolled back in memory.

use crate::enforcement::model::{
    GuildBlacklistEntry, ModLogEntry, OwnerNotificationStatus, PerformanceSample, StrikeLogEntry,
    StrikeRecord, StrikeSnapshot, UserBlacklistEntry,
};
use crate::enforcement::{StoreError, StoreResult};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

/// Operations the enforcement core needs from persistence
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn get_user(&self, user_id: u64) -> StoreResult<Option<UserBlacklistEntry>>;

    /// All blacklisted users, newest first
    async fn list_users(&self) -> StoreResult<Vec<UserBlacklistEntry>>;

    async fn upsert_user(&self, entry: UserBlacklistEntry) -> StoreResult<()>;

    async fn remove_user(&self, user_id: u64) -> StoreResult<Option<UserBlacklistEntry>>;

    async fn get_guild(&self, guild_id: u64) -> StoreResult<Option<GuildBlacklistEntry>>;

    /// All silenced guilds, newest first
    async fn list_guilds(&self) -> StoreResult<Vec<GuildBlacklistEntry>>;

    /// Insert a guild entry; returns false if one already existed
    async fn insert_guild(&self, entry: GuildBlacklistEntry) -> StoreResult<bool>;

    async fn remove_guild(&self, guild_id: u64) -> StoreResult<Option<GuildBlacklistEntry>>;

    /// Atomically create the guild's strike record at 1 or increment it,
    /// overwriting the snapshot fields
    async fn increment_strike(
        &self,
        guild_id: u64,
        snapshot: StrikeSnapshot,
    ) -> StoreResult<StrikeRecord>;

    async fn get_strike(&self, guild_id: u64) -> StoreResult<Option<StrikeRecord>>;

    async fn append_strike_log(
        &self,
        record: &StrikeRecord,
        action: &str,
        details: &str,
    ) -> StoreResult<StrikeLogEntry>;

    /// Log rows for a strike record, newest first
    async fn strike_logs(&self, strike_record_id: u64) -> StoreResult<Vec<StrikeLogEntry>>;

    async fn owner_notification(
        &self,
        guild_id: u64,
    ) -> StoreResult<Option<OwnerNotificationStatus>>;

    async fn mark_owner_notified(&self, guild_id: u64) -> StoreResult<()>;

    async fn append_performance(&self, sample: PerformanceSample) -> StoreResult<()>;

    async fn performance_since(&self, since: DateTime<Utc>)
    -> StoreResult<Vec<PerformanceSample>>;

    async fn append_mod_log(&self, subject_id: u64, action: &str, details: &str)
    -> StoreResult<u64>;

    /// Mod log rows for a subject, newest first
    async fn mod_logs(&self, subject_id: u64, limit: usize) -> StoreResult<Vec<ModLogEntry>>;
}

const USERS_FILE: &str = "blacklist.yaml";
const GUILDS_FILE: &str = "server_blacklist.yaml";
const STRIKES_FILE: &str = "strikes.yaml";
const STRIKE_LOGS_FILE: &str = "strike_logs.yaml";
const OWNER_STATUS_FILE: &str = "owner_dm_status.yaml";
const PERFORMANCE_FILE: &str = "performance.yaml";
const MOD_LOGS_FILE: &str = "modlogs.yaml";

/// Performance samples older than this are dropped; the stats report only
/// reads the last day
pub const PERFORMANCE_RETENTION_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy)]
enum Table {
    Users,
    Guilds,
    Strikes,
    OwnerStatus,
    Performance,
}

/// YAML-backed store
#[derive(Clone, Default)]
pub struct YamlStore {
    /// Directory holding the table files; `None` keeps everything in memory
    data_dir: Option<PathBuf>,
    users: Arc<DashMap<u64, UserBlacklistEntry>>,
    guilds: Arc<DashMap<u64, GuildBlacklistEntry>>,
    strikes: Arc<DashMap<u64, StrikeRecord>>,
    strike_logs: Arc<DashMap<u64, StrikeLogEntry>>,
    owner_status: Arc<DashMap<u64, OwnerNotificationStatus>>,
    performance: Arc<DashMap<u64, PerformanceSample>>,
    mod_logs: Arc<DashMap<u64, ModLogEntry>>,
    next_strike_id: Arc<AtomicU64>,
    next_strike_log_id: Arc<AtomicU64>,
    next_performance_id: Arc<AtomicU64>,
    next_mod_log_id: Arc<AtomicU64>,
    /// Serializes file writes
    write_lock: Arc<Mutex<()>>,
}

impl YamlStore {
    /// Create a store that never touches disk
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open the store in `data_dir`, loading any existing tables
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or a table file
    /// exists but cannot be parsed.
    pub async fn open(data_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir).await?;

        let store = Self {
            data_dir: Some(data_dir.clone()),
            ..Self::default()
        };

        for entry in load_table::<UserBlacklistEntry>(&data_dir, USERS_FILE).await? {
            store.users.insert(entry.user_id, entry);
        }
        for entry in load_table::<GuildBlacklistEntry>(&data_dir, GUILDS_FILE).await? {
            store.guilds.insert(entry.guild_id, entry);
        }
        for record in load_table::<StrikeRecord>(&data_dir, STRIKES_FILE).await? {
            store.next_strike_id.fetch_max(record.id, Ordering::SeqCst);
            store.strikes.insert(record.guild_id, record);
        }
        for entry in load_table::<StrikeLogEntry>(&data_dir, STRIKE_LOGS_FILE).await? {
            store.next_strike_log_id.fetch_max(entry.id, Ordering::SeqCst);
            store.strike_logs.insert(entry.id, entry);
        }
        for status in load_table::<OwnerNotificationStatus>(&data_dir, OWNER_STATUS_FILE).await? {
            store.owner_status.insert(status.guild_id, status);
        }
        let cutoff = performance_cutoff();
        for (id, sample) in load_table::<PerformanceSample>(&data_dir, PERFORMANCE_FILE)
            .await?
            .into_iter()
            .filter(|sample| sample.timestamp > cutoff)
            .enumerate()
        {
            let id = id as u64 + 1;
            store.next_performance_id.fetch_max(id, Ordering::SeqCst);
            store.performance.insert(id, sample);
        }
        for entry in load_table::<ModLogEntry>(&data_dir, MOD_LOGS_FILE).await? {
            store.next_mod_log_id.fetch_max(entry.id, Ordering::SeqCst);
            store.mod_logs.insert(entry.id, entry);
        }

        info!(
            users = store.users.len(),
            guilds = store.guilds.len(),
            strikes = store.strikes.len(),
            "Loaded blacklist store from {}",
            data_dir.display()
        );
        Ok(store)
    }

    /// Write one table back to disk
    async fn persist(&self, table: Table) -> StoreResult<()> {
        let Some(dir) = &self.data_dir else {
            return Ok(());
        };

        let _guard = self.write_lock.lock().await;
        match table {
            Table::Users => {
                let mut rows = collect(&self.users);
                rows.sort_by_key(|e| e.user_id);
                write_table(dir, USERS_FILE, &rows).await
            }
            Table::Guilds => {
                let mut rows = collect(&self.guilds);
                rows.sort_by_key(|e| e.guild_id);
                write_table(dir, GUILDS_FILE, &rows).await
            }
            Table::Strikes => {
                let mut rows = collect(&self.strikes);
                rows.sort_by_key(|r| r.id);
                write_table(dir, STRIKES_FILE, &rows).await
            }
            Table::OwnerStatus => {
                let mut rows = collect(&self.owner_status);
                rows.sort_by_key(|s| s.guild_id);
                write_table(dir, OWNER_STATUS_FILE, &rows).await
            }
            Table::Performance => {
                let mut rows: Vec<(u64, PerformanceSample)> = self
                    .performance
                    .iter()
                    .map(|e| (*e.key(), e.value().clone()))
                    .collect();
                rows.sort_by_key(|(id, _)| *id);
                let rows: Vec<PerformanceSample> = rows.into_iter().map(|(_, s)| s).collect();
                write_table(dir, PERFORMANCE_FILE, &rows).await
            }
        }
    }

    /// Append one row to a log table file
    async fn append<T: Serialize>(&self, file: &str, row: &T) -> StoreResult<()> {
        let Some(dir) = &self.data_dir else {
            return Ok(());
        };

        let _guard = self.write_lock.lock().await;
        append_row(dir, file, row).await
    }
}

fn performance_cutoff() -> DateTime<Utc> {
    Utc::now() - ChronoDuration::hours(PERFORMANCE_RETENTION_HOURS)
}

/// Put back the value a failed write replaced
fn restore<V>(map: &DashMap<u64, V>, key: u64, previous: Option<V>) {
    match previous {
        Some(value) => {
            map.insert(key, value);
        }
        None => {
            map.remove(&key);
        }
    }
}

fn collect<K, V>(map: &DashMap<K, V>) -> Vec<V>
where
    K: Eq + std::hash::Hash,
    V: Clone,
{
    map.iter().map(|entry| entry.value().clone()).collect()
}

async fn load_table<T: DeserializeOwned>(dir: &Path, file: &str) -> StoreResult<Vec<T>> {
    match tokio::fs::read_to_string(dir.join(file)).await {
        Ok(content) if content.trim().is_empty() => Ok(Vec::new()),
        Ok(content) => Ok(serde_yaml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(StoreError::Io(e)),
    }
}

async fn write_table<T: Serialize>(dir: &Path, file: &str, rows: &[T]) -> StoreResult<()> {
    let yaml = serde_yaml::to_string(rows)?;
    // Write then rename so a crash never leaves a truncated table behind
    let tmp = dir.join(format!("{file}.tmp"));
    tokio::fs::write(&tmp, yaml).await?;
    tokio::fs::rename(&tmp, dir.join(file)).await?;
    Ok(())
}

async fn append_row<T: Serialize>(dir: &Path, file: &str, row: &T) -> StoreResult<()> {
    // A one-element sequence serializes as a `- ` item, so appending keeps
    // the file a valid YAML list
    let yaml = serde_yaml::to_string(std::slice::from_ref(row))?;
    let mut handle = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(file))
        .await?;
    handle.write_all(yaml.as_bytes()).await?;
    handle.flush().await?;
    Ok(())
}

#[async_trait::async_trait]
impl Store for YamlStore {
    async fn get_user(&self, user_id: u64) -> StoreResult<Option<UserBlacklistEntry>> {
        Ok(self.users.get(&user_id).map(|e| e.value().clone()))
    }

    async fn list_users(&self) -> StoreResult<Vec<UserBlacklistEntry>> {
        let mut users = collect(&self.users);
        users.sort_by(|a, b| b.added_at.cmp(&a.added_at));
        Ok(users)
    }

    async fn upsert_user(&self, entry: UserBlacklistEntry) -> StoreResult<()> {
        let user_id = entry.user_id;
        let previous = self.users.insert(user_id, entry);
        self.persist(Table::Users)
            .await
            .inspect_err(|_| restore(&self.users, user_id, previous))
    }

    async fn remove_user(&self, user_id: u64) -> StoreResult<Option<UserBlacklistEntry>> {
        let removed = self.users.remove(&user_id).map(|(_, entry)| entry);
        if removed.is_some() {
            self.persist(Table::Users)
                .await
                .inspect_err(|_| restore(&self.users, user_id, removed.clone()))?;
        }
        Ok(removed)
    }

    async fn get_guild(&self, guild_id: u64) -> StoreResult<Option<GuildBlacklistEntry>> {
        Ok(self.guilds.get(&guild_id).map(|e| e.value().clone()))
    }

    async fn list_guilds(&self) -> StoreResult<Vec<GuildBlacklistEntry>> {
        let mut guilds = collect(&self.guilds);
        guilds.sort_by(|a, b| b.added_at.cmp(&a.added_at));
        Ok(guilds)
    }

    async fn insert_guild(&self, entry: GuildBlacklistEntry) -> StoreResult<bool> {
        let guild_id = entry.guild_id;
        let inserted = match self.guilds.entry(guild_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
        };
        if inserted {
            self.persist(Table::Guilds)
                .await
                .inspect_err(|_| restore(&self.guilds, guild_id, None))?;
        }
        Ok(inserted)
    }

    async fn remove_guild(&self, guild_id: u64) -> StoreResult<Option<GuildBlacklistEntry>> {
        let removed = self.guilds.remove(&guild_id).map(|(_, entry)| entry);
        if removed.is_some() {
            self.persist(Table::Guilds)
                .await
                .inspect_err(|_| restore(&self.guilds, guild_id, removed.clone()))?;
        }
        Ok(removed)
    }

    async fn increment_strike(
        &self,
        guild_id: u64,
        snapshot: StrikeSnapshot,
    ) -> StoreResult<StrikeRecord> {
        let now = Utc::now();
        let mut previous = None;
        // The entry guard holds the shard lock across read and write
        let record = self
            .strikes
            .entry(guild_id)
            .and_modify(|record| {
                previous = Some(record.clone());
                record.count += 1;
                record.guild_name.clone_from(&snapshot.guild_name);
                record.user_id = snapshot.user_id;
                record.actor = snapshot.actor.clone();
                record.last_timestamp = now;
            })
            .or_insert_with(|| StrikeRecord {
                id: self.next_strike_id.fetch_add(1, Ordering::SeqCst) + 1,
                guild_id,
                guild_name: snapshot.guild_name.clone(),
                user_id: snapshot.user_id,
                actor: snapshot.actor.clone(),
                last_timestamp: now,
                count: 1,
            })
            .value()
            .clone();

        self.persist(Table::Strikes)
            .await
            .inspect_err(|_| restore(&self.strikes, guild_id, previous))?;
        Ok(record)
    }

    async fn get_strike(&self, guild_id: u64) -> StoreResult<Option<StrikeRecord>> {
        Ok(self.strikes.get(&guild_id).map(|r| r.value().clone()))
    }

    async fn append_strike_log(
        &self,
        record: &StrikeRecord,
        action: &str,
        details: &str,
    ) -> StoreResult<StrikeLogEntry> {
        let entry = StrikeLogEntry {
            id: self.next_strike_log_id.fetch_add(1, Ordering::SeqCst) + 1,
            guild_id: record.guild_id,
            guild_name: record.guild_name.clone(),
            strike_record_id: record.id,
            action: action.to_string(),
            details: details.to_string(),
            timestamp: Utc::now(),
        };
        self.append(STRIKE_LOGS_FILE, &entry).await?;
        self.strike_logs.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn strike_logs(&self, strike_record_id: u64) -> StoreResult<Vec<StrikeLogEntry>> {
        let mut logs: Vec<StrikeLogEntry> = self
            .strike_logs
            .iter()
            .filter(|e| e.value().strike_record_id == strike_record_id)
            .map(|e| e.value().clone())
            .collect();
        logs.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(logs)
    }

    async fn owner_notification(
        &self,
        guild_id: u64,
    ) -> StoreResult<Option<OwnerNotificationStatus>> {
        Ok(self.owner_status.get(&guild_id).map(|s| s.value().clone()))
    }

    async fn mark_owner_notified(&self, guild_id: u64) -> StoreResult<()> {
        let previous = self.owner_status.insert(
            guild_id,
            OwnerNotificationStatus {
                guild_id,
                dm_attempted: true,
                last_attempt: Utc::now(),
            },
        );
        self.persist(Table::OwnerStatus)
            .await
            .inspect_err(|_| restore(&self.owner_status, guild_id, previous))
    }

    async fn append_performance(&self, sample: PerformanceSample) -> StoreResult<()> {
        let id = self.next_performance_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.performance.insert(id, sample);
        let cutoff = performance_cutoff();
        self.performance.retain(|_, sample| sample.timestamp > cutoff);
        self.persist(Table::Performance)
            .await
            .inspect_err(|_| restore(&self.performance, id, None))
    }

    async fn performance_since(
        &self,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<PerformanceSample>> {
        let mut samples: Vec<(u64, PerformanceSample)> = self
            .performance
            .iter()
            .filter(|e| e.value().timestamp > since)
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        samples.sort_by_key(|(id, _)| *id);
        Ok(samples.into_iter().map(|(_, s)| s).collect())
    }

    async fn append_mod_log(
        &self,
        subject_id: u64,
        action: &str,
        details: &str,
    ) -> StoreResult<u64> {
        let id = self.next_mod_log_id.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = ModLogEntry {
            id,
            subject_id,
            action: action.to_string(),
            details: details.to_string(),
            timestamp: Utc::now(),
        };
        self.append(MOD_LOGS_FILE, &entry).await?;
        self.mod_logs.insert(id, entry);
        Ok(id)
    }

    async fn mod_logs(&self, subject_id: u64, limit: usize) -> StoreResult<Vec<ModLogEntry>> {
        let mut logs: Vec<ModLogEntry> = self
            .mod_logs
            .iter()
            .filter(|e| e.value().subject_id == subject_id)
            .map(|e| e.value().clone())
            .collect();
        logs.sort_by(|a, b| b.id.cmp(&a.id));
        logs.truncate(limit);
        Ok(logs)
    }
}
