//! Total-silence predicate for blacklisted guilds

use crate::enforcement::store::Store;
use std::sync::Arc;
use tracing::warn;

/// Answers whether a guild must be left completely untouched
///
/// Every component asks this before mutating, notifying or writing strike
/// state for a guild. A store failure resolves to `fail_closed`.
#[derive(Clone)]
pub struct SilenceGuard {
    store: Arc<dyn Store>,
    fail_closed: bool,
}

impl SilenceGuard {
    pub fn new(store: Arc<dyn Store>, fail_closed: bool) -> Self {
        Self { store, fail_closed }
    }

    pub async fn is_silenced(&self, guild_id: u64) -> bool {
        match self.store.get_guild(guild_id).await {
            Ok(entry) => entry.is_some(),
            Err(e) => {
                warn!(
                    guild_id,
                    error = %e,
                    silenced = self.fail_closed,
                    "Guild blacklist lookup failed"
                );
                self.fail_closed
            }
        }
    }
}
