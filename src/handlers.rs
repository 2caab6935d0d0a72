use crate::enforcement::{EnforcementRequest, SilenceGuard};
use crate::EVENT_TARGET;
use poise::serenity_prelude::{self as serenity, Context, EventHandler, Guild, GuildId, Ready, User};
use tokio::sync::mpsc::Sender;
use tracing::{error, info, warn};

/// Translates gateway events into enforcement requests
pub struct Handler {
    requests: Sender<EnforcementRequest>,
    silence: SilenceGuard,
}

impl Handler {
    pub fn new(requests: Sender<EnforcementRequest>, silence: SilenceGuard) -> Self {
        Self { requests, silence }
    }

    async fn submit(&self, request: EnforcementRequest) {
        if let Err(e) = self.requests.send(request).await {
            error!(target: EVENT_TARGET, "Enforcement task is gone: {e}");
        }
    }
}

#[serenity::async_trait]
impl EventHandler for Handler {
    /// Called when the bot is ready, but the cache may not be fully populated yet.
    async fn ready(&self, ctx: Context, ready: Ready) {
        let user_name = ready.user.name.clone();
        let shard_id = ctx.shard_id;
        info!(target: EVENT_TARGET, "Connected as {user_name}, shard {shard_id}");
    }

    /// Called when the cache is fully populated.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        let guild_count_cache = ctx.cache.guild_count();
        let guild_count = guilds.len();
        if guild_count != guild_count_cache {
            warn!(
                target: EVENT_TARGET,
                "Cache guild count mismatch: {guild_count_cache} (cache) vs {guild_count} (actual)"
            );
        }
        info!(target: EVENT_TARGET, "Cache ready! The bot is in {guild_count} guild(s)");
    }

    /// Joining a blacklisted guild is only logged; the bot stays and keeps quiet
    async fn guild_create(&self, _ctx: Context, guild: Guild, is_new: Option<bool>) {
        if !is_new.unwrap_or(false) {
            return;
        }
        info!(target: EVENT_TARGET, guild_id = guild.id.get(), "Joined guild {}", guild.name);
        if self.silence.is_silenced(guild.id.get()).await {
            info!(
                target: EVENT_TARGET,
                guild_id = guild.id.get(),
                "Guild {} is blacklisted, staying silent",
                guild.name
            );
        }
    }

    async fn guild_ban_removal(&self, _ctx: Context, guild_id: GuildId, unbanned_user: User) {
        info!(
            target: EVENT_TARGET,
            guild_id = guild_id.get(),
            user_id = unbanned_user.id.get(),
            "Ban removal detected"
        );
        self.submit(EnforcementRequest::UnbanDetected {
            guild_id: guild_id.get(),
            user_id: unbanned_user.id.get(),
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enforcement::{Store, YamlStore};
    use std::sync::Arc;

    #[test]
    fn test_handler_implements_event_handler() {
        fn assert_impl<T: EventHandler>() {}
        assert_impl::<Handler>();
    }

    #[tokio::test]
    async fn test_submit_forwards_requests() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        let store: Arc<dyn Store> = Arc::new(YamlStore::in_memory());
        let handler = Handler::new(tx, SilenceGuard::new(store, true));

        handler
            .submit(EnforcementRequest::UnbanDetected {
                guild_id: 1,
                user_id: 2,
            })
            .await;

        assert!(matches!(
            rx.recv().await,
            Some(EnforcementRequest::UnbanDetected {
                guild_id: 1,
                user_id: 2
            })
        ));
    }
}
