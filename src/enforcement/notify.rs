//! Best-effort incident notifications
//!
//! Three audiences hear about a strike: the account that lifted the ban, the
//! guild owner, and the central audit channel. Each step runs regardless of
//! how the previous one went, and nothing here returns an error.

use crate::enforcement::model::{Actor, ActorType};
use crate::enforcement::platform::{Notice, Platform, Severity};
use crate::enforcement::silence::SilenceGuard;
use crate::enforcement::store::Store;
use crate::ENFORCEMENT_TARGET;
use std::sync::Arc;
use tracing::{debug, info, warn};

const NO_REASON: &str = "No reason provided";

/// Everything the dispatcher needs to describe a strike
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incident {
    pub guild_id: u64,
    pub user_id: u64,
    pub actor: Actor,
    /// Strike number after this incident
    pub strike: u64,
    pub blacklist_reason: Option<String>,
}

/// How the guild owner was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerDelivery {
    NotAttempted,
    Direct,
    /// Public post in a guild channel after a failed DM
    Fallback,
    /// DM failed and a fallback post was already made earlier
    FallbackSuppressed,
    Unreachable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub silenced: bool,
    pub actor_warned: bool,
    pub owner: OwnerDelivery,
    pub audit_logged: bool,
}

impl DeliveryReport {
    fn silenced() -> Self {
        Self {
            silenced: true,
            actor_warned: false,
            owner: OwnerDelivery::NotAttempted,
            audit_logged: false,
        }
    }
}

/// Resolved names shared by every notice of one incident
struct Rendering<'a> {
    incident: &'a Incident,
    guild_name: String,
    user_tag: String,
    reason: &'a str,
}

impl Rendering<'_> {
    fn user(&self) -> String {
        format!("{} ({})", self.user_tag, self.incident.user_id)
    }

    fn severity(&self) -> Severity {
        Severity::for_strike(self.incident.strike)
    }

    fn audit_notice(&self) -> Notice {
        let strike = self.incident.strike;
        Notice::new(
            format!("Strike {strike} - Unban Attempt Detected"),
            self.severity(),
        )
        .description(format!(
            "A blacklisted user was unbanned in **{}** ({})",
            self.guild_name, self.incident.guild_id
        ))
        .field("Blacklisted User", self.user(), false)
        .field("Unbanned By", self.incident.actor.display(), true)
        .field("Executor Type", self.incident.actor.kind.to_string(), true)
        .field("Blacklist Reason", self.reason, true)
        .field("Strike Count", strike.to_string(), true)
        .field("Server", self.guild_name.clone(), true)
        .footer(format!("Strike {strike}"))
    }

    fn actor_notice(&self) -> Notice {
        Notice::new("Warning: You Unbanned a Blacklisted User", self.severity())
            .description("You unbanned a user who is globally blacklisted across the network.")
            .field("User Unbanned", self.user(), false)
            .field("Blacklist Reason", self.reason, true)
            .field("Server", self.guild_name.clone(), true)
            .field(
                "Strike Status",
                format!("Strike {} for this server", self.incident.strike),
                true,
            )
    }

    fn owner_notice(&self) -> Notice {
        let (title, description) = match self.incident.strike {
            1 => (
                "Server Notice: First Strike".to_string(),
                format!(
                    "**NOTICE:** Your server **{}** has received its **FIRST STRIKE** for unbanning a blacklisted user.",
                    self.guild_name
                ),
            ),
            2 => (
                "Server Warning: Second Strike".to_string(),
                format!(
                    "**WARNING:** Your server **{}** has received its **SECOND STRIKE** for unbanning blacklisted users.",
                    self.guild_name
                ),
            ),
            n => (
                format!("Strike #{n} Notification"),
                format!(
                    "**NOTICE:** Your server **{}** has received strike **#{n}** for unbanning blacklisted users.",
                    self.guild_name
                ),
            ),
        };
        Notice::new(title, self.severity())
            .description(description)
            .field("User Unbanned", self.user(), true)
            .field("Unbanned By", self.incident.actor.display(), true)
            .field("Blacklist Reason", self.reason, true)
            .field("Server", self.guild_name.clone(), true)
    }

    fn fallback_notice(&self, owner_id: u64) -> Notice {
        Notice::new("First Strike Issued", Severity::Notice)
            .description(format!(
                "This server **{}** has received strike **1** for unbanning a blacklisted user.",
                self.guild_name
            ))
            .field("User Unbanned", self.user(), true)
            .field("Unbanned By", self.incident.actor.display(), true)
            .field("Blacklist Reason", self.reason, true)
            .field(
                "Action Required",
                format!(
                    "<@{owner_id}> Please enable DMs from server members so urgent issues like this can reach you directly. Continued violations may get this server blacklisted."
                ),
                false,
            )
    }
}

pub struct NotificationDispatcher {
    platform: Arc<dyn Platform>,
    store: Arc<dyn Store>,
    silence: SilenceGuard,
}

impl NotificationDispatcher {
    pub fn new(platform: Arc<dyn Platform>, store: Arc<dyn Store>, silence: SilenceGuard) -> Self {
        Self {
            platform,
            store,
            silence,
        }
    }

    /// Notify every audience about `incident`
    ///
    /// A silenced guild gets nothing at all, not even the audit record.
    pub async fn notify(&self, incident: &Incident) -> DeliveryReport {
        if self.silence.is_silenced(incident.guild_id).await {
            debug!(
                target: ENFORCEMENT_TARGET,
                guild_id = incident.guild_id,
                "Guild is silenced, skipping notifications"
            );
            return DeliveryReport::silenced();
        }

        let guild_name = self
            .platform
            .guild_name(incident.guild_id)
            .await
            .unwrap_or_else(|| "Unknown Guild".to_string());
        let user = self.platform.resolve_or_placeholder(incident.user_id).await;
        let rendering = Rendering {
            incident,
            guild_name,
            user_tag: user.tag,
            reason: incident.blacklist_reason.as_deref().unwrap_or(NO_REASON),
        };

        let actor_warned = self.warn_actor(&rendering).await;
        let owner = self.notify_owner(&rendering).await;
        let audit_logged = match self.platform.audit_log(&rendering.audit_notice()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(guild_id = incident.guild_id, error = %e, "Failed to post strike audit record");
                false
            }
        };

        info!(
            target: ENFORCEMENT_TARGET,
            event = "notify",
            guild_id = incident.guild_id,
            strike = incident.strike,
            actor_warned,
            owner = ?owner,
            audit_logged,
            "Strike notifications sent"
        );
        DeliveryReport {
            silenced: false,
            actor_warned,
            owner,
            audit_logged,
        }
    }

    /// Bots and unattributed unbans get no direct warning
    async fn warn_actor(&self, rendering: &Rendering<'_>) -> bool {
        let actor = &rendering.incident.actor;
        let Some(actor_id) = actor.id.filter(|_| actor.kind == ActorType::User) else {
            debug!(kind = %actor.kind, "No direct warning for this actor");
            return false;
        };
        match self
            .platform
            .direct_message(actor_id, &rendering.actor_notice())
            .await
        {
            Ok(()) => true,
            Err(e) => {
                debug!(actor_id, error = %e, "Could not warn unbanning actor");
                false
            }
        }
    }

    async fn notify_owner(&self, rendering: &Rendering<'_>) -> OwnerDelivery {
        let guild_id = rendering.incident.guild_id;
        let owner_id = match self.platform.owner(guild_id).await {
            Ok(owner_id) => owner_id,
            Err(e) => {
                warn!(guild_id, error = %e, "Could not resolve guild owner");
                return OwnerDelivery::Unreachable;
            }
        };

        let error = match self
            .platform
            .direct_message(owner_id, &rendering.owner_notice())
            .await
        {
            Ok(()) => return OwnerDelivery::Direct,
            Err(e) => e,
        };
        debug!(guild_id, owner_id, %error, "Owner DM failed");

        if rendering.incident.strike != 1 {
            info!(
                guild_id,
                strike = rendering.incident.strike,
                "Owner DMs still closed, no channel fallback"
            );
            return OwnerDelivery::Unreachable;
        }

        match self.store.owner_notification(guild_id).await {
            Ok(None) => {}
            Ok(Some(_)) => return OwnerDelivery::FallbackSuppressed,
            Err(e) => {
                warn!(guild_id, error = %e, "Could not read owner notification status");
                return OwnerDelivery::Unreachable;
            }
        }

        let Some(channel_id) = self.platform.writable_channel(guild_id).await else {
            info!(guild_id, "No writable channel for owner fallback");
            return OwnerDelivery::Unreachable;
        };
        if let Err(e) = self
            .platform
            .post(channel_id, Some(owner_id), &rendering.fallback_notice(owner_id))
            .await
        {
            warn!(guild_id, channel_id, error = %e, "Owner fallback post failed");
            return OwnerDelivery::Unreachable;
        }
        if let Err(e) = self.store.mark_owner_notified(guild_id).await {
            warn!(guild_id, error = %e, "Failed to record owner fallback");
        }
        OwnerDelivery::Fallback
    }
}
