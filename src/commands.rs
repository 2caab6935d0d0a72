//! Operator slash commands
//!
//! Thin wrappers that parse arguments, call into the enforcement engine and
//! render the result. All of them are limited to the control guild.

use crate::discord::notice_embed;
use crate::enforcement::metrics::format_duration;
use crate::enforcement::model::{GuildBlacklistEntry, ModLogEntry, UserBlacklistEntry};
use crate::enforcement::operator::{
    BlacklistReport, Page, PerformanceReport, SearchResult, StrikeSummary, UnblacklistReport,
};
use crate::enforcement::platform::{Notice, Severity};
use crate::enforcement::reconcile::ReconcileReport;
use crate::enforcement::{EnforcementError, EnforcementRequest};
use crate::{Context, Error};
use std::fmt::Write;
use tokio::sync::oneshot;

/// Failures listed in a command reply
const MAX_LISTED_FAILURES: usize = 5;
/// Room left for an embed description
const DESCRIPTION_LIMIT: usize = 4000;

/// Parse a raw id or a mention
fn parse_id(raw: &str) -> Result<u64, Error> {
    raw.trim()
        .trim_start_matches("<@")
        .trim_start_matches(['!', '&'])
        .trim_end_matches('>')
        .parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .ok_or_else(|| format!("`{raw}` is not a valid ID").into())
}

fn page_number(page: Option<u32>) -> usize {
    page.and_then(|p| usize::try_from(p).ok()).unwrap_or(1)
}

fn truncate_lines(lines: impl IntoIterator<Item = String>) -> String {
    let mut out = String::new();
    for line in lines {
        if out.len() + line.len() + 1 > DESCRIPTION_LIMIT {
            out.push_str("...");
            break;
        }
        out.push_str(&line);
        out.push('\n');
    }
    out
}

async fn reply(ctx: Context<'_>, notice: Notice) -> Result<(), Error> {
    ctx.send(poise::CreateReply::default().embed(notice_embed(&notice)))
        .await?;
    Ok(())
}

/// Operator errors become a visible reply instead of a failed command
async fn reply_error(ctx: Context<'_>, error: &EnforcementError) -> Result<(), Error> {
    let message = match error {
        EnforcementError::AlreadyBlacklisted(id) => format!("`{id}` is already blacklisted."),
        EnforcementError::NotBlacklisted(id) => format!("`{id}` is not blacklisted."),
        other => format!("Something went wrong: {other}"),
    };
    reply(ctx, Notice::new("Error", Severity::Critical).description(message)).await
}

/// Only operators inside the control guild may use these commands
async fn is_operator(ctx: Context<'_>) -> Result<bool, Error> {
    let config = &ctx.data().config;
    if ctx.guild_id().map(|id| id.get()) != Some(config.control_guild_id) {
        return Ok(false);
    }
    let roles: Vec<u64> = ctx
        .author_member()
        .await
        .map(|member| member.roles.iter().map(|r| r.get()).collect())
        .unwrap_or_default();
    Ok(config.is_operator(ctx.author().id.get(), &roles))
}

pub fn reconcile_notice(title: &str, report: &ReconcileReport) -> Notice {
    let severity = if report.failed.is_empty() {
        Severity::Success
    } else {
        Severity::Warning
    };
    Notice::new(title, severity).description(report.summary(MAX_LISTED_FAILURES))
}

pub fn blacklist_notice(report: &BlacklistReport) -> Notice {
    let user_id = report.entry.user_id;
    let mut notice = Notice::new("User Blacklisted", Severity::Critical)
        .description(format!("<@{user_id}> has been blacklisted globally"))
        .field("User ID", user_id.to_string(), true)
        .field("Reason", report.entry.reason.clone(), true)
        .field("Bans Applied", report.bans_applied().to_string(), true)
        .field(
            "DM Status",
            if report.dm_delivered { "Sent" } else { "Failed (DMs closed)" },
            true,
        );
    if !report.reconcile.failed.is_empty() {
        let failures = report
            .reconcile
            .failed
            .iter()
            .take(MAX_LISTED_FAILURES)
            .fold(String::new(), |mut acc, f| {
                let _ = writeln!(acc, "• {}: {}", f.guild_name, f.reason);
                acc
            });
        notice = notice.field("Failures", failures, false);
    }
    notice
}

pub fn unblacklist_notice(report: &UnblacklistReport) -> Notice {
    let user_id = report.entry.user_id;
    Notice::new("User Unblacklisted", Severity::Success)
        .description(format!("<@{user_id}> has been removed from the blacklist"))
        .field("User ID", user_id.to_string(), true)
        .field("Unbanned In", format!("{} server(s)", report.lift.unbanned.len()), true)
        .field("Unban Failures", report.lift.failed.len().to_string(), true)
}

pub fn users_page_notice(page: &Page<UserBlacklistEntry>) -> Notice {
    let mut notice = Notice::new("Blacklisted Users", Severity::Critical)
        .description(format!("Total blacklisted users: **{}**", page.total))
        .footer(format!("Page {}/{}", page.page, page.total_pages));
    for entry in &page.items {
        notice = notice.field(
            entry.user_id.to_string(),
            format!(
                "**Reason:** {}\n**Added by:** <@{}>\n**Date:** <t:{}:R>",
                entry.reason,
                entry.added_by,
                entry.added_at.timestamp()
            ),
            false,
        );
    }
    notice
}

pub fn guilds_page_notice(page: &Page<GuildBlacklistEntry>) -> Notice {
    let mut notice = Notice::new("Blacklisted Servers", Severity::Critical)
        .description(format!("Total blacklisted servers: **{}**", page.total))
        .footer(format!("Page {}/{}", page.page, page.total_pages));
    for entry in &page.items {
        notice = notice.field(
            entry.guild_id.to_string(),
            format!(
                "**Reason:** {}\n**Added by:** <@{}>\n**Date:** <t:{}:R>",
                entry.reason,
                entry.added_by,
                entry.added_at.timestamp()
            ),
            false,
        );
    }
    notice
}

pub fn search_notice(result: &SearchResult) -> Notice {
    let entry = &result.entry;
    let banned_in = if result.banned_in.is_empty() {
        "No servers".to_string()
    } else {
        format!("{} servers", result.banned_in.len())
    };
    let mut notice = Notice::new("Blacklist Entry", Severity::Critical)
        .field("User ID", entry.user_id.to_string(), true)
        .field("Reason", entry.reason.clone(), false)
        .field("Added By", format!("<@{}>", entry.added_by), true)
        .field("Added Date", format!("<t:{}:F>", entry.added_at.timestamp()), true)
        .field("Banned In", banned_in, true);
    if !result.banned_in.is_empty() {
        let mut list: String = result
            .banned_in
            .iter()
            .take(5)
            .map(|g| format!("• {}", g.name))
            .collect::<Vec<_>>()
            .join("\n");
        if result.banned_in.len() > 5 {
            let _ = write!(list, "\n...and {} more", result.banned_in.len() - 5);
        }
        notice = notice.field("Server List", list, false);
    }
    notice
}

pub fn strikes_notice(summary: &StrikeSummary) -> Notice {
    let record = &summary.record;
    let mut notice = Notice::new(
        format!("Strikes for {}", record.guild_name),
        Severity::for_strike(record.count),
    )
    .field("Guild ID", record.guild_id.to_string(), true)
    .field("Strike Count", record.count.to_string(), true)
    .field("Last Unbanned By", record.actor.display(), true)
    .field("Last Target", record.user_id.to_string(), true)
    .field("Last Strike", format!("<t:{}:R>", record.last_timestamp.timestamp()), true);
    if let Some(latest) = &summary.latest {
        notice = notice.field("Latest Log", latest.details.clone(), false);
    }
    notice
}

pub fn mod_logs_notice(subject_id: u64, logs: &[ModLogEntry]) -> Notice {
    let description = if logs.is_empty() {
        "No logs found.".to_string()
    } else {
        truncate_lines(logs.iter().map(|l| {
            format!(
                "**{}** <t:{}:R>\n{}",
                l.action,
                l.timestamp.timestamp(),
                l.details
            )
        }))
    };
    Notice::new(format!("Logs for {subject_id}"), Severity::Info).description(description)
}

pub fn performance_notice(report: &PerformanceReport) -> Notice {
    let s = &report.snapshot;
    let actions = if report.actions.is_empty() {
        "No samples in the last 24h".to_string()
    } else {
        report
            .actions
            .iter()
            .map(|a| format!("**{}**: {:.0}ms avg ({} samples)", a.action, a.average_ms, a.count))
            .collect::<Vec<_>>()
            .join("\n")
    };
    Notice::new("Performance Metrics", Severity::Info)
        .field("Uptime", format_duration(s.uptime), true)
        .field("Bans Executed", s.bans_executed.to_string(), true)
        .field("Unbans Executed", s.unbans_executed.to_string(), true)
        .field("Strikes Issued", s.strikes_issued.to_string(), true)
        .field("Successes", s.successes.to_string(), true)
        .field("Errors", s.errors.to_string(), true)
        .field("Last 24h", actions, false)
}

/// Blacklist commands
#[poise::command(
    slash_command,
    guild_only,
    check = "is_operator",
    subcommands(
        "blacklist_add",
        "blacklist_server",
        "blacklist_list",
        "blacklist_serverlist"
    ),
    subcommand_required
)]
pub async fn blacklist(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Blacklist a user globally
#[poise::command(slash_command, guild_only, check = "is_operator", rename = "add")]
pub async fn blacklist_add(
    ctx: Context<'_>,
    #[description = "User ID"] userid: String,
    #[description = "Reason"] reason: String,
) -> Result<(), Error> {
    let user_id = parse_id(&userid)?;
    ctx.defer().await?;
    match ctx
        .data()
        .service
        .operator()
        .blacklist_user(user_id, &reason, ctx.author().id.get())
        .await
    {
        Ok(report) => reply(ctx, blacklist_notice(&report)).await,
        Err(e) => reply_error(ctx, &e).await,
    }
}

/// Blacklist a server (the bot goes completely silent there)
#[poise::command(slash_command, guild_only, check = "is_operator", rename = "server")]
pub async fn blacklist_server(
    ctx: Context<'_>,
    #[description = "Server ID"] guildid: String,
    #[description = "Reason"] reason: String,
) -> Result<(), Error> {
    let guild_id = parse_id(&guildid)?;
    match ctx
        .data()
        .service
        .operator()
        .blacklist_guild(guild_id, &reason, ctx.author().id.get())
        .await
    {
        Ok(entry) => {
            reply(
                ctx,
                Notice::new("Server Blacklisted", Severity::Critical)
                    .description(format!("Server `{}` has been blacklisted", entry.guild_id))
                    .field("Reason", entry.reason, true),
            )
            .await
        }
        Err(e) => reply_error(ctx, &e).await,
    }
}

/// Show blacklisted users
#[poise::command(slash_command, guild_only, check = "is_operator", rename = "list")]
pub async fn blacklist_list(
    ctx: Context<'_>,
    #[description = "Page number"]
    #[min = 1]
    page: Option<u32>,
) -> Result<(), Error> {
    let page = ctx
        .data()
        .service
        .operator()
        .users_page(page_number(page))
        .await?;
    reply(ctx, users_page_notice(&page)).await
}

/// Show blacklisted servers
#[poise::command(slash_command, guild_only, check = "is_operator", rename = "serverlist")]
pub async fn blacklist_serverlist(
    ctx: Context<'_>,
    #[description = "Page number"]
    #[min = 1]
    page: Option<u32>,
) -> Result<(), Error> {
    let page = ctx
        .data()
        .service
        .operator()
        .guilds_page(page_number(page))
        .await?;
    reply(ctx, guilds_page_notice(&page)).await
}

/// Unblacklist commands
#[poise::command(
    slash_command,
    guild_only,
    check = "is_operator",
    subcommands("unblacklist_user", "unblacklist_server"),
    subcommand_required
)]
pub async fn unblacklist(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Remove a user from the global blacklist
#[poise::command(slash_command, guild_only, check = "is_operator", rename = "user")]
pub async fn unblacklist_user(
    ctx: Context<'_>,
    #[description = "User ID"] userid: String,
    #[description = "Reason"] reason: String,
) -> Result<(), Error> {
    let user_id = parse_id(&userid)?;
    ctx.defer().await?;
    match ctx
        .data()
        .service
        .operator()
        .unblacklist_user(user_id, &reason, ctx.author().id.get())
        .await
    {
        Ok(report) => reply(ctx, unblacklist_notice(&report)).await,
        Err(e) => reply_error(ctx, &e).await,
    }
}

/// Remove a server from the blacklist
#[poise::command(slash_command, guild_only, check = "is_operator", rename = "server")]
pub async fn unblacklist_server(
    ctx: Context<'_>,
    #[description = "Server ID"] guildid: String,
    #[description = "Reason"] reason: String,
) -> Result<(), Error> {
    let guild_id = parse_id(&guildid)?;
    match ctx
        .data()
        .service
        .operator()
        .unblacklist_guild(guild_id, &reason, ctx.author().id.get())
        .await
    {
        Ok(entry) => {
            reply(
                ctx,
                Notice::new("Server Unblacklisted", Severity::Success).description(format!(
                    "Server `{}` has been removed from the blacklist",
                    entry.guild_id
                )),
            )
            .await
        }
        Err(e) => reply_error(ctx, &e).await,
    }
}

/// Search for a user in the blacklist
#[poise::command(slash_command, guild_only, check = "is_operator")]
pub async fn search(
    ctx: Context<'_>,
    #[description = "User ID to search for"] userid: String,
) -> Result<(), Error> {
    let user_id = parse_id(&userid)?;
    ctx.defer().await?;
    match ctx.data().service.operator().search(user_id).await? {
        Some(result) => reply(ctx, search_notice(&result)).await,
        None => {
            reply(
                ctx,
                Notice::new("Not Found", Severity::Info)
                    .description(format!("`{user_id}` is not blacklisted.")),
            )
            .await
        }
    }
}

/// View mod logs for a user or server
#[poise::command(slash_command, guild_only, check = "is_operator")]
pub async fn modlogs(
    ctx: Context<'_>,
    #[description = "User or server ID"] id: String,
) -> Result<(), Error> {
    let subject_id = parse_id(&id)?;
    let logs = ctx.data().service.operator().mod_logs(subject_id).await?;
    reply(ctx, mod_logs_notice(subject_id, &logs)).await
}

/// View strike information for a guild
#[poise::command(slash_command, guild_only, check = "is_operator")]
pub async fn strikes(
    ctx: Context<'_>,
    #[description = "Guild ID (defaults to this server)"] guildid: Option<String>,
) -> Result<(), Error> {
    let guild_id = match guildid {
        Some(raw) => parse_id(&raw)?,
        None => ctx.guild_id().map(|id| id.get()).ok_or("No guild given")?,
    };
    match ctx.data().service.operator().strikes(guild_id).await? {
        Some(summary) => reply(ctx, strikes_notice(&summary)).await,
        None => {
            reply(
                ctx,
                Notice::new("No Strikes", Severity::Info)
                    .description(format!("No strikes recorded for `{guild_id}`.")),
            )
            .await
        }
    }
}

/// Re-enforce the blacklist across every server
#[poise::command(slash_command, guild_only, check = "is_operator")]
pub async fn reload(ctx: Context<'_>) -> Result<(), Error> {
    ctx.defer().await?;
    let (tx, report) = oneshot::channel();
    if !ctx
        .data()
        .request(EnforcementRequest::Reconcile { reply: Some(tx) })
        .await
    {
        return Err("The enforcement task is not running".into());
    }

    match report.await {
        Ok(report) => reply(ctx, reconcile_notice("Blacklist Re-enforced", &report?)).await,
        Err(_) => {
            reply(
                ctx,
                Notice::new("Sweep In Progress", Severity::Info)
                    .description("A sweep is already running. Its results will be logged."),
            )
            .await
        }
    }
}

/// View bot performance metrics
#[poise::command(slash_command, guild_only, check = "is_operator")]
pub async fn performance(ctx: Context<'_>) -> Result<(), Error> {
    let report = ctx.data().service.operator().performance().await?;
    reply(ctx, performance_notice(&report)).await
}

/// Every command the bot registers
#[must_use]
pub fn all() -> Vec<poise::Command<crate::Data, Error>> {
    vec![
        blacklist(),
        unblacklist(),
        search(),
        modlogs(),
        strikes(),
        reload(),
        performance(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enforcement::model::{Actor, StrikeRecord};
    use crate::enforcement::platform::GuildInfo;
    use crate::enforcement::reconcile::{FailedEntry, LiftReport};
    use chrono::Utc;

    #[test]
    fn test_parse_id_accepts_mentions() {
        assert_eq!(parse_id("123456789012345678").unwrap(), 123_456_789_012_345_678);
        assert_eq!(parse_id("<@123>").unwrap(), 123);
        assert_eq!(parse_id("<@!123>").unwrap(), 123);
        assert_eq!(parse_id(" 42 ").unwrap(), 42);
        assert!(parse_id("not-an-id").is_err());
    }

    #[test]
    fn test_command_tree() {
        let commands = all();
        let names: Vec<&str> = commands.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["blacklist", "unblacklist", "search", "modlogs", "strikes", "reload", "performance"]
        );

        let blacklist = &commands[0];
        let subs: Vec<&str> = blacklist.subcommands.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(subs, vec!["add", "server", "list", "serverlist"]);
        assert!(blacklist.guild_only);

        let unblacklist = &commands[1];
        let subs: Vec<&str> = unblacklist.subcommands.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(subs, vec!["user", "server"]);
    }

    #[test]
    fn test_blacklist_notice_lists_failures() {
        let report = BlacklistReport {
            entry: UserBlacklistEntry::new(42, "raiding", 7),
            reconcile: ReconcileReport {
                failed: vec![FailedEntry {
                    user_id: 42,
                    guild_id: 1,
                    guild_name: "Alpha".to_string(),
                    reason: "Missing Permissions".to_string(),
                }],
                ..ReconcileReport::default()
            },
            dm_delivered: false,
        };

        let notice = blacklist_notice(&report);
        assert_eq!(notice.field_value("Bans Applied"), Some("0"));
        assert_eq!(notice.field_value("DM Status"), Some("Failed (DMs closed)"));
        assert!(notice.field_value("Failures").unwrap().contains("Alpha"));
    }

    #[test]
    fn test_unblacklist_notice_counts() {
        let report = UnblacklistReport {
            entry: UserBlacklistEntry::new(42, "raiding", 7),
            lift: LiftReport {
                unbanned: vec![1, 2],
                failed: vec![3],
            },
        };
        let notice = unblacklist_notice(&report);
        assert_eq!(notice.field_value("Unbanned In"), Some("2 server(s)"));
        assert_eq!(notice.field_value("Unban Failures"), Some("1"));
    }

    #[test]
    fn test_search_notice_truncates_server_list() {
        let result = SearchResult {
            entry: UserBlacklistEntry::new(42, "raiding", 7),
            banned_in: (0..8)
                .map(|id| GuildInfo {
                    id,
                    name: format!("Guild {id}"),
                })
                .collect(),
        };
        let notice = search_notice(&result);
        assert_eq!(notice.field_value("Banned In"), Some("8 servers"));
        assert!(notice.field_value("Server List").unwrap().ends_with("...and 3 more"));
    }

    #[test]
    fn test_strikes_notice_severity_follows_count() {
        let summary = StrikeSummary {
            record: StrikeRecord {
                id: 1,
                guild_id: 10,
                guild_name: "Gamma".to_string(),
                user_id: 42,
                actor: Actor::unknown(),
                last_timestamp: Utc::now(),
                count: 2,
            },
            latest: None,
        };
        let notice = strikes_notice(&summary);
        assert_eq!(notice.severity, Severity::Warning);
        assert_eq!(notice.field_value("Strike Count"), Some("2"));
        assert_eq!(notice.field_value("Last Unbanned By"), Some("Unknown"));
    }

    #[test]
    fn test_mod_logs_notice_is_bounded() {
        let logs: Vec<ModLogEntry> = (0..200)
            .map(|id| ModLogEntry {
                id,
                subject_id: 42,
                action: "UNBAN_ATTEMPT".to_string(),
                details: "x".repeat(100),
                timestamp: Utc::now(),
            })
            .collect();
        let notice = mod_logs_notice(42, &logs);
        assert!(notice.description.len() <= DESCRIPTION_LIMIT + 3);
        assert!(notice.description.ends_with("..."));

        assert_eq!(mod_logs_notice(42, &[]).description, "No logs found.");
    }
}
