//! Tracing setup and the poise command hooks
//!
//! Human-readable output goes to the console, structured JSON to a daily
//! rolling file under [`LOG_DIR`].

use crate::{COMMAND_TARGET, CONSOLE_TARGET, Context, Data, ERROR_TARGET, Error};
use poise::FrameworkError;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub const LOG_DIR: &str = "logs";
/// JSON log file prefix; commands, events and enforcement all land here
pub const LOG_FILE: &str = "sentinel";

/// Filter used when `RUST_LOG` is unset; serenity only reports failures
const DEFAULT_FILTER: &str = "info,serenity=error";

/// Install the global subscriber
pub fn init() -> Result<(), Error> {
    std::fs::create_dir_all(LOG_DIR)?;
    let log_file = RollingFileAppender::new(Rotation::DAILY, LOG_DIR, LOG_FILE);

    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_ansi(true))
        .with(
            fmt::layer()
                .json()
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .with_ansi(false)
                .with_writer(log_file),
        )
        .init();

    info!(target: CONSOLE_TARGET, log_dir = LOG_DIR, "Logging initialized");
    Ok(())
}

/// Start time kept in the invocation's own data slot, so concurrent
/// commands on different workers never see each other's clock
struct CommandStarted(Instant);

/// Who ran a command, and where
struct Invocation {
    command: String,
    guild: String,
    user_id: u64,
}

impl Invocation {
    fn of(ctx: Context<'_>) -> Self {
        Self {
            command: ctx.command().qualified_name.clone(),
            guild: ctx
                .guild_id()
                .map_or_else(|| "DM".to_string(), |id| id.get().to_string()),
            user_id: ctx.author().id.get(),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

pub async fn log_command_start(ctx: Context<'_>) {
    ctx.set_invocation_data(CommandStarted(Instant::now())).await;

    let invocation = Invocation::of(ctx);
    let arguments = if ctx.command().parameters.is_empty() {
        String::new()
    } else {
        ctx.invocation_string()
    };

    info!(
        target: COMMAND_TARGET,
        command = %invocation.command,
        guild_id = %invocation.guild,
        user_id = invocation.user_id,
        arguments = %arguments,
        event = "start",
        "Command started"
    );
}

pub async fn log_command_end(ctx: Context<'_>) {
    let elapsed = ctx
        .invocation_data::<CommandStarted>()
        .await
        .map(|started| started.0.elapsed());

    let invocation = Invocation::of(ctx);
    match elapsed {
        Some(elapsed) => info!(
            target: COMMAND_TARGET,
            command = %invocation.command,
            guild_id = %invocation.guild,
            user_id = invocation.user_id,
            duration_ms = millis(elapsed),
            event = "end",
            "Command completed"
        ),
        None => warn!(
            target: COMMAND_TARGET,
            command = %invocation.command,
            user_id = invocation.user_id,
            event = "end",
            "Command completed without a recorded start"
        ),
    }
}

pub fn log_command_error(error: &FrameworkError<'_, Data, Error>) {
    let (ctx, message, kind) = match error {
        FrameworkError::Command { error, ctx, .. } => (*ctx, error.to_string(), "command"),
        FrameworkError::CommandCheckFailed { error, ctx, .. } => (
            *ctx,
            error
                .as_ref()
                .map_or_else(|| "Not an operator".to_string(), ToString::to_string),
            "check",
        ),
        other => {
            error!(target: ERROR_TARGET, error = ?other, "Framework error");
            return;
        }
    };

    let invocation = Invocation::of(ctx);
    error!(
        target: ERROR_TARGET,
        command = %invocation.command,
        guild_id = %invocation.guild,
        user_id = invocation.user_id,
        kind,
        error = %message,
        "Command failed"
    );
}

pub fn log_console(message: String) {
    info!(target: CONSOLE_TARGET, event = "console", "{message}");
}
