use std::env;
use std::sync::Arc;

use blacklist_sentinel::config::Config;
use blacklist_sentinel::discord::SerenityPlatform;
use blacklist_sentinel::enforcement::{
    EnforcementRequest, EnforcementService, PerformanceCounters, SilenceGuard, Store, YamlStore,
};
use blacklist_sentinel::{Data, Error, commands, handlers, logging};
use poise::serenity_prelude::{self as serenity, GatewayIntents, GuildId};
use tracing::{error, info, warn};

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    logging::init()?;

    let config = Config::load().await?;
    let token = env::var("DISCORD_TOKEN").map_err(|_| "DISCORD_TOKEN must be set")?;

    let store: Arc<dyn Store> = Arc::new(YamlStore::open(config.data_dir.clone()).await?);
    let metrics = Arc::new(PerformanceCounters::new());
    let (tx, rx) = EnforcementService::channel();
    let shutdown_tx = tx.clone();
    let handler = handlers::Handler::new(
        tx.clone(),
        SilenceGuard::new(Arc::clone(&store), config.silence_on_store_error),
    );

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(),
            pre_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_start(ctx).await;
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_end(ctx).await;
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    logging::log_command_error(&error);
                    if let Err(e) = poise::builtins::on_error(error).await {
                        error!("Error while handling error: {e}");
                    }
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                logging::log_console(format!(
                    "Registering commands in control guild {}",
                    config.control_guild_id
                ));
                poise::builtins::register_in_guild(
                    ctx,
                    &framework.options().commands,
                    GuildId::new(config.control_guild_id),
                )
                .await?;

                let platform = Arc::new(SerenityPlatform::new(
                    Arc::clone(&ctx.http),
                    Arc::clone(&ctx.cache),
                    config.log_channel_id,
                ));
                match platform.log_channel_guild().await {
                    Ok(Some(guild_id)) => config.check_log_channel(guild_id)?,
                    Ok(None) => warn!("No guild log channel configured; audit records are disabled"),
                    Err(e) => warn!(error = %e, "Could not resolve the log channel"),
                }
                let service = EnforcementService::new(
                    platform,
                    store,
                    metrics,
                    config.enforcement_settings(),
                );
                service
                    .clone()
                    .start(rx, config.initial_sweep_delay(), config.sweep_interval());

                Ok(Data::new(config, service, tx))
            })
        })
        .build();

    let intents = GatewayIntents::non_privileged();
    let mut client = serenity::ClientBuilder::new(token, intents)
        .event_handler(handler)
        .framework(framework)
        .await?;

    let shard_manager = Arc::clone(&client.shard_manager);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down...");
            if shutdown_tx.send(EnforcementRequest::Shutdown).await.is_err() {
                error!("Enforcement task already stopped");
            }
            shard_manager.shutdown_all().await;
        }
    });

    info!("Starting bot...");
    client.start().await?;

    Ok(())
}

fn main() {
    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime")
        .block_on(async_main());

    if let Err(err) = result {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
