pub mod commands;
pub mod config;
pub mod data;
pub mod discord;
pub mod enforcement;
pub mod handlers;
pub mod logging;
#[cfg(test)]
pub(crate) mod testing;

pub const BOT_NAME: &str = "blacklist_sentinel";
pub const COMMAND_TARGET: &str = "blacklist_sentinel::command";
pub const ERROR_TARGET: &str = "blacklist_sentinel::error";
pub const EVENT_TARGET: &str = "blacklist_sentinel::handlers";
pub const ENFORCEMENT_TARGET: &str = "blacklist_sentinel::enforcement";
pub const CONSOLE_TARGET: &str = "blacklist_sentinel";

pub use data::{Data, DataInner};
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
