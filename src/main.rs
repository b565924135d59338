mod config;
mod errors;
mod formatter;
mod identifier;
mod logging;
mod message_log;
mod platform;
mod relay;
mod router;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serenity::prelude::{Client, GatewayIntents};
use tracing::info;

use crate::config::{mask_secret, Config, ProcessEnv};
use crate::formatter::ResponseFormatter;
use crate::message_log::MessageLog;
use crate::platform::discord::Handler;
use crate::relay::PuterRelay;
use crate::router::{Router, RouterSettings};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path, &ProcessEnv)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    // Initialize logging
    let platform_log = (!config.discord.platform_log.is_empty())
        .then(|| Path::new(&config.discord.platform_log));
    logging::init(platform_log)?;

    info!("Configuration loaded from: {}", config_path.display());
    info!("  Token: {}", mask_secret(&config.discord.token));
    info!("  AI user: {}", config.ai.username);
    info!("  AI password: {}", mask_secret(&config.ai.password));
    info!("  Default model: {}", config.ai.default_model);
    info!("  Auto-reply model: {}", config.ai.auto_reply_model);
    info!("  Command prefix: {}", config.discord.command_prefix);
    info!("  Message log: {}", config.log.path.display());

    let relay = PuterRelay::new(config.ai.clone()).context("Failed to build AI client")?;
    let formatter = ResponseFormatter::new(
        config.responses.max_inline_chars,
        config.responses.attachment_dir.clone(),
    );
    let router = Arc::new(Router::new(
        Arc::new(relay),
        formatter,
        MessageLog::new(config.log.path.clone()),
        RouterSettings::from_config(&config),
    ));

    let intents = GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILDS;

    let mut client = Client::builder(&config.discord.token, intents)
        .event_handler(Handler::new(router, &config))
        .await
        .context("Failed to create Discord client")?;

    info!("Bot is starting...");
    client.start().await.context("Discord client stopped")?;

    Ok(())
}
