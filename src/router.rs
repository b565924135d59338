//! Command routing: decides what an inbound event means and answers it.

use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::errors::PlatformError;
use crate::formatter::{Formatted, ResponseFormatter, ATTACHMENT_CAPTION};
use crate::identifier::UserIdentifier;
use crate::message_log::{LogRecord, MessageLog};
use crate::platform::{
    Author, ChatPlatform, Embed, EmbedColor, EventSource, InboundEvent, OutgoingMessage,
    ReplyTarget, SentMessage, SlashCommand, UserProfile,
};
use crate::relay::{AiRequest, Completer};

const REACTIONS: [&str; 2] = ["👍", "👎🏿"];

const PERMISSION_DENIED: &str = "❌ You need administrator permissions to use this command.";
const INVALID_USER_FORMAT: &str =
    "❌ Invalid user format. Use: ID, @mention, or username#discriminator";

/// Router behaviour taken from the configuration at construction.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub command_prefix: String,
    /// Overrides the application owner reported by the platform
    pub owner_id: Option<u64>,
    pub auto_reply_model: String,
    pub empty_dm_reply: String,
    /// Also log the answers of ask / senddm / reply
    pub log_command_replies: bool,
}

impl RouterSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            command_prefix: config.discord.command_prefix.clone(),
            owner_id: config.discord.owner_id,
            auto_reply_model: config.ai.auto_reply_model.clone(),
            empty_dm_reply: config.responses.empty_dm_reply.clone(),
            log_command_replies: config.log.command_replies,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ask { prompt: String, model: Option<String> },
    SendDm { user: String, message: String },
    Reply { text: String },
    /// A known command with missing arguments
    Usage(&'static str),
}

impl From<SlashCommand> for Command {
    fn from(command: SlashCommand) -> Self {
        match command {
            SlashCommand::Ask { prompt, model } => Command::Ask { prompt, model },
            SlashCommand::SendDm { user, message } => Command::SendDm { user, message },
        }
    }
}

/// The single handler an event is dispatched to.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Ignore,
    AutoReply,
    Command(Command),
}

/// Parse a prefix command such as `§reply hello`.
///
/// Returns `None` when `text` does not start with `prefix` or names an
/// unknown command. A prefix followed directly by whitespace is an alias for
/// `reply`.
pub fn parse_prefix_command(prefix: &str, text: &str) -> Option<Command> {
    let rest = text.strip_prefix(prefix)?;

    if rest.starts_with(char::is_whitespace) {
        let text = rest.trim();
        return Some(if text.is_empty() {
            Command::Usage("Usage: §reply <text>")
        } else {
            Command::Reply {
                text: text.to_string(),
            }
        });
    }

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    match name {
        "reply" if args.is_empty() => Some(Command::Usage("Usage: §reply <text>")),
        "reply" => Some(Command::Reply {
            text: args.to_string(),
        }),
        "ask" if args.is_empty() => Some(Command::Usage("Usage: §ask <prompt>")),
        "ask" => Some(Command::Ask {
            prompt: args.to_string(),
            model: None,
        }),
        "senddm" => match args.split_once(char::is_whitespace) {
            Some((user, message)) if !message.trim().is_empty() => Some(Command::SendDm {
                user: user.to_string(),
                message: message.trim().to_string(),
            }),
            _ => Some(Command::Usage("Usage: §senddm <user> <message>")),
        },
        _ => None,
    }
}

/// Why send-dm could not find its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFound {
    /// Mention or id unknown to the platform
    UnknownUser,
    /// `name#discriminator` not present in any shared guild
    NotInSharedGuilds,
    /// Bare name not present in the current or any shared guild
    UnknownName,
}

impl NotFound {
    pub fn message(self) -> &'static str {
        match self {
            NotFound::UnknownUser => "❌ User not found. Make sure the ID or username is correct.",
            NotFound::NotInSharedGuilds => {
                "❌ User not found in any shared servers. Try using their user ID instead."
            }
            NotFound::UnknownName => {
                "❌ User not found. Try using their full username#discriminator or user ID."
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Found(UserProfile),
    NotFound(NotFound),
    Invalid,
    /// The platform failed while looking the user up
    Failed(String),
}

/// A response that reached the platform.
struct Delivered {
    sent: SentMessage,
    inline: bool,
}

pub struct Router {
    relay: Arc<dyn Completer>,
    formatter: ResponseFormatter,
    log: MessageLog,
    settings: RouterSettings,
}

impl Router {
    pub fn new(
        relay: Arc<dyn Completer>,
        formatter: ResponseFormatter,
        log: MessageLog,
        settings: RouterSettings,
    ) -> Self {
        Self {
            relay,
            formatter,
            log,
            settings,
        }
    }

    /// Bot-authored messages, the bot's own included, are never dispatched.
    pub fn route(&self, platform: &dyn ChatPlatform, event: &InboundEvent) -> Route {
        if event.author.bot || event.author.id == platform.bot_user().id {
            return Route::Ignore;
        }

        if let EventSource::Slash { command, .. } = &event.source {
            return Route::Command(command.clone().into());
        }

        if event.content.starts_with(&self.settings.command_prefix) {
            return match parse_prefix_command(&self.settings.command_prefix, &event.content) {
                Some(command) => Route::Command(command),
                None => {
                    debug!("Unknown command: {}", event.content);
                    Route::Ignore
                }
            };
        }

        if event.origin.is_direct() {
            return Route::AutoReply;
        }

        Route::Ignore
    }

    /// Log `event`, then dispatch it to exactly one handler.
    pub async fn handle(&self, platform: &dyn ChatPlatform, event: InboundEvent) -> Result<()> {
        self.log.append(&LogRecord::inbound(&event))?;

        match self.route(platform, &event) {
            Route::Ignore => Ok(()),
            Route::AutoReply => self.auto_reply(platform, &event).await,
            Route::Command(command) => self.run_command(platform, &event, command).await,
        }
    }

    async fn run_command(
        &self,
        platform: &dyn ChatPlatform,
        event: &InboundEvent,
        command: Command,
    ) -> Result<()> {
        info!(
            "Command from {} ({}): {}",
            event.author.name, event.author.id, event.content
        );

        match command {
            Command::Ask { prompt, model } => self.ask(platform, event, prompt, model).await,
            Command::SendDm { user, message } => {
                self.send_dm(platform, event, &user, &message).await
            }
            Command::Reply { text } => self.reply(platform, event, text).await,
            Command::Usage(usage) => {
                platform
                    .send(&event.reply_target(true), OutgoingMessage::text(usage))
                    .await?;
                Ok(())
            }
        }
    }

    /// Answer a plain direct message. Failures are logged and swallowed.
    async fn auto_reply(&self, platform: &dyn ChatPlatform, event: &InboundEvent) -> Result<()> {
        let response = if event.content.trim().is_empty() {
            self.settings.empty_dm_reply.clone()
        } else {
            let request = AiRequest::new(
                event.content.clone(),
                Some(self.settings.auto_reply_model.clone()),
            );
            match self.relay.complete(&request).await {
                Ok(response) => response.text,
                Err(e) => {
                    error!("Error responding to DM from {}: {}", event.author.name, e);
                    return Ok(());
                }
            }
        };

        let target = event.reply_target(false);
        match self
            .deliver(platform, &target, &response, OutgoingMessage::text)
            .await
        {
            Ok(_) => self.append_reply(platform, event, "DM", &response),
            Err(e) => {
                if is_forbidden(&e) {
                    warn!("Cannot send DM to {}", event.author.name);
                } else {
                    error!("Error responding to DM from {}: {:#}", event.author.name, e);
                }
                Ok(())
            }
        }
    }

    async fn ask(
        &self,
        platform: &dyn ChatPlatform,
        event: &InboundEvent,
        prompt: String,
        model: Option<String>,
    ) -> Result<()> {
        let target = event.reply_target(false);
        if event.is_slash() {
            platform.defer(&target, false).await?;
        }

        let request = AiRequest::new(prompt, model);
        let response = match self.relay.complete(&request).await {
            Ok(response) => response,
            Err(e) => {
                error!("AI request from {} failed: {}", event.author.name, e);
                platform
                    .send(&target, OutgoingMessage::text(format!("❌ Error: {}", e)))
                    .await?;
                return Ok(());
            }
        };

        let footer = request
            .model
            .as_ref()
            .map(|_| format!("Model: {}", response.model));
        let delivered = self
            .deliver(platform, &target, &response.text, |text| {
                let mut embed = Embed::new("AI Response", text);
                if let Some(footer) = footer {
                    embed = embed.footer(footer);
                }
                OutgoingMessage::embed(embed)
            })
            .await?;

        if delivered.inline {
            for emoji in REACTIONS {
                if let Err(e) = platform.add_reaction(&delivered.sent, emoji).await {
                    warn!("Failed to add reaction {}: {}", emoji, e);
                }
            }
        }

        self.append_command_reply(platform, event, "ask", &response.text)
    }

    async fn reply(
        &self,
        platform: &dyn ChatPlatform,
        event: &InboundEvent,
        text: String,
    ) -> Result<()> {
        let target = event.reply_target(true);

        let response = match self.relay.complete(&AiRequest::new(text, None)).await {
            Ok(response) => response,
            Err(e) => {
                error!("AI request from {} failed: {}", event.author.name, e);
                platform
                    .send(&target, OutgoingMessage::text(format!("❌ Error: {}", e)))
                    .await?;
                return Ok(());
            }
        };

        self.deliver(platform, &target, &response.text, OutgoingMessage::text)
            .await?;
        self.append_command_reply(platform, event, "reply", &response.text)
    }

    async fn send_dm(
        &self,
        platform: &dyn ChatPlatform,
        event: &InboundEvent,
        user: &str,
        message: &str,
    ) -> Result<()> {
        if event.is_slash() {
            platform.defer(&event.reply_target(false), true).await?;
        }

        if !self.is_privileged(platform, &event.author) {
            info!(
                "Rejected senddm from {} ({}): not an administrator",
                event.author.name, event.author.id
            );
            return self
                .notify_invoker(platform, event, OutgoingMessage::text(PERMISSION_DENIED))
                .await;
        }

        let target = match self.resolve_user(platform, event, user).await {
            Resolution::Found(profile) => profile,
            Resolution::NotFound(reason) => {
                return self
                    .notify_invoker(platform, event, OutgoingMessage::text(reason.message()))
                    .await;
            }
            Resolution::Invalid => {
                return self
                    .notify_invoker(platform, event, OutgoingMessage::text(INVALID_USER_FORMAT))
                    .await;
            }
            Resolution::Failed(reason) => {
                return self
                    .notify_invoker(
                        platform,
                        event,
                        OutgoingMessage::text(format!("❌ Unexpected error: {}", reason)),
                    )
                    .await;
            }
        };

        let mut embed = Embed::new(
            format!("Message from {}", event.author.display_name),
            message,
        )
        .color(EmbedColor::Blue)
        .timestamp(Local::now());
        if let Some(guild) = event.origin.guild_name() {
            embed = embed.footer(format!("Server: {}", guild));
        }

        match platform
            .send_direct(target.id, OutgoingMessage::embed(embed))
            .await
        {
            Ok(_) => {
                info!("Sent DM from {} to {}", event.author.name, target.id);
                let receipt = Embed::new(
                    "✅ DM Sent Successfully",
                    format!("**To:** {}\n**Message sent!**", target.mention()),
                )
                .color(EmbedColor::Green)
                .field("User ID", format!("`{}`", target.id), false);
                self.notify_invoker(platform, event, OutgoingMessage::embed(receipt))
                    .await?;
                self.append_command_reply(platform, event, "senddm", message)
            }
            Err(e) if e.is_forbidden() => {
                warn!("Cannot send DM to {}: {}", target.id, e);
                self.notify_invoker(
                    platform,
                    event,
                    OutgoingMessage::text(format!(
                        "❌ Cannot send DM to {}. They might have DMs disabled.",
                        target.mention()
                    )),
                )
                .await
            }
            Err(e) => {
                error!("Failed to send DM to {}: {}", target.id, e);
                self.notify_invoker(
                    platform,
                    event,
                    OutgoingMessage::text(format!("❌ Error: {}", e)),
                )
                .await
            }
        }
    }

    fn is_privileged(&self, platform: &dyn ChatPlatform, author: &Author) -> bool {
        let owner = self.settings.owner_id.or_else(|| platform.application_owner());
        author.administrator || owner == Some(author.id)
    }

    /// Find the send-dm target. The first identifier form that matches
    /// syntactically is the only one tried.
    pub async fn resolve_user(
        &self,
        platform: &dyn ChatPlatform,
        event: &InboundEvent,
        raw: &str,
    ) -> Resolution {
        let identifier = match UserIdentifier::parse(raw) {
            Ok(identifier) => identifier,
            Err(e) => {
                debug!("{}", e);
                return Resolution::Invalid;
            }
        };

        match identifier {
            UserIdentifier::Mention(id) => fetch(platform, id).await,
            UserIdentifier::Id(id) => match platform.cached_user(id) {
                Some(profile) => Resolution::Found(profile),
                None => fetch(platform, id).await,
            },
            UserIdentifier::Tagged {
                name,
                discriminator,
            } => platform
                .guild_ids()
                .into_iter()
                .find_map(|guild| {
                    platform
                        .guild_members(guild)
                        .into_iter()
                        .find(|m| m.name == name && discriminator_matches(m, &discriminator))
                })
                .map_or(Resolution::NotFound(NotFound::NotInSharedGuilds), Resolution::Found),
            UserIdentifier::Name(name) => {
                let current = event.origin.guild_id();
                current
                    .into_iter()
                    .chain(platform.guild_ids())
                    .find_map(|guild| {
                        platform
                            .guild_members(guild)
                            .into_iter()
                            .find(|m| m.name == name)
                    })
                    .map_or(Resolution::NotFound(NotFound::UnknownName), Resolution::Found)
            }
        }
    }

    /// Deliver `text` inline (built by `inline`) or as a transient attachment.
    ///
    /// The attachment file is gone when this returns, whether or not the
    /// upload succeeded.
    async fn deliver(
        &self,
        platform: &dyn ChatPlatform,
        target: &ReplyTarget,
        text: &str,
        inline: impl FnOnce(String) -> OutgoingMessage,
    ) -> Result<Delivered> {
        match self.formatter.format(text).await? {
            Formatted::Inline(text) => {
                let sent = platform.send(target, inline(text)).await?;
                Ok(Delivered { sent, inline: true })
            }
            Formatted::Attachment(file) => {
                info!(
                    "Response is {} chars, sending as {}",
                    text.chars().count(),
                    file.file_name()
                );
                let result = platform
                    .send(
                        target,
                        OutgoingMessage::file(ATTACHMENT_CAPTION, file.path().to_path_buf()),
                    )
                    .await;
                drop(file);
                Ok(Delivered {
                    sent: result?,
                    inline: false,
                })
            }
        }
    }

    /// Send feedback only the invoker sees: ephemerally for slash commands,
    /// in place for direct messages, by DM for prefix commands in a guild.
    async fn notify_invoker(
        &self,
        platform: &dyn ChatPlatform,
        event: &InboundEvent,
        message: OutgoingMessage,
    ) -> Result<()> {
        if event.is_slash() {
            platform
                .send(&event.reply_target(false), message.ephemeral())
                .await?;
        } else if event.origin.is_direct() {
            platform.send(&event.reply_target(false), message).await?;
        } else if let Err(e) = platform.send_direct(event.author.id, message).await {
            warn!("Could not notify {} privately: {}", event.author.name, e);
        }
        Ok(())
    }

    fn append_reply(
        &self,
        platform: &dyn ChatPlatform,
        event: &InboundEvent,
        kind: &str,
        text: &str,
    ) -> Result<()> {
        let bot = platform.bot_user();
        self.log
            .append(&LogRecord::reply(event, kind, &bot.name, bot.id, text))
    }

    fn append_command_reply(
        &self,
        platform: &dyn ChatPlatform,
        event: &InboundEvent,
        kind: &str,
        text: &str,
    ) -> Result<()> {
        if self.settings.log_command_replies {
            self.append_reply(platform, event, kind, text)
        } else {
            Ok(())
        }
    }
}

async fn fetch(platform: &dyn ChatPlatform, id: u64) -> Resolution {
    match platform.fetch_user(id).await {
        Ok(Some(profile)) => Resolution::Found(profile),
        Ok(None) => Resolution::NotFound(NotFound::UnknownUser),
        Err(PlatformError::NotFound(_)) => Resolution::NotFound(NotFound::UnknownUser),
        Err(e) => Resolution::Failed(e.to_string()),
    }
}

/// Migrated accounts have no discriminator and match `0`.
fn discriminator_matches(profile: &UserProfile, discriminator: &str) -> bool {
    match profile.discriminator {
        Some(d) => discriminator.parse::<u16>() == Ok(d),
        None => discriminator == "0",
    }
}

fn is_forbidden(err: &anyhow::Error) -> bool {
    err.downcast_ref::<PlatformError>()
        .is_some_and(PlatformError::is_forbidden)
}
