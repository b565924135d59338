//! Discord adapter built on serenity.

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Local};
use serenity::all::{
    Cache, ChannelId, Colour, Command as AppCommand, CommandDataOptionValue, CommandInteraction,
    CommandOptionType, CreateAttachment, CreateCommand, CreateCommandOption, CreateEmbed,
    CreateEmbedFooter, CreateInteractionResponse, CreateInteractionResponseFollowup,
    CreateInteractionResponseMessage, CreateMessage, GuildId, Http, InteractionId, MessageId,
    Permissions, ReactionType, Timestamp, User, UserId,
};
use serenity::async_trait;
use serenity::model::application::Interaction;
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::prelude::*;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ModelChoice};
use crate::errors::PlatformError;
use crate::platform::{
    Author, ChatPlatform, Embed, EmbedColor, EventSource, InboundEvent, Origin, OutgoingMessage,
    ReplyTarget, SentMessage, SlashCommand, UserProfile,
};
use crate::router::Router;

const BLUE: u32 = 0x3498DB;
const GREEN: u32 = 0x2ECC71;

/// Outbound side of Discord: serenity's HTTP client plus the gateway cache.
pub struct DiscordPlatform {
    http: Arc<Http>,
    cache: Arc<Cache>,
    owner: Option<u64>,
}

impl DiscordPlatform {
    pub fn new(http: Arc<Http>, cache: Arc<Cache>, owner: Option<u64>) -> Self {
        Self { http, cache, owner }
    }

    async fn send_to_channel(
        &self,
        channel: ChannelId,
        reply_to: Option<u64>,
        message: OutgoingMessage,
    ) -> Result<SentMessage, PlatformError> {
        let mut builder = CreateMessage::new();
        if let Some(content) = message.content {
            builder = builder.content(content);
        }
        if let Some(embed) = message.embed {
            builder = builder.embed(to_serenity_embed(embed));
        }
        if let Some(path) = message.attachment {
            builder = builder.add_file(CreateAttachment::path(&path).await?);
        }
        if let Some(reply_id) = reply_to {
            builder = builder.reference_message((channel, MessageId::new(reply_id)));
        }

        let sent = channel.send_message(&*self.http, builder).await?;
        Ok(SentMessage {
            channel_id: sent.channel_id.get(),
            message_id: sent.id.get(),
        })
    }

    async fn follow_up(
        &self,
        token: &str,
        message: OutgoingMessage,
    ) -> Result<SentMessage, PlatformError> {
        let mut builder = CreateInteractionResponseFollowup::new().ephemeral(message.ephemeral);
        if let Some(content) = message.content {
            builder = builder.content(content);
        }
        if let Some(embed) = message.embed {
            builder = builder.embed(to_serenity_embed(embed));
        }
        let mut files = Vec::new();
        if let Some(path) = message.attachment {
            files.push(CreateAttachment::path(&path).await?);
        }

        let sent = self
            .http
            .create_followup_message(token, &builder, files)
            .await?;
        Ok(SentMessage {
            channel_id: sent.channel_id.get(),
            message_id: sent.id.get(),
        })
    }
}

#[async_trait]
impl ChatPlatform for DiscordPlatform {
    fn bot_user(&self) -> UserProfile {
        let me = self.cache.current_user();
        UserProfile {
            id: me.id.get(),
            name: legacy_name(&me),
            discriminator: me.discriminator.map(|d| d.get()),
        }
    }

    fn application_owner(&self) -> Option<u64> {
        self.owner
    }

    async fn defer(&self, target: &ReplyTarget, ephemeral: bool) -> Result<(), PlatformError> {
        let ReplyTarget::Interaction {
            interaction_id,
            token,
        } = target
        else {
            return Ok(());
        };

        let response = CreateInteractionResponse::Defer(
            CreateInteractionResponseMessage::new().ephemeral(ephemeral),
        );
        self.http
            .create_interaction_response(
                InteractionId::new(*interaction_id),
                token,
                &response,
                Vec::new(),
            )
            .await?;
        Ok(())
    }

    async fn send(
        &self,
        target: &ReplyTarget,
        message: OutgoingMessage,
    ) -> Result<SentMessage, PlatformError> {
        match target {
            ReplyTarget::Channel {
                channel_id,
                reply_to,
            } => {
                self.send_to_channel(ChannelId::new(*channel_id), *reply_to, message)
                    .await
            }
            ReplyTarget::Interaction { token, .. } => self.follow_up(token, message).await,
        }
    }

    async fn add_reaction(&self, message: &SentMessage, emoji: &str) -> Result<(), PlatformError> {
        self.http
            .create_reaction(
                ChannelId::new(message.channel_id),
                MessageId::new(message.message_id),
                &ReactionType::Unicode(emoji.to_string()),
            )
            .await?;
        Ok(())
    }

    async fn send_direct(
        &self,
        user_id: u64,
        message: OutgoingMessage,
    ) -> Result<SentMessage, PlatformError> {
        let channel = UserId::new(user_id).create_dm_channel(&*self.http).await?;
        self.send_to_channel(channel.id, None, message).await
    }

    fn cached_user(&self, user_id: u64) -> Option<UserProfile> {
        self.cache
            .user(UserId::new(user_id))
            .map(|user| to_profile(&user))
    }

    async fn fetch_user(&self, user_id: u64) -> Result<Option<UserProfile>, PlatformError> {
        match self.http.get_user(UserId::new(user_id)).await {
            Ok(user) => Ok(Some(to_profile(&user))),
            Err(e) => match PlatformError::from(e) {
                PlatformError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    fn guild_ids(&self) -> Vec<u64> {
        self.cache.guilds().into_iter().map(|g| g.get()).collect()
    }

    fn guild_members(&self, guild_id: u64) -> Vec<UserProfile> {
        self.cache
            .guild(GuildId::new(guild_id))
            .map(|guild| guild.members.values().map(|m| to_profile(&m.user)).collect())
            .unwrap_or_default()
    }
}

fn to_serenity_embed(embed: Embed) -> CreateEmbed {
    let mut out = CreateEmbed::new()
        .title(embed.title)
        .description(embed.description);
    if let Some(color) = embed.color {
        out = out.colour(Colour::new(match color {
            EmbedColor::Blue => BLUE,
            EmbedColor::Green => GREEN,
        }));
    }
    if let Some(footer) = embed.footer {
        out = out.footer(CreateEmbedFooter::new(footer));
    }
    if let Some(ts) = embed
        .timestamp
        .and_then(|t| Timestamp::from_unix_timestamp(t.timestamp()).ok())
    {
        out = out.timestamp(ts);
    }
    for field in embed.fields {
        out = out.field(field.name, field.value, field.inline);
    }
    out
}

/// `name#1234` for accounts that still carry a discriminator, else `name`.
fn legacy_name(user: &User) -> String {
    match user.discriminator {
        Some(d) => format!("{}#{:04}", user.name, d.get()),
        None => user.name.clone(),
    }
}

fn to_profile(user: &User) -> UserProfile {
    UserProfile {
        id: user.id.get(),
        name: user.name.clone(),
        discriminator: user.discriminator.map(|d| d.get()),
    }
}

fn author(user: &User, nick: Option<String>, permissions: Option<Permissions>) -> Author {
    Author {
        id: user.id.get(),
        name: legacy_name(user),
        display_name: nick.unwrap_or_else(|| user.display_name().to_string()),
        bot: user.bot,
        administrator: permissions.is_some_and(|p| p.administrator()),
    }
}

fn to_local(timestamp: &Timestamp) -> DateTime<Local> {
    DateTime::from_timestamp(timestamp.unix_timestamp(), 0)
        .map(|t| t.with_timezone(&Local))
        .unwrap_or_else(Local::now)
}

async fn origin(ctx: &Context, guild_id: Option<GuildId>, channel_id: ChannelId) -> Origin {
    match guild_id {
        Some(guild_id) => Origin::Guild {
            guild_id: guild_id.get(),
            guild_name: guild_id
                .name(&ctx.cache)
                .unwrap_or_else(|| "Unknown".to_string()),
            channel_id: channel_id.get(),
            channel_name: channel_id
                .name(ctx)
                .await
                .unwrap_or_else(|_| "unknown".to_string()),
        },
        None => Origin::Direct {
            channel_id: channel_id.get(),
        },
    }
}

fn string_option(cmd: &CommandInteraction, name: &str) -> Option<String> {
    cmd.data
        .options
        .iter()
        .find(|o| o.name == name)
        .and_then(|o| match &o.value {
            CommandDataOptionValue::String(s) => Some(s.clone()),
            _ => None,
        })
}

fn slash_command(cmd: &CommandInteraction) -> Option<SlashCommand> {
    match cmd.data.name.as_str() {
        "ask" => Some(SlashCommand::Ask {
            prompt: string_option(cmd, "prompt")?,
            model: string_option(cmd, "model"),
        }),
        "senddm" => Some(SlashCommand::SendDm {
            user: string_option(cmd, "user")?,
            message: string_option(cmd, "message")?,
        }),
        _ => None,
    }
}

/// Slash command definitions registered at startup.
pub fn command_definitions(models: &[ModelChoice]) -> Vec<CreateCommand> {
    let model = models.iter().fold(
        CreateCommandOption::new(CommandOptionType::String, "model", "AI model to use")
            .required(false),
        |option, choice| option.add_string_choice(&choice.name, &choice.value),
    );

    vec![
        CreateCommand::new("ask")
            .description("Ask the AI a question")
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "prompt",
                    "Your question or prompt",
                )
                .required(true),
            )
            .add_option(model),
        CreateCommand::new("senddm")
            .description("Send a DM to a user (Admin only)")
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "user",
                    "User ID, @mention, or username#discriminator",
                )
                .required(true),
            )
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "message",
                    "Message to send",
                )
                .required(true),
            ),
    ]
}

/// Gateway event handler. Normalizes events and hands them to the router.
pub struct Handler {
    router: Arc<Router>,
    models: Vec<ModelChoice>,
    sync_commands: bool,
    owner: OnceLock<u64>,
}

impl Handler {
    pub fn new(router: Arc<Router>, config: &Config) -> Self {
        Self {
            router,
            models: config.ai.models.clone(),
            sync_commands: config.discord.sync_commands,
            owner: OnceLock::new(),
        }
    }

    fn platform(&self, ctx: &Context) -> DiscordPlatform {
        DiscordPlatform::new(
            ctx.http.clone(),
            ctx.cache.clone(),
            self.owner.get().copied(),
        )
    }

    async fn dispatch(&self, ctx: &Context, event: InboundEvent) {
        let platform = self.platform(ctx);
        let author = event.author.name.clone();
        if let Err(e) = self.router.handle(&platform, event).await {
            error!("Error handling event from {}: {:#}", author, e);
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("Logged on as {}", legacy_name(&ready.user));

        match ctx.http.get_current_application_info().await {
            Ok(app) => {
                if let Some(owner) = app.owner {
                    debug!("Application owner: {}", owner.id);
                    let _ = self.owner.set(owner.id.get());
                }
            }
            Err(e) => warn!("Failed to fetch application info: {}", e),
        }

        if !self.sync_commands {
            return;
        }
        match AppCommand::set_global_commands(&ctx, command_definitions(&self.models)).await {
            Ok(commands) => info!("Synced {} command(s)", commands.len()),
            Err(e) => error!("Failed to sync commands: {}", e),
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        let permissions = match msg.guild_id {
            Some(_) => msg.author_permissions(&ctx.cache),
            None => None,
        };
        let nick = msg.member.as_ref().and_then(|m| m.nick.clone());

        let event = InboundEvent {
            author: author(&msg.author, nick, permissions),
            origin: origin(&ctx, msg.guild_id, msg.channel_id).await,
            content: msg.content.clone(),
            timestamp: to_local(&msg.timestamp),
            source: EventSource::Message {
                message_id: msg.id.get(),
            },
        };

        self.dispatch(&ctx, event).await;
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Command(cmd) = interaction else {
            return;
        };

        let Some(command) = slash_command(&cmd) else {
            warn!("Unhandled command: {}", cmd.data.name);
            return;
        };

        let member = cmd.member.as_deref();
        let event = InboundEvent {
            author: author(
                &cmd.user,
                member.and_then(|m| m.nick.clone()),
                member.and_then(|m| m.permissions),
            ),
            origin: origin(&ctx, cmd.guild_id, cmd.channel_id).await,
            content: command.render(),
            timestamp: Local::now(),
            source: EventSource::Slash {
                interaction_id: cmd.id.get(),
                token: cmd.token.clone(),
                command,
            },
        };

        self.dispatch(&ctx, event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn models() -> Vec<ModelChoice> {
        crate::config::Config::from_toml("").unwrap().ai.models
    }

    #[test]
    fn test_defines_ask_and_senddm() {
        let commands = command_definitions(&models());
        assert_eq!(commands.len(), 2);

        let json = serde_json::to_value(&commands).unwrap();
        assert_eq!(json[0]["name"], "ask");
        assert_eq!(json[1]["name"], "senddm");

        let ask_options = json[0]["options"].as_array().unwrap();
        assert_eq!(ask_options[0]["name"], "prompt");
        assert_eq!(ask_options[0]["required"], true);
        assert_eq!(ask_options[1]["name"], "model");
        assert_eq!(
            ask_options[1]["choices"].as_array().unwrap().len(),
            models().len()
        );
    }

    #[test]
    fn test_model_choices_fit_discord_limit() {
        assert!(models().len() <= 25);
    }

    #[test]
    fn test_embed_conversion_keeps_fields() {
        let embed = Embed::new("✅ DM Sent Successfully", "**To:** <@1>")
            .color(EmbedColor::Green)
            .footer("Server: Rustaceans")
            .field("User ID", "`1`", false);

        let json = serde_json::to_value(to_serenity_embed(embed)).unwrap();
        assert_eq!(json["title"], "✅ DM Sent Successfully");
        assert_eq!(json["color"], GREEN);
        assert_eq!(json["footer"]["text"], "Server: Rustaceans");
        assert_eq!(json["fields"][0]["name"], "User ID");
    }
}
