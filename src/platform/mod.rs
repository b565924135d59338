pub mod discord;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Local};

use crate::errors::PlatformError;

/// Who sent an inbound event.
#[derive(Debug, Clone, PartialEq)]
pub struct Author {
    pub id: u64,
    /// Account name as shown in logs (`name` or legacy `name#1234`)
    pub name: String,
    pub display_name: String,
    pub bot: bool,
    /// Holds the administrator permission in the guild the event came from
    pub administrator: bool,
}

/// Where an inbound event came from.
#[derive(Debug, Clone, PartialEq)]
pub enum Origin {
    Guild {
        guild_id: u64,
        guild_name: String,
        channel_id: u64,
        channel_name: String,
    },
    Direct {
        channel_id: u64,
    },
}

impl Origin {
    pub fn is_direct(&self) -> bool {
        matches!(self, Origin::Direct { .. })
    }

    pub fn guild_id(&self) -> Option<u64> {
        match self {
            Origin::Guild { guild_id, .. } => Some(*guild_id),
            Origin::Direct { .. } => None,
        }
    }

    pub fn guild_name(&self) -> Option<&str> {
        match self {
            Origin::Guild { guild_name, .. } => Some(guild_name),
            Origin::Direct { .. } => None,
        }
    }

    pub fn channel_id(&self) -> u64 {
        match self {
            Origin::Guild { channel_id, .. } | Origin::Direct { channel_id } => *channel_id,
        }
    }
}

/// A platform-native structured command invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum SlashCommand {
    Ask { prompt: String, model: Option<String> },
    SendDm { user: String, message: String },
}

impl SlashCommand {
    /// Text recorded in the message log for this invocation.
    pub fn render(&self) -> String {
        match self {
            SlashCommand::Ask { prompt, .. } => format!("/ask {}", prompt),
            SlashCommand::SendDm { user, message } => {
                format!("/senddm user:{} message:{}", user, message)
            }
        }
    }
}

/// How an event arrived, and therefore how to answer it.
#[derive(Debug, Clone, PartialEq)]
pub enum EventSource {
    Message {
        message_id: u64,
    },
    Slash {
        interaction_id: u64,
        token: String,
        command: SlashCommand,
    },
}

/// One normalized inbound event, built once at the platform boundary.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub author: Author,
    pub origin: Origin,
    /// Raw message text, or the rendered slash invocation
    pub content: String,
    pub timestamp: DateTime<Local>,
    pub source: EventSource,
}

impl InboundEvent {
    pub fn is_slash(&self) -> bool {
        matches!(self.source, EventSource::Slash { .. })
    }

    /// Target for answers to this event. `reply` quotes the triggering
    /// message; slash commands always answer through the interaction.
    pub fn reply_target(&self, reply: bool) -> ReplyTarget {
        match &self.source {
            EventSource::Message { message_id } => ReplyTarget::Channel {
                channel_id: self.origin.channel_id(),
                reply_to: reply.then_some(*message_id),
            },
            EventSource::Slash {
                interaction_id,
                token,
                ..
            } => ReplyTarget::Interaction {
                interaction_id: *interaction_id,
                token: token.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyTarget {
    Channel {
        channel_id: u64,
        reply_to: Option<u64>,
    },
    Interaction {
        interaction_id: u64,
        token: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedColor {
    Blue,
    Green,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub color: Option<EmbedColor>,
    pub footer: Option<String>,
    pub timestamp: Option<DateTime<Local>>,
    pub fields: Vec<EmbedField>,
}

impl Embed {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn color(mut self, color: EmbedColor) -> Self {
        self.color = Some(color);
        self
    }

    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Local>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }
}

/// An outbound message: any combination of text, one embed, one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutgoingMessage {
    pub content: Option<String>,
    pub embed: Option<Embed>,
    pub attachment: Option<PathBuf>,
    /// Only visible to the invoker (slash commands only)
    pub ephemeral: bool,
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn embed(embed: Embed) -> Self {
        Self {
            embed: Some(embed),
            ..Default::default()
        }
    }

    pub fn file(caption: impl Into<String>, path: PathBuf) -> Self {
        Self {
            content: Some(caption.into()),
            attachment: Some(path),
            ..Default::default()
        }
    }

    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }
}

/// A message the bot has sent, for follow-up operations like reactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    pub channel_id: u64,
    pub message_id: u64,
}

/// A platform user as seen by send-dm resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub id: u64,
    pub name: String,
    /// Legacy four-digit discriminator, absent for migrated accounts
    pub discriminator: Option<u16>,
}

impl UserProfile {
    pub fn mention(&self) -> String {
        format!("<@{}>", self.id)
    }
}

/// Outbound operations and lookups the router needs from the chat platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// The bot's own account.
    fn bot_user(&self) -> UserProfile;

    /// Owner of the bot application, if the platform reported one.
    fn application_owner(&self) -> Option<u64>;

    /// Acknowledge a slash command before a slow answer.
    async fn defer(&self, target: &ReplyTarget, ephemeral: bool) -> Result<(), PlatformError>;

    async fn send(
        &self,
        target: &ReplyTarget,
        message: OutgoingMessage,
    ) -> Result<SentMessage, PlatformError>;

    async fn add_reaction(&self, message: &SentMessage, emoji: &str) -> Result<(), PlatformError>;

    /// Open (or reuse) a direct-message channel with `user_id` and send.
    async fn send_direct(
        &self,
        user_id: u64,
        message: OutgoingMessage,
    ) -> Result<SentMessage, PlatformError>;

    /// Look a user up in the local cache only.
    fn cached_user(&self, user_id: u64) -> Option<UserProfile>;

    /// Ask the platform API for a user. `Ok(None)` when it does not exist.
    async fn fetch_user(&self, user_id: u64) -> Result<Option<UserProfile>, PlatformError>;

    /// Guilds the bot is a member of.
    fn guild_ids(&self) -> Vec<u64>;

    /// Cached members of one guild.
    fn guild_members(&self, guild_id: u64) -> Vec<UserProfile>;
}
