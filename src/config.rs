use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Source of environment variables. Lets tests inject values.
pub trait ReadEnv {
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads from the real process environment.
pub struct ProcessEnv;

impl ReadEnv for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ModelChoice {
    pub name: String,
    pub value: String,
}

impl ModelChoice {
    fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscordConfig {
    /// Never read from the file; filled from `DISCORD_TOKEN`.
    #[serde(skip)]
    pub token: String,
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    #[serde(default)]
    pub owner_id: Option<u64>,
    #[serde(default = "default_true")]
    pub sync_commands: bool,
    /// Debug log of the platform library. Empty disables it.
    #[serde(default = "default_platform_log")]
    pub platform_log: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_login_url")]
    pub login_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_auto_reply_model")]
    pub auto_reply_model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_models")]
    pub models: Vec<ModelChoice>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "default_log_path")]
    pub path: PathBuf,
    /// Also record the bot's answers on the ask / senddm / reply paths.
    #[serde(default)]
    pub command_replies: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResponseConfig {
    #[serde(default = "default_max_inline_chars")]
    pub max_inline_chars: usize,
    #[serde(default = "default_attachment_dir")]
    pub attachment_dir: PathBuf,
    #[serde(default = "default_empty_dm_reply")]
    pub empty_dm_reply: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_discord_config")]
    pub discord: DiscordConfig,
    #[serde(default = "default_ai_config")]
    pub ai: AiConfig,
    #[serde(default = "default_log_config")]
    pub log: LogConfig,
    #[serde(default = "default_response_config")]
    pub responses: ResponseConfig,
}

fn default_true() -> bool {
    true
}

fn default_command_prefix() -> String {
    "§".to_string()
}

fn default_platform_log() -> String {
    "discord.log".to_string()
}

fn default_api_base_url() -> String {
    "https://api.puter.com".to_string()
}

fn default_login_url() -> String {
    "https://puter.com/login".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_auto_reply_model() -> String {
    "deepseek-chat".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_models() -> Vec<ModelChoice> {
    vec![
        ModelChoice::new("DeepSeek Chat", "deepseek-chat"),
        ModelChoice::new("DeepSeek DeepThink", "deepseek-reasoner"),
        ModelChoice::new("GPT-5", "gpt-5.1"),
        ModelChoice::new("GPT-4", "gpt-4o"),
        ModelChoice::new("Claude Opus", "claude-opus-4-5-latest"),
        ModelChoice::new("Claude Haiku", "claude-haiku-4.5"),
        ModelChoice::new("Claude Sonnet", "claude-sonnet-4.5"),
        ModelChoice::new("Grok 3", "grok-3"),
        ModelChoice::new("Grok Fast", "grok-3-fast"),
        ModelChoice::new("Grok Mini", "grok-3-mini"),
        ModelChoice::new("Grok Mini Fast", "grok-3-mini-fast"),
        ModelChoice::new("Gemini Flash", "gemini-2.5-flash"),
        ModelChoice::new("Gemini Flash Lite", "gemini-2.5-flash-lite"),
        ModelChoice::new("Gemini Pro", "gemini-2.5-pro"),
        ModelChoice::new("Qwen thinking", "openrouter:qwen/qwen3-vl-8b-thinking"),
        ModelChoice::new("Qwen instruct", "openrouter:qwen/qwen3-vl-8b-instruct"),
    ]
}

fn default_log_path() -> PathBuf {
    PathBuf::from("messages.log")
}

fn default_max_inline_chars() -> usize {
    2000
}

fn default_attachment_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_empty_dm_reply() -> String {
    "Hello! You sent an empty message.".to_string()
}

fn default_discord_config() -> DiscordConfig {
    DiscordConfig {
        token: String::new(),
        command_prefix: default_command_prefix(),
        owner_id: None,
        sync_commands: true,
        platform_log: default_platform_log(),
    }
}

fn default_ai_config() -> AiConfig {
    AiConfig {
        api_base_url: default_api_base_url(),
        login_url: default_login_url(),
        username: String::new(),
        password: String::new(),
        default_model: default_model(),
        auto_reply_model: default_auto_reply_model(),
        timeout_secs: default_timeout_secs(),
        models: default_models(),
    }
}

fn default_log_config() -> LogConfig {
    LogConfig {
        path: default_log_path(),
        command_replies: false,
    }
}

fn default_response_config() -> ResponseConfig {
    ResponseConfig {
        max_inline_chars: default_max_inline_chars(),
        attachment_dir: default_attachment_dir(),
        empty_dm_reply: default_empty_dm_reply(),
    }
}

/// Mask a secret for log output: first 4 chars + `***`.
pub fn mask_secret(secret: &str) -> String {
    if secret.chars().count() <= 8 {
        return "***".to_string();
    }
    let head: String = secret.chars().take(4).collect();
    format!("{}***", head)
}

fn non_blank(env: &dyn ReadEnv, key: &str) -> Option<String> {
    env.var(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    /// Parse a TOML document. Secrets from the environment are not applied.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Load the optional config file at `path`, then apply the environment.
    ///
    /// Fails when the platform token or the AI credentials are missing.
    pub fn load(path: &Path, env: &dyn ReadEnv) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml(&content)
                .with_context(|| format!("Invalid config file: {}", path.display()))?
        } else {
            Self::from_toml("")?
        };

        config.apply_env(env)?;
        Ok(config)
    }

    fn apply_env(&mut self, env: &dyn ReadEnv) -> Result<()> {
        self.discord.token = non_blank(env, "DISCORD_TOKEN")
            .context("No token found in environment variables (DISCORD_TOKEN)")?;

        if let Some(username) = non_blank(env, "PUTER_USERNAME") {
            self.ai.username = username;
        }
        if let Some(password) = non_blank(env, "PUTER_PASSWORD") {
            self.ai.password = password;
        }
        if self.ai.username.is_empty() || self.ai.password.is_empty() {
            anyhow::bail!(
                "AI provider credentials missing: set PUTER_USERNAME and PUTER_PASSWORD or [ai] username/password"
            );
        }

        if let Some(owner) = non_blank(env, "BOT_OWNER_ID") {
            let id = owner
                .parse::<u64>()
                .with_context(|| format!("BOT_OWNER_ID is not a numeric id: {}", owner))?;
            self.discord.owner_id = Some(id);
        }

        if self.responses.max_inline_chars == 0 {
            anyhow::bail!("[responses] max_inline_chars must be greater than zero");
        }

        Ok(())
    }
}
