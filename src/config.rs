//! Configuration loading and validation.

use crate::error::{ConfigError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Driftbot configuration, loaded from a TOML file with API keys resolved
/// from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory path (SQLite database lives here).
    pub data_dir: PathBuf,

    /// Reply gating and formatting behavior.
    pub bot: BotConfig,

    /// Typing-simulation pacing.
    pub pacing: PacingConfig,

    /// Context assembly settings.
    pub context: ContextConfig,

    /// Ordered provider endpoints, primary first.
    pub providers: Vec<ProviderConfig>,

    /// Error webhook notification settings.
    pub notify: NotifyConfig,

    /// Relay transport addresses.
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// User id allowed to issue administrative commands.
    pub owner_id: String,

    /// Prefix marking a message as an administrative command.
    #[serde(default = "default_prefix")]
    pub command_prefix: String,

    /// Words that provoke a reply in an inactive channel
    /// (case-insensitive substring match).
    #[serde(default)]
    pub trigger_words: Vec<String>,

    /// Whether direct messages are answered at all.
    #[serde(default = "default_true")]
    pub allow_direct_messages: bool,

    /// Minimum seconds between consecutive replies in one channel.
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,

    /// Plain-text apology sent when every provider fails.
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,

    /// Platform per-message size limit.
    #[serde(default = "default_max_chunk_len")]
    pub max_chunk_len: usize,

    /// How long to wait for rapid follow-up messages before assembling
    /// context. Zero disables batching.
    #[serde(default)]
    pub batch_window_ms: u64,

    /// Days of conversation/error history to keep; zero disables cleanup.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PacingConfig {
    /// Lower bound of the random base typing delay.
    #[serde(default = "default_min_typing_ms")]
    pub min_typing_ms: u64,

    /// Upper bound of the random base typing delay.
    #[serde(default = "default_max_typing_ms")]
    pub max_typing_ms: u64,

    /// Additional delay per character of the reply.
    #[serde(default = "default_per_char_ms")]
    pub per_char_ms: u64,

    /// Hard cap on the total typing delay.
    #[serde(default = "default_typing_cap_ms")]
    pub typing_cap_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_typing_ms: default_min_typing_ms(),
            max_typing_ms: default_max_typing_ms(),
            per_char_ms: default_per_char_ms(),
            typing_cap_ms: default_typing_cap_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextConfig {
    /// Maximum conversation turns included in a prompt.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    /// System instructions prepended to every prompt.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            system_prompt: default_system_prompt(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Short name used in logs and ErrorRecords.
    pub name: String,

    /// Base URL of an OpenAI-compatible chat completions API.
    pub base_url: String,

    /// Model identifier to request.
    pub model: String,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    /// Resolved at load time, never serialized back out.
    #[serde(skip)]
    pub api_key: String,

    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Whether this endpoint accepts image attachments.
    #[serde(default)]
    pub vision: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifyConfig {
    /// Webhook URL for error summaries. None disables notification.
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Minimum seconds between notifications for one error category.
    #[serde(default = "default_notify_interval")]
    pub min_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Address the inbound relay endpoint binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// URL the relay exposes for outbound sends.
    pub relay_send_url: String,
}

/// Raw file shape before env resolution.
#[derive(Debug, Deserialize)]
struct FileConfig {
    #[serde(default)]
    data_dir: Option<PathBuf>,
    bot: BotConfig,
    #[serde(default)]
    pacing: PacingConfig,
    #[serde(default)]
    context: ContextConfig,
    #[serde(rename = "provider")]
    providers: Vec<ProviderConfig>,
    #[serde(default)]
    notify: NotifyConfig,
    transport: TransportConfig,
}

impl Config {
    /// Load configuration from the default location
    /// (`<data_dir>/driftbot/config.toml`).
    pub fn load() -> Result<Self> {
        let path = dirs::data_dir()
            .map(|d| d.join("driftbot").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("./driftbot.toml"));
        Self::load_from_path(&path)
    }

    /// Load configuration from a specific file path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Load {
            path: path.display().to_string(),
            source: Arc::new(source),
        })?;
        let mut config = Self::parse(&raw, &path.display().to_string())?;

        if config.data_dir.as_os_str().is_empty() {
            config.data_dir = dirs::data_dir()
                .map(|d| d.join("driftbot"))
                .unwrap_or_else(|| PathBuf::from("./data"));
        }
        std::fs::create_dir_all(&config.data_dir)?;
        Ok(config)
    }

    /// Parse and validate a TOML document. API keys are resolved from the
    /// environment here; a configured provider without its key is fatal.
    pub fn parse(raw: &str, origin: &str) -> Result<Self> {
        let file: FileConfig = toml::from_str(raw).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            detail: e.to_string(),
        })?;

        if file.providers.is_empty() {
            return Err(ConfigError::Invalid("at least one [[provider]] is required".into()).into());
        }
        if file.bot.max_chunk_len == 0 {
            return Err(ConfigError::Invalid("bot.max_chunk_len must be positive".into()).into());
        }
        if file.pacing.min_typing_ms > file.pacing.max_typing_ms {
            return Err(ConfigError::Invalid(
                "pacing.min_typing_ms must not exceed pacing.max_typing_ms".into(),
            )
            .into());
        }

        let mut providers = file.providers;
        for provider in &mut providers {
            provider.api_key = std::env::var(&provider.api_key_env)
                .map_err(|_| ConfigError::MissingKey(provider.api_key_env.clone()))?;
        }

        Ok(Self {
            data_dir: file.data_dir.unwrap_or_default(),
            bot: file.bot,
            pacing: file.pacing,
            context: file.context,
            providers,
            notify: file.notify,
            transport: file.transport,
        })
    }

    /// Path of the SQLite database.
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("driftbot.db")
    }
}

fn default_prefix() -> String {
    "~".into()
}

fn default_true() -> bool {
    true
}

fn default_cooldown() -> u64 {
    10
}

fn default_fallback_reply() -> String {
    "sorry, I'm having trouble thinking right now. try again in a bit?".into()
}

fn default_max_chunk_len() -> usize {
    2000
}

fn default_retention_days() -> u32 {
    30
}

fn default_min_typing_ms() -> u64 {
    1_500
}

fn default_max_typing_ms() -> u64 {
    4_000
}

fn default_per_char_ms() -> u64 {
    18
}

fn default_typing_cap_ms() -> u64 {
    12_000
}

fn default_max_turns() -> usize {
    20
}

fn default_system_prompt() -> String {
    "You are a helpful, friendly assistant. Be conversational and natural, \
     keep replies concise, and stay respectful to everyone in the channel."
        .into()
}

fn default_provider_timeout() -> u64 {
    30
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_notify_interval() -> u64 {
    300
}

fn default_bind_addr() -> String {
    "127.0.0.1:8787".into()
}
