//! Administrative commands: prefix-parsed, owner-only, resolved to a closed
//! enum at parse time. Anything unrecognized falls through to the normal
//! reply pipeline.

use crate::InboundMessage;
use crate::cache::StateCache;
use crate::context::ContextAssembler;
use crate::store::Store;
use std::sync::Arc;

/// The closed set of administrative operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Flip the current channel's activation flag.
    ToggleActive,
    Ignore { user_id: String },
    Unignore { user_id: String },
    SetSystemPrompt { prompt: String },
    /// Delete history older than the given days (or the configured default).
    Cleanup { days: Option<u32> },
    Status,
}

impl Command {
    /// Parse `text` as a command if it starts with the prefix. Returns
    /// `None` for ordinary messages and for malformed commands.
    pub fn parse(text: &str, prefix: &str) -> Option<Self> {
        let rest = text.trim().strip_prefix(prefix)?;
        let (word, args) = match rest.split_once(char::is_whitespace) {
            Some((word, args)) => (word, args.trim()),
            None => (rest, ""),
        };

        match word {
            "toggle" => Some(Command::ToggleActive),
            "ignore" if !args.is_empty() => Some(Command::Ignore {
                user_id: args.to_string(),
            }),
            "unignore" if !args.is_empty() => Some(Command::Unignore {
                user_id: args.to_string(),
            }),
            "prompt" if !args.is_empty() => Some(Command::SetSystemPrompt {
                prompt: args.to_string(),
            }),
            "cleanup" => Some(Command::Cleanup {
                days: args.parse().ok(),
            }),
            "status" => Some(Command::Status),
            _ => None,
        }
    }
}

/// Executes commands against the store, the flag cache, and the context
/// assembler. Write-through: the store row changes first, then the cache.
pub struct CommandHandler {
    store: Store,
    cache: Arc<StateCache>,
    assembler: Arc<ContextAssembler>,
    owner_id: String,
    prefix: String,
    default_retention_days: u32,
}

impl CommandHandler {
    pub fn new(
        store: Store,
        cache: Arc<StateCache>,
        assembler: Arc<ContextAssembler>,
        owner_id: &str,
        prefix: &str,
        default_retention_days: u32,
    ) -> Self {
        Self {
            store,
            cache,
            assembler,
            owner_id: owner_id.to_string(),
            prefix: prefix.to_string(),
            default_retention_days,
        }
    }

    /// Whether `text` parses as a command, regardless of sender.
    pub fn is_command(&self, text: &str) -> bool {
        Command::parse(text, &self.prefix).is_some()
    }

    /// Handle `message` as a command if it is one from the owner. Returns
    /// the confirmation text to send back, or `None` when the message
    /// should go through the normal pipeline instead.
    pub async fn handle(&self, message: &InboundMessage) -> Option<String> {
        let command = Command::parse(&message.text, &self.prefix)?;
        if message.user_id != self.owner_id {
            tracing::debug!(user_id = %message.user_id, "command from non-owner ignored");
            return None;
        }

        match self.execute(command, &message.channel_id).await {
            Ok(reply) => Some(reply),
            Err(error) => {
                tracing::warn!(%error, "command failed");
                Some("command failed, check the logs".to_string())
            }
        }
    }

    async fn execute(&self, command: Command, channel_id: &str) -> crate::Result<String> {
        match command {
            Command::ToggleActive => {
                let mut state = self.store.get_channel_state(channel_id).await?;
                state.active = !state.active;
                self.store.put_channel_state(&state).await?;
                self.cache.set_active(channel_id, state.active);
                Ok(if state.active {
                    "responses enabled in this channel".to_string()
                } else {
                    "responses disabled in this channel".to_string()
                })
            }
            Command::Ignore { user_id } => {
                self.set_ignored(&user_id, true).await?;
                Ok(format!("ignoring {user_id}"))
            }
            Command::Unignore { user_id } => {
                self.set_ignored(&user_id, false).await?;
                Ok(format!("no longer ignoring {user_id}"))
            }
            Command::SetSystemPrompt { prompt } => {
                self.assembler.set_system_prompt(&prompt);
                Ok("system prompt updated".to_string())
            }
            Command::Cleanup { days } => {
                let days = days.unwrap_or(self.default_retention_days);
                let cutoff = chrono::Utc::now() - chrono::Duration::days(days as i64);
                let (turns, errors) = self.store.delete_older_than(cutoff).await?;
                Ok(format!(
                    "cleaned up {turns} turns and {errors} errors older than {days} days"
                ))
            }
            Command::Status => {
                let active = self.store.active_channels().await?.len();
                let errors = self.store.recent_errors(5).await?;
                let mut lines = vec![format!("active channels: {active}")];
                if errors.is_empty() {
                    lines.push("no recent errors".to_string());
                } else {
                    lines.push(format!("last {} errors:", errors.len()));
                    for error in errors {
                        lines.push(format!("  [{}] {}", error.category, error.message));
                    }
                }
                Ok(lines.join("\n"))
            }
        }
    }

    async fn set_ignored(&self, user_id: &str, ignored: bool) -> crate::Result<()> {
        let mut pref = self.store.get_user_preference(user_id).await?;
        pref.ignored = ignored;
        self.store.put_user_preference(&pref).await?;
        self.cache.set_ignored(user_id, ignored);
        Ok(())
    }
}
