//! Driftbot: an auto-reply agent that rides an existing chat connection and
//! answers messages through a primary/secondary pair of inference providers.

pub mod cache;
pub mod chunk;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod notify;
pub mod orchestrator;
pub mod policy;
pub mod provider;
pub mod store;
pub mod transport;

pub use error::{Error, Result};

use serde::{Deserialize, Serialize};

/// Inbound message event delivered by the chat relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel_id: String,
    pub user_id: String,
    #[serde(default)]
    pub is_direct: bool,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// File attachment metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub url: String,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// Role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Parse a role from its stored form. Unknown values map to `User` so a
    /// corrupted row degrades to context noise instead of a load failure.
    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "assistant" => Role::Assistant,
            _ => Role::User,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
