//! Prompt context assembly: system instructions plus the channel's recent
//! conversation turns, oldest first.

use crate::config::ContextConfig;
use crate::error::StoreError;
use crate::store::{ConversationTurn, Store};
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Everything a provider call needs besides the attachments.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub system_prompt: String,
    pub turns: Vec<ConversationTurn>,
}

/// Builds prompt contexts from the store. The system prompt is swappable at
/// runtime by the set-system-prompt command without restarting.
pub struct ContextAssembler {
    store: Store,
    system_prompt: ArcSwap<String>,
    max_turns: usize,
}

impl ContextAssembler {
    pub fn new(store: Store, config: &ContextConfig) -> Self {
        Self {
            store,
            system_prompt: ArcSwap::from_pointee(config.system_prompt.clone()),
            max_turns: config.max_turns,
        }
    }

    /// The most recent `max_turns` turns for the channel, oldest first,
    /// under the current system prompt. Bounded by truncation from the
    /// front only, never summarization.
    pub async fn assemble(&self, channel_id: &str) -> Result<PromptContext, StoreError> {
        let turns = self
            .store
            .list_recent_turns(channel_id, self.max_turns as i64)
            .await?;
        Ok(PromptContext {
            system_prompt: self.system_prompt().to_string(),
            turns,
        })
    }

    /// Context used when the store is unreachable: system prompt only.
    pub fn degraded(&self) -> PromptContext {
        PromptContext {
            system_prompt: self.system_prompt().to_string(),
            turns: Vec::new(),
        }
    }

    pub fn system_prompt(&self) -> Arc<String> {
        self.system_prompt.load_full()
    }

    pub fn set_system_prompt(&self, prompt: &str) {
        self.system_prompt.store(Arc::new(prompt.to_string()));
    }
}
