//! The message-response pipeline: gate, context, provider (with fallback),
//! pace/chunk/send, persist.
//!
//! Events enter through [`EventRouter::dispatch`], which feeds one queue per
//! channel with a single consumer task. Within a channel everything runs in
//! arrival order; unrelated channels proceed concurrently.

use crate::cache::StateCache;
use crate::chunk::split_reply;
use crate::commands::CommandHandler;
use crate::config::Config;
use crate::context::{ContextAssembler, PromptContext};
use crate::error::ProviderError;
use crate::notify::Notifier;
use crate::policy::{Decision, PacingHint, ResponsePolicy};
use crate::provider::ProviderAdapter;
use crate::store::{ChannelState, ConversationTurn, Store, UserPreference};
use crate::transport::ChatTransport;
use crate::{Attachment, InboundMessage, Role};
use rand::rngs::StdRng;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

/// Per-message coordinator. One instance per process; `handle_message` is
/// invoked by a channel's worker task, one event at a time.
pub struct Orchestrator {
    store: Store,
    cache: Arc<StateCache>,
    assembler: Arc<ContextAssembler>,
    provider: ProviderAdapter,
    transport: Arc<dyn ChatTransport>,
    commands: CommandHandler,
    policy: ResponsePolicy,
    notifier: Notifier,
    fallback_reply: String,
    max_chunk_len: usize,
    batch_window: Duration,
    rng: std::sync::Mutex<StdRng>,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        store: Store,
        cache: Arc<StateCache>,
        transport: Arc<dyn ChatTransport>,
        rng: StdRng,
    ) -> Self {
        let assembler = Arc::new(ContextAssembler::new(store.clone(), &config.context));
        let provider = ProviderAdapter::new(config.providers.clone(), store.clone());
        let commands = CommandHandler::new(
            store.clone(),
            cache.clone(),
            assembler.clone(),
            &config.bot.owner_id,
            &config.bot.command_prefix,
            config.bot.retention_days,
        );
        Self {
            store,
            cache,
            assembler,
            provider,
            transport,
            commands,
            policy: ResponsePolicy::new(&config.bot, config.pacing),
            notifier: Notifier::new(&config.notify),
            fallback_reply: config.bot.fallback_reply.clone(),
            max_chunk_len: config.bot.max_chunk_len,
            batch_window: Duration::from_millis(config.bot.batch_window_ms),
            rng: std::sync::Mutex::new(rng),
        }
    }

    /// Process one inbound event end to end. Never fails; every per-message
    /// problem degrades or gets logged here.
    ///
    /// `pending` is this channel's queue. During the batch window rapid
    /// follow-ups from the same user are drained out of it and merged into
    /// the prompt; anything else drained is returned for the worker to
    /// process next, still in order.
    pub async fn handle_message(
        &self,
        mut event: InboundMessage,
        pending: &mut mpsc::Receiver<InboundMessage>,
    ) -> Vec<InboundMessage> {
        if let Some(reply) = self.commands.handle(&event).await {
            if let Err(error) = self.transport.send_message(&event.channel_id, &reply).await {
                tracing::warn!(%error, "failed to send command reply");
            }
            return Vec::new();
        }

        if let Err(error) = self.store.record_message(&event.user_id).await {
            tracing::warn!(%error, "failed to bump message counter");
        }

        let hint = match self.gate(&event).await {
            Decision::Skip(reason) => {
                tracing::debug!(channel_id = %event.channel_id, ?reason, "skipping message");
                return Vec::new();
            }
            Decision::Respond(hint) => hint,
        };

        let mut deferred = Vec::new();
        if hint.batch && !self.batch_window.is_zero() {
            tokio::time::sleep(self.batch_window).await;
            self.drain_followups(&mut event, pending, &mut deferred)
                .await;
        }

        let context = self.assemble(&event).await;
        if let Some(reply) = self.complete(&context, &event).await {
            self.dispatch(&event, &reply, hint).await;
            self.persist(&event, &reply).await;
        }
        deferred
    }

    /// Merge queued same-user follow-ups into `event`; defer everything
    /// else. Commands are never merged.
    async fn drain_followups(
        &self,
        event: &mut InboundMessage,
        pending: &mut mpsc::Receiver<InboundMessage>,
        deferred: &mut Vec<InboundMessage>,
    ) {
        while let Ok(next) = pending.try_recv() {
            if next.user_id == event.user_id && !self.commands.is_command(&next.text) {
                tracing::debug!(channel_id = %event.channel_id, "merging rapid follow-up");
                if let Err(error) = self.store.record_message(&next.user_id).await {
                    tracing::warn!(%error, "failed to bump message counter");
                }
                event.text.push('\n');
                event.text.push_str(&next.text);
                event.attachments.extend(next.attachments);
            } else {
                deferred.push(next);
            }
        }
    }

    /// Load the gate inputs and run the policy. The cache is authoritative
    /// for the two toggled flags, so a store outage here falls back to the
    /// first-seen defaults and keeps serving.
    async fn gate(&self, event: &InboundMessage) -> Decision {
        let mut channel = match self.store.get_channel_state(&event.channel_id).await {
            Ok(channel) => channel,
            Err(error) => {
                tracing::warn!(%error, "store unreachable during gate, assuming defaults");
                ChannelState::new(&event.channel_id)
            }
        };
        let mut user = match self.store.get_user_preference(&event.user_id).await {
            Ok(user) => user,
            Err(error) => {
                tracing::warn!(%error, "store unreachable during gate, assuming defaults");
                UserPreference::new(&event.user_id)
            }
        };
        channel.active = self.cache.is_active(&event.channel_id);
        user.ignored = self.cache.is_ignored(&event.user_id);

        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        self.policy
            .decide(event, &channel, &user, chrono::Utc::now(), &mut *rng)
    }

    /// Recent history plus the incoming message as the final user turn.
    /// Store failure degrades to the system prompt alone.
    async fn assemble(&self, event: &InboundMessage) -> PromptContext {
        let mut context = match self.assembler.assemble(&event.channel_id).await {
            Ok(context) => context,
            Err(error) => {
                tracing::warn!(%error, "context assembly degraded to empty history");
                if let Err(error) = self
                    .store
                    .append_error(
                        "store_unavailable",
                        &error.to_string(),
                        Some(&event.channel_id),
                        Some(&event.user_id),
                    )
                    .await
                {
                    tracing::warn!(%error, "failed to record store error");
                }
                self.notifier
                    .notify("store_unavailable", "context assembly degraded")
                    .await;
                self.assembler.degraded()
            }
        };
        context.turns.push(ConversationTurn {
            id: String::new(),
            channel_id: event.channel_id.clone(),
            user_id: event.user_id.clone(),
            role: Role::User,
            content: event.text.clone(),
            created_at: event.timestamp,
        });
        context
    }

    /// Run the provider chain, degrading on capability gaps and falling
    /// back to the configured apology when every endpoint fails.
    async fn complete(&self, context: &PromptContext, event: &InboundMessage) -> Option<String> {
        let attachments: &[Attachment] = &event.attachments;
        match self
            .provider
            .complete(context, attachments, &event.channel_id, &event.user_id)
            .await
        {
            Ok(reply) => Some(reply),
            Err(ProviderError::CapabilityUnavailable { capability }) => {
                tracing::info!(%capability, "degrading to a text-only reply");
                let mut degraded = context.clone();
                degraded.system_prompt.push_str(
                    "\n\nNote: the user attached media you cannot see. \
                     Mention that limitation briefly in your reply.",
                );
                match self
                    .provider
                    .complete(&degraded, &[], &event.channel_id, &event.user_id)
                    .await
                {
                    Ok(reply) => Some(reply),
                    Err(error) => self.send_fallback(event, &error).await,
                }
            }
            Err(error) => self.send_fallback(event, &error).await,
        }
    }

    /// Apology path: the user still gets an answer, but no assistant turn
    /// is recorded since no genuine reply was produced.
    async fn send_fallback(&self, event: &InboundMessage, error: &ProviderError) -> Option<String> {
        tracing::error!(%error, channel_id = %event.channel_id, "all providers failed");
        if let Err(error) = self
            .store
            .append_error(
                error.category(),
                &format!("fallback reply sent: {error}"),
                Some(&event.channel_id),
                Some(&event.user_id),
            )
            .await
        {
            tracing::warn!(%error, "failed to record fallback");
        }
        self.notifier
            .notify(error.category(), &error.to_string())
            .await;

        if let Err(error) = self
            .transport
            .send_message(&event.channel_id, &self.fallback_reply)
            .await
        {
            tracing::warn!(%error, "failed to send fallback reply");
        }
        None
    }

    /// Chunk, pace, and send the reply. A failed chunk is dropped and the
    /// rest still go out.
    async fn dispatch(&self, event: &InboundMessage, reply: &str, hint: PacingHint) {
        let chunks = split_reply(reply, self.max_chunk_len);
        tokio::time::sleep(hint.typing_delay(reply.chars().count())).await;

        for (idx, chunk) in chunks.iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(hint.inter_chunk_delay(chunk.chars().count())).await;
            }
            match self.transport.send_message(&event.channel_id, chunk).await {
                Ok(message_id) => {
                    tracing::debug!(channel_id = %event.channel_id, %message_id, "chunk sent");
                }
                Err(error) => {
                    tracing::warn!(%error, "chunk send failed, continuing");
                    if let Err(error) = self
                        .store
                        .append_error(
                            "transport_send",
                            &error.to_string(),
                            Some(&event.channel_id),
                            Some(&event.user_id),
                        )
                        .await
                    {
                        tracing::warn!(%error, "failed to record transport error");
                    }
                }
            }
        }
    }

    /// Record both turns and stamp the cooldown. Write failures are logged,
    /// never rolled back; the reply already went out.
    async fn persist(&self, event: &InboundMessage, reply: &str) {
        if let Err(error) = self
            .store
            .append_turn(&event.channel_id, &event.user_id, Role::User, &event.text)
            .await
        {
            tracing::warn!(%error, "failed to persist user turn");
        }
        if let Err(error) = self
            .store
            .append_turn(&event.channel_id, &event.user_id, Role::Assistant, reply)
            .await
        {
            tracing::warn!(%error, "failed to persist assistant turn");
        }
        if let Err(error) = self.store.record_response(&event.user_id).await {
            tracing::warn!(%error, "failed to bump response counter");
        }

        match self.store.get_channel_state(&event.channel_id).await {
            Ok(mut state) => {
                state.active = self.cache.is_active(&event.channel_id);
                state.last_response_at = Some(chrono::Utc::now());
                if let Err(error) = self.store.put_channel_state(&state).await {
                    tracing::warn!(%error, "failed to stamp last response time");
                }
            }
            Err(error) => {
                tracing::warn!(%error, "failed to reload channel state");
            }
        }
    }
}

/// Fans inbound events out to one queue per channel, each with a single
/// consumer task, so same-channel events are handled strictly in arrival
/// order while channels stay independent. `dispatch` must be called from
/// one place (the ingest loop) to keep enqueue order meaningful.
pub struct EventRouter {
    pipeline: Arc<Orchestrator>,
    queues: Mutex<HashMap<String, mpsc::Sender<InboundMessage>>>,
}

impl EventRouter {
    pub fn new(pipeline: Arc<Orchestrator>) -> Self {
        Self {
            pipeline,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Enqueue an event onto its channel's queue, spawning the worker on
    /// first sight of the channel.
    pub async fn dispatch(&self, event: InboundMessage) {
        let sender = {
            let mut queues = self.queues.lock().await;
            match queues.get(&event.channel_id) {
                Some(sender) if !sender.is_closed() => sender.clone(),
                _ => {
                    let (sender, receiver) = mpsc::channel(64);
                    Self::spawn_worker(
                        self.pipeline.clone(),
                        event.channel_id.clone(),
                        receiver,
                    );
                    queues.insert(event.channel_id.clone(), sender.clone());
                    sender
                }
            }
        };
        if sender.send(event).await.is_err() {
            tracing::warn!("channel worker gone, dropping event");
        }
    }

    fn spawn_worker(
        pipeline: Arc<Orchestrator>,
        channel_id: String,
        mut receiver: mpsc::Receiver<InboundMessage>,
    ) {
        tokio::spawn(async move {
            let mut pending: VecDeque<InboundMessage> = VecDeque::new();
            loop {
                let event = match pending.pop_front() {
                    Some(event) => event,
                    None => match receiver.recv().await {
                        Some(event) => event,
                        None => break,
                    },
                };
                let deferred = pipeline.handle_message(event, &mut receiver).await;
                pending.extend(deferred);
            }
            tracing::debug!(%channel_id, "channel worker stopped");
        });
    }
}
