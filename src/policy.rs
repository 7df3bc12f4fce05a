//! Response policy: decides whether an inbound message warrants a reply and
//! what pacing to apply. Pure over its inputs; deterministic for a fixed
//! rng seed.

use crate::InboundMessage;
use crate::config::{BotConfig, PacingConfig};
use crate::store::{ChannelState, UserPreference};
use rand::Rng;
use std::time::Duration;

/// Why a message was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    UserIgnored,
    DirectMessagesDisabled,
    ChannelInactive,
    Cooldown,
}

/// Typing-simulation parameters for one reply. The base delay is drawn once
/// at decision time; the final delay scales with the reply length and is
/// capped, since the reply text is not known until the provider answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingHint {
    pub base_delay: Duration,
    pub per_char: Duration,
    pub cap: Duration,
    /// Wait briefly for rapid follow-up messages before assembling context.
    pub batch: bool,
}

impl PacingHint {
    /// Total simulated typing delay for a reply of `reply_len` characters.
    pub fn typing_delay(&self, reply_len: usize) -> Duration {
        let scaled = self.base_delay + self.per_char * reply_len as u32;
        scaled.min(self.cap)
    }

    /// Additional pause before a follow-up chunk, proportional to its length.
    pub fn inter_chunk_delay(&self, chunk_len: usize) -> Duration {
        (self.per_char * chunk_len as u32).min(self.cap / 4)
    }
}

/// Outcome of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Skip(SkipReason),
    Respond(PacingHint),
}

/// The ordered gate rules plus pacing computation.
#[derive(Debug, Clone)]
pub struct ResponsePolicy {
    triggers: Vec<String>,
    allow_direct_messages: bool,
    cooldown: chrono::Duration,
    batch: bool,
    pacing: PacingConfig,
}

impl ResponsePolicy {
    pub fn new(bot: &BotConfig, pacing: PacingConfig) -> Self {
        Self {
            triggers: bot
                .trigger_words
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            allow_direct_messages: bot.allow_direct_messages,
            cooldown: chrono::Duration::seconds(bot.cooldown_secs as i64),
            batch: bot.batch_window_ms > 0,
            pacing,
        }
    }

    /// Apply the gate rules in order; first match wins.
    pub fn decide(
        &self,
        message: &InboundMessage,
        channel: &ChannelState,
        user: &UserPreference,
        now: chrono::DateTime<chrono::Utc>,
        rng: &mut impl Rng,
    ) -> Decision {
        if user.ignored {
            return Decision::Skip(SkipReason::UserIgnored);
        }

        if message.is_direct && !self.allow_direct_messages {
            return Decision::Skip(SkipReason::DirectMessagesDisabled);
        }

        // Direct messages bypass the activation flag; a channel only needs
        // to be active or triggered.
        if !message.is_direct && !channel.active && !self.has_trigger(&message.text) {
            return Decision::Skip(SkipReason::ChannelInactive);
        }

        if let Some(last) = channel.last_response_at {
            if now - last < self.cooldown {
                return Decision::Skip(SkipReason::Cooldown);
            }
        }

        let base_ms = rng.random_range(self.pacing.min_typing_ms..=self.pacing.max_typing_ms);
        Decision::Respond(PacingHint {
            base_delay: Duration::from_millis(base_ms),
            per_char: Duration::from_millis(self.pacing.per_char_ms),
            cap: Duration::from_millis(self.pacing.typing_cap_ms),
            batch: self.batch,
        })
    }

    /// Case-insensitive substring match against the configured set.
    fn has_trigger(&self, text: &str) -> bool {
        if self.triggers.is_empty() {
            return false;
        }
        let text = text.to_lowercase();
        self.triggers.iter().any(|t| text.contains(t.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn bot_config() -> BotConfig {
        BotConfig {
            owner_id: "u-owner".into(),
            command_prefix: "~".into(),
            trigger_words: vec!["bot".into(), "Hey Drift".into()],
            allow_direct_messages: true,
            cooldown_secs: 30,
            fallback_reply: "sorry".into(),
            max_chunk_len: 2000,
            batch_window_ms: 0,
            retention_days: 30,
        }
    }

    fn pacing() -> PacingConfig {
        PacingConfig {
            min_typing_ms: 100,
            max_typing_ms: 200,
            per_char_ms: 10,
            typing_cap_ms: 1_000,
        }
    }

    fn message(channel_id: &str, text: &str) -> InboundMessage {
        InboundMessage {
            channel_id: channel_id.into(),
            user_id: "u-1".into(),
            is_direct: false,
            text: text.into(),
            attachments: Vec::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    fn active_channel(channel_id: &str) -> ChannelState {
        ChannelState {
            channel_id: channel_id.into(),
            active: true,
            last_response_at: None,
        }
    }

    #[test]
    fn ignored_user_always_skips() {
        let policy = ResponsePolicy::new(&bot_config(), pacing());
        let mut rng = StdRng::seed_from_u64(1);
        let mut user = UserPreference::new("u-1");
        user.ignored = true;

        // Even with an active channel and a trigger word present.
        let decision = policy.decide(
            &message("c-1", "hey bot"),
            &active_channel("c-1"),
            &user,
            chrono::Utc::now(),
            &mut rng,
        );
        assert_eq!(decision, Decision::Skip(SkipReason::UserIgnored));
    }

    #[test]
    fn disabled_direct_messages_skip() {
        let mut bot = bot_config();
        bot.allow_direct_messages = false;
        let policy = ResponsePolicy::new(&bot, pacing());
        let mut rng = StdRng::seed_from_u64(1);
        let mut msg = message("dm-1", "hello");
        msg.is_direct = true;

        let decision = policy.decide(
            &msg,
            &active_channel("dm-1"),
            &UserPreference::new("u-1"),
            chrono::Utc::now(),
            &mut rng,
        );
        assert_eq!(decision, Decision::Skip(SkipReason::DirectMessagesDisabled));
    }

    #[test]
    fn inactive_channel_without_trigger_skips() {
        let policy = ResponsePolicy::new(&bot_config(), pacing());
        let mut rng = StdRng::seed_from_u64(1);

        let decision = policy.decide(
            &message("c-1", "what's the weather"),
            &ChannelState::new("c-1"),
            &UserPreference::new("u-1"),
            chrono::Utc::now(),
            &mut rng,
        );
        assert_eq!(decision, Decision::Skip(SkipReason::ChannelInactive));
    }

    #[test]
    fn trigger_word_overrides_inactive_channel() {
        let policy = ResponsePolicy::new(&bot_config(), pacing());
        let mut rng = StdRng::seed_from_u64(1);

        // Substring match is case-insensitive.
        let decision = policy.decide(
            &message("c-1", "hey BOT what's 2+2"),
            &ChannelState::new("c-1"),
            &UserPreference::new("u-1"),
            chrono::Utc::now(),
            &mut rng,
        );
        assert!(matches!(decision, Decision::Respond(_)));
    }

    #[test]
    fn cooldown_boundary_is_exact() {
        let policy = ResponsePolicy::new(&bot_config(), pacing());
        let mut rng = StdRng::seed_from_u64(1);
        let last = chrono::Utc::now();
        let mut channel = active_channel("c-1");
        channel.last_response_at = Some(last);
        let user = UserPreference::new("u-1");
        let msg = message("c-1", "hello again");

        let just_before = last + chrono::Duration::seconds(29);
        let decision = policy.decide(&msg, &channel, &user, just_before, &mut rng);
        assert_eq!(decision, Decision::Skip(SkipReason::Cooldown));

        let at_boundary = last + chrono::Duration::seconds(30);
        let decision = policy.decide(&msg, &channel, &user, at_boundary, &mut rng);
        assert!(matches!(decision, Decision::Respond(_)));
    }

    #[test]
    fn same_seed_gives_same_pacing() {
        let policy = ResponsePolicy::new(&bot_config(), pacing());
        let msg = message("c-1", "hello");
        let channel = active_channel("c-1");
        let user = UserPreference::new("u-1");
        let now = chrono::Utc::now();

        let mut rng_a = StdRng::seed_from_u64(42);
        let mut rng_b = StdRng::seed_from_u64(42);
        let a = policy.decide(&msg, &channel, &user, now, &mut rng_a);
        let b = policy.decide(&msg, &channel, &user, now, &mut rng_b);
        assert_eq!(a, b);
    }

    #[test]
    fn typing_delay_scales_with_length_and_caps() {
        let hint = PacingHint {
            base_delay: Duration::from_millis(100),
            per_char: Duration::from_millis(10),
            cap: Duration::from_millis(500),
            batch: false,
        };
        assert_eq!(hint.typing_delay(10), Duration::from_millis(200));
        assert_eq!(hint.typing_delay(10_000), Duration::from_millis(500));
    }
}
