//! Inference provider adapter: a uniform `complete` over an ordered list of
//! OpenAI-compatible chat completion endpoints.
//!
//! The primary-then-secondary switch is the sole resilience mechanism. Each
//! endpoint gets one bounded attempt; there are no intra-provider retries or
//! backoff, since a chat reply has to land within a conversational window.

use crate::Attachment;
use crate::config::ProviderConfig;
use crate::context::PromptContext;
use crate::error::ProviderError;
use crate::store::Store;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Calls the configured endpoints in order and normalizes their failures.
pub struct ProviderAdapter {
    client: reqwest::Client,
    providers: Vec<ProviderConfig>,
    store: Store,
}

impl ProviderAdapter {
    pub fn new(providers: Vec<ProviderConfig>, store: Store) -> Self {
        Self {
            client: reqwest::Client::new(),
            providers,
            store,
        }
    }

    /// Whether any configured endpoint can interpret images.
    pub fn has_vision(&self) -> bool {
        self.providers.iter().any(|p| p.vision)
    }

    /// Run the context through the first endpoint that answers.
    ///
    /// Image attachments restrict the eligible list to vision-capable
    /// endpoints. Every individual failure is recorded as one categorized
    /// ErrorRecord before the next endpoint is tried; if the whole list is
    /// exhausted the caller gets `Unavailable`.
    pub async fn complete(
        &self,
        context: &PromptContext,
        attachments: &[Attachment],
        channel_id: &str,
        user_id: &str,
    ) -> Result<String, ProviderError> {
        let images: Vec<&Attachment> = attachments.iter().filter(|a| a.is_image()).collect();
        let eligible: Vec<&ProviderConfig> = self
            .providers
            .iter()
            .filter(|p| images.is_empty() || p.vision)
            .collect();

        if eligible.is_empty() {
            return Err(ProviderError::CapabilityUnavailable {
                capability: "vision".into(),
            });
        }

        for provider in eligible {
            match self.call(provider, context, &images).await {
                Ok(text) => {
                    tracing::debug!(provider = %provider.name, chars = text.len(), "completion ok");
                    return Ok(text);
                }
                Err(error) => {
                    let name = &provider.name;
                    tracing::warn!(provider = %name, %error, "provider failed, trying next");
                    if let Err(error) = self
                        .store
                        .append_error(
                            error.category(),
                            &error.to_string(),
                            Some(channel_id),
                            Some(user_id),
                        )
                        .await
                    {
                        tracing::warn!(%error, "failed to record provider error");
                    }
                }
            }
        }

        Err(ProviderError::Unavailable)
    }

    /// One bounded attempt against one endpoint.
    async fn call(
        &self,
        provider: &ProviderConfig,
        context: &PromptContext,
        images: &[&Attachment],
    ) -> Result<String, ProviderError> {
        let url = format!(
            "{}/chat/completions",
            provider.base_url.trim_end_matches('/')
        );
        let request = ChatRequest {
            model: &provider.model,
            messages: build_messages(context, images),
            max_tokens: provider.max_tokens,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&provider.api_key)
            .timeout(Duration::from_secs(provider.timeout_secs))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout {
                        provider: provider.name.clone(),
                        timeout_secs: provider.timeout_secs,
                    }
                } else {
                    ProviderError::Network {
                        provider: provider.name.clone(),
                        detail: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited {
                provider: provider.name.clone(),
            });
        }
        if !status.is_success() {
            return Err(ProviderError::Status {
                provider: provider.name.clone(),
                status: status.as_u16(),
            });
        }

        let body: ChatResponse = response.json().await.map_err(|e| ProviderError::Malformed {
            provider: provider.name.clone(),
            detail: e.to_string(),
        })?;

        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ProviderError::Malformed {
                provider: provider.name.clone(),
                detail: "empty completion".into(),
            });
        }
        Ok(text)
    }
}

/// Map the context into OpenAI-style messages. Images ride on the final
/// user message as `image_url` content parts.
fn build_messages(context: &PromptContext, images: &[&Attachment]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(context.turns.len() + 1);
    messages.push(ChatMessage {
        role: "system",
        content: serde_json::Value::String(context.system_prompt.clone()),
    });

    let last_user_idx = context
        .turns
        .iter()
        .rposition(|t| t.role == crate::Role::User);

    for (idx, turn) in context.turns.iter().enumerate() {
        let role = match turn.role {
            crate::Role::User => "user",
            crate::Role::Assistant => "assistant",
        };
        let content = if Some(idx) == last_user_idx && !images.is_empty() {
            let mut parts = vec![serde_json::json!({ "type": "text", "text": turn.content })];
            for image in images {
                parts.push(serde_json::json!({
                    "type": "image_url",
                    "image_url": { "url": image.url },
                }));
            }
            serde_json::Value::Array(parts)
        } else {
            serde_json::Value::String(turn.content.clone())
        };
        messages.push(ChatMessage { role, content });
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;
    use crate::store::ConversationTurn;
    use crate::store::tests::memory_store;
    use axum::Json;
    use axum::http::StatusCode;
    use axum::routing::post;

    fn provider(name: &str, base_url: &str) -> ProviderConfig {
        ProviderConfig {
            name: name.into(),
            base_url: base_url.into(),
            model: "test-model".into(),
            api_key_env: "UNUSED".into(),
            api_key: "k-test".into(),
            timeout_secs: 5,
            max_tokens: 256,
            vision: false,
        }
    }

    fn context_with(text: &str) -> PromptContext {
        PromptContext {
            system_prompt: "be brief".into(),
            turns: vec![ConversationTurn {
                id: "t-1".into(),
                channel_id: "c-1".into(),
                user_id: "u-1".into(),
                role: Role::User,
                content: text.into(),
                created_at: chrono::Utc::now(),
            }],
        }
    }

    /// Spin up a stub endpoint returning a fixed status and body.
    async fn stub_endpoint(status: StatusCode, body: serde_json::Value) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("stub should bind");
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new().route(
            "/chat/completions",
            post(move || async move { (status, Json(body)) }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn completion_body(text: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": text } }]
        })
    }

    #[tokio::test]
    async fn primary_success_needs_no_fallback() {
        let url = stub_endpoint(StatusCode::OK, completion_body("4")).await;
        let store = memory_store().await;
        let adapter = ProviderAdapter::new(vec![provider("primary", &url)], store.clone());

        let reply = adapter
            .complete(&context_with("what's 2+2"), &[], "c-1", "u-1")
            .await
            .expect("primary should answer");
        assert_eq!(reply, "4");
        assert!(store.recent_errors(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn primary_failure_falls_through_with_one_error_record() {
        let bad = stub_endpoint(StatusCode::INTERNAL_SERVER_ERROR, serde_json::json!({})).await;
        let good = stub_endpoint(StatusCode::OK, completion_body("fallback says hi")).await;
        let store = memory_store().await;
        let adapter = ProviderAdapter::new(
            vec![provider("primary", &bad), provider("secondary", &good)],
            store.clone(),
        );

        let reply = adapter
            .complete(&context_with("hello"), &[], "c-1", "u-1")
            .await
            .expect("secondary should answer");
        assert_eq!(reply, "fallback says hi");

        let errors = store.recent_errors(10).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].category, "provider_status");
        assert_eq!(errors[0].channel_id.as_deref(), Some("c-1"));
    }

    #[tokio::test]
    async fn exhausted_list_is_unavailable() {
        let bad_a = stub_endpoint(StatusCode::INTERNAL_SERVER_ERROR, serde_json::json!({})).await;
        let bad_b = stub_endpoint(StatusCode::TOO_MANY_REQUESTS, serde_json::json!({})).await;
        let store = memory_store().await;
        let adapter = ProviderAdapter::new(
            vec![provider("primary", &bad_a), provider("secondary", &bad_b)],
            store.clone(),
        );

        let error = adapter
            .complete(&context_with("hello"), &[], "c-1", "u-1")
            .await
            .expect_err("both endpoints should fail");
        assert!(matches!(error, ProviderError::Unavailable));

        // Newest first: the secondary's rate limit was recorded last.
        let categories: Vec<String> = store
            .recent_errors(10)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.category)
            .collect();
        assert_eq!(categories, vec!["provider_rate_limited", "provider_status"]);
    }

    #[tokio::test]
    async fn malformed_body_is_categorized() {
        let odd = stub_endpoint(StatusCode::OK, serde_json::json!({ "choices": [] })).await;
        let store = memory_store().await;
        let adapter = ProviderAdapter::new(vec![provider("primary", &odd)], store.clone());

        let error = adapter
            .complete(&context_with("hello"), &[], "c-1", "u-1")
            .await
            .expect_err("empty choices should fail");
        assert!(matches!(error, ProviderError::Unavailable));

        let errors = store.recent_errors(10).await.unwrap();
        assert_eq!(errors[0].category, "provider_malformed");
    }

    #[tokio::test]
    async fn image_without_vision_endpoint_is_a_capability_gap() {
        let store = memory_store().await;
        // No HTTP server behind this URL; the capability check runs first.
        let adapter =
            ProviderAdapter::new(vec![provider("primary", "http://127.0.0.1:9")], store.clone());

        let attachment = Attachment {
            filename: "cat.png".into(),
            mime_type: "image/png".into(),
            url: "https://cdn.example/cat.png".into(),
        };
        let error = adapter
            .complete(&context_with("what is this"), &[attachment], "c-1", "u-1")
            .await
            .expect_err("no vision endpoint configured");
        assert!(matches!(error, ProviderError::CapabilityUnavailable { .. }));
        assert!(store.recent_errors(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn image_goes_to_the_vision_endpoint_only() {
        let good = stub_endpoint(StatusCode::OK, completion_body("a cat")).await;
        let store = memory_store().await;
        let mut vision = provider("vision", &good);
        vision.vision = true;
        // A non-vision primary that would fail if it were ever called.
        let adapter = ProviderAdapter::new(
            vec![provider("primary", "http://127.0.0.1:9"), vision],
            store.clone(),
        );

        let attachment = Attachment {
            filename: "cat.png".into(),
            mime_type: "image/png".into(),
            url: "https://cdn.example/cat.png".into(),
        };
        let reply = adapter
            .complete(&context_with("what is this"), &[attachment], "c-1", "u-1")
            .await
            .expect("vision endpoint should answer");
        assert_eq!(reply, "a cat");
        assert!(store.recent_errors(10).await.unwrap().is_empty());
    }

    #[test]
    fn messages_carry_system_then_turns() {
        let mut context = context_with("first");
        context.turns.push(ConversationTurn {
            id: "t-2".into(),
            channel_id: "c-1".into(),
            user_id: "bot".into(),
            role: Role::Assistant,
            content: "reply".into(),
            created_at: chrono::Utc::now(),
        });

        let messages = build_messages(&context, &[]);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[2].role, "assistant");
    }

    #[test]
    fn images_attach_to_the_last_user_message() {
        let context = context_with("what is this");
        let attachment = Attachment {
            filename: "cat.png".into(),
            mime_type: "image/png".into(),
            url: "https://cdn.example/cat.png".into(),
        };
        let messages = build_messages(&context, &[&attachment]);

        let parts = messages[1].content.as_array().expect("content parts");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["image_url"]["url"], "https://cdn.example/cat.png");
    }
}
