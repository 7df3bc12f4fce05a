//! Chat transport boundary. The chat protocol itself lives in an external
//! relay process; this module only speaks HTTP to it, in both directions.
//!
//! Inbound: the relay POSTs message events to `/inbound` on our bind
//! address. Outbound: `RelayTransport` POSTs each reply chunk to the
//! relay's send URL.

use crate::InboundMessage;
use crate::config::TransportConfig;
use crate::error::TransportError;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Outbound send capability. One call per chunk.
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<String, TransportError>;
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    channel_id: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    message_id: String,
}

/// Sends replies through the relay's HTTP send endpoint.
pub struct RelayTransport {
    client: reqwest::Client,
    send_url: String,
}

impl RelayTransport {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            send_url: config.relay_send_url.clone(),
        }
    }
}

#[async_trait::async_trait]
impl ChatTransport for RelayTransport {
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<String, TransportError> {
        let response = self
            .client
            .post(&self.send_url)
            .json(&SendRequest { channel_id, text })
            .send()
            .await
            .map_err(|e| TransportError::SendFailed {
                channel_id: channel_id.to_string(),
                detail: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
            });
        }

        let body: SendResponse =
            response
                .json()
                .await
                .map_err(|e| TransportError::SendFailed {
                    channel_id: channel_id.to_string(),
                    detail: format!("bad relay response: {e}"),
                })?;
        Ok(body.message_id)
    }
}

/// Router for the relay-facing ingest endpoint.
pub fn ingest_router(events: mpsc::Sender<InboundMessage>) -> axum::Router {
    axum::Router::new()
        .route("/inbound", post(ingest))
        .with_state(events)
}

async fn ingest(
    State(events): State<mpsc::Sender<InboundMessage>>,
    Json(message): Json<InboundMessage>,
) -> StatusCode {
    let channel_id = &message.channel_id;
    tracing::debug!(%channel_id, user_id = %message.user_id, "inbound message");
    match events.send(message).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Bind the ingest endpoint and serve it until the process exits.
pub async fn serve_ingest(
    bind_addr: &str,
    events: mpsc::Sender<InboundMessage>,
) -> crate::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(%bind_addr, "ingest endpoint listening");
    axum::serve(listener, ingest_router(events))
        .await
        .map_err(crate::Error::Io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    async fn serve(router: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("stub should bind");
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn ingest_forwards_events_to_the_channel() {
        let (tx, mut rx) = mpsc::channel(8);
        let base = serve(ingest_router(tx)).await;

        let response = reqwest::Client::new()
            .post(format!("{base}/inbound"))
            .json(&serde_json::json!({
                "channel_id": "c-1",
                "user_id": "u-1",
                "text": "hey bot what's 2+2",
                "timestamp": "2026-08-24T12:00:00Z",
            }))
            .send()
            .await
            .expect("ingest should accept");
        assert_eq!(response.status().as_u16(), 202);

        let event = rx.recv().await.expect("event should arrive");
        assert_eq!(event.channel_id, "c-1");
        assert_eq!(event.text, "hey bot what's 2+2");
        assert!(!event.is_direct);
        assert!(event.attachments.is_empty());
    }

    #[tokio::test]
    async fn ingest_reports_unavailable_when_the_pipeline_is_gone() {
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let base = serve(ingest_router(tx)).await;

        let response = reqwest::Client::new()
            .post(format!("{base}/inbound"))
            .json(&serde_json::json!({
                "channel_id": "c-1",
                "user_id": "u-1",
                "text": "hello",
                "timestamp": "2026-08-24T12:00:00Z",
            }))
            .send()
            .await
            .expect("request should complete");
        assert_eq!(response.status().as_u16(), 503);
    }

    #[tokio::test]
    async fn relay_send_returns_the_message_id() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_handler = seen.clone();
        let router = axum::Router::new().route(
            "/send",
            post(move |Json(body): Json<serde_json::Value>| async move {
                seen_handler.lock().unwrap().push(body);
                Json(serde_json::json!({ "message_id": "m-42" }))
            }),
        );
        let base = serve(router).await;

        let transport = RelayTransport::new(&TransportConfig {
            bind_addr: "127.0.0.1:0".into(),
            relay_send_url: format!("{base}/send"),
        });
        let id = transport
            .send_message("c-1", "hello there")
            .await
            .expect("send should succeed");
        assert_eq!(id, "m-42");

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0]["channel_id"], "c-1");
        assert_eq!(seen[0]["text"], "hello there");
    }

    #[tokio::test]
    async fn relay_rejection_maps_to_a_status_error() {
        let router = axum::Router::new()
            .route("/send", post(|| async { StatusCode::BAD_GATEWAY }));
        let base = serve(router).await;

        let transport = RelayTransport::new(&TransportConfig {
            bind_addr: "127.0.0.1:0".into(),
            relay_send_url: format!("{base}/send"),
        });
        let error = transport
            .send_message("c-1", "hello")
            .await
            .expect_err("relay rejected the send");
        assert!(matches!(error, TransportError::Status { status: 502 }));
    }
}
