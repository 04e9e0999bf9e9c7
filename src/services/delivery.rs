//! Delivery Channel: sends rendered actions to an end-user conversation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::action::{ActionPayload, MediaKind};

/// Header carrying the per-dispatch idempotency key.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Failure of a single dispatch. Never surfaced to HTTP callers; it ends up
/// in the run's `failure_reason` once retries are exhausted.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum DispatchError {
    #[error("gateway rejected message: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("dispatch timed out after {0:?}")]
    Timeout(Duration),
}

/// Content as the gateway receives it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundContent {
    Text {
        body: String,
    },
    Media {
        media: MediaKind,
        url: String,
        caption: Option<String>,
        file_name: Option<String>,
    },
    PaymentRequest {
        pix_key: String,
        amount_cents: i64,
        description: Option<String>,
    },
}

impl OutboundContent {
    /// Render a payload for delivery. `delay` has nothing to send.
    pub fn render(payload: ActionPayload) -> Option<Self> {
        match payload {
            ActionPayload::Text(text) => Some(Self::Text { body: text.body }),
            ActionPayload::Media(media, content) => Some(Self::Media {
                media,
                url: content.url,
                caption: content.caption,
                file_name: content.file_name,
            }),
            ActionPayload::Pix(pix) => Some(Self::PaymentRequest {
                pix_key: pix.key,
                amount_cents: pix.amount_cents,
                description: pix.description,
            }),
            ActionPayload::Delay(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryRequest {
    pub run_id: Uuid,
    pub ordinal: i32,
    pub conversation_id: String,
    pub content: OutboundContent,
}

impl DeliveryRequest {
    pub fn idempotency_key(&self) -> String {
        idempotency_key(self.run_id, self.ordinal)
    }
}

/// Stable key for `(run id, action ordinal)`: retries and resumed runs reuse it.
pub fn idempotency_key(run_id: Uuid, ordinal: i32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{run_id}:{ordinal}").as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Send one rendered action. Must be idempotent for a repeated
    /// [`DeliveryRequest::idempotency_key`].
    async fn send(&self, request: &DeliveryRequest) -> Result<(), DispatchError>;
}

/// Posts messages to an HTTP messaging gateway.
#[derive(Debug, Clone)]
pub struct HttpGatewayChannel {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Serialize)]
struct GatewayMessage<'a> {
    conversation_id: &'a str,
    content: &'a OutboundContent,
}

impl HttpGatewayChannel {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self, DispatchError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| DispatchError::Transport(format!("invalid gateway token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| DispatchError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/messages", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl DeliveryChannel for HttpGatewayChannel {
    async fn send(&self, request: &DeliveryRequest) -> Result<(), DispatchError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(IDEMPOTENCY_HEADER, request.idempotency_key())
            .json(&GatewayMessage {
                conversation_id: &request.conversation_id,
                content: &request.content,
            })
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(
                run_id = %request.run_id,
                ordinal = request.ordinal,
                status = %status,
                "Gateway accepted message"
            );
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(DispatchError::Rejected(format!("{status}: {body}")))
    }
}

/// Logs every message and reports success. Used when no gateway is configured.
#[derive(Debug, Clone, Default)]
pub struct LogChannel;

#[async_trait]
impl DeliveryChannel for LogChannel {
    async fn send(&self, request: &DeliveryRequest) -> Result<(), DispatchError> {
        tracing::info!(
            run_id = %request.run_id,
            ordinal = request.ordinal,
            conversation_id = %request.conversation_id,
            content = ?request.content,
            "Delivery (log only)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::{HeaderMap as AxumHeaders, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value;

    use crate::models::action::{DelayContent, PixContent, TextContent};

    type Seen = Arc<Mutex<Vec<(Option<String>, Option<String>, Value)>>>;

    async fn gateway(status: StatusCode) -> (String, Seen) {
        let seen: Seen = Arc::default();
        let app = Router::new()
            .route(
                "/messages",
                post(
                    move |State(seen): State<Seen>, headers: AxumHeaders, Json(body): Json<Value>| async move {
                        let header = |name: &str| {
                            headers
                                .get(name)
                                .and_then(|v| v.to_str().ok())
                                .map(String::from)
                        };
                        seen.lock()
                            .unwrap()
                            .push((header("idempotency-key"), header("authorization"), body));
                        status
                    },
                ),
            )
            .with_state(seen.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), seen)
    }

    fn request() -> DeliveryRequest {
        DeliveryRequest {
            run_id: Uuid::new_v4(),
            ordinal: 1,
            conversation_id: "5511999990000".to_string(),
            content: OutboundContent::Text {
                body: "Olá!".to_string(),
            },
        }
    }

    #[test]
    fn idempotency_key_is_stable_per_run_and_ordinal() {
        let run = Uuid::new_v4();
        assert_eq!(idempotency_key(run, 0), idempotency_key(run, 0));
        assert_ne!(idempotency_key(run, 0), idempotency_key(run, 1));
        assert_ne!(idempotency_key(run, 0), idempotency_key(Uuid::new_v4(), 0));
        assert_eq!(idempotency_key(run, 3).len(), 64);
    }

    #[test]
    fn render_maps_payloads() {
        let text = OutboundContent::render(ActionPayload::Text(TextContent {
            body: "oi".to_string(),
        }));
        assert_eq!(text, Some(OutboundContent::Text { body: "oi".to_string() }));

        let pix = OutboundContent::render(ActionPayload::Pix(PixContent {
            key: "chave@pix".to_string(),
            amount_cents: 4990,
            description: None,
        }));
        assert!(matches!(
            pix,
            Some(OutboundContent::PaymentRequest { amount_cents: 4990, .. })
        ));

        let delay = OutboundContent::render(ActionPayload::Delay(DelayContent { duration_ms: 5 }));
        assert!(delay.is_none());
    }

    #[tokio::test]
    async fn gateway_receives_key_token_and_body() {
        let (url, seen) = gateway(StatusCode::OK).await;
        let channel = HttpGatewayChannel::new(&url, Some("s3cret")).unwrap();
        let req = request();

        channel.send(&req).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let (key, auth, body) = &seen[0];
        assert_eq!(key.as_deref(), Some(req.idempotency_key().as_str()));
        assert_eq!(auth.as_deref(), Some("Bearer s3cret"));
        assert_eq!(body["conversation_id"], "5511999990000");
        assert_eq!(body["content"]["kind"], "text");
        assert_eq!(body["content"]["body"], "Olá!");
    }

    #[tokio::test]
    async fn gateway_error_status_is_rejection() {
        let (url, _) = gateway(StatusCode::BAD_GATEWAY).await;
        let channel = HttpGatewayChannel::new(&url, None).unwrap();
        let err = channel.send(&request()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Rejected(ref m) if m.starts_with("502")));
    }

    #[tokio::test]
    async fn unreachable_gateway_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let channel = HttpGatewayChannel::new(&format!("http://{addr}"), None).unwrap();
        let err = channel.send(&request()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Transport(_)));
    }
}
