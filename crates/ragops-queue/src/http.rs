//! HTTP queue client.
//!
//! Endpoints (relative to the base URL, e.g. `http://localhost:8080/v1`):
//! `POST /topics`, `POST /produce`, `GET /consume` (NDJSON stream),
//! `POST /ack`, `POST /nack`, `GET /healthz`.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::delivery::{Delivery, DeliveryId};
use crate::encoders::{AckShape, ProduceShape, StatusPolicy, TopicShape, Verdict};
use crate::error::QueueError;
use crate::ndjson::decode_lines;
use crate::transport::{DeliveryStream, QueueTransport};

/// Configuration for the HTTP queue client.
#[derive(Debug, Clone)]
pub struct QueueClientConfig {
    /// API base URL (e.g., "http://localhost:8080/v1")
    pub base_url: String,

    /// Timeout for unary requests
    pub timeout: Duration,

    /// Connect timeout, also applied to the consume stream
    pub connect_timeout: Duration,
}

impl QueueClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Outcome of sending a list of candidate requests.
enum Sent {
    Accepted(Response),
    Conflict,
}

/// HTTP implementation of [`QueueTransport`].
pub struct HttpQueueClient {
    client: Client,
    /// No overall timeout: a consume stream stays open indefinitely
    stream_client: Client,
    config: QueueClientConfig,
}

impl HttpQueueClient {
    pub fn new(config: QueueClientConfig) -> Result<Self, QueueError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;
        let stream_client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self {
            client,
            stream_client,
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// POST each candidate body in order until one is not rejected as a
    /// bad shape.
    async fn send_candidates(
        &self,
        path: &str,
        policy: StatusPolicy,
        bodies: Vec<Value>,
    ) -> Result<Sent, QueueError> {
        let url = self.url(path);
        let mut last_rejection: Option<(u16, String)> = None;

        for (attempt, body) in bodies.iter().enumerate() {
            let response = self.client.post(&url).json(body).send().await?;
            let status = response.status().as_u16();

            match policy.classify(status) {
                Verdict::Accepted => return Ok(Sent::Accepted(response)),
                Verdict::Conflict => {
                    warn!(operation = policy.operation, "Not owner or lease expired (409); ignoring");
                    return Ok(Sent::Conflict);
                }
                Verdict::TryNext => {
                    let text = response.text().await.unwrap_or_default();
                    debug!(
                        operation = policy.operation,
                        attempt,
                        status,
                        "Request shape rejected, trying next candidate"
                    );
                    last_rejection = Some((status, text));
                }
                Verdict::Fail => {
                    let text = response.text().await.unwrap_or_default();
                    return Err(QueueError::Server {
                        operation: policy.operation,
                        status,
                        body: text,
                    });
                }
            }
        }

        let (status, body) = last_rejection.unwrap_or((0, "no candidate request".to_string()));
        Err(QueueError::Rejected {
            operation: policy.operation,
            status,
            body,
        })
    }

    async fn settle(
        &self,
        path: &str,
        policy: StatusPolicy,
        topic: &str,
        group: &str,
        id: &DeliveryId,
    ) -> Result<(), QueueError> {
        let bodies: Vec<Value> = AckShape::CANDIDATES
            .iter()
            .filter_map(|shape| shape.encode(topic, group, id))
            .collect();
        if bodies.is_empty() {
            return Err(QueueError::MissingIdentity);
        }
        self.send_candidates(path, policy, bodies).await?;
        Ok(())
    }
}

/// Parse a response body as JSON, falling back to a status object.
async fn safe_json(response: Response) -> Value {
    let text = response.text().await.unwrap_or_default();
    if text.trim().is_empty() {
        return json!({ "status": "ok" });
    }
    serde_json::from_str(&text).unwrap_or_else(|_| json!({ "status": "ok", "raw": text }))
}

#[async_trait]
impl QueueTransport for HttpQueueClient {
    async fn ensure_topic(&self, topic: &str, partitions: u32) -> Result<(), QueueError> {
        let bodies = TopicShape::CANDIDATES
            .iter()
            .map(|shape| shape.encode(topic, partitions))
            .collect();
        self.send_candidates("/topics", StatusPolicy::TOPIC, bodies)
            .await?;
        info!(topic = %topic, partitions, "Ensured topic");
        Ok(())
    }

    async fn produce(
        &self,
        topic: &str,
        value: &Value,
        idempotency_key: Option<&str>,
    ) -> Result<Value, QueueError> {
        let bodies = ProduceShape::CANDIDATES
            .iter()
            .filter_map(|shape| shape.encode(topic, value, idempotency_key))
            .collect();
        match self
            .send_candidates("/produce", StatusPolicy::PRODUCE, bodies)
            .await?
        {
            Sent::Accepted(response) if response.status().as_u16() == 409 => {
                debug!(topic = %topic, key = ?idempotency_key, "Duplicate produce accepted");
                Ok(json!({ "status": "duplicate" }))
            }
            Sent::Accepted(response) => Ok(safe_json(response).await),
            Sent::Conflict => Ok(json!({ "status": "conflict" })),
        }
    }

    async fn consume(
        &self,
        topic: &str,
        group: &str,
        lease_ms: u64,
    ) -> Result<DeliveryStream, QueueError> {
        let lease = lease_ms.to_string();
        let response = self
            .stream_client
            .get(self.url("/consume"))
            .query(&[("topic", topic), ("group", group), ("lease_ms", lease.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueueError::Server {
                operation: "consume",
                status: status.as_u16(),
                body,
            });
        }
        debug!(topic = %topic, group = %group, "Consume stream opened");

        let lines = decode_lines(Box::pin(response.bytes_stream()));
        Ok(lines
            .map(|item| item.map(Delivery::from_message))
            .boxed())
    }

    async fn ack(&self, topic: &str, group: &str, id: &DeliveryId) -> Result<(), QueueError> {
        self.settle("/ack", StatusPolicy::ACK, topic, group, id)
            .await
    }

    async fn nack(&self, topic: &str, group: &str, id: &DeliveryId) -> Result<(), QueueError> {
        self.settle("/nack", StatusPolicy::NACK, topic, group, id)
            .await
    }

    async fn healthz(&self) -> Result<bool, QueueError> {
        let response = self.client.get(self.url("/healthz")).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(500).collect();
            warn!(status = status.as_u16(), body = %preview, "Queue healthz unhealthy");
        }
        Ok(status.is_success())
    }
}
