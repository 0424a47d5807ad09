//! Queue transport trait.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::delivery::{Delivery, DeliveryId};
use crate::error::QueueError;

/// Stream of leased deliveries from one topic.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, QueueError>>;

/// Operations the worker and the enqueuer need from a queue service.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Create a topic. An existing topic is not an error.
    async fn ensure_topic(&self, topic: &str, partitions: u32) -> Result<(), QueueError>;

    /// Produce a message. The service deduplicates on `idempotency_key`.
    ///
    /// Returns the service's acknowledgement body.
    async fn produce(
        &self,
        topic: &str,
        value: &Value,
        idempotency_key: Option<&str>,
    ) -> Result<Value, QueueError>;

    /// Open a streaming consume for `group`. Each delivery is leased for
    /// `lease_ms` and must be acked or nacked.
    async fn consume(
        &self,
        topic: &str,
        group: &str,
        lease_ms: u64,
    ) -> Result<DeliveryStream, QueueError>;

    async fn ack(&self, topic: &str, group: &str, id: &DeliveryId) -> Result<(), QueueError>;

    async fn nack(&self, topic: &str, group: &str, id: &DeliveryId) -> Result<(), QueueError>;

    /// Liveness probe.
    async fn healthz(&self) -> Result<bool, QueueError>;
}
