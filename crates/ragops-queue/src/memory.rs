//! In-process queue.
//!
//! Keeps per-topic pending and leased messages in memory, deduplicates
//! produces by idempotency key and hands out lease ids on consume. Used by
//! tests and by local runs that have no queue server.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::delivery::{Delivery, DeliveryId};
use crate::error::QueueError;
use crate::transport::{DeliveryStream, QueueTransport};

#[derive(Debug, Default)]
struct TopicState {
    pending: VecDeque<Value>,
    leased: HashMap<String, Value>,
    acked: Vec<Value>,
    nacks: usize,
    next_offset: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    topics: HashMap<String, TopicState>,
    seen_keys: HashSet<(String, String)>,
    next_lease: u64,
}

/// In-memory [`QueueTransport`].
///
/// Cloning shares the underlying queue.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Messages waiting to be delivered.
    pub fn pending_len(&self, topic: &str) -> usize {
        self.lock()
            .topics
            .get(topic)
            .map(|t| t.pending.len())
            .unwrap_or(0)
    }

    /// Messages delivered but neither acked nor nacked.
    pub fn leased_len(&self, topic: &str) -> usize {
        self.lock()
            .topics
            .get(topic)
            .map(|t| t.leased.len())
            .unwrap_or(0)
    }

    /// Payloads of acked messages, in ack order.
    pub fn acked(&self, topic: &str) -> Vec<Value> {
        self.lock()
            .topics
            .get(topic)
            .map(|t| t.acked.clone())
            .unwrap_or_default()
    }

    pub fn nack_count(&self, topic: &str) -> usize {
        self.lock().topics.get(topic).map(|t| t.nacks).unwrap_or(0)
    }

    /// Return every leased message of a topic to the front of the queue,
    /// as if their leases had expired.
    pub fn expire_leases(&self, topic: &str) -> usize {
        let count = {
            let mut state = self.lock();
            let Some(t) = state.topics.get_mut(topic) else {
                return 0;
            };
            let mut expired: Vec<Value> = t.leased.drain().map(|(_, v)| v).collect();
            expired.sort_by_key(|m| m.get("offset").and_then(Value::as_u64).unwrap_or(0));
            let count = expired.len();
            for message in expired.into_iter().rev() {
                t.pending.push_front(message);
            }
            count
        };
        self.notify.notify_waiters();
        count
    }

    fn next_delivery(&self, topic: &str, group: &str) -> Option<Delivery> {
        let mut state = self.lock();
        state.next_lease += 1;
        let lease_id = format!("lease-{}", state.next_lease);
        let t = state.topics.get_mut(topic)?;
        let message = t.pending.pop_front()?;
        t.leased.insert(lease_id.clone(), message.clone());

        let mut delivered = message;
        if let Value::Object(map) = &mut delivered {
            map.insert("lease_id".to_string(), Value::from(lease_id));
            map.insert("owner".to_string(), Value::from(group));
        }
        Some(Delivery::from_message(delivered))
    }

    fn settle(&self, topic: &str, id: &DeliveryId, requeue: bool) -> Result<(), QueueError> {
        let lease_id = id
            .lease_id
            .as_ref()
            .and_then(Value::as_str)
            .ok_or(QueueError::MissingIdentity)?;
        let mut state = self.lock();
        let t = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| QueueError::UnknownTopic(topic.to_string()))?;

        match t.leased.remove(lease_id) {
            Some(message) if requeue => {
                t.nacks += 1;
                t.pending.push_front(message);
            }
            Some(message) => {
                t.acked
                    .push(message.get("value").cloned().unwrap_or(Value::Null));
            }
            None => {
                warn!(topic = %topic, lease_id = %lease_id, "Not owner or lease expired; ignoring");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl QueueTransport for MemoryQueue {
    async fn ensure_topic(&self, topic: &str, _partitions: u32) -> Result<(), QueueError> {
        self.lock().topics.entry(topic.to_string()).or_default();
        Ok(())
    }

    async fn produce(
        &self,
        topic: &str,
        value: &Value,
        idempotency_key: Option<&str>,
    ) -> Result<Value, QueueError> {
        let offset = {
            let mut state = self.lock();
            if !state.topics.contains_key(topic) {
                return Err(QueueError::UnknownTopic(topic.to_string()));
            }
            if let Some(key) = idempotency_key {
                if !state.seen_keys.insert((topic.to_string(), key.to_string())) {
                    debug!(topic = %topic, key = %key, "Duplicate produce ignored");
                    return Ok(json!({ "status": "duplicate" }));
                }
            }
            let t = state.topics.entry(topic.to_string()).or_default();
            let offset = t.next_offset;
            t.next_offset += 1;
            t.pending.push_back(json!({
                "value": value,
                "partition": 0,
                "offset": offset,
            }));
            offset
        };
        self.notify.notify_waiters();
        Ok(json!({ "status": "ok", "offset": offset }))
    }

    async fn consume(
        &self,
        topic: &str,
        group: &str,
        _lease_ms: u64,
    ) -> Result<DeliveryStream, QueueError> {
        if !self.lock().topics.contains_key(topic) {
            return Err(QueueError::UnknownTopic(topic.to_string()));
        }

        let queue = self.clone();
        let topic = topic.to_string();
        let group = group.to_string();
        let deliveries = stream::unfold((queue, topic, group), |(queue, topic, group)| async move {
            loop {
                let notify = queue.notify.clone();
                let notified = notify.notified();
                if let Some(delivery) = queue.next_delivery(&topic, &group) {
                    return Some((Ok(delivery), (queue, topic, group)));
                }
                notified.await;
            }
        });
        Ok(deliveries.boxed())
    }

    async fn ack(&self, topic: &str, _group: &str, id: &DeliveryId) -> Result<(), QueueError> {
        self.settle(topic, id, false)
    }

    async fn nack(&self, topic: &str, _group: &str, id: &DeliveryId) -> Result<(), QueueError> {
        self.settle(topic, id, true)?;
        self.notify.notify_waiters();
        Ok(())
    }

    async fn healthz(&self) -> Result<bool, QueueError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn queue_with_topic() -> MemoryQueue {
        let queue = MemoryQueue::new();
        queue.ensure_topic("t", 1).await.unwrap();
        queue
    }

    #[tokio::test]
    async fn test_produce_requires_topic() {
        let queue = MemoryQueue::new();
        assert!(matches!(
            queue.produce("t", &json!({}), None).await,
            Err(QueueError::UnknownTopic(_))
        ));
    }

    #[tokio::test]
    async fn test_idempotency_key_dedup() {
        let queue = queue_with_topic().await;
        queue.produce("t", &json!({"n": 1}), Some("k")).await.unwrap();
        let second = queue.produce("t", &json!({"n": 1}), Some("k")).await.unwrap();
        assert_eq!(second["status"], "duplicate");
        queue.produce("t", &json!({"n": 2}), None).await.unwrap();
        queue.produce("t", &json!({"n": 2}), None).await.unwrap();
        assert_eq!(queue.pending_len("t"), 3);
    }

    #[tokio::test]
    async fn test_consume_ack() {
        let queue = queue_with_topic().await;
        queue.produce("t", &json!({"n": 1}), None).await.unwrap();

        let mut stream = queue.consume("t", "g", 1000).await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();
        assert_eq!(delivery.payload(), Some(json!({"n": 1})));
        assert_eq!(queue.leased_len("t"), 1);

        queue.ack("t", "g", &delivery.id).await.unwrap();
        assert_eq!(queue.leased_len("t"), 0);
        assert_eq!(queue.acked("t"), vec![json!({"n": 1})]);

        // A second ack of the same lease is tolerated
        queue.ack("t", "g", &delivery.id).await.unwrap();
        assert_eq!(queue.acked("t").len(), 1);
    }

    #[tokio::test]
    async fn test_nack_redelivers() {
        let queue = queue_with_topic().await;
        queue.produce("t", &json!({"n": 1}), None).await.unwrap();

        let mut stream = queue.consume("t", "g", 1000).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        queue.nack("t", "g", &first.id).await.unwrap();

        let again = stream.next().await.unwrap().unwrap();
        assert_eq!(again.payload(), first.payload());
        assert_ne!(again.id, first.id);
        assert_eq!(queue.nack_count("t"), 1);
    }

    #[tokio::test]
    async fn test_stream_waits_for_produce() {
        let queue = queue_with_topic().await;
        let mut stream = queue.consume("t", "g", 1000).await.unwrap();

        let producer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.produce("t", &json!({"late": true}), None).await.unwrap();
        });

        let delivery = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(delivery.payload(), Some(json!({"late": true})));
    }

    #[tokio::test]
    async fn test_expire_leases_requeues_in_order() {
        let queue = queue_with_topic().await;
        for n in 0..3 {
            queue.produce("t", &json!({"n": n}), None).await.unwrap();
        }
        let mut stream = queue.consume("t", "g", 1000).await.unwrap();
        stream.next().await.unwrap().unwrap();
        stream.next().await.unwrap().unwrap();

        assert_eq!(queue.expire_leases("t"), 2);
        assert_eq!(queue.pending_len("t"), 3);
        let next = stream.next().await.unwrap().unwrap();
        assert_eq!(next.payload(), Some(json!({"n": 0})));
    }
}
