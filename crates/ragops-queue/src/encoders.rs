//! Candidate request encoders.
//!
//! Queue servers differ in the field names they accept. Each operation has
//! an ordered list of request shapes; the client sends them in order and
//! moves to the next only when the server rejects the shape (400 or 422).

use serde_json::{json, Map, Value};

use crate::delivery::DeliveryId;

/// How a response status is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Request accepted
    Accepted,
    /// Not owner or lease expired; tolerated
    Conflict,
    /// Shape rejected; try the next candidate
    TryNext,
    /// Any other status; no further candidates are tried
    Fail,
}

/// Status handling of one operation.
#[derive(Debug, Clone, Copy)]
pub struct StatusPolicy {
    pub operation: &'static str,
    pub accepted: &'static [u16],
    /// Report 409 as [`Verdict::Conflict`] instead of [`Verdict::Fail`]
    pub tolerate_conflict: bool,
}

impl StatusPolicy {
    pub const TOPIC: StatusPolicy = StatusPolicy {
        operation: "topics create",
        accepted: &[200, 201, 204, 409],
        tolerate_conflict: false,
    };

    pub const PRODUCE: StatusPolicy = StatusPolicy {
        operation: "produce",
        // 409 answers a duplicate idempotency key; the message is queued
        accepted: &[200, 201, 202, 204, 409],
        tolerate_conflict: false,
    };

    pub const ACK: StatusPolicy = StatusPolicy {
        operation: "ack",
        accepted: &[200, 204],
        tolerate_conflict: true,
    };

    pub const NACK: StatusPolicy = StatusPolicy {
        operation: "nack",
        accepted: &[200, 204],
        tolerate_conflict: true,
    };

    pub fn classify(&self, status: u16) -> Verdict {
        if self.accepted.contains(&status) {
            Verdict::Accepted
        } else if status == 409 && self.tolerate_conflict {
            Verdict::Conflict
        } else if status == 400 || status == 422 {
            Verdict::TryNext
        } else {
            Verdict::Fail
        }
    }
}

/// Topic creation shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicShape {
    /// `{"topic": ..., "partitions": n}`
    Topic,
    /// `{"name": ..., "partitions": n}`
    Name,
}

impl TopicShape {
    pub const CANDIDATES: [TopicShape; 2] = [TopicShape::Topic, TopicShape::Name];

    pub fn encode(&self, topic: &str, partitions: u32) -> Value {
        match self {
            TopicShape::Topic => json!({ "topic": topic, "partitions": partitions }),
            TopicShape::Name => json!({ "name": topic, "partitions": partitions }),
        }
    }
}

/// Produce shapes, differing in where the idempotency key lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProduceShape {
    /// `{"topic", "value", "idempotency_key"}`
    TopLevelKey,
    /// `{"topic", "value", "envelope": {"idempotency_key"}}`
    EnvelopeKey,
}

impl ProduceShape {
    pub const CANDIDATES: [ProduceShape; 2] = [ProduceShape::TopLevelKey, ProduceShape::EnvelopeKey];

    /// Encode a produce body. The envelope shape only exists when there is
    /// a key to put in it.
    pub fn encode(&self, topic: &str, value: &Value, key: Option<&str>) -> Option<Value> {
        let mut body = Map::new();
        body.insert("topic".to_string(), Value::from(topic));
        body.insert("value".to_string(), value.clone());
        match (self, key) {
            (ProduceShape::TopLevelKey, Some(key)) => {
                body.insert("idempotency_key".to_string(), Value::from(key));
            }
            (ProduceShape::TopLevelKey, None) => {}
            (ProduceShape::EnvelopeKey, Some(key)) => {
                body.insert("envelope".to_string(), json!({ "idempotency_key": key }));
            }
            (ProduceShape::EnvelopeKey, None) => return None,
        }
        Some(Value::Object(body))
    }
}

/// Ack/nack shapes, one per delivery addressing scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckShape {
    /// `{"topic", "group", "lease_id"}`
    Lease,
    /// `{"topic", "group", "owner", "partition", "offset"}`
    Position,
}

impl AckShape {
    pub const CANDIDATES: [AckShape; 2] = [AckShape::Lease, AckShape::Position];

    /// Encode an ack/nack body, or `None` if the delivery lacks the fields
    /// this shape needs.
    pub fn encode(&self, topic: &str, group: &str, id: &DeliveryId) -> Option<Value> {
        match self {
            AckShape::Lease => {
                let lease_id = id.lease_id.as_ref()?;
                Some(json!({ "topic": topic, "group": group, "lease_id": lease_id }))
            }
            AckShape::Position => {
                let (owner, partition, offset) = id.position()?;
                Some(json!({
                    "topic": topic,
                    "group": group,
                    "owner": owner,
                    "partition": partition,
                    "offset": offset,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_policy() {
        assert_eq!(StatusPolicy::TOPIC.classify(409), Verdict::Accepted);
        assert_eq!(StatusPolicy::TOPIC.classify(422), Verdict::TryNext);
        assert_eq!(StatusPolicy::ACK.classify(409), Verdict::Conflict);
        assert_eq!(StatusPolicy::ACK.classify(201), Verdict::Fail);
        assert_eq!(StatusPolicy::PRODUCE.classify(409), Verdict::Accepted);
        assert_eq!(StatusPolicy::PRODUCE.classify(500), Verdict::Fail);
        assert_eq!(StatusPolicy::NACK.classify(503), Verdict::Fail);
    }

    #[test]
    fn test_produce_shapes() {
        let value = json!({"run_id": "r1"});
        assert_eq!(
            ProduceShape::TopLevelKey.encode("t", &value, Some("r1")),
            Some(json!({"topic": "t", "value": {"run_id": "r1"}, "idempotency_key": "r1"}))
        );
        assert_eq!(
            ProduceShape::EnvelopeKey.encode("t", &value, Some("r1")),
            Some(json!({"topic": "t", "value": {"run_id": "r1"}, "envelope": {"idempotency_key": "r1"}}))
        );
        assert_eq!(ProduceShape::EnvelopeKey.encode("t", &value, None), None);
    }

    #[test]
    fn test_ack_shapes_need_identity() {
        let lease = DeliveryId::lease("L1");
        assert_eq!(
            AckShape::Lease.encode("t", "g", &lease),
            Some(json!({"topic": "t", "group": "g", "lease_id": "L1"}))
        );
        assert_eq!(AckShape::Position.encode("t", "g", &lease), None);

        let position = DeliveryId {
            owner: Some(json!("o")),
            partition: Some(json!(0)),
            offset: Some(json!(5)),
            ..Default::default()
        };
        assert_eq!(AckShape::Lease.encode("t", "g", &position), None);
        assert_eq!(
            AckShape::Position.encode("t", "g", &position),
            Some(json!({"topic": "t", "group": "g", "owner": "o", "partition": 0, "offset": 5}))
        );
    }
}
