//! Delivered messages and their delivery identity.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identity of one leased delivery.
///
/// A service issues either a `lease_id` or an `(owner, partition, offset)`
/// triple. The values are opaque and are passed back unmodified on ack/nack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryId {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<Value>,
}

impl DeliveryId {
    pub fn lease(lease_id: impl Into<Value>) -> Self {
        Self {
            lease_id: Some(lease_id.into()),
            ..Default::default()
        }
    }

    /// Owner/partition/offset triple, when all three are present.
    pub fn position(&self) -> Option<(&Value, &Value, &Value)> {
        match (&self.owner, &self.partition, &self.offset) {
            (Some(owner), Some(partition), Some(offset)) => Some((owner, partition, offset)),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lease_id.is_none() && self.position().is_none()
    }
}

fn non_null(map: &Map<String, Value>, key: &str) -> Option<Value> {
    map.get(key).filter(|v| !v.is_null()).cloned()
}

/// One message received from a consume stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// The message as the service sent it
    pub message: Value,
    pub id: DeliveryId,
}

impl Delivery {
    /// Split a raw stream message into body and delivery identity.
    pub fn from_message(message: Value) -> Self {
        let id = match &message {
            Value::Object(map) => DeliveryId {
                lease_id: non_null(map, "lease_id"),
                owner: non_null(map, "owner"),
                partition: non_null(map, "partition"),
                offset: non_null(map, "offset"),
            },
            _ => DeliveryId::default(),
        };
        Self { message, id }
    }

    /// The logical payload carried in the message's `value` field.
    ///
    /// An object is returned as is. A string holding JSON is decoded a
    /// second time; a decoded non-object is wrapped as `{"value": ...}`.
    /// Anything else yields `None`.
    pub fn payload(&self) -> Option<Value> {
        match self.message.get("value")? {
            Value::Object(map) => Some(Value::Object(map.clone())),
            Value::String(s) => {
                let trimmed = s.trim();
                if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
                    return None;
                }
                match serde_json::from_str::<Value>(trimmed).ok()? {
                    obj @ Value::Object(_) => Some(obj),
                    other => {
                        let mut map = Map::new();
                        map.insert("value".to_string(), other);
                        Some(Value::Object(map))
                    }
                }
            }
            _ => None,
        }
    }
}
