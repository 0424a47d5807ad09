//! # ragops-queue
//!
//! Queue transport for the build pipeline.
//!
//! The [`QueueTransport`] trait is the boundary the consumer loop and the
//! enqueuer talk to: topic provisioning, produce with an idempotency key,
//! leased streaming consume, and ack/nack by delivery identity.
//!
//! Implementations:
//! - [`HttpQueueClient`]: HTTP/NDJSON client that tolerates server dialect
//!   differences by trying candidate request shapes in order
//! - [`MemoryQueue`]: in-process queue with lease tracking and key dedup

pub mod delivery;
pub mod encoders;
pub mod error;
pub mod http;
pub mod memory;
pub mod ndjson;
pub mod transport;

pub use delivery::{Delivery, DeliveryId};
pub use error::QueueError;
pub use http::{HttpQueueClient, QueueClientConfig};
pub use memory::MemoryQueue;
pub use transport::{DeliveryStream, QueueTransport};
