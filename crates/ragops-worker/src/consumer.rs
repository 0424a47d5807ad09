//! Lease consumer loop.
//!
//! One loop per topic. Messages are handled strictly one at a time: the next
//! delivery is not pulled until the current one has been acked or nacked.
//! Transport faults drop the stream and reconnect with capped exponential
//! backoff; after `max_consecutive_failures` faults in a row the loop
//! returns an error so a supervisor can restart the process.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures::{FutureExt, StreamExt};
use ragops_queue::{Delivery, QueueError, QueueTransport};
use ragops_types::{ControlMessage, Settings};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::WorkerError;

/// Handles decoded messages from one topic.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one message. `Ok` acks the delivery; `Err` nacks it.
    async fn handle(&self, message: ControlMessage) -> Result<(), WorkerError>;
}

/// Consumer loop configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Consumer group (lease owner) name
    pub group: String,
    /// Lease requested per delivery
    pub lease_ms: u64,
    /// Partitions requested when creating the topic
    pub partitions: u32,
    /// First reconnect delay
    pub backoff_initial: Duration,
    /// Reconnect delay ceiling
    pub backoff_max: Duration,
    /// Consecutive transport failures before giving up (0 = never)
    pub max_consecutive_failures: u32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group: "demo-rag-worker".to_string(),
            lease_ms: 30_000,
            partitions: 1,
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(15),
            max_consecutive_failures: 10,
        }
    }
}

impl ConsumerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            group: settings.worker_group.clone(),
            lease_ms: settings.lease_ms,
            partitions: 1,
            backoff_initial: Duration::from_millis(settings.backoff_initial_ms),
            backoff_max: Duration::from_millis(settings.backoff_max_ms),
            max_consecutive_failures: settings.max_consecutive_failures,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff_initial = initial;
        self.backoff_max = max.max(initial);
        self
    }

    pub fn with_max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max;
        self
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.backoff_initial,
            initial_interval: self.backoff_initial,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.backoff_max,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Counters reported when a loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub acked: u64,
    pub nacked: u64,
    /// Transport failures that caused a reconnect
    pub reconnects: u64,
}

enum SessionEnd {
    Cancelled,
    /// The service closed the stream cleanly
    Closed,
}

/// Consecutive-failure tracking for one loop.
struct Reconnect {
    backoff: ExponentialBackoff,
    failures: u32,
}

impl Reconnect {
    fn connected(&mut self) {
        self.failures = 0;
        self.backoff.reset();
    }
}

/// Streams one topic into a handler.
#[derive(Clone)]
pub struct ConsumerLoop {
    transport: Arc<dyn QueueTransport>,
    config: ConsumerConfig,
    shutdown: CancellationToken,
}

impl ConsumerLoop {
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        config: ConsumerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            transport,
            config,
            shutdown,
        }
    }

    /// Run until the shutdown token is cancelled or too many consecutive
    /// transport failures occur.
    pub async fn run(
        &self,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<LoopStats, WorkerError> {
        let mut stats = LoopStats::default();
        let mut reconnect = Reconnect {
            backoff: self.config.backoff(),
            failures: 0,
        };

        info!(topic = %topic, group = %self.config.group, "Consumer loop starting");

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let delay = match self
                .session(topic, handler.as_ref(), &mut reconnect, &mut stats)
                .await
            {
                Ok(SessionEnd::Cancelled) => break,
                Ok(SessionEnd::Closed) => {
                    info!(topic = %topic, "Stream closed by server, reconnecting");
                    self.config.backoff_initial
                }
                Err(e) => {
                    reconnect.failures += 1;
                    stats.reconnects += 1;

                    let max = self.config.max_consecutive_failures;
                    if max > 0 && reconnect.failures >= max {
                        error!(
                            topic = %topic,
                            failures = reconnect.failures,
                            error = %e,
                            "Too many consecutive failures, stopping consumer loop"
                        );
                        return Err(WorkerError::TooManyFailures {
                            topic: topic.to_string(),
                            failures: reconnect.failures,
                            last_error: e.to_string(),
                        });
                    }

                    let delay = reconnect
                        .backoff
                        .next_backoff()
                        .unwrap_or(self.config.backoff_max);
                    warn!(
                        topic = %topic,
                        failures = reconnect.failures,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Consume failed, reconnecting"
                    );
                    delay
                }
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(
            topic = %topic,
            acked = stats.acked,
            nacked = stats.nacked,
            reconnects = stats.reconnects,
            "Consumer loop stopped"
        );
        Ok(stats)
    }

    /// One connection: provision the topic, open the stream, drain it.
    async fn session(
        &self,
        topic: &str,
        handler: &dyn MessageHandler,
        reconnect: &mut Reconnect,
        stats: &mut LoopStats,
    ) -> Result<SessionEnd, QueueError> {
        self.transport
            .ensure_topic(topic, self.config.partitions)
            .await?;
        let mut stream = self
            .transport
            .consume(topic, &self.config.group, self.config.lease_ms)
            .await?;

        reconnect.connected();
        info!(topic = %topic, group = %self.config.group, "Connected to topic stream");

        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(SessionEnd::Cancelled),
                next = stream.next() => next,
            };
            match next {
                None => return Ok(SessionEnd::Closed),
                Some(Err(e)) => return Err(e),
                Some(Ok(delivery)) => self.process(topic, handler, delivery, stats).await,
            }
        }
    }

    async fn process(
        &self,
        topic: &str,
        handler: &dyn MessageHandler,
        delivery: Delivery,
        stats: &mut LoopStats,
    ) {
        let result = match delivery.payload() {
            None => Err(WorkerError::MalformedPayload),
            Some(value) => match ControlMessage::decode(value) {
                Err(e) => Err(WorkerError::Message(e)),
                Ok(message) => {
                    debug!(topic = %topic, kind = message.kind(), "Dispatching message");
                    match AssertUnwindSafe(handler.handle(message))
                        .catch_unwind()
                        .await
                    {
                        Ok(result) => result,
                        Err(panic) => Err(WorkerError::HandlerPanicked(panic_message(&*panic))),
                    }
                }
            },
        };

        let group = &self.config.group;
        match result {
            Ok(()) => match self.transport.ack(topic, group, &delivery.id).await {
                Ok(()) => stats.acked += 1,
                Err(e) => {
                    warn!(topic = %topic, error = %e, "Ack failed; message will be redelivered")
                }
            },
            Err(e) => {
                warn!(topic = %topic, error = %e, "Handler failed, nacking message");
                match self.transport.nack(topic, group, &delivery.id).await {
                    Ok(()) => stats.nacked += 1,
                    Err(e) => warn!(
                        topic = %topic,
                        error = %e,
                        "Nack failed; message will be redelivered after lease expiry"
                    ),
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use pretty_assertions::assert_eq;
    use ragops_queue::{DeliveryId, DeliveryStream};
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    type Session = Result<Vec<Result<Delivery, QueueError>>, ()>;

    /// Transport that plays back scripted consume sessions and records
    /// ack/nack calls. Once the script is exhausted the stream stays open.
    #[derive(Default)]
    struct ScriptedTransport {
        sessions: Mutex<VecDeque<Session>>,
        consume_calls: Mutex<Vec<Instant>>,
        acks: Mutex<Vec<DeliveryId>>,
        nacks: Mutex<Vec<DeliveryId>>,
        fail_nack: bool,
    }

    impl ScriptedTransport {
        fn new(sessions: Vec<Session>) -> Self {
            Self {
                sessions: Mutex::new(sessions.into()),
                ..Default::default()
            }
        }

        fn consume_count(&self) -> usize {
            self.consume_calls.lock().unwrap().len()
        }

        fn consume_gaps(&self) -> Vec<u64> {
            let calls = self.consume_calls.lock().unwrap();
            calls
                .windows(2)
                .map(|w| (w[1] - w[0]).as_secs())
                .collect()
        }

        fn lease_ids(ids: &Mutex<Vec<DeliveryId>>) -> Vec<Value> {
            ids.lock()
                .unwrap()
                .iter()
                .filter_map(|id| id.lease_id.clone())
                .collect()
        }
    }

    fn server_down() -> QueueError {
        QueueError::Server {
            operation: "consume",
            status: 503,
            body: "unavailable".to_string(),
        }
    }

    #[async_trait]
    impl QueueTransport for ScriptedTransport {
        async fn ensure_topic(&self, _topic: &str, _partitions: u32) -> Result<(), QueueError> {
            Ok(())
        }

        async fn produce(
            &self,
            _topic: &str,
            _value: &Value,
            _key: Option<&str>,
        ) -> Result<Value, QueueError> {
            Ok(json!({"status": "ok"}))
        }

        async fn consume(
            &self,
            _topic: &str,
            _group: &str,
            _lease_ms: u64,
        ) -> Result<DeliveryStream, QueueError> {
            self.consume_calls.lock().unwrap().push(Instant::now());
            match self.sessions.lock().unwrap().pop_front() {
                Some(Ok(items)) => Ok(stream::iter(items).boxed()),
                Some(Err(())) => Err(server_down()),
                None => Ok(stream::pending::<Result<Delivery, QueueError>>().boxed()),
            }
        }

        async fn ack(&self, _topic: &str, _group: &str, id: &DeliveryId) -> Result<(), QueueError> {
            self.acks.lock().unwrap().push(id.clone());
            Ok(())
        }

        async fn nack(&self, _topic: &str, _group: &str, id: &DeliveryId) -> Result<(), QueueError> {
            if self.fail_nack {
                return Err(server_down());
            }
            self.nacks.lock().unwrap().push(id.clone());
            Ok(())
        }

        async fn healthz(&self) -> Result<bool, QueueError> {
            Ok(true)
        }
    }

    /// Records run ids; fails builds whose run id is "fail" and panics on
    /// "panic".
    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        async fn handle(&self, message: ControlMessage) -> Result<(), WorkerError> {
            let ControlMessage::Build(build) = message else {
                return Err(WorkerError::UnexpectedMessage {
                    expected: "build",
                    actual: "rollback",
                });
            };
            self.seen.lock().unwrap().push(build.run_id.clone());
            match build.run_id.as_str() {
                "fail" => Err(WorkerError::UnknownRun("fail".to_string())),
                "panic" => panic!("handler blew up"),
                _ => Ok(()),
            }
        }
    }

    fn delivery(lease: &str, value: Value) -> Result<Delivery, QueueError> {
        Ok(Delivery::from_message(json!({"lease_id": lease, "value": value})))
    }

    fn config() -> ConsumerConfig {
        ConsumerConfig::default().with_backoff(Duration::from_secs(1), Duration::from_secs(4))
    }

    async fn wait_for(cond: impl Fn() -> bool) {
        for _ in 0..1000 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn test_acks_successes_and_nacks_failures_in_order() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(vec![
            delivery("L1", json!({"run_id": "r1"})),
            delivery("L2", json!({"run_id": "fail"})),
            delivery("L3", json!("not json at all")),
            delivery("L4", json!({"type": "delete"})),
            delivery("L5", json!("{\"run_id\": \"r2\"}")),
            delivery("L6", json!({"run_id": "panic"})),
        ])]));
        let handler = Arc::new(RecordingHandler::default());
        let token = CancellationToken::new();
        let consumer = ConsumerLoop::new(transport.clone(), config(), token.clone());

        let task = {
            let handler = handler.clone();
            tokio::spawn(async move { consumer.run("t", handler).await })
        };
        wait_for(|| transport.acks.lock().unwrap().len() + transport.nacks.lock().unwrap().len() == 6)
            .await;
        token.cancel();
        let stats = task.await.unwrap().unwrap();

        assert_eq!(
            *handler.seen.lock().unwrap(),
            vec!["r1".to_string(), "fail".to_string(), "r2".to_string(), "panic".to_string()]
        );
        assert_eq!(
            ScriptedTransport::lease_ids(&transport.acks),
            vec![json!("L1"), json!("L5")]
        );
        assert_eq!(
            ScriptedTransport::lease_ids(&transport.nacks),
            vec![json!("L2"), json!("L3"), json!("L4"), json!("L6")]
        );
        assert_eq!(stats.acked, 2);
        assert_eq!(stats.nacked, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nack_failure_does_not_stop_loop() {
        let transport = Arc::new(ScriptedTransport {
            sessions: Mutex::new(
                vec![Ok(vec![
                    delivery("L1", json!({"run_id": "fail"})),
                    delivery("L2", json!({"run_id": "r2"})),
                ])]
                .into(),
            ),
            fail_nack: true,
            ..Default::default()
        });
        let handler = Arc::new(RecordingHandler::default());
        let token = CancellationToken::new();
        let consumer = ConsumerLoop::new(transport.clone(), config(), token.clone());

        let task = tokio::spawn(async move { consumer.run("t", handler).await });
        wait_for(|| transport.acks.lock().unwrap().len() == 1).await;
        token.cancel();
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.acked, 1);
        assert_eq!(stats.nacked, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_backoff_doubles_and_caps() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(()),
            Err(()),
            Err(()),
            Err(()),
        ]));
        let token = CancellationToken::new();
        let consumer = ConsumerLoop::new(
            transport.clone(),
            config().with_max_consecutive_failures(0),
            token.clone(),
        );

        let task = tokio::spawn(async move {
            consumer
                .run("t", Arc::new(RecordingHandler::default()))
                .await
        });
        wait_for(|| transport.consume_count() == 5).await;
        token.cancel();
        let stats = task.await.unwrap().unwrap();

        assert_eq!(transport.consume_gaps(), vec![1, 2, 4, 4]);
        assert_eq!(stats.reconnects, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_consecutive_failures() {
        let transport = Arc::new(ScriptedTransport::new((0..5).map(|_| Err(())).collect()));
        let consumer = ConsumerLoop::new(
            transport.clone(),
            config().with_max_consecutive_failures(3),
            CancellationToken::new(),
        );

        let err = consumer
            .run("t", Arc::new(RecordingHandler::default()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkerError::TooManyFailures { failures: 3, .. }
        ));
        assert_eq!(transport.consume_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_connect_resets_failures() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(()),
            Err(()),
            Ok(vec![]),
            Err(()),
            Err(()),
        ]));
        let token = CancellationToken::new();
        let consumer = ConsumerLoop::new(
            transport.clone(),
            config().with_max_consecutive_failures(3),
            token.clone(),
        );

        let task = tokio::spawn(async move {
            consumer
                .run("t", Arc::new(RecordingHandler::default()))
                .await
        });
        wait_for(|| transport.consume_count() == 6).await;
        token.cancel();
        let stats = task.await.unwrap().unwrap();

        // 1s, 2s, clean close waits the initial delay, then 1s, 2s again
        assert_eq!(transport.consume_gaps(), vec![1, 2, 1, 1, 2]);
        assert_eq!(stats.reconnects, 4);
    }

    #[tokio::test]
    async fn test_cancel_stops_idle_loop() {
        let transport = Arc::new(ScriptedTransport::default());
        let token = CancellationToken::new();
        let consumer = ConsumerLoop::new(transport.clone(), config(), token.clone());

        let task = tokio::spawn(async move {
            consumer
                .run("t", Arc::new(RecordingHandler::default()))
                .await
        });
        wait_for(|| transport.consume_count() == 1).await;
        token.cancel();

        let stats = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(stats, LoopStats::default());
    }
}
