//! Broker-backed work queues.
//!
//! Each queue is a broker list named `lobby.queue:<name>` holding JSON
//! items. A [`QueueProcessor`] owns one typed [`QueueConsumer`] per queue
//! name and drains the lists in FIFO order; producers (hubs, other
//! services) append through a [`QueueSender`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::QUEUE_PREFIX;
use crate::broker::Broker;
use crate::error::ServerError;

/// Default pause between polls when every queue is empty.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Returns the broker key of queue `name`.
#[must_use]
pub fn queue_key(name: &str) -> String {
    format!("{QUEUE_PREFIX}{name}")
}

/// Typed handler for the items of one queue.
pub trait QueueConsumer: Send + Sync + 'static {
    /// Item type; each list entry is its JSON encoding.
    type Item: DeserializeOwned + Send + 'static;

    /// Processes one item.
    ///
    /// # Errors
    ///
    /// Whatever the consumer fails with; the processor logs it and drops
    /// the item.
    fn process(&self, item: Self::Item) -> BoxFuture<'_, Result<(), ServerError>>;
}

trait ErasedConsumer: Send + Sync {
    fn process_raw(
        &self,
        raw: &str,
    ) -> Result<BoxFuture<'_, Result<(), ServerError>>, serde_json::Error>;
}

impl<C: QueueConsumer> ErasedConsumer for C {
    fn process_raw(
        &self,
        raw: &str,
    ) -> Result<BoxFuture<'_, Result<(), ServerError>>, serde_json::Error> {
        let item = serde_json::from_str::<C::Item>(raw)?;
        Ok(self.process(item))
    }
}

/// Push-only handle onto the broker queues.
#[derive(Debug, Clone)]
pub struct QueueSender {
    broker: Arc<dyn Broker>,
}

impl QueueSender {
    /// Creates a sender over `broker`.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Appends `item` to queue `name`, returning the new queue length.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Serialization`] or the broker's error.
    pub async fn push<T: Serialize + ?Sized>(
        &self,
        name: &str,
        item: &T,
    ) -> Result<usize, ServerError> {
        let raw = serde_json::to_string(item)?;
        self.broker.list_push(&queue_key(name), raw).await
    }
}

struct Queue {
    name: String,
    key: String,
    consumer: Box<dyn ErasedConsumer>,
}

/// Consumes the registered queues.
pub struct QueueProcessor {
    broker: Arc<dyn Broker>,
    queues: Vec<Queue>,
    poll_interval: Duration,
}

impl QueueProcessor {
    /// Creates a processor with no queues and the default poll interval.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            queues: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets the pause between polls when every queue is empty.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Binds `consumer` to queue `name`, replacing any previous consumer.
    pub fn register<C: QueueConsumer>(&mut self, name: &str, consumer: C) -> &mut Self {
        let queue = Queue {
            name: name.to_string(),
            key: queue_key(name),
            consumer: Box::new(consumer),
        };
        match self.queues.iter_mut().find(|q| q.name == name) {
            Some(existing) => *existing = queue,
            None => self.queues.push(queue),
        }
        tracing::debug!(queue = name, "queue consumer registered");
        self
    }

    /// Returns the registered queue names in registration order.
    #[must_use]
    pub fn queue_names(&self) -> Vec<&str> {
        self.queues.iter().map(|q| q.name.as_str()).collect()
    }

    /// Returns a push-only handle sharing this processor's broker.
    #[must_use]
    pub fn sender(&self) -> QueueSender {
        QueueSender::new(Arc::clone(&self.broker))
    }

    fn queue(&self, name: &str) -> Result<&Queue, ServerError> {
        self.queues
            .iter()
            .find(|q| q.name == name)
            .ok_or_else(|| ServerError::UnknownQueue(name.to_string()))
    }

    /// Appends `item` to a registered queue.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::UnknownQueue`] if no consumer is registered
    /// for `name`, otherwise serialization or broker errors.
    pub async fn push<T: Serialize + ?Sized>(
        &self,
        name: &str,
        item: &T,
    ) -> Result<usize, ServerError> {
        let queue = self.queue(name)?;
        let raw = serde_json::to_string(item)?;
        self.broker.list_push(&queue.key, raw).await
    }

    /// Returns the number of items waiting in queue `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::UnknownQueue`] or a broker error.
    pub async fn queue_len(&self, name: &str) -> Result<usize, ServerError> {
        let queue = self.queue(name)?;
        self.broker.list_len(&queue.key).await
    }

    /// Returns the number of items waiting across every queue.
    ///
    /// # Errors
    ///
    /// Returns a broker error.
    pub async fn total_len(&self) -> Result<usize, ServerError> {
        let mut total = 0;
        for queue in &self.queues {
            total += self.broker.list_len(&queue.key).await?;
        }
        Ok(total)
    }

    /// Drops every item of queue `name`. Returns `true` if anything was
    /// queued.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::UnknownQueue`] or a broker error.
    pub async fn clear(&self, name: &str) -> Result<bool, ServerError> {
        let queue = self.queue(name)?;
        self.broker.delete(&queue.key).await
    }

    /// Pops and processes the next item of queue `name`.
    ///
    /// Returns `false` when the queue was empty. Items that fail to decode
    /// or whose consumer fails are logged and dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::UnknownQueue`] or a broker error.
    pub async fn process_next(&self, name: &str) -> Result<bool, ServerError> {
        let queue = self.queue(name)?;
        self.process_queue(queue).await
    }

    async fn process_queue(&self, queue: &Queue) -> Result<bool, ServerError> {
        let Some(raw) = self.broker.list_pop(&queue.key).await? else {
            return Ok(false);
        };

        match queue.consumer.process_raw(&raw) {
            Ok(processing) => {
                if let Err(e) = processing.await {
                    tracing::warn!(queue = %queue.name, error = %e, "queue item failed");
                }
            }
            Err(e) => {
                tracing::warn!(queue = %queue.name, error = %e, "dropping malformed queue item");
            }
        }
        Ok(true)
    }

    /// Processes every item currently queued, queue by queue, and returns
    /// how many were taken.
    ///
    /// # Errors
    ///
    /// Returns the first broker error; items taken before it stay processed.
    pub async fn drain(&self) -> Result<usize, ServerError> {
        let mut processed = 0;
        for queue in &self.queues {
            while self.process_queue(queue).await? {
                processed += 1;
            }
        }
        Ok(processed)
    }

    /// Polls the queues until `shutdown` completes.
    ///
    /// Non-empty queues are drained back to back; when everything is empty
    /// the loop sleeps for the poll interval. Broker errors are logged and
    /// retried after the interval.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        tracing::info!(queues = ?self.queue_names(), "queue processor started");

        let mut delay = Duration::ZERO;
        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => break,
                () = tokio::time::sleep(delay) => {}
            }

            delay = match self.drain().await {
                Ok(0) => self.poll_interval,
                Ok(processed) => {
                    tracing::debug!(processed, "queue items processed");
                    Duration::ZERO
                }
                Err(e) => {
                    tracing::warn!(error = %e, "queue poll failed");
                    self.poll_interval
                }
            };
        }

        tracing::info!("queue processor stopped");
    }
}

impl fmt::Debug for QueueProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueProcessor")
            .field("broker", &self.broker)
            .field("queues", &self.queue_names())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Mutex;

    use futures_util::FutureExt;
    use futures_util::future::ready;
    use serde::Deserialize;

    use super::*;
    use crate::broker::MemoryBroker;

    #[derive(Debug, Serialize, Deserialize)]
    struct Job {
        n: i64,
    }

    #[derive(Default)]
    struct Collect {
        seen: Arc<Mutex<Vec<i64>>>,
    }

    impl QueueConsumer for Collect {
        type Item = Job;

        fn process(&self, item: Job) -> BoxFuture<'_, Result<(), ServerError>> {
            if item.n < 0 {
                return ready(Err(ServerError::Internal("negative".to_string()))).boxed();
            }
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(item.n);
            }
            ready(Ok(())).boxed()
        }
    }

    fn processor() -> (QueueProcessor, Arc<Mutex<Vec<i64>>>) {
        let consumer = Collect::default();
        let seen = Arc::clone(&consumer.seen);
        let mut processor = QueueProcessor::new(Arc::new(MemoryBroker::new()))
            .with_poll_interval(Duration::from_millis(10));
        processor.register("jobs", consumer);
        (processor, seen)
    }

    fn seen(seen: &Arc<Mutex<Vec<i64>>>) -> Vec<i64> {
        seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    #[tokio::test]
    async fn push_rejects_unknown_queues() {
        let (processor, _) = processor();
        let result = processor.push("nope", &Job { n: 1 }).await;
        assert!(matches!(result, Err(ServerError::UnknownQueue(name)) if name == "nope"));
        assert!(matches!(
            processor.queue_len("nope").await,
            Err(ServerError::UnknownQueue(_))
        ));
    }

    #[tokio::test]
    async fn items_are_processed_in_fifo_order() {
        let (processor, log) = processor();
        for n in 1..=3 {
            let Ok(_) = processor.push("jobs", &Job { n }).await else {
                panic!("push failed");
            };
        }
        assert_eq!(processor.queue_len("jobs").await.ok(), Some(3));
        assert_eq!(processor.total_len().await.ok(), Some(3));

        assert_eq!(processor.process_next("jobs").await.ok(), Some(true));
        assert_eq!(seen(&log), vec![1]);

        assert_eq!(processor.drain().await.ok(), Some(2));
        assert_eq!(seen(&log), vec![1, 2, 3]);
        assert_eq!(processor.process_next("jobs").await.ok(), Some(false));
    }

    #[tokio::test]
    async fn malformed_and_failing_items_are_dropped() {
        let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
        let consumer = Collect::default();
        let log = Arc::clone(&consumer.seen);
        let mut processor = QueueProcessor::new(Arc::clone(&broker));
        processor.register("jobs", consumer);

        let _ = broker.list_push(&queue_key("jobs"), "{garbage".to_string()).await;
        let _ = processor.push("jobs", &Job { n: -1 }).await;
        let _ = processor.push("jobs", &Job { n: 7 }).await;

        assert_eq!(processor.drain().await.ok(), Some(3));
        assert_eq!(seen(&log), vec![7]);
        assert_eq!(processor.total_len().await.ok(), Some(0));
    }

    #[tokio::test]
    async fn clear_empties_the_queue() {
        let (processor, log) = processor();
        let _ = processor.push("jobs", &Job { n: 1 }).await;

        assert_eq!(processor.clear("jobs").await.ok(), Some(true));
        assert_eq!(processor.clear("jobs").await.ok(), Some(false));
        assert_eq!(processor.drain().await.ok(), Some(0));
        assert!(seen(&log).is_empty());
    }

    #[tokio::test]
    async fn sender_feeds_the_processor() {
        let (processor, log) = processor();
        let sender = processor.sender();
        let _ = sender.push("jobs", &Job { n: 5 }).await;

        assert_eq!(processor.drain().await.ok(), Some(1));
        assert_eq!(seen(&log), vec![5]);
    }

    #[tokio::test]
    async fn run_drains_until_shutdown() {
        let (processor, log) = processor();
        let processor = Arc::new(processor);
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let runner = {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move {
                processor
                    .run(async move {
                        let _ = stop_rx.await;
                    })
                    .await;
            })
        };

        let _ = processor.push("jobs", &Job { n: 9 }).await;
        for _ in 0..100 {
            if !seen(&log).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(seen(&log), vec![9]);

        let _ = stop_tx.send(());
        let Ok(Ok(())) = tokio::time::timeout(Duration::from_secs(1), runner).await else {
            panic!("processor did not stop");
        };
    }
}
