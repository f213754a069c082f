//! # Consumer Loop
//!
//! One loop per stream/group pair, each with its own bounded worker pool.
//!
//! A loop first drains the group's pending entries, reclaiming whatever a
//! crashed process left behind, then settles into blocking reads for new
//! entries. Entries dispatch to the executor concurrently up to the pool
//! bound; a saturated pool stops further reads until a slot frees, which is
//! the only backpressure mechanism. A single entry's failure never takes
//! the loop down, and broker outages are retried with backoff.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::accounts::AccountStore;
use crate::broker::{Broker, ReadMode, StreamEntry};
use crate::codec;
use crate::error::Error;
use crate::executor::{Executor, Outcome};
use crate::topics::Topic;

/// First retry delay after a failed broker read.
const READ_RETRY_BASE: Duration = Duration::from_millis(200);
/// Cap for the read retry backoff.
const READ_RETRY_MAX: Duration = Duration::from_secs(5);

pub struct ConsumerLoop {
    topic: Topic,
    broker: Arc<dyn Broker>,
    executor: Arc<dyn Executor>,
    accounts: Arc<dyn AccountStore>,
    identity: String,
    block: Duration,
    pool: Arc<Semaphore>,
    pool_size: usize,
}

impl ConsumerLoop {
    pub fn new(
        topic: Topic,
        broker: Arc<dyn Broker>,
        executor: Arc<dyn Executor>,
        accounts: Arc<dyn AccountStore>,
        identity: impl Into<String>,
        block: Duration,
        pool_size: usize,
    ) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            topic,
            broker,
            executor,
            accounts,
            identity: identity.into(),
            block,
            pool: Arc::new(Semaphore::new(pool_size)),
            pool_size,
        }
    }

    /// Runs until the stop signal flips. In-flight executors finish;
    /// unacked entries stay pending for the next process.
    pub async fn run(self, stop: watch::Receiver<bool>) {
        let stream = self.topic.stream();
        info!(stream, consumer = %self.identity, "reclaiming pending entries");
        self.phase(&stop, ReadMode::Pending).await;

        if !*stop.borrow() {
            info!(stream, "entering steady state");
            self.phase(&stop, ReadMode::New).await;
        }

        self.drain().await;
        info!(stream, "consumer loop stopped");
    }

    /// Reads in the given mode until stopped; a pending phase also ends
    /// once the backlog is empty.
    async fn phase(&self, stop: &watch::Receiver<bool>, mode: ReadMode) {
        let mut retry = READ_RETRY_BASE;
        loop {
            if *stop.borrow() {
                return;
            }
            let read = self
                .broker
                .read_group(
                    self.topic.stream(),
                    self.topic.group(),
                    &self.identity,
                    mode,
                    self.block,
                )
                .await;
            match read {
                Ok(batch) if batch.is_empty() => {
                    if mode == ReadMode::Pending {
                        return;
                    }
                }
                Ok(batch) => {
                    retry = READ_RETRY_BASE;
                    for entry in batch {
                        self.handle_entry(entry).await;
                    }
                }
                Err(e) => {
                    warn!(stream = self.topic.stream(), error = %e, "broker read failed, backing off");
                    sleep(retry).await;
                    retry = (retry * 2).min(READ_RETRY_MAX);
                }
            }
        }
    }

    async fn handle_entry(&self, entry: StreamEntry) {
        let envelope = match codec::decode(&entry.fields) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.drop_undecodable(&entry, &e).await;
                return;
            }
        };

        // Blocks when the pool is saturated, which pauses further reads.
        let Ok(permit) = self.pool.clone().acquire_owned().await else {
            return;
        };

        let topic = self.topic;
        let broker = self.broker.clone();
        let executor = self.executor.clone();
        let id = entry.id;
        tokio::spawn(async move {
            let outcome = executor.dispatch(&envelope).await;
            match outcome {
                Outcome::Done | Outcome::Fatal => {
                    if let Err(e) = broker.ack(topic.stream(), topic.group(), &id).await {
                        warn!(stream = topic.stream(), id = %id, error = %e, "ack failed, entry will be redelivered");
                    }
                }
                Outcome::Retry => {
                    debug!(stream = topic.stream(), id = %id, "left unacked for redelivery");
                }
            }
            drop(permit);
        });
    }

    /// Decode failures are acked and dropped: retrying cannot fix the
    /// bytes, so the entry is only kept as an operator-visible error.
    async fn drop_undecodable(&self, entry: &StreamEntry, cause: &Error) {
        error!(stream = self.topic.stream(), id = %entry.id, error = %cause, "dropping undecodable entry");
        if let Err(e) = self
            .accounts
            .record_error(
                self.topic.stream(),
                &format!("undecodable entry {}: {cause}", entry.id),
            )
            .await
        {
            warn!(stream = self.topic.stream(), error = %e, "failed to record decode error");
        }
        if let Err(e) = self
            .broker
            .ack(self.topic.stream(), self.topic.group(), &entry.id)
            .await
        {
            warn!(stream = self.topic.stream(), id = %entry.id, error = %e, "ack of dropped entry failed");
        }
    }

    /// Waits for every in-flight executor by taking the whole pool.
    async fn drain(&self) {
        let _all = self.pool.acquire_many(self.pool_size as u32).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::MemoryAccounts;
    use crate::broker::memory::MemoryBroker;
    use crate::executor::{DeploymentExecutor, NoopProvisioner};
    use crate::producer::Producer;
    use crate::topics;

    fn consumer(topic: Topic, broker: Arc<MemoryBroker>) -> ConsumerLoop {
        let accounts = Arc::new(MemoryAccounts::new());
        let executor = Arc::new(DeploymentExecutor::new(
            Producer::new(broker.clone()),
            accounts.clone(),
            Arc::new(NoopProvisioner),
        ));
        ConsumerLoop::new(
            topic,
            broker,
            executor,
            accounts,
            "test-consumer",
            Duration::from_millis(20),
            1,
        )
    }

    #[tokio::test]
    async fn stops_promptly_when_signalled() {
        let broker = Arc::new(MemoryBroker::new());
        topics::ensure_all(broker.as_ref()).await.unwrap();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(consumer(Topic::VmRequests, broker).run(rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop did not stop within one block window")
            .unwrap();
    }
}
