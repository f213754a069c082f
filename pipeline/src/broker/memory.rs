//! In-memory broker for tests and local development.
//!
//! Mirrors the delivery contract of the redis implementation: monotone ids
//! per stream, per-group cursors, pending entries that stay claimable until
//! acked. Single-process only; nothing is persisted.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant as StdInstant};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::{timeout, Instant};

use super::{Broker, ReadMode, StreamEntry};
use crate::error::{Error, Result};

const READ_COUNT: usize = 16;

#[derive(Debug, Clone)]
struct Stored {
    seq: u64,
    fields: Vec<(String, Vec<u8>)>,
}

#[derive(Debug, Clone)]
struct Claim {
    consumer: String,
    delivered_at: StdInstant,
}

#[derive(Debug, Default)]
struct GroupState {
    /// Highest seq ever handed out as a new message.
    last_delivered: u64,
    /// seq -> current claim on the undelivered entry.
    pending: BTreeMap<u64, Claim>,
}

#[derive(Debug, Default)]
struct StreamState {
    next_seq: u64,
    entries: Vec<Stored>,
    groups: HashMap<String, GroupState>,
}

#[derive(Debug, Default)]
pub struct MemoryBroker {
    streams: Mutex<HashMap<String, StreamState>>,
    appended: Notify,
}

fn entry_id(seq: u64) -> String {
    format!("{seq}-0")
}

fn parse_id(id: &str) -> Option<u64> {
    id.split('-').next()?.parse().ok()
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total entries ever appended to a stream.
    pub fn stream_len(&self, stream: &str) -> usize {
        let streams = self.streams.lock().unwrap();
        streams.get(stream).map_or(0, |s| s.entries.len())
    }

    /// Entries delivered to the group but not yet acknowledged.
    pub fn pending_len(&self, stream: &str, group: &str) -> usize {
        let streams = self.streams.lock().unwrap();
        streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map_or(0, |g| g.pending.len())
    }

    fn try_read_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Vec<StreamEntry>> {
        let mut streams = self.streams.lock().unwrap();
        let state = streams
            .get_mut(stream)
            .ok_or_else(|| Error::transport(format!("no such stream: {stream}")))?;
        let group_state = state
            .groups
            .get_mut(group)
            .ok_or_else(|| Error::transport(format!("no such group: {group} on {stream}")))?;

        let mut batch = Vec::new();
        for stored in &state.entries {
            if stored.seq <= group_state.last_delivered {
                continue;
            }
            if batch.len() == READ_COUNT {
                break;
            }
            group_state.last_delivered = stored.seq;
            group_state.pending.insert(
                stored.seq,
                Claim {
                    consumer: consumer.to_string(),
                    delivered_at: StdInstant::now(),
                },
            );
            batch.push(StreamEntry {
                id: entry_id(stored.seq),
                fields: stored.fields.clone(),
            });
        }
        Ok(batch)
    }

    /// Reclaims pending entries idle for at least `min_idle`, moving their
    /// claim to the requesting consumer.
    fn read_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
    ) -> Result<Vec<StreamEntry>> {
        let mut streams = self.streams.lock().unwrap();
        let state = streams
            .get_mut(stream)
            .ok_or_else(|| Error::transport(format!("no such stream: {stream}")))?;
        let group_state = state
            .groups
            .get_mut(group)
            .ok_or_else(|| Error::transport(format!("no such group: {group} on {stream}")))?;

        let now = StdInstant::now();
        let seqs: Vec<u64> = group_state
            .pending
            .iter()
            .filter(|(_, claim)| now.duration_since(claim.delivered_at) >= min_idle)
            .take(READ_COUNT)
            .map(|(seq, _)| *seq)
            .collect();

        let mut batch = Vec::new();
        for seq in seqs {
            group_state.pending.insert(
                seq,
                Claim {
                    consumer: consumer.to_string(),
                    delivered_at: now,
                },
            );
            if let Some(stored) = state.entries.iter().find(|s| s.seq == seq) {
                batch.push(StreamEntry {
                    id: entry_id(seq),
                    fields: stored.fields.clone(),
                });
            }
        }
        Ok(batch)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn ensure_group(&self, stream: &str, group: &str, start_id: &str) -> Result<()> {
        let mut streams = self.streams.lock().unwrap();
        let state = streams.entry(stream.to_string()).or_default();
        let start = match start_id {
            "$" => state.entries.last().map_or(0, |s| s.seq),
            other => parse_id(other).unwrap_or(0),
        };
        state.groups.entry(group.to_string()).or_insert(GroupState {
            last_delivered: start,
            pending: BTreeMap::new(),
        });
        Ok(())
    }

    async fn append(&self, stream: &str, fields: &[(String, Vec<u8>)]) -> Result<String> {
        let id = {
            let mut streams = self.streams.lock().unwrap();
            let state = streams.entry(stream.to_string()).or_default();
            state.next_seq += 1;
            let seq = state.next_seq;
            state.entries.push(Stored {
                seq,
                fields: fields.to_vec(),
            });
            entry_id(seq)
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        mode: ReadMode,
        block: Duration,
    ) -> Result<Vec<StreamEntry>> {
        if mode == ReadMode::Pending {
            return self.read_pending(stream, group, consumer, block);
        }

        let deadline = Instant::now() + block;
        loop {
            // Arm the wakeup before checking so an append between the check
            // and the wait is not lost.
            let notified = self.appended.notified();
            let batch = self.try_read_new(stream, group, consumer)?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let _ = timeout(deadline - now, notified).await;
        }
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<()> {
        let Some(seq) = parse_id(id) else {
            return Ok(());
        };
        let mut streams = self.streams.lock().unwrap();
        if let Some(group_state) = streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
        {
            group_state.pending.remove(&seq);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: Duration = Duration::from_millis(20);

    fn field(name: &str) -> Vec<(String, Vec<u8>)> {
        vec![(name.to_string(), name.as_bytes().to_vec())]
    }

    async fn broker_with_group(stream: &str, group: &str) -> MemoryBroker {
        let broker = MemoryBroker::new();
        broker.ensure_group(stream, group, "$").await.unwrap();
        broker
    }

    #[tokio::test]
    async fn delivers_appended_entries_once() {
        let broker = broker_with_group("s", "g").await;
        broker.append("s", &field("a")).await.unwrap();

        let first = broker
            .read_group("s", "g", "c1", ReadMode::New, BLOCK)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        // Not acked, but a new read must not see it again.
        let second = broker
            .read_group("s", "g", "c1", ReadMode::New, BLOCK)
            .await
            .unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn pending_entries_are_reclaimable_until_acked() {
        let broker = broker_with_group("s", "g").await;
        broker.append("s", &field("a")).await.unwrap();

        let delivered = broker
            .read_group("s", "g", "c1", ReadMode::New, BLOCK)
            .await
            .unwrap();
        let id = delivered[0].id.clone();

        // Still claimed by c1 and fresh: not up for grabs yet.
        let too_fresh = broker
            .read_group("s", "g", "c2", ReadMode::Pending, BLOCK)
            .await
            .unwrap();
        assert!(too_fresh.is_empty());

        // Once idle long enough, a different consumer reclaims it.
        tokio::time::sleep(BLOCK).await;
        let reclaimed = broker
            .read_group("s", "g", "c2", ReadMode::Pending, BLOCK)
            .await
            .unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, id);

        broker.ack("s", "g", &id).await.unwrap();
        tokio::time::sleep(BLOCK).await;
        let after_ack = broker
            .read_group("s", "g", "c2", ReadMode::Pending, BLOCK)
            .await
            .unwrap();
        assert!(after_ack.is_empty());
    }

    #[tokio::test]
    async fn ack_is_idempotent() {
        let broker = broker_with_group("s", "g").await;
        broker.append("s", &field("a")).await.unwrap();
        let delivered = broker
            .read_group("s", "g", "c1", ReadMode::New, BLOCK)
            .await
            .unwrap();
        let id = delivered[0].id.clone();

        broker.ack("s", "g", &id).await.unwrap();
        broker.ack("s", "g", &id).await.unwrap();
        assert_eq!(broker.pending_len("s", "g"), 0);
    }

    #[tokio::test]
    async fn empty_reads_return_after_the_block_window() {
        let broker = broker_with_group("s", "g").await;
        let start = Instant::now();
        let batch = broker
            .read_group("s", "g", "c1", ReadMode::New, BLOCK)
            .await
            .unwrap();
        assert!(batch.is_empty());
        assert!(start.elapsed() >= BLOCK);
    }

    #[tokio::test]
    async fn groups_created_at_dollar_skip_existing_entries() {
        let broker = MemoryBroker::new();
        broker.append("s", &field("old")).await.unwrap();
        broker.ensure_group("s", "g", "$").await.unwrap();

        let batch = broker
            .read_group("s", "g", "c1", ReadMode::New, BLOCK)
            .await
            .unwrap();
        assert!(batch.is_empty());

        broker.append("s", &field("new")).await.unwrap();
        let batch = broker
            .read_group("s", "g", "c1", ReadMode::New, BLOCK)
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn ensure_group_keeps_existing_cursor() {
        let broker = broker_with_group("s", "g").await;
        broker.append("s", &field("a")).await.unwrap();
        broker
            .read_group("s", "g", "c1", ReadMode::New, BLOCK)
            .await
            .unwrap();

        // Re-ensuring must not reset delivery state.
        broker.ensure_group("s", "g", "$").await.unwrap();
        assert_eq!(broker.pending_len("s", "g"), 1);
        let batch = broker
            .read_group("s", "g", "c1", ReadMode::New, BLOCK)
            .await
            .unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn blocked_readers_wake_on_append() {
        let broker = std::sync::Arc::new(broker_with_group("s", "g").await);
        let reader = {
            let broker = broker.clone();
            tokio::spawn(async move {
                broker
                    .read_group("s", "g", "c1", ReadMode::New, Duration::from_secs(5))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        broker.append("s", &field("a")).await.unwrap();

        let batch = reader.await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
    }
}
