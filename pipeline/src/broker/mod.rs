//! # Broker Client
//!
//! Thin adapter over a stream-capable broker.
//!
//! A stream is an append-only, id-ordered log; a consumer group is a shared
//! cursor over it. Entries handed to a group member stay *pending* until
//! acknowledged, and pending entries can be reclaimed by any member asking
//! for them. That is the whole delivery contract the pipeline builds on.
//!
//! [`redis::RedisBroker`] is the production implementation;
//! [`memory::MemoryBroker`] backs tests and local development.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Which entries a group read should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Only entries never delivered to this group.
    New,
    /// Entries previously handed out but not acknowledged, from id 0.
    /// The claim moves to the reading consumer.
    Pending,
}

/// One unit of acknowledgement: a broker-assigned monotone id plus the raw
/// field pairs of the entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: Vec<(String, Vec<u8>)>,
}

/// Stream operations the pipeline needs. Implementations must allow
/// concurrent `read_group`/`ack` calls with distinct consumer names.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Creates the stream (if absent) and the group. Succeeds when the
    /// group already exists; any other failure is fatal at startup.
    async fn ensure_group(&self, stream: &str, group: &str, start_id: &str) -> Result<()>;

    /// Atomically appends an entry and returns its broker-assigned id.
    async fn append(&self, stream: &str, fields: &[(String, Vec<u8>)]) -> Result<String>;

    /// Reads up to a batch of entries for `consumer`. New reads block up to
    /// `block` when nothing is available and may return empty. Pending
    /// reads return immediately and reclaim only entries that have sat
    /// unacknowledged for at least `block`, so work still in flight on a
    /// live consumer is not stolen.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        mode: ReadMode,
        block: Duration,
    ) -> Result<Vec<StreamEntry>>;

    /// Acknowledges an entry. Repeated acks on the same id are no-ops.
    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<()>;
}
