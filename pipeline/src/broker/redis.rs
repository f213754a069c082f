//! Redis streams implementation of the broker client.
//!
//! Uses a shared [`ConnectionManager`], so the same multiplexed connection
//! serves the producer and every consumer loop. XGROUP CREATE runs with
//! MKSTREAM so a fresh database bootstraps itself; BUSYGROUP answers are
//! success since the group being there is exactly what we want.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamAutoClaimOptions, StreamAutoClaimReply, StreamId, StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;
use tracing::debug;

use super::{Broker, ReadMode, StreamEntry};
use crate::error::{Error, Result};

/// How many entries a single group read may return.
const READ_COUNT: usize = 16;

fn convert_entry(id: StreamId) -> Result<StreamEntry> {
    let mut fields = Vec::with_capacity(id.map.len());
    for (name, value) in id.map {
        let bytes: Vec<u8> = redis::from_redis_value(&value)?;
        fields.push((name, bytes));
    }
    Ok(StreamEntry { id: id.id, fields })
}

#[derive(Clone)]
pub struct RedisBroker {
    connection: ConnectionManager,
}

impl RedisBroker {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn ensure_group(&self, stream: &str, group: &str, start_id: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        let created: std::result::Result<String, redis::RedisError> = connection
            .xgroup_create_mkstream(stream, group, start_id)
            .await;

        match created {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!(stream, group, "group already exists");
                Ok(())
            }
            Err(e) => Err(Error::startup(format!(
                "create group {group} on {stream}: {e}"
            ))),
        }
    }

    async fn append(&self, stream: &str, fields: &[(String, Vec<u8>)]) -> Result<String> {
        let mut connection = self.connection.clone();
        let id: String = connection.xadd(stream, "*", fields).await?;
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
        let mut connection = self.connection.clone();
        match mode {
            ReadMode::New => {
                // BLOCK 0 would park forever, so clamp to at least 1 ms.
                let options = StreamReadOptions::default()
                    .group(group, consumer)
                    .count(READ_COUNT)
                    .block(block.as_millis().max(1) as usize);
                let reply: StreamReadReply = connection
                    .xread_options(&[stream], &[">"], &options)
                    .await?;

                let mut entries = Vec::new();
                for key in reply.keys {
                    for id in key.ids {
                        entries.push(convert_entry(id)?);
                    }
                }
                Ok(entries)
            }
            ReadMode::Pending => {
                // Claims entries another consumer left unacked, but only
                // after they have idled for a block window, so in-flight
                // work on a live consumer stays where it is.
                let options = StreamAutoClaimOptions::default().count(READ_COUNT);
                let reply: StreamAutoClaimReply = connection
                    .xautoclaim_options(
                        stream,
                        group,
                        consumer,
                        block.as_millis() as usize,
                        "0-0",
                        options,
                    )
                    .await?;

                reply.claimed.into_iter().map(convert_entry).collect()
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        let _acked: u64 = connection.xack(stream, group, &[id]).await?;
        Ok(())
    }
}
