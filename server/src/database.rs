//! # Redis
//!
//! One connection manager serves three roles: the broker streams, the
//! deployment status hashes executors write through [`RedisAccounts`], and
//! the operator error list.
//!
//! ## Keys
//!
//! - `deployments:{owner}` — hash, request id to status. The presence of a
//!   field is the executor idempotency record.
//! - `rejections:{owner}` — hash, request id to rejection reason.
//! - `pipeline-errors` — list of operator-visible errors (undecodable
//!   entries and the like).

use std::time::Duration;

use async_trait::async_trait;
use redis::{
    aio::{ConnectionManager, ConnectionManagerConfig},
    AsyncCommands, Client,
};

use pipeline::accounts::AccountStore;
use pipeline::error::Result;
use pipeline::model::Kind;

/// Active workloads one owner may hold per kind before new requests are
/// rejected.
const MAX_ACTIVE_DEPLOYMENTS: u64 = 10;

pub async fn init_redis(broker_url: &str) -> ConnectionManager {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(100));

    let client = Client::open(broker_url).expect("Broker URL misconfigured!");
    client
        .get_connection_manager_with_config(config)
        .await
        .expect("Broker unreachable!")
}

#[derive(Clone)]
pub struct RedisAccounts {
    connection: ConnectionManager,
}

impl RedisAccounts {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    fn deployments_key(owner: &str) -> String {
        format!("deployments:{owner}")
    }

    fn rejections_key(owner: &str) -> String {
        format!("rejections:{owner}")
    }
}

#[async_trait]
impl AccountStore for RedisAccounts {
    async fn provisioning_exists(&self, owner: &str, request_id: &str) -> Result<bool> {
        let mut connection = self.connection.clone();
        let exists: bool = connection
            .hexists(Self::deployments_key(owner), request_id)
            .await?;
        Ok(exists)
    }

    async fn mark_provisioning(&self, owner: &str, request_id: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        let _created: bool = connection
            .hset_nx(Self::deployments_key(owner), request_id, "provisioning")
            .await?;
        Ok(())
    }

    async fn record_status(&self, owner: &str, request_id: &str, status: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        let _: () = connection
            .hset(Self::deployments_key(owner), request_id, status)
            .await?;
        Ok(())
    }

    async fn record_rejection(&self, owner: &str, request_id: &str, reason: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        let _: () = connection
            .hset(Self::rejections_key(owner), request_id, reason)
            .await?;
        Ok(())
    }

    async fn record_error(&self, context: &str, message: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        let _: i64 = connection
            .rpush("pipeline-errors", format!("{context}: {message}"))
            .await?;
        Ok(())
    }

    async fn quota_allows(&self, owner: &str, _kind: Kind) -> Result<bool> {
        let mut connection = self.connection.clone();
        let active: u64 = connection.hlen(Self::deployments_key(owner)).await?;
        Ok(active < MAX_ACTIVE_DEPLOYMENTS)
    }
}
