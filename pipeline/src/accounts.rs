//! # Account Store Capability
//!
//! The one seam between the pipeline and user persistence. Executors record
//! deployment outcomes here; the HTTP layer reads them back out-of-band.
//! Signup, verification and the rest of account management live elsewhere
//! and never touch the pipeline.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::Kind;

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// True when a provisioning record for `(owner, request_id)` exists.
    /// This is the executor idempotency check.
    async fn provisioning_exists(&self, owner: &str, request_id: &str) -> Result<bool>;

    /// Creates the provisioning record for `(owner, request_id)` when it
    /// is absent. Never overwrites a status already recorded.
    async fn mark_provisioning(&self, owner: &str, request_id: &str) -> Result<()>;

    /// Updates the status of a deployment visible to its owner.
    async fn record_status(&self, owner: &str, request_id: &str, status: &str) -> Result<()>;

    /// Records a terminal rejection against the owner.
    async fn record_rejection(&self, owner: &str, request_id: &str, reason: &str) -> Result<()>;

    /// Records an operator-visible error not tied to a single deployment,
    /// such as an undecodable stream entry.
    async fn record_error(&self, context: &str, message: &str) -> Result<()>;

    /// Whether the owner may start another workload of this kind.
    async fn quota_allows(&self, owner: &str, kind: Kind) -> Result<bool>;
}

#[derive(Debug, Default)]
struct MemoryAccountsState {
    /// (owner, request_id) -> status.
    deployments: HashMap<(String, String), String>,
    rejections: Vec<(String, String, String)>,
    errors: Vec<(String, String)>,
    quota_denied: bool,
}

/// In-memory account store for tests.
#[derive(Debug, Default)]
pub struct MemoryAccounts {
    state: Mutex<MemoryAccountsState>,
}

impl MemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent quota check fail.
    pub fn deny_quota(&self) {
        self.state.lock().unwrap().quota_denied = true;
    }

    pub fn status(&self, owner: &str, request_id: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .deployments
            .get(&(owner.to_string(), request_id.to_string()))
            .cloned()
    }

    pub fn rejections(&self) -> Vec<(String, String, String)> {
        self.state.lock().unwrap().rejections.clone()
    }

    pub fn errors(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().errors.clone()
    }
}

#[async_trait]
impl AccountStore for MemoryAccounts {
    async fn provisioning_exists(&self, owner: &str, request_id: &str) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state
            .deployments
            .contains_key(&(owner.to_string(), request_id.to_string())))
    }

    async fn mark_provisioning(&self, owner: &str, request_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .deployments
            .entry((owner.to_string(), request_id.to_string()))
            .or_insert_with(|| "provisioning".to_string());
        Ok(())
    }

    async fn record_status(&self, owner: &str, request_id: &str, status: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .deployments
            .insert((owner.to_string(), request_id.to_string()), status.to_string());
        Ok(())
    }

    async fn record_rejection(&self, owner: &str, request_id: &str, reason: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.rejections.push((
            owner.to_string(),
            request_id.to_string(),
            reason.to_string(),
        ));
        Ok(())
    }

    async fn record_error(&self, context: &str, message: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.errors.push((context.to_string(), message.to_string()));
        Ok(())
    }

    async fn quota_allows(&self, _owner: &str, _kind: Kind) -> Result<bool> {
        Ok(!self.state.lock().unwrap().quota_denied)
    }
}
