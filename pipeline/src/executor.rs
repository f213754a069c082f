//! # Deployment Executor
//!
//! The capability that performs external side effects, one call per
//! envelope. The consumer loop only sees the three-valued [`Outcome`], so
//! the pipeline stays testable without any provisioning SDK.
//!
//! Executors are the idempotency boundary: the key is `(owner, request_id)`
//! and re-execution must detect existing provisioning and return [`Outcome::Done`]
//! without a second side effect. Requests derive `request_id` from the
//! workload name, so resubmitting the same spec lands on the same key.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::accounts::AccountStore;
use crate::error::Result;
use crate::model::{
    ClusterDeployment, ClusterRequest, ClusterWorkload, Envelope, Kind, NetDeployment,
    NetWorkload, Payload, VmDeployment, VmRequest, VmWorkload,
};
use crate::producer::Producer;

/// Network assigned to cluster satellites until a real allocator exists.
const DEFAULT_NET_CIDR: &str = "10.0.0.0/24";

/// Terminal disposition of one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Side effect done (or already done); ack the entry.
    Done,
    /// Transient failure; leave the entry unacked for redelivery.
    Retry,
    /// Permanent failure, recorded against the owner; ack the entry.
    Fatal,
}

/// Result of one provisioning call against the external system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provision {
    Ok,
    Retry(String),
    Fatal(String),
}

/// Boundary to the provisioning SDK. Implementations must detect a
/// workload that already exists and answer [`Provision::Ok`] for it.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn create_vm(&self, owner: &str, workload: &VmWorkload) -> Provision;
    async fn create_cluster(&self, owner: &str, workload: &ClusterWorkload) -> Provision;
    async fn create_net(&self, owner: &str, net: &NetWorkload) -> Provision;
}

/// Provisioner that succeeds without doing anything. Stands in until a
/// real SDK is wired up, and keeps local runs self-contained.
#[derive(Debug, Default)]
pub struct NoopProvisioner;

#[async_trait]
impl Provisioner for NoopProvisioner {
    async fn create_vm(&self, owner: &str, workload: &VmWorkload) -> Provision {
        info!(owner, name = %workload.name, "noop vm provision");
        Provision::Ok
    }

    async fn create_cluster(&self, owner: &str, workload: &ClusterWorkload) -> Provision {
        info!(owner, name = %workload.master.name, workers = workload.workers.len(), "noop cluster provision");
        Provision::Ok
    }

    async fn create_net(&self, owner: &str, net: &NetWorkload) -> Provision {
        info!(owner, name = %net.name, "noop net provision");
        Provision::Ok
    }
}

/// Per-kind execution entry points, plus kind routing for the consumer.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn vm_request(&self, request: &VmRequest) -> Outcome;
    async fn cluster_request(&self, request: &ClusterRequest) -> Outcome;
    async fn vm_deployment(&self, deployment: &VmDeployment) -> Outcome;
    async fn cluster_deployment(&self, deployment: &ClusterDeployment) -> Outcome;
    async fn net_deployment(&self, deployment: &NetDeployment) -> Outcome;

    async fn dispatch(&self, envelope: &Envelope) -> Outcome {
        match &envelope.payload {
            Payload::VmRequest(r) => self.vm_request(r).await,
            Payload::ClusterRequest(r) => self.cluster_request(r).await,
            Payload::VmDeployment(d) => self.vm_deployment(d).await,
            Payload::ClusterDeployment(d) => self.cluster_deployment(d).await,
            Payload::NetDeployment(d) => self.net_deployment(d).await,
        }
    }
}

enum Screen {
    AlreadyProvisioned,
    QuotaDenied,
    Clear,
}

/// The production executor: validates requests into deployments and drives
/// deployments through the [`Provisioner`].
pub struct DeploymentExecutor {
    producer: Producer,
    accounts: Arc<dyn AccountStore>,
    provisioner: Arc<dyn Provisioner>,
}

impl DeploymentExecutor {
    pub fn new(
        producer: Producer,
        accounts: Arc<dyn AccountStore>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Self {
        Self {
            producer,
            accounts,
            provisioner,
        }
    }

    async fn screen(&self, owner: &str, request_id: &str, kind: Kind) -> Result<Screen> {
        if self.accounts.provisioning_exists(owner, request_id).await? {
            debug!(owner, request_id, "already provisioned, short-circuiting");
            return Ok(Screen::AlreadyProvisioned);
        }
        if !self.accounts.quota_allows(owner, kind).await? {
            return Ok(Screen::QuotaDenied);
        }
        Ok(Screen::Clear)
    }

    /// Stamps the provisioning record after the deployment envelope is on
    /// its stream. Failures here are retryable: a re-run may enqueue a
    /// duplicate envelope, which downstream idempotence absorbs. The mark
    /// never downgrades a status the deployment loop already wrote.
    async fn admit(&self, owner: &str, request_id: &str) -> Result<()> {
        self.accounts.mark_provisioning(owner, request_id).await
    }

    async fn reject(&self, owner: &str, request_id: &str, reason: &str) -> Outcome {
        warn!(owner, request_id, reason, "request rejected");
        if let Err(e) = self.accounts.record_rejection(owner, request_id, reason).await {
            warn!(owner, request_id, error = %e, "failed to record rejection");
            return Outcome::Retry;
        }
        Outcome::Fatal
    }
}

#[async_trait]
impl Executor for DeploymentExecutor {
    async fn vm_request(&self, request: &VmRequest) -> Outcome {
        let owner = request.owner.as_str();
        let request_id = request.spec.name.clone();

        match self.screen(owner, &request_id, Kind::VmDeployment).await {
            Ok(Screen::AlreadyProvisioned) => return Outcome::Done,
            Ok(Screen::QuotaDenied) => return self.reject(owner, &request_id, "vm quota exceeded").await,
            Ok(Screen::Clear) => {}
            Err(e) => {
                warn!(owner, request_id = %request_id, error = %e, "request screening failed");
                return Outcome::Retry;
            }
        }

        let deployment = VmDeployment {
            owner: request.owner.clone(),
            request_id: request_id.clone(),
            workload: VmWorkload {
                name: request.spec.name.clone(),
                size: request.spec.size.clone(),
                region: request.spec.region.clone(),
            },
        };
        if let Err(e) = self.producer.submit_vm_deployment(deployment).await {
            warn!(owner, request_id = %request_id, error = %e, "vm deployment enqueue failed");
            return Outcome::Retry;
        }
        match self.admit(owner, &request_id).await {
            Ok(()) => Outcome::Done,
            Err(e) => {
                warn!(owner, request_id = %request_id, error = %e, "failed to record admission");
                Outcome::Retry
            }
        }
    }

    async fn cluster_request(&self, request: &ClusterRequest) -> Outcome {
        let owner = request.owner.as_str();
        let request_id = request.spec.name.clone();

        match self.screen(owner, &request_id, Kind::ClusterDeployment).await {
            Ok(Screen::AlreadyProvisioned) => return Outcome::Done,
            Ok(Screen::QuotaDenied) => {
                return self.reject(owner, &request_id, "cluster quota exceeded").await
            }
            Ok(Screen::Clear) => {}
            Err(e) => {
                warn!(owner, request_id = %request_id, error = %e, "request screening failed");
                return Outcome::Retry;
            }
        }

        let workers = (0..request.spec.workers)
            .map(|i| VmWorkload {
                name: format!("{}-w{i}", request.spec.name),
                size: request.spec.worker_size.clone(),
                region: request.spec.region.clone(),
            })
            .collect();
        let deployment = ClusterDeployment {
            owner: request.owner.clone(),
            request_id: request_id.clone(),
            workload: ClusterWorkload {
                master: VmWorkload {
                    name: request.spec.name.clone(),
                    size: request.spec.master_size.clone(),
                    region: request.spec.region.clone(),
                },
                workers,
            },
        };
        if let Err(e) = self.producer.submit_cluster_deployment(deployment).await {
            warn!(owner, request_id = %request_id, error = %e, "cluster deployment enqueue failed");
            return Outcome::Retry;
        }
        match self.admit(owner, &request_id).await {
            Ok(()) => Outcome::Done,
            Err(e) => {
                warn!(owner, request_id = %request_id, error = %e, "failed to record admission");
                Outcome::Retry
            }
        }
    }

    async fn vm_deployment(&self, deployment: &VmDeployment) -> Outcome {
        let owner = deployment.owner.as_str();
        match self.provisioner.create_vm(owner, &deployment.workload).await {
            Provision::Ok => {
                match self
                    .accounts
                    .record_status(owner, &deployment.request_id, "running")
                    .await
                {
                    Ok(()) => Outcome::Done,
                    Err(e) => {
                        warn!(owner, request_id = %deployment.request_id, error = %e, "status update failed");
                        Outcome::Retry
                    }
                }
            }
            Provision::Retry(reason) => {
                warn!(owner, request_id = %deployment.request_id, reason = %reason, "vm provision deferred");
                Outcome::Retry
            }
            Provision::Fatal(reason) => self.reject(owner, &deployment.request_id, &reason).await,
        }
    }

    async fn cluster_deployment(&self, deployment: &ClusterDeployment) -> Outcome {
        let owner = deployment.owner.as_str();
        match self
            .provisioner
            .create_cluster(owner, &deployment.workload)
            .await
        {
            Provision::Ok => {}
            Provision::Retry(reason) => {
                warn!(owner, request_id = %deployment.request_id, reason = %reason, "cluster provision deferred");
                return Outcome::Retry;
            }
            Provision::Fatal(reason) => {
                return self.reject(owner, &deployment.request_id, &reason).await
            }
        }

        // Satellite network for the cluster, applied on its own stream.
        let net = NetDeployment {
            owner: deployment.owner.clone(),
            parent_id: deployment.request_id.clone(),
            net: NetWorkload {
                name: format!("{}-net", deployment.workload.master.name),
                cidr: DEFAULT_NET_CIDR.to_string(),
                region: deployment.workload.master.region.clone(),
            },
        };
        if let Err(e) = self.producer.submit_net_deployment(net).await {
            warn!(owner, request_id = %deployment.request_id, error = %e, "net enqueue failed");
            return Outcome::Retry;
        }

        match self
            .accounts
            .record_status(owner, &deployment.request_id, "running")
            .await
        {
            Ok(()) => Outcome::Done,
            Err(e) => {
                warn!(owner, request_id = %deployment.request_id, error = %e, "status update failed");
                Outcome::Retry
            }
        }
    }

    async fn net_deployment(&self, deployment: &NetDeployment) -> Outcome {
        let owner = deployment.owner.as_str();
        match self.provisioner.create_net(owner, &deployment.net).await {
            Provision::Ok => {
                match self
                    .accounts
                    .record_status(owner, &deployment.net.name, "ready")
                    .await
                {
                    Ok(()) => Outcome::Done,
                    Err(e) => {
                        warn!(owner, net = %deployment.net.name, error = %e, "status update failed");
                        Outcome::Retry
                    }
                }
            }
            Provision::Retry(reason) => {
                warn!(owner, net = %deployment.net.name, reason = %reason, "net provision deferred");
                Outcome::Retry
            }
            Provision::Fatal(reason) => self.reject(owner, &deployment.parent_id, &reason).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::MemoryAccounts;
    use crate::broker::memory::MemoryBroker;
    use crate::model::VmSpec;
    use crate::topics::Topic;
    use chrono::Utc;

    fn request(name: &str) -> VmRequest {
        VmRequest {
            owner: "u1".into(),
            spec: VmSpec {
                name: name.into(),
                size: "small".into(),
                region: "campus".into(),
            },
            submitted_at: Utc::now(),
        }
    }

    fn executor() -> (DeploymentExecutor, Arc<MemoryBroker>, Arc<MemoryAccounts>) {
        let broker = Arc::new(MemoryBroker::new());
        let accounts = Arc::new(MemoryAccounts::new());
        let executor = DeploymentExecutor::new(
            Producer::new(broker.clone()),
            accounts.clone(),
            Arc::new(NoopProvisioner),
        );
        (executor, broker, accounts)
    }

    #[tokio::test]
    async fn accepted_request_emits_a_deployment() {
        let (executor, broker, accounts) = executor();

        let outcome = executor.vm_request(&request("vm-a")).await;
        assert_eq!(outcome, Outcome::Done);
        assert_eq!(broker.stream_len(Topic::VmDeployments.stream()), 1);
        assert_eq!(accounts.status("u1", "vm-a").as_deref(), Some("provisioning"));
    }

    #[tokio::test]
    async fn duplicate_request_short_circuits() {
        let (executor, broker, _) = executor();

        executor.vm_request(&request("vm-a")).await;
        let outcome = executor.vm_request(&request("vm-a")).await;

        assert_eq!(outcome, Outcome::Done);
        assert_eq!(broker.stream_len(Topic::VmDeployments.stream()), 1);
    }

    #[tokio::test]
    async fn quota_denial_is_fatal_and_recorded() {
        let (executor, broker, accounts) = executor();
        accounts.deny_quota();

        let outcome = executor.vm_request(&request("vm-a")).await;
        assert_eq!(outcome, Outcome::Fatal);
        assert_eq!(broker.stream_len(Topic::VmDeployments.stream()), 0);
        assert_eq!(accounts.rejections().len(), 1);
    }

    #[tokio::test]
    async fn cluster_deployment_emits_its_network() {
        let (executor, broker, accounts) = executor();

        let deployment = ClusterDeployment {
            owner: "u1".into(),
            request_id: "k8s-a".into(),
            workload: ClusterWorkload {
                master: VmWorkload {
                    name: "k8s-a".into(),
                    size: "medium".into(),
                    region: "campus".into(),
                },
                workers: vec![],
            },
        };
        let outcome = executor.cluster_deployment(&deployment).await;

        assert_eq!(outcome, Outcome::Done);
        assert_eq!(broker.stream_len(Topic::NetDeployments.stream()), 1);
        assert_eq!(accounts.status("u1", "k8s-a").as_deref(), Some("running"));
    }

    struct FatalProvisioner;

    #[async_trait]
    impl Provisioner for FatalProvisioner {
        async fn create_vm(&self, _owner: &str, _workload: &VmWorkload) -> Provision {
            Provision::Fatal("invalid image".into())
        }
        async fn create_cluster(&self, _owner: &str, _workload: &ClusterWorkload) -> Provision {
            Provision::Fatal("invalid image".into())
        }
        async fn create_net(&self, _owner: &str, _net: &NetWorkload) -> Provision {
            Provision::Fatal("invalid range".into())
        }
    }

    #[tokio::test]
    async fn fatal_provisioning_records_the_rejection() {
        let broker = Arc::new(MemoryBroker::new());
        let accounts = Arc::new(MemoryAccounts::new());
        let executor = DeploymentExecutor::new(
            Producer::new(broker),
            accounts.clone(),
            Arc::new(FatalProvisioner),
        );

        let deployment = VmDeployment {
            owner: "u1".into(),
            request_id: "vm-a".into(),
            workload: VmWorkload {
                name: "vm-a".into(),
                size: "small".into(),
                region: "campus".into(),
            },
        };
        assert_eq!(executor.vm_deployment(&deployment).await, Outcome::Fatal);
        assert_eq!(accounts.rejections().len(), 1);
    }
}
