//! # Producer API
//!
//! The submit interface HTTP handlers and executors enqueue through.
//!
//! Submission succeeds as soon as the broker acknowledges the append;
//! nothing waits for execution. Authorisation happened upstream, so the
//! producer validates nothing beyond what construction already enforced.

use std::sync::Arc;

use tracing::debug;

use crate::broker::Broker;
use crate::codec;
use crate::error::Result;
use crate::model::{
    ClusterDeployment, ClusterRequest, Envelope, NetDeployment, Payload, VmDeployment, VmRequest,
};
use crate::topics::Topic;

#[derive(Clone)]
pub struct Producer {
    broker: Arc<dyn Broker>,
}

impl Producer {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    pub async fn submit_vm_request(&self, request: VmRequest) -> Result<String> {
        self.submit(Payload::VmRequest(request)).await
    }

    pub async fn submit_cluster_request(&self, request: ClusterRequest) -> Result<String> {
        self.submit(Payload::ClusterRequest(request)).await
    }

    pub async fn submit_vm_deployment(&self, deployment: VmDeployment) -> Result<String> {
        self.submit(Payload::VmDeployment(deployment)).await
    }

    pub async fn submit_cluster_deployment(&self, deployment: ClusterDeployment) -> Result<String> {
        self.submit(Payload::ClusterDeployment(deployment)).await
    }

    pub async fn submit_net_deployment(&self, deployment: NetDeployment) -> Result<String> {
        self.submit(Payload::NetDeployment(deployment)).await
    }

    async fn submit(&self, payload: Payload) -> Result<String> {
        let envelope = Envelope::new(payload);
        let topic = Topic::for_kind(envelope.kind());
        let field = codec::encode(&envelope)?;
        let id = self.broker.append(topic.stream(), &[field]).await?;
        debug!(stream = topic.stream(), id = %id, owner = envelope.payload.owner(), "enqueued");
        Ok(id)
    }
}
