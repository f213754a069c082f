//! # Workloads
//!
//! Entities carried by the deployment streams.
//!
//! A *request* is raw user intent captured by an HTTP handler. An executor
//! turns an accepted request into a *deployment*: a prepared workload
//! descriptor that carries the originating `request_id` so re-execution can
//! be detected. Network deployments are satellites emitted while applying a
//! cluster; they point back at their parent through `parent_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User-supplied shape of a single virtual machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSpec {
    pub name: String,
    pub size: String,
    pub region: String,
}

/// User-supplied shape of a cluster: one master plus identical workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub name: String,
    pub master_size: String,
    pub worker_size: String,
    pub workers: u32,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRequest {
    pub owner: String,
    pub spec: VmSpec,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRequest {
    pub owner: String,
    pub spec: ClusterSpec,
    pub submitted_at: DateTime<Utc>,
}

/// A validated, ready-to-apply machine descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmWorkload {
    pub name: String,
    pub size: String,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmDeployment {
    pub owner: String,
    pub request_id: String,
    pub workload: VmWorkload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterWorkload {
    pub master: VmWorkload,
    pub workers: Vec<VmWorkload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDeployment {
    pub owner: String,
    pub request_id: String,
    pub workload: ClusterWorkload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetWorkload {
    pub name: String,
    pub cidr: String,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetDeployment {
    pub owner: String,
    pub parent_id: String,
    pub net: NetWorkload,
}

/// The closed set of envelope kinds, one per stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Kind {
    VmRequest,
    ClusterRequest,
    VmDeployment,
    ClusterDeployment,
    NetDeployment,
}

/// Envelope payload, tagged with its kind on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Payload {
    VmRequest(VmRequest),
    ClusterRequest(ClusterRequest),
    VmDeployment(VmDeployment),
    ClusterDeployment(ClusterDeployment),
    NetDeployment(NetDeployment),
}

impl Payload {
    pub fn kind(&self) -> Kind {
        match self {
            Payload::VmRequest(_) => Kind::VmRequest,
            Payload::ClusterRequest(_) => Kind::ClusterRequest,
            Payload::VmDeployment(_) => Kind::VmDeployment,
            Payload::ClusterDeployment(_) => Kind::ClusterDeployment,
            Payload::NetDeployment(_) => Kind::NetDeployment,
        }
    }

    pub fn owner(&self) -> &str {
        match self {
            Payload::VmRequest(r) => &r.owner,
            Payload::ClusterRequest(r) => &r.owner,
            Payload::VmDeployment(d) => &d.owner,
            Payload::ClusterDeployment(d) => &d.owner,
            Payload::NetDeployment(d) => &d.owner,
        }
    }

    /// Logical name of the workload, where one exists. Requests have none;
    /// their stream field key is a fresh id instead.
    pub fn workload_name(&self) -> Option<&str> {
        match self {
            Payload::VmRequest(_) | Payload::ClusterRequest(_) => None,
            Payload::VmDeployment(d) => Some(&d.workload.name),
            Payload::ClusterDeployment(d) => Some(&d.workload.master.name),
            Payload::NetDeployment(d) => Some(&d.net.name),
        }
    }
}

/// Wire-level wrapper appended to a stream.
///
/// `attempt` counts deliveries as the producer knew them; redeliveries by the
/// broker do not rewrite the stored envelope, so consumers treat it as a
/// lower bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub payload: Payload,
    pub produced_at: DateTime<Utc>,
    pub attempt: u32,
}

impl Envelope {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            produced_at: Utc::now(),
            attempt: 1,
        }
    }

    pub fn kind(&self) -> Kind {
        self.payload.kind()
    }
}
