//! # Stream Topology
//!
//! The fixed, closed set of streams the pipeline runs on, one consumer
//! group per stream. Nothing else in the process may invent stream names;
//! everything routes through [`Topic`].

use tracing::info;

use crate::broker::Broker;
use crate::error::Result;
use crate::model::Kind;

/// Start position for freshly created groups: new messages only.
const GROUP_START: &str = "$";

/// One stream / consumer-group pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    VmRequests,
    ClusterRequests,
    VmDeployments,
    ClusterDeployments,
    NetDeployments,
}

impl Topic {
    pub const ALL: [Topic; 5] = [
        Topic::VmRequests,
        Topic::ClusterRequests,
        Topic::VmDeployments,
        Topic::ClusterDeployments,
        Topic::NetDeployments,
    ];

    pub fn stream(self) -> &'static str {
        match self {
            Topic::VmRequests => "vms-req",
            Topic::ClusterRequests => "k8s-req",
            Topic::VmDeployments => "vms",
            Topic::ClusterDeployments => "k8s",
            Topic::NetDeployments => "nets",
        }
    }

    pub fn group(self) -> &'static str {
        match self {
            Topic::VmRequests => "vms-req-group",
            Topic::ClusterRequests => "k8s-req-group",
            Topic::VmDeployments => "vms-group",
            Topic::ClusterDeployments => "k8s-group",
            Topic::NetDeployments => "nets-group",
        }
    }

    pub fn for_kind(kind: Kind) -> Topic {
        match kind {
            Kind::VmRequest => Topic::VmRequests,
            Kind::ClusterRequest => Topic::ClusterRequests,
            Kind::VmDeployment => Topic::VmDeployments,
            Kind::ClusterDeployment => Topic::ClusterDeployments,
            Kind::NetDeployment => Topic::NetDeployments,
        }
    }
}

/// Creates every stream and group if absent. Pre-existing groups are left
/// untouched; any other failure aborts startup.
pub async fn ensure_all(broker: &dyn Broker) -> Result<()> {
    for topic in Topic::ALL {
        broker
            .ensure_group(topic.stream(), topic.group(), GROUP_START)
            .await?;
        info!(stream = topic.stream(), group = topic.group(), "group ready");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryBroker;

    #[test]
    fn stream_and_group_names_are_fixed() {
        let expected = [
            ("vms-req", "vms-req-group"),
            ("k8s-req", "k8s-req-group"),
            ("vms", "vms-group"),
            ("k8s", "k8s-group"),
            ("nets", "nets-group"),
        ];
        for (topic, (stream, group)) in Topic::ALL.into_iter().zip(expected) {
            assert_eq!(topic.stream(), stream);
            assert_eq!(topic.group(), group);
        }
    }

    #[test]
    fn every_kind_routes_to_its_stream() {
        assert_eq!(Topic::for_kind(Kind::VmRequest), Topic::VmRequests);
        assert_eq!(Topic::for_kind(Kind::ClusterRequest), Topic::ClusterRequests);
        assert_eq!(Topic::for_kind(Kind::VmDeployment), Topic::VmDeployments);
        assert_eq!(Topic::for_kind(Kind::ClusterDeployment), Topic::ClusterDeployments);
        assert_eq!(Topic::for_kind(Kind::NetDeployment), Topic::NetDeployments);
    }

    #[tokio::test]
    async fn ensure_all_is_idempotent() {
        let broker = MemoryBroker::new();
        ensure_all(&broker).await.unwrap();
        ensure_all(&broker).await.unwrap();
    }
}
