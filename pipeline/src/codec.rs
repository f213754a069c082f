//! # Envelope Codec
//!
//! Turns envelopes into the broker's field-map shape and back.
//!
//! Every entry carries exactly one field the codec owns: the key is a stable
//! textual identifier (the workload name for deployments, a fresh ulid for
//! requests, which have no natural name), the value is the JSON payload.
//! Decoding reads the first field and ignores trailing ones so entries can
//! grow annotations without breaking older consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::model::{Envelope, Payload};

/// Current wire format version. Bump when the payload shape changes.
pub const VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Wire {
    version: u32,
    produced_at: DateTime<Utc>,
    attempt: u32,
    #[serde(flatten)]
    payload: Payload,
}

/// Serialises an envelope into its single field pair.
pub fn encode(envelope: &Envelope) -> Result<(String, Vec<u8>)> {
    let key = match envelope.payload.workload_name() {
        Some(name) => name.to_string(),
        // Requests used to mirror the payload bytes into the key, which
        // collides for identical submissions. A fresh id per entry keeps the
        // key unique without touching value semantics.
        None => Ulid::new().to_string(),
    };

    let wire = Wire {
        version: VERSION,
        produced_at: envelope.produced_at,
        attempt: envelope.attempt,
        payload: envelope.payload.clone(),
    };
    let value = serde_json::to_vec(&wire)
        .map_err(|e| Error::decode(format!("serialise envelope: {e}")))?;

    Ok((key, value))
}

/// Deserialises an envelope from a stream entry's fields.
///
/// Fails with [`Error::Decode`] when the entry is empty or the payload does
/// not parse; the consumer acks and drops such entries since retrying
/// cannot help.
pub fn decode(fields: &[(String, Vec<u8>)]) -> Result<Envelope> {
    let (_, value) = fields
        .first()
        .ok_or_else(|| Error::decode("entry has no fields"))?;

    let wire: Wire = serde_json::from_slice(value)
        .map_err(|e| Error::decode(format!("parse envelope payload: {e}")))?;

    if wire.version == 0 || wire.version > VERSION {
        return Err(Error::decode(format!(
            "unsupported envelope version {}",
            wire.version
        )));
    }

    Ok(Envelope {
        payload: wire.payload,
        produced_at: wire.produced_at,
        attempt: wire.attempt,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;

    fn vm_request() -> Payload {
        Payload::VmRequest(VmRequest {
            owner: "u1".into(),
            spec: VmSpec {
                name: "vm-a".into(),
                size: "small".into(),
                region: "campus".into(),
            },
            submitted_at: Utc::now(),
        })
    }

    fn cluster_deployment() -> Payload {
        Payload::ClusterDeployment(ClusterDeployment {
            owner: "u1".into(),
            request_id: "k8s-a".into(),
            workload: ClusterWorkload {
                master: VmWorkload {
                    name: "k8s-a".into(),
                    size: "medium".into(),
                    region: "campus".into(),
                },
                workers: vec![VmWorkload {
                    name: "k8s-a-w0".into(),
                    size: "small".into(),
                    region: "campus".into(),
                }],
            },
        })
    }

    fn net_deployment() -> Payload {
        Payload::NetDeployment(NetDeployment {
            owner: "u1".into(),
            parent_id: "k8s-a".into(),
            net: NetWorkload {
                name: "k8s-a-net".into(),
                cidr: "10.0.0.0/24".into(),
                region: "campus".into(),
            },
        })
    }

    #[test]
    fn round_trips_every_payload_kind() {
        let payloads = vec![
            vm_request(),
            Payload::ClusterRequest(ClusterRequest {
                owner: "u2".into(),
                spec: ClusterSpec {
                    name: "k8s-b".into(),
                    master_size: "large".into(),
                    worker_size: "small".into(),
                    workers: 3,
                    region: "campus".into(),
                },
                submitted_at: Utc::now(),
            }),
            Payload::VmDeployment(VmDeployment {
                owner: "u1".into(),
                request_id: "vm-a".into(),
                workload: VmWorkload {
                    name: "vm-a".into(),
                    size: "small".into(),
                    region: "campus".into(),
                },
            }),
            cluster_deployment(),
            net_deployment(),
        ];

        for payload in payloads {
            let envelope = Envelope::new(payload);
            let (key, value) = encode(&envelope).unwrap();
            let decoded = decode(&[(key, value)]).unwrap();
            assert_eq!(decoded, envelope);
        }
    }

    #[test]
    fn deployment_keys_are_workload_names() {
        let envelope = Envelope::new(cluster_deployment());
        let (key, _) = encode(&envelope).unwrap();
        assert_eq!(key, "k8s-a");

        let envelope = Envelope::new(net_deployment());
        let (key, _) = encode(&envelope).unwrap();
        assert_eq!(key, "k8s-a-net");
    }

    #[test]
    fn request_keys_are_unique_per_entry() {
        let envelope = Envelope::new(vm_request());
        let (first, _) = encode(&envelope).unwrap();
        let (second, _) = encode(&envelope).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn trailing_fields_are_ignored() {
        let envelope = Envelope::new(vm_request());
        let (key, value) = encode(&envelope).unwrap();
        let fields = vec![(key, value), ("trace".into(), b"abc123".to_vec())];
        assert_eq!(decode(&fields).unwrap(), envelope);
    }

    #[test]
    fn unknown_json_keys_are_tolerated() {
        let envelope = Envelope::new(vm_request());
        let (key, value) = encode(&envelope).unwrap();
        let mut doc: serde_json::Value = serde_json::from_slice(&value).unwrap();
        doc["shard"] = serde_json::json!(7);
        let patched = serde_json::to_vec(&doc).unwrap();
        assert_eq!(decode(&[(key, patched)]).unwrap(), envelope);
    }

    #[test]
    fn malformed_bytes_fail_to_decode() {
        let fields = vec![("junk".to_string(), b"not json at all".to_vec())];
        assert!(matches!(decode(&fields), Err(Error::Decode { .. })));
    }

    #[test]
    fn empty_entries_fail_to_decode() {
        assert!(matches!(decode(&[]), Err(Error::Decode { .. })));
    }

    #[test]
    fn future_versions_are_rejected() {
        let envelope = Envelope::new(vm_request());
        let (key, value) = encode(&envelope).unwrap();
        let mut doc: serde_json::Value = serde_json::from_slice(&value).unwrap();
        doc["version"] = serde_json::json!(VERSION + 1);
        let patched = serde_json::to_vec(&doc).unwrap();
        assert!(matches!(decode(&[(key, patched)]), Err(Error::Decode { .. })));
    }
}
