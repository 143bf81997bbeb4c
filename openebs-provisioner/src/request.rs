//! Volume create request construction.
//!
//! [`VolumeRequestBuilder`] turns a claim into a shape-independent
//! [`VolumeRequestSpec`]; [`RequestShape::render`] then produces the wire
//! request maya-apiserver expects for the configured API flavor. Both steps
//! are pure, so re-submitting after a crash yields an identical request that
//! the remote side can deduplicate by name.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::class;
use crate::objects::PersistentVolumeClaim;
use crate::types::RequestShape;

/// Claim labels copied onto the volume request when present.
pub mod labels {
    pub const APPLICATION: &str = "openebs.io/application";
    pub const REPLICA_TOPOLOGY_KEY_DOMAIN: &str = "openebs.io/replica-topology-key-domain";
    pub const REPLICA_TOPOLOGY_KEY_TYPE: &str = "openebs.io/replica-topology-key-type";

    pub const PASSTHROUGH: [&str; 3] = [
        APPLICATION,
        REPLICA_TOPOLOGY_KEY_DOMAIN,
        REPLICA_TOPOLOGY_KEY_TYPE,
    ];
}

/// Snapshot a new volume is cloned from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneSource {
    pub snapshot_id: String,
    pub source_volume: String,
}

/// Normalized volume create request.
///
/// `name` equals the persistent volume name and is the join key for every
/// later read and delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeRequestSpec {
    pub name: String,
    pub namespace: String,
    pub capacity: String,
    pub storage_class: Option<String>,
    pub claim_name: String,
    pub labels: BTreeMap<String, String>,
    pub clone_source: Option<CloneSource>,
}

impl VolumeRequestSpec {
    pub fn with_clone_source(mut self, clone_source: CloneSource) -> Self {
        self.clone_source = Some(clone_source);
        self
    }
}

pub struct VolumeRequestBuilder;

impl VolumeRequestBuilder {
    /// Build the request for `claim`, targeting the volume name `target_name`.
    pub fn build(claim: &PersistentVolumeClaim, target_name: &str) -> VolumeRequestSpec {
        let labels = labels::PASSTHROUGH
            .iter()
            .filter_map(|key| {
                claim
                    .labels
                    .get(*key)
                    .filter(|value| !value.is_empty())
                    .map(|value| (key.to_string(), value.clone()))
            })
            .collect();

        VolumeRequestSpec {
            name: target_name.to_string(),
            namespace: claim.namespace.clone(),
            capacity: claim.capacity().to_string(),
            storage_class: class::storage_class_name(claim).map(str::to_string),
            claim_name: claim.name.clone(),
            labels,
            clone_source: None,
        }
    }
}

// ============================================================================
// Wire shapes
// ============================================================================

/// Request body sent to maya-apiserver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum VolumeRequest {
    Legacy(LegacyVolumeSpec),
    Cas(CasVolume),
}

impl VolumeRequest {
    pub fn name(&self) -> &str {
        match self {
            VolumeRequest::Legacy(spec) => &spec.metadata.name,
            VolumeRequest::Cas(vol) => &vol.metadata.name,
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            VolumeRequest::Legacy(spec) => &spec.metadata.labels.namespace,
            VolumeRequest::Cas(vol) => &vol.metadata.namespace,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyVolumeSpec {
    pub kind: String,
    pub api_version: String,
    pub metadata: LegacyMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LegacyMetadata {
    pub name: String,
    pub labels: LegacyLabels,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LegacyLabels {
    #[serde(rename = "volumeprovisioner.mapi.openebs.io/storage-size")]
    pub storage: String,
    #[serde(rename = "k8s.io/storage-class", skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    #[serde(rename = "k8s.io/namespace")]
    pub namespace: String,
    #[serde(rename = "k8s.io/pvc")]
    pub persistent_volume_claim: String,
    /// Pass-through claim labels and clone markers
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

/// Legacy-shape labels marking a clone request.
pub const LEGACY_SOURCE_VOLUME_LABEL: &str = "openebs.io/source-volume";
pub const LEGACY_SNAPSHOT_LABEL: &str = "openebs.io/snapshot";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CasVolume {
    pub kind: String,
    pub api_version: String,
    pub metadata: CasMetadata,
    pub spec: CasVolumeSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CasMetadata {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CasVolumeSpec {
    pub capacity: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_clone: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_volume: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_name: Option<String>,
}

/// CAS volume label keys.
pub mod cas_keys {
    pub const STORAGE_CLASS: &str = "openebs.io/storage-class";
    pub const NAMESPACE: &str = "openebs.io/namespace";
    pub const PERSISTENT_VOLUME_CLAIM: &str = "openebs.io/persistentvolumeclaim";
}

impl RequestShape {
    /// Render `spec` into this shape's wire request.
    pub fn render(self, spec: &VolumeRequestSpec) -> VolumeRequest {
        match self {
            RequestShape::Legacy => {
                let mut extra = spec.labels.clone();
                if let Some(clone) = &spec.clone_source {
                    extra.insert(
                        LEGACY_SOURCE_VOLUME_LABEL.to_string(),
                        clone.source_volume.clone(),
                    );
                    extra.insert(LEGACY_SNAPSHOT_LABEL.to_string(), clone.snapshot_id.clone());
                }
                VolumeRequest::Legacy(LegacyVolumeSpec {
                    kind: "PersistentVolumeClaim".to_string(),
                    api_version: "v1".to_string(),
                    metadata: LegacyMetadata {
                        name: spec.name.clone(),
                        labels: LegacyLabels {
                            storage: spec.capacity.clone(),
                            storage_class: spec.storage_class.clone(),
                            namespace: spec.namespace.clone(),
                            persistent_volume_claim: spec.claim_name.clone(),
                            extra,
                        },
                    },
                })
            }
            RequestShape::CasTemplate => {
                let mut labels = spec.labels.clone();
                if let Some(class) = &spec.storage_class {
                    labels.insert(cas_keys::STORAGE_CLASS.to_string(), class.clone());
                }
                labels.insert(cas_keys::NAMESPACE.to_string(), spec.namespace.clone());
                labels.insert(
                    cas_keys::PERSISTENT_VOLUME_CLAIM.to_string(),
                    spec.claim_name.clone(),
                );
                VolumeRequest::Cas(CasVolume {
                    kind: "CASVolume".to_string(),
                    api_version: "v1alpha1".to_string(),
                    metadata: CasMetadata {
                        name: spec.name.clone(),
                        namespace: spec.namespace.clone(),
                        labels,
                    },
                    spec: CasVolumeSpec {
                        capacity: spec.capacity.clone(),
                        is_clone: spec.clone_source.is_some(),
                        source_volume: spec.clone_source.as_ref().map(|c| c.source_volume.clone()),
                        snapshot_name: spec.clone_source.as_ref().map(|c| c.snapshot_id.clone()),
                    },
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim() -> PersistentVolumeClaim {
        let mut claim = PersistentVolumeClaim {
            name: "data-mysql-0".to_string(),
            namespace: "db".to_string(),
            storage_class_name: Some("openebs-standard".to_string()),
            storage_request: Some("10Gi".to_string()),
            ..Default::default()
        };
        claim
            .labels
            .insert(labels::APPLICATION.to_string(), "mysql".to_string());
        claim
            .labels
            .insert("app.kubernetes.io/name".to_string(), "ignored".to_string());
        claim
    }

    #[test]
    fn test_build_copies_claim_fields() {
        let spec = VolumeRequestBuilder::build(&claim(), "pvc-1234");
        assert_eq!(spec.name, "pvc-1234");
        assert_eq!(spec.namespace, "db");
        assert_eq!(spec.capacity, "10Gi");
        assert_eq!(spec.storage_class.as_deref(), Some("openebs-standard"));
        assert_eq!(spec.claim_name, "data-mysql-0");
        assert!(spec.clone_source.is_none());
    }

    #[test]
    fn test_build_passes_through_only_known_labels() {
        let spec = VolumeRequestBuilder::build(&claim(), "pvc-1234");
        assert_eq!(spec.labels.len(), 1);
        assert_eq!(
            spec.labels.get(labels::APPLICATION).map(String::as_str),
            Some("mysql")
        );
        assert!(!spec.labels.contains_key(labels::REPLICA_TOPOLOGY_KEY_TYPE));
    }

    #[test]
    fn test_build_is_deterministic() {
        let a = VolumeRequestBuilder::build(&claim(), "pvc-1234");
        let b = VolumeRequestBuilder::build(&claim(), "pvc-1234");
        assert_eq!(a, b);

        let wire_a = serde_json::to_vec(&RequestShape::Legacy.render(&a)).unwrap();
        let wire_b = serde_json::to_vec(&RequestShape::Legacy.render(&b)).unwrap();
        assert_eq!(wire_a, wire_b);
    }

    #[test]
    fn test_legacy_shape_wire_format() {
        let spec = VolumeRequestBuilder::build(&claim(), "pvc-1234");
        let json = serde_json::to_value(RequestShape::Legacy.render(&spec)).unwrap();

        assert_eq!(json["kind"], "PersistentVolumeClaim");
        assert_eq!(json["apiVersion"], "v1");
        assert_eq!(json["metadata"]["name"], "pvc-1234");
        let labels = &json["metadata"]["labels"];
        assert_eq!(labels["volumeprovisioner.mapi.openebs.io/storage-size"], "10Gi");
        assert_eq!(labels["k8s.io/storage-class"], "openebs-standard");
        assert_eq!(labels["k8s.io/namespace"], "db");
        assert_eq!(labels["k8s.io/pvc"], "data-mysql-0");
        assert_eq!(labels["openebs.io/application"], "mysql");
    }

    #[test]
    fn test_legacy_shape_omits_missing_class() {
        let mut claim = claim();
        claim.storage_class_name = None;
        let spec = VolumeRequestBuilder::build(&claim, "pvc-1234");
        let json = serde_json::to_value(RequestShape::Legacy.render(&spec)).unwrap();
        assert!(json["metadata"]["labels"].get("k8s.io/storage-class").is_none());
    }

    #[test]
    fn test_cas_shape_wire_format() {
        let spec = VolumeRequestBuilder::build(&claim(), "pvc-1234");
        let request = RequestShape::CasTemplate.render(&spec);
        assert_eq!(request.name(), "pvc-1234");
        assert_eq!(request.namespace(), "db");

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["kind"], "CASVolume");
        assert_eq!(json["metadata"]["namespace"], "db");
        assert_eq!(json["metadata"]["labels"][cas_keys::STORAGE_CLASS], "openebs-standard");
        assert_eq!(json["metadata"]["labels"][cas_keys::PERSISTENT_VOLUME_CLAIM], "data-mysql-0");
        assert_eq!(json["spec"]["capacity"], "10Gi");
        assert!(json["spec"].get("isClone").is_none());
    }

    #[test]
    fn test_clone_source_rendering() {
        let spec = VolumeRequestBuilder::build(&claim(), "pvc-restored").with_clone_source(
            CloneSource {
                snapshot_id: "pvc-1234_snap1".to_string(),
                source_volume: "pvc-1234".to_string(),
            },
        );

        let cas = serde_json::to_value(RequestShape::CasTemplate.render(&spec)).unwrap();
        assert_eq!(cas["spec"]["isClone"], true);
        assert_eq!(cas["spec"]["sourceVolume"], "pvc-1234");
        assert_eq!(cas["spec"]["snapshotName"], "pvc-1234_snap1");

        let legacy = serde_json::to_value(RequestShape::Legacy.render(&spec)).unwrap();
        assert_eq!(legacy["metadata"]["labels"][LEGACY_SOURCE_VOLUME_LABEL], "pvc-1234");
        assert_eq!(legacy["metadata"]["labels"][LEGACY_SNAPSHOT_LABEL], "pvc-1234_snap1");
    }
}
