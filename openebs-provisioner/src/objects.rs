//! Orchestration-platform objects consumed and produced by the provisioner.
//!
//! Only the fields the provisioning protocol reads or writes are modeled.

use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::{AccessMode, ConditionType, FsType, ReclaimPolicy};

/// A request for a unit of storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistentVolumeClaim {
    pub name: String,
    pub namespace: String,
    pub annotations: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    /// `spec.storageClassName`
    pub storage_class_name: Option<String>,
    pub access_modes: Vec<AccessMode>,
    /// `spec.resources.requests.storage`, kept as the quantity string
    pub storage_request: Option<String>,
}

impl PersistentVolumeClaim {
    /// Requested capacity, `"0"` when the claim has no storage request.
    pub fn capacity(&self) -> &str {
        self.storage_request.as_deref().unwrap_or("0")
    }
}

/// Everything the claim controller hands over for one provisioning attempt.
#[derive(Debug, Clone, Default)]
pub struct VolumeOptions {
    pub claim: PersistentVolumeClaim,
    /// Name chosen by the controller for the new volume
    pub pv_name: String,
    pub reclaim_policy: ReclaimPolicy,
    /// StorageClass parameters
    pub parameters: HashMap<String, String>,
}

/// iSCSI attach coordinates placed on a persistent volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IscsiSource {
    pub target_portal: String,
    pub iqn: String,
    pub lun: i32,
    pub fs_type: String,
    pub read_only: bool,
}

impl IscsiSource {
    pub fn new(target_portal: String, iqn: String, fs_type: &FsType) -> Self {
        Self {
            target_portal,
            iqn,
            lun: 0,
            fs_type: fs_type.to_string(),
            read_only: false,
        }
    }
}

/// The persisted record of a provisioned volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentVolume {
    pub name: String,
    pub annotations: BTreeMap<String, String>,
    pub reclaim_policy: ReclaimPolicy,
    pub access_modes: Vec<AccessMode>,
    pub capacity: String,
    /// Namespace of the claim this volume is bound to
    pub claim_namespace: String,
    pub iscsi: Option<IscsiSource>,
}

/// Reference from a snapshot object to the backing OpenEBS snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDataSource {
    pub snapshot_id: String,
}

/// One status condition on a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotCondition {
    pub condition_type: ConditionType,
    pub status: bool,
    pub message: String,
    /// Unix seconds
    pub last_transition_time: i64,
}

impl SnapshotCondition {
    pub fn now(condition_type: ConditionType, message: impl Into<String>) -> Self {
        Self {
            condition_type,
            status: true,
            message: message.into(),
            last_transition_time: unix_timestamp_now(),
        }
    }
}

/// Recorded state of a snapshot as kept by the snapshot controller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotData {
    pub snapshot_id: String,
    /// Parent volume name
    pub volume_name: String,
    /// Parent namespace
    pub namespace: String,
    /// Conditions in the order they were recorded
    pub conditions: Vec<SnapshotCondition>,
}

/// Get current Unix timestamp in seconds
pub fn unix_timestamp_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_capacity_defaults_to_zero() {
        let mut claim = PersistentVolumeClaim::default();
        assert_eq!(claim.capacity(), "0");
        claim.storage_request = Some("10Gi".to_string());
        assert_eq!(claim.capacity(), "10Gi");
    }

    #[test]
    fn test_iscsi_source_defaults() {
        let src = IscsiSource::new(
            "10.0.0.5:3260".to_string(),
            "iqn.2016-09.com.openebs.jiva:pvc-1".to_string(),
            &"xfs".parse().unwrap(),
        );
        assert_eq!(src.lun, 0);
        assert!(!src.read_only);
        assert_eq!(src.fs_type, "xfs");
    }

    #[test]
    fn test_condition_now_is_true_and_stamped() {
        let cond = SnapshotCondition::now(ConditionType::Ready, "done");
        assert!(cond.status);
        assert!(cond.last_transition_time > 0);
        assert_eq!(cond.condition_type, ConditionType::Ready);
    }
}
