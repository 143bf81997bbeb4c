//! Snapshot lifecycle against maya-apiserver.
//!
//! A snapshot is `Requested` until created, then `Ready` or `Error`;
//! `Pending` only appears when reported back through a recorded condition.
//! Snapshot records are never updated here: describe re-derives status from
//! what the snapshot controller recorded.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::class::ClassParameterResolver;
use crate::config::ProvisionerConfig;
use crate::error::{ProvisionerError, Result};
use crate::maya_client::VolumeLifecycleClient;
use crate::metrics;
use crate::objects::{
    IscsiSource, PersistentVolume, PersistentVolumeClaim, SnapshotCondition, SnapshotData,
    SnapshotDataSource,
};
use crate::provisioner::{SUPPORTED_ACCESS_MODES, create_and_read, invalid_access_modes};
use crate::request::{CloneSource, VolumeRequestBuilder};
use crate::types::{ConditionType, access_modes_contained_in};

/// Tag carrying the name of the snapshot object the snapshot is created for.
pub const SNAPSHOT_NAME_TAG: &str = "kubernetes.io/created-for/snapshot/name";

/// Deterministic snapshot id: same volume and snapshot name, same id.
pub fn snapshot_id(volume_name: &str, snapshot_name: &str) -> String {
    format!("{}_{}", volume_name, snapshot_name)
}

/// Result of [`SnapshotLifecycleManager::snapshot_create`].
///
/// A failed create still reports an `Error` condition; check `result` before
/// trusting `conditions`.
#[derive(Debug)]
pub struct SnapshotCreation {
    pub conditions: Vec<SnapshotCondition>,
    pub result: Result<SnapshotDataSource>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDescription {
    pub conditions: Vec<SnapshotCondition>,
    pub is_complete: bool,
}

/// Volume created from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredVolume {
    pub source: IscsiSource,
    pub labels: BTreeMap<String, String>,
}

pub struct SnapshotLifecycleManager {
    client: Arc<dyn VolumeLifecycleClient>,
    config: Arc<ProvisionerConfig>,
    resolver: ClassParameterResolver,
}

impl SnapshotLifecycleManager {
    pub fn new(client: Arc<dyn VolumeLifecycleClient>, config: Arc<ProvisionerConfig>) -> Self {
        Self {
            resolver: ClassParameterResolver::new(Arc::clone(&config.fs_types)),
            client,
            config,
        }
    }

    pub async fn snapshot_create(
        &self,
        volume: &PersistentVolume,
        tags: &HashMap<String, String>,
    ) -> SnapshotCreation {
        let failed = |e: ProvisionerError| SnapshotCreation {
            conditions: Vec::new(),
            result: Err(e),
        };

        if volume.iscsi.is_none() {
            return failed(ProvisionerError::Validation(format!(
                "invalid PV spec: {} has no iSCSI source",
                volume.name
            )));
        }
        let Some(snapshot_name) = tags.get(SNAPSHOT_NAME_TAG).filter(|s| !s.is_empty()) else {
            return failed(ProvisionerError::Validation(format!(
                "missing tag {}",
                SNAPSHOT_NAME_TAG
            )));
        };

        let snapshot_id = snapshot_id(&volume.name, snapshot_name);
        info!(pv = %volume.name, snapshot_id = %snapshot_id, "CreateSnapshot request");

        match self
            .client
            .create_snapshot(&volume.name, &snapshot_id, &volume.claim_namespace)
            .await
        {
            Ok(response) => {
                info!(snapshot_id = %snapshot_id, "Snapshot created");
                debug!(response = %response, "Snapshot create response");
                SnapshotCreation {
                    conditions: vec![SnapshotCondition::now(
                        ConditionType::Ready,
                        "Snapshot created successfully",
                    )],
                    result: Ok(SnapshotDataSource { snapshot_id }),
                }
            }
            Err(e) => {
                error!(pv = %volume.name, error = %e, "Failed to create snapshot");
                let condition = SnapshotCondition::now(
                    ConditionType::Error,
                    format!("Failed to create the snapshot: {}", e),
                );
                SnapshotCreation {
                    conditions: vec![condition],
                    result: Err(ProvisionerError::upstream("create snapshot", e)),
                }
            }
        }
    }

    /// Delete a snapshot. Unlike volume delete there is no ownership check.
    pub async fn snapshot_delete(
        &self,
        source: &SnapshotDataSource,
        volume: &PersistentVolume,
    ) -> Result<()> {
        if source.snapshot_id.is_empty() {
            return Err(ProvisionerError::Validation(
                "invalid snapshot data source: empty snapshot id".to_string(),
            ));
        }
        info!(pv = %volume.name, snapshot_id = %source.snapshot_id, "DeleteSnapshot request");

        let response = self
            .client
            .delete_snapshot(&volume.name, &source.snapshot_id, &volume.claim_namespace)
            .await
            .map_err(|e| {
                error!(snapshot_id = %source.snapshot_id, error = %e, "Failed to delete snapshot");
                ProvisionerError::upstream("delete snapshot", e)
            })?;

        info!(snapshot_id = %source.snapshot_id, response = %response, "Snapshot deleted");
        Ok(())
    }

    /// Translate the last recorded condition into the caller's vocabulary.
    ///
    /// Only the most recent condition counts. The result is always complete;
    /// whether the snapshot is usable is read from the condition type.
    pub async fn describe_snapshot(&self, snapshot: &SnapshotData) -> Result<SnapshotDescription> {
        if snapshot.snapshot_id.is_empty() {
            return Err(ProvisionerError::Config(
                "failed to retrieve snapshot spec: empty snapshot id".to_string(),
            ));
        }
        let Some(last) = snapshot.conditions.last() else {
            return Err(ProvisionerError::Config(format!(
                "no status conditions recorded for snapshot {}",
                snapshot.snapshot_id
            )));
        };
        debug!(snapshot_id = %snapshot.snapshot_id, "DescribeSnapshot request");

        // Informational only; the recorded conditions are authoritative.
        match self
            .client
            .snapshot_info(&snapshot.volume_name, &snapshot.snapshot_id)
            .await
        {
            Ok(info) => debug!(snapshot_id = %snapshot.snapshot_id, info = %info, "Snapshot details"),
            Err(e) => warn!(snapshot_id = %snapshot.snapshot_id, error = %e, "Failed to describe snapshot"),
        }

        let condition_type = match last.condition_type {
            ConditionType::Ready => ConditionType::Ready,
            ConditionType::Pending => ConditionType::Pending,
            _ => ConditionType::Error,
        };

        Ok(SnapshotDescription {
            conditions: vec![SnapshotCondition {
                condition_type,
                status: last.status,
                message: last.message.clone(),
                last_transition_time: last.last_transition_time,
            }],
            is_complete: true,
        })
    }

    /// Lookup by tag is not supported by maya-apiserver.
    pub fn find_snapshot(
        &self,
        tags: &HashMap<String, String>,
    ) -> Result<(SnapshotDataSource, Vec<SnapshotCondition>)> {
        info!(tags = ?tags, "FindSnapshot request");
        Err(ProvisionerError::NotFound("Snapshot not found".to_string()))
    }

    /// Create a new volume as a clone of `snapshot`, following the same steps
    /// as provisioning a claim.
    pub async fn snapshot_restore(
        &self,
        snapshot: &SnapshotData,
        claim: &PersistentVolumeClaim,
        pv_name: &str,
        parameters: &HashMap<String, String>,
    ) -> Result<RestoredVolume> {
        if snapshot.snapshot_id.is_empty() || snapshot.volume_name.is_empty() {
            return Err(ProvisionerError::Validation(
                "invalid snapshot spec: snapshot id and source volume are required".to_string(),
            ));
        }
        if pv_name.is_empty() {
            return Err(ProvisionerError::Validation(
                "invalid PVC spec: target volume name is required".to_string(),
            ));
        }
        info!(
            snapshot_id = %snapshot.snapshot_id,
            pv = %pv_name,
            claim = %claim.name,
            "RestoreSnapshot request"
        );

        let fs_type = self.resolver.resolve_fs_type(parameters)?;

        let spec = VolumeRequestBuilder::build(claim, pv_name).with_clone_source(CloneSource {
            snapshot_id: snapshot.snapshot_id.clone(),
            source_volume: snapshot.volume_name.clone(),
        });
        if spec.storage_class.is_none() {
            warn!(claim = %claim.name, "Volume has no storage class specified");
        }
        let request = self.config.request_shape.render(&spec);

        let coordinates = create_and_read(self.client.as_ref(), &request)
            .await
            .inspect_err(|e| {
                error!(snapshot_id = %snapshot.snapshot_id, error = %e, "Snapshot restore failed");
            })?;

        if !access_modes_contained_in(&SUPPORTED_ACCESS_MODES, &claim.access_modes) {
            warn!(pv = %pv_name, "Claim rejected after clone creation; remote volume left in place");
            metrics::record_orphaned_volume();
            return Err(invalid_access_modes(&claim.access_modes));
        }

        info!(snapshot_id = %snapshot.snapshot_id, pv = %pv_name, "Snapshot restored");
        Ok(RestoredVolume {
            source: IscsiSource::new(coordinates.target_portal, coordinates.iqn, &fs_type),
            labels: BTreeMap::new(),
        })
    }

    /// Delete a volume created by [`Self::snapshot_restore`].
    pub async fn volume_delete(&self, volume: &PersistentVolume) -> Result<()> {
        if volume.iscsi.is_none() {
            return Err(ProvisionerError::Validation(format!(
                "invalid PV spec: {} has no iSCSI source",
                volume.name
            )));
        }
        info!(pv = %volume.name, "DeleteVolume request");

        self.client
            .delete_volume(&volume.name, &volume.claim_namespace)
            .await
            .map_err(|e| {
                error!(pv = %volume.name, error = %e, "Error while deleting volume");
                ProvisionerError::upstream("delete volume", e)
            })
    }
}
