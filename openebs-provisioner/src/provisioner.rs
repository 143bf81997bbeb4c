//! Volume provisioning and deletion.
//!
//! A provision attempt moves `Requested -> Created -> Bound` or ends in
//! `Failed`. Nothing is persisted here; maya-apiserver holds the volume and
//! the claim controller holds the persistent volume we return.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::class::ClassParameterResolver;
use crate::config::ProvisionerConfig;
use crate::error::{ProvisionerError, Result};
use crate::maya_client::{IscsiCoordinates, VolumeLifecycleClient};
use crate::metrics;
use crate::objects::{IscsiSource, PersistentVolume, VolumeOptions};
use crate::ownership::OwnershipAnnotationCodec;
use crate::request::{VolumeRequest, VolumeRequestBuilder};
use crate::types::{AccessMode, access_modes_contained_in};

/// Access modes of every volume this provisioner creates.
pub const SUPPORTED_ACCESS_MODES: [AccessMode; 1] = [AccessMode::ReadWriteOnce];

pub struct Provisioner {
    client: Arc<dyn VolumeLifecycleClient>,
    config: Arc<ProvisionerConfig>,
    resolver: ClassParameterResolver,
    ownership: OwnershipAnnotationCodec,
}

impl Provisioner {
    pub fn new(client: Arc<dyn VolumeLifecycleClient>, config: Arc<ProvisionerConfig>) -> Self {
        Self {
            resolver: ClassParameterResolver::new(Arc::clone(&config.fs_types)),
            ownership: OwnershipAnnotationCodec::new(config.identity.clone()),
            client,
            config,
        }
    }

    pub fn identity(&self) -> &str {
        self.ownership.identity()
    }

    /// Create the remote volume for a claim and return the persistent volume
    /// that records it.
    ///
    /// The class is validated before any remote call. The access-mode check
    /// runs after the remote volume exists; a rejection at that point leaves
    /// the remote volume in place.
    pub async fn provision(&self, options: &VolumeOptions) -> Result<PersistentVolume> {
        let claim = &options.claim;
        info!(
            pv = %options.pv_name,
            claim = %claim.name,
            namespace = %claim.namespace,
            "Provision request"
        );

        let fs_type = self.resolver.resolve_fs_type(&options.parameters)?;

        let spec = VolumeRequestBuilder::build(claim, &options.pv_name);
        if spec.storage_class.is_none() {
            warn!(claim = %claim.name, "Volume has no storage class specified");
        }
        let request = self.config.request_shape.render(&spec);

        let coordinates = create_and_read(self.client.as_ref(), &request).await?;

        if !access_modes_contained_in(self.access_modes(), &claim.access_modes) {
            warn!(
                pv = %options.pv_name,
                "Claim rejected after remote volume creation; remote volume left in place"
            );
            metrics::record_orphaned_volume();
            return Err(invalid_access_modes(&claim.access_modes));
        }

        let mut annotations = BTreeMap::new();
        self.ownership.stamp(&mut annotations);
        self.config
            .dashboard
            .annotate(&options.pv_name, &mut annotations);

        info!(pv = %options.pv_name, fs_type = %fs_type, "Volume provisioned");

        Ok(PersistentVolume {
            name: options.pv_name.clone(),
            annotations,
            reclaim_policy: options.reclaim_policy,
            access_modes: claim.access_modes.clone(),
            capacity: claim.capacity().to_string(),
            claim_namespace: claim.namespace.clone(),
            iscsi: Some(IscsiSource::new(
                coordinates.target_portal,
                coordinates.iqn,
                &fs_type,
            )),
        })
    }

    /// Delete the remote volume behind `volume`, but only if this instance
    /// created it.
    pub async fn delete(&self, volume: &PersistentVolume) -> Result<()> {
        info!(pv = %volume.name, "Delete request");

        if let Err(e) = self.ownership.verify(&volume.annotations) {
            if e.is_ignorable() {
                info!(pv = %volume.name, error = %e, "Skipping volume owned by another provisioner");
                metrics::record_ignored_delete();
            }
            return Err(e);
        }

        if volume.claim_namespace.is_empty() {
            return Err(ProvisionerError::Config(format!(
                "PV {} has no claim namespace",
                volume.name
            )));
        }

        self.client
            .delete_volume(&volume.name, &volume.claim_namespace)
            .await
            .map_err(|e| {
                error!(pv = %volume.name, error = %e, "Failed to delete volume");
                ProvisionerError::upstream("delete volume", e)
            })?;

        info!(pv = %volume.name, "Volume deleted");
        Ok(())
    }

    /// Not configurable.
    pub fn access_modes(&self) -> &'static [AccessMode] {
        &SUPPORTED_ACCESS_MODES
    }
}

/// Create a volume and read back its iSCSI coordinates.
///
/// The create call returns before the target exists, so the coordinates only
/// come from the follow-up read. Missing coordinates are passed through empty.
pub(crate) async fn create_and_read(
    client: &dyn VolumeLifecycleClient,
    request: &VolumeRequest,
) -> Result<IscsiCoordinates> {
    client.create_volume(request).await.map_err(|e| {
        error!(name = request.name(), error = %e, "Error creating volume");
        ProvisionerError::upstream("create volume", e)
    })?;

    let descriptor = client
        .list_volume(request.name(), request.namespace())
        .await
        .map_err(|e| {
            error!(name = request.name(), error = %e, "Error getting volume details");
            ProvisionerError::upstream("read volume", e)
        })?;

    let coordinates = descriptor.iscsi_coordinates();
    debug!(
        iqn = %coordinates.iqn,
        target_portal = %coordinates.target_portal,
        "Volume coordinates"
    );
    if !coordinates.is_attachable() {
        warn!(name = request.name(), "Volume has no iSCSI coordinates yet");
    }
    Ok(coordinates)
}

pub(crate) fn invalid_access_modes(requested: &[AccessMode]) -> ProvisionerError {
    let join = |modes: &[AccessMode]| {
        modes
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    ProvisionerError::Validation(format!(
        "Invalid access modes: [{}], supported access modes: [{}]",
        join(requested),
        join(&SUPPORTED_ACCESS_MODES)
    ))
}
