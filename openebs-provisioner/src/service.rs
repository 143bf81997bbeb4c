//! gRPC services exposed to the claim and snapshot controllers.
//!
//! Translates between proto messages and the provisioning types, and maps
//! [`ProvisionerError`] onto gRPC status codes.

use std::collections::BTreeMap;
use std::sync::Arc;

use prost_types::Timestamp;
use tonic::metadata::MetadataValue;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

use crate::error::ProvisionerError;
use crate::metrics::OperationTimer;
use crate::objects::{
    IscsiSource, PersistentVolume, PersistentVolumeClaim, SnapshotCondition, SnapshotData,
    SnapshotDataSource, VolumeOptions,
};
use crate::proto;
use crate::provisioner::Provisioner;
use crate::snapshot::SnapshotLifecycleManager;
use crate::types::{AccessMode, ConditionType, ReclaimPolicy};

/// Metadata key set to `"true"` on errors the caller should not retry.
pub const IGNORED_METADATA_KEY: &str = "x-openebs-ignored";

/// Map a provisioning error onto a gRPC status.
pub fn to_status(err: ProvisionerError) -> Status {
    let message = err.to_string();
    match err {
        ProvisionerError::Validation(_) => Status::invalid_argument(message),
        ProvisionerError::Config(_) => Status::failed_precondition(message),
        ProvisionerError::Upstream { .. } => Status::unavailable(message),
        ProvisionerError::NotFound(_) => Status::not_found(message),
        ProvisionerError::OwnershipMismatch { .. } => {
            let mut status = Status::permission_denied(message);
            status
                .metadata_mut()
                .insert(IGNORED_METADATA_KEY, MetadataValue::from_static("true"));
            status
        }
    }
}

/// Record the failure and convert it.
fn fail(timer: OperationTimer, err: ProvisionerError) -> Status {
    timer.failure(err.kind());
    to_status(err)
}

// ============================================================================
// Conversions
// ============================================================================

fn parse_access_modes(modes: &[String]) -> Result<Vec<AccessMode>, Status> {
    modes
        .iter()
        .map(|m| {
            m.parse::<AccessMode>()
                .map_err(|e| Status::invalid_argument(e.to_string()))
        })
        .collect()
}

fn access_mode_names(modes: &[AccessMode]) -> Vec<String> {
    modes.iter().map(|m| m.as_str().to_string()).collect()
}

fn parse_reclaim_policy(policy: &str) -> Result<ReclaimPolicy, Status> {
    policy
        .parse::<ReclaimPolicy>()
        .map_err(|e| Status::invalid_argument(e.to_string()))
}

impl TryFrom<proto::PersistentVolumeClaim> for PersistentVolumeClaim {
    type Error = Status;

    fn try_from(claim: proto::PersistentVolumeClaim) -> Result<Self, Self::Error> {
        Ok(Self {
            access_modes: parse_access_modes(&claim.access_modes)?,
            name: claim.name,
            namespace: claim.namespace,
            annotations: claim.annotations.into_iter().collect(),
            labels: claim.labels.into_iter().collect(),
            storage_class_name: claim.storage_class_name,
            storage_request: Some(claim.storage_request).filter(|s| !s.is_empty()),
        })
    }
}

impl TryFrom<proto::VolumeOptions> for VolumeOptions {
    type Error = Status;

    fn try_from(options: proto::VolumeOptions) -> Result<Self, Self::Error> {
        if options.pv_name.is_empty() {
            return Err(Status::invalid_argument("PV name is required"));
        }
        let claim = options
            .claim
            .ok_or_else(|| Status::invalid_argument("Claim is required"))?;

        Ok(Self {
            claim: claim.try_into()?,
            pv_name: options.pv_name,
            reclaim_policy: parse_reclaim_policy(&options.reclaim_policy)?,
            parameters: options.parameters,
        })
    }
}

impl From<proto::IscsiSource> for IscsiSource {
    fn from(src: proto::IscsiSource) -> Self {
        Self {
            target_portal: src.target_portal,
            iqn: src.iqn,
            lun: src.lun,
            fs_type: src.fs_type,
            read_only: src.read_only,
        }
    }
}

impl From<IscsiSource> for proto::IscsiSource {
    fn from(src: IscsiSource) -> Self {
        Self {
            target_portal: src.target_portal,
            iqn: src.iqn,
            lun: src.lun,
            fs_type: src.fs_type,
            read_only: src.read_only,
        }
    }
}

impl TryFrom<proto::PersistentVolume> for PersistentVolume {
    type Error = Status;

    fn try_from(pv: proto::PersistentVolume) -> Result<Self, Self::Error> {
        if pv.name.is_empty() {
            return Err(Status::invalid_argument("PV name is required"));
        }

        Ok(Self {
            reclaim_policy: parse_reclaim_policy(&pv.reclaim_policy)?,
            access_modes: parse_access_modes(&pv.access_modes)?,
            name: pv.name,
            annotations: pv.annotations.into_iter().collect::<BTreeMap<_, _>>(),
            capacity: pv.capacity,
            claim_namespace: pv.claim_namespace,
            iscsi: pv.iscsi.map(Into::into),
        })
    }
}

impl From<PersistentVolume> for proto::PersistentVolume {
    fn from(pv: PersistentVolume) -> Self {
        Self {
            name: pv.name,
            annotations: pv.annotations.into_iter().collect(),
            reclaim_policy: pv.reclaim_policy.to_string(),
            access_modes: access_mode_names(&pv.access_modes),
            capacity: pv.capacity,
            claim_namespace: pv.claim_namespace,
            iscsi: pv.iscsi.map(Into::into),
        }
    }
}

fn require_volume(volume: Option<proto::PersistentVolume>) -> Result<PersistentVolume, Status> {
    volume
        .ok_or_else(|| Status::invalid_argument("Volume is required"))?
        .try_into()
}

/// Unknown and unspecified condition types collapse to `Error`.
impl From<proto::SnapshotCondition> for SnapshotCondition {
    fn from(cond: proto::SnapshotCondition) -> Self {
        let condition_type = match proto::ConditionType::try_from(cond.r#type) {
            Ok(proto::ConditionType::Ready) => ConditionType::Ready,
            Ok(proto::ConditionType::Pending) => ConditionType::Pending,
            _ => ConditionType::Error,
        };
        Self {
            condition_type,
            status: cond.status,
            message: cond.message,
            last_transition_time: cond.last_transition_time.map(|t| t.seconds).unwrap_or(0),
        }
    }
}

impl From<SnapshotCondition> for proto::SnapshotCondition {
    fn from(cond: SnapshotCondition) -> Self {
        let condition_type = match cond.condition_type {
            ConditionType::Ready => proto::ConditionType::Ready,
            ConditionType::Pending => proto::ConditionType::Pending,
            ConditionType::Error => proto::ConditionType::Error,
        };
        Self {
            r#type: condition_type as i32,
            status: cond.status,
            message: cond.message,
            last_transition_time: Some(Timestamp {
                seconds: cond.last_transition_time,
                nanos: 0,
            }),
        }
    }
}

fn conditions_to_proto(conditions: Vec<SnapshotCondition>) -> Vec<proto::SnapshotCondition> {
    conditions.into_iter().map(Into::into).collect()
}

impl From<proto::SnapshotData> for SnapshotData {
    fn from(data: proto::SnapshotData) -> Self {
        Self {
            snapshot_id: data.snapshot_id,
            volume_name: data.volume_name,
            namespace: data.namespace,
            conditions: data.conditions.into_iter().map(Into::into).collect(),
        }
    }
}

fn require_snapshot(snapshot: Option<proto::SnapshotData>) -> Result<SnapshotData, Status> {
    snapshot
        .map(Into::into)
        .ok_or_else(|| Status::invalid_argument("Snapshot is required"))
}

// ============================================================================
// Provisioner service
// ============================================================================

pub struct ProvisionerService {
    provisioner: Arc<Provisioner>,
}

impl ProvisionerService {
    pub fn new(provisioner: Arc<Provisioner>) -> Self {
        Self { provisioner }
    }
}

#[tonic::async_trait]
impl proto::provisioner_server::Provisioner for ProvisionerService {
    async fn provision(
        &self,
        request: Request<proto::ProvisionRequest>,
    ) -> Result<Response<proto::ProvisionResponse>, Status> {
        let timer = OperationTimer::new("provision");
        let options = match request.into_inner().options {
            Some(options) => options,
            None => {
                timer.failure("invalid_argument");
                return Err(Status::invalid_argument("Volume options are required"));
            }
        };
        let options: VolumeOptions = match options.try_into() {
            Ok(options) => options,
            Err(status) => {
                timer.failure("invalid_argument");
                return Err(status);
            }
        };

        match self.provisioner.provision(&options).await {
            Ok(pv) => {
                timer.success();
                Ok(Response::new(proto::ProvisionResponse {
                    volume: Some(pv.into()),
                }))
            }
            Err(e) => Err(fail(timer, e)),
        }
    }

    async fn delete(
        &self,
        request: Request<proto::DeleteRequest>,
    ) -> Result<Response<proto::DeleteResponse>, Status> {
        let timer = OperationTimer::new("delete");
        let volume = match require_volume(request.into_inner().volume) {
            Ok(volume) => volume,
            Err(status) => {
                timer.failure("invalid_argument");
                return Err(status);
            }
        };

        match self.provisioner.delete(&volume).await {
            Ok(()) => {
                timer.success();
                Ok(Response::new(proto::DeleteResponse {}))
            }
            Err(e) => Err(fail(timer, e)),
        }
    }

    async fn get_access_modes(
        &self,
        _request: Request<proto::GetAccessModesRequest>,
    ) -> Result<Response<proto::GetAccessModesResponse>, Status> {
        Ok(Response::new(proto::GetAccessModesResponse {
            access_modes: access_mode_names(self.provisioner.access_modes()),
        }))
    }
}

// ============================================================================
// Snapshot service
// ============================================================================

pub struct SnapshotService {
    manager: Arc<SnapshotLifecycleManager>,
}

impl SnapshotService {
    pub fn new(manager: Arc<SnapshotLifecycleManager>) -> Self {
        Self { manager }
    }
}

#[tonic::async_trait]
impl proto::snapshot_plugin_server::SnapshotPlugin for SnapshotService {
    /// Upstream failures are reported in the response alongside the `Error`
    /// condition; input errors fail the call.
    async fn create_snapshot(
        &self,
        request: Request<proto::CreateSnapshotRequest>,
    ) -> Result<Response<proto::CreateSnapshotResponse>, Status> {
        let timer = OperationTimer::new("create_snapshot");
        let req = request.into_inner();
        let volume = match require_volume(req.volume) {
            Ok(volume) => volume,
            Err(status) => {
                timer.failure("invalid_argument");
                return Err(status);
            }
        };

        let created = self.manager.snapshot_create(&volume, &req.tags).await;
        let conditions = conditions_to_proto(created.conditions);
        match created.result {
            Ok(SnapshotDataSource { snapshot_id }) => {
                timer.success();
                Ok(Response::new(proto::CreateSnapshotResponse {
                    snapshot_id,
                    conditions,
                    error: String::new(),
                }))
            }
            Err(e) if !conditions.is_empty() => {
                warn!(pv = %volume.name, error = %e, "Snapshot create reported as failed condition");
                timer.failure(e.kind());
                Ok(Response::new(proto::CreateSnapshotResponse {
                    snapshot_id: String::new(),
                    conditions,
                    error: e.to_string(),
                }))
            }
            Err(e) => Err(fail(timer, e)),
        }
    }

    async fn delete_snapshot(
        &self,
        request: Request<proto::DeleteSnapshotRequest>,
    ) -> Result<Response<proto::DeleteSnapshotResponse>, Status> {
        let timer = OperationTimer::new("delete_snapshot");
        let req = request.into_inner();
        let volume = match require_volume(req.volume) {
            Ok(volume) => volume,
            Err(status) => {
                timer.failure("invalid_argument");
                return Err(status);
            }
        };
        let source = SnapshotDataSource {
            snapshot_id: req.snapshot_id,
        };

        match self.manager.snapshot_delete(&source, &volume).await {
            Ok(()) => {
                timer.success();
                Ok(Response::new(proto::DeleteSnapshotResponse {}))
            }
            Err(e) => Err(fail(timer, e)),
        }
    }

    async fn describe_snapshot(
        &self,
        request: Request<proto::DescribeSnapshotRequest>,
    ) -> Result<Response<proto::DescribeSnapshotResponse>, Status> {
        let timer = OperationTimer::new("describe_snapshot");
        let snapshot = match require_snapshot(request.into_inner().snapshot) {
            Ok(snapshot) => snapshot,
            Err(status) => {
                timer.failure("invalid_argument");
                return Err(status);
            }
        };

        match self.manager.describe_snapshot(&snapshot).await {
            Ok(description) => {
                timer.success();
                Ok(Response::new(proto::DescribeSnapshotResponse {
                    conditions: conditions_to_proto(description.conditions),
                    is_complete: description.is_complete,
                }))
            }
            Err(e) => Err(fail(timer, e)),
        }
    }

    async fn find_snapshot(
        &self,
        request: Request<proto::FindSnapshotRequest>,
    ) -> Result<Response<proto::FindSnapshotResponse>, Status> {
        let req = request.into_inner();
        let (source, conditions) = self.manager.find_snapshot(&req.tags).map_err(to_status)?;
        Ok(Response::new(proto::FindSnapshotResponse {
            snapshot_id: source.snapshot_id,
            conditions: conditions_to_proto(conditions),
        }))
    }

    async fn restore_snapshot(
        &self,
        request: Request<proto::RestoreSnapshotRequest>,
    ) -> Result<Response<proto::RestoreSnapshotResponse>, Status> {
        let timer = OperationTimer::new("restore_snapshot");
        let req = request.into_inner();
        let inputs = require_snapshot(req.snapshot).and_then(|snapshot| {
            let claim: PersistentVolumeClaim = req
                .claim
                .ok_or_else(|| Status::invalid_argument("Claim is required"))?
                .try_into()?;
            Ok((snapshot, claim))
        });
        let (snapshot, claim) = match inputs {
            Ok(inputs) => inputs,
            Err(status) => {
                timer.failure("invalid_argument");
                return Err(status);
            }
        };

        match self
            .manager
            .snapshot_restore(&snapshot, &claim, &req.pv_name, &req.parameters)
            .await
        {
            Ok(restored) => {
                debug!(pv = %req.pv_name, "Restore complete");
                timer.success();
                Ok(Response::new(proto::RestoreSnapshotResponse {
                    source: Some(restored.source.into()),
                    labels: restored.labels.into_iter().collect(),
                }))
            }
            Err(e) => Err(fail(timer, e)),
        }
    }

    async fn delete_volume(
        &self,
        request: Request<proto::DeleteVolumeRequest>,
    ) -> Result<Response<proto::DeleteVolumeResponse>, Status> {
        let timer = OperationTimer::new("delete_restored_volume");
        let volume = match require_volume(request.into_inner().volume) {
            Ok(volume) => volume,
            Err(status) => {
                timer.failure("invalid_argument");
                return Err(status);
            }
        };

        match self.manager.volume_delete(&volume).await {
            Ok(()) => {
                timer.success();
                Ok(Response::new(proto::DeleteVolumeResponse {}))
            }
            Err(e) => Err(fail(timer, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProvisionerConfig;
    use crate::proto::provisioner_server::Provisioner as _;
    use crate::proto::snapshot_plugin_server::SnapshotPlugin as _;
    use crate::testing::FakeClient;
    use std::collections::HashMap;
    use tonic::Code;

    fn services(identity: &str, client: Arc<FakeClient>) -> (ProvisionerService, SnapshotService) {
        let config = Arc::new(ProvisionerConfig::new(identity));
        (
            ProvisionerService::new(Arc::new(Provisioner::new(client.clone(), config.clone()))),
            SnapshotService::new(Arc::new(SnapshotLifecycleManager::new(client, config))),
        )
    }

    fn proto_options() -> proto::VolumeOptions {
        proto::VolumeOptions {
            claim: Some(proto::PersistentVolumeClaim {
                name: "data-0".to_string(),
                namespace: "db".to_string(),
                storage_class_name: Some("openebs-standard".to_string()),
                access_modes: vec!["ReadWriteOnce".to_string()],
                storage_request: "10Gi".to_string(),
                ..Default::default()
            }),
            pv_name: "pvc-1".to_string(),
            reclaim_policy: "Retain".to_string(),
            parameters: HashMap::from([("openebs.io/fstype".to_string(), "xfs".to_string())]),
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            to_status(ProvisionerError::Validation("x".into())).code(),
            Code::InvalidArgument
        );
        assert_eq!(
            to_status(ProvisionerError::Config("x".into())).code(),
            Code::FailedPrecondition
        );
        assert_eq!(
            to_status(ProvisionerError::NotFound("x".into())).code(),
            Code::NotFound
        );

        let status = to_status(ProvisionerError::OwnershipMismatch {
            owner: "node-b".into(),
            identity: "node-a".into(),
        });
        assert_eq!(status.code(), Code::PermissionDenied);
        assert_eq!(
            status.metadata().get(IGNORED_METADATA_KEY).unwrap(),
            "true"
        );
        assert!(
            to_status(ProvisionerError::Config("x".into()))
                .metadata()
                .get(IGNORED_METADATA_KEY)
                .is_none()
        );
    }

    #[test]
    fn test_condition_conversion() {
        let unknown = proto::SnapshotCondition {
            r#type: 42,
            status: true,
            message: "?".to_string(),
            last_transition_time: None,
        };
        let cond: SnapshotCondition = unknown.into();
        assert_eq!(cond.condition_type, ConditionType::Error);
        assert_eq!(cond.last_transition_time, 0);

        let back: proto::SnapshotCondition = SnapshotCondition {
            condition_type: ConditionType::Pending,
            status: true,
            message: "copying".to_string(),
            last_transition_time: 1_700_000_000,
        }
        .into();
        assert_eq!(back.r#type, proto::ConditionType::Pending as i32);
        assert_eq!(back.last_transition_time.unwrap().seconds, 1_700_000_000);
    }

    #[test]
    fn test_claim_conversion_rejects_unknown_access_mode() {
        let claim = proto::PersistentVolumeClaim {
            access_modes: vec!["ReadWriteSometimes".to_string()],
            ..Default::default()
        };
        let err = PersistentVolumeClaim::try_from(claim).unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_provision_over_grpc() {
        let client = Arc::new(FakeClient::new());
        let (provisioner, _) = services("node-a", client);

        let response = provisioner
            .provision(Request::new(proto::ProvisionRequest {
                options: Some(proto_options()),
            }))
            .await
            .unwrap()
            .into_inner();

        let pv = response.volume.unwrap();
        assert_eq!(pv.capacity, "10Gi");
        assert_eq!(pv.reclaim_policy, "Retain");
        assert_eq!(pv.access_modes, vec!["ReadWriteOnce"]);
        assert_eq!(pv.iscsi.unwrap().fs_type, "xfs");
    }

    #[tokio::test]
    async fn test_provision_requires_options() {
        let client = Arc::new(FakeClient::new());
        let (provisioner, _) = services("node-a", client.clone());

        let status = provisioner
            .provision(Request::new(proto::ProvisionRequest { options: None }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_delete_over_grpc_is_marked_ignored() {
        let client = Arc::new(FakeClient::new());
        let (owner, _) = services("node-b", client.clone());
        let pv = owner
            .provision(Request::new(proto::ProvisionRequest {
                options: Some(proto_options()),
            }))
            .await
            .unwrap()
            .into_inner()
            .volume;

        let (other, _) = services("node-a", client.clone());
        let status = other
            .delete(Request::new(proto::DeleteRequest { volume: pv }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::PermissionDenied);
        assert!(status.metadata().get(IGNORED_METADATA_KEY).is_some());
        assert!(!client.calls().iter().any(|c| c.starts_with("delete_volume")));
    }

    #[tokio::test]
    async fn test_get_access_modes() {
        let (provisioner, _) = services("node-a", Arc::new(FakeClient::new()));
        let modes = provisioner
            .get_access_modes(Request::new(proto::GetAccessModesRequest {}))
            .await
            .unwrap()
            .into_inner()
            .access_modes;
        assert_eq!(modes, vec!["ReadWriteOnce"]);
    }

    #[tokio::test]
    async fn test_create_snapshot_failure_is_reported_in_response() {
        let client = Arc::new(FakeClient::new().failing("create_snapshot"));
        let (provisioner, snapshots) = services("node-a", client);
        let pv = provisioner
            .provision(Request::new(proto::ProvisionRequest {
                options: Some(proto_options()),
            }))
            .await
            .unwrap()
            .into_inner()
            .volume;

        let response = snapshots
            .create_snapshot(Request::new(proto::CreateSnapshotRequest {
                volume: pv,
                tags: HashMap::from([(
                    crate::snapshot::SNAPSHOT_NAME_TAG.to_string(),
                    "nightly".to_string(),
                )]),
            }))
            .await
            .unwrap()
            .into_inner();

        assert!(!response.error.is_empty());
        assert!(response.snapshot_id.is_empty());
        assert_eq!(response.conditions.len(), 1);
        assert_eq!(response.conditions[0].r#type, proto::ConditionType::Error as i32);
    }

    #[tokio::test]
    async fn test_describe_snapshot_over_grpc() {
        let (_, snapshots) = services("node-a", Arc::new(FakeClient::new()));
        let condition = |t: proto::ConditionType| proto::SnapshotCondition {
            r#type: t as i32,
            status: true,
            message: String::new(),
            last_transition_time: Some(Timestamp {
                seconds: 1_700_000_000,
                nanos: 0,
            }),
        };

        let response = snapshots
            .describe_snapshot(Request::new(proto::DescribeSnapshotRequest {
                snapshot: Some(proto::SnapshotData {
                    snapshot_id: "pvc-1_nightly".to_string(),
                    volume_name: "pvc-1".to_string(),
                    namespace: "db".to_string(),
                    conditions: vec![
                        condition(proto::ConditionType::Pending),
                        condition(proto::ConditionType::Ready),
                    ],
                }),
            }))
            .await
            .unwrap()
            .into_inner();

        assert!(response.is_complete);
        assert_eq!(response.conditions.len(), 1);
        assert_eq!(response.conditions[0].r#type, proto::ConditionType::Ready as i32);
    }

    #[tokio::test]
    async fn test_find_snapshot_not_found() {
        let (_, snapshots) = services("node-a", Arc::new(FakeClient::new()));
        let status = snapshots
            .find_snapshot(Request::new(proto::FindSnapshotRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
    }
}
