//! maya-apiserver client.
//!
//! [`VolumeLifecycleClient`] is the seam between the orchestration logic and
//! the remote volume manager. [`MayaApiClient`] implements it over HTTP/JSON.
//! Calls are issued once; retry and backoff belong to the controller driving
//! the provisioner.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::request::VolumeRequest;
use crate::types::RequestShape;

/// Descriptor annotation carrying the iSCSI qualified name.
pub const IQN_ANNOTATION: &str = "vsm.openebs.io/iqn";
/// Descriptor annotation carrying the iSCSI target portal (`host:port`).
pub const TARGET_PORTAL_ANNOTATION: &str = "vsm.openebs.io/targetportals";

/// Header used by maya-apiserver to scope volume operations.
const NAMESPACE_HEADER: &str = "namespace";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("request to maya-apiserver failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("maya-apiserver returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode maya-apiserver response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid maya-apiserver address '{0}'")]
    InvalidEndpoint(String),
}

/// Remote volume manager operations used by the provisioner and the
/// snapshot manager. Volumes are addressed by name and namespace.
#[async_trait]
pub trait VolumeLifecycleClient: Send + Sync {
    /// Create a volume; returns the remote volume name.
    async fn create_volume(&self, request: &VolumeRequest) -> Result<String, ClientError>;

    /// Fetch the descriptor of a volume, including its iSCSI coordinates.
    async fn list_volume(&self, name: &str, namespace: &str)
    -> Result<VolumeDescriptor, ClientError>;

    async fn delete_volume(&self, name: &str, namespace: &str) -> Result<(), ClientError>;

    /// Returns the raw server response.
    async fn create_snapshot(
        &self,
        volume_name: &str,
        snapshot_name: &str,
        namespace: &str,
    ) -> Result<String, ClientError>;

    /// Returns the raw server response.
    async fn delete_snapshot(
        &self,
        volume_name: &str,
        snapshot_name: &str,
        namespace: &str,
    ) -> Result<String, ClientError>;

    /// Returns the raw server response.
    async fn snapshot_info(&self, volume_name: &str, snapshot_id: &str)
    -> Result<String, ClientError>;
}

// ============================================================================
// VolumeDescriptor
// ============================================================================

/// A volume as reported by maya-apiserver.
///
/// The annotation bag is kept untyped; values are only read through
/// [`VolumeDescriptor::iscsi_coordinates`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "WireVolume")]
pub struct VolumeDescriptor {
    pub name: String,
    pub namespace: String,
    pub annotations: Value,
}

#[derive(Deserialize)]
struct WireVolume {
    #[serde(default)]
    metadata: WireMetadata,
}

#[derive(Deserialize, Default)]
struct WireMetadata {
    #[serde(default)]
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    annotations: Value,
}

impl From<WireVolume> for VolumeDescriptor {
    fn from(wire: WireVolume) -> Self {
        Self {
            name: wire.metadata.name,
            namespace: wire.metadata.namespace,
            annotations: wire.metadata.annotations,
        }
    }
}

/// iSCSI attach coordinates of a volume. Empty strings mean "not reported".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IscsiCoordinates {
    pub iqn: String,
    pub target_portal: String,
}

impl IscsiCoordinates {
    /// A volume can only be attached once both coordinates are known.
    pub fn is_attachable(&self) -> bool {
        !self.iqn.is_empty() && !self.target_portal.is_empty()
    }
}

impl VolumeDescriptor {
    /// Extract IQN and target portal from the annotation bag.
    ///
    /// Missing keys, non-string values and a non-object bag all yield empty
    /// strings rather than an error.
    pub fn iscsi_coordinates(&self) -> IscsiCoordinates {
        let read = |key: &str| {
            self.annotations
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        IscsiCoordinates {
            iqn: read(IQN_ANNOTATION),
            target_portal: read(TARGET_PORTAL_ANNOTATION),
        }
    }
}

// ============================================================================
// MayaApiClient
// ============================================================================

/// HTTP client for maya-apiserver.
#[derive(Debug, Clone)]
pub struct MayaApiClient {
    base_url: String,
    shape: RequestShape,
    http: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotCreateRequest<'a> {
    kind: &'static str,
    api_version: &'static str,
    metadata: SnapshotMetadata<'a>,
    spec: SnapshotSpec<'a>,
}

#[derive(Serialize)]
struct SnapshotMetadata<'a> {
    name: &'a str,
    namespace: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotSpec<'a> {
    volume_name: &'a str,
}

impl MayaApiClient {
    /// Create a client for the maya-apiserver at `base_url`
    /// (e.g. `http://10.0.0.10:5656`).
    ///
    /// Connection settings:
    /// - 10 second connect timeout
    /// - 30 second request timeout
    /// - TCP keepalive every 60 seconds
    pub fn new(base_url: &str, shape: RequestShape) -> Result<Self, ClientError> {
        let base_url = base_url.trim().trim_end_matches('/');
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ClientError::InvalidEndpoint(base_url.to_string()));
        }

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .tcp_nodelay(true)
            .build()?;

        Ok(Self {
            base_url: base_url.to_string(),
            shape,
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn create_volume_url(&self) -> String {
        format!("{}/latest/volumes/", self.base_url)
    }

    fn list_volume_url(&self, name: &str) -> String {
        match self.shape {
            RequestShape::Legacy => format!("{}/latest/volumes/info/{}", self.base_url, name),
            RequestShape::CasTemplate => format!("{}/latest/volumes/{}", self.base_url, name),
        }
    }

    fn delete_volume_url(&self, name: &str) -> String {
        match self.shape {
            RequestShape::Legacy => format!("{}/latest/volumes/delete/{}", self.base_url, name),
            RequestShape::CasTemplate => format!("{}/latest/volumes/{}", self.base_url, name),
        }
    }

    fn create_snapshot_url(&self) -> String {
        format!("{}/latest/snapshots/create/", self.base_url)
    }

    fn delete_snapshot_url(&self, snapshot_name: &str) -> String {
        format!("{}/latest/snapshots/delete/{}", self.base_url, snapshot_name)
    }

    fn snapshot_info_url(&self, snapshot_id: &str) -> String {
        format!("{}/latest/snapshots/info/{}", self.base_url, snapshot_id)
    }

    /// Read the body, turning non-2xx responses into [`ClientError::Status`].
    async fn read_body(response: reqwest::Response) -> Result<String, ClientError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl VolumeLifecycleClient for MayaApiClient {
    async fn create_volume(&self, request: &VolumeRequest) -> Result<String, ClientError> {
        debug!(name = request.name(), shape = %self.shape, "Creating volume");

        let response = self
            .http
            .post(self.create_volume_url())
            .json(request)
            .send()
            .await?;
        let body = Self::read_body(response).await?;

        // The server echoes the created volume; fall back to the requested name.
        let name = serde_json::from_str::<VolumeDescriptor>(&body)
            .ok()
            .map(|v| v.name)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| request.name().to_string());
        Ok(name)
    }

    async fn list_volume(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<VolumeDescriptor, ClientError> {
        debug!(name = name, namespace = namespace, "Reading volume");

        let response = self
            .http
            .get(self.list_volume_url(name))
            .header(NAMESPACE_HEADER, namespace)
            .send()
            .await?;
        let body = Self::read_body(response).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn delete_volume(&self, name: &str, namespace: &str) -> Result<(), ClientError> {
        debug!(name = name, namespace = namespace, "Deleting volume");

        let request = match self.shape {
            RequestShape::Legacy => self.http.get(self.delete_volume_url(name)),
            RequestShape::CasTemplate => self.http.delete(self.delete_volume_url(name)),
        };
        let response = request.header(NAMESPACE_HEADER, namespace).send().await?;
        Self::read_body(response).await?;
        Ok(())
    }

    async fn create_snapshot(
        &self,
        volume_name: &str,
        snapshot_name: &str,
        namespace: &str,
    ) -> Result<String, ClientError> {
        debug!(
            volume_name = volume_name,
            snapshot_name = snapshot_name,
            "Creating snapshot"
        );

        let body = SnapshotCreateRequest {
            kind: "VolumeSnapshot",
            api_version: "v1alpha1",
            metadata: SnapshotMetadata {
                name: snapshot_name,
                namespace,
            },
            spec: SnapshotSpec { volume_name },
        };
        let response = self
            .http
            .post(self.create_snapshot_url())
            .header(NAMESPACE_HEADER, namespace)
            .json(&body)
            .send()
            .await?;
        Self::read_body(response).await
    }

    async fn delete_snapshot(
        &self,
        volume_name: &str,
        snapshot_name: &str,
        namespace: &str,
    ) -> Result<String, ClientError> {
        debug!(
            volume_name = volume_name,
            snapshot_name = snapshot_name,
            "Deleting snapshot"
        );

        let response = self
            .http
            .get(self.delete_snapshot_url(snapshot_name))
            .query(&[("volume", volume_name)])
            .header(NAMESPACE_HEADER, namespace)
            .send()
            .await?;
        Self::read_body(response).await
    }

    async fn snapshot_info(
        &self,
        volume_name: &str,
        snapshot_id: &str,
    ) -> Result<String, ClientError> {
        debug!(
            volume_name = volume_name,
            snapshot_id = snapshot_id,
            "Fetching snapshot info"
        );

        let response = self
            .http
            .get(self.snapshot_info_url(snapshot_id))
            .query(&[("volume", volume_name)])
            .send()
            .await?;
        Self::read_body(response).await
    }
}
