//! OpenEBS iSCSI Volume Provisioner Library
//!
//! Provisions and deletes OpenEBS block volumes through maya-apiserver on
//! behalf of a claim controller, and manages their snapshots.
//!
//! This library provides:
//! - Claim to volume request translation with filesystem validation
//! - Ownership-gated deletion keyed on the provisioner identity
//! - Snapshot create, delete, describe and restore
//! - gRPC services exposing the above to the external controllers

/// Provisioner proto generated types
pub mod proto {
    tonic::include_proto!("openebs.provisioner.v1");
}

pub mod class;
pub mod config;
pub mod error;
pub mod maya_client;
pub mod metrics;
pub mod objects;
pub mod ownership;
pub mod provisioner;
pub mod request;
pub mod service;
pub mod snapshot;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::ProvisionerConfig;
pub use error::{ProvisionerError, Result};
pub use maya_client::{MayaApiClient, VolumeLifecycleClient};
pub use provisioner::Provisioner;
pub use service::{ProvisionerService, SnapshotService};
pub use snapshot::SnapshotLifecycleManager;
