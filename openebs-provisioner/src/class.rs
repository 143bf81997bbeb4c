//! StorageClass parameter resolution.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{ProvisionerError, Result};
use crate::objects::PersistentVolumeClaim;
use crate::types::FsType;

/// StorageClass parameter selecting the filesystem (key matched case-insensitively).
pub const FS_TYPE_PARAM: &str = "openebs.io/fstype";

/// Beta StorageClass annotation, still honored ahead of `spec.storageClassName`.
pub const BETA_STORAGE_CLASS_ANNOTATION: &str = "volume.beta.kubernetes.io/storage-class";

/// Filesystems supported without operator configuration.
pub const BASE_FS_TYPES: [&str; 2] = ["ext4", "xfs"];

/// Effective set of filesystems a claim may request.
///
/// Built once at startup from [`BASE_FS_TYPES`] plus the operator extension
/// and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsTypeAllowList {
    types: BTreeSet<FsType>,
}

impl FsTypeAllowList {
    /// Build the allow-list from the base set and an optional comma-separated
    /// extension such as `"btrfs, zfs"`. Malformed entries are skipped.
    pub fn new(extension: Option<&str>) -> Self {
        let mut types: BTreeSet<FsType> = BASE_FS_TYPES
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect();

        for entry in extension.unwrap_or_default().split(',') {
            if entry.trim().is_empty() {
                continue;
            }
            match entry.parse::<FsType>() {
                Ok(fs_type) => {
                    types.insert(fs_type);
                }
                Err(e) => warn!(error = %e, "Ignoring filesystem in allow-list extension"),
            }
        }

        Self { types }
    }

    pub fn contains(&self, fs_type: &FsType) -> bool {
        self.types.contains(fs_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FsType> {
        self.types.iter()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl Default for FsTypeAllowList {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Resolves class parameters against the process-wide allow-list.
#[derive(Debug, Clone)]
pub struct ClassParameterResolver {
    allow_list: Arc<FsTypeAllowList>,
}

impl ClassParameterResolver {
    pub fn new(allow_list: Arc<FsTypeAllowList>) -> Self {
        Self { allow_list }
    }

    pub fn allow_list(&self) -> &FsTypeAllowList {
        &self.allow_list
    }

    /// Resolve the filesystem for a StorageClass, defaulting to ext4.
    ///
    /// The returned type is lower-cased; any value outside the allow-list is
    /// a validation error.
    pub fn resolve_fs_type(&self, parameters: &HashMap<String, String>) -> Result<FsType> {
        // Lower-case key sorts last, so an exact match wins over mixed-case duplicates.
        let requested = parameters
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(FS_TYPE_PARAM))
            .max_by(|a, b| a.0.cmp(b.0))
            .map(|(_, value)| value.as_str())
            .filter(|value| !value.trim().is_empty());

        let Some(requested) = requested else {
            debug!(fs_type = FsType::DEFAULT, "No fstype parameter, using default");
            return Ok(FsType::default());
        };

        let unsupported =
            || ProvisionerError::Validation(format!("Filesystem {} is not supported", requested));

        let fs_type = requested.parse::<FsType>().map_err(|_| unsupported())?;
        if !self.allow_list.contains(&fs_type) {
            return Err(unsupported());
        }
        Ok(fs_type)
    }
}

/// Storage class selected by a claim: the beta annotation first, then
/// `spec.storageClassName`. `None` is tolerated; callers log and proceed.
pub fn storage_class_name(claim: &PersistentVolumeClaim) -> Option<&str> {
    claim
        .annotations
        .get(BETA_STORAGE_CLASS_ANNOTATION)
        .or(claim.storage_class_name.as_ref())
        .map(String::as_str)
}
