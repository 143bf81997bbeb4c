//! Type-safe wrappers for provisioning parameters.
//!
//! These types are parsed from StorageClass parameters, claim specs and
//! operator flags at the API boundary so the orchestration code never deals
//! with raw strings.

use std::fmt::{self, Display};
use std::str::FromStr;

// ============================================================================
// FsType
// ============================================================================

/// Filesystem type placed on a provisioned block volume.
///
/// Open-ended: operators may allow additional types at startup, so this is a
/// normalized (lower-case) name rather than a closed enum.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FsType(String);

impl FsType {
    /// Filesystem used when the StorageClass does not select one.
    pub const DEFAULT: &'static str = "ext4";

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for FsType {
    fn default() -> Self {
        FsType(Self::DEFAULT.to_string())
    }
}

impl Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FsType {
    type Err = FsTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        let valid = name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_');
        if name.is_empty() || !valid {
            return Err(FsTypeParseError(s.to_string()));
        }
        Ok(FsType(name))
    }
}

/// Error returned when parsing a malformed filesystem name.
#[derive(Debug, Clone)]
pub struct FsTypeParseError(String);

impl Display for FsTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid filesystem type '{}'", self.0)
    }
}

impl std::error::Error for FsTypeParseError {}

// ============================================================================
// AccessMode
// ============================================================================

/// Kubernetes persistent volume access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    ReadWriteOnce,
    ReadOnlyMany,
    ReadWriteMany,
    ReadWriteOncePod,
}

impl AccessMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            AccessMode::ReadWriteOnce => "ReadWriteOnce",
            AccessMode::ReadOnlyMany => "ReadOnlyMany",
            AccessMode::ReadWriteMany => "ReadWriteMany",
            AccessMode::ReadWriteOncePod => "ReadWriteOncePod",
        }
    }
}

impl Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessMode {
    type Err = AccessModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ReadWriteOnce" | "RWO" => Ok(AccessMode::ReadWriteOnce),
            "ReadOnlyMany" | "ROX" => Ok(AccessMode::ReadOnlyMany),
            "ReadWriteMany" | "RWX" => Ok(AccessMode::ReadWriteMany),
            "ReadWriteOncePod" | "RWOP" => Ok(AccessMode::ReadWriteOncePod),
            _ => Err(AccessModeParseError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown access mode.
#[derive(Debug, Clone)]
pub struct AccessModeParseError(String);

impl Display for AccessModeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown access mode '{}'", self.0)
    }
}

impl std::error::Error for AccessModeParseError {}

/// Returns true if every mode in `requested` is present in `supported`.
pub fn access_modes_contained_in(supported: &[AccessMode], requested: &[AccessMode]) -> bool {
    requested.iter().all(|mode| supported.contains(mode))
}

// ============================================================================
// ReclaimPolicy
// ============================================================================

/// What happens to the volume when its claim is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReclaimPolicy {
    #[default]
    Delete,
    Retain,
    Recycle,
}

impl Display for ReclaimPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReclaimPolicy::Delete => write!(f, "Delete"),
            ReclaimPolicy::Retain => write!(f, "Retain"),
            ReclaimPolicy::Recycle => write!(f, "Recycle"),
        }
    }
}

impl FromStr for ReclaimPolicy {
    type Err = ReclaimPolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "delete" | "" => Ok(ReclaimPolicy::Delete),
            "retain" => Ok(ReclaimPolicy::Retain),
            "recycle" => Ok(ReclaimPolicy::Recycle),
            _ => Err(ReclaimPolicyParseError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown reclaim policy.
#[derive(Debug, Clone)]
pub struct ReclaimPolicyParseError(String);

impl Display for ReclaimPolicyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown reclaim policy '{}': expected 'Delete', 'Retain' or 'Recycle'",
            self.0
        )
    }
}

impl std::error::Error for ReclaimPolicyParseError {}

// ============================================================================
// RequestShape
// ============================================================================

/// Wire format used for volume create requests against maya-apiserver.
///
/// Selected once at startup by the CAS template feature gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestShape {
    /// Legacy volume spec with typed provisioner labels
    #[default]
    Legacy,
    /// CAS volume request resolved through CAS templates
    CasTemplate,
}

impl RequestShape {
    pub const fn from_feature_gate(enabled: bool) -> Self {
        if enabled {
            RequestShape::CasTemplate
        } else {
            RequestShape::Legacy
        }
    }
}

impl Display for RequestShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestShape::Legacy => write!(f, "legacy"),
            RequestShape::CasTemplate => write!(f, "cas-template"),
        }
    }
}

// ============================================================================
// ConditionType
// ============================================================================

/// Snapshot status as reported to the snapshot controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionType {
    Ready,
    Pending,
    Error,
}

impl Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionType::Ready => write!(f, "Ready"),
            ConditionType::Pending => write!(f, "Pending"),
            ConditionType::Error => write!(f, "Error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fs_type_from_str() {
        assert_eq!("ext4".parse::<FsType>().unwrap().as_str(), "ext4");
        assert_eq!("XFS".parse::<FsType>().unwrap().as_str(), "xfs");
        assert_eq!(" Ext4 ".parse::<FsType>().unwrap().as_str(), "ext4");
        assert!("".parse::<FsType>().is_err());
        assert!("ext4;rm".parse::<FsType>().is_err());
    }

    #[test]
    fn test_fs_type_default() {
        assert_eq!(FsType::default().as_str(), "ext4");
        assert_eq!(FsType::default().to_string(), FsType::DEFAULT);
    }

    #[test]
    fn test_access_mode_from_str() {
        assert_eq!(
            "ReadWriteOnce".parse::<AccessMode>().unwrap(),
            AccessMode::ReadWriteOnce
        );
        assert_eq!("RWX".parse::<AccessMode>().unwrap(), AccessMode::ReadWriteMany);
        assert_eq!(
            "ReadWriteOncePod".parse::<AccessMode>().unwrap(),
            AccessMode::ReadWriteOncePod
        );
        assert!("readwriteonce".parse::<AccessMode>().is_err());
        assert!("".parse::<AccessMode>().is_err());
    }

    #[test]
    fn test_access_mode_display_round_trips_names() {
        for mode in [
            AccessMode::ReadWriteOnce,
            AccessMode::ReadOnlyMany,
            AccessMode::ReadWriteMany,
            AccessMode::ReadWriteOncePod,
        ] {
            assert_eq!(mode.to_string().parse::<AccessMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_access_modes_contained_in() {
        let supported = [AccessMode::ReadWriteOnce];
        assert!(access_modes_contained_in(&supported, &[]));
        assert!(access_modes_contained_in(
            &supported,
            &[AccessMode::ReadWriteOnce]
        ));
        assert!(!access_modes_contained_in(
            &supported,
            &[AccessMode::ReadWriteOnce, AccessMode::ReadWriteMany]
        ));
    }

    #[test]
    fn test_reclaim_policy_from_str() {
        assert_eq!("".parse::<ReclaimPolicy>().unwrap(), ReclaimPolicy::Delete);
        assert_eq!(
            "Retain".parse::<ReclaimPolicy>().unwrap(),
            ReclaimPolicy::Retain
        );
        assert_eq!(
            "RECYCLE".parse::<ReclaimPolicy>().unwrap(),
            ReclaimPolicy::Recycle
        );
        assert!("keep".parse::<ReclaimPolicy>().is_err());
    }

    #[test]
    fn test_request_shape_from_feature_gate() {
        assert_eq!(RequestShape::from_feature_gate(false), RequestShape::Legacy);
        assert_eq!(
            RequestShape::from_feature_gate(true),
            RequestShape::CasTemplate
        );
        assert_eq!(RequestShape::default(), RequestShape::Legacy);
    }
}
