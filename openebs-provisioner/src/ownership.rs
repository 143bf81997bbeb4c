//! Ownership and dashboard annotations on provisioned volumes.
//!
//! Every persistent volume carries the identity of the provisioner instance
//! that created it. Only that instance deletes the backing remote volume;
//! others get an ignorable error and leave it alone. There is no remote
//! coordination behind this, it is a compare on the stored annotation.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{ProvisionerError, Result};

/// Annotation holding the identity of the creating provisioner.
pub const IDENTITY_ANNOTATION: &str = "openEBSProvisionerIdentity";

/// Annotation the dashboard reads to render links on the volume page.
pub const DASHBOARD_LINKS_ANNOTATION: &str = "alpha.dashboard.kubernetes.io/links";

/// Stamps and verifies [`IDENTITY_ANNOTATION`].
#[derive(Debug, Clone)]
pub struct OwnershipAnnotationCodec {
    identity: String,
}

impl OwnershipAnnotationCodec {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn stamp(&self, annotations: &mut BTreeMap<String, String>) {
        annotations.insert(IDENTITY_ANNOTATION.to_string(), self.identity.clone());
    }

    /// Succeeds only when the stored identity is ours.
    ///
    /// A missing annotation is a configuration error: the volume was not made
    /// by this family of provisioners.
    pub fn verify(&self, annotations: &BTreeMap<String, String>) -> Result<()> {
        let owner = annotations.get(IDENTITY_ANNOTATION).ok_or_else(|| {
            ProvisionerError::Config("identity annotation not found on PV".to_string())
        })?;

        if *owner != self.identity {
            return Err(ProvisionerError::OwnershipMismatch {
                owner: owner.clone(),
                identity: self.identity.clone(),
            });
        }
        Ok(())
    }
}

/// Local monitoring link, optionally keyed by volume name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorLink {
    pub url: String,
    pub link_name: String,
    /// Query key appended as `<vol_key>=<pv name>`
    pub vol_key: Option<String>,
}

/// Link to the maya portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalLink {
    pub url: String,
    pub link_name: String,
}

/// Operator-configured dashboard links.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DashboardLinks {
    pub monitor: Option<MonitorLink>,
    pub maya_portal: Option<PortalLink>,
}

impl DashboardLinks {
    pub const DEFAULT_MONITOR_LINK_NAME: &'static str = "monitor";
    pub const DEFAULT_PORTAL_LINK_NAME: &'static str = "maya";

    /// Render the links annotation value for `pv_name`, e.g.
    /// `{"monitor":"http://mon/?vol=pvc-1","maya":"http://portal"}`.
    ///
    /// Returns `None` when no link is configured.
    pub fn render(&self, pv_name: &str) -> Option<String> {
        let mut links = Vec::new();

        if let Some(monitor) = &self.monitor {
            let mut url = monitor.url.clone();
            if let Some(vol_key) = monitor.vol_key.as_deref().filter(|k| !k.is_empty()) {
                url.push_str(&format!("{}={}", vol_key, pv_name));
            }
            links.push(json_pair(&monitor.link_name, &url));
        }

        if let Some(portal) = &self.maya_portal {
            links.push(json_pair(&portal.link_name, &portal.url));
        }

        if links.is_empty() {
            None
        } else {
            Some(format!("{{{}}}", links.join(",")))
        }
    }

    /// Add the links annotation to `annotations` when any link is configured.
    pub fn annotate(&self, pv_name: &str, annotations: &mut BTreeMap<String, String>) {
        if let Some(links) = self.render(pv_name) {
            annotations.insert(DASHBOARD_LINKS_ANNOTATION.to_string(), links);
        }
    }
}

fn json_pair(key: &str, value: &str) -> String {
    format!(
        "{}:{}",
        Value::String(key.to_string()),
        Value::String(value.to_string())
    )
}
