//! Provisioner configuration, resolved once at startup and shared by
//! reference with the provisioner and the snapshot manager.

use std::sync::Arc;

use crate::class::FsTypeAllowList;
use crate::error::{ProvisionerError, Result};
use crate::ownership::{DashboardLinks, MonitorLink, PortalLink};
use crate::types::RequestShape;

#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Node name of this instance, stamped on every volume we create
    pub identity: String,
    pub fs_types: Arc<FsTypeAllowList>,
    pub dashboard: DashboardLinks,
    pub request_shape: RequestShape,
}

impl ProvisionerConfig {
    /// Config with defaults for everything but the identity.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            fs_types: Arc::new(FsTypeAllowList::default()),
            dashboard: DashboardLinks::default(),
            request_shape: RequestShape::default(),
        }
    }

    /// Extend the base filesystem allow-list with a comma-separated list.
    pub fn with_valid_fs_types(mut self, extension: Option<&str>) -> Self {
        self.fs_types = Arc::new(FsTypeAllowList::new(extension));
        self
    }

    /// Set the monitoring link. An empty or absent URL disables it.
    pub fn with_monitor(
        mut self,
        url: Option<String>,
        link_name: Option<String>,
        vol_key: Option<String>,
    ) -> Self {
        self.dashboard.monitor = non_empty(url).map(|url| MonitorLink {
            url,
            link_name: non_empty(link_name)
                .unwrap_or_else(|| DashboardLinks::DEFAULT_MONITOR_LINK_NAME.to_string()),
            vol_key: non_empty(vol_key),
        });
        self
    }

    /// Set the maya portal link. An empty or absent URL disables it.
    pub fn with_maya_portal(mut self, url: Option<String>, link_name: Option<String>) -> Self {
        self.dashboard.maya_portal = non_empty(url).map(|url| PortalLink {
            url,
            link_name: non_empty(link_name)
                .unwrap_or_else(|| DashboardLinks::DEFAULT_PORTAL_LINK_NAME.to_string()),
        });
        self
    }

    pub fn with_request_shape(mut self, request_shape: RequestShape) -> Self {
        self.request_shape = request_shape;
        self
    }

    /// Reject configurations the provisioner cannot run with.
    pub fn validate(self) -> Result<Self> {
        if self.identity.trim().is_empty() {
            return Err(ProvisionerError::Config(
                "node identity is empty; set NODE_NAME".to_string(),
            ));
        }
        Ok(self)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
