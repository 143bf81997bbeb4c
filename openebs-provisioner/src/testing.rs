//! In-memory [`VolumeLifecycleClient`] used by unit tests.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::maya_client::{
    ClientError, IQN_ANNOTATION, TARGET_PORTAL_ANNOTATION, VolumeDescriptor, VolumeLifecycleClient,
};
use crate::request::VolumeRequest;

pub const IQN: &str = "iqn.2016-09.com.openebs.jiva:pvc-1";
pub const TARGET_PORTAL: &str = "10.0.0.5:3260";

/// Records every call as `"<operation>:<arg>:<arg>"` and answers from fixed
/// data. `fail_on` makes the named operation return a 500.
pub struct FakeClient {
    calls: Mutex<Vec<String>>,
    requests: Mutex<Vec<VolumeRequest>>,
    annotations: Value,
    fail_on: Option<&'static str>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            annotations: json!({
                IQN_ANNOTATION: IQN,
                TARGET_PORTAL_ANNOTATION: TARGET_PORTAL,
            }),
            fail_on: None,
        }
    }

    pub fn with_annotations(mut self, annotations: Value) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn failing(mut self, operation: &'static str) -> Self {
        self.fail_on = Some(operation);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<VolumeRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn record(&self, operation: &'static str, args: &[&str]) -> Result<(), ClientError> {
        let mut call = operation.to_string();
        for arg in args {
            call.push(':');
            call.push_str(arg);
        }
        self.calls.lock().unwrap().push(call);

        if self.fail_on == Some(operation) {
            return Err(ClientError::Status {
                status: 500,
                body: format!("{} exploded", operation),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VolumeLifecycleClient for FakeClient {
    async fn create_volume(&self, request: &VolumeRequest) -> Result<String, ClientError> {
        self.requests.lock().unwrap().push(request.clone());
        self.record("create_volume", &[request.name()])?;
        Ok(request.name().to_string())
    }

    async fn list_volume(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<VolumeDescriptor, ClientError> {
        self.record("list_volume", &[name, namespace])?;
        Ok(VolumeDescriptor {
            name: name.to_string(),
            namespace: namespace.to_string(),
            annotations: self.annotations.clone(),
        })
    }

    async fn delete_volume(&self, name: &str, namespace: &str) -> Result<(), ClientError> {
        self.record("delete_volume", &[name, namespace])
    }

    async fn create_snapshot(
        &self,
        volume_name: &str,
        snapshot_name: &str,
        namespace: &str,
    ) -> Result<String, ClientError> {
        self.record("create_snapshot", &[volume_name, snapshot_name, namespace])?;
        Ok("{}".to_string())
    }

    async fn delete_snapshot(
        &self,
        volume_name: &str,
        snapshot_name: &str,
        namespace: &str,
    ) -> Result<String, ClientError> {
        self.record("delete_snapshot", &[volume_name, snapshot_name, namespace])?;
        Ok("{}".to_string())
    }

    async fn snapshot_info(
        &self,
        volume_name: &str,
        snapshot_id: &str,
    ) -> Result<String, ClientError> {
        self.record("snapshot_info", &[volume_name, snapshot_id])?;
        Ok("{}".to_string())
    }
}
