//! Device-class resolution
//!
//! The node agent learns which device class a volume belongs to from the
//! control-plane `LogicalVolume` object. Kept behind the
//! `DeviceClassResolver` port so the lookup strategy can be swapped (e.g.
//! a tag-derived resolver) without touching the RPC handlers.

use crate::crd::LogicalVolume;
use crate::domain::DeviceClassResolver;
use crate::error::{Error, Result};
use async_trait::async_trait;
use kube::Api;

pub struct KubeDeviceClassResolver {
    api: Api<LogicalVolume>,
}

impl KubeDeviceClassResolver {
    pub fn new(client: kube::Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl DeviceClassResolver for KubeDeviceClassResolver {
    async fn device_class(&self, volume_id: &str) -> Result<String> {
        match self.api.get(volume_id).await {
            Ok(lv) => Ok(lv.spec.device_class),
            Err(kube::Error::Api(response)) if response.code == 404 => Err(Error::NotFound(
                format!("no control-plane record for volume {volume_id}"),
            )),
            Err(e) => Err(e.into()),
        }
    }
}
