//! In-memory fakes of the node-side ports for service tests.

use crate::domain::{DeviceClassResolver, LogicalVolume, Mounter, VolumeService};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Observed mount-manager activity.
#[derive(Debug, Default, Clone)]
pub struct MountState {
    /// Mounts actually performed (already-mounted targets do not count).
    pub mounts: u32,
    pub bind_mounts: u32,
    pub unmounts: u32,
    pub resize_checks: u32,
    /// Highest number of overlapping mount operations observed.
    pub max_concurrent: u32,
    pub last_fs_type: Option<String>,
    mounted: HashSet<PathBuf>,
    active: u32,
}

/// Fake mounter tracking call counts and the mounted-target set. Sleeps
/// inside every operation so unserialized callers would be observed as
/// overlapping.
#[derive(Default)]
pub struct FakeMounter {
    state: Mutex<MountState>,
}

impl FakeMounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MountState {
        self.state.lock().unwrap().clone()
    }

    fn enter(&self) {
        let mut s = self.state.lock().unwrap();
        s.active += 1;
        s.max_concurrent = s.max_concurrent.max(s.active);
    }

    fn leave(&self) {
        self.state.lock().unwrap().active -= 1;
    }
}

#[async_trait]
impl Mounter for FakeMounter {
    async fn ensure_mounted(
        &self,
        _device: &Path,
        target: &Path,
        fs_type: &str,
        _options: &[String],
        _read_only: bool,
    ) -> Result<()> {
        self.enter();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let mut s = self.state.lock().unwrap();
        if s.mounted.insert(target.to_path_buf()) {
            s.mounts += 1;
            s.last_fs_type = Some(fs_type.to_string());
        }
        s.active -= 1;
        Ok(())
    }

    async fn bind_mount(&self, _source: &Path, target: &Path, _read_only: bool) -> Result<()> {
        self.enter();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let mut s = self.state.lock().unwrap();
        if s.mounted.insert(target.to_path_buf()) {
            s.bind_mounts += 1;
        }
        s.active -= 1;
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> Result<()> {
        self.enter();
        tokio::time::sleep(Duration::from_millis(5)).await;
        {
            let mut s = self.state.lock().unwrap();
            s.mounted.remove(target);
            s.unmounts += 1;
        }
        // The real manager removes the target after unmounting.
        let _ = std::fs::remove_dir(target);
        let _ = std::fs::remove_file(target);
        self.leave();
        Ok(())
    }

    async fn resize_if_needed(&self, _device: &Path, _target: &Path) -> Result<bool> {
        self.state.lock().unwrap().resize_checks += 1;
        Ok(false)
    }

    async fn backing_device(&self, _target: &Path) -> Result<PathBuf> {
        Ok(PathBuf::from("/dev/fake-backing"))
    }
}

/// Fake volume-daemon client backed by a vector.
#[derive(Default)]
pub struct FakeVolumes {
    volumes: Mutex<Vec<LogicalVolume>>,
}

impl FakeVolumes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, lv: LogicalVolume) {
        self.volumes.lock().unwrap().push(lv);
    }
}

#[async_trait]
impl VolumeService for FakeVolumes {
    async fn list_volumes(&self, _device_class: &str) -> Result<Vec<LogicalVolume>> {
        Ok(self.volumes.lock().unwrap().clone())
    }
}

/// Fake control-plane resolver backed by a map.
#[derive(Default)]
pub struct FakeResolver {
    classes: Mutex<HashMap<String, String>>,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, volume_id: &str, device_class: &str) {
        self.classes
            .lock()
            .unwrap()
            .insert(volume_id.to_string(), device_class.to_string());
    }
}

#[async_trait]
impl DeviceClassResolver for FakeResolver {
    async fn device_class(&self, volume_id: &str) -> Result<String> {
        self.classes
            .lock()
            .unwrap()
            .get(volume_id)
            .cloned()
            .ok_or_else(|| {
                Error::NotFound(format!("no control-plane record for volume {volume_id}"))
            })
    }
}
