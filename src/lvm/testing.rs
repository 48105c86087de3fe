//! In-memory fake of the LVM port for service tests.

use crate::domain::{device_path, LogicalVolume, Lvm, ThinPool, VolumeGroup, VolumeSpec};
use crate::error::{Error, Result};
use crate::lvm::{LvmError, LvmErrorKind};
use async_trait::async_trait;
use std::sync::Mutex;

#[derive(Default)]
struct FakeState {
    vgs: Vec<VolumeGroup>,
    lvs: Vec<LogicalVolume>,
    /// (vg, pool name, pool size)
    pools: Vec<(String, String, u64)>,
    /// Volume names the kernel reports open.
    open: Vec<String>,
}

/// Fake LVM host sharing the real executor's semantics: duplicate names
/// collide, thick allocations consume VG free space, thin allocations only
/// commit virtual size against their pool.
#[derive(Default)]
pub struct FakeLvm {
    state: Mutex<FakeState>,
}

impl FakeLvm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vg(&self, name: &str, size_bytes: u64, free_bytes: u64) {
        self.state.lock().unwrap().vgs.push(VolumeGroup {
            name: name.to_string(),
            size_bytes,
            free_bytes,
        });
    }

    pub fn add_pool(&self, vg: &str, name: &str, size_bytes: u64) {
        let mut state = self.state.lock().unwrap();
        state
            .pools
            .push((vg.to_string(), name.to_string(), size_bytes));
        state.lvs.push(LogicalVolume {
            name: name.to_string(),
            vg_name: vg.to_string(),
            path: device_path(vg, name).to_string_lossy().into_owned(),
            size_bytes,
            tags: vec![],
            attr: "twi-aotz--".to_string(),
            origin: None,
            pool: None,
        });
    }

    /// Mark a volume as open so removal fails busy.
    pub fn set_open(&self, name: &str) {
        self.state.lock().unwrap().open.push(name.to_string());
    }
}

#[async_trait]
impl Lvm for FakeLvm {
    async fn volume_groups(&self) -> Result<Vec<VolumeGroup>> {
        Ok(self.state.lock().unwrap().vgs.clone())
    }

    async fn volume_group(&self, name: &str) -> Result<VolumeGroup> {
        self.state
            .lock()
            .unwrap()
            .vgs
            .iter()
            .find(|vg| vg.name == name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("volume group {name}")))
    }

    async fn logical_volumes(&self, vg: &str) -> Result<Vec<LogicalVolume>> {
        let state = self.state.lock().unwrap();
        if !state.vgs.iter().any(|g| g.name == vg) {
            return Err(LvmError::new(
                LvmErrorKind::NotFound,
                "lvs",
                format!("Volume group \"{vg}\" not found"),
            )
            .into());
        }
        Ok(state
            .lvs
            .iter()
            .filter(|lv| lv.vg_name == vg)
            .cloned()
            .collect())
    }

    async fn thin_pool(&self, vg: &str, pool: &str) -> Result<ThinPool> {
        let state = self.state.lock().unwrap();
        let (_, name, size) = state
            .pools
            .iter()
            .find(|(v, p, _)| v == vg && p == pool)
            .ok_or_else(|| Error::NotFound(format!("thin pool {vg}/{pool}")))?;
        let virtual_used_bytes = state
            .lvs
            .iter()
            .filter(|lv| lv.vg_name == vg && lv.pool.as_deref() == Some(pool))
            .map(|lv| lv.size_bytes)
            .sum();

        Ok(ThinPool {
            vg_name: vg.to_string(),
            name: name.clone(),
            size_bytes: *size,
            virtual_used_bytes,
        })
    }

    async fn create_volume(&self, spec: &VolumeSpec) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state
            .lvs
            .iter()
            .any(|lv| lv.vg_name == spec.vg_name && lv.name == spec.name)
        {
            return Err(LvmError::new(
                LvmErrorKind::AlreadyExists,
                "lvcreate",
                format!(
                    "Logical Volume \"{}\" already exists in volume group \"{}\"",
                    spec.name, spec.vg_name
                ),
            )
            .into());
        }

        if spec.thin_pool.is_none() {
            let vg = state
                .vgs
                .iter_mut()
                .find(|vg| vg.name == spec.vg_name)
                .ok_or_else(|| Error::NotFound(format!("volume group {}", spec.vg_name)))?;
            if spec.size_bytes > vg.free_bytes {
                return Err(LvmError::new(
                    LvmErrorKind::InsufficientSpace,
                    "lvcreate",
                    format!(
                        "Volume group \"{}\" has insufficient free space",
                        spec.vg_name
                    ),
                )
                .into());
            }
            vg.free_bytes -= spec.size_bytes;
        }

        let attr = if spec.thin_pool.is_some() {
            "Vwi-a-tz--"
        } else {
            "-wi-a-----"
        };
        state.lvs.push(LogicalVolume {
            name: spec.name.clone(),
            vg_name: spec.vg_name.clone(),
            path: device_path(&spec.vg_name, &spec.name)
                .to_string_lossy()
                .into_owned(),
            size_bytes: spec.size_bytes,
            tags: spec.tags.clone(),
            attr: attr.to_string(),
            origin: None,
            pool: spec.thin_pool.clone(),
        });
        Ok(())
    }

    async fn create_snapshot(
        &self,
        vg: &str,
        name: &str,
        source: &str,
        tags: &[String],
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let src = state
            .lvs
            .iter()
            .find(|lv| lv.vg_name == vg && lv.name == source)
            .cloned()
            .ok_or_else(|| {
                Error::from(LvmError::new(
                    LvmErrorKind::NotFound,
                    "lvcreate",
                    format!("Failed to find logical volume \"{vg}/{source}\""),
                ))
            })?;

        state.lvs.push(LogicalVolume {
            name: name.to_string(),
            vg_name: vg.to_string(),
            path: device_path(vg, name).to_string_lossy().into_owned(),
            size_bytes: src.size_bytes,
            tags: tags.to_vec(),
            attr: "Vwi-a-tz--".to_string(),
            origin: Some(source.to_string()),
            pool: src.pool,
        });
        Ok(())
    }

    async fn remove_volume(&self, vg: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let Some(pos) = state
            .lvs
            .iter()
            .position(|lv| lv.vg_name == vg && lv.name == name)
        else {
            return Err(LvmError::new(
                LvmErrorKind::NotFound,
                "lvremove",
                format!("Failed to find logical volume \"{vg}/{name}\""),
            )
            .into());
        };
        if state.open.iter().any(|n| n == name) {
            return Err(LvmError::new(
                LvmErrorKind::Busy,
                "lvremove",
                format!("Logical volume {vg}/{name} in use."),
            )
            .into());
        }

        let lv = state.lvs.remove(pos);
        if lv.pool.is_none() {
            if let Some(vg) = state.vgs.iter_mut().find(|g| g.name == vg) {
                vg.free_bytes += lv.size_bytes;
            }
        }
        Ok(())
    }

    async fn resize_volume(&self, vg: &str, name: &str, size_bytes: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let pos = state
            .lvs
            .iter()
            .position(|lv| lv.vg_name == vg && lv.name == name)
            .ok_or_else(|| {
                Error::from(LvmError::new(
                    LvmErrorKind::NotFound,
                    "lvresize",
                    format!("Failed to find logical volume \"{vg}/{name}\""),
                ))
            })?;

        let grow = size_bytes.saturating_sub(state.lvs[pos].size_bytes);
        if state.lvs[pos].pool.is_none() {
            let vg = state.vgs.iter_mut().find(|g| g.name == vg).unwrap();
            if grow > vg.free_bytes {
                return Err(LvmError::new(
                    LvmErrorKind::InsufficientSpace,
                    "lvresize",
                    "insufficient free space",
                )
                .into());
            }
            vg.free_bytes -= grow;
        }
        state.lvs[pos].size_bytes = size_bytes;
        Ok(())
    }

    async fn rename_volume(&self, vg: &str, from: &str, to: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let lv = state
            .lvs
            .iter_mut()
            .find(|lv| lv.vg_name == vg && lv.name == from)
            .ok_or_else(|| {
                Error::from(LvmError::new(
                    LvmErrorKind::NotFound,
                    "lvrename",
                    format!("Failed to find logical volume \"{vg}/{from}\""),
                ))
            })?;
        lv.name = to.to_string();
        lv.path = device_path(vg, to).to_string_lossy().into_owned();
        Ok(())
    }
}
