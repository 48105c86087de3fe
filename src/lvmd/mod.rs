//! Host-local volume daemon
//!
//! Owns the configured volume groups and serves the LV/VG gRPC services
//! over a UNIX-domain socket.

pub mod capacity;
pub mod config;
pub mod device_class;
pub mod lv_service;
pub mod notify;
pub mod option_class;
pub mod vg_service;

pub use config::LvmdConfig;
pub use device_class::{DeviceClass, DeviceClassKind, DeviceClassRegistry, ThinPoolConfig};
pub use lv_service::LvServiceImpl;
pub use notify::{CapacityNotifier, CapacitySnapshot};
pub use option_class::{LvcreateOptionClass, OptionClassRegistry};
pub use vg_service::VgServiceImpl;

use crate::domain::Lvm;
use crate::error::Result;

/// Verify at startup that every configured volume group and thin pool
/// actually exists on the host.
pub async fn validate_host_state(lvm: &dyn Lvm, classes: &DeviceClassRegistry) -> Result<()> {
    for dc in classes.list() {
        lvm.volume_group(&dc.volume_group).await?;
        if let Some(pool) = &dc.thin_pool {
            lvm.thin_pool(&dc.volume_group, &pool.name).await?;
        }
    }
    Ok(())
}
