//! Core domain types and trait boundaries

pub mod ports;

pub use ports::{
    device_path, DeviceClassResolver, LogicalVolume, Lvm, Mounter, ThinPool, VolumeGroup,
    VolumeService, VolumeSpec,
};
