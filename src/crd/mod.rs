//! Custom Resource Definitions

pub mod logical_volume;

pub use logical_volume::{LogicalVolume, LogicalVolumeSpec, LogicalVolumeStatus};
