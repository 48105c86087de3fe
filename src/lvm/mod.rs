//! LVM tool integration
//!
//! Wraps the host's `lvm` binary: argument construction, machine-readable
//! report parsing, error classification with bounded retry, and the
//! 10-character attribute string.

pub mod attr;
pub mod executor;
pub mod report;

#[cfg(test)]
pub(crate) mod testing;

pub use attr::{LvAttr, VolumeHealth, VolumeState};
pub use executor::{CommandExecutor, ExecutorConfig, LvmError, LvmErrorKind};
pub use report::ReportFormat;
