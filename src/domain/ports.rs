//! Domain ports - trait boundaries between the services and the host
//!
//! These traits separate the RPC services from the LVM tool, the mount
//! table, and the control-plane API. Adapters implement them against the
//! real host; tests substitute in-memory fakes.

use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

// =============================================================================
// Volume Group State
// =============================================================================

/// A discovered LVM volume group. Never created or destroyed by this system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeGroup {
    pub name: String,
    pub size_bytes: u64,
    pub free_bytes: u64,
}

/// A thin pool inside a volume group.
///
/// `virtual_used_bytes` is the sum of the virtual sizes of the thin volumes
/// allocated from the pool, not the physically written bytes; capacity
/// accounting for over-provisioned pools is done against committed virtual
/// size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThinPool {
    pub vg_name: String,
    pub name: String,
    pub size_bytes: u64,
    pub virtual_used_bytes: u64,
}

/// A logical volume as reported by the LVM tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalVolume {
    /// Opaque identifier chosen by the control plane.
    pub name: String,
    pub vg_name: String,
    /// Host device node, e.g. `/dev/myvg/<name>`.
    pub path: String,
    pub size_bytes: u64,
    pub tags: Vec<String>,
    /// Raw 10-character LVM attribute string.
    pub attr: String,
    /// Parent volume when this is a copy-on-write snapshot.
    pub origin: Option<String>,
    /// Thin pool the volume is allocated from, when thin.
    pub pool: Option<String>,
}

/// Parameters for allocating a new logical volume.
#[derive(Debug, Clone, Default)]
pub struct VolumeSpec {
    pub vg_name: String,
    pub name: String,
    pub size_bytes: u64,
    pub tags: Vec<String>,
    /// Number of stripes; 0 means unstriped.
    pub stripe: u32,
    /// Stripe size argument passed through to the tool, e.g. `"64k"`.
    pub stripe_size: String,
    /// Extra creation arguments from the device class and option class.
    pub extra_args: Vec<String>,
    /// Target thin pool; `None` allocates directly in the volume group.
    pub thin_pool: Option<String>,
}

// =============================================================================
// LVM Port
// =============================================================================

/// Host LVM operations.
///
/// Implemented by the command executor against the real `lvm` binary.
/// All size arguments and results are raw bytes.
#[async_trait]
pub trait Lvm: Send + Sync {
    /// Enumerate all volume groups on the host.
    async fn volume_groups(&self) -> Result<Vec<VolumeGroup>>;

    /// Look up a single volume group by name.
    async fn volume_group(&self, name: &str) -> Result<VolumeGroup>;

    /// Enumerate the logical volumes of one volume group.
    async fn logical_volumes(&self, vg: &str) -> Result<Vec<LogicalVolume>>;

    /// Look up a thin pool and compute its committed virtual size.
    async fn thin_pool(&self, vg: &str, pool: &str) -> Result<ThinPool>;

    /// Allocate a new logical volume.
    async fn create_volume(&self, spec: &VolumeSpec) -> Result<()>;

    /// Create and activate a copy-on-write snapshot of `source`.
    async fn create_snapshot(
        &self,
        vg: &str,
        name: &str,
        source: &str,
        tags: &[String],
    ) -> Result<()>;

    /// Remove a logical volume. Fails with a busy error when the kernel
    /// reports the volume open.
    async fn remove_volume(&self, vg: &str, name: &str) -> Result<()>;

    /// Extend a logical volume to `size_bytes`.
    async fn resize_volume(&self, vg: &str, name: &str, size_bytes: u64) -> Result<()>;

    /// Rename a logical volume.
    async fn rename_volume(&self, vg: &str, from: &str, to: &str) -> Result<()>;
}

// =============================================================================
// Mount Port
// =============================================================================

/// Idempotent mount-table operations on the local node.
///
/// The kernel mount table is the only source of truth; implementations must
/// not cache mount state across calls.
#[async_trait]
pub trait Mounter: Send + Sync {
    /// Format (only when no filesystem signature exists) and mount `device`
    /// at `target`. A `target` that is already a mount point is left alone.
    async fn ensure_mounted(
        &self,
        device: &Path,
        target: &Path,
        fs_type: &str,
        options: &[String],
        read_only: bool,
    ) -> Result<()>;

    /// Bind-mount `source` onto `target`, creating `target` as a regular
    /// file. Used for raw-block volumes.
    async fn bind_mount(&self, source: &Path, target: &Path, read_only: bool) -> Result<()>;

    /// Recursively unmount `target` and remove it. Succeeds when `target`
    /// is already absent.
    async fn unmount(&self, target: &Path) -> Result<()>;

    /// Grow the filesystem on `device` (mounted at `target`) when it is
    /// smaller than the device. Returns whether a resize happened.
    async fn resize_if_needed(&self, device: &Path, target: &Path) -> Result<bool>;

    /// Resolve the device backing the mount at `target` from the kernel
    /// mount table.
    async fn backing_device(&self, target: &Path) -> Result<PathBuf>;
}

// =============================================================================
// Volume Daemon Client Port
// =============================================================================

/// The slice of the volume daemon API the node agent consumes.
#[async_trait]
pub trait VolumeService: Send + Sync {
    /// List the daemon-owned volumes of a device class. An empty string
    /// resolves to the default class.
    async fn list_volumes(&self, device_class: &str) -> Result<Vec<LogicalVolume>>;
}

// =============================================================================
// Device-Class Resolution Port
// =============================================================================

/// Maps a volume ID to the device class it was provisioned under.
///
/// The production implementation queries the control-plane volume object;
/// an alternative can derive the class from tags on the volume itself.
#[async_trait]
pub trait DeviceClassResolver: Send + Sync {
    /// Returns the device class name, or a not-found error when the
    /// control plane has no record of the volume.
    async fn device_class(&self, volume_id: &str) -> Result<String>;
}

/// Path of the device node for a volume group / logical volume pair.
pub fn device_path(vg: &str, lv: &str) -> PathBuf {
    PathBuf::from(format!("/dev/{vg}/{lv}"))
}
