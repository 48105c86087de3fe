//! Carve - dynamic provisioning of block storage carved from LVM volume groups
//!
//! Two cooperating daemons run on every storage node:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        control plane                          │
//! └───────────────┬───────────────────────────────────────────────┘
//!                 │ node-storage RPCs (UNIX socket)
//! ┌───────────────▼───────────────┐     ┌─────────────────────────┐
//! │   carve-node (node agent)     │ ──▶ │   lvmd (volume daemon)  │
//! │  publish / unpublish / stats  │gRPC │  create/remove/resize/  │
//! │  expand · mount manager       │     │  snapshot · capacity    │
//! └───────────────┬───────────────┘     └────────────┬────────────┘
//!                 │ mount syscalls                   │ lvm tool
//! ┌───────────────▼───────────────────────────────── ▼ ───────────┐
//! │             kernel VFS · device tree · LVM volume groups      │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`lvm`]: LVM tool executor, report parsing, attribute strings
//! - [`lvmd`]: device/option-class registries, capacity notifier, LV/VG services
//! - [`node`]: filesystem probe, mount manager, node storage service
//! - [`crd`]: control-plane custom resources
//! - [`domain`]: core types and port traits
//! - [`error`]: error taxonomy and the gRPC status mapping

pub mod crd;
pub mod domain;
pub mod error;
pub mod lvm;
pub mod lvmd;
pub mod node;
pub mod ops;
pub mod proto;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// LVM tag marking a logical volume as owned by this system.
pub const OWNER_TAG: &str = "carve";

/// Topology key whose segment carries the node name.
pub const TOPOLOGY_NODE_KEY: &str = "topology.carve.dev/node";

/// Directory where earlier releases placed raw-block device nodes; swept
/// on unpublish for backwards compatibility.
pub const LEGACY_DEVICE_DIR: &str = "/dev/carve";
