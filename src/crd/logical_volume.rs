//! LogicalVolume CRD
//!
//! The control-plane record of a provisioned volume. The node agent only
//! reads it, to learn which device class a volume belongs to; the external
//! controller owns its lifecycle. Objects are named by volume ID.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired state of a logical volume on a node.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "carve.dev",
    version = "v1",
    kind = "LogicalVolume",
    plural = "logicalvolumes",
    shortname = "clv",
    status = "LogicalVolumeStatus",
    printcolumn = r#"{"name": "Node", "type": "string", "jsonPath": ".spec.nodeName"}"#,
    printcolumn = r#"{"name": "Class", "type": "string", "jsonPath": ".spec.deviceClass"}"#,
    printcolumn = r#"{"name": "Size", "type": "integer", "jsonPath": ".spec.sizeBytes"}"#,
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct LogicalVolumeSpec {
    /// Volume identifier; matches the object name.
    pub name: String,

    /// Node hosting the volume.
    pub node_name: String,

    /// Device class the volume is provisioned under. Empty means the
    /// daemon's default class.
    #[serde(default)]
    pub device_class: String,

    /// Requested size in bytes.
    pub size_bytes: u64,

    /// Source volume when provisioned as a snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Observed state written back by the controller.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogicalVolumeStatus {
    /// Volume ID once the daemon has materialized the volume.
    #[serde(default)]
    pub volume_id: String,

    /// Size actually allocated, after rounding and any expansion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_size_bytes: Option<u64>,

    #[serde(default)]
    pub message: String,
}
