//! Node storage service
//!
//! Implements the orchestrator's node-side storage contract. A
//! process-wide mutex serializes the four RPCs that touch the mount table
//! or the device tree; capability and info queries return constants and
//! bypass it. The inner server holds no lock of its own and must only be
//! called through the wrapper.

use crate::domain::{DeviceClassResolver, LogicalVolume, Mounter, VolumeService};
use crate::error::{Error, Result};
use crate::lvm::LvAttr;
use crate::node::filesystem;
use crate::node::mount::DEFAULT_FS_TYPE;
use crate::proto::csi as pb;
use crate::proto::csi::volume_capability::{access_mode, AccessType};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tonic::{Request, Response, Status};
use tracing::{info, warn};

pub struct NodeService {
    // Mount-table mutation, device-node creation, and formatting are not
    // safely interleavable at fine grain on one host.
    mutating: Mutex<()>,
    inner: NodeServiceInner,
}

impl NodeService {
    pub fn new(
        node_name: impl Into<String>,
        volumes: Arc<dyn VolumeService>,
        resolver: Arc<dyn DeviceClassResolver>,
        mounter: Arc<dyn Mounter>,
    ) -> Self {
        Self {
            mutating: Mutex::new(()),
            inner: NodeServiceInner {
                node_name: node_name.into(),
                volumes,
                resolver,
                mounter,
            },
        }
    }
}

#[tonic::async_trait]
impl pb::node_server::Node for NodeService {
    async fn node_publish_volume(
        &self,
        request: Request<pb::NodePublishVolumeRequest>,
    ) -> Result<Response<pb::NodePublishVolumeResponse>, Status> {
        let _guard = self.mutating.lock().await;
        self.inner.publish(request.into_inner()).await?;
        Ok(Response::new(pb::NodePublishVolumeResponse {}))
    }

    async fn node_unpublish_volume(
        &self,
        request: Request<pb::NodeUnpublishVolumeRequest>,
    ) -> Result<Response<pb::NodeUnpublishVolumeResponse>, Status> {
        let _guard = self.mutating.lock().await;
        self.inner.unpublish(request.into_inner()).await?;
        Ok(Response::new(pb::NodeUnpublishVolumeResponse {}))
    }

    async fn node_get_volume_stats(
        &self,
        request: Request<pb::NodeGetVolumeStatsRequest>,
    ) -> Result<Response<pb::NodeGetVolumeStatsResponse>, Status> {
        let _guard = self.mutating.lock().await;
        let response = self.inner.volume_stats(request.into_inner()).await?;
        Ok(Response::new(response))
    }

    async fn node_expand_volume(
        &self,
        request: Request<pb::NodeExpandVolumeRequest>,
    ) -> Result<Response<pb::NodeExpandVolumeResponse>, Status> {
        let _guard = self.mutating.lock().await;
        self.inner.expand(request.into_inner()).await?;
        // capacity_bytes is optional; the orchestrator reads the authoritative
        // size from the control-plane object.
        Ok(Response::new(pb::NodeExpandVolumeResponse {
            capacity_bytes: 0,
        }))
    }

    async fn node_get_capabilities(
        &self,
        _request: Request<pb::NodeGetCapabilitiesRequest>,
    ) -> Result<Response<pb::NodeGetCapabilitiesResponse>, Status> {
        // Constants only; no lock.
        use crate::proto::csi::node_service_capability::rpc::Type;
        let capabilities = [Type::GetVolumeStats, Type::ExpandVolume, Type::VolumeCondition]
            .into_iter()
            .map(|t| pb::NodeServiceCapability {
                r#type: Some(pb::node_service_capability::Type::Rpc(
                    pb::node_service_capability::Rpc { r#type: t as i32 },
                )),
            })
            .collect();
        Ok(Response::new(pb::NodeGetCapabilitiesResponse {
            capabilities,
        }))
    }

    async fn node_get_info(
        &self,
        _request: Request<pb::NodeGetInfoRequest>,
    ) -> Result<Response<pb::NodeGetInfoResponse>, Status> {
        // Constants only; no lock.
        let mut segments = std::collections::HashMap::new();
        segments.insert(
            crate::TOPOLOGY_NODE_KEY.to_string(),
            self.inner.node_name.clone(),
        );
        Ok(Response::new(pb::NodeGetInfoResponse {
            node_id: self.inner.node_name.clone(),
            max_volumes_per_node: 0,
            accessible_topology: Some(pb::Topology { segments }),
        }))
    }
}

struct NodeServiceInner {
    node_name: String,
    volumes: Arc<dyn VolumeService>,
    resolver: Arc<dyn DeviceClassResolver>,
    mounter: Arc<dyn Mounter>,
}

impl NodeServiceInner {
    async fn publish(&self, req: pb::NodePublishVolumeRequest) -> Result<()> {
        info!(
            volume_id = %req.volume_id,
            target_path = %req.target_path,
            read_only = req.readonly,
            "NodePublishVolume called"
        );

        if req.volume_id.is_empty() {
            return Err(Error::InvalidArgument("no volume_id is provided".into()));
        }
        if req.target_path.is_empty() {
            return Err(Error::InvalidArgument("no target_path is provided".into()));
        }
        let capability = req
            .volume_capability
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument("no volume_capability is provided".into()))?;

        let mode = capability
            .access_mode
            .as_ref()
            .map(|m| m.mode)
            .unwrap_or_default();
        if mode != access_mode::Mode::SingleNodeWriter as i32 {
            return Err(Error::FailedPrecondition(format!(
                "unsupported access mode: {}",
                access_mode::Mode::try_from(mode)
                    .map(|m| m.as_str_name().to_string())
                    .unwrap_or_else(|_| mode.to_string())
            )));
        }

        let access_type = capability.access_type.as_ref().ok_or_else(|| {
            Error::InvalidArgument("no supported volume capability is provided".into())
        })?;

        let lv = self.lookup_volume(&req.volume_id).await?;

        match access_type {
            AccessType::Mount(mount) => self.publish_filesystem(&req, &lv, mount).await,
            AccessType::Block(_) => self.publish_block(&req, &lv).await,
        }
    }

    async fn publish_filesystem(
        &self,
        req: &pb::NodePublishVolumeRequest,
        lv: &LogicalVolume,
        mount: &pb::volume_capability::MountVolume,
    ) -> Result<()> {
        let fs_type = if mount.fs_type.is_empty() {
            DEFAULT_FS_TYPE
        } else {
            &mount.fs_type
        };
        let options = publish_mount_flags(&mount.mount_flags, req.readonly)?;

        let device = Path::new(&lv.path);
        let target = Path::new(&req.target_path);
        self.mounter
            .ensure_mounted(device, target, fs_type, &options, req.readonly)
            .await?;
        self.mounter.resize_if_needed(device, target).await?;

        info!(
            volume_id = %req.volume_id,
            target_path = %req.target_path,
            fs_type,
            "NodePublishVolume(fs) succeeded"
        );
        Ok(())
    }

    async fn publish_block(
        &self,
        req: &pb::NodePublishVolumeRequest,
        lv: &LogicalVolume,
    ) -> Result<()> {
        self.mounter
            .bind_mount(
                Path::new(&lv.path),
                Path::new(&req.target_path),
                req.readonly,
            )
            .await?;

        info!(
            volume_id = %req.volume_id,
            target_path = %req.target_path,
            "NodePublishVolume(block) succeeded"
        );
        Ok(())
    }

    async fn unpublish(&self, req: pb::NodeUnpublishVolumeRequest) -> Result<()> {
        info!(
            volume_id = %req.volume_id,
            target_path = %req.target_path,
            "NodeUnpublishVolume called"
        );

        if req.volume_id.is_empty() {
            return Err(Error::InvalidArgument("no volume_id is provided".into()));
        }
        if req.target_path.is_empty() {
            return Err(Error::InvalidArgument("no target_path is provided".into()));
        }

        let target = Path::new(&req.target_path);
        let meta = match std::fs::symlink_metadata(target) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Device nodes published by earlier releases lived under a
                // fixed directory; sweep a leftover if one exists.
                let _ = std::fs::remove_file(
                    Path::new(crate::LEGACY_DEVICE_DIR).join(&req.volume_id),
                );
                return Ok(());
            }
            Err(e) => {
                return Err(Error::Internal(format!(
                    "stat failed for {}: {e}",
                    req.target_path
                )))
            }
        };

        self.mounter.unmount(target).await?;
        if meta.is_dir() {
            info!(volume_id = %req.volume_id, target_path = %req.target_path,
                "NodeUnpublishVolume(fs) succeeded");
        } else {
            info!(volume_id = %req.volume_id, target_path = %req.target_path,
                "NodeUnpublishVolume(block) succeeded");
        }
        Ok(())
    }

    async fn volume_stats(
        &self,
        req: pb::NodeGetVolumeStatsRequest,
    ) -> Result<pb::NodeGetVolumeStatsResponse> {
        if req.volume_id.is_empty() {
            return Err(Error::InvalidArgument("no volume_id is provided".into()));
        }
        if req.volume_path.is_empty() {
            return Err(Error::InvalidArgument("no volume_path is provided".into()));
        }

        let path = Path::new(&req.volume_path);
        let meta = match std::fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!(
                    "volume is not found at {}",
                    req.volume_path
                )));
            }
            Err(e) => {
                return Err(Error::Internal(format!(
                    "stat on {} failed: {e}",
                    req.volume_path
                )))
            }
        };

        let usage = if is_block_device(&meta) {
            vec![pb::VolumeUsage {
                available: 0,
                total: filesystem::device_size(path)? as i64,
                used: 0,
                unit: pb::volume_usage::Unit::Bytes as i32,
            }]
        } else if meta.is_dir() {
            let fs = filesystem::fs_usage(path)?;
            vec![
                pb::VolumeUsage {
                    available: fs.available_bytes as i64,
                    total: fs.total_bytes as i64,
                    used: fs.used_bytes as i64,
                    unit: pb::volume_usage::Unit::Bytes as i32,
                },
                pb::VolumeUsage {
                    available: fs.available_inodes as i64,
                    total: fs.total_inodes as i64,
                    used: fs.used_inodes as i64,
                    unit: pb::volume_usage::Unit::Inodes as i32,
                },
            ]
        } else {
            return Err(Error::Internal(format!(
                "invalid mode bits for {}",
                req.volume_path
            )));
        };

        let lv = self.lookup_volume(&req.volume_id).await?;
        let attr = LvAttr::parse(&lv.attr)?;
        let volume_condition = match attr.abnormality() {
            Some(message) => pb::VolumeCondition {
                abnormal: true,
                message,
            },
            None => pb::VolumeCondition {
                abnormal: false,
                message: "volume is healthy and operating normally".to_string(),
            },
        };

        Ok(pb::NodeGetVolumeStatsResponse {
            usage,
            volume_condition: Some(volume_condition),
        })
    }

    async fn expand(&self, req: pb::NodeExpandVolumeRequest) -> Result<()> {
        info!(
            volume_id = %req.volume_id,
            volume_path = %req.volume_path,
            "NodeExpandVolume called"
        );

        if req.volume_id.is_empty() {
            return Err(Error::InvalidArgument("no volume_id is provided".into()));
        }
        if req.volume_path.is_empty() {
            return Err(Error::InvalidArgument("no volume_path is provided".into()));
        }
        validate_capacity_range(req.capacity_range.as_ref())?;

        let is_block = matches!(
            req.volume_capability.as_ref().and_then(|c| c.access_type.as_ref()),
            Some(AccessType::Block(_))
        );
        if is_block {
            info!(volume_id = %req.volume_id, "NodeExpandVolume(block) is a no-op");
            return Ok(());
        }

        // A missing control-plane record degrades to the default class; the
        // volume itself must still exist on this node.
        let device_class = match self.resolver.device_class(&req.volume_id).await {
            Ok(dc) => dc,
            Err(Error::NotFound(_)) => {
                warn!(
                    volume_id = %req.volume_id,
                    "no control-plane record, falling back to the default device class"
                );
                String::new()
            }
            Err(e) => return Err(e),
        };
        let lv = self.find_in_class(&device_class, &req.volume_id).await?;

        let volume_path = Path::new(&req.volume_path);
        let backing = self.mounter.backing_device(volume_path).await?;
        info!(
            volume_id = %req.volume_id,
            device = %backing.display(),
            "triggering filesystem resize"
        );
        self.mounter
            .resize_if_needed(Path::new(&lv.path), volume_path)
            .await?;

        info!(volume_id = %req.volume_id, "NodeExpandVolume(fs) succeeded");
        Ok(())
    }

    async fn lookup_volume(&self, volume_id: &str) -> Result<LogicalVolume> {
        let device_class = self.resolver.device_class(volume_id).await?;
        self.find_in_class(&device_class, volume_id).await
    }

    async fn find_in_class(&self, device_class: &str, volume_id: &str) -> Result<LogicalVolume> {
        self.volumes
            .list_volumes(device_class)
            .await?
            .into_iter()
            .find(|lv| lv.name == volume_id)
            .ok_or_else(|| Error::NotFound(format!("failed to find volume {volume_id}")))
    }
}

fn is_block_device(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::FileTypeExt;
    meta.file_type().is_block_device()
}

/// Pass-through of the caller's mount flags, rejecting a `rw` flag on a
/// read-only publish.
fn publish_mount_flags(flags: &[String], read_only: bool) -> Result<Vec<String>> {
    let mut out = Vec::with_capacity(flags.len());
    for flag in flags {
        if flag == "rw" && read_only {
            return Err(Error::InvalidArgument(
                "mount option \"rw\" conflicts with a read-only publish".into(),
            ));
        }
        out.push(flag.clone());
    }
    Ok(out)
}

fn validate_capacity_range(range: Option<&pb::CapacityRange>) -> Result<()> {
    let Some(range) = range else { return Ok(()) };
    if range.required_bytes < 0 || range.limit_bytes < 0 {
        return Err(Error::InvalidArgument(
            "capacity range must not be negative".into(),
        ));
    }
    if range.limit_bytes > 0 && range.required_bytes > range.limit_bytes {
        return Err(Error::InvalidArgument(format!(
            "required bytes {} exceed the limit {}",
            range.required_bytes, range.limit_bytes
        )));
    }
    Ok(())
}
