//! Logical-volume mutation service
//!
//! Create, remove, and resize RPCs. Mutations against the same volume
//! group are serialized through a per-VG mutex; the LVM tool also holds
//! its own file locks, but in-process serialization keeps the capacity
//! pre-checks coherent and lets notifications coalesce. Operations on
//! different volume groups interleave freely.

use crate::domain::{LogicalVolume, Lvm, VolumeSpec};
use crate::error::{Error, Result};
use crate::lvmd::capacity;
use crate::lvmd::device_class::{DeviceClass, DeviceClassKind, DeviceClassRegistry};
use crate::lvmd::notify::CapacityNotifier;
use crate::lvmd::option_class::OptionClassRegistry;
use crate::proto::lvmd as pb;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tonic::{Request, Response, Status};
use tracing::info;

pub struct LvServiceImpl {
    lvm: Arc<dyn Lvm>,
    classes: Arc<DeviceClassRegistry>,
    options: Arc<OptionClassRegistry>,
    notifier: CapacityNotifier,
    vg_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LvServiceImpl {
    pub fn new(
        lvm: Arc<dyn Lvm>,
        classes: Arc<DeviceClassRegistry>,
        options: Arc<OptionClassRegistry>,
        notifier: CapacityNotifier,
    ) -> Self {
        Self {
            lvm,
            classes,
            options,
            notifier,
            vg_locks: DashMap::new(),
        }
    }

    fn vg_lock(&self, vg: &str) -> Arc<Mutex<()>> {
        self.vg_locks.entry(vg.to_string()).or_default().clone()
    }

    async fn find_volume(&self, vg: &str, name: &str) -> Result<Option<LogicalVolume>> {
        let lvs = self.lvm.logical_volumes(vg).await?;
        Ok(lvs.into_iter().find(|lv| lv.name == name))
    }

    async fn do_create(&self, req: pb::CreateLvRequest) -> Result<LogicalVolume> {
        if req.name.is_empty() {
            return Err(Error::InvalidArgument("no volume name is provided".into()));
        }
        if req.size_bytes == 0 {
            return Err(Error::InvalidArgument("volume size must be positive".into()));
        }

        let dc = self.classes.resolve(&req.device_class)?;
        let unit = capacity::allocation_unit(dc)?;
        let size_bytes = capacity::round_up(req.size_bytes, unit);
        let extra_args = {
            let mut args = dc.lvcreate_options.clone();
            args.extend(self.options.resolve(&req.lvcreate_option_class)?);
            args
        };
        let mut tags = vec![crate::OWNER_TAG.to_string()];
        tags.extend(req.tags.iter().cloned());

        let lock = self.vg_lock(&dc.volume_group);
        let _guard = lock.lock().await;

        if self.find_volume(&dc.volume_group, &req.name).await?.is_some() {
            return Err(Error::AlreadyExists(format!("volume {}", req.name)));
        }

        if req.source.is_empty() {
            let free = capacity::free_bytes(self.lvm.as_ref(), dc).await?;
            if size_bytes > free {
                return Err(Error::InsufficientCapacity {
                    requested: size_bytes,
                    available: free,
                });
            }
            self.lvm
                .create_volume(&VolumeSpec {
                    vg_name: dc.volume_group.clone(),
                    name: req.name.clone(),
                    size_bytes,
                    tags,
                    stripe: dc.stripe,
                    stripe_size: dc.stripe_size.clone(),
                    extra_args,
                    thin_pool: thin_pool_name(dc),
                })
                .await?;
        } else {
            self.create_snapshot_locked(dc, &req, tags).await?;
        }

        let lv = self
            .find_volume(&dc.volume_group, &req.name)
            .await?
            .ok_or_else(|| {
                Error::Internal(format!("volume {} missing after creation", req.name))
            })?;

        self.notifier.notify();
        info!(
            volume = %lv.name,
            device_class = %dc.name,
            size_bytes = lv.size_bytes,
            snapshot = !req.source.is_empty(),
            "volume created"
        );
        Ok(lv)
    }

    /// Snapshot creation; the caller holds the VG lock.
    async fn create_snapshot_locked(
        &self,
        dc: &DeviceClass,
        req: &pb::CreateLvRequest,
        tags: Vec<String>,
    ) -> Result<()> {
        if dc.kind != DeviceClassKind::Thin {
            return Err(Error::FailedPrecondition(format!(
                "device class {} does not support snapshots (thin classes only)",
                dc.name
            )));
        }
        let source = self
            .find_volume(&dc.volume_group, &req.source)
            .await?
            .ok_or_else(|| Error::NotFound(format!("snapshot source {}", req.source)))?;

        // The snapshot commits the source's virtual size against the pool.
        let free = capacity::free_bytes(self.lvm.as_ref(), dc).await?;
        if source.size_bytes > free {
            return Err(Error::InsufficientCapacity {
                requested: source.size_bytes,
                available: free,
            });
        }

        self.lvm
            .create_snapshot(&dc.volume_group, &req.name, &req.source, &tags)
            .await
    }

    async fn do_remove(&self, req: pb::RemoveLvRequest) -> Result<()> {
        if req.name.is_empty() {
            return Err(Error::InvalidArgument("no volume name is provided".into()));
        }
        let dc = self.classes.resolve(&req.device_class)?;

        let lock = self.vg_lock(&dc.volume_group);
        let _guard = lock.lock().await;

        if self.find_volume(&dc.volume_group, &req.name).await?.is_none() {
            // Removal is idempotent.
            return Ok(());
        }
        self.lvm.remove_volume(&dc.volume_group, &req.name).await?;

        self.notifier.notify();
        info!(volume = %req.name, device_class = %dc.name, "volume removed");
        Ok(())
    }

    async fn do_resize(&self, req: pb::ResizeLvRequest) -> Result<u64> {
        if req.name.is_empty() {
            return Err(Error::InvalidArgument("no volume name is provided".into()));
        }
        if req.size_bytes == 0 {
            return Err(Error::InvalidArgument("volume size must be positive".into()));
        }
        let dc = self.classes.resolve(&req.device_class)?;

        let lock = self.vg_lock(&dc.volume_group);
        let _guard = lock.lock().await;

        let lv = self
            .find_volume(&dc.volume_group, &req.name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("volume {}", req.name)))?;

        if req.size_bytes < lv.size_bytes {
            return Err(Error::InvalidArgument(format!(
                "shrinking volume {} from {} to {} bytes is not allowed",
                req.name, lv.size_bytes, req.size_bytes
            )));
        }
        if req.size_bytes == lv.size_bytes {
            return Ok(lv.size_bytes);
        }

        let grow = req.size_bytes - lv.size_bytes;
        let free = capacity::free_bytes(self.lvm.as_ref(), dc).await?;
        if grow > free {
            return Err(Error::InsufficientCapacity {
                requested: grow,
                available: free,
            });
        }

        self.lvm
            .resize_volume(&dc.volume_group, &req.name, req.size_bytes)
            .await?;

        self.notifier.notify();
        info!(
            volume = %req.name,
            device_class = %dc.name,
            size_bytes = req.size_bytes,
            "volume resized"
        );
        Ok(req.size_bytes)
    }
}

fn thin_pool_name(dc: &DeviceClass) -> Option<String> {
    dc.thin_pool.as_ref().map(|p| p.name.clone())
}

#[tonic::async_trait]
impl pb::lv_service_server::LvService for LvServiceImpl {
    async fn create_lv(
        &self,
        request: Request<pb::CreateLvRequest>,
    ) -> Result<Response<pb::CreateLvResponse>, Status> {
        let lv = self.do_create(request.into_inner()).await?;
        Ok(Response::new(pb::CreateLvResponse {
            volume: Some((&lv).into()),
        }))
    }

    async fn remove_lv(
        &self,
        request: Request<pb::RemoveLvRequest>,
    ) -> Result<Response<pb::Empty>, Status> {
        self.do_remove(request.into_inner()).await?;
        Ok(Response::new(pb::Empty {}))
    }

    async fn resize_lv(
        &self,
        request: Request<pb::ResizeLvRequest>,
    ) -> Result<Response<pb::ResizeLvResponse>, Status> {
        let size_bytes = self.do_resize(request.into_inner()).await?;
        Ok(Response::new(pb::ResizeLvResponse { size_bytes }))
    }
}
