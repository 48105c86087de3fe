//! Volume-group query service
//!
//! Read-only RPCs plus the server-streaming capacity watch. None of these
//! take the per-VG mutation lock.

use crate::domain::{LogicalVolume, Lvm};
use crate::error::Result;
use crate::lvmd::capacity;
use crate::lvmd::device_class::DeviceClassRegistry;
use crate::lvmd::notify::CapacitySnapshot;
use crate::proto::lvmd as pb;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tonic::{Request, Response, Status};
use tracing::debug;

pub struct VgServiceImpl {
    lvm: Arc<dyn Lvm>,
    classes: Arc<DeviceClassRegistry>,
    capacity: watch::Receiver<CapacitySnapshot>,
    shutdown: watch::Receiver<bool>,
}

impl VgServiceImpl {
    pub fn new(
        lvm: Arc<dyn Lvm>,
        classes: Arc<DeviceClassRegistry>,
        capacity: watch::Receiver<CapacitySnapshot>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            lvm,
            classes,
            capacity,
            shutdown,
        }
    }

    /// Volumes of the class's VG that carry the daemon's owner tag.
    async fn owned_volumes(&self, device_class: &str) -> Result<Vec<LogicalVolume>> {
        let dc = self.classes.resolve(device_class)?;
        let lvs = self.lvm.logical_volumes(&dc.volume_group).await?;
        Ok(lvs
            .into_iter()
            .filter(|lv| lv.tags.iter().any(|t| t == crate::OWNER_TAG))
            .collect())
    }
}

fn snapshot_response(snapshot: &CapacitySnapshot) -> pb::WatchResponse {
    pb::WatchResponse {
        items: snapshot
            .iter()
            .map(|(device_class, free_bytes)| pb::WatchItem {
                device_class: device_class.clone(),
                free_bytes: *free_bytes,
            })
            .collect(),
    }
}

#[tonic::async_trait]
impl pb::vg_service_server::VgService for VgServiceImpl {
    async fn get_lv_list(
        &self,
        request: Request<pb::GetLvListRequest>,
    ) -> Result<Response<pb::GetLvListResponse>, Status> {
        let req = request.into_inner();
        let volumes = self.owned_volumes(&req.device_class).await?;
        Ok(Response::new(pb::GetLvListResponse {
            volumes: volumes.iter().map(Into::into).collect(),
        }))
    }

    async fn get_free_bytes(
        &self,
        request: Request<pb::GetFreeBytesRequest>,
    ) -> Result<Response<pb::GetFreeBytesResponse>, Status> {
        let req = request.into_inner();
        let dc = self.classes.resolve(&req.device_class)?;
        let free_bytes = capacity::free_bytes(self.lvm.as_ref(), dc).await?;
        Ok(Response::new(pb::GetFreeBytesResponse { free_bytes }))
    }

    type WatchStream = Pin<Box<dyn Stream<Item = Result<pb::WatchResponse, Status>> + Send>>;

    async fn watch(
        &self,
        _request: Request<pb::Empty>,
    ) -> Result<Response<Self::WatchStream>, Status> {
        debug!("capacity watch subscribed");
        // The watch stream yields the current snapshot immediately, then one
        // item per published refresh; intermediate values coalesce.
        let updates = WatchStream::new(self.capacity.clone())
            .map(|snapshot| Ok(snapshot_response(&snapshot)));

        // Subscribers are closed with a terminal status once the server
        // begins graceful shutdown (a dropped shutdown sender counts too).
        let mut shutdown = self.shutdown.clone();
        let draining = async move {
            let _ = shutdown.wait_for(|draining| *draining).await;
        };
        let stream = updates.take_until(draining).chain(futures::stream::once(async {
            Err(Status::unavailable("server is shutting down"))
        }));
        Ok(Response::new(Box::pin(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::VolumeSpec;
    use crate::lvm::testing::FakeLvm;
    use crate::lvmd::device_class::DeviceClass;
    use crate::lvmd::notify;
    use crate::proto::lvmd::vg_service_server::VgService;

    async fn setup() -> (Arc<FakeLvm>, VgServiceImpl, watch::Sender<bool>) {
        let lvm = Arc::new(FakeLvm::new());
        lvm.add_vg("myvg1", 100 << 30, 40 << 30);
        let classes = Arc::new(
            DeviceClassRegistry::new(vec![DeviceClass {
                name: "ssd".into(),
                volume_group: "myvg1".into(),
                default: true,
                spare_gb: 10,
                ..DeviceClass::test_thick()
            }])
            .unwrap(),
        );
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (_notifier, rx) = notify::spawn(lvm.clone(), classes.clone(), shutdown_rx.clone())
            .await
            .unwrap();
        let service = VgServiceImpl::new(lvm.clone(), classes, rx, shutdown_rx);
        (lvm, service, shutdown)
    }

    #[tokio::test]
    async fn test_get_lv_list_filters_owner_tag() {
        let (lvm, service, _shutdown) = setup().await;
        lvm.create_volume(&VolumeSpec {
            vg_name: "myvg1".into(),
            name: "owned".into(),
            size_bytes: 1 << 30,
            tags: vec![crate::OWNER_TAG.into()],
            ..Default::default()
        })
        .await
        .unwrap();
        lvm.create_volume(&VolumeSpec {
            vg_name: "myvg1".into(),
            name: "foreign".into(),
            size_bytes: 1 << 30,
            ..Default::default()
        })
        .await
        .unwrap();

        let resp = service
            .get_lv_list(Request::new(pb::GetLvListRequest {
                device_class: "".into(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(resp.volumes.len(), 1);
        assert_eq!(resp.volumes[0].name, "owned");
        assert_eq!(resp.volumes[0].path, "/dev/myvg1/owned");
    }

    #[tokio::test]
    async fn test_get_free_bytes_applies_spare() {
        let (_lvm, service, _shutdown) = setup().await;
        let resp = service
            .get_free_bytes(Request::new(pb::GetFreeBytesRequest {
                device_class: "ssd".into(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(resp.free_bytes, 30 << 30);
    }

    #[tokio::test]
    async fn test_unknown_device_class() {
        let (_lvm, service, _shutdown) = setup().await;
        let status = service
            .get_free_bytes(Request::new(pb::GetFreeBytesRequest {
                device_class: "nvme".into(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn test_watch_emits_initial_snapshot() {
        let (_lvm, service, _shutdown) = setup().await;
        let mut stream = service
            .watch(Request::new(pb::Empty {}))
            .await
            .unwrap()
            .into_inner();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.items.len(), 1);
        assert_eq!(first.items[0].device_class, "ssd");
        assert_eq!(first.items[0].free_bytes, 30 << 30);
    }

    #[tokio::test]
    async fn test_watch_terminates_on_shutdown() {
        let (_lvm, service, shutdown) = setup().await;
        let mut stream = service
            .watch(Request::new(pb::Empty {}))
            .await
            .unwrap()
            .into_inner();

        // Consume the initial snapshot, then begin draining.
        stream.next().await.unwrap().unwrap();
        shutdown.send(true).unwrap();

        let terminal = tokio::time::timeout(std::time::Duration::from_secs(1), async {
            loop {
                match stream.next().await {
                    Some(Err(status)) => break status,
                    Some(Ok(_)) => continue,
                    None => panic!("stream ended without a terminal status"),
                }
            }
        })
        .await
        .expect("watch stream did not terminate on shutdown");
        assert_eq!(terminal.code(), tonic::Code::Unavailable);

        assert!(stream.next().await.is_none());
    }
}
