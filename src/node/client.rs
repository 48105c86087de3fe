//! gRPC client for the volume daemon
//!
//! Connects over the daemon's UNIX-domain socket and adapts the generated
//! client to the `VolumeService` port.

use crate::domain::{LogicalVolume, VolumeService};
use crate::error::{Error, Result};
use crate::proto::lvmd as pb;
use async_trait::async_trait;
use hyper_util::rt::TokioIo;
use std::path::{Path, PathBuf};
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tonic::{Code, Status};
use tower::service_fn;

/// Open a channel to the volume daemon's UNIX-domain socket.
pub async fn connect(socket: &Path) -> Result<Channel> {
    let socket: PathBuf = socket.to_path_buf();
    // The endpoint URI is mandatory for the builder but unused for UDS.
    Endpoint::try_from("http://[::]:50051")
        .map_err(|e| Error::Internal(e.to_string()))?
        .connect_with_connector(service_fn(move |_: Uri| {
            let socket = socket.clone();
            async move {
                Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(socket).await?))
            }
        }))
        .await
        .map_err(|e| Error::Unavailable(format!("volume daemon socket: {e}")))
}

/// Volume-daemon client behind the `VolumeService` port.
pub struct LvmdClient {
    vg: pb::vg_service_client::VgServiceClient<Channel>,
}

impl LvmdClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            vg: pb::vg_service_client::VgServiceClient::new(channel),
        }
    }
}

#[async_trait]
impl VolumeService for LvmdClient {
    async fn list_volumes(&self, device_class: &str) -> Result<Vec<LogicalVolume>> {
        let mut client = self.vg.clone();
        let response = client
            .get_lv_list(pb::GetLvListRequest {
                device_class: device_class.to_string(),
            })
            .await
            .map_err(map_status)?;
        Ok(response
            .into_inner()
            .volumes
            .into_iter()
            .map(Into::into)
            .collect())
    }
}

fn map_status(status: Status) -> Error {
    match status.code() {
        Code::NotFound => Error::NotFound(status.message().to_string()),
        Code::Unavailable => Error::Unavailable(status.message().to_string()),
        Code::Cancelled => Error::Canceled,
        _ => Error::Internal(format!("volume daemon RPC failed: {status}")),
    }
}
