//! Node storage agent
//!
//! Serves the orchestrator's node-storage contract on a UNIX-domain
//! socket, translating each request into volume-daemon RPCs plus
//! filesystem and mount operations.

use carve::node::{self, KubeDeviceClassResolver, LvmdClient, MountManager, NodeService};
use carve::proto::csi::node_server::NodeServer;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tracing::{error, info};

/// Node-side storage plugin backed by the LVM volume daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// UNIX-domain socket to serve the node-storage contract on
    #[arg(long, env = "CARVE_CSI_SOCKET", default_value = "/run/carve/node/csi.sock")]
    csi_socket: PathBuf,

    /// UNIX-domain socket of the volume daemon
    #[arg(long, env = "CARVE_LVMD_SOCKET", default_value = "/run/carve/lvmd.sock")]
    lvmd_socket: PathBuf,

    /// Name of this node as registered with the orchestrator
    #[arg(long, env = "NODE_NAME")]
    node_name: String,

    /// Bind address for the ops/profiling endpoint; disabled when absent
    #[arg(long, env = "CARVE_PROFILING_BIND_ADDRESS")]
    profiling_bind_address: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> carve::Result<()> {
    let args = Args::parse();
    carve::ops::init_logging(&args.log_level, args.log_json);

    info!(
        version = carve::VERSION,
        node = %args.node_name,
        lvmd_socket = %args.lvmd_socket.display(),
        "starting node storage agent"
    );

    let channel = node::connect(&args.lvmd_socket).await?;
    let volumes = Arc::new(LvmdClient::new(channel));
    let kube_client = kube::Client::try_default().await?;
    let resolver = Arc::new(KubeDeviceClassResolver::new(kube_client));
    let mounter = Arc::new(MountManager::new());

    let service = NodeService::new(args.node_name, volumes, resolver, mounter);

    match std::fs::remove_file(&args.csi_socket) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    if let Some(parent) = args.csi_socket.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<NodeServer<NodeService>>()
        .await;

    if let Some(addr) = args.profiling_bind_address {
        tokio::spawn(async move {
            if let Err(e) = carve::ops::serve(addr).await {
                error!(error = %e, "ops server failed");
            }
        });
    }

    let listener = UnixListener::bind(&args.csi_socket)?;
    let incoming = UnixListenerStream::new(listener);
    info!(socket = %args.csi_socket.display(), "node storage agent listening");

    let shutdown = {
        let mut reporter = health_reporter.clone();
        async move {
            shutdown_signal().await;
            info!("shutdown signal received, draining in-flight requests");
            reporter.set_not_serving::<NodeServer<NodeService>>().await;
        }
    };

    tonic::transport::Server::builder()
        .add_service(health_service)
        .add_service(NodeServer::new(service))
        .serve_with_incoming_shutdown(incoming, shutdown)
        .await
        .map_err(|e| carve::Error::Internal(format!("gRPC server error: {e}")))?;

    let _ = std::fs::remove_file(&args.csi_socket);
    info!("node storage agent shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
