//! Host-local volume daemon
//!
//! Validates the configured device classes against the host's volume
//! groups, then serves the LV/VG gRPC services and the standard health
//! service over a UNIX-domain socket.

use carve::domain::Lvm;
use carve::lvm::executor::DEFAULT_LVM_PATH;
use carve::lvm::{CommandExecutor, ExecutorConfig};
use carve::lvmd::config::DEFAULT_CONFIG_PATH;
use carve::lvmd::{
    self, notify, DeviceClassRegistry, LvServiceImpl, LvmdConfig, OptionClassRegistry,
    VgServiceImpl,
};
use carve::proto::lvmd::lv_service_server::LvServiceServer;
use carve::proto::lvmd::vg_service_server::VgServiceServer;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tracing::{error, info};

/// gRPC service managing LVM logical volumes on this host
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(long, env = "LVMD_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// lvm command path on the host OS
    #[arg(long, env = "LVMD_LVM_PATH", default_value = DEFAULT_LVM_PATH)]
    lvm_path: PathBuf,

    /// Bind address for the ops/profiling endpoint; disabled when absent
    #[arg(long, env = "LVMD_PROFILING_BIND_ADDRESS")]
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

    info!(version = carve::VERSION, config = %args.config.display(), "starting lvmd");

    let config = LvmdConfig::load(&args.config)?;
    let classes = Arc::new(DeviceClassRegistry::new(config.device_classes.clone())?);
    let options = Arc::new(OptionClassRegistry::new(
        config.lvcreate_option_classes.clone(),
    )?);

    let lvm: Arc<dyn Lvm> = Arc::new(CommandExecutor::new(ExecutorConfig {
        lvm_path: args.lvm_path,
        ..ExecutorConfig::default()
    }));

    lvmd::validate_host_state(lvm.as_ref(), &classes).await?;
    info!(
        device_classes = classes.list().len(),
        "host volume groups validated"
    );

    // The socket file must be removed before listening; only one daemon
    // per socket may run.
    match std::fs::remove_file(&config.socket_name) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    if let Some(parent) = config.socket_name.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Flipped on SIGINT/SIGTERM: stops the capacity ticker and closes
    // watch subscribers with a terminal status so the drain can finish.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let (notifier, capacity_rx) =
        notify::spawn(lvm.clone(), classes.clone(), shutdown_rx.clone()).await?;
    let vg_service = VgServiceImpl::new(lvm.clone(), classes.clone(), capacity_rx, shutdown_rx);
    let lv_service = LvServiceImpl::new(lvm, classes, options, notifier);

    let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<LvServiceServer<LvServiceImpl>>()
        .await;
    health_reporter
        .set_serving::<VgServiceServer<VgServiceImpl>>()
        .await;

    if let Some(addr) = args.profiling_bind_address {
        tokio::spawn(async move {
            if let Err(e) = carve::ops::serve(addr).await {
                error!(error = %e, "ops server failed");
            }
        });
    }

    let listener = UnixListener::bind(&config.socket_name)?;
    let incoming = UnixListenerStream::new(listener);
    info!(socket = %config.socket_name.display(), "lvmd listening");

    let shutdown = {
        let mut reporter = health_reporter.clone();
        async move {
            shutdown_signal().await;
            info!("shutdown signal received, draining in-flight requests");
            reporter
                .set_not_serving::<LvServiceServer<LvServiceImpl>>()
                .await;
            reporter
                .set_not_serving::<VgServiceServer<VgServiceImpl>>()
                .await;
            let _ = shutdown_tx.send(true);
        }
    };

    tonic::transport::Server::builder()
        .add_service(health_service)
        .add_service(LvServiceServer::new(lv_service))
        .add_service(VgServiceServer::new(vg_service))
        .serve_with_incoming_shutdown(incoming, shutdown)
        .await
        .map_err(|e| carve::Error::Internal(format!("gRPC server error: {e}")))?;

    let _ = std::fs::remove_file(&config.socket_name);
    info!("lvmd shut down cleanly");
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
