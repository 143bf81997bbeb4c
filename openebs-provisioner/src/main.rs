//! OpenEBS iSCSI Volume Provisioner
//!
//! Serves the provisioner and snapshot plugin gRPC services to the external
//! claim and snapshot controllers, backed by maya-apiserver.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tonic::transport::Server;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use openebs_provisioner::metrics;
use openebs_provisioner::proto::provisioner_server::ProvisionerServer;
use openebs_provisioner::proto::snapshot_plugin_server::SnapshotPluginServer;
use openebs_provisioner::types::RequestShape;
use openebs_provisioner::{
    MayaApiClient, Provisioner, ProvisionerConfig, ProvisionerService, SnapshotLifecycleManager,
    SnapshotService, VolumeLifecycleClient,
};

/// CLI arguments for the provisioner
#[derive(Parser, Debug)]
#[command(name = "openebs-provisioner")]
#[command(about = "OpenEBS iSCSI volume provisioner")]
struct Args {
    /// gRPC listen address
    #[arg(long, env = "LISTEN_ADDR", default_value = "[::]:50061")]
    listen: String,

    /// maya-apiserver address (e.g., http://10.0.0.10:5656)
    #[arg(long, env = "MAPI_ADDR")]
    mapi_addr: String,

    /// Provisioner identity stamped on created volumes (defaults to hostname)
    #[arg(long, env = "NODE_NAME")]
    node_name: Option<String>,

    /// Additional filesystems allowed in StorageClasses, comma-separated
    #[arg(long, env = "OPENEBS_VALID_FSTYPE")]
    valid_fstypes: Option<String>,

    /// Monitoring dashboard URL added to volume annotations
    #[arg(long, env = "OPENEBS_MONITOR_URL")]
    monitor_url: Option<String>,

    /// Link name for the monitoring URL
    #[arg(long, env = "OPENEBS_MONITOR_LINK_NAME")]
    monitor_link_name: Option<String>,

    /// Query key appended to the monitoring URL with the volume name
    #[arg(long, env = "OPENEBS_MONITOR_VOLKEY")]
    monitor_volkey: Option<String>,

    /// Maya portal URL added to volume annotations
    #[arg(long, env = "MAYA_PORTAL_URL")]
    maya_portal_url: Option<String>,

    /// Link name for the maya portal URL
    #[arg(long, env = "MAYA_PORTAL_LINK_NAME")]
    maya_portal_link_name: Option<String>,

    /// Send CAS template volume requests instead of legacy volume specs
    #[arg(long, env = "OPENEBS_IO_CAS_TEMPLATE_FEATURE_GATE", default_value = "false")]
    cas_template_feature_gate: bool,

    /// Serve the provisioner service
    #[arg(long, default_value = "true", action = clap::ArgAction::Set)]
    provisioner: bool,

    /// Serve the snapshot plugin service
    #[arg(long, default_value = "true", action = clap::ArgAction::Set)]
    snapshotter: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Prometheus metrics HTTP address (e.g., 0.0.0.0:9091)
    /// If not set, metrics endpoint is disabled
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing with configured log level
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if !args.provisioner && !args.snapshotter {
        return Err("at least one of --provisioner or --snapshotter must be enabled".into());
    }

    if let Some(ref addr_str) = args.metrics_addr {
        let addr = addr_str
            .parse()
            .map_err(|e| format!("Invalid metrics address '{}': {}", addr_str, e))?;
        if let Err(e) = metrics::init_metrics(addr) {
            return Err(format!("Failed to initialize metrics: {}", e).into());
        }
    }

    let identity = match args.node_name {
        Some(name) => name,
        None => hostname::get()?.to_string_lossy().to_string(),
    };
    let request_shape = RequestShape::from_feature_gate(args.cas_template_feature_gate);

    let config = ProvisionerConfig::new(identity)
        .with_valid_fs_types(args.valid_fstypes.as_deref())
        .with_monitor(
            args.monitor_url,
            args.monitor_link_name,
            args.monitor_volkey,
        )
        .with_maya_portal(args.maya_portal_url, args.maya_portal_link_name)
        .with_request_shape(request_shape)
        .validate()?;
    let config = Arc::new(config);

    let fs_types: Vec<&str> = config.fs_types.iter().map(|f| f.as_str()).collect();
    info!(
        listen = %args.listen,
        mapi_addr = %args.mapi_addr,
        identity = %config.identity,
        fs_types = ?fs_types,
        request_shape = %request_shape,
        provisioner = args.provisioner,
        snapshotter = args.snapshotter,
        "Starting OpenEBS provisioner"
    );

    let client: Arc<dyn VolumeLifecycleClient> =
        Arc::new(MayaApiClient::new(&args.mapi_addr, request_shape)?);

    let addr: SocketAddr = args
        .listen
        .parse()
        .map_err(|e| format!("Invalid listen address '{}': {}", args.listen, e))?;

    let provisioner_service = args.provisioner.then(|| {
        ProvisionerServer::new(ProvisionerService::new(Arc::new(Provisioner::new(
            Arc::clone(&client),
            Arc::clone(&config),
        ))))
    });
    let snapshot_service = args.snapshotter.then(|| {
        SnapshotPluginServer::new(SnapshotService::new(Arc::new(
            SnapshotLifecycleManager::new(Arc::clone(&client), Arc::clone(&config)),
        )))
    });

    info!("gRPC server listening on {}", addr);

    Server::builder()
        .add_optional_service(provisioner_service)
        .add_optional_service(snapshot_service)
        .serve_with_shutdown(addr, async {
            shutdown_signal().await;
            info!("Shutdown signal received, stopping server");
        })
        .await?;

    info!("openebs-provisioner shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() {
    // Install signal handlers, logging errors but continuing with available handlers
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::error!("Failed to install SIGTERM handler: {}", e);
            None
        }
    };

    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::error!("Failed to install SIGINT handler: {}", e);
            None
        }
    };

    tokio::select! {
        _ = recv_or_pending(sigterm.as_mut()) => {
            info!("Received SIGTERM");
        }
        _ = recv_or_pending(sigint.as_mut()) => {
            info!("Received SIGINT");
        }
    }
}

/// Resolve on the next signal; never resolve if the handler is missing.
async fn recv_or_pending(sig: Option<&mut Signal>) {
    match sig {
        Some(s) => {
            s.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}
