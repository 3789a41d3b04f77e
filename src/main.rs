//! GlusterFS Simple Provisioner
//!
//! Watches claims whose StorageClass names this provisioner, builds
//! GlusterFS volumes out of directory bricks on the configured hosts and
//! tears them down again when the claim is released.

use clap::Parser;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use prometheus::{Encoder, TextEncoder};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use glusterfs_simple_provisioner::{
    ControllerConfig, Error, ExecutorConfig, KubeRegistry, Metrics, ProvisionController,
    RemoteExecutor, Result, SshConfig, TransportFactory, VolumeOrchestrator,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// GlusterFS Simple Provisioner - directory-brick volumes for Kubernetes claims
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Provisioner name referenced by StorageClasses
    #[arg(long, env = "PROVISIONER_NAME", default_value = "gluster.org/glusterfs-simple")]
    provisioner_name: String,

    /// Identity of this provisioner instance, recorded on every volume
    #[arg(long, env = "PROVISIONER_IDENTITY", default_value = "glusterfs-simple-provisioner")]
    identity: String,

    /// How commands reach storage hosts (pod-exec, ssh, local)
    #[arg(long, env = "TRANSPORT", default_value = "pod-exec")]
    transport: String,

    /// Timeout for a single remote command in seconds
    #[arg(long, env = "COMMAND_TIMEOUT_SECS", default_value = "60")]
    command_timeout_secs: u64,

    /// Remote user for the ssh transport
    #[arg(long, env = "SSH_USER")]
    ssh_user: Option<String>,

    /// Port for the ssh transport
    #[arg(long, env = "SSH_PORT", default_value = "22")]
    ssh_port: u16,

    /// Private key for the ssh transport
    #[arg(long, env = "SSH_IDENTITY_FILE")]
    ssh_identity_file: Option<PathBuf>,

    /// Attempts per claim or volume before waiting for the next event
    #[arg(long, env = "MAX_ATTEMPTS", default_value = "5")]
    max_attempts: u32,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level or filter directive (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("Starting GlusterFS simple provisioner");
    info!("  Version: {}", glusterfs_simple_provisioner::VERSION);
    info!("  Provisioner: {}", args.provisioner_name);
    info!("  Identity: {}", args.identity);
    info!("  Transport: {}", args.transport);

    if args.command_timeout_secs == 0 {
        return Err(Error::Configuration(
            "command timeout must be greater than zero".into(),
        ));
    }
    if args.max_attempts == 0 {
        return Err(Error::Configuration("max attempts must be at least one".into()));
    }

    let client = kube::Client::try_default().await?;

    let ssh = SshConfig {
        user: args.ssh_user.clone(),
        port: args.ssh_port,
        identity_file: args.ssh_identity_file.clone(),
        ..Default::default()
    };
    let transport = TransportFactory::create(&args.transport, ssh, Some(client.clone()))?;
    let executor = RemoteExecutor::new(
        transport,
        ExecutorConfig {
            command_timeout: Duration::from_secs(args.command_timeout_secs),
        },
    );

    let registry = Arc::new(KubeRegistry::new(client.clone()));
    let orchestrator = Arc::new(VolumeOrchestrator::new(
        args.identity.clone(),
        executor,
        registry.clone(),
        registry,
    ));

    let metrics = Metrics::register(prometheus::default_registry())?;

    for (kind, addr, route) in [
        ("Health", args.health_addr.clone(), health_route as fn(&str) -> Response<Body>),
        ("Metrics", args.metrics_addr.clone(), metrics_route),
    ] {
        tokio::spawn(async move {
            if let Err(e) = serve_http(kind, &addr, route).await {
                error!("{}", e);
            }
        });
    }

    let controller = ProvisionController::new(
        ControllerConfig {
            provisioner_name: args.provisioner_name.clone(),
            max_attempts: args.max_attempts,
            ..Default::default()
        },
        client,
        orchestrator,
        metrics,
    );

    tokio::select! {
        result = controller.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
    }

    info!("Provisioner shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

/// `RUST_LOG` wins over `--log-level` when set
fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{},hyper=warn,kube=info", args.log_level)))
        .map_err(|e| Error::Configuration(format!("invalid log level {}: {}", args.log_level, e)))?;

    let layer = fmt::layer().with_target(true);
    let subscriber = tracing_subscriber::registry().with(filter);
    if args.log_json {
        subscriber.with(layer.json()).init();
    } else {
        subscriber.with(layer).init();
    }
    Ok(())
}

// =============================================================================
// Health and Metrics Endpoints
// =============================================================================

/// Serve `route` over plain HTTP until the listener fails
async fn serve_http(kind: &'static str, addr: &str, route: fn(&str) -> Response<Body>) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Configuration(format!("invalid {} address {}: {}", kind, addr, e)))?;

    let make_svc = make_service_fn(move |_conn| async move {
        Ok::<_, Infallible>(service_fn(move |req: Request<Body>| async move {
            Ok::<_, Infallible>(route(req.uri().path()))
        }))
    });

    info!("{} server listening on {}", kind, addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("{} server stopped: {}", kind, e)))
}

fn health_route(path: &str) -> Response<Body> {
    match path {
        "/healthz" | "/livez" | "/readyz" => text(StatusCode::OK, "ok"),
        _ => text(StatusCode::NOT_FOUND, "not found"),
    }
}

fn metrics_route(path: &str) -> Response<Body> {
    if path != "/metrics" {
        return text(StatusCode::NOT_FOUND, "not found");
    }

    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
        return text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    let mut response = text(StatusCode::OK, buffer);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(prometheus::TEXT_FORMAT));
    response
}

fn text(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
}
