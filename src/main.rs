//! Proxy Group Manager service
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Proxy Group Manager                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐    ┌────────────┐    ┌────────────────────┐  │
//! │  │ IpcServer  │───▶│ PgService  │───▶│ PgCache            │  │
//! │  │ (socket)   │◀───│ (loop)     │    │ groups / proxies   │  │
//! │  └────────────┘    └────────────┘    └────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pgmanager::adapters::FileGroupSource;
use pgmanager::domain::GroupSource;
use pgmanager::error::{Error, Result};
use pgmanager::ipc::{stop_service, IpcClient, IpcServer};
use pgmanager::{PgCache, PgMetrics, PgService, ServiceConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Proxy Group Manager - host-to-proxy-group cache with incremental proxy resync
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// IPC socket path
    #[arg(long, env = "PGM_SOCKET", default_value = pgmanager::config::DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(flatten)]
    serve: ServeArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the proxy group service (default)
    Serve,

    /// Ask a running service to stop
    Stop,

    /// Query the sync data a proxy would receive
    Sync {
        /// Proxy id
        #[arg(long)]
        proxy_id: u64,

        /// Hostmap revision the proxy last applied
        #[arg(long, default_value = "0")]
        revision: u64,
    },
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
    /// Group snapshot file (YAML, or JSON by extension)
    #[arg(long, env = "PGM_SNAPSHOT")]
    snapshot: Option<PathBuf>,

    /// Bound on one inbox receive, in seconds
    #[arg(long, env = "PGM_POLL_TIMEOUT_SECONDS", default_value = "1")]
    poll_timeout_seconds: u64,

    /// Age of the last resync after which a proxy gets a full resync, in seconds
    #[arg(long, env = "PGM_FULL_RESYNC_SECONDS", default_value = "86400")]
    full_resync_seconds: u64,

    /// Largest accepted IPC frame payload in bytes
    #[arg(long, env = "PGM_MAX_FRAME_SIZE", default_value_t = pgmanager::config::DEFAULT_MAX_FRAME_SIZE)]
    max_frame_size: usize,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    match args.command {
        None | Some(Command::Serve) => serve(args.socket, args.serve).await,
        Some(Command::Stop) => stop_service(&args.socket).await,
        Some(Command::Sync { proxy_id, revision }) => {
            let mut client = IpcClient::connect(&args.socket).await?;
            let response = client.proxy_sync_data(proxy_id, revision).await?;
            info!(
                proxy_id,
                mode = %response.mode(),
                hpmap_revision = response.hpmap_revision(),
                deleted_hosts = ?response.deleted_hosts(),
                "Proxy sync data"
            );
            Ok(())
        }
    }
}

async fn serve(socket: PathBuf, args: ServeArgs) -> Result<()> {
    let config = ServiceConfig {
        socket_path: socket,
        poll_timeout: Duration::from_secs(args.poll_timeout_seconds),
        full_resync_interval: Duration::from_secs(args.full_resync_seconds),
        max_frame_size: args.max_frame_size,
        ..Default::default()
    };
    config.validate()?;

    info!("Starting Proxy Group Manager");
    info!("  Socket: {}", config.socket_path.display());
    info!("  Poll timeout: {:?}", config.poll_timeout);
    info!("  Full resync interval: {:?}", config.full_resync_interval);

    let metrics = PgMetrics::register(prometheus::default_registry())?;
    let cache = Arc::new(PgCache::new());
    let mut service = PgService::new(cache.clone(), config.clone(), metrics.clone());

    if let Some(path) = args.snapshot {
        let source = Arc::new(FileGroupSource::new(path));
        match source.snapshot().await {
            Ok(snapshot) => {
                let outcome = cache.lock().refresh_groups(&snapshot);
                info!(
                    config_revision = snapshot.revision,
                    groups = outcome.groups_added,
                    "Loaded initial group snapshot"
                );
            }
            Err(e) => warn!("Initial group snapshot unavailable: {}", e),
        }
        metrics.set_revision(cache.hpmap_revision());
        service = service.with_group_source(source);
    }

    let server = IpcServer::bind(&config.socket_path, config.max_frame_size)?;
    let handle = service.start();
    let cancel = handle.cancel_token();

    let server_task = tokio::spawn(server.serve(handle.sender(), cancel.clone()));

    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, stopping");
            cancel.cancel();
        }
        _ = cancel.cancelled() => {}
    }

    handle.join().await?;
    server_task
        .await
        .map_err(|e| Error::Internal(format!("IPC server task failed: {}", e)))??;

    info!("Proxy Group Manager shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    if let Ok(directive) = "hyper=warn".parse() {
        filter = filter.add_directive(directive);
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health and Metrics Servers
// =============================================================================

fn text_response(
    status: hyper::StatusCode,
    body: impl Into<hyper::body::Bytes>,
) -> hyper::Response<http_body_util::Full<hyper::body::Bytes>> {
    let mut response = hyper::Response::new(http_body_util::Full::new(body.into()));
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: &str) -> Result<()> {
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid health server address: {}", e)))?;

    let listener = TcpListener::bind(addr).await?;
    info!("Health server listening on {}", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            let handler = |req: Request<hyper::body::Incoming>| async move {
                let response = match req.uri().path() {
                    "/healthz" | "/livez" | "/readyz" => text_response(StatusCode::OK, "ok"),
                    _ => text_response(StatusCode::NOT_FOUND, "not found"),
                };
                Ok::<_, std::convert::Infallible>(response)
            };

            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handler))
                .await
            {
                error!("Health server connection error: {}", e);
            }
        });
    }
}

async fn run_metrics_server(addr: &str) -> Result<()> {
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, StatusCode};
    use hyper_util::rt::TokioIo;
    use prometheus::{Encoder, TextEncoder};
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid metrics server address: {}", e)))?;

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            let handler = |req: Request<hyper::body::Incoming>| async move {
                let response = match req.uri().path() {
                    "/metrics" => {
                        let encoder = TextEncoder::new();
                        let mut buffer = Vec::new();
                        match encoder.encode(&prometheus::gather(), &mut buffer) {
                            Ok(()) => {
                                let mut response = text_response(StatusCode::OK, buffer);
                                if let Ok(value) = encoder.format_type().parse() {
                                    response
                                        .headers_mut()
                                        .insert(hyper::header::CONTENT_TYPE, value);
                                }
                                response
                            }
                            Err(e) => text_response(
                                StatusCode::INTERNAL_SERVER_ERROR,
                                format!("cannot encode metrics: {}", e),
                            ),
                        }
                    }
                    _ => text_response(StatusCode::NOT_FOUND, "not found"),
                };
                Ok::<_, std::convert::Infallible>(response)
            };

            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handler))
                .await
            {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}
