//! FSx Volume Driver
//!
//! Serves the volume lifecycle API over HTTP, with separate health and
//! Prometheus metrics listeners.
//!
//! Without a service endpoint the driver runs against the in-memory
//! simulated filesystem service. `--standalone` additionally replaces real
//! `mount(8)` calls with symlinks under the scratch directory, so the whole
//! lifecycle can run unprivileged on a workstation.

use clap::Parser;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fsx_volume_driver::cloud::FilesystemApiRef;
use fsx_volume_driver::domain::ports::MounterRef;
use fsx_volume_driver::{
    ApiServer, ApiServerConfig, CommandMounter, DriverConfig, Error, HttpFilesystemApi,
    InMemoryConfig, InMemoryFilesystemApi, Result, SymlinkMounter, VolumeManager,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// FSx Volume Driver - volume lifecycle for managed Lustre filesystems
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Filesystem service endpoint (overrides the config file)
    #[arg(long, env = "FSX_ENDPOINT")]
    endpoint: Option<String>,

    /// REST API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8090")]
    api_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Scratch mount directory (overrides the config file)
    #[arg(long, env = "SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Simulate mounts with symlinks instead of mount(8)
    #[arg(long, env = "STANDALONE")]
    standalone: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = load_config(&args)?;

    info!("Starting FSx Volume Driver");
    info!("  Version: {}", fsx_volume_driver::VERSION);
    info!("  REST API: {}", args.api_addr);
    info!("  Scratch root: {}", config.scratch.root.display());
    info!("  Standalone mode: {}", args.standalone);

    let api: FilesystemApiRef = match config.cloud.http_config() {
        Some(http) => {
            info!("  Filesystem service: {}", http.endpoint);
            Arc::new(HttpFilesystemApi::new(http)?)
        }
        None => {
            warn!("No filesystem service endpoint configured, using the in-memory service");
            Arc::new(InMemoryFilesystemApi::new(InMemoryConfig::default()))
        }
    };

    let mounter: MounterRef = if args.standalone {
        Arc::new(SymlinkMounter::new(config.scratch.root.join(".backing")))
    } else {
        Arc::new(CommandMounter::new())
    };

    let manager = Arc::new(VolumeManager::from_driver_config(&config, api, mounter)?);
    info!("Volume manager initialized");

    // Start health server
    let health_addr = parse_addr("health server", &args.health_addr)?;
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = parse_addr("metrics server", &args.metrics_addr)?;
    let metrics_manager = manager.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, metrics_manager).await {
            error!("Metrics server error: {}", e);
        }
    });

    let api_config = ApiServerConfig {
        rest_addr: parse_addr("REST API", &args.api_addr)?,
    };
    let api_server = Arc::new(ApiServer::new(api_config, manager.clone()));

    // Graceful shutdown on Ctrl-C
    let signal_server = api_server.clone();
    let signal_manager = manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutdown signal received");
        signal_manager.shutdown();
        signal_server.shutdown();
    });

    api_server.run().await?;

    info!("Driver shutdown complete");
    Ok(())
}

fn load_config(args: &Args) -> Result<DriverConfig> {
    let mut config = match &args.config {
        Some(path) => DriverConfig::load(path)?,
        None => DriverConfig::default(),
    };

    if let Some(endpoint) = &args.endpoint {
        config.cloud.endpoint = Some(endpoint.clone());
    }
    if let Some(dir) = &args.scratch_dir {
        config.scratch.root = dir.clone();
    }

    config.validate()?;
    Ok(config)
}

fn parse_addr(name: &str, addr: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|e| Error::Configuration(format!("Invalid {} address {}: {}", name, addr, e)))
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
    for directive in ["hyper=warn", "tower=warn", "reqwest=info", "axum=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
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
// Health Server
// =============================================================================

fn text_response(
    status: hyper::StatusCode,
    content_type: &str,
    body: impl Into<hyper::Body>,
) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(body.into());
    *response.status_mut() = status;
    if let Ok(value) = hyper::header::HeaderValue::from_str(content_type) {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

async fn run_health_server(addr: SocketAddr) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => {
                    text_response(StatusCode::OK, "text/plain", "ok")
                }
                _ => text_response(StatusCode::NOT_FOUND, "text/plain", "not found"),
            };
            Ok::<_, Infallible>(response)
        }))
    });

    info!("Health server listening on {}", addr);
    Server::try_bind(&addr)
        .map_err(|e| Error::Internal(format!("Failed to bind health server: {}", e)))?
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: SocketAddr, manager: Arc<VolumeManager>) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let manager = manager.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let manager = manager.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => match manager.metrics().encode() {
                            Ok((content_type, buffer)) => {
                                text_response(StatusCode::OK, &content_type, buffer)
                            }
                            Err(e) => {
                                error!("Failed to encode metrics: {}", e);
                                text_response(
                                    StatusCode::INTERNAL_SERVER_ERROR,
                                    "text/plain",
                                    e.to_string(),
                                )
                            }
                        },
                        _ => text_response(StatusCode::NOT_FOUND, "text/plain", "not found"),
                    };
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::try_bind(&addr)
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server: {}", e)))?
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
