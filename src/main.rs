use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use logkeep_db::proto::commit_log_server::CommitLogServer;
use logkeep_db::{CommitLogService, Log, SegmentConfig, spawn_appender};

/// Server configuration parsed from environment variables.
///
/// # Environment Variables
///
/// | Variable                   | Required | Default     | Description                         |
/// |----------------------------|----------|-------------|-------------------------------------|
/// | `LOGKEEP_DATA`             | Yes      | --          | Directory holding the log segments  |
/// | `LOGKEEP_LISTEN`           | No       | `[::]:8090` | Socket address the gRPC server uses |
/// | `LOGKEEP_METRICS_LISTEN`   | No       | off         | Socket address for `GET /metrics`   |
/// | `LOGKEEP_MAX_STORE_BYTES`  | No       | `1024`      | Store bytes before segment roll     |
/// | `LOGKEEP_MAX_INDEX_BYTES`  | No       | `1024`      | Index bytes before segment roll     |
/// | `LOGKEEP_INITIAL_OFFSET`   | No       | `0`         | First offset of an empty log        |
#[derive(Debug, Clone, PartialEq)]
struct Config {
    /// Directory holding the log's segment files.
    data_dir: PathBuf,
    /// Socket address the gRPC server listens on.
    listen_addr: SocketAddr,
    /// Socket address the Prometheus exporter listens on, if any.
    metrics_addr: Option<SocketAddr>,
    /// Segment options handed to the log.
    segment: SegmentConfig,
}

/// Default socket address the server listens on when `LOGKEEP_LISTEN` is not set.
const DEFAULT_LISTEN_ADDR: &str = "[::]:8090";

/// Capacity of the bounded channel feeding the appender task.
const APPENDER_CHANNEL_CAPACITY: usize = 64;

impl Config {
    /// Parse server configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `Err(String)` if `LOGKEEP_DATA` is not set, or if any of the
    /// optional variables is set but does not parse.
    fn from_env() -> Result<Config, String> {
        let data_dir = std::env::var("LOGKEEP_DATA")
            .map(PathBuf::from)
            .map_err(|_| "LOGKEEP_DATA environment variable is required".to_string())?;

        let listen_addr = match std::env::var("LOGKEEP_LISTEN") {
            Ok(val) => val
                .parse::<SocketAddr>()
                .map_err(|e| format!("LOGKEEP_LISTEN is not a valid socket address: {e}"))?,
            Err(_) => DEFAULT_LISTEN_ADDR
                .parse::<SocketAddr>()
                .expect("default listen address is valid"),
        };

        let metrics_addr = match std::env::var("LOGKEEP_METRICS_LISTEN") {
            Ok(val) => Some(val.parse::<SocketAddr>().map_err(|e| {
                format!("LOGKEEP_METRICS_LISTEN is not a valid socket address: {e}")
            })?),
            Err(_) => None,
        };

        let defaults = SegmentConfig::default();
        let segment = SegmentConfig {
            max_store_bytes: env_u64("LOGKEEP_MAX_STORE_BYTES", defaults.max_store_bytes)?,
            max_index_bytes: env_u64("LOGKEEP_MAX_INDEX_BYTES", defaults.max_index_bytes)?,
            initial_offset: env_u64("LOGKEEP_INITIAL_OFFSET", defaults.initial_offset)?,
        };

        Ok(Config {
            data_dir,
            listen_addr,
            metrics_addr,
            segment,
        })
    }
}

/// Read an optional `u64` environment variable, falling back to `default`.
fn env_u64(name: &str, default: u64) -> Result<u64, String> {
    match std::env::var(name) {
        Ok(val) => val
            .parse::<u64>()
            .map_err(|e| format!("{name} is not a valid u64: {e}")),
        Err(_) => Ok(default),
    }
}

/// Initialize the global `tracing` subscriber with an `EnvFilter`.
///
/// Reads `RUST_LOG` for level filtering, defaulting to `"info"`. Uses
/// `try_init()` so repeated calls (e.g., across tests in one process) are a
/// silent no-op.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Waits for a shutdown signal: SIGINT on all platforms, plus SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
    }
}

#[tokio::main]
async fn main() {
    // 1. Initialize tracing.
    init_tracing();

    // 2. Read configuration from environment variables.
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(1);
        }
    };

    tracing::info!(data_dir = %config.data_dir.display(), "Data directory");
    tracing::info!(listen_addr = %config.listen_addr, "Listen address");

    // 3. Open the log and report what was recovered.
    let log_config = logkeep_db::Config {
        segment: config.segment.clone(),
    };
    let log = match Log::open(&config.data_dir, log_config) {
        Ok(log) => log,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open log");
            std::process::exit(1);
        }
    };
    tracing::info!(
        lowest_offset = log.lowest_offset(),
        highest_offset = log.highest_offset(),
        "Recovered log"
    );
    let log = Arc::new(log);

    // 4. Install the metrics recorder; serve it only when configured.
    let metrics_server = match logkeep_db::metrics::install_recorder() {
        Ok(handle) => config
            .metrics_addr
            .map(|addr| logkeep_db::metrics::serve_metrics(handle, addr)),
        Err(e) => {
            tracing::warn!(error = %e, "Metrics recorder not installed");
            None
        }
    };

    // 5. Spawn the appender task and build the service.
    let (append_handle, appender_task) =
        spawn_appender(Arc::clone(&log), APPENDER_CHANNEL_CAPACITY);
    let service = CommitLogService::new(append_handle.clone(), Arc::clone(&log));

    // 6. Bind and serve until a shutdown signal arrives.
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!(addr = %config.listen_addr, error = %e, "Failed to bind listener");
            std::process::exit(1);
        });
    let addr = listener
        .local_addr()
        .expect("bound listener should have a local address");
    let incoming = tokio_stream::wrappers::TcpListenerStream::new(listener);

    tracing::info!("Server listening on {addr}");

    tonic::transport::Server::builder()
        .add_service(CommitLogServer::new(service))
        .serve_with_incoming_shutdown(incoming, shutdown_signal())
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Server error");
            std::process::exit(1);
        });

    // 7. Shutdown sequence: stop the appender, then close the log so the
    // final buffered writes are flushed and synced.
    tracing::info!("Shutting down");
    drop(append_handle);
    appender_task
        .await
        .expect("appender task should exit without panicking");
    if let Some(server) = metrics_server {
        server.abort();
    }
    match Arc::try_unwrap(log) {
        Ok(log) => {
            if let Err(e) = log.close() {
                tracing::error!(error = %e, "Failed to close log");
                std::process::exit(1);
            }
        }
        Err(_) => tracing::warn!("Log still shared at shutdown, skipping close"),
    }
}
