//! Prometheus metrics infrastructure for LogkeepDB.
//!
//! Installs a process-global metrics recorder and serves the rendered output
//! in Prometheus exposition format on a configurable socket address. The
//! counters themselves fire from the service and appender paths via the
//! `metrics` macros; without an installed recorder they are no-ops.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::task::JoinHandle;

/// Error type for metrics installation.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The global metrics recorder has already been installed.
    #[error("metrics recorder already installed")]
    AlreadyInstalled,
}

/// Handle to the installed Prometheus metrics recorder.
///
/// Cheaply cloneable; renders the current metrics snapshot on demand.
#[derive(Clone, Debug)]
pub struct MetricsHandle {
    inner: Arc<PrometheusHandle>,
}

impl MetricsHandle {
    /// Render the current metrics snapshot in Prometheus exposition format.
    pub fn render(&self) -> String {
        self.inner.render()
    }
}

/// Guard so the global recorder is installed at most once per process.
///
/// `install_recorder()` can panic on double-install in some exporter
/// versions; the `OnceLock` makes repeat calls safe, which matters when
/// several tests share one process.
static RECORDER_HANDLE: std::sync::OnceLock<MetricsHandle> = std::sync::OnceLock::new();

/// Install the global Prometheus metrics recorder.
///
/// Call once at startup before any `metrics` macros fire. A second call in
/// the same process returns [`MetricsError::AlreadyInstalled`].
pub fn install_recorder() -> Result<MetricsHandle, MetricsError> {
    let mut was_set = false;
    let handle = RECORDER_HANDLE.get_or_init(|| {
        was_set = true;
        let prom_handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("PrometheusBuilder::install_recorder should succeed on first call");
        MetricsHandle {
            inner: Arc::new(prom_handle),
        }
    });

    if was_set {
        Ok(handle.clone())
    } else {
        Err(MetricsError::AlreadyInstalled)
    }
}

/// Returns the previously installed [`MetricsHandle`], if any.
///
/// Useful in tests where another test in the same process may have already
/// installed the recorder.
pub fn get_installed_handle() -> Option<MetricsHandle> {
    RECORDER_HANDLE.get().cloned()
}

/// Spawn an axum HTTP server that serves the snapshot at `GET /metrics`.
///
/// Binds with `tokio::net::TcpListener` inside a spawned task (no new
/// runtime). On bind failure, logs an error and returns a `JoinHandle` that
/// resolves immediately.
pub fn serve_metrics(handle: MetricsHandle, addr: SocketAddr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let app = Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move {
                    let body = h.render();
                    (
                        [(
                            axum::http::header::CONTENT_TYPE,
                            "text/plain; version=0.0.4",
                        )],
                        body,
                    )
                }
            }),
        );

        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(addr = %addr, error = %e, "Failed to bind metrics listener");
                return;
            }
        };

        let bound_addr = listener
            .local_addr()
            .expect("bound listener should have a local address");
        tracing::info!(addr = %bound_addr, "Metrics server listening");

        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Metrics server error");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn install_recorder_twice_returns_already_installed() {
        let result = install_recorder();
        assert!(result.is_ok(), "first install_recorder() should return Ok");

        let result = install_recorder();
        let err = result.expect_err("second install_recorder() should return Err");
        assert!(
            matches!(err, MetricsError::AlreadyInstalled),
            "error should be AlreadyInstalled, got: {err:?}"
        );
    }

    #[tokio::test]
    async fn serve_metrics_stays_running() {
        // Another test in this process may have installed the recorder
        // already; either way a handle is available afterwards.
        let _ = install_recorder();
        let handle = get_installed_handle().expect("recorder should be installed");

        let join_handle = serve_metrics(handle, "127.0.0.1:0".parse().unwrap());

        // The server task should still be running after a short wait.
        let timeout_result = tokio::time::timeout(Duration::from_millis(20), join_handle).await;
        assert!(
            timeout_result.is_err(),
            "serve_metrics task should still be running after 20ms"
        );
    }

    #[tokio::test]
    async fn render_includes_registered_counters() {
        let _ = install_recorder();
        let handle = get_installed_handle().expect("recorder should be installed");

        metrics::counter!("logkeep_appends_total").increment(1);
        let body = handle.render();
        assert!(
            body.contains("logkeep_appends_total"),
            "expected counter in rendered output: {body}"
        );
    }
}
