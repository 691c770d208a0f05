//! Status endpoint
//!
//! `GET /health` answers `{"status":"ok"}` while the consumer runs,
//! `GET /metrics` renders the prometheus registry.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::metrics::MetricsRegistry;

pub fn create_router(metrics: Arc<MetricsRegistry>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn render_metrics(State(metrics): State<Arc<MetricsRegistry>>) -> Response {
    match metrics.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// A running status server
#[derive(Debug)]
pub struct StatusServer {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StatusServer {
    /// Bind `0.0.0.0:port` and serve in the background; port 0 picks a free port
    ///
    /// The socket is listening when this returns.
    pub async fn bind(port: u16, metrics: Arc<MetricsRegistry>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = create_router(metrics);

        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                error!(error = %e, "Status server error");
            }
        });
        info!(addr = %local_addr, "Status endpoint listening");

        Ok(Self {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for the server task; safe to call twice
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Status server task failed");
            }
            info!(addr = %self.local_addr, "Status endpoint closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn get_path(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", addr.port())).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let metrics = Arc::new(MetricsRegistry::new().unwrap());
        metrics.dispatcher().record_valid("send-email", 2);
        let mut server = StatusServer::bind(0, metrics).await.unwrap();

        let health = get_path(server.local_addr(), "/health").await;
        assert!(health.starts_with("HTTP/1.1 200"));
        assert!(health.contains(r#"{"status":"ok"}"#));

        let rendered = get_path(server.local_addr(), "/metrics").await;
        assert!(rendered.contains("dispatcher_valid_jobs"));

        server.shutdown().await;
        server.shutdown().await;
        assert!(TcpStream::connect(("127.0.0.1", server.local_addr().port())).await.is_err());
    }
}
