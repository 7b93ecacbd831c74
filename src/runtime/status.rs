//! Read-only HTTP status surface.

use crate::runtime::telemetry::{HealthReporter, HealthSnapshot};
use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub struct StatusServer {
    listener: TcpListener,
    reporter: HealthReporter,
}

impl StatusServer {
    pub async fn bind(addr: SocketAddr, reporter: HealthReporter) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind status server on {addr}"))?;
        Ok(Self { listener, reporter })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("status server has no local address")
    }

    pub fn router(reporter: HealthReporter) -> Router {
        Router::new()
            .route("/", get(cursor_text))
            .route("/status", get(status_json))
            .with_state(reporter)
    }

    /// Serves until `shutdown` is cancelled.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let addr = self.local_addr()?;
        tracing::info!(%addr, "status server listening");

        axum::serve(self.listener, Self::router(self.reporter))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .context("status server failed")?;

        tracing::info!("status server stopped");
        Ok(())
    }
}

async fn cursor_text(State(reporter): State<HealthReporter>) -> String {
    match reporter.start_block() {
        Some(start) => format!("Cursor: {start}"),
        None => "Cursor: not loaded".to_owned(),
    }
}

async fn status_json(State(reporter): State<HealthReporter>) -> Json<HealthSnapshot> {
    Json(reporter.snapshot())
}
