use crate::runtime::config::SyncConfig;
use crate::runtime::status::StatusServer;
use crate::runtime::telemetry::{spawn_metrics_reporter, HealthReporter, Telemetry};
use crate::sync::{SyncDriver, SyncPolicy, SyncServices, TickOrchestrator};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Owns the sync loop, the status server and the metrics reporter, and stops
/// all three on SIGINT/SIGTERM.
pub struct Runner {
    config: SyncConfig,
    orchestrator: Arc<TickOrchestrator>,
    reporter: HealthReporter,
    shutdown: CancellationToken,
    status_addr: Option<SocketAddr>,
    sync_task: Option<JoinHandle<()>>,
    status_task: Option<JoinHandle<Result<()>>>,
    metrics_task: Option<JoinHandle<()>>,
}

impl Runner {
    pub fn new(config: SyncConfig, services: SyncServices) -> Self {
        let telemetry = Arc::new(Telemetry::default());
        let reporter = HealthReporter::new(telemetry.clone(), services.cursor.clone());
        let policy = SyncPolicy::from_config(&config);
        let orchestrator = Arc::new(TickOrchestrator::new(services, policy, telemetry));

        Self {
            config,
            orchestrator,
            reporter,
            shutdown: CancellationToken::new(),
            status_addr: None,
            sync_task: None,
            status_task: None,
            metrics_task: None,
        }
    }

    /// Root shutdown token; cancelling it stops every task the runner owns.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn health(&self) -> HealthReporter {
        self.reporter.clone()
    }

    /// Address the status server actually bound, once started.
    pub fn status_addr(&self) -> Option<SocketAddr> {
        self.status_addr
    }

    pub fn is_running(&self) -> bool {
        self.sync_task.is_some()
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        // A failure here is not fatal: every tick retries until the store answers.
        if let Err(err) = self.orchestrator.cursor().load().await {
            tracing::warn!(error = %err, "initial cursor load failed; retrying on next tick");
        }

        let server = StatusServer::bind(self.config.status_addr(), self.reporter.clone()).await?;
        self.status_addr = Some(server.local_addr()?);
        self.status_task = Some(tokio::spawn(server.serve(self.shutdown.clone())));

        self.metrics_task = Some(spawn_metrics_reporter(
            self.reporter.clone(),
            self.shutdown.clone(),
            self.config.metrics_interval(),
        ));

        let driver = SyncDriver::new(
            self.orchestrator.clone(),
            self.config.run_interval(),
            self.shutdown.clone(),
        );
        self.sync_task = Some(driver.spawn());

        tracing::info!(
            provider = %self.config.provider_url(),
            confirmation_lag = self.config.confirmation_lag(),
            epoch_start = self.config.epoch_start(),
            "runner started"
        );
        Ok(())
    }

    /// Cancels the root token and waits for every task. An in-flight tick
    /// finishes first.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }

        self.shutdown.cancel();

        if let Some(handle) = self.sync_task.take() {
            handle.await.context("sync loop task panicked")?;
        }
        if let Some(handle) = self.metrics_task.take() {
            handle.await.context("metrics reporter task panicked")?;
        }
        let status = match self.status_task.take() {
            Some(handle) => handle.await.context("status server task panicked")?,
            None => Ok(()),
        };

        self.status_addr = None;
        self.shutdown = CancellationToken::new();
        tracing::info!("runner stopped");
        status
    }

    /// Runs until SIGINT/SIGTERM or until the shutdown token is cancelled
    /// elsewhere.
    pub async fn run_until_signal(&mut self) -> Result<()> {
        self.start().await?;
        tracing::info!("waiting for SIGINT or SIGTERM to initiate shutdown");

        tokio::select! {
            signal = shutdown_signal() => {
                tracing::info!(signal, "signal received; shutting down runner");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("runner shutdown token cancelled");
            }
        }

        self.stop().await
    }
}

async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
