//! Process lifecycle shared by the binaries: logging setup, signal handling
//! and ordered shutdown of the HTTP server and the background task.

use actix_web::dev::Server;
use anyhow::Context;
use std::future::Future;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// JSON logs filtered by `RUST_LOG`
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "pipeline_service=info,info".into()),
        )
        .with_target(false)
        .json()
        .init();
}

/// Long-running task tied to a cancellation token
pub struct BackgroundTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Spawn `make(token)` with a child of `parent`
    pub fn spawn<F, Fut>(name: &'static str, parent: &CancellationToken, make: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = parent.child_token();
        let handle = tokio::spawn(make(cancel.clone()));
        info!(task = name, "Background task spawned");
        Self {
            name,
            cancel,
            handle,
        }
    }

    /// Cancel and wait up to `grace` for the task to finish, aborting after
    pub async fn shutdown(self, grace: Duration) {
        self.cancel.cancel();
        let abort = self.handle.abort_handle();

        match timeout(grace, self.handle).await {
            Ok(Ok(())) => info!(task = self.name, "Background task shut down gracefully"),
            Ok(Err(e)) => warn!(task = self.name, error = %e, "Background task ended abnormally"),
            Err(_) => {
                warn!(
                    task = self.name,
                    grace_secs = grace.as_secs(),
                    "Background task did not stop within grace period, aborting"
                );
                abort.abort();
            }
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }

    info!("Shutting down gracefully...");
}

/// Drive `server` until a shutdown signal (or server exit), then stop the
/// background task before returning.
///
/// The server must be built with `disable_signals()` so this function owns
/// the shutdown order.
pub async fn run_until_shutdown(
    server: Server,
    background: Option<BackgroundTask>,
    root: CancellationToken,
    grace: Duration,
) -> anyhow::Result<()> {
    let handle = server.handle();
    tokio::pin!(server);

    let server_result = tokio::select! {
        result = &mut server => result,
        _ = shutdown_signal() => {
            root.cancel();
            let (_, result) = tokio::join!(handle.stop(true), &mut server);
            result
        }
    };
    root.cancel();

    if let Some(task) = background {
        task.shutdown(grace).await;
    }

    server_result.context("HTTP server failed")
}
