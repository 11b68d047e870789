//! Orderly shutdown broadcaster.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

/// Broadcasts a single shutdown signal to every task that subscribed.
#[derive(Clone)]
pub struct GrimReaper {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for GrimReaper {
    fn default() -> Self {
        Self::new()
    }
}

impl GrimReaper {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.tx.borrow()
    }

    /// Requests shutdown. Later requests are no-ops.
    pub fn shutdown(&self, reason: &str) {
        let first = self.tx.send_if_modified(|down| {
            if *down {
                false
            } else {
                *down = true;
                true
            }
        });
        if first {
            info!(reason, "shutdown requested");
        }
    }

    /// Resolves once shutdown was requested.
    pub async fn reaped(&self) {
        let mut rx = self.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Turns SIGINT and SIGTERM into a shutdown request.
    pub fn watch_signals(&self) {
        let reaper = self.clone();
        tokio::spawn(async move {
            let ctrl_c = async {
                if let Err(err) = signal::ctrl_c().await {
                    error!(%err, "failed to install Ctrl+C handler");
                    std::future::pending::<()>().await;
                }
            };

            #[cfg(unix)]
            let terminate = async {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut stream) => {
                        stream.recv().await;
                    }
                    Err(err) => {
                        error!(%err, "failed to install SIGTERM handler");
                        std::future::pending::<()>().await;
                    }
                }
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => reaper.shutdown("interrupt"),
                _ = terminate => reaper.shutdown("terminate"),
                _ = reaper.reaped() => {}
            }
        });
    }
}
