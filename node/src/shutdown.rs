//! Shutdown coordination.
//!
//! The event loop, the signal listener and the console all hold a
//! [`ShutdownController`] receiver; whichever side decides to stop calls
//! [`ShutdownController::shutdown`] and every subscriber sees it.

use tokio::signal;
use tokio::sync::broadcast;

/// Broadcasts a single shutdown notification to all subscribers.
#[derive(Clone)]
pub struct ShutdownController {
    tx: broadcast::Sender<()>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger shutdown programmatically. Returns how many subscribers
    /// were listening.
    pub fn shutdown(&self) -> usize {
        self.tx.send(()).unwrap_or(0)
    }

    /// Wait for SIGINT or SIGTERM, then trigger shutdown.
    pub async fn wait_for_signal(&self) -> std::io::Result<()> {
        let ctrl_c = signal::ctrl_c();

        #[cfg(unix)]
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        #[cfg(unix)]
        let terminate = sigterm.recv();

        #[cfg(not(unix))]
        let terminate = std::future::pending::<Option<()>>();

        tokio::select! {
            res = ctrl_c => {
                res?;
                tracing::info!("received SIGINT, shutting down");
            }
            _ = terminate => { tracing::info!("received SIGTERM, shutting down"); }
        }

        self.shutdown();
        Ok(())
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}
