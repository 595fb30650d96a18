//! Graceful shutdown: one cancellation token fanned out to the listener,
//! the health loop and the gRPC proxy, fired by SIGINT/SIGTERM.

use eyre::Result;
use tokio::signal;
use tokio_util::sync::CancellationToken;

pub struct GracefulShutdown {
    token: CancellationToken,
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl GracefulShutdown {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// The root token; children derived from it die with it.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Manually trigger shutdown (useful in tests and embedding).
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Block on SIGINT/SIGTERM, then cancel the root token.
    pub async fn run_signal_handler(&self) -> Result<()> {
        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = wait_for_sigterm() => {
                tracing::info!("received SIGTERM, shutting down");
            }
        }

        self.token.cancel();
        Ok(())
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    sigterm.recv().await;
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_cancels_children() {
        let shutdown = GracefulShutdown::new();
        let child = shutdown.token().child_token();

        assert!(!child.is_cancelled());
        shutdown.trigger();
        assert!(child.is_cancelled());
    }
}
