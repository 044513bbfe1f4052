// SPDX-License-Identifier: MIT OR Apache-2.0
//! SIGINT/SIGTERM wiring.

use arb_provider::CancellationToken;
use tokio::task::JoinHandle;
use tracing::info;

/// Installs interrupt handlers on construction and removes them on
/// drop, so no handler outlives the orchestrator call that created it.
pub struct SignalGuard {
    handle: Option<JoinHandle<()>>,
}

impl SignalGuard {
    /// Spawn a watcher that sets `stop` when the process is
    /// interrupted.
    #[must_use]
    pub fn install(stop: CancellationToken) -> Self {
        let handle = tokio::spawn(async move {
            let interrupted = wait_for_interrupt().await;
            if interrupted {
                info!("interrupt received, draining current batch");
                stop.cancel();
            }
        });
        Self {
            handle: Some(handle),
        }
    }

    /// A guard that never fires (tests, embedded use).
    #[must_use]
    pub fn disabled() -> Self {
        Self { handle: None }
    }
}

#[cfg(unix)]
async fn wait_for_interrupt() -> bool {
    use tokio::signal::unix::{SignalKind, signal};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(_) => return tokio::signal::ctrl_c().await.is_ok(),
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.is_ok(),
        _ = term.recv() => true,
    }
}

#[cfg(not(unix))]
async fn wait_for_interrupt() -> bool {
    tokio::signal::ctrl_c().await.is_ok()
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
