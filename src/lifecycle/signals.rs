//! OS signal handling.
//!
//! # Responsibilities
//! - Master: turn the first SIGINT into a shutdown trigger; a second one
//!   gets the default action, so a hung shutdown can still be interrupted
//! - Worker: swallow SIGINT so a terminal Ctrl+C (sent to the whole process
//!   group) does not kill workers ahead of the master's ordered shutdown
//!
//! No other signals are handled; SIGTERM keeps its default action.

use nix::sys::signal::{signal, SigHandler, Signal};
use tokio::task::JoinHandle;

use crate::lifecycle::Shutdown;

/// Wait for SIGINT, then trigger `shutdown`. Also returns if shutdown is triggered elsewhere.
pub async fn shutdown_on_interrupt(shutdown: Shutdown) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => {
                tracing::info!("Interrupt received, shutting down");
                restore_default_interrupt();
                shutdown.trigger();
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install interrupt handler");
                shutdown.wait().await;
            }
        },
        _ = shutdown.wait() => {}
    }
}

fn restore_default_interrupt() {
    // SAFETY: SIG_DFL runs no handler code in this process.
    if let Err(e) = unsafe { signal(Signal::SIGINT, SigHandler::SigDfl) } {
        tracing::warn!(error = %e, "Failed to restore default interrupt action");
    }
}

/// Keep SIGINT from terminating this process.
pub fn ignore_interrupts() -> JoinHandle<()> {
    tokio::spawn(async {
        loop {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::debug!("Interrupt ignored in worker"),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to install interrupt handler");
                    return;
                }
            }
        }
    })
}
