//! Shutdown signal handling.

use tokio::signal;
use tracing::{error, info};

/// Resolve when the process is asked to stop, returning the signal name.
///
/// A handler that cannot be installed never fires; the remaining signals
/// still work.
pub async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => "ctrl+c",
            Err(e) => {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                "sigterm"
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<&'static str>();

    let name = tokio::select! {
        name = ctrl_c => name,
        name = sigterm => name,
    };

    info!(signal = name, "Received shutdown signal");
    name
}
