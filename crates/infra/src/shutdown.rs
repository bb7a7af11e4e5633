use tokio_util::sync::CancellationToken;

/// Install a shutdown handler for SIGTERM and SIGINT (Ctrl-C elsewhere).
///
/// Returns a `CancellationToken` that is cancelled when a signal arrives.
/// Cancellation is a request: the poll loop observes it at its next boundary
/// and never aborts a running command.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        token_clone.cancel();
    });

    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "failed to install unix signal handlers; using ctrl-c");
                wait_for_ctrl_c().await;
                return;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM, finishing current job before shutdown");
        }
        _ = sigint.recv() => {
            tracing::info!("received SIGINT, finishing current job before shutdown");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received ctrl-c, finishing current job before shutdown"),
        Err(e) => {
            // Without a signal source the token is only cancelled by the store.
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    }
}
