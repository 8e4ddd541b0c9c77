//! Operator interrupt handling.
//!
//! [`listen`] turns SIGINT/SIGTERM into cancellation of a [`CancelScope`]
//! and then waits until every decoder watcher in that scope has finished, so
//! no decoder subprocess outlives an orderly shutdown.

use vf_av::CancelScope;

/// Wait for a shutdown signal (SIGINT or SIGTERM) or for the scope to be
/// cancelled by other means, then drain the scope.
pub async fn listen(scope: CancelScope) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Shutdown signal received"),
        _ = terminate => tracing::info!("Shutdown signal received"),
        _ = scope.token().cancelled() => tracing::debug!("Cancel scope triggered"),
    }

    let active = scope.active_watchers();
    scope.shutdown().await;
    tracing::info!("Stopped {active} decoder watchers");
}
