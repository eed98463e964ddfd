/// Resolves when the process receives SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    tokio::select! {
        _ = interrupt() => {},
        _ = terminate() => {},
    }
}

async fn interrupt() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(unix)]
async fn terminate() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");
    sigterm.recv().await;
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
