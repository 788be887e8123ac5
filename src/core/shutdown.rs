//! # OS signals that end a supervisor run.
//!
//! | platform | signals |
//! |---|---|
//! | unix | `SIGINT`, `SIGTERM` (systemd, Kubernetes), `SIGQUIT` |
//! | other | Ctrl-C |
//!
//! Listeners are installed per call, so a supervisor started later in the same
//! process gets its own.

/// Resolves with the name of the first termination signal received.
///
/// Fails only when the handlers cannot be installed.
#[cfg(unix)]
pub(crate) async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };
    Ok(name)
}

/// Resolves with the name of the first termination signal received.
///
/// Fails only when the handler cannot be installed.
#[cfg(not(unix))]
pub(crate) async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}
