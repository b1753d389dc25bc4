use tokio::sync::watch;
use tracing::info;

/// Install SIGINT/SIGTERM handlers that flip the shutdown flag.
#[cfg(unix)]
pub fn install(shutdown: watch::Sender<bool>) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
        let _ = shutdown.send(true);
    });
    Ok(())
}

#[cfg(not(unix))]
pub fn install(shutdown: watch::Sender<bool>) -> std::io::Result<()> {
    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("received Ctrl+C");
            let _ = shutdown.send(true);
        }
    });
    Ok(())
}
