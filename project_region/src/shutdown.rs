use tokio::sync::watch;

/// Why the region is going down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCause {
    /// An OS signal, by name.
    Signal(&'static str),
    /// The tick loop ran its configured number of ticks.
    TickLimit { ticks: u64 },
}

impl std::fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownCause::Signal(name) => write!(f, "received {name}"),
            ShutdownCause::TickLimit { ticks } => write!(f, "tick limit reached after {ticks} ticks"),
        }
    }
}

/// Triggers shutdown. Held by the signal task and the region thread; the
/// first cause sticks.
#[derive(Clone)]
pub struct ShutdownTx(watch::Sender<Option<ShutdownCause>>);

/// Observed by the region thread (polling) and request tasks (awaiting).
#[derive(Clone)]
pub struct ShutdownRx(watch::Receiver<Option<ShutdownCause>>);

pub fn shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(None);
    (ShutdownTx(tx), ShutdownRx(rx))
}

impl ShutdownTx {
    /// Returns false if shutdown was already under way.
    pub fn trigger(&self, cause: ShutdownCause) -> bool {
        let first = self.0.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(cause);
            true
        });
        if first {
            tracing::info!(%cause, "region shutting down");
        }
        first
    }
}

impl ShutdownRx {
    /// Wait for shutdown. `None` if every sender is gone without a cause.
    pub async fn wait(&mut self) -> Option<ShutdownCause> {
        match self.0.wait_for(Option::is_some).await {
            Ok(cause) => *cause,
            Err(_) => None,
        }
    }

    /// Polled by the region tick thread between ticks.
    pub fn is_shutdown(&self) -> bool {
        self.0.borrow().is_some()
    }

    pub fn cause(&self) -> Option<ShutdownCause> {
        *self.0.borrow()
    }
}

/// Wait for SIGINT or SIGTERM (Unix) or Ctrl+C (elsewhere). Never returns if
/// no handler can be registered.
#[cfg(unix)]
pub async fn wait_for_signal() -> ShutdownCause {
    use tokio::signal::unix::{signal, SignalKind};
    let (mut sigint, mut sigterm) = match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
        (Ok(i), Ok(t)) => (i, t),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!("failed to register signal handlers: {}", e);
            return std::future::pending().await;
        }
    };
    tokio::select! {
        _ = sigint.recv() => ShutdownCause::Signal("SIGINT"),
        _ = sigterm.recv() => ShutdownCause::Signal("SIGTERM"),
    }
}

#[cfg(not(unix))]
pub async fn wait_for_signal() -> ShutdownCause {
    match tokio::signal::ctrl_c().await {
        Ok(()) => ShutdownCause::Signal("Ctrl+C"),
        Err(e) => {
            tracing::error!("failed to listen for ctrl-c: {}", e);
            std::future::pending().await
        }
    }
}
