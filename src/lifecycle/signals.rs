//! Signal channels driving the orchestrator.
//!
//! # Design Decisions
//! - Every channel holds one pending signal; a second reload while one is
//!   queued is dropped, which coalesces bursts of file changes
//! - SIGHUP triggers config reload, not shutdown
//! - A configuration file change raises the same reload signal as SIGHUP

use tokio::sync::mpsc::{self, error::TrySendError};

/// Receiving side, owned by the orchestrator.
pub struct Signals {
    pub(crate) start: mpsc::Receiver<()>,
    pub(crate) reload: mpsc::Receiver<()>,
    pub(crate) close: mpsc::Receiver<()>,
}

/// Cloneable sending side, handed to OS signal forwarding, the config
/// watcher and tests.
#[derive(Debug, Clone)]
pub struct SignalHandle {
    start: mpsc::Sender<()>,
    reload: mpsc::Sender<()>,
    close: mpsc::Sender<()>,
}

/// Create a connected pair of signal channels.
pub fn channel() -> (SignalHandle, Signals) {
    let (start_tx, start_rx) = mpsc::channel(1);
    let (reload_tx, reload_rx) = mpsc::channel(1);
    let (close_tx, close_rx) = mpsc::channel(1);
    (
        SignalHandle {
            start: start_tx,
            reload: reload_tx,
            close: close_tx,
        },
        Signals {
            start: start_rx,
            reload: reload_rx,
            close: close_rx,
        },
    )
}

fn offer(tx: &mpsc::Sender<()>, signal: &'static str) -> bool {
    match tx.try_send(()) {
        Ok(()) => true,
        Err(TrySendError::Full(())) => {
            tracing::debug!(signal, "signal already pending");
            true
        }
        Err(TrySendError::Closed(())) => {
            tracing::debug!(signal, "signal ignored, lifecycle has stopped");
            false
        }
    }
}

impl SignalHandle {
    /// Only honoured while idle; a running orchestrator ignores it.
    /// Returns false once the orchestrator has stopped listening.
    pub fn start(&self) -> bool {
        offer(&self.start, "start")
    }

    pub fn reload(&self) -> bool {
        offer(&self.reload, "reload")
    }

    pub fn close(&self) -> bool {
        offer(&self.close, "close")
    }
}

impl Signals {
    /// Stop accepting signals. Pending ones are discarded.
    pub(crate) fn close_all(&mut self) {
        self.start.close();
        self.reload.close();
        self.close.close();
    }
}

/// Forward OS signals to `handle` until the orchestrator stops.
///
/// SIGHUP maps to reload; SIGINT, SIGQUIT and SIGTERM map to close.
#[cfg(unix)]
pub async fn forward_os_signals(handle: SignalHandle) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut quit = signal(SignalKind::quit())?;
    let mut terminate = signal(SignalKind::terminate())?;

    loop {
        let open = tokio::select! {
            _ = hangup.recv() => {
                tracing::info!("SIGHUP received, reloading");
                handle.reload()
            }
            _ = interrupt.recv() => {
                tracing::info!("SIGINT received, shutting down");
                handle.close()
            }
            _ = quit.recv() => {
                tracing::info!("SIGQUIT received, shutting down");
                handle.close()
            }
            _ = terminate.recv() => {
                tracing::info!("SIGTERM received, shutting down");
                handle.close()
            }
        };
        if !open {
            return Ok(());
        }
    }
}

#[cfg(not(unix))]
pub async fn forward_os_signals(handle: SignalHandle) -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("Ctrl-C received, shutting down");
    handle.close();
    Ok(())
}
