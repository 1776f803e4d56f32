//! Cooperative shutdown and reload
//!
//! Signal handlers only flip flags here. The monitoring loop polls them at the
//! top of each iteration and wakes from its inter-iteration sleep when a
//! shutdown is requested.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::Result;

/// Control requests delivered to the monitoring loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Finish the current iteration, then exit (SIGTERM, SIGINT)
    Shutdown,
    /// Re-read configuration at the top of the next iteration (SIGHUP)
    Reload,
}

impl std::fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlSignal::Shutdown => write!(f, "shutdown"),
            ControlSignal::Reload => write!(f, "reload"),
        }
    }
}

/// Sending side, held by the daemon controller and the signal tasks
#[derive(Clone)]
pub struct LoopControl {
    shutdown_tx: Arc<watch::Sender<bool>>,
    reload_requested: Arc<AtomicBool>,
}

impl Default for LoopControl {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopControl {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx: Arc::new(shutdown_tx),
            reload_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn request(&self, signal: ControlSignal) {
        match signal {
            ControlSignal::Shutdown => {
                if self.shutdown_tx.send_replace(true) {
                    warn!("Shutdown already requested, ignoring duplicate signal");
                } else {
                    info!("Shutdown requested; finishing current iteration");
                }
            }
            ControlSignal::Reload => {
                self.reload_requested.store(true, Ordering::SeqCst);
                info!("Configuration reload requested");
            }
        }
    }

    pub fn request_shutdown(&self) {
        self.request(ControlSignal::Shutdown);
    }

    pub fn request_reload(&self) {
        self.request(ControlSignal::Reload);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Receiving side for the monitoring loop
    pub fn handle(&self) -> ControlHandle {
        ControlHandle {
            shutdown_rx: self.shutdown_tx.subscribe(),
            reload_requested: self.reload_requested.clone(),
        }
    }
}

/// Receiving side, owned by the monitoring loop
pub struct ControlHandle {
    shutdown_rx: watch::Receiver<bool>,
    reload_requested: Arc<AtomicBool>,
}

impl ControlHandle {
    pub fn is_shutdown_requested(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Consume a pending reload request
    pub fn take_reload_request(&self) -> bool {
        self.reload_requested.swap(false, Ordering::SeqCst)
    }

    /// Sleep for `duration`, returning early (with `true`) on shutdown
    pub async fn sleep_or_shutdown(&mut self, duration: Duration) -> bool {
        if self.is_shutdown_requested() {
            return true;
        }
        let shutdown_rx = &mut self.shutdown_rx;
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = async {
                loop {
                    // A dropped sender also ends the wait; nobody is left to stop us otherwise
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            } => true,
        }
    }
}

/// Install OS signal handlers that feed `control`
pub fn install_signal_handlers(control: LoopControl) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sighup = signal(SignalKind::hangup())?;

        let shutdown = control.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(()) = sigterm.recv() => {
                        info!("Received SIGTERM");
                        shutdown.request_shutdown();
                    }
                    Some(()) = sigint.recv() => {
                        info!("Received SIGINT");
                        shutdown.request_shutdown();
                    }
                    else => break,
                }
            }
        });

        tokio::spawn(async move {
            while sighup.recv().await.is_some() {
                info!("Received SIGHUP");
                control.request_reload();
            }
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C");
                control.request_shutdown();
            }
        });
    }

    Ok(())
}
