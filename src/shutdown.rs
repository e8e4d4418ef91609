use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Fans a single termination request out to every stage and reports back
/// once the stages have released their resources.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    trigger: watch::Sender<bool>,
    complete: watch::Sender<bool>,
}

/// Read side of the cancellation signal, handed to the pump and the
/// connection manager.
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (trigger, _) = watch::channel(false);
        let (complete, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner { trigger, complete }),
        }
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.inner.trigger.subscribe(),
        }
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.inner.trigger.send_if_modified(|triggered| {
            if *triggered {
                false
            } else {
                info!("Shutdown requested");
                *triggered = true;
                true
            }
        });
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.trigger.borrow()
    }

    /// Mark shutdown as finished. Also releases [`wait`](Self::wait) when the
    /// worker stopped on its own, e.g. after a fatal error.
    pub fn complete(&self) {
        self.inner.complete.send_replace(true);
    }

    /// Block until [`complete`](Self::complete) has been called.
    pub async fn wait(&self) {
        let mut rx = self.inner.complete.subscribe();
        // Err only if the sender is gone, which cannot happen while `self` lives.
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Spawn a task that triggers shutdown on Ctrl+C or SIGTERM.
    pub fn listen_for_signals(&self) -> tokio::task::JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            wait_for_os_signal().await;
            coordinator.trigger();
        })
    }
}

#[cfg(unix)]
async fn wait_for_os_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        warn!("Failed to listen for Ctrl+C: {}", e);
                    }
                    info!("Received Ctrl+C");
                }
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_os_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
    }
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown has been requested. Cancel safe.
    pub async fn wait(&mut self) {
        if self.rx.wait_for(|triggered| *triggered).await.is_err() {
            // Coordinator dropped without triggering, nothing can fire any more.
            std::future::pending::<()>().await;
        }
    }
}
