use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Notify;

/// Process-wide shutdown signal. `install` hooks Ctrl-C and the panic
/// handler; the supervising task awaits `wait` and tears the process down.
pub struct ShutdownGuard {
    requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownGuard {
    pub fn install() -> Self {
        let requested = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());

        let requested_signal = Arc::clone(&requested);
        let notify_signal = Arc::clone(&notify);
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_err() {
                tracing::error!("failed to install Ctrl-C handler");
                return;
            }
            tracing::info!("shutdown requested via Ctrl-C");
            requested_signal.store(true, Ordering::SeqCst);
            // notify_one stores a permit, so a waiter that registers later
            // still wakes up.
            notify_signal.notify_one();
        });

        let original_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |panic_info| {
            tracing::error!("PANIC: {}", panic_info);
            original_panic(panic_info);
        }));

        Self { requested, notify }
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        if self.is_shutdown_requested() {
            return;
        }
        self.notify.notified().await;
    }

    pub fn request_shutdown(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_completes_after_request() {
        let guard = ShutdownGuard::install();
        assert!(!guard.is_shutdown_requested());

        guard.request_shutdown();
        assert!(guard.is_shutdown_requested());

        tokio::time::timeout(Duration::from_secs(1), guard.wait())
            .await
            .expect("wait should resolve once shutdown is requested");
    }
}
