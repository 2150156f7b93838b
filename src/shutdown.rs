//! Cooperative shutdown for background loops

use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Sender half; send `true` to stop every loop holding a receiver
pub type ShutdownTx = watch::Sender<bool>;
pub type ShutdownRx = watch::Receiver<bool>;

pub fn channel() -> (ShutdownTx, ShutdownRx) {
    watch::channel(false)
}

pub fn is_requested(rx: &ShutdownRx) -> bool {
    *rx.borrow()
}

/// Sleep for `duration` unless shutdown is requested first.
///
/// Returns true when the caller should stop.
pub async fn sleep_or_stop(duration: Duration, rx: &mut ShutdownRx) -> bool {
    if is_requested(rx) {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        changed = rx.changed() => changed.is_err() || is_requested(rx),
    }
}

/// Flip `tx` on Ctrl-C or SIGTERM
pub async fn signal_on_interrupt(tx: ShutdownTx) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Shutting down");
    let _ = tx.send(true);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_completes_without_shutdown() {
        let (_tx, mut rx) = channel();
        assert!(!sleep_or_stop(Duration::from_millis(5), &mut rx).await);
    }

    #[tokio::test]
    async fn test_sleep_interrupted_by_shutdown() {
        let (tx, mut rx) = channel();
        let handle = tokio::spawn(async move { sleep_or_stop(Duration::from_secs(60), &mut rx).await });
        tx.send(true).unwrap();

        let stopped = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(stopped);
    }

    #[tokio::test]
    async fn test_dropped_sender_stops() {
        let (tx, mut rx) = channel();
        drop(tx);
        assert!(sleep_or_stop(Duration::from_secs(60), &mut rx).await);
    }
}
