//! Silence watchdog for a connected-but-quiet SSE stream.
//!
//! Detects the case where the stream neither errors nor closes (proxy
//! buffering, dead TCP half-close, slow provider). One single-shot timer
//! per turn: every parsed chunk pushes the deadline; if the deadline
//! passes, the fire callback runs exactly once. The SSE connection itself
//! is left open -- firing only activates the poll fallback.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::time::{Duration, Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::debug;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Single-shot inactivity timer for one in-flight message.
///
/// Created armed; disarmed by cancelling either its own handle or the
/// parent turn token it was armed under.
#[derive(Debug)]
pub struct SilenceWatchdog {
    deadline: Arc<Mutex<Instant>>,
    timeout: Duration,
    cancel: CancellationToken,
}

impl SilenceWatchdog {
    /// Arm the watchdog. `on_fire` runs once if `timeout` elapses with no
    /// intervening `reset()`. Cancelling `parent` disarms it.
    pub fn arm<F>(timeout: Duration, parent: &CancellationToken, on_fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let cancel = parent.child_token();
        let deadline = Arc::new(Mutex::new(Instant::now() + timeout));

        let task_cancel = cancel.clone();
        let task_deadline = Arc::clone(&deadline);
        tokio::spawn(async move {
            let mut on_fire = Some(on_fire);
            loop {
                let until = *lock(&task_deadline);
                tokio::select! {
                    _ = task_cancel.cancelled() => return,
                    _ = sleep_until(until) => {
                        // The deadline may have been pushed while asleep.
                        if *lock(&task_deadline) <= Instant::now() {
                            debug!("silence watchdog fired");
                            if let Some(fire) = on_fire.take() {
                                fire();
                            }
                            return;
                        }
                    }
                }
            }
        });

        Self {
            deadline,
            timeout,
            cancel,
        }
    }

    /// Push the deadline out by the full timeout (a sign of life arrived).
    pub fn reset(&self) {
        *lock(&self.deadline) = Instant::now() + self.timeout;
    }

    /// Disarm without firing. Idempotent.
    pub fn disarm(&self) {
        self.cancel.cancel();
    }
}

impl Drop for SilenceWatchdog {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time::advance;

    fn armed(timeout_ms: u64) -> (SilenceWatchdog, Arc<AtomicBool>, CancellationToken) {
        let fired = Arc::new(AtomicBool::new(false));
        let fired_flag = Arc::clone(&fired);
        let parent = CancellationToken::new();
        let watchdog = SilenceWatchdog::arm(Duration::from_millis(timeout_ms), &parent, move || {
            fired_flag.store(true, Ordering::SeqCst);
        });
        (watchdog, fired, parent)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_timeout() {
        let (_watchdog, fired, _parent) = armed(100);

        advance(Duration::from_millis(101)).await;
        tokio::task::yield_now().await;

        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_defers_firing() {
        let (watchdog, fired, _parent) = armed(100);

        advance(Duration::from_millis(90)).await;
        watchdog.reset();
        advance(Duration::from_millis(90)).await;
        tokio::task::yield_now().await;
        assert!(!fired.load(Ordering::SeqCst));

        advance(Duration::from_millis(20)).await;
        tokio::task::yield_now().await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_prevents_firing() {
        let (watchdog, fired, _parent) = armed(100);

        watchdog.disarm();
        advance(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;

        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_disarms() {
        let (_watchdog, fired, parent) = armed(100);

        parent.cancel();
        advance(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;

        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_only() {
        let fired = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = Arc::clone(&fired);
        let parent = CancellationToken::new();
        let _watchdog = SilenceWatchdog::arm(Duration::from_millis(50), &parent, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        advance(Duration::from_millis(500)).await;
        tokio::task::yield_now().await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
