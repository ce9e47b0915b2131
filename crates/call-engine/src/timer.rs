//! Cancellable one-shot timers

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// What an armed timer is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Outbound SIP call to be answered
    SipAnswer,
    /// Cellular dial to go active
    CellularDial,
    /// Answered cellular call to go active
    CellularAnswer,
}

impl TimerKind {
    /// Teardown reason when the timer fires
    pub fn reason(self) -> &'static str {
        match self {
            TimerKind::SipAnswer => "SIP call timed out",
            TimerKind::CellularDial => "cellular dial timed out",
            TimerKind::CellularAnswer => "cellular answer timed out",
        }
    }
}

/// Handle to a spawned one-shot timer
///
/// Dropping or cancelling the handle prevents the callback from running if
/// it has not started yet. A callback that already started must still check
/// that it is current, see [`TimerHandle::id`].
#[derive(Debug)]
pub struct TimerHandle {
    id: u64,
    kind: TimerKind,
    cancel: CancellationToken,
}

impl TimerHandle {
    /// Run `on_fire` after `delay` unless cancelled first
    pub fn spawn<F>(id: u64, kind: TimerKind, delay: Duration, on_fire: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => on_fire.await,
            }
        });
        Self { id, kind, cancel }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let _timer = TimerHandle::spawn(1, TimerKind::SipAnswer, Duration::from_secs(30), async move {
            flag.store(true, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(!fired.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let timer = TimerHandle::spawn(2, TimerKind::CellularDial, Duration::from_secs(45), async move {
            flag.store(true, Ordering::SeqCst);
        });
        assert_eq!(timer.kind(), TimerKind::CellularDial);
        drop(timer);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}
