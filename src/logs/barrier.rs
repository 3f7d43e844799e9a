//! # Startup Barrier
//!
//! Counts the workers spawned for peers that were present when a feed was
//! built ("starters") and fires once every one of them has either found
//! its peer's newest entry or seen the peer leave. A feed with no starters
//! is ready immediately.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::errors::{LogsError, LogsResult};

/// One-shot countdown latch
#[derive(Debug)]
pub struct StartupBarrier {
    remaining: AtomicUsize,
    done: watch::Sender<bool>,
}

impl StartupBarrier {
    /// Barrier waiting for `starters` arrivals
    pub fn new(starters: usize) -> Self {
        let (done, _) = watch::channel(starters == 0);
        Self {
            remaining: AtomicUsize::new(starters),
            done,
        }
    }

    /// Record one starter reaching its started (or gone) state
    pub fn arrive(&self) {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.done.send_replace(true);
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    /// Wait for the barrier, or for `cancel`
    pub async fn wait(&self, cancel: &CancellationToken) -> LogsResult<()> {
        let mut rx = self.done.subscribe();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LogsError::Interrupted),
            result = rx.wait_for(|done| *done) => {
                // The sender lives as long as `self`, so this cannot be closed.
                result.map(|_| ()).map_err(|_| LogsError::Interrupted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_zero_starters_fires_immediately() {
        let barrier = StartupBarrier::new(0);
        assert!(barrier.is_done());
        barrier.wait(&CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_fires_on_last_arrival() {
        let barrier = StartupBarrier::new(3);
        barrier.arrive();
        barrier.arrive();
        assert!(!barrier.is_done());
        assert_eq!(barrier.remaining(), 1);
        barrier.arrive();
        assert!(barrier.is_done());
        barrier.wait(&CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_extra_arrivals_do_not_underflow() {
        let barrier = StartupBarrier::new(1);
        barrier.arrive();
        barrier.arrive();
        assert_eq!(barrier.remaining(), 0);
        assert!(barrier.is_done());
    }

    #[tokio::test]
    async fn test_waiter_woken_from_other_task() {
        let barrier = Arc::new(StartupBarrier::new(2));
        let b = Arc::clone(&barrier);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            b.arrive();
            b.arrive();
        });
        tokio::time::timeout(Duration::from_secs(5), barrier.wait(&CancellationToken::new()))
            .await
            .expect("barrier should fire")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_is_cancellable() {
        let barrier = StartupBarrier::new(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(barrier.wait(&cancel).await, Err(LogsError::Interrupted));
    }
}
