use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// A counting barrier: waiters are released once `unblock` was called `count` times.
///
/// Unlike `tokio::sync::Barrier` the parties releasing it are not the ones
/// waiting, typically response callbacks release a caller awaiting them.
#[derive(Debug)]
pub struct Barrier {
    count: Mutex<isize>,
    notify: Notify,
}

impl Barrier {
    /// Creates a new `Barrier`.
    ///
    /// # Arguments
    /// * `count` - The amount of `unblock` calls needed to release the waiters.
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count as isize),
            notify: Notify::new(),
        }
    }

    /// Re-arms the barrier with a new count.
    pub fn reset(&self, count: usize) {
        *self.count.lock() = count as isize;
    }

    /// Decrements the count, releasing every waiter when it reaches zero.
    ///
    /// # Panics
    /// If the barrier was already released.
    pub fn unblock(&self) {
        let mut count = self.count.lock();
        assert!(*count > 0, "barrier unblocked below zero");

        *count -= 1;
        if *count == 0 {
            self.notify.notify_waiters();
        }
    }

    pub fn is_released(&self) -> bool {
        *self.count.lock() <= 0
    }

    /// Waits until the count reaches zero.
    pub async fn block(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_released() {
                return;
            }

            notified.await;
        }
    }

    /// Waits until the count reaches zero or `timeout` elapses.
    ///
    /// # Returns
    /// Whether the barrier was released in time.
    pub async fn block_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.block()).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_zero_count_does_not_block() {
        let barrier = Barrier::new(0);
        barrier.block().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_released_after_count_unblocks() {
        let barrier = Arc::new(Barrier::new(3));

        for _ in 0..3 {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.unblock() });
        }

        assert!(barrier.block_timeout(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_timeout_and_reset() {
        let barrier = Barrier::new(2);
        barrier.unblock();
        assert!(!barrier.block_timeout(Duration::from_millis(20)).await);

        barrier.reset(1);
        barrier.unblock();
        assert!(barrier.block_timeout(Duration::from_millis(20)).await);
    }

    #[test]
    #[should_panic(expected = "below zero")]
    fn test_unblock_below_zero_panics() {
        let barrier = Barrier::new(1);
        barrier.unblock();
        barrier.unblock();
    }
}
