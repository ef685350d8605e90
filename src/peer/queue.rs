//! Shared job queue for worker pools
//!
//! Producers push jobs, idle workers wait on a notification. Once closed,
//! workers drain whatever is left and then see `None`.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// FIFO queue shared by a fixed set of workers
#[derive(Debug)]
pub struct JobQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
}

impl<T> Default for JobQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JobQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState { items: VecDeque::new(), closed: false }),
            notify: Notify::new(),
        }
    }

    /// Build a queue that is already closed, holding exactly `items`
    pub fn sealed(items: impl IntoIterator<Item = T>) -> Self {
        let queue = Self::new();
        if let Ok(mut state) = queue.state.lock() {
            state.items.extend(items);
            state.closed = true;
        }
        queue
    }

    /// Add a job; false when the queue is already closed
    pub fn push(&self, item: T) -> bool {
        match self.state.lock() {
            Ok(mut state) if !state.closed => state.items.push_back(item),
            _ => return false,
        }
        self.notify.notify_one();
        true
    }

    /// Wait for a job; `None` once the queue is closed and empty
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().ok()?;
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Stop accepting jobs and wake every waiting worker
    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
        }
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order_then_drain_after_close() {
        let queue = JobQueue::new();
        assert!(queue.push(1));
        assert!(queue.push(2));
        queue.close();
        assert!(!queue.push(3));

        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.pop().await, Some(2));
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn test_sealed_queue_drains_then_ends() {
        let queue = JobQueue::sealed(vec![3, 4]);
        assert_eq!(queue.pop().await, Some(3));
        assert_eq!(queue.pop().await, Some(4));
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn test_close_wakes_idle_workers() {
        let queue = Arc::new(JobQueue::<u32>::new());
        let mut workers = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            workers.push(tokio::spawn(async move { queue.pop().await }));
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.close();

        for worker in workers {
            let result = tokio::time::timeout(Duration::from_secs(2), worker).await.unwrap().unwrap();
            assert_eq!(result, None);
        }
    }

    #[tokio::test]
    async fn test_push_wakes_waiting_worker() {
        let queue = Arc::new(JobQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.push(7);
        let result = tokio::time::timeout(Duration::from_secs(2), waiter).await.unwrap().unwrap();
        assert_eq!(result, Some(7));
    }
}
