//! Multi-producer task queue with timed blocking dequeue

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::RwLock;
use std::time::Duration;

/// Unbounded MPMC queue of pending work items.
///
/// Any thread may enqueue. Items from a single producer come out in the order
/// they went in, and each item is handed to exactly one consumer.
///
/// Once [closed](Self::close) the queue refuses new items; those already
/// queued can still be dequeued.
pub struct TaskQueue<T> {
    sender: RwLock<Option<Sender<T>>>,
    receiver: Receiver<T>,
}

impl<T> TaskQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        let (sender, receiver) = channel::unbounded();
        Self {
            sender: RwLock::new(Some(sender)),
            receiver,
        }
    }

    /// Push an item. Fails, handing the item back, only once the queue is
    /// closed.
    pub fn enqueue(&self, item: T) -> Result<(), T> {
        match self.sender.read().as_ref() {
            Some(sender) => sender.send(item).map_err(|err| err.into_inner()),
            None => Err(item),
        }
    }

    /// Stop accepting items. Every `enqueue` that returned `Ok` before this
    /// call is still visible to consumers.
    pub fn close(&self) {
        self.sender.write().take();
    }

    /// Whether the queue has been closed
    pub fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }

    /// Pop an item without blocking
    pub fn try_dequeue(&self) -> Option<T> {
        match self.receiver.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Pop an item, waiting up to `timeout` for one to arrive.
    ///
    /// Returns immediately on a closed, drained queue.
    pub fn wait_dequeue_timed(&self, timeout: Duration) -> Option<T> {
        match self.receiver.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Number of items currently queued
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Whether the queue is currently empty
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_fifo_single_producer() {
        let queue = TaskQueue::new();
        for i in 0..10 {
            assert!(queue.enqueue(i).is_ok());
        }
        assert_eq!(queue.len(), 10);

        let drained: Vec<_> = std::iter::from_fn(|| queue.try_dequeue()).collect();
        assert_eq!(drained, (0..10).collect::<Vec<_>>());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_try_dequeue_empty() {
        let queue: TaskQueue<u32> = TaskQueue::new();
        assert_eq!(queue.try_dequeue(), None);
    }

    #[test]
    fn test_timed_dequeue_times_out() {
        let queue: TaskQueue<u32> = TaskQueue::new();
        let start = Instant::now();
        assert_eq!(queue.wait_dequeue_timed(Duration::from_millis(20)), None);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_timed_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(TaskQueue::new());
        let producer = queue.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer.enqueue(42u32).unwrap();
        });

        let start = Instant::now();
        assert_eq!(queue.wait_dequeue_timed(Duration::from_secs(5)), Some(42));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_close_refuses_new_items() {
        let queue = TaskQueue::new();
        queue.enqueue(1u32).unwrap();
        assert!(!queue.is_closed());

        queue.close();
        assert!(queue.is_closed());
        assert_eq!(queue.enqueue(2), Err(2));

        // Items queued before the close are still delivered
        assert_eq!(queue.try_dequeue(), Some(1));
        assert_eq!(queue.try_dequeue(), None);

        let start = Instant::now();
        assert_eq!(queue.wait_dequeue_timed(Duration::from_secs(5)), None);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_concurrent_producers_no_duplicates() {
        let queue = Arc::new(TaskQueue::new());

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..250 {
                        queue.enqueue(p * 1000 + i).unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let mut items: Vec<_> = std::iter::from_fn(|| queue.try_dequeue()).collect();
        assert_eq!(items.len(), 1000);

        // Per-producer order survives interleaving
        for p in 0..4 {
            let own: Vec<_> = items.iter().copied().filter(|v| v / 1000 == p).collect();
            assert_eq!(own, (0..250).map(|i| p * 1000 + i).collect::<Vec<_>>());
        }

        items.sort_unstable();
        items.dedup();
        assert_eq!(items.len(), 1000);
    }
}
