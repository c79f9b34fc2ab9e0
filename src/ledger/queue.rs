use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;
use tokio::sync::oneshot::{self, Receiver, Sender};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue closed")]
    Closed,
}

/// Unbounded FIFO that hands items to waiters in arrival order.
///
/// A waiter whose receiver was dropped is skipped and the item goes to the
/// next waiter or back into the buffer, so nothing is lost.
pub struct FifoQueue<T> {
    state: Mutex<QueueState<T>>,
}

struct QueueState<T> {
    items: VecDeque<T>,
    waiters: VecDeque<Sender<T>>,
    closed: bool,
}

impl<T> FifoQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                waiters: VecDeque::new(),
                closed: false,
            }),
        }
    }

    pub fn push(&self, item: T) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(QueueError::Closed);
        }
        let mut item = item;
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(item) {
                Ok(()) => return Ok(()),
                Err(returned) => item = returned,
            }
        }
        state.items.push_back(item);
        Ok(())
    }

    /// Receiver resolving with the next item; errors once the queue is closed.
    pub fn pop(&self) -> Receiver<T> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock();
        if state.closed {
            return rx;
        }
        match state.items.pop_front() {
            // rx is alive, so this send cannot fail.
            Some(item) => {
                let _ = tx.send(item);
            }
            None => state.waiters.push_back(tx),
        }
        rx
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.waiters.clear();
        state.items.clear();
    }
}

impl<T> Drop for FifoQueue<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> fmt::Debug for FifoQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FifoQueue")
            .field("pending_items", &state.items.len())
            .field("waiting_receivers", &state.waiters.len())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_ordering_is_preserved() {
        let queue = FifoQueue::new(8);
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        queue.push(3).unwrap();

        assert_eq!(queue.pop().await.unwrap(), 1);
        assert_eq!(queue.pop().await.unwrap(), 2);
        assert_eq!(queue.pop().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn pop_before_push_completes_when_item_arrives() {
        let queue = FifoQueue::new(2);
        let rx = queue.pop();
        queue.push(42).unwrap();
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn dropped_waiter_does_not_swallow_items() {
        let queue = FifoQueue::new(2);
        drop(queue.pop());
        queue.push(7).unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().await.unwrap(), 7);
    }

    #[test]
    fn len_reflects_enqueued_items() {
        let queue = FifoQueue::new(2);
        assert!(queue.is_empty());
        queue.push("a").unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn closed_queue_rejects_push_and_fails_waiters() {
        let queue = FifoQueue::new(2);
        let waiting = queue.pop();
        queue.close();
        assert!(waiting.await.is_err());
        assert_eq!(queue.push(0), Err(QueueError::Closed));
        assert!(queue.pop().await.is_err());
        assert!(queue.is_closed());
    }
}
