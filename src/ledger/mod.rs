//! The append-only action log every participant reads and writes.
//!
//! The log itself is an external collaborator behind [`ActionLog`]; ordering
//! and delivery guarantees are inherited from it. [`InMemoryActionLog`] is a
//! single-process implementation used by tests and the demo binary.

pub mod adapter;
pub mod queue;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::errors::TransportError;

pub use adapter::{ActionIter, ActionLogAdapter, ActionStream};
pub use queue::{FifoQueue, QueueError};

const LOG_TARGET: &str = "mental_poker::ledger";
const SUBSCRIBER_QUEUE_CAPACITY: usize = 64;

/// One serialized entry on the log.
pub type LogEntry = Arc<[u8]>;

/// Ordered broadcast channel shared by all participants.
#[async_trait]
pub trait ActionLog: Send + Sync {
    /// Append `value`; resolves once the log acknowledges the append.
    async fn post(&self, value: Vec<u8>) -> Result<(), TransportError>;

    /// Every entry appended so far, in log order.
    fn get_all(&self) -> Result<Vec<LogEntry>, TransportError>;

    /// Deliver every entry appended after this call, exactly once and in order.
    fn subscribe(&self) -> LogSubscription;
}

/// Receiving end of [`ActionLog::subscribe`].
///
/// Dropping the subscription or calling [`LogSubscription::unsubscribe`]
/// releases it; the log prunes it on its next append.
pub struct LogSubscription {
    queue: Arc<FifoQueue<LogEntry>>,
    pending: Option<tokio::sync::oneshot::Receiver<LogEntry>>,
    cancel: CancellationToken,
}

impl LogSubscription {
    pub fn new(queue: Arc<FifoQueue<LogEntry>>) -> Self {
        Self {
            queue,
            pending: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Next entry, or `None` once cancelled or the log closed the queue.
    ///
    /// Cancel-safe: if this future is dropped mid-wait, the entry it was
    /// waiting for is delivered by the following call.
    pub async fn next(&mut self) -> Option<LogEntry> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let queue = &self.queue;
        let rx = self.pending.get_or_insert_with(|| queue.pop());
        let outcome = tokio::select! {
            biased;
            received = rx => Some(received),
            _ = self.cancel.cancelled() => None,
        };
        match outcome {
            Some(Ok(entry)) => {
                self.pending = None;
                Some(entry)
            }
            Some(Err(_)) => {
                self.pending = None;
                None
            }
            None => None,
        }
    }

    pub fn unsubscribe(&self) {
        self.cancel.cancel();
        self.queue.close();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        self.queue.close();
    }
}

/// Process-local log with the same ordering contract as a replicated one.
pub struct InMemoryActionLog {
    state: Mutex<LogState>,
    reachable: AtomicBool,
}

#[derive(Default)]
struct LogState {
    entries: Vec<LogEntry>,
    subscribers: Vec<Arc<FifoQueue<LogEntry>>>,
}

impl InMemoryActionLog {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LogState::default()),
            reachable: AtomicBool::new(true),
        }
    }

    /// Simulate the log going offline; posts fail with `TransportError::Unreachable`.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscriber_count(&self) -> usize {
        self.state
            .lock()
            .subscribers
            .iter()
            .filter(|queue| !queue.is_closed())
            .count()
    }
}

impl Default for InMemoryActionLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionLog for InMemoryActionLog {
    async fn post(&self, value: Vec<u8>) -> Result<(), TransportError> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable(
                "in-memory log is offline".into(),
            ));
        }
        let entry: LogEntry = value.into();
        // Append and fan out under one lock so every subscriber sees log order.
        let mut state = self.state.lock();
        state.entries.push(Arc::clone(&entry));
        let sequence = state.entries.len() - 1;
        state
            .subscribers
            .retain(|queue| queue.push(Arc::clone(&entry)).is_ok());
        trace!(
            target: LOG_TARGET,
            sequence,
            subscribers = state.subscribers.len(),
            "entry appended"
        );
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<LogEntry>, TransportError> {
        Ok(self.state.lock().entries.clone())
    }

    fn subscribe(&self) -> LogSubscription {
        let queue = Arc::new(FifoQueue::new(SUBSCRIBER_QUEUE_CAPACITY));
        let mut state = self.state.lock();
        state.subscribers.push(Arc::clone(&queue));
        debug!(
            target: LOG_TARGET,
            subscribers = state.subscribers.len(),
            "subscriber attached"
        );
        LogSubscription::new(queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn every_subscriber_gets_every_entry_once() {
        let log = InMemoryActionLog::new();
        let mut a = log.subscribe();
        let mut b = log.subscribe();
        for i in 0u8..5 {
            log.post(vec![i]).await.unwrap();
        }
        for sub in [&mut a, &mut b] {
            for i in 0u8..5 {
                assert_eq!(&*sub.next().await.unwrap(), &[i]);
            }
        }
        assert_eq!(log.len(), 5);
    }

    #[tokio::test]
    async fn late_subscriber_only_sees_new_entries() {
        let log = InMemoryActionLog::new();
        log.post(vec![1]).await.unwrap();
        let mut sub = log.subscribe();
        log.post(vec![2]).await.unwrap();
        assert_eq!(&*sub.next().await.unwrap(), &[2]);
        assert_eq!(log.get_all().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn dropped_subscription_is_pruned() {
        let log = InMemoryActionLog::new();
        let sub = log.subscribe();
        assert_eq!(log.subscriber_count(), 1);
        drop(sub);
        log.post(vec![0]).await.unwrap();
        assert_eq!(log.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn timed_out_wait_does_not_lose_the_entry() {
        let log = Arc::new(InMemoryActionLog::new());
        let mut sub = log.subscribe();
        let waited = tokio::time::timeout(Duration::from_millis(10), sub.next()).await;
        assert!(waited.is_err());
        log.post(vec![9]).await.unwrap();
        assert_eq!(&*sub.next().await.unwrap(), &[9]);
    }

    #[tokio::test]
    async fn cancellation_token_wakes_a_pending_wait() {
        let log = InMemoryActionLog::new();
        let mut sub = log.subscribe();
        let token = sub.cancellation_token();
        let waiter = async { sub.next().await };
        let canceller = async {
            tokio::task::yield_now().await;
            token.cancel();
        };
        let (received, _) = tokio::join!(waiter, canceller);
        assert!(received.is_none());
    }
}
