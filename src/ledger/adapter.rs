use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ActionLog, LogEntry, LogSubscription};
use crate::errors::TransportError;

const LOG_TARGET: &str = "mental_poker::ledger::adapter";

/// Typed view over the append-only action log.
pub struct ActionLogAdapter<T> {
    log: Arc<dyn ActionLog>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for ActionLogAdapter<T> {
    fn clone(&self) -> Self {
        Self {
            log: Arc::clone(&self.log),
            _marker: PhantomData,
        }
    }
}

impl<T> ActionLogAdapter<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(log: Arc<dyn ActionLog>) -> Self {
        Self {
            log,
            _marker: PhantomData,
        }
    }

    pub fn log(&self) -> &Arc<dyn ActionLog> {
        &self.log
    }

    /// Replay everything posted so far, in log order. Each call starts over
    /// from the first entry; decoding happens lazily as the iterator advances.
    pub fn actions(&self) -> Result<ActionIter<T>, TransportError> {
        let entries = self.log.get_all()?;
        Ok(ActionIter {
            entries: entries.into_iter(),
            _marker: PhantomData,
        })
    }

    /// Serialize and append `value`, resolving once the log acknowledges it.
    pub async fn post_action(&self, value: &T) -> Result<(), TransportError> {
        let bytes = serde_json::to_vec(value).map_err(TransportError::Encode)?;
        debug!(target: LOG_TARGET, bytes = bytes.len(), "posting action");
        self.log.post(bytes).await
    }

    /// Stream of actions appended after this call, including our own.
    pub fn subscribe(&self) -> ActionStream<T> {
        ActionStream {
            inner: self.log.subscribe(),
            _marker: PhantomData,
        }
    }
}

pub struct ActionIter<T> {
    entries: std::vec::IntoIter<LogEntry>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Iterator for ActionIter<T>
where
    T: DeserializeOwned,
{
    type Item = Result<T, TransportError>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.entries.next()?;
        Some(decode(&entry))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

pub struct ActionStream<T> {
    inner: LogSubscription,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ActionStream<T>
where
    T: DeserializeOwned,
{
    /// Next appended action, or `None` once unsubscribed or the log is gone.
    /// Entries that fail to decode are reported, not skipped.
    pub async fn next(&mut self) -> Option<Result<T, TransportError>> {
        let entry = self.inner.next().await?;
        Some(decode(&entry))
    }
}

impl<T> ActionStream<T> {
    pub fn unsubscribe(&self) {
        self.inner.unsubscribe();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancellation_token()
    }
}

fn decode<T: DeserializeOwned>(entry: &[u8]) -> Result<T, TransportError> {
    serde_json::from_slice(entry).map_err(TransportError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryActionLog;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        seq: u32,
    }

    fn adapter() -> (Arc<InMemoryActionLog>, ActionLogAdapter<Note>) {
        let log = Arc::new(InMemoryActionLog::new());
        let adapter = ActionLogAdapter::new(log.clone() as Arc<dyn ActionLog>);
        (log, adapter)
    }

    #[tokio::test]
    async fn history_replays_from_the_start_each_time() {
        let (_log, adapter) = adapter();
        for seq in 0..3 {
            adapter.post_action(&Note { seq }).await.unwrap();
        }
        let first: Vec<_> = adapter.actions().unwrap().map(Result::unwrap).collect();
        let second: Vec<_> = adapter.actions().unwrap().map(Result::unwrap).collect();
        assert_eq!(first, second);
        assert_eq!(first.iter().map(|n| n.seq).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn subscriber_sees_own_posts_in_order() {
        let (_log, adapter) = adapter();
        let mut stream = adapter.subscribe();
        adapter.post_action(&Note { seq: 1 }).await.unwrap();
        adapter.post_action(&Note { seq: 2 }).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), Note { seq: 1 });
        assert_eq!(stream.next().await.unwrap().unwrap(), Note { seq: 2 });
    }

    #[tokio::test]
    async fn undecodable_entry_is_reported() {
        let (log, adapter) = adapter();
        let mut stream = adapter.subscribe();
        log.post(b"{\"unexpected\":true}".to_vec()).await.unwrap();
        assert!(matches!(
            stream.next().await,
            Some(Err(TransportError::Decode(_)))
        ));
    }

    #[tokio::test]
    async fn post_fails_when_log_is_unreachable() {
        let (log, adapter) = adapter();
        log.set_reachable(false);
        assert!(matches!(
            adapter.post_action(&Note { seq: 9 }).await,
            Err(TransportError::Unreachable(_))
        ));
        assert_eq!(adapter.actions().unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unsubscribed_stream_ends() {
        let (_log, adapter) = adapter();
        let mut stream = adapter.subscribe();
        stream.unsubscribe();
        assert!(stream.next().await.is_none());
        assert!(stream.cancellation_token().is_cancelled());
    }
}
