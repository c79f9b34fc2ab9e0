use std::future::Future;

use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::types::ClientId;

/// Spawn one participant's driver loop inside a span carrying its client id.
pub fn spawn_player_task<F>(client_id: &ClientId, future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let span = tracing::info_span!("player", client_id = %client_id);
    tokio::spawn(future.instrument(span))
}
