//! Session setup: each participant announces its signing key on the log, then
//! builds the key directory that every later action is verified against.

use std::sync::Arc;

use rand::{CryptoRng, RngCore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::{Error, TransportError};
use crate::ledger::{ActionLog, ActionLogAdapter, ActionStream};
use crate::signing::{Signable, SigningKeyPair};
use crate::transport::{
    KeyDirectory, KeyDirectoryBuilder, KeyExchangePayload, SignedAction, SignedSubscription,
    SignedTransport,
};
use crate::types::{ClientId, Roster};

const LOG_TARGET: &str = "mental_poker::session";

/// A participant's name and signing keys. The private half stays in this process.
#[derive(Debug, Clone)]
pub struct Identity {
    client_id: ClientId,
    keys: SigningKeyPair,
}

impl Identity {
    pub fn new(client_id: impl Into<ClientId>, keys: SigningKeyPair) -> Self {
        Self {
            client_id: client_id.into(),
            keys,
        }
    }

    pub fn generate<R: RngCore + CryptoRng>(client_id: impl Into<ClientId>, rng: &mut R) -> Self {
        Self::new(client_id, SigningKeyPair::generate(rng))
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn keys(&self) -> &SigningKeyPair {
        &self.keys
    }
}

/// Announce `identity`'s key and collect one key per roster member.
///
/// `stream` must have been opened before this call. It is consumed up to our
/// own announcement and then until every roster member is known. Peer
/// announcements that trail it stay on the stream; the signed subscription
/// built on top skips them, since they all precede the first signed action.
/// Announcements from outside the roster are ignored; a roster member that
/// announces two different keys aborts the exchange.
pub async fn key_exchange<T>(
    adapter: &ActionLogAdapter<SignedAction<T>>,
    stream: &mut ActionStream<SignedAction<T>>,
    identity: &Identity,
    roster: &Roster,
) -> Result<KeyDirectory, Error>
where
    T: Serialize + DeserializeOwned + KeyExchangePayload,
{
    let announcement = SignedAction::unsigned(
        identity.client_id().clone(),
        T::key_announcement(identity.keys().public_key.clone()),
    );
    adapter.post_action(&announcement).await?;

    let mut builder = KeyDirectoryBuilder::new();
    for entry in adapter.actions()? {
        record(&mut builder, roster, entry?)?;
    }

    // Keep reading the live stream until our own announcement has gone past,
    // so none of the exchange is left in front of the game subscription.
    let mut seen_own = false;
    while !(seen_own && roster.iter().all(|p| builder.contains(p))) {
        let entry = stream.next().await.ok_or(TransportError::Closed)??;
        if entry.client_id.as_ref() == Some(identity.client_id())
            && entry.signature.is_none()
            && entry.payload.announced_key() == Some(&identity.keys().public_key)
        {
            seen_own = true;
        }
        record(&mut builder, roster, entry)?;
    }

    info!(
        target: LOG_TARGET,
        client_id = %identity.client_id(),
        players = builder.len(),
        "key exchange complete"
    );
    Ok(builder.build())
}

fn record<T: KeyExchangePayload>(
    builder: &mut KeyDirectoryBuilder,
    roster: &Roster,
    entry: SignedAction<T>,
) -> Result<(), Error> {
    let (Some(client_id), Some(key)) = (entry.client_id, entry.payload.announced_key()) else {
        warn!(target: LOG_TARGET, "non-announcement entry during key exchange ignored");
        return Ok(());
    };
    if entry.signature.is_some() {
        warn!(target: LOG_TARGET, client_id = %client_id, "signed announcement ignored");
        return Ok(());
    }
    if !roster.contains(&client_id) {
        warn!(target: LOG_TARGET, client_id = %client_id, "announcement from outside the roster ignored");
        return Ok(());
    }
    if builder.put(client_id.clone(), key.clone())? {
        debug!(target: LOG_TARGET, client_id = %client_id, "signing key registered");
    }
    Ok(())
}

/// An authenticated view of the log for one participant.
pub struct Session<T> {
    pub roster: Roster,
    pub transport: SignedTransport<T>,
    pub subscription: SignedSubscription<T>,
}

impl<T> Session<T>
where
    T: Signable + Serialize + DeserializeOwned + KeyExchangePayload,
{
    /// Run the key exchange over `log` and return the signed transport together
    /// with a subscription positioned right after the exchange.
    pub async fn establish(
        log: Arc<dyn ActionLog>,
        identity: Identity,
        roster: Roster,
    ) -> Result<Self, Error> {
        let adapter = ActionLogAdapter::<SignedAction<T>>::new(log);
        let mut stream = adapter.subscribe();
        let directory = key_exchange(&adapter, &mut stream, &identity, &roster).await?;
        let transport = SignedTransport::new(adapter, identity, Arc::new(directory));
        let subscription = transport.attach(stream);
        Ok(Self {
            roster,
            transport,
            subscription,
        })
    }

    pub fn client_id(&self) -> &ClientId {
        self.transport.client_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AuthError;
    use crate::ledger::InMemoryActionLog;
    use crate::protocol::PokerAction;
    use crate::ledger::LogSubscription;
    use crate::signing::PublicKey;
    use crate::transport::sign_action;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Appends a queued entry right behind the next post, the way a busy log
    /// interleaves a peer's announcement with ours.
    struct InterleavingLog {
        inner: InMemoryActionLog,
        follow_up: Mutex<Option<Vec<u8>>>,
    }

    #[async_trait]
    impl ActionLog for InterleavingLog {
        async fn post(&self, value: Vec<u8>) -> Result<(), TransportError> {
            self.inner.post(value).await?;
            let follow_up = self.follow_up.lock().take();
            if let Some(entry) = follow_up {
                self.inner.post(entry).await?;
            }
            Ok(())
        }

        fn get_all(&self) -> Result<Vec<crate::ledger::LogEntry>, TransportError> {
            self.inner.get_all()
        }

        fn subscribe(&self) -> LogSubscription {
            self.inner.subscribe()
        }
    }

    fn announcement(identity: &Identity) -> SignedAction<PokerAction> {
        SignedAction::unsigned(
            identity.client_id().clone(),
            PokerAction::key_announcement(identity.keys().public_key.clone()),
        )
    }

    fn identities(names: &[&str]) -> Vec<Identity> {
        let mut rng = StdRng::seed_from_u64(5);
        names
            .iter()
            .map(|name| Identity::generate(*name, &mut rng))
            .collect()
    }

    #[tokio::test]
    async fn all_players_converge_on_the_same_directory() {
        let log: Arc<dyn ActionLog> = Arc::new(InMemoryActionLog::new());
        let roster = Roster::new(["alice", "bob", "carol"]).unwrap();
        let ids = identities(&["alice", "bob", "carol"]);

        let (a, b, c) = tokio::join!(
            Session::<PokerAction>::establish(log.clone(), ids[0].clone(), roster.clone()),
            Session::<PokerAction>::establish(log.clone(), ids[1].clone(), roster.clone()),
            Session::<PokerAction>::establish(log.clone(), ids[2].clone(), roster.clone()),
        );
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
        assert_eq!(a.transport.directory(), b.transport.directory());
        assert_eq!(b.transport.directory(), c.transport.directory());
        assert_eq!(
            a.transport.directory().get(&ClientId::from("carol")),
            Some(&ids[2].keys().public_key)
        );
    }

    #[tokio::test]
    async fn late_joiner_picks_up_earlier_announcements_from_history() {
        let log: Arc<dyn ActionLog> = Arc::new(InMemoryActionLog::new());
        let roster = Roster::new(["alice", "bob"]).unwrap();
        let ids = identities(&["alice", "bob"]);

        let alice = tokio::spawn(Session::<PokerAction>::establish(
            log.clone(),
            ids[0].clone(),
            roster.clone(),
        ));
        tokio::task::yield_now().await;
        let bob = Session::<PokerAction>::establish(log.clone(), ids[1].clone(), roster)
            .await
            .unwrap();
        let alice = alice.await.unwrap().unwrap();
        assert_eq!(alice.transport.directory().len(), 2);
        assert_eq!(bob.transport.directory().len(), 2);
    }

    #[tokio::test]
    async fn second_different_key_for_a_player_aborts() {
        let log: Arc<dyn ActionLog> = Arc::new(InMemoryActionLog::new());
        let roster = Roster::new(["alice", "bob"]).unwrap();
        let ids = identities(&["alice", "bob"]);
        let raw = ActionLogAdapter::<SignedAction<PokerAction>>::new(log.clone());
        for key in ["a2V5LW9uZQ==", "a2V5LXR3bw=="] {
            raw.post_action(&SignedAction::unsigned(
                ClientId::from("bob"),
                PokerAction::key_announcement(PublicKey::from_encoded(key)),
            ))
            .await
            .unwrap();
        }

        let result =
            Session::<PokerAction>::establish(log, ids[0].clone(), roster).await;
        assert!(matches!(
            result,
            Err(Error::Auth(AuthError::ConflictingKey(who))) if who == ClientId::from("bob")
        ));
    }

    #[tokio::test]
    async fn peer_announcement_behind_ours_does_not_reach_the_game_stream() {
        let roster = Roster::new(["alice", "bob", "carol"]).unwrap();
        let ids = identities(&["alice", "bob", "carol"]);
        let log = Arc::new(InterleavingLog {
            inner: InMemoryActionLog::new(),
            follow_up: Mutex::new(Some(serde_json::to_vec(&announcement(&ids[2])).unwrap())),
        });
        log.inner
            .post(serde_json::to_vec(&announcement(&ids[0])).unwrap())
            .await
            .unwrap();

        let shared: Arc<dyn ActionLog> = log.clone();
        let mut bob = Session::<PokerAction>::establish(shared, ids[1].clone(), roster)
            .await
            .unwrap();
        assert_eq!(bob.transport.directory().len(), 3);

        let pass = sign_action(&ids[0], PokerAction::Pass).unwrap();
        log.inner.post(serde_json::to_vec(&pass).unwrap()).await.unwrap();

        let first = bob.subscription.next().await.unwrap().unwrap();
        assert_eq!(first.client_id, ClientId::from("alice"));
        assert_eq!(first.payload, PokerAction::Pass);
    }
}
