//! Signature layer over the action log. Outgoing actions are signed with the
//! local identity; incoming ones are checked against the [`KeyDirectory`]
//! before anything above this layer sees them.

pub mod directory;

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::{AuthError, CryptoError, Error, TransportError};
use crate::ledger::{ActionIter, ActionLogAdapter, ActionStream};
use crate::session::Identity;
use crate::signing::{self, PublicKey, Signable, TranscriptBuilder};
use crate::types::ClientId;

pub use directory::{KeyDirectory, KeyDirectoryBuilder};

const LOG_TARGET: &str = "mental_poker::transport";

/// Wire record posted to the log: `{ payload, clientId, signature }`.
///
/// Key-exchange announcements travel with `signature` absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedAction<T> {
    pub payload: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl<T> SignedAction<T> {
    pub fn unsigned(client_id: ClientId, payload: T) -> Self {
        Self {
            payload,
            client_id: Some(client_id),
            signature: None,
        }
    }
}

/// An action whose signature checked out, with the wrapper stripped.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedAction<T> {
    pub client_id: ClientId,
    pub payload: T,
}

/// Payloads that can carry a signing-key announcement for the key exchange.
pub trait KeyExchangePayload: Sized {
    fn key_announcement(public_key: PublicKey) -> Self;
    fn announced_key(&self) -> Option<&PublicKey>;
}

/// Bytes covered by a signature: the claimed sender plus the payload transcript.
pub fn signing_transcript<T: Signable>(client_id: &ClientId, payload: &T) -> Vec<u8> {
    let mut builder = TranscriptBuilder::new("transport/signed_action_v1");
    builder.append_str(client_id.as_str());
    builder.append_bytes(&payload.to_signing_bytes());
    builder.finish()
}

pub fn sign_action<T: Signable>(identity: &Identity, payload: T) -> Result<SignedAction<T>, CryptoError> {
    let transcript = signing_transcript(identity.client_id(), &payload);
    let signature = signing::sign(&transcript, &identity.keys().private_key)?;
    Ok(SignedAction {
        payload,
        client_id: Some(identity.client_id().clone()),
        signature: Some(STANDARD.encode(signature)),
    })
}

/// Check one wire record against the directory. All-or-nothing: the payload is
/// only released on success.
pub fn verify_action<T: Signable>(
    directory: &KeyDirectory,
    action: SignedAction<T>,
) -> Result<VerifiedAction<T>, AuthError> {
    let SignedAction {
        payload,
        client_id,
        signature,
    } = action;
    let (Some(client_id), Some(signature)) = (client_id, signature) else {
        return Err(AuthError::MissingSignature);
    };
    let public_key = directory
        .get(&client_id)
        .ok_or_else(|| AuthError::UnknownSigner(client_id.clone()))?;
    let signature = match STANDARD.decode(&signature) {
        Ok(bytes) => bytes,
        Err(err) => {
            return Err(AuthError::MalformedSignature {
                client_id,
                source: CryptoError::InvalidSignatureFormat(err.to_string()),
            })
        }
    };
    let transcript = signing_transcript(&client_id, &payload);
    match signing::verify(&transcript, &signature, public_key) {
        Ok(true) => Ok(VerifiedAction { client_id, payload }),
        Ok(false) => Err(AuthError::SignatureVerification(client_id)),
        Err(source) => Err(AuthError::MalformedSignature { client_id, source }),
    }
}

pub struct SignedTransport<T> {
    adapter: ActionLogAdapter<SignedAction<T>>,
    identity: Identity,
    directory: Arc<KeyDirectory>,
}

impl<T> SignedTransport<T>
where
    T: Signable + Serialize + DeserializeOwned,
{
    pub fn new(
        adapter: ActionLogAdapter<SignedAction<T>>,
        identity: Identity,
        directory: Arc<KeyDirectory>,
    ) -> Self {
        Self {
            adapter,
            identity,
            directory,
        }
    }

    pub fn client_id(&self) -> &ClientId {
        self.identity.client_id()
    }

    pub fn directory(&self) -> &Arc<KeyDirectory> {
        &self.directory
    }

    /// Sign `value` as the local identity and append it to the log.
    pub async fn post_action(&self, value: T) -> Result<(), Error> {
        let signed = sign_action(&self.identity, value)?;
        self.adapter.post_action(&signed).await?;
        debug!(target: LOG_TARGET, client_id = %self.client_id(), "signed action posted");
        Ok(())
    }

    /// Raw history, signatures unchecked. This includes the unsigned
    /// key-exchange prefix; use [`Self::verified_history`] to rebuild state.
    pub fn actions(&self) -> Result<ActionIter<SignedAction<T>>, TransportError> {
        self.adapter.actions()
    }

    pub fn subscribe(&self) -> SignedSubscription<T> {
        self.attach(self.adapter.subscribe())
    }

    /// Wrap a subscription opened before the key exchange so no entry between
    /// the exchange and now is missed.
    pub fn attach(&self, stream: ActionStream<SignedAction<T>>) -> SignedSubscription<T> {
        SignedSubscription {
            inner: stream,
            directory: Arc::clone(&self.directory),
            exchange: ExchangeFilter::default(),
        }
    }
}

impl<T> SignedTransport<T>
where
    T: Signable + Serialize + DeserializeOwned + KeyExchangePayload,
{
    /// History with the key exchange filtered out and every other entry verified.
    ///
    /// Honest announcements (unsigned, key matching the directory binding for
    /// their sender) are dropped wherever they sit before the first signed
    /// entry. Anything else in that stretch, such as an outsider's
    /// announcement, is reported on its own.
    pub fn verified_history(
        &self,
    ) -> Result<impl Iterator<Item = Result<VerifiedAction<T>, Error>>, TransportError> {
        let directory = Arc::clone(&self.directory);
        let mut exchange = ExchangeFilter::default();
        Ok(self.adapter.actions()?.filter_map(move |entry| {
            let action = match entry {
                Ok(action) => action,
                Err(err) => return Some(Err(err.into())),
            };
            if exchange.skip(&directory, &action) {
                return None;
            }
            Some(verify_action(&directory, action).map_err(Error::from))
        }))
    }
}

/// Tracks the key-exchange stretch of the log: it lasts until the first
/// signed entry.
#[derive(Debug)]
struct ExchangeFilter {
    open: bool,
}

impl Default for ExchangeFilter {
    fn default() -> Self {
        Self { open: true }
    }
}

impl ExchangeFilter {
    /// True if `action` is an honest announcement inside the exchange stretch.
    fn skip<T: KeyExchangePayload>(&mut self, directory: &KeyDirectory, action: &SignedAction<T>) -> bool {
        if !self.open {
            return false;
        }
        if action.signature.is_some() {
            self.open = false;
            return false;
        }
        match (&action.client_id, action.payload.announced_key()) {
            (Some(client_id), Some(key)) => directory.get(client_id) == Some(key),
            _ => false,
        }
    }
}

/// Live stream of verified actions.
pub struct SignedSubscription<T> {
    inner: ActionStream<SignedAction<T>>,
    directory: Arc<KeyDirectory>,
    exchange: ExchangeFilter,
}

impl<T> SignedSubscription<T>
where
    T: Signable + DeserializeOwned + KeyExchangePayload,
{
    /// Next action in log order. Honest announcements still trailing the key
    /// exchange are skipped. Authentication failures are yielded as errors and
    /// the offending payload is dropped.
    pub async fn next(&mut self) -> Option<Result<VerifiedAction<T>, Error>> {
        loop {
            let entry = match self.inner.next().await? {
                Ok(entry) => entry,
                Err(err) => return Some(Err(err.into())),
            };
            if self.exchange.skip(&self.directory, &entry) {
                debug!(target: LOG_TARGET, "trailing key announcement skipped");
                continue;
            }
            return match verify_action(&self.directory, entry) {
                Ok(action) => Some(Ok(action)),
                Err(err) => {
                    debug!(target: LOG_TARGET, error = %err, "rejected unauthenticated action");
                    Some(Err(err.into()))
                }
            };
        }
    }

    pub fn unsubscribe(&self) {
        self.inner.unsubscribe();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancellation_token()
    }
}
