use thiserror::Error;

use crate::protocol::machine::ExpectedMove;
use crate::types::ClientId;

/// Failures of the cryptographic primitives. These indicate malformed input or
/// a broken environment and are not fixed by retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
    #[error("plaintext must lie in [0, modulus)")]
    InvalidPlaintext,
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("malformed signature: {0}")]
    InvalidSignatureFormat(String),
}

/// Authentication failures raised by the signed transport. An action that
/// produces one of these is never applied to game state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("action is missing its client id or signature")]
    MissingSignature,
    #[error("no signing key registered for {0}")]
    UnknownSigner(ClientId),
    #[error("signature check failed for action claiming to be from {0}")]
    SignatureVerification(ClientId),
    #[error("signature from {client_id} is malformed: {source}")]
    MalformedSignature {
        client_id: ClientId,
        #[source]
        source: CryptoError,
    },
    #[error("{0} announced a second, different signing key")]
    ConflictingKey(ClientId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViolationReason {
    #[error("sender is not on turn for this action")]
    OutOfTurn,
    #[error("no recipe step is running")]
    NoActiveStep,
    #[error("reveal for position {got} while position {expected} is being revealed")]
    WrongPosition { expected: usize, got: usize },
    #[error("shared modulus was already established")]
    ModulusAlreadySet,
    #[error("shared modulus has not been established")]
    MissingModulus,
    #[error("published modulus is not acceptable: {0}")]
    BadModulus(String),
    #[error("deck is malformed: {0}")]
    BadDeck(String),
    #[error("action does not fit the current deck stage: {0}")]
    WrongStage(&'static str),
    #[error("expected {expected} key digests, got {got}")]
    BadDigestCount { expected: usize, got: usize },
    #[error("revealed key does not match the commitment for position {0}")]
    KeyMismatch(usize),
    #[error("position {0} is outside the deck")]
    PositionOutOfRange(usize),
    #[error("card at position {0} did not decrypt to a card of the agreed deck")]
    CorruptCard(usize),
}

/// A rejected action together with why it was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("protocol violation by {} ({:?}): {reason}", offending.from, offending.kind)]
pub struct Violation {
    pub offending: ExpectedMove,
    pub reason: ViolationReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Violation(#[from] Violation),
    #[error("state machine halted after an earlier violation")]
    Halted,
    #[error("players stalled and forfeited: {0:?}")]
    Stalled(Vec<ClientId>),
    #[error("local player cannot act: {0}")]
    LocalState(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("action log unreachable: {0}")]
    Unreachable(String),
    #[error("subscription closed")]
    Closed,
    #[error("failed to encode action: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode action: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Umbrella error for operations that cross several layers.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Roster(#[from] crate::types::RosterError),
}

impl From<Violation> for Error {
    fn from(value: Violation) -> Self {
        Error::Protocol(ProtocolError::Violation(value))
    }
}

impl Error {
    /// True for failures that signal a spoofing attempt rather than a local fault.
    pub fn is_security_event(&self) -> bool {
        matches!(self, Error::Auth(_))
    }
}
