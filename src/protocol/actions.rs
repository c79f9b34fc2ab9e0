use std::fmt;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::signing::{PublicKey, Signable, TranscriptBuilder};
use crate::transport::KeyExchangePayload;

const KEY_COMMITMENT_TAG: &[u8] = b"mental-poker/card-key/v1";

/// Every payload that can appear on the log during a game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PokerAction {
    /// Unsigned key-exchange announcement.
    AnnounceSigningKey {
        #[serde(rename = "publicKey")]
        public_key: PublicKey,
    },
    /// Dealer fixes the prime every SRA key is generated over.
    PublishPrime {
        #[serde(with = "crate::crypto_serde::biguint")]
        modulus: BigUint,
    },
    /// Commitments to this player's per-position card decryption keys.
    PublishKey {
        #[serde(rename = "keyDigests")]
        key_digests: Vec<KeyDigest>,
    },
    ReEncryptAndShuffle {
        #[serde(with = "crate::crypto_serde::biguint_vec")]
        deck: Vec<BigUint>,
    },
    /// Swap the round layer for per-position card keys.
    LockCards {
        #[serde(with = "crate::crypto_serde::biguint_vec")]
        deck: Vec<BigUint>,
    },
    RevealKey {
        position: usize,
        #[serde(with = "crate::crypto_serde::biguint")]
        key: BigUint,
    },
    Discard {
        position: usize,
    },
    Pass,
}

/// Fieldless mirror of [`PokerAction`] used in expected-move sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
    AnnounceSigningKey,
    PublishPrime,
    PublishKey,
    ReEncryptAndShuffle,
    LockCards,
    RevealKey,
    Discard,
    Pass,
}

impl ActionKind {
    /// Kinds a local player derives from protocol state alone, without input
    /// from the game layer.
    pub fn is_automatic(self) -> bool {
        matches!(
            self,
            ActionKind::PublishPrime
                | ActionKind::PublishKey
                | ActionKind::ReEncryptAndShuffle
                | ActionKind::LockCards
                | ActionKind::RevealKey
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::AnnounceSigningKey => "announceSigningKey",
            ActionKind::PublishPrime => "publishPrime",
            ActionKind::PublishKey => "publishKey",
            ActionKind::ReEncryptAndShuffle => "reEncryptAndShuffle",
            ActionKind::LockCards => "lockCards",
            ActionKind::RevealKey => "revealKey",
            ActionKind::Discard => "discard",
            ActionKind::Pass => "pass",
        };
        f.write_str(name)
    }
}

impl PokerAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            PokerAction::AnnounceSigningKey { .. } => ActionKind::AnnounceSigningKey,
            PokerAction::PublishPrime { .. } => ActionKind::PublishPrime,
            PokerAction::PublishKey { .. } => ActionKind::PublishKey,
            PokerAction::ReEncryptAndShuffle { .. } => ActionKind::ReEncryptAndShuffle,
            PokerAction::LockCards { .. } => ActionKind::LockCards,
            PokerAction::RevealKey { .. } => ActionKind::RevealKey,
            PokerAction::Discard { .. } => ActionKind::Discard,
            PokerAction::Pass => ActionKind::Pass,
        }
    }
}

impl Signable for PokerAction {
    fn domain_kind(&self) -> &'static str {
        "poker/action_v1"
    }

    fn write_transcript(&self, builder: &mut TranscriptBuilder) {
        builder.append_u8(self.kind() as u8);
        match self {
            PokerAction::AnnounceSigningKey { public_key } => {
                builder.append_str(public_key.as_str());
            }
            PokerAction::PublishPrime { modulus } => builder.append_biguint(modulus),
            PokerAction::PublishKey { key_digests } => {
                builder.append_u64(key_digests.len() as u64);
                for digest in key_digests {
                    builder.append_bytes(digest.as_bytes());
                }
            }
            PokerAction::ReEncryptAndShuffle { deck } | PokerAction::LockCards { deck } => {
                builder.append_biguints(deck);
            }
            PokerAction::RevealKey { position, key } => {
                builder.append_u64(*position as u64);
                builder.append_biguint(key);
            }
            PokerAction::Discard { position } => builder.append_u64(*position as u64),
            PokerAction::Pass => {}
        }
    }
}

impl KeyExchangePayload for PokerAction {
    fn key_announcement(public_key: PublicKey) -> Self {
        PokerAction::AnnounceSigningKey { public_key }
    }

    fn announced_key(&self) -> Option<&PublicKey> {
        match self {
            PokerAction::AnnounceSigningKey { public_key } => Some(public_key),
            _ => None,
        }
    }
}

/// SHA-256 commitment to one card decryption key, bound to its deck position.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyDigest(#[serde(with = "crate::crypto_serde::bytes32")] [u8; 32]);

impl KeyDigest {
    pub fn commit(position: usize, key: &BigUint) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(KEY_COMMITMENT_TAG);
        hasher.update((position as u64).to_be_bytes());
        hasher.update(key.to_bytes_be());
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for KeyDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyDigest({})", hex::encode(&self.0[..8]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::serde::{assert_round_trip_eq, assert_round_trip_json};

    #[test]
    fn wire_names_are_camel_case_tags() {
        let action = PokerAction::RevealKey {
            position: 3,
            key: BigUint::from(0x0100u32),
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["kind"], "revealKey");
        assert_eq!(json["position"], 3);
        assert_eq!(json["key"], "AQA=");

        let commit = PokerAction::PublishKey {
            key_digests: vec![KeyDigest::commit(0, &BigUint::from(7u8))],
        };
        let json = serde_json::to_value(&commit).unwrap();
        assert_eq!(json["kind"], "publishKey");
        assert!(json["keyDigests"][0].is_string());
        assert_eq!(
            serde_json::to_value(PokerAction::Pass).unwrap(),
            serde_json::json!({ "kind": "pass" })
        );
    }

    #[test]
    fn actions_survive_serialization() {
        assert_round_trip_eq(&PokerAction::ReEncryptAndShuffle {
            deck: vec![BigUint::from(11u8), BigUint::from(5u8)],
        });
        assert_round_trip_json(&PokerAction::AnnounceSigningKey {
            public_key: PublicKey::from_encoded("a2V5"),
        });
    }

    #[test]
    fn commitments_bind_position_and_key() {
        let key = BigUint::from(12345u32);
        assert_eq!(KeyDigest::commit(1, &key), KeyDigest::commit(1, &key));
        assert_ne!(KeyDigest::commit(1, &key), KeyDigest::commit(2, &key));
        assert_ne!(
            KeyDigest::commit(1, &key),
            KeyDigest::commit(1, &BigUint::from(12346u32))
        );
    }

    #[test]
    fn transcripts_differ_between_kinds_with_the_same_body() {
        let deck = vec![BigUint::from(9u8)];
        let shuffle = PokerAction::ReEncryptAndShuffle { deck: deck.clone() };
        let lock = PokerAction::LockCards { deck };
        assert_ne!(shuffle.to_signing_bytes(), lock.to_signing_bytes());
        assert_eq!(shuffle.kind(), ActionKind::ReEncryptAndShuffle);
        assert!(!ActionKind::Discard.is_automatic());
    }
}
