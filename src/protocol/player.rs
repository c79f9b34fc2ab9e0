use num_bigint::BigUint;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, info};

use super::actions::{ActionKind, KeyDigest, PokerAction};
use super::machine::{ExpectedMove, StateMachine, Transition};
use super::state::PrivateState;
use crate::config::EngineConfig;
use crate::errors::{CryptoError, ProtocolError};
use crate::sra::{SharedModulus, SraKeyPair};
use crate::types::ClientId;

const LOG_TARGET: &str = "mental_poker::protocol::player";

/// The local participant: owns its SRA keys and derives its protocol moves
/// from the shared state machine.
pub struct LocalPlayer {
    client_id: ClientId,
    rng: StdRng,
    prime_bits: u64,
    keygen_attempts: usize,
    private: PrivateState,
}

impl LocalPlayer {
    pub fn new(client_id: ClientId, config: &EngineConfig, rng: StdRng) -> Self {
        Self {
            client_id,
            rng,
            prime_bits: config.prime_bits,
            keygen_attempts: config.keygen_attempts,
            private: PrivateState::default(),
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn private_state(&self) -> &PrivateState {
        &self.private
    }

    /// Cards dealt to this player, by deck position.
    pub fn hand(&self) -> &std::collections::BTreeMap<usize, BigUint> {
        self.private.hand()
    }

    /// Kinds the machine currently expects from this player.
    pub fn pending_kinds(&self, machine: &StateMachine) -> Vec<ActionKind> {
        machine
            .expected_moves()
            .into_iter()
            .filter(|mv| mv.from == self.client_id)
            .map(|mv| mv.kind)
            .collect()
    }

    /// The protocol move this player owes right now, if it can be computed
    /// without game-layer input.
    pub fn next_action(&mut self, machine: &StateMachine) -> Result<Option<PokerAction>, ProtocolError> {
        let kinds = self.pending_kinds(machine);
        let Some(kind) = kinds.iter().copied().find(|kind| kind.is_automatic()) else {
            return Ok(None);
        };
        let action = match kind {
            ActionKind::PublishPrime => self.publish_prime(machine)?,
            ActionKind::PublishKey => self.publish_key(machine)?,
            ActionKind::ReEncryptAndShuffle => self.re_encrypt_and_shuffle(machine)?,
            ActionKind::LockCards => self.lock_cards(machine)?,
            ActionKind::RevealKey => self.reveal_key(machine)?,
            other => {
                return Err(ProtocolError::LocalState(format!(
                    "{other} cannot be derived automatically"
                )))
            }
        };
        debug!(target: LOG_TARGET, client_id = %self.client_id, kind = %kind, "local move prepared");
        Ok(Some(action))
    }

    /// Update private state after the machine accepted an action. Opens a card
    /// privately once a deal addressed to this player completes.
    pub fn observe(&mut self, machine: &StateMachine, transition: &Transition) -> Result<(), ProtocolError> {
        let Some(step) = &transition.completed else {
            return Ok(());
        };
        let Some(reveal) = &step.reveal else {
            return Ok(());
        };
        if reveal.recipient.as_ref() != Some(&self.client_id) {
            return Ok(());
        }
        let card = self.open_card(machine, reveal.position)?;
        info!(
            target: LOG_TARGET,
            client_id = %self.client_id,
            position = reveal.position,
            "card dealt"
        );
        self.private.hand.insert(reveal.position, card);
        Ok(())
    }

    /// Remove this player's last layer at `position` and check the result is
    /// a card of the agreed deck.
    pub fn open_card(&self, machine: &StateMachine, position: usize) -> Result<BigUint, ProtocolError> {
        let state = machine.public_state();
        let card = state
            .deck()
            .get(position)
            .ok_or_else(|| ProtocolError::LocalState(format!("no card at position {position}")))?;
        let own_only = card.layers.len() == 1
            && card.layers.iter().all(|layer| layer.owner == self.client_id);
        if !own_only {
            return Err(ProtocolError::LocalState(format!(
                "position {position} still carries other players' layers"
            )));
        }
        let key = self.card_key(position)?;
        let plaintext = key.decrypt(&card.value).map_err(crypto)?;
        if !state.is_deck_card(&plaintext) {
            return Err(ProtocolError::LocalState(format!(
                "card at position {position} did not decrypt to a deck card"
            )));
        }
        Ok(plaintext)
    }

    fn publish_prime(&mut self, machine: &StateMachine) -> Result<PokerAction, ProtocolError> {
        let modulus = SharedModulus::generate(self.prime_bits, &mut self.rng).map_err(crypto)?;
        let upper = modulus.group_order();
        if machine.public_state().cards().iter().any(|card| *card >= upper) {
            return Err(ProtocolError::LocalState(format!(
                "{}-bit prime is too small for the card values",
                self.prime_bits
            )));
        }
        Ok(PokerAction::PublishPrime {
            modulus: modulus.value().clone(),
        })
    }

    fn publish_key(&mut self, machine: &StateMachine) -> Result<PokerAction, ProtocolError> {
        let modulus = require_modulus(machine)?;
        let count = machine.public_state().deck_size();
        let mut card_keys = Vec::with_capacity(count);
        for _ in 0..count {
            card_keys.push(
                SraKeyPair::generate(&modulus, &mut self.rng, self.keygen_attempts).map_err(crypto)?,
            );
        }
        let key_digests = card_keys
            .iter()
            .enumerate()
            .map(|(position, key)| KeyDigest::commit(position, key.decryption_exponent()))
            .collect();
        self.private.card_keys = card_keys;
        Ok(PokerAction::PublishKey { key_digests })
    }

    fn re_encrypt_and_shuffle(&mut self, machine: &StateMachine) -> Result<PokerAction, ProtocolError> {
        let modulus = require_modulus(machine)?;
        let round_key =
            SraKeyPair::generate(&modulus, &mut self.rng, self.keygen_attempts).map_err(crypto)?;
        let mut deck = machine
            .public_state()
            .deck()
            .iter()
            .map(|card| round_key.encrypt(&card.value))
            .collect::<Result<Vec<_>, _>>()
            .map_err(crypto)?;
        deck.shuffle(&mut self.rng);
        self.private.round_key = Some(round_key);
        Ok(PokerAction::ReEncryptAndShuffle { deck })
    }

    fn lock_cards(&mut self, machine: &StateMachine) -> Result<PokerAction, ProtocolError> {
        let deck = machine.public_state().deck();
        if self.private.card_keys.len() != deck.len() {
            return Err(ProtocolError::LocalState("card keys were never generated".into()));
        }
        let round_key = self
            .private
            .round_key
            .take()
            .ok_or_else(|| ProtocolError::LocalState("no round key to remove".into()))?;
        let locked = deck
            .iter()
            .zip(&self.private.card_keys)
            .map(|(card, card_key)| {
                let bare = round_key.decrypt(&card.value)?;
                card_key.encrypt(&bare)
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(crypto)?;
        Ok(PokerAction::LockCards { deck: locked })
    }

    fn reveal_key(&mut self, machine: &StateMachine) -> Result<PokerAction, ProtocolError> {
        let position = machine
            .current_step()
            .and_then(|step| step.reveal.as_ref())
            .map(|reveal| reveal.position)
            .ok_or_else(|| ProtocolError::LocalState("no reveal in progress".into()))?;
        let key = self.card_key(position)?.decryption_exponent().clone();
        Ok(PokerAction::RevealKey { position, key })
    }

    fn card_key(&self, position: usize) -> Result<&SraKeyPair, ProtocolError> {
        self.private
            .card_key(position)
            .ok_or_else(|| ProtocolError::LocalState(format!("no card key for position {position}")))
    }

    /// True if the machine is waiting on `kind` from this player.
    pub fn owes(&self, machine: &StateMachine, kind: ActionKind) -> bool {
        machine
            .expected_moves()
            .contains(&ExpectedMove::new(self.client_id.clone(), kind))
    }
}

fn require_modulus(machine: &StateMachine) -> Result<SharedModulus, ProtocolError> {
    machine
        .public_state()
        .modulus()
        .cloned()
        .ok_or_else(|| ProtocolError::LocalState("shared modulus not established".into()))
}

fn crypto(err: CryptoError) -> ProtocolError {
    ProtocolError::LocalState(err.to_string())
}
