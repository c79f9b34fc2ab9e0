use std::collections::{BTreeMap, BTreeSet};

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use super::actions::KeyDigest;
use crate::bignum::mod_pow;
use crate::errors::ViolationReason;
use crate::sra::{SharedModulus, SraKeyPair};
use crate::types::ClientId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LayerKind {
    /// Whole-deck key used while shuffling.
    Round,
    /// Per-position key that can be revealed on its own.
    Card,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Layer {
    pub owner: ClientId,
    pub kind: LayerKind,
}

impl Layer {
    fn round(owner: &ClientId) -> Self {
        Self {
            owner: owner.clone(),
            kind: LayerKind::Round,
        }
    }

    fn card(owner: &ClientId) -> Self {
        Self {
            owner: owner.clone(),
            kind: LayerKind::Card,
        }
    }
}

/// A deck slot: its current value and the encryption layers still on it.
/// The value is plaintext exactly when `layers` is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedCard {
    #[serde(with = "crate::crypto_serde::biguint")]
    pub value: BigUint,
    pub layers: BTreeSet<Layer>,
}

impl EncryptedCard {
    pub fn is_plaintext(&self) -> bool {
        self.layers.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeckStage {
    Plaintext,
    Shuffling,
    Locking,
    Locked,
}

/// Game state every honest participant derives identically from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicState {
    cards: Vec<BigUint>,
    modulus: Option<SharedModulus>,
    key_digests: BTreeMap<ClientId, Vec<KeyDigest>>,
    deck: Vec<EncryptedCard>,
    stage: DeckStage,
    revealed_keys: BTreeMap<usize, BTreeMap<ClientId, BigUint>>,
    opened: BTreeMap<usize, BigUint>,
    discarded: BTreeMap<usize, ClientId>,
}

impl PublicState {
    /// Start from the agreed plaintext deck. Card values must be distinct and
    /// at least 2, since 0 and 1 are fixed points of every SRA key.
    pub fn new(cards: Vec<BigUint>) -> Result<Self, ViolationReason> {
        if cards.is_empty() {
            return Err(ViolationReason::BadDeck("deck is empty".into()));
        }
        let two = BigUint::from(2u8);
        if cards.iter().any(|card| *card < two) {
            return Err(ViolationReason::BadDeck("card values must be at least 2".into()));
        }
        if !all_distinct(&cards) {
            return Err(ViolationReason::BadDeck("card values must be distinct".into()));
        }
        let deck = cards
            .iter()
            .map(|value| EncryptedCard {
                value: value.clone(),
                layers: BTreeSet::new(),
            })
            .collect();
        Ok(Self {
            cards,
            modulus: None,
            key_digests: BTreeMap::new(),
            deck,
            stage: DeckStage::Plaintext,
            revealed_keys: BTreeMap::new(),
            opened: BTreeMap::new(),
            discarded: BTreeMap::new(),
        })
    }

    pub fn cards(&self) -> &[BigUint] {
        &self.cards
    }

    pub fn modulus(&self) -> Option<&SharedModulus> {
        self.modulus.as_ref()
    }

    pub fn deck(&self) -> &[EncryptedCard] {
        &self.deck
    }

    pub fn deck_size(&self) -> usize {
        self.cards.len()
    }

    pub fn stage(&self) -> DeckStage {
        self.stage
    }

    pub fn key_digests(&self, player: &ClientId) -> Option<&[KeyDigest]> {
        self.key_digests.get(player).map(Vec::as_slice)
    }

    pub fn revealed_keys(&self, position: usize) -> Option<&BTreeMap<ClientId, BigUint>> {
        self.revealed_keys.get(&position)
    }

    /// Cards opened to everyone, by position.
    pub fn opened(&self) -> &BTreeMap<usize, BigUint> {
        &self.opened
    }

    pub fn discarded(&self) -> &BTreeMap<usize, ClientId> {
        &self.discarded
    }

    pub fn is_deck_card(&self, value: &BigUint) -> bool {
        self.cards.contains(value)
    }

    pub(crate) fn publish_prime(&mut self, modulus: &BigUint) -> Result<(), ViolationReason> {
        if self.modulus.is_some() {
            return Err(ViolationReason::ModulusAlreadySet);
        }
        let modulus = SharedModulus::from_prime(modulus.clone())
            .map_err(|err| ViolationReason::BadModulus(err.to_string()))?;
        // Cards must stay clear of p - 1, which every odd exponent fixes.
        let upper = modulus.group_order();
        if self.cards.iter().any(|card| *card >= upper) {
            return Err(ViolationReason::BadModulus(
                "modulus too small for the card values".into(),
            ));
        }
        self.modulus = Some(modulus);
        Ok(())
    }

    pub(crate) fn publish_key(
        &mut self,
        from: &ClientId,
        digests: &[KeyDigest],
    ) -> Result<(), ViolationReason> {
        self.require_modulus()?;
        if self.key_digests.contains_key(from) {
            return Err(ViolationReason::WrongStage("card keys already committed"));
        }
        if matches!(self.stage, DeckStage::Locking | DeckStage::Locked) {
            return Err(ViolationReason::WrongStage("card keys must be committed before locking"));
        }
        if digests.len() != self.deck_size() {
            return Err(ViolationReason::BadDigestCount {
                expected: self.deck_size(),
                got: digests.len(),
            });
        }
        self.key_digests.insert(from.clone(), digests.to_vec());
        Ok(())
    }

    pub(crate) fn re_encrypt(
        &mut self,
        from: &ClientId,
        deck: &[BigUint],
    ) -> Result<(), ViolationReason> {
        self.require_modulus()?;
        if !matches!(self.stage, DeckStage::Plaintext | DeckStage::Shuffling) {
            return Err(ViolationReason::WrongStage("shuffling is over"));
        }
        let round = Layer::round(from);
        let mut layers = self.shared_layers();
        if !layers.insert(round) {
            return Err(ViolationReason::WrongStage("player already shuffled this round"));
        }
        self.check_ciphertexts(deck)?;
        self.deck = deck
            .iter()
            .map(|value| EncryptedCard {
                value: value.clone(),
                layers: layers.clone(),
            })
            .collect();
        self.stage = DeckStage::Shuffling;
        Ok(())
    }

    pub(crate) fn lock(&mut self, from: &ClientId, deck: &[BigUint]) -> Result<(), ViolationReason> {
        self.require_modulus()?;
        if !matches!(self.stage, DeckStage::Shuffling | DeckStage::Locking) {
            return Err(ViolationReason::WrongStage("deck is not being locked"));
        }
        if !self.key_digests.contains_key(from) {
            return Err(ViolationReason::WrongStage("card keys not committed"));
        }
        let mut layers = self.shared_layers();
        if !layers.remove(&Layer::round(from)) {
            return Err(ViolationReason::WrongStage("no round layer to replace"));
        }
        layers.insert(Layer::card(from));
        self.check_ciphertexts(deck)?;
        let fully_locked = layers.iter().all(|layer| layer.kind == LayerKind::Card);
        self.deck = deck
            .iter()
            .map(|value| EncryptedCard {
                value: value.clone(),
                layers: layers.clone(),
            })
            .collect();
        self.stage = if fully_locked {
            DeckStage::Locked
        } else {
            DeckStage::Locking
        };
        Ok(())
    }

    /// Strip `from`'s card layer at `position` with the revealed key. Repeating
    /// an already accepted key is a no-op.
    pub(crate) fn reveal_key(
        &mut self,
        from: &ClientId,
        position: usize,
        key: &BigUint,
    ) -> Result<(), ViolationReason> {
        if self.stage != DeckStage::Locked {
            return Err(ViolationReason::WrongStage("deck is not locked"));
        }
        if position >= self.deck.len() {
            return Err(ViolationReason::PositionOutOfRange(position));
        }
        let digests = self
            .key_digests
            .get(from)
            .ok_or(ViolationReason::WrongStage("card keys not committed"))?;
        if KeyDigest::commit(position, key) != digests[position] {
            return Err(ViolationReason::KeyMismatch(position));
        }
        let known = self.revealed_keys.entry(position).or_default();
        if known.contains_key(from) {
            return Ok(());
        }
        let modulus = self.modulus.as_ref().ok_or(ViolationReason::MissingModulus)?;
        let card = &mut self.deck[position];
        if !card.layers.remove(&Layer::card(from)) {
            return Err(ViolationReason::WrongStage("no card layer to remove"));
        }
        card.value = mod_pow(&card.value, key, modulus.value());
        known.insert(from.clone(), key.clone());
        Ok(())
    }

    /// Publish the plaintext at `position` once every layer is gone.
    pub(crate) fn open(&mut self, position: usize) -> Result<(), ViolationReason> {
        let card = self
            .deck
            .get(position)
            .ok_or(ViolationReason::PositionOutOfRange(position))?;
        if !card.is_plaintext() {
            return Err(ViolationReason::WrongStage("card still carries encryption layers"));
        }
        if !self.is_deck_card(&card.value) {
            return Err(ViolationReason::CorruptCard(position));
        }
        self.opened.insert(position, card.value.clone());
        Ok(())
    }

    pub(crate) fn discard(&mut self, from: &ClientId, position: usize) -> Result<(), ViolationReason> {
        if position >= self.deck.len() {
            return Err(ViolationReason::PositionOutOfRange(position));
        }
        if self.discarded.contains_key(&position) {
            return Err(ViolationReason::BadDeck(format!(
                "position {position} already discarded"
            )));
        }
        self.discarded.insert(position, from.clone());
        Ok(())
    }

    fn require_modulus(&self) -> Result<&SharedModulus, ViolationReason> {
        self.modulus.as_ref().ok_or(ViolationReason::MissingModulus)
    }

    /// Layers applied to the whole deck. Only meaningful before any reveal,
    /// which is the only time whole-deck actions are accepted.
    fn shared_layers(&self) -> BTreeSet<Layer> {
        self.deck
            .first()
            .map(|card| card.layers.clone())
            .unwrap_or_default()
    }

    /// Ciphertexts must cover the whole deck, avoid the fixed points
    /// `{0, 1, p - 1}` and stay distinct, since encryption is a bijection.
    fn check_ciphertexts(&self, deck: &[BigUint]) -> Result<(), ViolationReason> {
        let modulus = self.require_modulus()?;
        if deck.len() != self.deck_size() {
            return Err(ViolationReason::BadDeck(format!(
                "expected {} cards, got {}",
                self.deck_size(),
                deck.len()
            )));
        }
        let low = BigUint::from(2u8);
        let high = modulus.group_order();
        if deck.iter().any(|value| *value < low || *value >= high) {
            return Err(ViolationReason::BadDeck("card value outside the cipher range".into()));
        }
        if !all_distinct(deck) {
            return Err(ViolationReason::BadDeck("duplicate card".into()));
        }
        Ok(())
    }
}

fn all_distinct(values: &[BigUint]) -> bool {
    let unique: BTreeSet<&BigUint> = values.iter().collect();
    unique.len() == values.len()
}

/// Secrets a single participant never posts until a reveal asks for them.
#[derive(Debug, Default)]
pub struct PrivateState {
    pub(crate) round_key: Option<SraKeyPair>,
    pub(crate) card_keys: Vec<SraKeyPair>,
    pub(crate) hand: BTreeMap<usize, BigUint>,
}

impl PrivateState {
    pub fn hand(&self) -> &BTreeMap<usize, BigUint> {
        &self.hand
    }

    pub fn card_key(&self, position: usize) -> Option<&SraKeyPair> {
        self.card_keys.get(position)
    }

    pub fn has_round_key(&self) -> bool {
        self.round_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bignum::random_prime;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn cards() -> Vec<BigUint> {
        (2u32..6).map(BigUint::from).collect()
    }

    fn prime(seed: u64) -> BigUint {
        random_prime(64, &mut StdRng::seed_from_u64(seed)).unwrap()
    }

    #[test]
    fn plaintext_deck_rules() {
        assert!(matches!(PublicState::new(vec![]), Err(ViolationReason::BadDeck(_))));
        assert!(PublicState::new(vec![BigUint::from(1u8), BigUint::from(2u8)]).is_err());
        assert!(PublicState::new(vec![BigUint::from(3u8), BigUint::from(3u8)]).is_err());
        let state = PublicState::new(cards()).unwrap();
        assert_eq!(state.stage(), DeckStage::Plaintext);
        assert!(state.deck().iter().all(EncryptedCard::is_plaintext));
    }

    #[test]
    fn modulus_is_set_once_and_must_be_prime() {
        let mut state = PublicState::new(cards()).unwrap();
        assert!(matches!(
            state.publish_prime(&BigUint::from(91u32)),
            Err(ViolationReason::BadModulus(_))
        ));
        assert!(matches!(
            state.publish_prime(&BigUint::from(5u32)),
            Err(ViolationReason::BadModulus(_))
        ));
        state.publish_prime(&prime(1)).unwrap();
        assert_eq!(
            state.publish_prime(&prime(2)),
            Err(ViolationReason::ModulusAlreadySet)
        );
    }

    #[test]
    fn whole_deck_actions_need_a_modulus() {
        let mut state = PublicState::new(cards()).unwrap();
        let alice = ClientId::from("alice");
        assert_eq!(
            state.re_encrypt(&alice, &cards()),
            Err(ViolationReason::MissingModulus)
        );
    }

    #[test]
    fn shuffled_deck_must_be_distinct_and_complete() {
        let mut state = PublicState::new(cards()).unwrap();
        state.publish_prime(&prime(3)).unwrap();
        let alice = ClientId::from("alice");
        let mut deck = vec![BigUint::from(10u8); 4];
        assert!(matches!(
            state.re_encrypt(&alice, &deck),
            Err(ViolationReason::BadDeck(_))
        ));
        deck.pop();
        assert!(matches!(
            state.re_encrypt(&alice, &deck),
            Err(ViolationReason::BadDeck(_))
        ));
        let good: Vec<BigUint> = (10u32..14).map(BigUint::from).collect();
        state.re_encrypt(&alice, &good).unwrap();
        assert_eq!(state.stage(), DeckStage::Shuffling);
        assert_eq!(
            state.re_encrypt(&alice, &good),
            Err(ViolationReason::WrongStage("player already shuffled this round"))
        );
    }

    #[test]
    fn discarding_twice_is_rejected() {
        let mut state = PublicState::new(cards()).unwrap();
        let bob = ClientId::from("bob");
        state.discard(&bob, 1).unwrap();
        assert!(matches!(state.discard(&bob, 1), Err(ViolationReason::BadDeck(_))));
        assert_eq!(
            state.discard(&bob, 9),
            Err(ViolationReason::PositionOutOfRange(9))
        );
    }
}
