use std::collections::{BTreeSet, VecDeque};

use num_bigint::BigUint;
use tracing::{debug, info, warn};

use super::actions::{ActionKind, PokerAction};
use super::state::PublicState;
use crate::errors::{ProtocolError, Violation, ViolationReason};
use crate::recipes::Recipe;
use crate::transport::VerifiedAction;
use crate::types::{ClientId, Roster};

const LOG_TARGET: &str = "mental_poker::protocol::machine";

/// One entry of the expected-move set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExpectedMove {
    pub from: ClientId,
    pub kind: ActionKind,
}

impl ExpectedMove {
    pub fn new(from: impl Into<ClientId>, kind: ActionKind) -> Self {
        Self {
            from: from.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quorum {
    /// Every listed move must arrive, in any order.
    All,
    /// The first accepted move completes the step.
    AnyOne,
}

/// Card position a step opens, and to whom. `recipient: None` opens it publicly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealRequest {
    pub position: usize,
    pub recipient: Option<ClientId>,
}

/// One expected-move template of a recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub label: String,
    pub quorum: Quorum,
    pub moves: BTreeSet<ExpectedMove>,
    pub reveal: Option<RevealRequest>,
}

impl Step {
    pub fn all(label: impl Into<String>, moves: impl IntoIterator<Item = ExpectedMove>) -> Self {
        Self {
            label: label.into(),
            quorum: Quorum::All,
            moves: moves.into_iter().collect(),
            reveal: None,
        }
    }

    pub fn any_one(label: impl Into<String>, moves: impl IntoIterator<Item = ExpectedMove>) -> Self {
        Self {
            label: label.into(),
            quorum: Quorum::AnyOne,
            moves: moves.into_iter().collect(),
            reveal: None,
        }
    }

    pub fn with_reveal(mut self, position: usize, recipient: Option<ClientId>) -> Self {
        self.reveal = Some(RevealRequest {
            position,
            recipient,
        });
        self
    }
}

#[derive(Debug, Clone)]
struct ActiveStep {
    step: Step,
    remaining: BTreeSet<ExpectedMove>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineStatus {
    /// A step is waiting for moves.
    Active,
    /// Nothing queued; the last recipe completed.
    Idle,
    Halted(Violation),
    Forfeited { stalled: Vec<ClientId> },
}

/// Outcome of one accepted action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub step: String,
    pub accepted: ExpectedMove,
    /// Set when this action finished its step.
    pub completed: Option<Step>,
    /// Set when no further steps are queued.
    pub idle: bool,
}

/// Reactive expected-move machine. It never reads clocks or randomness, so
/// every participant that feeds it the same log converges on the same state.
#[derive(Debug, Clone)]
pub struct StateMachine {
    roster: Roster,
    state: PublicState,
    current: Option<ActiveStep>,
    queue: VecDeque<Step>,
    halted: Option<Violation>,
    forfeited: Option<Vec<ClientId>>,
    applied: u64,
}

impl StateMachine {
    pub fn new(roster: Roster, cards: Vec<BigUint>) -> Result<Self, ProtocolError> {
        let state = PublicState::new(cards)
            .map_err(|reason| ProtocolError::LocalState(reason.to_string()))?;
        Ok(Self {
            roster,
            state,
            current: None,
            queue: VecDeque::new(),
            halted: None,
            forfeited: None,
            applied: 0,
        })
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn public_state(&self) -> &PublicState {
        &self.state
    }

    /// Number of actions accepted so far.
    pub fn applied(&self) -> u64 {
        self.applied
    }

    /// Queue `recipe` behind whatever is already running.
    pub fn push_recipe(&mut self, recipe: Recipe) -> Result<(), ProtocolError> {
        for step in recipe.steps() {
            if let Some(reveal) = &step.reveal {
                if reveal.position >= self.state.deck_size() {
                    return Err(ProtocolError::LocalState(format!(
                        "recipe {} reveals position {} of a {}-card deck",
                        recipe.name(),
                        reveal.position,
                        self.state.deck_size()
                    )));
                }
            }
            if let Some(outsider) = step.moves.iter().find(|mv| !self.roster.contains(&mv.from)) {
                return Err(ProtocolError::LocalState(format!(
                    "recipe {} expects a move from {} who is not seated",
                    recipe.name(),
                    outsider.from
                )));
            }
        }
        debug!(
            target: LOG_TARGET,
            recipe = recipe.name(),
            steps = recipe.steps().len(),
            "recipe queued"
        );
        self.queue.extend(recipe.into_steps());
        if self.current.is_none() {
            self.activate_next();
        }
        Ok(())
    }

    /// Moves currently acceptable. Left untouched by a rejected action.
    pub fn expected_moves(&self) -> BTreeSet<ExpectedMove> {
        self.current
            .as_ref()
            .map(|active| active.remaining.clone())
            .unwrap_or_default()
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.current.as_ref().map(|active| &active.step)
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.queue.is_empty()
    }

    pub fn status(&self) -> MachineStatus {
        if let Some(violation) = &self.halted {
            return MachineStatus::Halted(violation.clone());
        }
        if let Some(stalled) = &self.forfeited {
            return MachineStatus::Forfeited {
                stalled: stalled.clone(),
            };
        }
        if self.is_idle() {
            MachineStatus::Idle
        } else {
            MachineStatus::Active
        }
    }

    /// Validate and apply one authenticated action, all or nothing.
    ///
    /// A violation halts the machine: the current recipe is dead and every
    /// later call fails with [`ProtocolError::Halted`] until
    /// [`Self::abandon_recipe`] is called.
    pub fn apply(&mut self, action: &VerifiedAction<PokerAction>) -> Result<Transition, ProtocolError> {
        if self.halted.is_some() || self.forfeited.is_some() {
            return Err(ProtocolError::Halted);
        }
        let offending = ExpectedMove::new(action.client_id.clone(), action.payload.kind());
        match self.try_apply(&offending, &action.payload) {
            Ok(transition) => Ok(transition),
            Err(reason) => {
                let violation = Violation { offending, reason };
                warn!(
                    target: LOG_TARGET,
                    client_id = %violation.offending.from,
                    kind = %violation.offending.kind,
                    reason = %violation.reason,
                    "protocol violation"
                );
                self.halted = Some(violation.clone());
                Err(violation.into())
            }
        }
    }

    fn try_apply(
        &mut self,
        mv: &ExpectedMove,
        payload: &PokerAction,
    ) -> Result<Transition, ViolationReason> {
        let active = self.current.as_ref().ok_or(ViolationReason::NoActiveStep)?;
        if !active.remaining.contains(mv) {
            return Err(ViolationReason::OutOfTurn);
        }
        let completes = active.step.quorum == Quorum::AnyOne || active.remaining.len() == 1;

        let mut next = self.state.clone();
        apply_effect(&mut next, &mv.from, payload, active.step.reveal.as_ref())?;
        if completes {
            if let Some(RevealRequest {
                position,
                recipient: None,
            }) = active.step.reveal
            {
                next.open(position)?;
            }
        }
        self.state = next;
        self.applied += 1;

        let label = active.step.label.clone();
        let completed = if completes {
            self.current.take().map(|done| done.step)
        } else {
            if let Some(active) = self.current.as_mut() {
                active.remaining.remove(mv);
            }
            None
        };
        debug!(
            target: LOG_TARGET,
            client_id = %mv.from,
            kind = %mv.kind,
            step = %label,
            "action accepted"
        );
        if completed.is_some() {
            self.activate_next();
        }
        Ok(Transition {
            step: label,
            accepted: mv.clone(),
            completed,
            idle: self.is_idle(),
        })
    }

    /// Give up on the running step because its outstanding players stalled.
    /// Returns the players whose moves never arrived.
    pub fn forfeit(&mut self) -> Vec<ClientId> {
        let Some(active) = self.current.as_ref() else {
            return Vec::new();
        };
        let stalled: Vec<ClientId> = active
            .remaining
            .iter()
            .map(|mv| mv.from.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        warn!(
            target: LOG_TARGET,
            step = %active.step.label,
            stalled = ?stalled,
            "players forfeited"
        );
        self.forfeited = Some(stalled.clone());
        stalled
    }

    /// Drop the running recipe and clear a halt or forfeit. Public state is
    /// kept; what to do next is the game layer's decision.
    pub fn abandon_recipe(&mut self) {
        if self.current.is_some() || !self.queue.is_empty() {
            info!(target: LOG_TARGET, "recipe abandoned");
        }
        self.current = None;
        self.queue.clear();
        self.halted = None;
        self.forfeited = None;
    }

    fn activate_next(&mut self) {
        while let Some(step) = self.queue.pop_front() {
            if step.moves.is_empty() {
                continue;
            }
            debug!(
                target: LOG_TARGET,
                step = %step.label,
                moves = step.moves.len(),
                "step active"
            );
            self.current = Some(ActiveStep {
                remaining: step.moves.clone(),
                step,
            });
            return;
        }
        info!(target: LOG_TARGET, applied = self.applied, "recipes complete");
    }
}

fn apply_effect(
    state: &mut PublicState,
    from: &ClientId,
    payload: &PokerAction,
    reveal: Option<&RevealRequest>,
) -> Result<(), ViolationReason> {
    match payload {
        PokerAction::AnnounceSigningKey { .. } => Err(ViolationReason::OutOfTurn),
        PokerAction::PublishPrime { modulus } => state.publish_prime(modulus),
        PokerAction::PublishKey { key_digests } => state.publish_key(from, key_digests),
        PokerAction::ReEncryptAndShuffle { deck } => state.re_encrypt(from, deck),
        PokerAction::LockCards { deck } => state.lock(from, deck),
        PokerAction::RevealKey { position, key } => {
            let request = reveal.ok_or(ViolationReason::WrongStage("no reveal in progress"))?;
            if *position != request.position {
                return Err(ViolationReason::WrongPosition {
                    expected: request.position,
                    got: *position,
                });
            }
            state.reveal_key(from, *position, key)
        }
        PokerAction::Discard { position } => state.discard(from, *position),
        PokerAction::Pass => Ok(()),
    }
}
