use std::time::Duration;

use num_bigint::BigUint;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use super::actions::{ActionKind, PokerAction};
use super::machine::{MachineStatus, StateMachine};
use super::player::LocalPlayer;
use crate::config::EngineConfig;
use crate::errors::{AuthError, Error, ProtocolError, TransportError};
use crate::recipes::Recipe;
use crate::session::Session;
use crate::types::ClientId;

const LOG_TARGET: &str = "mental_poker::protocol::driver";

/// Where [`GameDriver::drive`] stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Every queued step finished.
    Completed,
    /// The local player is on turn with a game-level choice to make.
    AwaitingLocal(Vec<ActionKind>),
    /// The turn timer ran out; the listed players never moved.
    Forfeited(Vec<ClientId>),
}

/// One participant's event loop: feeds verified log entries into the state
/// machine in log order and posts the local player's moves when owed.
pub struct GameDriver {
    session: Session<PokerAction>,
    machine: StateMachine,
    player: LocalPlayer,
    turn_timeout: Duration,
    in_flight: Option<ActionKind>,
    security_events: Vec<AuthError>,
}

impl GameDriver {
    pub fn new(
        session: Session<PokerAction>,
        cards: Vec<BigUint>,
        config: &EngineConfig,
    ) -> Result<Self, Error> {
        Self::with_rng(session, cards, config, StdRng::from_entropy())
    }

    pub fn with_rng(
        session: Session<PokerAction>,
        cards: Vec<BigUint>,
        config: &EngineConfig,
        rng: StdRng,
    ) -> Result<Self, Error> {
        let machine = StateMachine::new(session.roster.clone(), cards)?;
        let player = LocalPlayer::new(session.client_id().clone(), config, rng);
        Ok(Self {
            session,
            machine,
            player,
            turn_timeout: config.turn_timeout(),
            in_flight: None,
            security_events: Vec::new(),
        })
    }

    pub fn client_id(&self) -> &ClientId {
        self.player.client_id()
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    pub fn player(&self) -> &LocalPlayer {
        &self.player
    }

    pub fn session(&self) -> &Session<PokerAction> {
        &self.session
    }

    /// Authentication failures seen so far. None of them touched game state.
    pub fn security_events(&self) -> &[AuthError] {
        &self.security_events
    }

    /// Queue `recipe` and drive it until it completes or needs local input.
    pub async fn run(&mut self, recipe: Recipe) -> Result<Progress, Error> {
        info!(
            target: LOG_TARGET,
            client_id = %self.client_id(),
            recipe = recipe.name(),
            "running recipe"
        );
        self.machine.push_recipe(recipe)?;
        self.drive().await
    }

    /// Post a game-level move the machine expects from us, then keep driving.
    pub async fn play(&mut self, action: PokerAction) -> Result<Progress, Error> {
        let kind = action.kind();
        if !self.player.owes(&self.machine, kind) {
            return Err(ProtocolError::LocalState(format!(
                "{} is not on turn for {kind}",
                self.client_id()
            ))
            .into());
        }
        self.post(action).await?;
        self.drive().await
    }

    pub async fn drive(&mut self) -> Result<Progress, Error> {
        loop {
            match self.machine.status() {
                MachineStatus::Idle => return Ok(Progress::Completed),
                MachineStatus::Halted(violation) => {
                    return Err(ProtocolError::Violation(violation).into())
                }
                MachineStatus::Forfeited { stalled } => return Ok(Progress::Forfeited(stalled)),
                MachineStatus::Active => {}
            }

            if self.in_flight.is_none() {
                if let Some(action) = self.player.next_action(&self.machine)? {
                    self.post(action).await?;
                } else {
                    let owed = self.player.pending_kinds(&self.machine);
                    if !owed.is_empty() {
                        return Ok(Progress::AwaitingLocal(owed));
                    }
                }
            }

            let next = tokio::time::timeout(self.turn_timeout, self.session.subscription.next()).await;
            let entry = match next {
                Err(_elapsed) => {
                    let stalled = self.machine.forfeit();
                    return Ok(Progress::Forfeited(stalled));
                }
                Ok(None) => return Err(TransportError::Closed.into()),
                Ok(Some(entry)) => entry,
            };
            let action = match entry {
                Ok(action) => action,
                Err(Error::Auth(err)) => {
                    warn!(
                        target: LOG_TARGET,
                        client_id = %self.client_id(),
                        error = %err,
                        "security event: action dropped"
                    );
                    self.security_events.push(err);
                    continue;
                }
                Err(other) => return Err(other),
            };

            if action.client_id == *self.client_id() {
                self.in_flight = None;
            }
            let transition = self.machine.apply(&action)?;
            self.player.observe(&self.machine, &transition)?;
            if let Some(step) = &transition.completed {
                debug!(
                    target: LOG_TARGET,
                    client_id = %self.client_id(),
                    step = %step.label,
                    "step complete"
                );
            }
        }
    }

    async fn post(&mut self, action: PokerAction) -> Result<(), Error> {
        let kind = action.kind();
        self.session.transport.post_action(action).await?;
        self.in_flight = Some(kind);
        debug!(target: LOG_TARGET, client_id = %self.client_id(), kind = %kind, "posted");
        Ok(())
    }
}
