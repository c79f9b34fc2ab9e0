//! Protocol engine: the action sum type, the public deck state every peer
//! derives from the log, the expected-move state machine, and the driver
//! that connects them to a signed session.

pub mod actions;
pub mod driver;
pub mod machine;
pub mod player;
pub mod state;


pub use actions::{ActionKind, KeyDigest, PokerAction};
pub use driver::{GameDriver, Progress};
pub use machine::{
    ExpectedMove, MachineStatus, Quorum, RevealRequest, StateMachine, Step, Transition,
};
pub use player::LocalPlayer;
pub use state::{DeckStage, EncryptedCard, Layer, LayerKind, PrivateState, PublicState};
