use std::fmt;

use serde::{Deserialize, Serialize};

/// Participant identity as it appears on the action log.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ClientId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Fixed seating order of a game. The first entry is the dealer.
///
/// Serialized as a plain list of client ids; decoding applies the same checks
/// as [`Roster::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ClientId>", into = "Vec<ClientId>")]
pub struct Roster {
    players: Vec<ClientId>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RosterError {
    #[error("roster must contain at least one player")]
    Empty,
    #[error("player {0} is seated twice")]
    Duplicate(ClientId),
}

impl Roster {
    pub fn new<I, P>(players: I) -> Result<Self, RosterError>
    where
        I: IntoIterator<Item = P>,
        P: Into<ClientId>,
    {
        let players: Vec<ClientId> = players.into_iter().map(Into::into).collect();
        if players.is_empty() {
            return Err(RosterError::Empty);
        }
        for (idx, player) in players.iter().enumerate() {
            if players[..idx].contains(player) {
                return Err(RosterError::Duplicate(player.clone()));
            }
        }
        Ok(Self { players })
    }

    pub fn dealer(&self) -> &ClientId {
        &self.players[0]
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn contains(&self, player: &ClientId) -> bool {
        self.players.contains(player)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientId> {
        self.players.iter()
    }

    /// Everyone except `player`, in seating order.
    pub fn others<'a>(&'a self, player: &'a ClientId) -> impl Iterator<Item = &'a ClientId> {
        self.players.iter().filter(move |p| *p != player)
    }

    pub fn position(&self, player: &ClientId) -> Option<usize> {
        self.players.iter().position(|p| p == player)
    }
}

impl TryFrom<Vec<ClientId>> for Roster {
    type Error = RosterError;

    fn try_from(players: Vec<ClientId>) -> Result<Self, Self::Error> {
        Self::new(players)
    }
}

impl From<Roster> for Vec<ClientId> {
    fn from(roster: Roster) -> Self {
        roster.players
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::serde::assert_round_trip_eq;

    #[test]
    fn roster_rejects_empty_and_duplicates() {
        assert_eq!(
            Roster::new(Vec::<ClientId>::new()).unwrap_err(),
            RosterError::Empty
        );
        assert_eq!(
            Roster::new(["alice", "bob", "alice"]).unwrap_err(),
            RosterError::Duplicate(ClientId::from("alice"))
        );
    }

    #[test]
    fn dealer_is_first_seat() {
        let roster = Roster::new(["alice", "bob", "carol"]).unwrap();
        assert_eq!(roster.dealer().as_str(), "alice");
        let bob = ClientId::from("bob");
        let others: Vec<_> = roster.others(&bob).map(ClientId::as_str).collect();
        assert_eq!(others, vec!["alice", "carol"]);
        assert_eq!(roster.position(&bob), Some(1));
    }

    #[test]
    fn client_id_serializes_as_plain_string() {
        let id = ClientId::from("alice");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"alice\"");
        assert_round_trip_eq(&id);
    }

    #[test]
    fn roster_decoding_enforces_seating_rules() {
        let roster = Roster::new(["alice", "bob"]).unwrap();
        assert_eq!(serde_json::to_value(&roster).unwrap(), serde_json::json!(["alice", "bob"]));
        assert_round_trip_eq(&roster);

        assert!(serde_json::from_str::<Roster>("[]").is_err());
        assert!(serde_json::from_str::<Roster>(r#"["bob","bob"]"#).is_err());
    }
}
