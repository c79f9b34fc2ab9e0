//! Reusable multi-step procedures expressed as expected-move templates.
//!
//! Step lists are generated from the roster and deck parameters, so a
//! recipe for any table size comes from the same builder.

use crate::protocol::{ActionKind, ExpectedMove, Step};
use crate::types::{ClientId, Roster};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipe {
    name: String,
    steps: Vec<Step>,
}

impl Recipe {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn into_steps(self) -> Vec<Step> {
        self.steps
    }

    /// Run `next` after this recipe.
    pub fn then(mut self, next: Recipe) -> Self {
        self.name = format!("{}+{}", self.name, next.name);
        self.steps.extend(next.steps);
        self
    }
}

/// The dealer (first seat) publishes the shared prime.
pub fn establish_modulus(roster: &Roster) -> Recipe {
    let dealer = roster.dealer();
    Recipe::new(
        "establish-modulus",
        vec![Step::all(
            "publish-prime",
            [ExpectedMove::new(dealer.clone(), ActionKind::PublishPrime)],
        )],
    )
}

/// Commit card keys, then one re-encrypt-and-shuffle pass and one locking
/// pass, each in seating order.
pub fn shuffle(roster: &Roster) -> Recipe {
    let mut steps = vec![Step::all(
        "commit-keys",
        roster
            .iter()
            .map(|player| ExpectedMove::new(player.clone(), ActionKind::PublishKey)),
    )];
    steps.extend(roster.iter().map(|player| {
        Step::all(
            format!("shuffle:{player}"),
            [ExpectedMove::new(player.clone(), ActionKind::ReEncryptAndShuffle)],
        )
    }));
    steps.extend(roster.iter().map(|player| {
        Step::all(
            format!("lock:{player}"),
            [ExpectedMove::new(player.clone(), ActionKind::LockCards)],
        )
    }));
    Recipe::new("shuffle", steps)
}

pub fn setup_and_shuffle(roster: &Roster) -> Recipe {
    establish_modulus(roster).then(shuffle(roster))
}

/// Open `position` to `recipient` only: everyone else posts their key for it,
/// in any order, and the recipient removes the last layer locally.
pub fn deal(roster: &Roster, position: usize, recipient: &ClientId) -> Recipe {
    Recipe::new(
        format!("deal:{position}"),
        vec![deal_step(roster, position, recipient)],
    )
}

/// Deal `per_player` cards to every seat, round-robin from position 0.
pub fn deal_hands(roster: &Roster, per_player: usize) -> Recipe {
    let seats = roster.len();
    let steps = (0..per_player)
        .flat_map(move |round| {
            roster
                .iter()
                .enumerate()
                .map(move |(seat, player)| (round * seats + seat, player))
        })
        .map(|(position, player)| deal_step(roster, position, player))
        .collect();
    Recipe::new("deal-hands", steps)
}

fn deal_step(roster: &Roster, position: usize, recipient: &ClientId) -> Step {
    Step::all(
        format!("deal:{position}->{recipient}"),
        roster
            .others(recipient)
            .map(|player| ExpectedMove::new(player.clone(), ActionKind::RevealKey)),
    )
    .with_reveal(position, Some(recipient.clone()))
}

/// Open `position` to the whole table. Players that already revealed this
/// position during a deal post the same key again.
pub fn reveal(roster: &Roster, position: usize) -> Recipe {
    Recipe::new(format!("reveal:{position}"), vec![reveal_step(roster, position)])
}

pub fn reveal_all(roster: &Roster, positions: impl IntoIterator<Item = usize>) -> Recipe {
    Recipe::new(
        "reveal-all",
        positions
            .into_iter()
            .map(|position| reveal_step(roster, position))
            .collect(),
    )
}

fn reveal_step(roster: &Roster, position: usize) -> Step {
    Step::all(
        format!("reveal:{position}"),
        roster
            .iter()
            .map(|player| ExpectedMove::new(player.clone(), ActionKind::RevealKey)),
    )
    .with_reveal(position, None)
}

/// One game-level turn: `player` makes exactly one of `kinds`.
pub fn turn(player: &ClientId, kinds: impl IntoIterator<Item = ActionKind>) -> Recipe {
    Recipe::new(
        format!("turn:{player}"),
        vec![Step::any_one(
            format!("turn:{player}"),
            kinds
                .into_iter()
                .map(|kind| ExpectedMove::new(player.clone(), kind)),
        )],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Quorum;

    fn roster() -> Roster {
        Roster::new(["alice", "bob", "carol"]).unwrap()
    }

    #[test]
    fn shuffle_scales_with_the_table() {
        let recipe = shuffle(&roster());
        assert_eq!(recipe.steps().len(), 1 + 3 + 3);
        assert_eq!(recipe.steps()[0].moves.len(), 3);
        assert_eq!(recipe.steps()[1].label, "shuffle:alice");
        assert_eq!(recipe.steps()[6].label, "lock:carol");
        assert!(recipe.steps().iter().all(|step| step.quorum == Quorum::All));
    }

    #[test]
    fn setup_starts_with_the_dealer_prime() {
        let recipe = setup_and_shuffle(&roster());
        let first = &recipe.steps()[0];
        assert_eq!(
            first.moves.iter().next(),
            Some(&ExpectedMove::new("alice", ActionKind::PublishPrime))
        );
        assert_eq!(recipe.name(), "establish-modulus+shuffle");
    }

    #[test]
    fn deal_excludes_the_recipient() {
        let bob = ClientId::from("bob");
        let recipe = deal(&roster(), 4, &bob);
        let step = &recipe.steps()[0];
        assert_eq!(step.moves.len(), 2);
        assert!(step.moves.iter().all(|mv| mv.from != bob));
        assert_eq!(step.reveal.as_ref().unwrap().recipient, Some(bob));
    }

    #[test]
    fn hands_are_dealt_round_robin() {
        let recipe = deal_hands(&roster(), 2);
        let targets: Vec<(usize, String)> = recipe
            .steps()
            .iter()
            .map(|step| {
                let reveal = step.reveal.as_ref().unwrap();
                (reveal.position, reveal.recipient.clone().unwrap().to_string())
            })
            .collect();
        assert_eq!(
            targets,
            vec![
                (0, "alice".into()),
                (1, "bob".into()),
                (2, "carol".into()),
                (3, "alice".into()),
                (4, "bob".into()),
                (5, "carol".into()),
            ]
        );
    }

    #[test]
    fn turn_accepts_any_one_listed_kind() {
        let alice = ClientId::from("alice");
        let recipe = turn(&alice, [ActionKind::Discard, ActionKind::Pass]);
        let step = &recipe.steps()[0];
        assert_eq!(step.quorum, Quorum::AnyOne);
        assert_eq!(step.moves.len(), 2);
        assert!(reveal_all(&roster(), 0..3).steps().iter().all(|s| s.reveal.is_some()));
    }
}
