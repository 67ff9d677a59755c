//! Vote aggregation
//!
//! Collects signed votes per round and detects when at least Q distinct
//! committee members agree on the same value. Each signatory counts once per
//! (height, round, kind): the first vote wins, an identical resubmission is a
//! no-op and a conflicting one becomes [`Evidence`] without being counted.

use crate::evidence::Evidence;
use crate::vote::VoteKind;
use hyperdrive_core::{Hash, Height, Round, Signatory, Signature};
use std::collections::BTreeMap;

/// A signed vote the aggregator can count
pub trait Votable: Clone {
    fn kind(&self) -> VoteKind;
    fn signatory(&self) -> Signatory;
    fn signature(&self) -> &Signature;
    fn height(&self) -> Height;
    fn round(&self) -> Round;
    /// Header voted for; `None` is nil
    fn value(&self) -> Option<Hash>;
}

/// Result of inserting a vote
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// First vote of this signatory at this round; counted
    Added,
    /// Same value already counted for this signatory
    Duplicate,
    /// Different value already counted for this signatory; not counted
    Equivocation(Evidence),
    /// Vote belongs to another height; not counted
    WrongHeight,
}

/// Q or more votes for one value at one round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quorum<V> {
    pub round: Round,
    pub value: Option<Hash>,
    /// Supporting votes, ordered by signatory
    pub votes: Vec<V>,
}

/// Votes of one round, at most one per signatory
#[derive(Debug, Clone)]
pub struct VoteSet<V> {
    votes: BTreeMap<Signatory, V>,
    power_by_value: BTreeMap<Option<Hash>, usize>,
}

impl<V: Votable> VoteSet<V> {
    pub fn new() -> Self {
        Self {
            votes: BTreeMap::new(),
            power_by_value: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, vote: V) -> InsertOutcome {
        let signatory = vote.signatory();
        if let Some(existing) = self.votes.get(&signatory) {
            if existing.value() == vote.value() {
                return InsertOutcome::Duplicate;
            }
            return InsertOutcome::Equivocation(Evidence::ConflictingVotes {
                kind: vote.kind(),
                signatory,
                height: vote.height(),
                round: vote.round(),
                first: existing.value(),
                second: vote.value(),
            });
        }

        *self.power_by_value.entry(vote.value()).or_insert(0) += 1;
        self.votes.insert(signatory, vote);
        InsertOutcome::Added
    }

    /// Distinct signatories that voted for `value`
    pub fn power(&self, value: &Option<Hash>) -> usize {
        self.power_by_value.get(value).copied().unwrap_or(0)
    }

    /// Value with at least `quorum` votes, if any
    pub fn quorum_value(&self, quorum: usize) -> Option<Option<Hash>> {
        self.power_by_value
            .iter()
            .find(|(_, power)| **power >= quorum)
            .map(|(value, _)| *value)
    }

    /// Votes for `value`, ordered by signatory
    pub fn votes_for(&self, value: &Option<Hash>) -> Vec<V> {
        self.votes
            .values()
            .filter(|v| v.value() == *value)
            .cloned()
            .collect()
    }

    pub fn get(&self, signatory: &Signatory) -> Option<&V> {
        self.votes.get(signatory)
    }

    pub fn contains(&self, signatory: &Signatory) -> bool {
        self.votes.contains_key(signatory)
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }
}

impl<V: Votable> Default for VoteSet<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Votes of one kind at one height, grouped by round
#[derive(Debug, Clone)]
pub struct Aggregator<V> {
    kind: VoteKind,
    height: Height,
    threshold: usize,
    rounds: BTreeMap<Round, VoteSet<V>>,
}

impl<V: Votable> Aggregator<V> {
    pub fn new(kind: VoteKind, height: Height, threshold: usize) -> Self {
        Self {
            kind,
            height,
            threshold,
            rounds: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> VoteKind {
        self.kind
    }

    pub fn height(&self) -> Height {
        self.height
    }

    /// Quorum threshold Q
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Count a vote that has already been verified
    pub fn insert(&mut self, vote: V) -> InsertOutcome {
        if vote.height() != self.height {
            return InsertOutcome::WrongHeight;
        }
        self.rounds.entry(vote.round()).or_default().insert(vote)
    }

    /// Quorum reached at `round`, if any
    pub fn quorum(&self, round: Round) -> Option<Quorum<V>> {
        let set = self.rounds.get(&round)?;
        let value = set.quorum_value(self.threshold)?;
        Some(Quorum {
            round,
            value,
            votes: set.votes_for(&value),
        })
    }

    /// Quorums reached at `round` or later, in ascending round order
    pub fn quorums_from(&self, round: Round) -> Vec<Quorum<V>> {
        self.rounds
            .range(round..)
            .filter_map(|(r, _)| self.quorum(*r))
            .collect()
    }

    /// (round, value) of every quorum at `round` or later, without the votes
    pub fn quorum_values_from(&self, round: Round) -> Vec<(Round, Option<Hash>)> {
        self.rounds
            .range(round..)
            .filter_map(|(r, set)| set.quorum_value(self.threshold).map(|v| (*r, v)))
            .collect()
    }

    /// Number of signatories counted at `round`
    pub fn count(&self, round: Round) -> usize {
        self.rounds.get(&round).map(|s| s.len()).unwrap_or(0)
    }

    /// Power of `value` at `round`
    pub fn power(&self, round: Round, value: &Option<Hash>) -> usize {
        self.rounds
            .get(&round)
            .map(|s| s.power(value))
            .unwrap_or(0)
    }

    pub fn round_set(&self, round: Round) -> Option<&VoteSet<V>> {
        self.rounds.get(&round)
    }

    /// Forget everything and start collecting for `height`
    pub fn reset(&mut self, height: Height) {
        self.height = height;
        self.rounds.clear();
    }

    /// Drop rounds below `round`
    pub fn prune_below(&mut self, round: Round) {
        self.rounds = self.rounds.split_off(&round);
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }
}
