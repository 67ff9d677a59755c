//! Outputs of the state machine

use crate::polka::Commit;
use crate::proposal::Propose;
use crate::vote::{SignedPreCommit, SignedPreVote};
use hyperdrive_core::{Hash, Height, Round};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message the state machine asks to be broadcast to the committee
///
/// The set is closed; a dispatcher that meets a variant it does not know
/// must treat it as a fatal programming error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Action {
    Propose(Propose),
    SignedPreVote(SignedPreVote),
    SignedPreCommit(SignedPreCommit),
    Commit(Commit),
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Propose(_) => ActionKind::Propose,
            Action::SignedPreVote(_) => ActionKind::PreVote,
            Action::SignedPreCommit(_) => ActionKind::PreCommit,
            Action::Commit(_) => ActionKind::Commit,
        }
    }

    pub fn height(&self) -> Height {
        match self {
            Action::Propose(propose) => propose.height,
            Action::SignedPreVote(vote) => vote.height(),
            Action::SignedPreCommit(vote) => vote.height(),
            Action::Commit(commit) => commit.height(),
        }
    }

    pub fn round(&self) -> Round {
        match self {
            Action::Propose(propose) => propose.round,
            Action::SignedPreVote(vote) => vote.round(),
            Action::SignedPreCommit(vote) => vote.round(),
            Action::Commit(commit) => commit.round(),
        }
    }

    /// Identity used to broadcast each action of a replica at most once
    pub fn dispatch_key(&self, shard: Hash) -> DispatchKey {
        DispatchKey {
            shard,
            height: self.height(),
            round: self.round(),
            kind: self.kind(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, std::hash::Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Propose,
    PreVote,
    PreCommit,
    Commit,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Propose => "propose",
            ActionKind::PreVote => "pre-vote",
            ActionKind::PreCommit => "pre-commit",
            ActionKind::Commit => "commit",
        };
        write!(f, "{}", name)
    }
}

/// (shard, height, round, kind)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, std::hash::Hash, Serialize, Deserialize)]
pub struct DispatchKey {
    pub shard: Hash,
    pub height: Height,
    pub round: Round,
    pub kind: ActionKind,
}
