//! Hyperdrive consensus state machine
//!
//! This crate implements the per-shard Propose → PreVote → PreCommit → Commit
//! cycle, the quorum ("polka") aggregation that turns signed votes into
//! committee-wide agreement, and the closed set of actions the state machine
//! emits for dispatch.

pub mod action;
pub mod aggregator;
pub mod config;
pub mod digest;
pub mod error;
pub mod evidence;
pub mod machine;
pub mod polka;
pub mod proposal;
pub mod vote;

pub use action::{Action, ActionKind, DispatchKey};
pub use aggregator::{Aggregator, InsertOutcome, Quorum, VoteSet, Votable};
pub use config::ConsensusConfig;
pub use error::{ConsensusError, ConsensusResult};
pub use evidence::{Evidence, EvidenceLog};
pub use machine::{Input, Lock, StateMachine, Step};
pub use polka::{Commit, Polka};
pub use proposal::Propose;
pub use vote::{PreCommit, PreVote, SignedPreCommit, SignedPreVote, VoteKind};
