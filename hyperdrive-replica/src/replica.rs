//! One shard's replica: a state machine bound to its dispatcher

use crate::dispatcher::Dispatcher;
use crate::ReplicaResult;
use hyperdrive_consensus::{
    Action, Commit, ConsensusConfig, Evidence, Input, Propose, SignedPreCommit, SignedPreVote,
    StateMachine, Step,
};
use hyperdrive_core::{
    Blockchain, Hash, Height, Pool, Round, Shard, SignedBlock, SignerVerifier,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

/// Serialises every input of a shard through its state machine and hands
/// the resulting actions to the dispatcher
pub struct Replica {
    shard_hash: Hash,
    machine: Mutex<StateMachine>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl Replica {
    pub fn new(
        shard: Shard,
        signer: Arc<dyn SignerVerifier>,
        blockchain: Blockchain,
        pool: Arc<dyn Pool>,
        config: ConsensusConfig,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> ReplicaResult<Self> {
        let shard_hash = shard.hash;
        let machine = StateMachine::new(shard, signer, blockchain, pool, config)?;
        Ok(Self {
            shard_hash,
            machine: Mutex::new(machine),
            dispatcher,
        })
    }

    pub fn start(&self, now: Instant) -> ReplicaResult<()> {
        let actions = self.machine.lock().start(now)?;
        self.dispatch(actions);
        Ok(())
    }

    pub fn accept_propose(&self, propose: Propose, now: Instant) -> ReplicaResult<()> {
        self.accept(Input::Propose(propose), now)
    }

    pub fn accept_pre_vote(&self, vote: SignedPreVote, now: Instant) -> ReplicaResult<()> {
        self.accept(Input::PreVote(vote), now)
    }

    pub fn accept_pre_commit(&self, vote: SignedPreCommit, now: Instant) -> ReplicaResult<()> {
        self.accept(Input::PreCommit(vote), now)
    }

    pub fn accept_commit(&self, commit: Commit, now: Instant) -> ReplicaResult<()> {
        self.accept(Input::Commit(commit), now)
    }

    pub fn accept(&self, input: Input, now: Instant) -> ReplicaResult<()> {
        let actions = self.machine.lock().accept(input, now)?;
        self.dispatch(actions);
        Ok(())
    }

    pub fn tick(&self, now: Instant) -> ReplicaResult<()> {
        let actions = self.machine.lock().accept_tick(now)?;
        self.dispatch(actions);
        Ok(())
    }

    /// Actions leave after the machine lock is released, so a dispatcher may
    /// deliver straight back into this replica
    fn dispatch(&self, actions: Vec<Action>) {
        for action in actions {
            trace!(
                "Dispatching {} for shard {} at height {} round {}",
                action.kind(),
                self.shard_hash,
                action.height(),
                action.round()
            );
            self.dispatcher.dispatch(self.shard_hash, action);
        }
    }

    pub fn shard_hash(&self) -> Hash {
        self.shard_hash
    }

    pub fn shard(&self) -> Shard {
        self.machine.lock().shard().clone()
    }

    pub fn height(&self) -> Height {
        self.machine.lock().height()
    }

    pub fn round(&self) -> Round {
        self.machine.lock().round()
    }

    pub fn step(&self) -> Step {
        self.machine.lock().step()
    }

    pub fn blockchain_height(&self) -> Height {
        self.machine.lock().blockchain().height()
    }

    pub fn tip_header(&self) -> Hash {
        self.machine.lock().blockchain().tip_header()
    }

    pub fn block(&self, height: Height) -> Option<SignedBlock> {
        self.machine.lock().blockchain().block(height).cloned()
    }

    /// Snapshot of the committed log
    pub fn blockchain(&self) -> Blockchain {
        self.machine.lock().blockchain().clone()
    }

    pub fn evidence(&self) -> Vec<Evidence> {
        self.machine.lock().evidence().iter().cloned().collect()
    }
}

impl fmt::Debug for Replica {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replica")
            .field("shard", &self.shard_hash)
            .field("height", &self.height())
            .field("round", &self.round())
            .finish()
    }
}
