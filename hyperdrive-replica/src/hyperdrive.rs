//! Multi-shard front door
//!
//! A node may sit on several committees at once. [`Hyperdrive`] keeps one
//! [`Replica`] per shard hash and routes every message to the replica of its
//! shard; messages for unknown shards are dropped.

use crate::dispatcher::{Dispatcher, ReplicaMessage};
use crate::replica::Replica;
use crate::ReplicaResult;
use hyperdrive_consensus::{
    Action, Commit, ConsensusConfig, Propose, SignedPreCommit, SignedPreVote,
};
use hyperdrive_core::{Blockchain, Hash, Pool, Shard, SignerVerifier};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

pub struct Hyperdrive {
    signer: Arc<dyn SignerVerifier>,
    dispatcher: Arc<dyn Dispatcher>,
    config: ConsensusConfig,
    replicas: RwLock<HashMap<Hash, Arc<Replica>>>,
}

impl Hyperdrive {
    pub fn new(
        signer: Arc<dyn SignerVerifier>,
        dispatcher: Arc<dyn Dispatcher>,
        config: ConsensusConfig,
    ) -> Self {
        Self {
            signer,
            dispatcher,
            config,
            replicas: RwLock::new(HashMap::new()),
        }
    }

    /// Join a shard and start its replica; joining twice keeps the first
    pub fn accept_shard(
        &self,
        shard: Shard,
        blockchain: Blockchain,
        pool: Arc<dyn Pool>,
        now: Instant,
    ) -> ReplicaResult<Arc<Replica>> {
        let replica = {
            let mut replicas = self.replicas.write();
            if let Some(existing) = replicas.get(&shard.hash) {
                debug!("Shard {} already joined", shard.hash);
                return Ok(existing.clone());
            }

            info!(
                "Joining shard {} of {} signatories at height {}",
                shard.hash,
                shard.size(),
                blockchain.height() + 1
            );
            let replica = Arc::new(Replica::new(
                shard,
                self.signer.clone(),
                blockchain,
                pool,
                self.config.clone(),
                self.dispatcher.clone(),
            )?);
            replicas.insert(replica.shard_hash(), replica.clone());
            replica
        };

        replica.start(now)?;
        Ok(replica)
    }

    /// Leave a shard; later messages for it are dropped
    pub fn drop_shard(&self, shard: &Hash) -> Option<Arc<Replica>> {
        let removed = self.replicas.write().remove(shard);
        if removed.is_some() {
            info!("Left shard {}", shard);
        }
        removed
    }

    pub fn replica(&self, shard: &Hash) -> Option<Arc<Replica>> {
        self.replicas.read().get(shard).cloned()
    }

    pub fn shards(&self) -> Vec<Hash> {
        self.replicas.read().keys().copied().collect()
    }

    pub fn accept_propose(&self, shard: Hash, propose: Propose, now: Instant) -> ReplicaResult<()> {
        match self.route(&shard) {
            Some(replica) => replica.accept_propose(propose, now),
            None => Ok(()),
        }
    }

    pub fn accept_pre_vote(
        &self,
        shard: Hash,
        vote: SignedPreVote,
        now: Instant,
    ) -> ReplicaResult<()> {
        match self.route(&shard) {
            Some(replica) => replica.accept_pre_vote(vote, now),
            None => Ok(()),
        }
    }

    pub fn accept_pre_commit(
        &self,
        shard: Hash,
        vote: SignedPreCommit,
        now: Instant,
    ) -> ReplicaResult<()> {
        match self.route(&shard) {
            Some(replica) => replica.accept_pre_commit(vote, now),
            None => Ok(()),
        }
    }

    pub fn accept_commit(&self, shard: Hash, commit: Commit, now: Instant) -> ReplicaResult<()> {
        match self.route(&shard) {
            Some(replica) => replica.accept_commit(commit, now),
            None => Ok(()),
        }
    }

    /// Route a dispatched action back in as an input
    ///
    /// # Panics
    ///
    /// On an action kind this replica does not understand: a peer running
    /// an incompatible protocol cannot be reasoned about safely.
    pub fn accept_action(&self, shard: Hash, action: Action, now: Instant) -> ReplicaResult<()> {
        match action {
            Action::Propose(propose) => self.accept_propose(shard, propose, now),
            Action::SignedPreVote(vote) => self.accept_pre_vote(shard, vote, now),
            Action::SignedPreCommit(vote) => self.accept_pre_commit(shard, vote, now),
            Action::Commit(commit) => self.accept_commit(shard, commit, now),
            other => panic!("unrecognised action {:?}", other),
        }
    }

    pub fn accept_message(&self, message: ReplicaMessage, now: Instant) -> ReplicaResult<()> {
        self.accept_action(message.shard, message.action, now)
    }

    /// Fire expired timeouts on every shard; a failing shard does not stop
    /// the others
    pub fn accept_tick(&self, now: Instant) {
        let replicas: Vec<Arc<Replica>> = self.replicas.read().values().cloned().collect();
        for replica in replicas {
            if let Err(e) = replica.tick(now) {
                error!("Tick failed for shard {}: {}", replica.shard_hash(), e);
            }
        }
    }

    fn route(&self, shard: &Hash) -> Option<Arc<Replica>> {
        let replica = self.replica(shard);
        if replica.is_none() {
            debug!("Dropping message for unknown shard {}", shard);
        }
        replica
    }
}
