//! Outbound edge of a replica
//!
//! A [`Dispatcher`] carries every action of a replica to the whole committee,
//! the replica itself included. Deduplication state belongs to the dispatcher
//! instance, so each replica suppresses only its own repeated broadcasts.

use crate::{ReplicaError, ReplicaResult};
use hyperdrive_consensus::{Action, DispatchKey};
use hyperdrive_core::Hash;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// An action addressed to the replica of one shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaMessage {
    pub shard: Hash,
    pub action: Action,
}

/// Broadcast capability handed to replicas
///
/// `dispatch` must not block: delivery may complete after it returns, and
/// each (shard, height, round, kind) is delivered at most once.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, shard: Hash, action: Action);
}

/// Fans actions out over bounded tokio channels, one per committee member
pub struct ChannelDispatcher {
    peers: Vec<mpsc::Sender<ReplicaMessage>>,
    seen: Mutex<HashMap<Hash, BTreeSet<DispatchKey>>>,
    max_seen: usize,
    /// Drop every action instead of sending it
    silent: bool,
    delay: Option<Duration>,
    cancel: CancellationToken,
    runtime: Handle,
}

impl ChannelDispatcher {
    /// Must be called from within a tokio runtime; delivery tasks run on it
    pub fn new(
        peers: Vec<mpsc::Sender<ReplicaMessage>>,
        cancel: CancellationToken,
    ) -> ReplicaResult<Self> {
        let runtime = Handle::try_current().map_err(|e| ReplicaError::Runtime(e.to_string()))?;
        Ok(Self {
            peers,
            seen: Mutex::new(HashMap::new()),
            max_seen: 10_000,
            silent: false,
            delay: None,
            cancel,
            runtime,
        })
    }

    /// Models a crashed member: actions are recorded but never sent
    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    /// Hold every delivery back by `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_max_seen(mut self, max_seen: usize) -> Self {
        self.max_seen = max_seen.max(1);
        self
    }

    /// Number of distinct actions dispatched for `shard`
    pub fn dispatched(&self, shard: &Hash) -> usize {
        self.seen.lock().get(shard).map(|s| s.len()).unwrap_or(0)
    }

    /// Returns false when `key` was already dispatched
    fn mark_seen(&self, key: DispatchKey) -> bool {
        let mut seen = self.seen.lock();
        let keys = seen.entry(key.shard).or_default();
        if !keys.insert(key) {
            return false;
        }
        while keys.len() > self.max_seen {
            keys.pop_first();
        }
        true
    }
}

impl Dispatcher for ChannelDispatcher {
    fn dispatch(&self, shard: Hash, action: Action) {
        let key = action.dispatch_key(shard);
        if !self.mark_seen(key) {
            trace!(
                "Suppressing repeated {} at height {} round {}",
                key.kind,
                key.height,
                key.round
            );
            return;
        }
        if self.silent || self.cancel.is_cancelled() {
            return;
        }

        let message = ReplicaMessage { shard, action };
        for peer in &self.peers {
            let peer = peer.clone();
            let message = message.clone();
            let cancel = self.cancel.clone();
            let delay = self.delay;

            self.runtime.spawn(async move {
                if let Some(delay) = delay {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    result = peer.send(message) => {
                        if result.is_err() {
                            debug!("Dropping {} for a closed inbox", key.kind);
                        }
                    }
                }
            });
        }
    }
}
