//! Event loop of one node

use crate::dispatcher::ReplicaMessage;
use crate::hyperdrive::Hyperdrive;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Feeds inbox messages and timer ticks into a [`Hyperdrive`] until the
/// token is cancelled or every sender is gone
pub struct ReplicaRunner {
    hyperdrive: Arc<Hyperdrive>,
    inbox: mpsc::Receiver<ReplicaMessage>,
    tick_interval: Duration,
    cancel: CancellationToken,
}

impl ReplicaRunner {
    pub fn new(
        hyperdrive: Arc<Hyperdrive>,
        inbox: mpsc::Receiver<ReplicaMessage>,
        tick_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            hyperdrive,
            inbox,
            tick_interval,
            cancel,
        }
    }

    pub async fn run(mut self) {
        info!(
            "Starting replica runner for {} shard(s), ticking every {:?}",
            self.hyperdrive.shards().len(),
            self.tick_interval
        );

        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Shutting down replica runner");
                    break;
                }
                message = self.inbox.recv() => {
                    let Some(message) = message else {
                        info!("Replica inbox closed");
                        break;
                    };
                    let shard = message.shard;
                    if let Err(e) = self.hyperdrive.accept_message(message, Instant::now()) {
                        error!("Failed to handle message for shard {}: {}", shard, e);
                    }
                }
                _ = ticker.tick() => {
                    self.hyperdrive.accept_tick(Instant::now());
                }
            }
        }

        info!("Replica runner stopped");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::ChannelDispatcher;
    use hyperdrive_consensus::ConsensusConfig;
    use hyperdrive_core::{Blockchain, EcdsaSigner, FifoPool, Hash, Shard, Signatories, SignerVerifier};

    #[tokio::test]
    async fn test_solo_node_commits_and_stops() {
        let cancel = CancellationToken::new();
        let (sender, inbox) = mpsc::channel(64);
        let dispatcher = Arc::new(ChannelDispatcher::new(vec![sender], cancel.clone()).unwrap());

        let signer = Arc::new(EcdsaSigner::random());
        let shard = Shard::new(
            Hash::random(),
            Signatories::new(vec![signer.signatory()]).unwrap(),
        );
        let hyperdrive = Arc::new(Hyperdrive::new(signer, dispatcher, ConsensusConfig::default()));
        let replica = hyperdrive
            .accept_shard(shard, Blockchain::new(), Arc::new(FifoPool::new()), Instant::now())
            .unwrap();

        let handle = ReplicaRunner::new(
            hyperdrive.clone(),
            inbox,
            Duration::from_millis(10),
            cancel.clone(),
        )
        .spawn();

        let deadline = Instant::now() + Duration::from_secs(10);
        while replica.blockchain_height() < 3 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(replica.blockchain_height() >= 3);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_runner_stops_when_inbox_closes() {
        let (sender, inbox) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let dispatcher = Arc::new(ChannelDispatcher::new(Vec::new(), cancel.clone()).unwrap());
        let hyperdrive = Arc::new(Hyperdrive::new(
            Arc::new(EcdsaSigner::random()),
            dispatcher,
            ConsensusConfig::default(),
        ));

        let handle =
            ReplicaRunner::new(hyperdrive, inbox, Duration::from_millis(10), cancel).spawn();
        drop(sender);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
