//! Runs a committee of in-process nodes on one shard and prints the chain.
//!
//! ```text
//! cargo run -p hyperdrive-replica --example local_shard -- [nodes] [heights] [config.toml]
//! RUST_LOG=hyperdrive_consensus=debug cargo run -p hyperdrive-replica --example local_shard
//! ```

use anyhow::{bail, Result};
use hyperdrive_core::{
    Blockchain, EcdsaSigner, FifoPool, Hash, Pool, Shard, Signatories, SignerVerifier,
    Transaction,
};
use hyperdrive_replica::{ChannelDispatcher, Hyperdrive, ReplicaConfig, ReplicaRunner};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut args = std::env::args().skip(1);
    let nodes: usize = args.next().map(|a| a.parse()).transpose()?.unwrap_or(4);
    let heights: u64 = args.next().map(|a| a.parse()).transpose()?.unwrap_or(5);
    let config = match args.next() {
        Some(path) => ReplicaConfig::load_from_file(path)?,
        None => ReplicaConfig::default(),
    };
    if nodes == 0 {
        bail!("a committee needs at least one node");
    }

    let signers: Vec<Arc<EcdsaSigner>> =
        (0..nodes).map(|_| Arc::new(EcdsaSigner::random())).collect();
    let signatories = Signatories::new(signers.iter().map(|s| s.signatory()).collect())?;
    let shard = Shard::new(Hash::digest(b"local"), signatories);
    info!(
        "Shard {} with {} signatories, quorum {}",
        shard.hash,
        shard.size(),
        shard.quorum()
    );

    let cancel = CancellationToken::new();
    let (senders, inboxes): (Vec<_>, Vec<_>) =
        (0..nodes).map(|_| mpsc::channel(config.inbox_capacity)).unzip();

    let mut hyperdrives = Vec::with_capacity(nodes);
    let mut handles = Vec::with_capacity(nodes);
    for (signer, inbox) in signers.into_iter().zip(inboxes) {
        let dispatcher = ChannelDispatcher::new(senders.clone(), cancel.clone())?
            .with_max_seen(config.max_seen_actions);
        let hyperdrive = Arc::new(Hyperdrive::new(
            signer,
            Arc::new(dispatcher),
            config.consensus.clone(),
        ));
        handles.push(
            ReplicaRunner::new(
                hyperdrive.clone(),
                inbox,
                config.tick_interval(),
                cancel.clone(),
            )
            .spawn(),
        );
        hyperdrives.push(hyperdrive);
    }

    for (i, hyperdrive) in hyperdrives.iter().enumerate() {
        let pool = Arc::new(FifoPool::with_capacity(config.pool_capacity));
        for j in 0..3u8 {
            pool.enqueue(Transaction::new(vec![i as u8, j]))?;
        }
        hyperdrive.accept_shard(shard.clone(), Blockchain::new(), pool, Instant::now())?;
    }

    let observer = hyperdrives[0].replica(&shard.hash);
    while let Some(replica) = &observer {
        if replica.blockchain_height() >= heights {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    cancel.cancel();
    for handle in handles {
        handle.await?;
    }

    if let Some(replica) = observer {
        for block in replica.blockchain().iter() {
            println!(
                "height {:>3}  header {}  parent {}  txs {}",
                block.height(),
                block.header().to_hex(),
                block.parent_header().to_hex(),
                block.block.transactions.len()
            );
        }
    }
    Ok(())
}
