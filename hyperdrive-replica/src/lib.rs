//! Hyperdrive replicas
//!
//! Binds the consensus state machine of each shard to a transaction pool, a
//! blockchain and a [`Dispatcher`] that carries actions to the committee.
//! [`Hyperdrive`] routes messages to the replica of their shard and
//! [`ReplicaRunner`] drives one node from an inbox channel and a tick timer.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod hyperdrive;
pub mod replica;
pub mod runner;

pub use config::ReplicaConfig;
pub use dispatcher::{ChannelDispatcher, Dispatcher, ReplicaMessage};
pub use error::{ReplicaError, ReplicaResult};
pub use hyperdrive::Hyperdrive;
pub use replica::Replica;
pub use runner::ReplicaRunner;
