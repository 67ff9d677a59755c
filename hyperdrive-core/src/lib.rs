//! Core data structures for the hyperdrive consensus engine
//!
//! This crate provides the building blocks every shard replica shares:
//! - Basic types (Hash, Height, Round, Timestamp)
//! - Signatories and the signer/verifier capability
//! - Transactions and the FIFO transaction pool
//! - Blocks, signed blocks and the append-only blockchain log
//! - Shard descriptors

pub mod block;
pub mod blockchain;
pub mod error;
pub mod shard;
pub mod sig;
pub mod transaction;
pub mod types;

// Re-export commonly used types
pub use block::*;
pub use blockchain::*;
pub use error::*;
pub use shard::*;
pub use sig::*;
pub use transaction::*;
pub use types::*;
