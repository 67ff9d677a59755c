//! Transactions and the FIFO transaction pool
//!
//! Transaction content is opaque to consensus: the application layer decides
//! what the bytes mean and whether they are valid.

use crate::{CoreError, CoreResult, Hash};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::trace;

/// Opaque application transaction
#[derive(Debug, Clone, PartialEq, Eq, std::hash::Hash, Serialize, Deserialize, bincode::Encode)]
pub struct Transaction {
    /// Application payload
    pub data: Vec<u8>,
}

impl Transaction {
    /// Create a new transaction
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Keccak-256 hash of the payload
    pub fn hash(&self) -> Hash {
        Hash::digest(&self.data)
    }
}

impl From<Vec<u8>> for Transaction {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

/// FIFO queue of pending transactions shared between the proposer and the
/// application layer
pub trait Pool: Send + Sync {
    /// Admit a transaction at the back of the queue
    fn enqueue(&self, tx: Transaction) -> CoreResult<()>;

    /// Take the transaction at the front of the queue
    fn dequeue(&self) -> Option<Transaction>;

    /// Take up to `max` transactions from the front, in admission order
    fn dequeue_batch(&self, max: usize) -> Vec<Transaction> {
        let mut batch = Vec::new();
        while batch.len() < max {
            match self.dequeue() {
                Some(tx) => batch.push(tx),
                None => break,
            }
        }
        batch
    }

    /// Return transactions of a block that failed to commit to the front of
    /// the queue, preserving their relative order
    fn requeue(&self, txs: Vec<Transaction>);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounded in-memory FIFO pool
#[derive(Debug)]
pub struct FifoPool {
    queue: Mutex<VecDeque<Transaction>>,
    capacity: usize,
}

impl FifoPool {
    /// Default maximum number of queued transactions
    pub const DEFAULT_CAPACITY: usize = 100_000;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for FifoPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Pool for FifoPool {
    fn enqueue(&self, tx: Transaction) -> CoreResult<()> {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            return Err(CoreError::PoolFull {
                capacity: self.capacity,
            });
        }
        queue.push_back(tx);
        Ok(())
    }

    fn dequeue(&self) -> Option<Transaction> {
        self.queue.lock().pop_front()
    }

    fn dequeue_batch(&self, max: usize) -> Vec<Transaction> {
        let mut queue = self.queue.lock();
        let n = max.min(queue.len());
        queue.drain(..n).collect()
    }

    fn requeue(&self, txs: Vec<Transaction>) {
        if txs.is_empty() {
            return;
        }
        trace!("Requeueing {} transactions", txs.len());
        // Requeued transactions were admitted before anything still queued,
        // so they go back to the front even if that exceeds capacity
        let mut queue = self.queue.lock();
        for tx in txs.into_iter().rev() {
            queue.push_front(tx);
        }
    }

    fn len(&self) -> usize {
        self.queue.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(i: u8) -> Transaction {
        Transaction::new(vec![i])
    }

    #[test]
    fn test_fifo_order() {
        let pool = FifoPool::new();
        for i in 0..5 {
            pool.enqueue(tx(i)).unwrap();
        }

        assert_eq!(pool.len(), 5);
        assert_eq!(pool.dequeue(), Some(tx(0)));
        assert_eq!(pool.dequeue_batch(2), vec![tx(1), tx(2)]);
        assert_eq!(pool.dequeue_batch(10), vec![tx(3), tx(4)]);
        assert!(pool.is_empty());
        assert_eq!(pool.dequeue(), None);
    }

    #[test]
    fn test_requeue_preserves_order() {
        let pool = FifoPool::new();
        for i in 0..4 {
            pool.enqueue(tx(i)).unwrap();
        }

        let batch = pool.dequeue_batch(2);
        pool.enqueue(tx(9)).unwrap();
        pool.requeue(batch);

        assert_eq!(pool.dequeue_batch(5), vec![tx(0), tx(1), tx(2), tx(3), tx(9)]);
    }

    #[test]
    fn test_capacity() {
        let pool = FifoPool::with_capacity(2);
        pool.enqueue(tx(0)).unwrap();
        pool.enqueue(tx(1)).unwrap();
        assert_eq!(
            pool.enqueue(tx(2)),
            Err(CoreError::PoolFull { capacity: 2 })
        );
    }

    #[test]
    fn test_transaction_hash() {
        assert_eq!(tx(1).hash(), tx(1).hash());
        assert_ne!(tx(1).hash(), tx(2).hash());
    }
}
