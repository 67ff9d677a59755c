//! Equivocation detection

use crate::vote::VoteKind;
use hyperdrive_core::{now_millis, Hash, Height, Round, Signatory, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Proof that a committee member signed two different values where only one
/// is allowed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Evidence {
    /// Two different votes of the same kind at one (height, round)
    ConflictingVotes {
        kind: VoteKind,
        signatory: Signatory,
        height: Height,
        round: Round,
        first: Option<Hash>,
        second: Option<Hash>,
    },
    /// Two different proposals from the leader of one (height, round)
    ConflictingProposals {
        signatory: Signatory,
        height: Height,
        round: Round,
        first: Hash,
        second: Hash,
    },
}

impl Evidence {
    pub fn signatory(&self) -> Signatory {
        match self {
            Evidence::ConflictingVotes { signatory, .. }
            | Evidence::ConflictingProposals { signatory, .. } => *signatory,
        }
    }

    pub fn height(&self) -> Height {
        match self {
            Evidence::ConflictingVotes { height, .. }
            | Evidence::ConflictingProposals { height, .. } => *height,
        }
    }
}

/// Evidence stamped with the time it was detected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub evidence: Evidence,
    pub detected_at: Timestamp,
}

/// Bounded record of misbehaviour seen by one replica
#[derive(Debug)]
pub struct EvidenceLog {
    records: Vec<EvidenceRecord>,
    /// Rounds whose leader never delivered a proposal, per signatory
    missed_proposals: HashMap<Signatory, u64>,
    capacity: usize,
}

impl EvidenceLog {
    pub const DEFAULT_CAPACITY: usize = 1_024;

    pub fn new(capacity: usize) -> Self {
        Self {
            records: Vec::new(),
            missed_proposals: HashMap::new(),
            capacity,
        }
    }

    /// Record evidence; the oldest record is evicted once the log is full
    pub fn record(&mut self, evidence: Evidence) {
        if self.records.iter().any(|r| r.evidence == evidence) {
            return;
        }
        warn!(
            "Equivocation by {} at height {}: {:?}",
            evidence.signatory(),
            evidence.height(),
            evidence
        );
        if self.capacity == 0 {
            return;
        }
        if self.records.len() >= self.capacity {
            self.records.remove(0);
        }
        self.records.push(EvidenceRecord {
            evidence,
            detected_at: now_millis(),
        });
    }

    /// Count a round whose leader did not propose in time
    pub fn record_missed_proposal(&mut self, leader: Signatory) -> u64 {
        let missed = self.missed_proposals.entry(leader).or_insert(0);
        *missed += 1;
        *missed
    }

    /// Forget missed proposals of a leader that proposed again
    pub fn reset_missed_proposals(&mut self, leader: &Signatory) {
        self.missed_proposals.remove(leader);
    }

    pub fn missed_proposals(&self, leader: &Signatory) -> u64 {
        self.missed_proposals.get(leader).copied().unwrap_or(0)
    }

    /// Drop evidence older than `keep_heights` below `current_height`
    pub fn cleanup_old_records(&mut self, current_height: Height, keep_heights: u64) {
        let cutoff = current_height.saturating_sub(keep_heights);
        self.records.retain(|r| r.evidence.height() > cutoff);
    }

    pub fn records(&self) -> &[EvidenceRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &Evidence> {
        self.records.iter().map(|r| &r.evidence)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for EvidenceLog {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
