//! Per-shard consensus state machine
//!
//! One [`StateMachine`] drives a single shard through heights and rounds:
//!
//! 1. The leader of (height, round) proposes a block.
//! 2. Members pre-vote for the proposal. A locked member pre-votes its locked
//!    block instead whenever the proposal differs, is invalid or never
//!    arrives in time; an unlocked member pre-votes nil in those cases.
//! 3. Q pre-votes for one value form a polka; members pre-commit it and lock
//!    on the block.
//! 4. Q pre-commits for a block commit it; Q nil pre-commits end the round.
//!
//! The machine never talks to the network. Every call returns the actions it
//! wants broadcast, and its own messages are only counted once they come back
//! through the dispatcher like everyone else's.

use crate::action::Action;
use crate::aggregator::{Aggregator, InsertOutcome};
use crate::evidence::{Evidence, EvidenceLog};
use crate::polka::{Commit, Polka};
use crate::proposal::Propose;
use crate::vote::{PreCommit, PreVote, SignedPreCommit, SignedPreVote, VoteKind};
use crate::{ConsensusConfig, ConsensusResult};
use hyperdrive_core::{
    now_millis, Block, Blockchain, Hash, Height, Pool, Round, Shard, SignedBlock,
    SignerVerifier, Transaction,
};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Heights of evidence kept behind the current height
const EVIDENCE_KEEP_HEIGHTS: u64 = 128;

/// Position inside a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, std::hash::Hash)]
pub enum Step {
    AwaitingPropose,
    AwaitingQuorumPreVote,
    AwaitingQuorumPreCommit,
}

/// Block this replica pre-committed, and the round of the polka behind it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    pub block: SignedBlock,
    pub round: Round,
}

/// Message received from the committee
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Propose(Propose),
    PreVote(SignedPreVote),
    PreCommit(SignedPreCommit),
    Commit(Commit),
}

impl Input {
    pub fn height(&self) -> Height {
        match self {
            Input::Propose(propose) => propose.height,
            Input::PreVote(vote) => vote.height(),
            Input::PreCommit(vote) => vote.height(),
            Input::Commit(commit) => commit.height(),
        }
    }
}

impl From<Action> for Input {
    fn from(action: Action) -> Self {
        match action {
            Action::Propose(propose) => Input::Propose(propose),
            Action::SignedPreVote(vote) => Input::PreVote(vote),
            Action::SignedPreCommit(vote) => Input::PreCommit(vote),
            Action::Commit(commit) => Input::Commit(commit),
        }
    }
}

pub struct StateMachine {
    shard: Shard,
    signer: Arc<dyn SignerVerifier>,
    pool: Arc<dyn Pool>,
    blockchain: Blockchain,
    config: ConsensusConfig,
    is_member: bool,
    started: bool,

    height: Height,
    round: Round,
    step: Step,
    round_started_at: Option<Instant>,
    lock: Option<Lock>,

    proposals: BTreeMap<Round, Propose>,
    pre_votes: Aggregator<SignedPreVote>,
    pre_commits: Aggregator<SignedPreCommit>,
    pending_commit: Option<Commit>,
    /// Transactions this replica drained from the pool at the current height
    pending_transactions: Vec<Transaction>,

    buffered: BTreeMap<Height, Vec<Input>>,
    buffered_len: usize,
    evidence: EvidenceLog,
}

impl StateMachine {
    /// Create a state machine that resumes after the tip of `blockchain`
    pub fn new(
        shard: Shard,
        signer: Arc<dyn SignerVerifier>,
        blockchain: Blockchain,
        pool: Arc<dyn Pool>,
        config: ConsensusConfig,
    ) -> ConsensusResult<Self> {
        config.validate()?;

        let height = blockchain.height() + 1;
        let quorum = shard.quorum();
        let is_member = shard.signatories.contains(&signer.signatory());
        if !is_member {
            debug!(
                "{} follows shard {} without voting",
                signer.signatory(),
                shard.hash
            );
        }

        Ok(Self {
            round: config.resume_round,
            step: Step::AwaitingPropose,
            round_started_at: None,
            lock: None,
            proposals: BTreeMap::new(),
            pre_votes: Aggregator::new(VoteKind::PreVote, height, quorum),
            pre_commits: Aggregator::new(VoteKind::PreCommit, height, quorum),
            pending_commit: None,
            pending_transactions: Vec::new(),
            buffered: BTreeMap::new(),
            buffered_len: 0,
            evidence: EvidenceLog::default(),
            shard,
            signer,
            pool,
            blockchain,
            config,
            is_member,
            started: false,
            height,
        })
    }

    /// Enter the first round; proposes when this replica leads it
    pub fn start(&mut self, now: Instant) -> ConsensusResult<Vec<Action>> {
        if self.started {
            return Ok(Vec::new());
        }
        self.started = true;
        info!(
            "Starting shard {} at height {} round {}",
            self.shard.hash, self.height, self.config.resume_round
        );

        let mut actions = Vec::new();
        self.enter_round(self.config.resume_round, now, &mut actions)?;
        self.progress(now, &mut actions)?;
        Ok(actions)
    }

    pub fn accept_propose(&mut self, propose: Propose, now: Instant) -> ConsensusResult<Vec<Action>> {
        self.accept(Input::Propose(propose), now)
    }

    pub fn accept_pre_vote(
        &mut self,
        vote: SignedPreVote,
        now: Instant,
    ) -> ConsensusResult<Vec<Action>> {
        self.accept(Input::PreVote(vote), now)
    }

    pub fn accept_pre_commit(
        &mut self,
        vote: SignedPreCommit,
        now: Instant,
    ) -> ConsensusResult<Vec<Action>> {
        self.accept(Input::PreCommit(vote), now)
    }

    pub fn accept_commit(&mut self, commit: Commit, now: Instant) -> ConsensusResult<Vec<Action>> {
        self.accept(Input::Commit(commit), now)
    }

    /// Feed one message from the committee
    ///
    /// Stale, invalid and duplicate messages are dropped without error; the
    /// only errors are local signing failures.
    pub fn accept(&mut self, input: Input, now: Instant) -> ConsensusResult<Vec<Action>> {
        if !self.ingest(input) || !self.started {
            return Ok(Vec::new());
        }
        let mut actions = Vec::new();
        self.progress(now, &mut actions)?;
        Ok(actions)
    }

    /// Fire the propose and round timeouts that have expired by `now`
    pub fn accept_tick(&mut self, now: Instant) -> ConsensusResult<Vec<Action>> {
        let Some(started_at) = self.round_started_at else {
            return Ok(Vec::new());
        };
        let elapsed = now.saturating_duration_since(started_at);
        let mut actions = Vec::new();

        if self.step == Step::AwaitingPropose && elapsed >= self.config.propose_timeout(self.round) {
            if let Some(leader) = self.shard.signatories.leader(self.height, self.round).copied() {
                let missed = self.evidence.record_missed_proposal(leader);
                debug!(
                    "No proposal from {} at height {} round {} ({} missed)",
                    leader, self.height, self.round, missed
                );
            }
            self.pre_vote(self.locked_value(), &mut actions)?;
        }

        if elapsed >= self.config.round_timeout(self.round) {
            debug!("Round {} at height {} expired", self.round, self.height);
            self.enter_round(self.round + 1, now, &mut actions)?;
        }

        self.progress(now, &mut actions)?;
        Ok(actions)
    }

    pub fn shard(&self) -> &Shard {
        &self.shard
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn round(&self) -> Round {
        self.round
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn lock(&self) -> Option<&Lock> {
        self.lock.as_ref()
    }

    pub fn locked_block(&self) -> Option<&SignedBlock> {
        self.lock.as_ref().map(|l| &l.block)
    }

    pub fn blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    pub fn evidence(&self) -> &EvidenceLog {
        &self.evidence
    }

    pub fn is_member(&self) -> bool {
        self.is_member
    }

    /// Number of inputs held back for future heights
    pub fn buffered_inputs(&self) -> usize {
        self.buffered_len
    }

    /// Store or count a message; returns whether anything changed
    fn ingest(&mut self, input: Input) -> bool {
        let height = input.height();
        if height < self.height {
            trace!("Dropping input for committed height {}", height);
            return false;
        }
        if height > self.height {
            self.buffer(input);
            return false;
        }

        match input {
            Input::Propose(propose) => self.ingest_propose(propose),
            Input::PreVote(vote) => self.ingest_pre_vote(vote),
            Input::PreCommit(vote) => self.ingest_pre_commit(vote),
            Input::Commit(commit) => self.ingest_commit(commit),
        }
    }

    fn buffer(&mut self, input: Input) {
        let height = input.height();
        if height > self.height.saturating_add(self.config.future_height_window) {
            debug!("Dropping input for height {} beyond window", height);
            return;
        }
        if self.buffered_len >= self.config.max_buffered_inputs {
            debug!("Input buffer full, dropping input for height {}", height);
            return;
        }
        self.buffered.entry(height).or_default().push(input);
        self.buffered_len += 1;
    }

    fn within_round_window(&self, round: Round) -> bool {
        round <= self.round.saturating_add(self.config.future_round_window)
    }

    fn ingest_propose(&mut self, propose: Propose) -> bool {
        if propose.round < self.round || !self.within_round_window(propose.round) {
            trace!("Dropping proposal for round {}", propose.round);
            return false;
        }
        if let Err(e) = propose.verify_leader(&self.shard, self.signer.as_ref()) {
            debug!("Dropping proposal: {}", e);
            return false;
        }

        if let Some(existing) = self.proposals.get(&propose.round) {
            if existing.block_header() != propose.block_header() {
                self.evidence.record(Evidence::ConflictingProposals {
                    signatory: propose.signatory,
                    height: propose.height,
                    round: propose.round,
                    first: existing.block_header(),
                    second: propose.block_header(),
                });
            }
            return false;
        }

        self.evidence.reset_missed_proposals(&propose.signatory);
        self.proposals.insert(propose.round, propose);
        true
    }

    fn ingest_pre_vote(&mut self, vote: SignedPreVote) -> bool {
        if !self.within_round_window(vote.round()) {
            return false;
        }
        if let Err(e) = vote.verify(&self.shard, self.signer.as_ref()) {
            debug!("Dropping pre-vote: {}", e);
            return false;
        }
        let outcome = self.pre_votes.insert(vote);
        self.count(outcome)
    }

    fn ingest_pre_commit(&mut self, vote: SignedPreCommit) -> bool {
        if !self.within_round_window(vote.round()) {
            return false;
        }
        if let Err(e) = vote.verify(&self.shard, self.signer.as_ref()) {
            debug!("Dropping pre-commit: {}", e);
            return false;
        }
        let unlocked = self.observe_polka(vote.round(), vote.block_header());
        let outcome = self.pre_commits.insert(vote);
        self.count(outcome) || unlocked
    }

    fn ingest_commit(&mut self, commit: Commit) -> bool {
        if let Err(e) = commit.verify(&self.shard, self.signer.as_ref()) {
            debug!("Dropping commit: {}", e);
            return false;
        }
        self.pending_commit = Some(commit);
        true
    }

    fn count(&mut self, outcome: InsertOutcome) -> bool {
        match outcome {
            InsertOutcome::Added => true,
            InsertOutcome::Duplicate | InsertOutcome::WrongHeight => false,
            InsertOutcome::Equivocation(evidence) => {
                self.evidence.record(evidence);
                false
            }
        }
    }

    /// Apply every transition the stored messages allow
    fn progress(&mut self, now: Instant, actions: &mut Vec<Action>) -> ConsensusResult<()> {
        loop {
            let before = (self.height, self.round, self.step);

            if self.try_commit(now, actions)? {
                continue;
            }

            self.observe_own_polkas();

            if let Some(round) = self.catch_up_round() {
                self.enter_round(round, now, actions)?;
                continue;
            }

            match self.step {
                Step::AwaitingPropose => {
                    if let Some(propose) = self.proposals.get(&self.round).cloned() {
                        let value = self.pre_vote_value(&propose);
                        self.pre_vote(value, actions)?;
                    }
                }
                Step::AwaitingQuorumPreVote => {
                    if let Some(quorum) = self.pre_votes.quorum(self.round) {
                        let polka = Polka::from_quorum(self.height, quorum);
                        self.pre_commit(polka, actions)?;
                    }
                }
                Step::AwaitingQuorumPreCommit => {}
            }

            if (self.height, self.round, self.step) == before {
                return Ok(());
            }
        }
    }

    /// Commit a verified certificate or a local pre-commit quorum for a block
    fn try_commit(&mut self, now: Instant, actions: &mut Vec<Action>) -> ConsensusResult<bool> {
        if let Some(commit) = self.pending_commit.take() {
            if self.apply_commit(&commit) {
                self.enter_height(now, actions)?;
                return Ok(true);
            }
        }

        let round = self
            .pre_commits
            .quorum_values_from(0)
            .into_iter()
            .find(|(_, value)| value.is_some())
            .map(|(round, _)| round);
        let Some(commit) = round
            .and_then(|r| self.pre_commits.quorum(r))
            .and_then(Commit::from_quorum)
        else {
            return Ok(false);
        };

        if !self.apply_commit(&commit) {
            return Ok(false);
        }
        actions.push(Action::Commit(commit));
        self.enter_height(now, actions)?;
        Ok(true)
    }

    fn apply_commit(&mut self, commit: &Commit) -> bool {
        let Some(block) = commit.block() else {
            return false;
        };
        if block.height() != self.height {
            return false;
        }
        if let Err(e) = self.blockchain.extend(block.clone()) {
            warn!("Cannot commit block {} at height {}: {}", block.header(), self.height, e);
            return false;
        }

        // Each committed copy consumes one pending copy
        let mut committed: HashMap<Hash, usize> = HashMap::new();
        for tx in &block.block.transactions {
            *committed.entry(tx.hash()).or_default() += 1;
        }
        let leftover: Vec<Transaction> = self
            .pending_transactions
            .drain(..)
            .filter(|tx| match committed.get_mut(&tx.hash()) {
                Some(count) if *count > 0 => {
                    *count -= 1;
                    false
                }
                _ => true,
            })
            .collect();
        if !leftover.is_empty() {
            debug!("Returning {} uncommitted transactions to the pool", leftover.len());
            self.pool.requeue(leftover);
        }

        info!(
            "Committed block {} at height {} round {} ({} transactions)",
            block.header(),
            self.height,
            commit.round(),
            block.block.transactions.len()
        );
        true
    }

    /// Move past the tip and replay inputs buffered for the new height
    fn enter_height(&mut self, now: Instant, actions: &mut Vec<Action>) -> ConsensusResult<()> {
        self.height = self.blockchain.height() + 1;
        self.lock = None;
        self.proposals.clear();
        self.pre_votes.reset(self.height);
        self.pre_commits.reset(self.height);
        self.evidence
            .cleanup_old_records(self.height, EVIDENCE_KEEP_HEIGHTS);

        self.enter_round(0, now, actions)?;

        self.buffered = self.buffered.split_off(&self.height);
        let ready = self.buffered.remove(&self.height).unwrap_or_default();
        self.buffered_len = self.buffered.values().map(Vec::len).sum();
        for input in ready {
            self.ingest(input);
        }
        Ok(())
    }

    fn enter_round(&mut self, round: Round, now: Instant, actions: &mut Vec<Action>) -> ConsensusResult<()> {
        self.round = round;
        self.step = Step::AwaitingPropose;
        self.round_started_at = Some(now);
        self.proposals = self.proposals.split_off(&round);
        debug!("Entering height {} round {}", self.height, round);

        let leader = self.shard.signatories.leader(self.height, round).copied();
        if self.is_member && leader == Some(self.signer.signatory()) {
            self.propose(actions)?;
        }
        Ok(())
    }

    fn propose(&mut self, actions: &mut Vec<Action>) -> ConsensusResult<()> {
        let block = match &self.lock {
            Some(lock) => lock.block.clone(),
            None => self.build_block()?,
        };
        let propose = Propose::new(
            self.height,
            self.round,
            block,
            &self.shard.hash,
            self.signer.as_ref(),
        )?;
        info!(
            "Proposing block {} at height {} round {}",
            propose.block_header(),
            self.height,
            self.round
        );
        actions.push(Action::Propose(propose));
        Ok(())
    }

    fn build_block(&mut self) -> ConsensusResult<SignedBlock> {
        let max = self.config.max_block_transactions;
        let room = max.saturating_sub(self.pending_transactions.len());
        self.pending_transactions
            .extend(self.pool.dequeue_batch(room));
        let transactions: Vec<Transaction> =
            self.pending_transactions.iter().take(max).cloned().collect();

        let block = Block::new(
            self.height,
            now_millis(),
            self.blockchain.tip_header(),
            transactions,
        )?;
        Ok(block.sign(self.signer.as_ref())?)
    }

    /// What to pre-vote when the proposal is missing or unacceptable: the
    /// locked block while locked, nil otherwise
    fn locked_value(&self) -> Option<SignedBlock> {
        self.lock.as_ref().map(|lock| lock.block.clone())
    }

    fn pre_vote_value(&self, propose: &Propose) -> Option<SignedBlock> {
        if let Err(e) = propose.verify_block(&self.shard, self.signer.as_ref()) {
            debug!("Rejecting invalid proposal: {}", e);
            return self.locked_value();
        }
        if let Err(e) = self.blockchain.check_extends(&propose.block) {
            debug!("Rejecting proposal that does not extend the tip: {}", e);
            return self.locked_value();
        }
        if let Some(lock) = &self.lock {
            if lock.block.header() != propose.block_header() {
                debug!(
                    "Pre-voting locked block {} (round {}) over proposal {}",
                    lock.block.header(),
                    lock.round,
                    propose.block_header()
                );
                return Some(lock.block.clone());
            }
        }
        Some(propose.block.clone())
    }

    fn pre_vote(&mut self, block: Option<SignedBlock>, actions: &mut Vec<Action>) -> ConsensusResult<()> {
        self.step = Step::AwaitingQuorumPreVote;
        if !self.is_member {
            return Ok(());
        }
        let vote = PreVote::new(self.height, self.round, block)
            .sign(&self.shard.hash, self.signer.as_ref())?;
        debug!(
            "Pre-voting {:?} at height {} round {}",
            vote.block_header(),
            self.height,
            self.round
        );
        actions.push(Action::SignedPreVote(vote));
        Ok(())
    }

    fn pre_commit(&mut self, polka: Polka, actions: &mut Vec<Action>) -> ConsensusResult<()> {
        if let Some(block) = &polka.block {
            if let Err(e) = self.blockchain.check_extends(block) {
                warn!("Polka at round {} for a block off the tip: {}", polka.round, e);
                return Ok(());
            }
            self.lock = Some(Lock {
                block: block.clone(),
                round: polka.round,
            });
        }

        self.step = Step::AwaitingQuorumPreCommit;
        if !self.is_member {
            return Ok(());
        }
        let vote = PreCommit::new(polka).sign(&self.shard.hash, self.signer.as_ref())?;
        debug!(
            "Pre-committing {:?} at height {} round {}",
            vote.block_header(),
            self.height,
            self.round
        );
        actions.push(Action::SignedPreCommit(vote));
        Ok(())
    }

    /// Release the lock on a polka for another value at a later round;
    /// returns whether the lock was released
    fn observe_polka(&mut self, round: Round, value: Option<Hash>) -> bool {
        let Some(lock) = self.lock.as_mut() else {
            return false;
        };
        if round <= lock.round {
            return false;
        }
        if value == Some(lock.block.header()) {
            lock.round = round;
            return false;
        }
        info!(
            "Unlocking block {} (round {}) after polka at round {}",
            lock.block.header(),
            lock.round,
            round
        );
        self.lock = None;
        true
    }

    fn observe_own_polkas(&mut self) {
        let Some(lock_round) = self.lock.as_ref().map(|l| l.round) else {
            return;
        };
        for (round, value) in self.pre_votes.quorum_values_from(lock_round + 1) {
            self.observe_polka(round, value);
        }
    }

    /// Later round the committee has already moved to, if any
    fn catch_up_round(&self) -> Option<Round> {
        let after_nil_commit = self
            .pre_commits
            .quorum_values_from(self.round)
            .into_iter()
            .filter(|(_, value)| value.is_none())
            .map(|(round, _)| round + 1)
            .max();
        let polka_round = self
            .pre_votes
            .quorum_values_from(self.round + 1)
            .into_iter()
            .map(|(round, _)| round)
            .max();
        after_nil_commit
            .max(polka_round)
            .filter(|round| *round > self.round)
    }
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("shard", &self.shard.hash)
            .field("signatory", &self.signer.signatory())
            .field("height", &self.height)
            .field("round", &self.round)
            .field("step", &self.step)
            .field("lock", &self.lock.as_ref().map(|l| (l.block.header(), l.round)))
            .finish()
    }
}
