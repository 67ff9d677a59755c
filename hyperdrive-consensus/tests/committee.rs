//! Whole-committee runs of the state machine over a simulated network.
//!
//! Every action is delivered to every replica, the emitting one included.
//! Time only moves when the network ticks, so runs are deterministic apart
//! from the random keys.

use hyperdrive_consensus::{
    Action, Commit, ConsensusConfig, Input, PreVote, Propose, StateMachine,
};
use hyperdrive_core::{
    Block, Blockchain, EcdsaSigner, FifoPool, Hash, Height, Pool, Shard, Signatories,
    SignerVerifier, Transaction,
};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

const TICK: Duration = Duration::from_millis(100);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}

fn test_config() -> ConsensusConfig {
    ConsensusConfig::new()
        .with_timeouts(Duration::from_millis(300), Duration::from_millis(1_000))
        .with_timeout_deltas(Duration::from_millis(100), Duration::from_millis(200))
}

struct Network {
    signers: Vec<Arc<EcdsaSigner>>,
    shard: Shard,
    pools: Vec<Arc<FifoPool>>,
    machines: Vec<StateMachine>,
    /// Replicas whose actions are never broadcast
    silent: HashSet<usize>,
    queue: VecDeque<Action>,
    /// Every commit certificate broadcast so far
    commits: Vec<Commit>,
    now: Instant,
}

impl Network {
    fn new(n: usize) -> Self {
        let signers: Vec<Arc<EcdsaSigner>> =
            (0..n).map(|_| Arc::new(EcdsaSigner::random())).collect();
        let signatories =
            Signatories::new(signers.iter().map(|s| s.signatory()).collect()).unwrap();
        let shard = Shard::new(Hash::random(), signatories);

        let pools: Vec<Arc<FifoPool>> = (0..n).map(|_| Arc::new(FifoPool::new())).collect();
        let machines = (0..n)
            .map(|i| {
                StateMachine::new(
                    shard.clone(),
                    signers[i].clone(),
                    Blockchain::new(),
                    pools[i].clone(),
                    test_config(),
                )
                .unwrap()
            })
            .collect();

        Self {
            signers,
            shard,
            pools,
            machines,
            silent: HashSet::new(),
            queue: VecDeque::new(),
            commits: Vec::new(),
            now: Instant::now(),
        }
    }

    fn with_silent(mut self, silent: impl IntoIterator<Item = usize>) -> Self {
        self.silent.extend(silent);
        self
    }

    fn index_of_leader(&self, height: Height, round: u64) -> usize {
        let leader = self.shard.signatories.leader(height, round).unwrap();
        self.signers
            .iter()
            .position(|s| s.signatory() == *leader)
            .unwrap()
    }

    fn broadcast(&mut self, from: usize, actions: Vec<Action>) {
        if self.silent.contains(&from) {
            return;
        }
        for action in actions {
            if let Action::Commit(commit) = &action {
                self.commits.push(commit.clone());
            }
            self.queue.push_back(action);
        }
    }

    fn start(&mut self) {
        for i in 0..self.machines.len() {
            let actions = self.machines[i].start(self.now).unwrap();
            self.broadcast(i, actions);
        }
    }

    fn honest(&self) -> impl Iterator<Item = &StateMachine> {
        self.machines
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.silent.contains(i))
            .map(|(_, m)| m)
    }

    fn reached(&self, height: Height) -> bool {
        self.honest().all(|m| m.blockchain().height() >= height)
    }

    fn deliver(&mut self, target: Height) {
        while let Some(action) = self.queue.pop_front() {
            for i in 0..self.machines.len() {
                let actions = self.machines[i]
                    .accept(Input::from(action.clone()), self.now)
                    .unwrap();
                self.broadcast(i, actions);
            }
            if self.reached(target) {
                return;
            }
        }
    }

    /// Deliver queued actions to `members` only; actions matched by
    /// `withhold` are handed back instead of delivered
    fn deliver_to<F>(&mut self, members: &[usize], mut withhold: F) -> Vec<Action>
    where
        F: FnMut(&Action) -> bool,
    {
        let mut held = Vec::new();
        while let Some(action) = self.queue.pop_front() {
            if withhold(&action) {
                held.push(action);
                continue;
            }
            for &i in members {
                let actions = self.machines[i]
                    .accept(Input::from(action.clone()), self.now)
                    .unwrap();
                self.broadcast(i, actions);
            }
        }
        held
    }

    fn tick_members(&mut self, members: &[usize]) {
        for &i in members {
            let actions = self.machines[i].accept_tick(self.now).unwrap();
            self.broadcast(i, actions);
        }
    }

    fn tick(&mut self) {
        self.now += TICK;
        for i in 0..self.machines.len() {
            let actions = self.machines[i].accept_tick(self.now).unwrap();
            self.broadcast(i, actions);
        }
    }

    fn run_until(&mut self, target: Height, max_ticks: usize) -> bool {
        for _ in 0..max_ticks {
            self.deliver(target);
            if self.reached(target) {
                return true;
            }
            self.tick();
        }
        self.reached(target)
    }

    /// No two replicas committed different blocks at the same height, and
    /// every chain links back to the zero header
    fn assert_consistent(&self) {
        for machine in &self.machines {
            let mut parent = Hash::zero();
            for (i, block) in machine.blockchain().iter().enumerate() {
                assert_eq!(block.height(), i as Height + 1);
                assert_eq!(block.parent_header(), parent);
                parent = block.header();
            }
        }
        for a in &self.machines {
            for b in &self.machines {
                let common = a.blockchain().height().min(b.blockchain().height());
                for height in 1..=common {
                    assert_eq!(
                        a.blockchain().block(height).map(|x| x.header()),
                        b.blockchain().block(height).map(|x| x.header()),
                        "fork at height {}",
                        height
                    );
                }
            }
        }
    }
}

#[test]
fn test_committees_of_various_sizes_commit() {
    init_tracing();

    for n in [1, 2, 4, 8] {
        let mut network = Network::new(n);
        network.start();
        assert!(network.run_until(3, 200), "committee of {} stalled", n);
        network.assert_consistent();
    }
}

#[test]
fn test_leader_transactions_are_committed_in_order() {
    init_tracing();

    let mut network = Network::new(4);
    let leader = network.index_of_leader(1, 0);
    for i in 0..20u8 {
        network.pools[leader]
            .enqueue(Transaction::new(vec![i]))
            .unwrap();
    }
    network.start();
    assert!(network.run_until(2, 200));
    network.assert_consistent();

    for machine in &network.machines {
        let block = machine.blockchain().block(1).unwrap();
        let data: Vec<u8> = block.block.transactions.iter().map(|tx| tx.data[0]).collect();
        assert_eq!(data, (0..20u8).collect::<Vec<_>>());
    }
    assert!(network.pools[leader].is_empty());
}

#[test]
fn test_silent_faulty_members_do_not_stop_progress() {
    init_tracing();

    for n in [4, 7, 10] {
        let faulty = (n - 1) / 3;
        let mut network = Network::new(n).with_silent(n - faulty..n);
        network.start();
        assert!(
            network.run_until(4, 2_000),
            "committee of {} with {} silent members stalled",
            n,
            faulty
        );
        network.assert_consistent();
    }
}

#[test]
fn test_too_many_silent_members_halt_without_forking() {
    init_tracing();

    // Q = 3 of 4; with two silent members no block can ever commit
    let mut network = Network::new(4).with_silent([2, 3]);
    network.start();
    assert!(!network.run_until(1, 100));
    assert!(network.machines.iter().all(|m| m.blockchain().is_empty()));
}

#[test]
fn test_crashed_leader_is_skipped() {
    init_tracing();

    let network = Network::new(4);
    let leader = network.index_of_leader(1, 0);
    let mut network = network.with_silent([leader]);
    network.start();

    assert!(network.run_until(1, 200));
    network.assert_consistent();
    let honest = network.honest().next().unwrap();
    let block = honest.blockchain().block(1).unwrap();
    assert_ne!(block.signatory, network.signers[leader].signatory());
}

#[test]
fn test_equivocating_leader_cannot_fork() {
    init_tracing();

    let network = Network::new(4);
    let leader = network.index_of_leader(1, 0);
    let mut network = network.with_silent([leader]);
    network.start();

    // The leader sends a different proposal to each half of the committee
    let signer = network.signers[leader].clone();
    let make = |byte: u8| {
        let block = Block::new(1, 1_000, Hash::zero(), vec![Transaction::new(vec![byte])])
            .unwrap()
            .sign(signer.as_ref())
            .unwrap();
        Propose::new(1, 0, block, &network.shard.hash, signer.as_ref()).unwrap()
    };
    let (a, b) = (make(1), make(2));

    let now = network.now;
    for i in 0..4 {
        let propose = if i % 2 == 0 { a.clone() } else { b.clone() };
        let actions = network.machines[i].accept_propose(propose, now).unwrap();
        network.broadcast(i, actions);
    }

    assert!(network.run_until(3, 500));
    network.assert_consistent();

    // Show one honest replica the other proposal too
    let witness = (0..4).find(|i| *i != leader).unwrap();
    let mut fresh = StateMachine::new(
        network.shard.clone(),
        network.signers[witness].clone(),
        Blockchain::new(),
        Arc::new(FifoPool::new()),
        test_config(),
    )
    .unwrap();
    fresh.start(now).unwrap();
    fresh.accept_propose(a, now).unwrap();
    fresh.accept_propose(b, now).unwrap();
    assert_eq!(fresh.evidence().len(), 1);
    assert_eq!(
        fresh.evidence().iter().next().map(|e| e.signatory()),
        Some(network.signers[leader].signatory())
    );
}

#[test]
fn test_late_replica_catches_up_from_commits() {
    init_tracing();

    let mut network = Network::new(4);
    network.start();
    assert!(network.run_until(3, 200));
    network.assert_consistent();

    // A replica that missed everything receives the certificates newest first
    let mut late = StateMachine::new(
        network.shard.clone(),
        network.signers[0].clone(),
        Blockchain::new(),
        Arc::new(FifoPool::new()),
        test_config(),
    )
    .unwrap();
    late.start(network.now).unwrap();

    for commit in network.commits.iter().rev() {
        late.accept_commit(commit.clone(), network.now).unwrap();
    }

    assert!(late.blockchain().height() >= 3);
    assert_eq!(
        late.blockchain().block(3).map(|b| b.header()),
        network.machines[0].blockchain().block(3).map(|b| b.header())
    );
}

#[test]
fn test_locked_replicas_never_commit_a_second_block() {
    init_tracing();

    let network = Network::new(4);
    let faulty = network.index_of_leader(1, 1);
    let honest: Vec<usize> = (0..4).filter(|i| *i != faulty).collect();
    let committed = honest[0];
    let lagging = vec![honest[1], honest[2]];
    let mut network = network.with_silent([faulty]);
    let config = test_config();

    // Round 0: the honest members lock on the proposal but their
    // pre-commits only ever reach one of them
    network.start();
    let held = network.deliver_to(&honest, |action| matches!(action, Action::SignedPreCommit(_)));
    assert_eq!(held.len(), 3);
    let locked = network.machines[committed].locked_block().cloned().unwrap();
    for &i in &honest {
        assert_eq!(network.machines[i].locked_block(), Some(&locked));
    }
    for action in held {
        network.machines[committed]
            .accept(Input::from(action), network.now)
            .unwrap();
    }
    assert_eq!(network.machines[committed].blockchain().block(1), Some(&locked));

    // The faulty member keeps pushing a block of its own
    let signer = network.signers[faulty].clone();
    let conflicting = Block::new(1, 2_000, Hash::zero(), vec![Transaction::new(vec![0xff])])
        .unwrap()
        .sign(signer.as_ref())
        .unwrap();
    let lagging_signatories: Vec<_> = lagging
        .iter()
        .map(|i| network.signers[*i].signatory())
        .collect();

    let mut pre_votes = Vec::new();
    let mut round_start = network.now;
    for round in 1..=4u64 {
        round_start += config.round_timeout(round - 1);
        network.now = round_start;
        network.tick_members(&lagging);

        if network.index_of_leader(1, round) == faulty {
            let propose = Propose::new(
                1,
                round,
                conflicting.clone(),
                &network.shard.hash,
                signer.as_ref(),
            )
            .unwrap();
            network.queue.push_back(Action::Propose(propose));
        }
        let vote = PreVote::new(1, round, Some(conflicting.clone()))
            .sign(&network.shard.hash, signer.as_ref())
            .unwrap();
        network.queue.push_back(Action::SignedPreVote(vote));

        let mut record = |action: &Action| {
            if let Action::SignedPreVote(vote) = action {
                if lagging_signatories.contains(&vote.signatory) {
                    pre_votes.push(vote.clone());
                }
            }
            false
        };
        network.deliver_to(&lagging, &mut record);
        network.now = round_start + config.propose_timeout(round);
        network.tick_members(&lagging);
        network.deliver_to(&lagging, &mut record);
    }

    assert!(!pre_votes.is_empty());
    for vote in &pre_votes {
        assert!(vote.round() >= 1);
        assert_eq!(vote.block_header(), Some(locked.header()));
    }
    for &i in &lagging {
        let machine = &network.machines[i];
        assert!(machine.blockchain().block(1).map_or(true, |b| *b == locked));
        assert_eq!(machine.locked_block(), Some(&locked));
    }
    assert_eq!(network.machines[committed].blockchain().block(1), Some(&locked));
}
