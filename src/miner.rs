//! Per-node mining actor.
//!
//! Each pass walks `Idle -> Drafting -> Searching -> Committing -> Broadcasting`
//! and returns to `Idle`; `Cancelled` is entered on shutdown. A node loses the
//! race for an index when a peer's block for that index lands in its chain
//! first; the draft is then dropped and its transactions are not re-queued.

use crate::blockchain::core::chain::Block;
use crate::blockchain::core::state::Ledger;
use crate::consensus::{search, verify, ChainParams, ConsensusRule};
use crate::digest::{Digest, DIGEST_HEX_LEN};
use crate::error::ValidationError;
use crate::mempool::Mempool;
use crate::node::Node;
use crate::propagation::Propagator;
use crate::transaction::{Amount, Transaction};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MinerState {
    Idle,
    Drafting,
    Searching,
    Committing,
    Broadcasting,
    Cancelled,
}

impl fmt::Display for MinerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MinerState::Idle => "idle",
            MinerState::Drafting => "drafting",
            MinerState::Searching => "searching",
            MinerState::Committing => "committing",
            MinerState::Broadcasting => "broadcasting",
            MinerState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Behavior {
    #[default]
    Honest,
    /// Forges a block with probability `forge_rate` per draft.
    Malicious { forge_rate: f64 },
}

/// Ways a malicious node corrupts a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Forgery {
    /// Broadcast the draft with a proof that does not satisfy the rule.
    SkipSearch,
    /// Claim a digest that meets the target but does not commit to the block.
    ForgeDigest,
    /// Mine honestly, then change a transaction after the digest is fixed.
    TamperTransaction,
}

#[derive(Debug, Clone, Copy)]
pub struct MinerSettings {
    pub reward: Amount,
    pub block_capacity: usize,
    /// `None`: wait until a full block is pending. `Some`: mine whatever is
    /// pending after this long.
    pub poll: Option<Duration>,
}

impl Default for MinerSettings {
    fn default() -> Self {
        MinerSettings {
            reward: Amount::from_num(10),
            block_capacity: 2,
            poll: None,
        }
    }
}

/// Result of one mining pass.
#[derive(Debug, Clone, PartialEq)]
pub enum MineOutcome {
    /// Appended locally, paid out and broadcast.
    Committed(Block),
    /// Broadcast without local append or payout.
    Forged { block: Block, forgery: Forgery },
    /// A peer's block for this index got here first.
    RaceLost { index: u64 },
    /// The node's own validation refused the block.
    Rejected(ValidationError),
    Cancelled,
    /// Nothing to mine.
    Idle,
}

pub struct MiningActor {
    node: Arc<Node>,
    mempool: Arc<Mempool>,
    ledger: Arc<Ledger>,
    propagator: Arc<Propagator>,
    params: ChainParams,
    settings: MinerSettings,
    running: Arc<AtomicBool>,
    rng: StdRng,
}

impl MiningActor {
    pub fn new(
        node: Arc<Node>,
        mempool: Arc<Mempool>,
        ledger: Arc<Ledger>,
        propagator: Arc<Propagator>,
        params: ChainParams,
        settings: MinerSettings,
        running: Arc<AtomicBool>,
    ) -> Self {
        MiningActor {
            node,
            mempool,
            ledger,
            propagator,
            params,
            settings,
            running,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("miner-{}", self.node.id().0))
            .spawn(move || self.run())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Actor loop. Returns once the network stops or the mempool closes.
    pub fn run(mut self) {
        info!("{} mining actor started", self.node.id());
        while self.is_running() {
            self.node.set_state(MinerState::Idle);
            let batch = match self
                .mempool
                .wait_for_draft(self.settings.block_capacity, self.settings.poll)
            {
                Some(batch) => batch,
                None => break,
            };
            if batch.is_empty() {
                continue;
            }
            if !self.is_running() {
                debug!("{} dropping {} drained transactions on shutdown", self.node.id(), batch.len());
                break;
            }
            self.mine_batch(batch);
        }
        self.node.set_state(MinerState::Cancelled);
        info!("{} mining actor stopped", self.node.id());
    }

    /// One full pass over an already drained batch.
    pub fn mine_batch(&mut self, transactions: Vec<Transaction>) -> MineOutcome {
        if transactions.is_empty() {
            return MineOutcome::Idle;
        }

        self.node.set_state(MinerState::Drafting);
        let mut block = self.draft(transactions);
        let index = block.index;
        debug!(
            "{} drafted block {} with {} transactions",
            self.node.id(),
            index,
            block.transactions.len()
        );

        self.node.set_state(MinerState::Searching);
        if let Some(forgery) = self.pick_forgery() {
            return self.forge(block, forgery);
        }

        let node = Arc::clone(&self.node);
        let running = Arc::clone(&self.running);
        let abort = move || !running.load(Ordering::SeqCst) || node.height() > index;
        if search(&mut block, &self.params, &abort).is_none() {
            if !self.is_running() {
                self.node.set_state(MinerState::Cancelled);
                return MineOutcome::Cancelled;
            }
            return self.lose_race(index);
        }

        self.node.set_state(MinerState::Committing);
        match self.node.append(block.clone(), &self.params, self.ledger.as_ref()) {
            Ok(()) => {}
            Err(ValidationError::PrevHashMismatch { .. }) | Err(ValidationError::IndexMismatch { .. }) => {
                return self.lose_race(index);
            }
            Err(e) => {
                warn!("{} refused its own block {}: {}", self.node.id(), index, e);
                return MineOutcome::Rejected(e);
            }
        }
        self.ledger.apply_block(&block, self.settings.reward);
        self.node.stats.record_mined();
        info!(
            "{} mined block {} (proof {}, digest {})",
            self.node.id(),
            index,
            block.proof,
            block.digest.short()
        );

        self.node.set_state(MinerState::Broadcasting);
        if let Err(e) = self.propagator.broadcast(&block, self.node.id()) {
            warn!("{} failed to broadcast block {}: {}", self.node.id(), index, e);
        }
        MineOutcome::Committed(block)
    }

    fn draft(&self, transactions: Vec<Transaction>) -> Block {
        let (index, previous_digest, tip_timestamp) = self.node.tip_info();
        let timestamp = chrono::Utc::now()
            .timestamp_millis()
            .max(tip_timestamp + 1);
        Block::draft_at(
            index,
            timestamp,
            previous_digest,
            transactions,
            Some(self.node.id().to_string()),
            &self.params,
        )
    }

    fn lose_race(&self, index: u64) -> MineOutcome {
        self.node.stats.record_race_lost();
        debug!("{} lost the race for block {}, discarding draft", self.node.id(), index);
        MineOutcome::RaceLost { index }
    }

    fn pick_forgery(&mut self) -> Option<Forgery> {
        let forge_rate = match self.node.behavior() {
            Behavior::Honest => return None,
            Behavior::Malicious { forge_rate } => forge_rate.clamp(0.0, 1.0),
        };
        if !self.rng.gen_bool(forge_rate) {
            return None;
        }
        Some(match self.rng.gen_range(0..3) {
            0 => Forgery::SkipSearch,
            1 => Forgery::ForgeDigest,
            _ => Forgery::TamperTransaction,
        })
    }

    /// Corrupt the draft and broadcast it. Nothing is appended locally and
    /// the ledger is untouched.
    fn forge(&mut self, mut block: Block, forgery: Forgery) -> MineOutcome {
        match forgery {
            Forgery::SkipSearch => {
                if self.params.difficulty > 0 || self.params.rule == ConsensusRule::Numeric {
                    while verify(&block, &self.params) {
                        block.proof += 1;
                        block.seal(&self.params);
                    }
                }
            }
            Forgery::ForgeDigest => {
                block.digest = forge_digest(&block.digest, self.params.difficulty);
            }
            Forgery::TamperTransaction => {
                let running = Arc::clone(&self.running);
                if search(&mut block, &self.params, &move || !running.load(Ordering::SeqCst)).is_none() {
                    self.node.set_state(MinerState::Cancelled);
                    return MineOutcome::Cancelled;
                }
                if let Some(tx) = block.transactions.first_mut() {
                    tx.amount += Amount::from_num(1);
                }
            }
        }

        self.node.stats.record_forged();
        warn!(
            "{} broadcasting forged block {} ({:?})",
            self.node.id(),
            block.index,
            forgery
        );

        self.node.set_state(MinerState::Broadcasting);
        if let Err(e) = self.propagator.broadcast(&block, self.node.id()) {
            warn!("{} failed to broadcast forged block: {}", self.node.id(), e);
        }
        MineOutcome::Forged { block, forgery }
    }
}

/// A digest with the target prefix that differs from the real one.
fn forge_digest(real: &Digest, difficulty: u32) -> Digest {
    let prefix = (difficulty as usize).min(DIGEST_HEX_LEN);
    let mut forged = "0".repeat(prefix);
    forged.push_str(&real.as_str()[prefix..]);
    if forged == real.as_str() && prefix < DIGEST_HEX_LEN {
        let last = if forged.ends_with('f') { "e" } else { "f" };
        forged.truncate(DIGEST_HEX_LEN - 1);
        forged.push_str(last);
    }
    Digest::from_hex(&forged).unwrap_or_else(Digest::zero)
}
