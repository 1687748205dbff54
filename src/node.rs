//! A network participant: one chain replica plus the state of its mining actor.

use crate::blockchain::core::chain::{Block, Chain};
use crate::blockchain::core::state::BalanceView;
use crate::consensus::ChainParams;
use crate::digest::Digest;
use crate::error::ValidationError;
use crate::miner::{Behavior, MinerState};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct NodeCounters {
    blocks_mined: AtomicU64,
    races_lost: AtomicU64,
    forged_sent: AtomicU64,
    blocks_accepted: AtomicU64,
    blocks_rejected: AtomicU64,
}

impl NodeCounters {
    pub fn record_mined(&self) {
        self.blocks_mined.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_race_lost(&self) {
        self.races_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forged(&self) {
        self.forged_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_accepted(&self) {
        self.blocks_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.blocks_rejected.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of a node for reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    pub id: NodeId,
    pub state: MinerState,
    pub malicious: bool,
    pub height: u64,
    pub tip: Digest,
    pub blocks_mined: u64,
    pub races_lost: u64,
    pub forged_sent: u64,
    pub blocks_accepted: u64,
    pub blocks_rejected: u64,
}

pub struct Node {
    id: NodeId,
    behavior: Behavior,
    chain: Mutex<Chain>,
    /// Mirrors `chain.len()` so the search loop can poll it without locking.
    height: AtomicU64,
    state: Mutex<MinerState>,
    pub stats: NodeCounters,
}

impl Node {
    pub fn new(id: NodeId, genesis: Block, behavior: Behavior) -> Self {
        Node {
            id,
            behavior,
            chain: Mutex::new(Chain::new(genesis)),
            height: AtomicU64::new(1),
            state: Mutex::new(MinerState::Idle),
            stats: NodeCounters::default(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn behavior(&self) -> Behavior {
        self.behavior
    }

    pub fn is_malicious(&self) -> bool {
        matches!(self.behavior, Behavior::Malicious { .. })
    }

    pub fn height(&self) -> u64 {
        self.height.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> MinerState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: MinerState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!("{}: {} -> {}", self.id, *current, state);
            *current = state;
        }
    }

    /// Index, digest and timestamp of the local tip, read under the chain lock.
    pub fn tip_info(&self) -> (u64, Digest, i64) {
        let chain = self.chain.lock();
        let tip = chain.tip();
        (chain.len() as u64, tip.digest.clone(), tip.timestamp)
    }

    /// Validate `block` against this node's own tip and append it.
    pub fn append(
        &self,
        block: Block,
        params: &ChainParams,
        balances: &dyn BalanceView,
    ) -> Result<(), ValidationError> {
        let mut chain = self.chain.lock();
        chain.append(block, params, balances)?;
        self.height.store(chain.len() as u64, Ordering::SeqCst);
        Ok(())
    }

    /// Deep copy of the replica, genesis first.
    pub fn snapshot(&self) -> Vec<Block> {
        self.chain.lock().blocks().to_vec()
    }

    pub fn verify_integrity(&self, params: &ChainParams) -> Result<(), ValidationError> {
        self.chain.lock().verify_integrity(params)
    }

    pub fn report(&self) -> NodeReport {
        let (height, tip, _) = self.tip_info();
        NodeReport {
            id: self.id,
            state: self.state(),
            malicious: self.is_malicious(),
            height,
            tip,
            blocks_mined: self.stats.blocks_mined.load(Ordering::Relaxed),
            races_lost: self.stats.races_lost.load(Ordering::Relaxed),
            forged_sent: self.stats.forged_sent.load(Ordering::Relaxed),
            blocks_accepted: self.stats.blocks_accepted.load(Ordering::Relaxed),
            blocks_rejected: self.stats.blocks_rejected.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("behavior", &self.behavior)
            .field("height", &self.height())
            .field("state", &self.state())
            .finish()
    }
}
