//! In-process peer network: lifecycle, transaction intake and read-only views.

use crate::blockchain::core::chain::Block;
use crate::blockchain::core::state::Ledger;
use crate::config::Config;
use crate::consensus::{describe, ChainParams};
use crate::error::{ChainError, Result};
use crate::mempool::Mempool;
use crate::miner::{Behavior, MineOutcome, MinerSettings, MiningActor};
use crate::node::{Node, NodeId, NodeReport};
use crate::propagation::{PropagationStats, Propagator};
use crate::transaction::{Amount, Transaction};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{info, warn};

pub struct Network {
    params: ChainParams,
    settings: MinerSettings,
    ledger: Arc<Ledger>,
    mempool: Arc<Mempool>,
    nodes: Vec<Arc<Node>>,
    propagator: Arc<Propagator>,
    running: Arc<AtomicBool>,
    actors: Vec<JoinHandle<()>>,
}

impl Network {
    /// Start `node_count` nodes with default settings, the given difficulty and
    /// the listed nodes acting maliciously.
    pub fn start_network(node_count: usize, difficulty: u32, malicious: &[usize]) -> Result<Self> {
        let mut config = Config::default();
        config.network.nodes = node_count;
        config.network.malicious = malicious.to_vec();
        config.consensus.difficulty = difficulty;
        Self::start_with_config(&config)
    }

    pub fn start_with_config(config: &Config) -> Result<Self> {
        let mut network = Self::build(config)?;
        network.start()?;
        Ok(network)
    }

    /// Create genesis, the ledger, the mempool, every node and the delivery
    /// workers. Mining actors are not started.
    pub fn build(config: &Config) -> Result<Self> {
        config.validate()?;
        let params = config.chain_params();
        let settings = config.miner_settings()?;

        let genesis = Block::genesis(&config.genesis_allocations()?, &params);
        let ledger = Arc::new(Ledger::from_genesis(&genesis));
        let mempool = Arc::new(Mempool::new(
            config.mempool.capacity,
            config.mempool.block_capacity,
            params,
            Arc::clone(&ledger),
        ));

        let nodes: Vec<Arc<Node>> = (0..config.network.nodes)
            .map(|i| {
                let behavior = if config.network.malicious.contains(&i) {
                    Behavior::Malicious {
                        forge_rate: config.miner.forge_rate,
                    }
                } else {
                    Behavior::Honest
                };
                Arc::new(Node::new(NodeId(i), genesis.clone(), behavior))
            })
            .collect();

        let propagator = Arc::new(Propagator::start(
            &nodes,
            config.propagation,
            params,
            Arc::clone(&ledger),
        )?);

        info!(
            "Network ready: {} nodes, genesis {}, consensus {}",
            nodes.len(),
            genesis.digest.short(),
            describe(&params)
        );

        Ok(Network {
            params,
            settings,
            ledger,
            mempool,
            nodes,
            propagator,
            running: Arc::new(AtomicBool::new(false)),
            actors: Vec::new(),
        })
    }

    /// Spawn one mining actor per node.
    pub fn start(&mut self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for node in &self.nodes {
            let handle = self.actor_for(node).spawn()?;
            self.actors.push(handle);
        }
        info!("Started {} mining actors", self.actors.len());
        Ok(())
    }

    fn actor_for(&self, node: &Arc<Node>) -> MiningActor {
        MiningActor::new(
            Arc::clone(node),
            Arc::clone(&self.mempool),
            Arc::clone(&self.ledger),
            Arc::clone(&self.propagator),
            self.params,
            self.settings,
            Arc::clone(&self.running),
        )
    }

    /// Close the mempool, signal every actor, join them, then stop propagation.
    /// Safe to call more than once.
    pub fn stop_network(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.mempool.close();
        for handle in self.actors.drain(..) {
            if handle.join().is_err() {
                warn!("A mining actor panicked");
            }
        }
        self.propagator.shutdown();
        info!("Network stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn submit_transaction(&self, tx: Transaction) -> Result<()> {
        self.mempool.submit(tx)?;
        Ok(())
    }

    /// Build, sign and submit a transfer stamped with the current time.
    pub fn transfer(&self, sender: &str, receiver: &str, amount: Amount) -> Result<Transaction> {
        let tx = Transaction::new(sender, receiver, amount).signed(self.params.hash);
        self.submit_transaction(tx.clone())?;
        Ok(tx)
    }

    pub fn snapshot_chain(&self, node: usize) -> Result<Vec<Block>> {
        Ok(self.node(node)?.snapshot())
    }

    pub fn snapshot_balances(&self) -> BTreeMap<String, Amount> {
        self.ledger.snapshot()
    }

    /// Run one drafting-to-broadcast pass for `node` on the calling thread,
    /// using up to one block's worth of pending transactions.
    pub fn mine_once(&self, node: usize) -> Result<MineOutcome> {
        let node = self.node(node)?;
        if self.mempool.is_closed() {
            return Err(ChainError::NetworkStopped);
        }
        let transactions = self.mempool.drain(self.settings.block_capacity);

        // Own run flag: the pass must not be cancelled just because the
        // background actors were never started.
        let running = Arc::new(AtomicBool::new(true));
        let mut actor = MiningActor::new(
            Arc::clone(node),
            Arc::clone(&self.mempool),
            Arc::clone(&self.ledger),
            Arc::clone(&self.propagator),
            self.params,
            self.settings,
            running,
        );
        Ok(actor.mine_batch(transactions))
    }

    pub fn node(&self, id: usize) -> Result<&Arc<Node>> {
        self.nodes.get(id).ok_or(ChainError::UnknownNode(id))
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn reports(&self) -> Vec<NodeReport> {
        self.nodes.iter().map(|n| n.report()).collect()
    }

    pub fn propagation_stats(&self) -> PropagationStats {
        self.propagator.stats()
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn pending_transactions(&self) -> usize {
        self.mempool.len()
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        if !self.actors.is_empty() || self.is_running() {
            self.stop_network();
        }
    }
}
