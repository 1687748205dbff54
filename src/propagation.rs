//! Best-effort block propagation between in-process nodes.
//!
//! Every node has a delivery worker fed by its own channel. `broadcast`
//! encodes the block once, then for each peer either drops it (loss) or
//! queues it with a randomized delivery time. The worker decodes its own copy
//! and hands it to the peer's chain, which re-validates against its own tip.

use crate::blockchain::core::chain::Block;
use crate::blockchain::core::state::Ledger;
use crate::consensus::ChainParams;
use crate::error::{ChainError, Result};
use crate::node::{Node, NodeId};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PropagationConfig {
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Probability in `[0, 1]` that a delivery is silently dropped.
    #[serde(default)]
    pub loss_rate: f64,
}

fn default_min_delay_ms() -> u64 {
    5
}

fn default_max_delay_ms() -> u64 {
    25
}

impl Default for PropagationConfig {
    fn default() -> Self {
        PropagationConfig {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            loss_rate: 0.0,
        }
    }
}

impl PropagationConfig {
    fn sample_delay(&self, rng: &mut impl Rng) -> Duration {
        let (low, high) = if self.min_delay_ms <= self.max_delay_ms {
            (self.min_delay_ms, self.max_delay_ms)
        } else {
            (self.max_delay_ms, self.min_delay_ms)
        };
        Duration::from_millis(rng.gen_range(low..=high))
    }

    fn is_lost(&self, rng: &mut impl Rng) -> bool {
        self.loss_rate > 0.0 && rng.gen_bool(self.loss_rate.min(1.0))
    }
}

/// Delivery counters, summed over all peers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PropagationStats {
    /// Deliveries attempted (one per peer per broadcast).
    pub sent: u64,
    pub dropped: u64,
    pub accepted: u64,
    pub rejected: u64,
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    dropped: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PropagationStats {
        PropagationStats {
            sent: self.sent.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// A block in flight to one peer.
#[derive(Debug)]
struct Delivery {
    from: NodeId,
    payload: Vec<u8>,
    deliver_at: Instant,
}

struct DeliveryWorker {
    node: Arc<Node>,
    inbox: Receiver<Delivery>,
    params: ChainParams,
    ledger: Arc<Ledger>,
    counters: Arc<Counters>,
    running: Arc<AtomicBool>,
}

impl DeliveryWorker {
    fn run(self) {
        for delivery in self.inbox.iter() {
            if !self.running.load(Ordering::SeqCst) {
                continue;
            }
            let now = Instant::now();
            if delivery.deliver_at > now {
                thread::sleep(delivery.deliver_at - now);
            }
            if !self.running.load(Ordering::SeqCst) {
                continue;
            }
            self.deliver(delivery);
        }
        debug!("{} delivery worker stopped", self.node.id());
    }

    fn deliver(&self, delivery: Delivery) {
        let block = match Block::from_wire(&delivery.payload) {
            Ok(block) => block,
            Err(e) => {
                warn!("{} could not decode block from {}: {}", self.node.id(), delivery.from, e);
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                self.node.stats.record_rejected();
                return;
            }
        };

        let index = block.index;
        match self.node.append(block, &self.params, self.ledger.as_ref()) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                self.node.stats.record_accepted();
                debug!("{} accepted block {} from {}", self.node.id(), index, delivery.from);
            }
            Err(e) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                self.node.stats.record_rejected();
                info!("{} rejected block {} from {}: {}", self.node.id(), index, delivery.from, e);
            }
        }
    }
}

pub struct Propagator {
    config: PropagationConfig,
    outboxes: Mutex<Vec<(NodeId, Sender<Delivery>)>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
    running: Arc<AtomicBool>,
}

impl Propagator {
    /// Spawn one delivery worker per node.
    pub fn start(
        nodes: &[Arc<Node>],
        config: PropagationConfig,
        params: ChainParams,
        ledger: Arc<Ledger>,
    ) -> Result<Self> {
        let counters = Arc::new(Counters::default());
        let running = Arc::new(AtomicBool::new(true));
        let mut outboxes = Vec::with_capacity(nodes.len());
        let mut workers = Vec::with_capacity(nodes.len());

        for node in nodes {
            let (tx, rx) = unbounded();
            let worker = DeliveryWorker {
                node: Arc::clone(node),
                inbox: rx,
                params,
                ledger: Arc::clone(&ledger),
                counters: Arc::clone(&counters),
                running: Arc::clone(&running),
            };
            let handle = thread::Builder::new()
                .name(format!("deliver-{}", node.id().0))
                .spawn(move || worker.run())?;
            outboxes.push((node.id(), tx));
            workers.push(handle);
        }

        Ok(Propagator {
            config,
            outboxes: Mutex::new(outboxes),
            workers: Mutex::new(workers),
            counters,
            running,
        })
    }

    /// Offer `block` to every node except `from`. Returns how many deliveries
    /// were queued (lost ones are not).
    pub fn broadcast(&self, block: &Block, from: NodeId) -> Result<usize> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(ChainError::NetworkStopped);
        }
        let payload = block.to_wire()?;
        let mut rng = rand::thread_rng();
        let now = Instant::now();
        let mut queued = 0;

        let outboxes = self.outboxes.lock();
        for (peer, outbox) in outboxes.iter().filter(|(peer, _)| *peer != from) {
            self.counters.sent.fetch_add(1, Ordering::Relaxed);
            if self.config.is_lost(&mut rng) {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Block {} from {} to {} lost", block.index, from, peer);
                continue;
            }
            let delivery = Delivery {
                from,
                payload: payload.clone(),
                deliver_at: now + self.config.sample_delay(&mut rng),
            };
            if outbox.send(delivery).is_err() {
                return Err(ChainError::NetworkStopped);
            }
            queued += 1;
        }
        Ok(queued)
    }

    pub fn stats(&self) -> PropagationStats {
        self.counters.snapshot()
    }

    /// Stop delivering, close every channel and join the workers.
    /// Deliveries still queued are discarded.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.outboxes.lock().clear();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if handle.join().is_err() {
                warn!("A delivery worker panicked");
            }
        }
    }
}

impl Drop for Propagator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::search;
    use crate::miner::Behavior;
    use crate::transaction::{Amount, Transaction};

    fn params() -> ChainParams {
        ChainParams {
            difficulty: 1,
            ..ChainParams::default()
        }
    }

    fn setup(count: usize) -> (Vec<Arc<Node>>, Arc<Ledger>, Block) {
        let genesis = Block::genesis(&[("alice".to_string(), Amount::from_num(100))], &params());
        let ledger = Arc::new(Ledger::from_genesis(&genesis));
        let nodes = (0..count)
            .map(|i| Arc::new(Node::new(NodeId(i), genesis.clone(), Behavior::Honest)))
            .collect();
        (nodes, ledger, genesis)
    }

    fn next_block(genesis: &Block) -> Block {
        let params = params();
        let tx = Transaction::new("alice", "bob", Amount::from_num(5)).signed(params.hash);
        let mut block = Block::draft_at(
            1,
            genesis.timestamp + 1,
            genesis.digest.clone(),
            vec![tx],
            Some("node-0".to_string()),
            &params,
        );
        search(&mut block, &params, &|| false).unwrap();
        block
    }

    fn wait_until(deadline: Duration, condition: impl Fn() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_broadcast_reaches_every_peer() {
        let (nodes, ledger, genesis) = setup(3);
        let propagator = Propagator::start(&nodes, PropagationConfig::default(), params(), ledger).unwrap();

        let block = next_block(&genesis);
        assert_eq!(propagator.broadcast(&block, NodeId(0)).unwrap(), 2);

        assert!(wait_until(Duration::from_secs(2), || propagator.stats().accepted == 2));
        assert_eq!(nodes[0].height(), 1);
        assert_eq!(nodes[1].snapshot().last(), Some(&block));
        assert_eq!(nodes[2].snapshot().last(), Some(&block));
        assert_eq!(propagator.stats().sent, 2);
        propagator.shutdown();
    }

    #[test]
    fn test_total_loss_drops_everything() {
        let (nodes, ledger, genesis) = setup(3);
        let config = PropagationConfig {
            loss_rate: 1.0,
            ..PropagationConfig::default()
        };
        let propagator = Propagator::start(&nodes, config, params(), ledger).unwrap();

        assert_eq!(propagator.broadcast(&next_block(&genesis), NodeId(0)).unwrap(), 0);
        let stats = propagator.stats();
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.dropped, 2);
        assert!(nodes.iter().all(|n| n.height() == 1));
    }

    #[test]
    fn test_peer_rejects_tampered_copy() {
        let (nodes, ledger, genesis) = setup(2);
        let propagator = Propagator::start(&nodes, PropagationConfig::default(), params(), ledger).unwrap();

        let mut block = next_block(&genesis);
        block.transactions[0].amount = Amount::from_num(50);
        propagator.broadcast(&block, NodeId(0)).unwrap();

        assert!(wait_until(Duration::from_secs(2), || propagator.stats().rejected == 1));
        assert_eq!(nodes[1].height(), 1);
        assert_eq!(nodes[1].report().blocks_rejected, 1);
    }

    #[test]
    fn test_broadcast_after_shutdown_fails() {
        let (nodes, ledger, genesis) = setup(2);
        let propagator = Propagator::start(&nodes, PropagationConfig::default(), params(), ledger).unwrap();
        propagator.shutdown();
        assert!(matches!(
            propagator.broadcast(&next_block(&genesis), NodeId(0)),
            Err(ChainError::NetworkStopped)
        ));
    }

    #[test]
    fn test_delay_sampling_stays_in_range() {
        let config = PropagationConfig {
            min_delay_ms: 3,
            max_delay_ms: 7,
            loss_rate: 0.0,
        };
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let delay = config.sample_delay(&mut rng);
            assert!(delay >= Duration::from_millis(3) && delay <= Duration::from_millis(7));
            assert!(!config.is_lost(&mut rng));
        }
    }
}
