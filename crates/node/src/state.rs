//! The node state machine: per-peer download orbits, fork choice, and
//! compact-block relay policy.

use blockprop_consensus::ConsensusAlgo;
use blockprop_types::{Block, BlockId, NodeId, RegionId};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::trace;

/// Compact-block-relay parameters shared by all nodes.
///
/// Failure rates are keyed on the receiver's churn role, as is the
/// empirical distribution of how much data a failed compact transfer ends
/// up pulling: each entry is a fraction of the full block size, sampled
/// uniformly by index.
#[derive(Debug, Clone)]
pub struct CbrPolicy {
    pub block_size_bytes: u64,
    pub failure_rate_control: f64,
    pub failure_rate_churn: f64,
    pub failure_size_distribution_control: Vec<f64>,
    pub failure_size_distribution_churn: Vec<f64>,
}

impl CbrPolicy {
    fn failure_rate(&self, is_churn: bool) -> f64 {
        if is_churn {
            self.failure_rate_churn
        } else {
            self.failure_rate_control
        }
    }

    fn sample_failure_bytes(&self, is_churn: bool, rng: &mut ChaCha8Rng) -> u64 {
        let distribution = if is_churn {
            &self.failure_size_distribution_churn
        } else {
            &self.failure_size_distribution_control
        };
        let fraction = distribution[rng.gen_range(0..distribution.len())];
        (self.block_size_bytes as f64 * fraction) as u64
    }
}

/// An input to the node state machine, produced by executing a message
/// task (or, for mint completion, a mining task) addressed to this node.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// A peer announced a block.
    Inv { from: NodeId, block: Arc<Block> },
    /// A peer asked for a block we announced; `cbr` is the requester's
    /// compact-relay capability.
    BlockRequest {
        from: NodeId,
        block: Arc<Block>,
        cbr: bool,
    },
    /// A compact block finished downloading.
    CompactBlock { from: NodeId, block: Arc<Block> },
    /// A peer's compact transfer failed and it wants the missing data;
    /// `bytes` is the fallback transfer size it sampled.
    GetBlockTxn {
        from: NodeId,
        block: Arc<Block>,
        bytes: u64,
    },
    /// The fallback body after a compact failure finished downloading.
    BlockTxn { from: NodeId, block: Arc<Block> },
    /// A full block body finished downloading.
    BlockBody { from: NodeId, block: Arc<Block> },
    /// This node's own mining attempt completed with a freshly minted block.
    MintCompleted { block: Arc<Block> },
}

/// A message emitted by the state machine, to be scheduled by the runner
/// with the transfer timing appropriate to its kind.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// Announce a block (latency only).
    Inv(Arc<Block>),
    /// Ask the announcer for the block, advertising our CBR capability
    /// (latency only).
    BlockRequest { block: Arc<Block>, cbr: bool },
    /// Compact block body (compact-size download).
    CompactBlock(Arc<Block>),
    /// Request the data missing after a compact failure (latency only).
    GetBlockTxn { block: Arc<Block>, bytes: u64 },
    /// Fallback body after a compact failure (sampled-size download).
    BlockTxn { block: Arc<Block>, bytes: u64 },
    /// Full block body (block-size download).
    BlockBody(Arc<Block>),
}

/// An effect the runner must apply after a `handle` call.
#[derive(Debug, Clone)]
pub enum NodeAction {
    /// Schedule a message to a peer.
    Send { to: NodeId, message: OutboundMessage },
    /// Tombstone any pending mining task and schedule a fresh one on the
    /// (new) tip.
    RestartMining,
    /// Report a block sighting to the propagation observer.
    BlockArrived { block: Arc<Block> },
}

/// A simulated participant.
///
/// Mutable state is exactly what the protocol needs: the fork-choice tip,
/// the set of block downloads in flight, and the orphan pool. The pending
/// mining-task handle lives runner-side, next to the queue it indexes.
pub struct Node {
    id: NodeId,
    region: RegionId,
    mining_power: u64,
    use_cbr: bool,
    is_churn: bool,
    consensus: Arc<dyn ConsensusAlgo>,
    cbr_policy: Arc<CbrPolicy>,
    neighbors: Vec<NodeId>,
    tip: Option<Arc<Block>>,
    downloading: HashSet<BlockId>,
    orphans: Vec<Arc<Block>>,
}

impl Node {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: NodeId,
        region: RegionId,
        mining_power: u64,
        use_cbr: bool,
        is_churn: bool,
        consensus: Arc<dyn ConsensusAlgo>,
        cbr_policy: Arc<CbrPolicy>,
    ) -> Self {
        Self {
            id,
            region,
            mining_power,
            use_cbr,
            is_churn,
            consensus,
            cbr_policy,
            neighbors: Vec::new(),
            tip: None,
            downloading: HashSet::new(),
            orphans: Vec::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn region(&self) -> RegionId {
        self.region
    }

    pub fn mining_power(&self) -> u64 {
        self.mining_power
    }

    pub fn uses_cbr(&self) -> bool {
        self.use_cbr
    }

    pub fn is_churn(&self) -> bool {
        self.is_churn
    }

    pub fn tip(&self) -> Option<&Arc<Block>> {
        self.tip.as_ref()
    }

    pub fn tip_height(&self) -> u64 {
        self.tip.as_ref().map_or(0, |b| b.height())
    }

    pub fn neighbors(&self) -> &[NodeId] {
        &self.neighbors
    }

    pub fn set_neighbors(&mut self, neighbors: Vec<NodeId>) {
        self.neighbors = neighbors;
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    /// Install the shared genesis block as the initial tip.
    ///
    /// Used once at bootstrap, before any events flow; genesis arrival is
    /// reported by the runner directly.
    pub fn seed_genesis(&mut self, genesis: Arc<Block>) {
        debug_assert!(self.tip.is_none());
        self.tip = Some(genesis);
    }

    /// Feed one event through the state machine.
    pub fn handle(&mut self, event: NodeEvent, rng: &mut ChaCha8Rng) -> Vec<NodeAction> {
        match event {
            NodeEvent::Inv { from, block } => self.on_inv(from, block),
            NodeEvent::BlockRequest { from, block, cbr } => self.on_block_request(from, block, cbr),
            NodeEvent::CompactBlock { from, block } => self.on_compact_block(from, block, rng),
            NodeEvent::GetBlockTxn { from, block, bytes } => {
                vec![NodeAction::Send {
                    to: from,
                    message: OutboundMessage::BlockTxn { block, bytes },
                }]
            }
            NodeEvent::BlockTxn { from: _, block } | NodeEvent::BlockBody { from: _, block } => {
                self.on_block_delivered(block)
            }
            NodeEvent::MintCompleted { block } => self.adopt_chain(block),
        }
    }

    /// INV: the Idle→Awaiting transition. Start a download when the block
    /// is unknown and improves on the tip; remember it as an orphan when
    /// it is unknown but does not.
    fn on_inv(&mut self, from: NodeId, block: Arc<Block>) -> Vec<NodeAction> {
        if self.downloading.contains(&block.id()) || self.knows_block(&block) {
            return Vec::new();
        }
        if self
            .consensus
            .is_received_block_valid(&block, self.tip.as_ref())
        {
            trace!(node = %self.id, block = %block.id(), peer = %from, "requesting announced block");
            self.downloading.insert(block.id());
            vec![NodeAction::Send {
                to: from,
                message: OutboundMessage::BlockRequest {
                    block,
                    cbr: self.use_cbr,
                },
            }]
        } else {
            self.remember_orphan(block);
            Vec::new()
        }
    }

    /// Serve a block request: compact when both ends relay compactly,
    /// full body otherwise.
    fn on_block_request(
        &mut self,
        from: NodeId,
        block: Arc<Block>,
        requester_cbr: bool,
    ) -> Vec<NodeAction> {
        let message = if self.use_cbr && requester_cbr {
            OutboundMessage::CompactBlock(block)
        } else {
            OutboundMessage::BlockBody(block)
        };
        vec![NodeAction::Send { to: from, message }]
    }

    /// A compact block arrived: reconstruct it, or fall back to fetching
    /// the missing data when reconstruction fails.
    fn on_compact_block(
        &mut self,
        from: NodeId,
        block: Arc<Block>,
        rng: &mut ChaCha8Rng,
    ) -> Vec<NodeAction> {
        let failure_rate = self.cbr_policy.failure_rate(self.is_churn);
        if rng.gen::<f64>() < failure_rate {
            let bytes = self.cbr_policy.sample_failure_bytes(self.is_churn, rng);
            trace!(
                node = %self.id,
                block = %block.id(),
                fallback_bytes = bytes,
                "compact relay failed, fetching block transactions"
            );
            vec![NodeAction::Send {
                to: from,
                message: OutboundMessage::GetBlockTxn { block, bytes },
            }]
        } else {
            self.on_block_delivered(block)
        }
    }

    /// Terminal state of the download orbit: the block body is here.
    fn on_block_delivered(&mut self, block: Arc<Block>) -> Vec<NodeAction> {
        self.downloading.remove(&block.id());
        if self
            .consensus
            .is_received_block_valid(&block, self.tip.as_ref())
        {
            self.adopt_chain(block)
        } else if !self.knows_block(&block) && !self.is_orphan(&block) {
            // Delivered but no longer an improvement (a better tip landed
            // while this transfer was in flight). Keep it for fork
            // accounting and still record the sighting.
            self.orphans.push(Arc::clone(&block));
            vec![NodeAction::BlockArrived { block }]
        } else {
            Vec::new()
        }
    }

    /// Adopt `block` as the new tip, then drain any orphans the new chain
    /// unlocks.
    fn adopt_chain(&mut self, block: Arc<Block>) -> Vec<NodeAction> {
        let mut actions = self.adopt_one(block);
        loop {
            let tip = self.tip.as_ref().expect("tip set during adoption");
            let Some(idx) = self
                .orphans
                .iter()
                .position(|o| self.consensus.is_received_block_valid(o, Some(tip)))
            else {
                break;
            };
            let orphan = self.orphans.remove(idx);
            trace!(node = %self.id, block = %orphan.id(), "replaying orphan onto new tip");
            actions.extend(self.adopt_one(orphan));
        }
        actions
    }

    fn adopt_one(&mut self, block: Arc<Block>) -> Vec<NodeAction> {
        // A tip on a losing fork is kept around: it may win again later.
        if let Some(old) = self.tip.take() {
            if !old.on_same_chain(&block) && !self.is_orphan(&old) {
                self.orphans.push(old);
            }
        }
        self.tip = Some(Arc::clone(&block));

        let mut actions = Vec::with_capacity(self.neighbors.len() + 2);
        actions.push(NodeAction::BlockArrived {
            block: Arc::clone(&block),
        });
        actions.push(NodeAction::RestartMining);
        for &neighbor in &self.neighbors {
            actions.push(NodeAction::Send {
                to: neighbor,
                message: OutboundMessage::Inv(Arc::clone(&block)),
            });
        }
        actions
    }

    /// Whether the block already sits on the tip's ancestor chain or in
    /// the orphan pool.
    fn knows_block(&self, block: &Arc<Block>) -> bool {
        let on_chain = self.tip.as_ref().is_some_and(|tip| {
            block.height() <= tip.height()
                && tip
                    .block_with_height(block.height())
                    .is_some_and(|b| b.id() == block.id())
        });
        on_chain || self.is_orphan(block)
    }

    fn is_orphan(&self, block: &Arc<Block>) -> bool {
        self.orphans.iter().any(|o| o.id() == block.id())
    }

    fn remember_orphan(&mut self, block: Arc<Block>) {
        if !self.is_orphan(&block) {
            trace!(node = %self.id, block = %block.id(), "queueing orphan announcement");
            self.orphans.push(block);
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("region", &self.region)
            .field("mining_power", &self.mining_power)
            .field("use_cbr", &self.use_cbr)
            .field("is_churn", &self.is_churn)
            .field("tip_height", &self.tip_height())
            .field("downloading", &self.downloading.len())
            .field("orphans", &self.orphans.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockprop_consensus::ProofOfWork;
    use num_bigint::BigUint;
    use rand::SeedableRng;
    use std::sync::Arc;

    fn policy() -> Arc<CbrPolicy> {
        Arc::new(CbrPolicy {
            block_size_bytes: 1000,
            failure_rate_control: 0.0,
            failure_rate_churn: 0.0,
            failure_size_distribution_control: vec![0.5],
            failure_size_distribution_churn: vec![0.9],
        })
    }

    fn node(id: u32, use_cbr: bool) -> Node {
        Node::new(
            NodeId(id),
            0,
            100,
            use_cbr,
            false,
            Arc::new(ProofOfWork::new(1000, 0)),
            policy(),
        )
    }

    fn genesis() -> Arc<Block> {
        Arc::new(Block::genesis(
            BlockId(0),
            NodeId(0),
            BigUint::from(1000u64),
        ))
    }

    fn extend(parent: &Arc<Block>, id: u64, mint_time: u64, producer: u32) -> Arc<Block> {
        let difficulty = parent.next_difficulty().clone();
        Arc::new(Block::new(
            BlockId(id),
            NodeId(producer),
            Arc::clone(parent),
            mint_time,
            difficulty.clone(),
            difficulty,
        ))
    }

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(77)
    }

    #[test]
    fn inv_for_better_block_requests_download() {
        let mut n = node(0, true);
        n.seed_genesis(genesis());
        let block = extend(n.tip().unwrap(), 1, 100, 1);

        let actions = n.handle(
            NodeEvent::Inv {
                from: NodeId(1),
                block: Arc::clone(&block),
            },
            &mut rng(),
        );
        assert_eq!(actions.len(), 1);
        match &actions[0] {
            NodeAction::Send {
                to,
                message: OutboundMessage::BlockRequest { block: b, cbr },
            } => {
                assert_eq!(*to, NodeId(1));
                assert_eq!(b.id(), block.id());
                assert!(cbr);
            }
            other => panic!("expected block request, got {other:?}"),
        }

        // A second INV for the same block is ignored while downloading.
        let actions = n.handle(
            NodeEvent::Inv {
                from: NodeId(2),
                block,
            },
            &mut rng(),
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn inv_for_known_block_is_ignored() {
        let mut n = node(0, true);
        let g = genesis();
        n.seed_genesis(Arc::clone(&g));
        let actions = n.handle(
            NodeEvent::Inv {
                from: NodeId(1),
                block: g,
            },
            &mut rng(),
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn request_served_compact_only_when_both_ends_relay_compactly() {
        let g = genesis();
        let block = extend(&g, 1, 100, 0);

        let mut holder = node(0, true);
        holder.seed_genesis(Arc::clone(&g));
        let actions = holder.handle(
            NodeEvent::BlockRequest {
                from: NodeId(1),
                block: Arc::clone(&block),
                cbr: true,
            },
            &mut rng(),
        );
        assert!(matches!(
            actions[0],
            NodeAction::Send {
                message: OutboundMessage::CompactBlock(_),
                ..
            }
        ));

        let actions = holder.handle(
            NodeEvent::BlockRequest {
                from: NodeId(1),
                block: Arc::clone(&block),
                cbr: false,
            },
            &mut rng(),
        );
        assert!(matches!(
            actions[0],
            NodeAction::Send {
                message: OutboundMessage::BlockBody(_),
                ..
            }
        ));

        let mut plain_holder = node(2, false);
        plain_holder.seed_genesis(g);
        let actions = plain_holder.handle(
            NodeEvent::BlockRequest {
                from: NodeId(1),
                block,
                cbr: true,
            },
            &mut rng(),
        );
        assert!(matches!(
            actions[0],
            NodeAction::Send {
                message: OutboundMessage::BlockBody(_),
                ..
            }
        ));
    }

    #[test]
    fn compact_failure_requests_fallback_with_sampled_size() {
        let mut n = node(0, true);
        n.seed_genesis(genesis());
        // Force failure; the only distribution entry is 0.5 of 1000 bytes.
        n.cbr_policy = Arc::new(CbrPolicy {
            failure_rate_control: 1.0,
            ..(*policy()).clone()
        });
        let block = extend(n.tip().unwrap(), 1, 100, 1);

        let actions = n.handle(
            NodeEvent::CompactBlock {
                from: NodeId(1),
                block,
            },
            &mut rng(),
        );
        match &actions[0] {
            NodeAction::Send {
                to,
                message: OutboundMessage::GetBlockTxn { bytes, .. },
            } => {
                assert_eq!(*to, NodeId(1));
                assert_eq!(*bytes, 500);
            }
            other => panic!("expected fallback request, got {other:?}"),
        }
    }

    #[test]
    fn compact_success_adopts_immediately() {
        let mut n = node(0, true);
        n.seed_genesis(genesis());
        n.set_neighbors(vec![NodeId(1)]);
        let block = extend(n.tip().unwrap(), 1, 100, 1);

        let actions = n.handle(
            NodeEvent::CompactBlock {
                from: NodeId(1),
                block: Arc::clone(&block),
            },
            &mut rng(),
        );
        assert_eq!(n.tip().unwrap().id(), block.id());
        assert!(actions
            .iter()
            .any(|a| matches!(a, NodeAction::RestartMining)));
    }

    #[test]
    fn delivery_adopts_rebroadcasts_and_restarts_mining() {
        let mut n = node(0, false);
        n.seed_genesis(genesis());
        n.set_neighbors(vec![NodeId(1), NodeId(2)]);
        let block = extend(n.tip().unwrap(), 1, 100, 1);

        let actions = n.handle(
            NodeEvent::BlockBody {
                from: NodeId(1),
                block: Arc::clone(&block),
            },
            &mut rng(),
        );

        assert_eq!(n.tip().unwrap().id(), block.id());
        let invs: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                NodeAction::Send {
                    to,
                    message: OutboundMessage::Inv(b),
                } => Some((*to, b.id())),
                _ => None,
            })
            .collect();
        assert_eq!(invs, vec![(NodeId(1), block.id()), (NodeId(2), block.id())]);
        assert!(actions
            .iter()
            .any(|a| matches!(a, NodeAction::RestartMining)));
        assert!(actions
            .iter()
            .any(|a| matches!(a, NodeAction::BlockArrived { .. })));
    }

    #[test]
    fn fork_switch_follows_total_difficulty() {
        // S4 shape: adopt the first valid arrival, then switch when a
        // strictly heavier fork shows up.
        let mut n = node(0, false);
        let g = genesis();
        n.seed_genesis(Arc::clone(&g));

        let a1 = extend(&g, 1, 100, 1);
        let b1 = extend(&g, 2, 100, 2);
        let b2 = extend(&b1, 3, 200, 2);

        n.handle(
            NodeEvent::BlockBody {
                from: NodeId(1),
                block: Arc::clone(&a1),
            },
            &mut rng(),
        );
        assert_eq!(n.tip().unwrap().id(), a1.id());

        // Same total difficulty: not adopted, kept as orphan.
        n.handle(
            NodeEvent::BlockBody {
                from: NodeId(2),
                block: Arc::clone(&b1),
            },
            &mut rng(),
        );
        assert_eq!(n.tip().unwrap().id(), a1.id());
        assert_eq!(n.orphan_count(), 1);

        // Strictly heavier fork: switch, and the old tip joins the pool.
        let actions = n.handle(
            NodeEvent::BlockBody {
                from: NodeId(2),
                block: Arc::clone(&b2),
            },
            &mut rng(),
        );
        assert_eq!(n.tip().unwrap().id(), b2.id());
        assert!(actions
            .iter()
            .any(|a| matches!(a, NodeAction::RestartMining)));
        assert!(n.orphans.iter().any(|o| o.id() == a1.id()));
    }

    #[test]
    fn orphan_announcement_replays_after_tip_catches_up() {
        let mut n = node(0, false);
        let g = genesis();
        n.seed_genesis(Arc::clone(&g));

        let b1 = extend(&g, 1, 100, 1);
        let b2 = extend(&b1, 2, 200, 1);

        // b2 announced while the node is still at genesis: valid by total
        // difficulty, so it downloads; deliver b2 first, then b1 arrives
        // as part of the same fork.
        // Here exercise the pool directly: deliver b2 with b1 unknown is
        // fine (parents are shared), but an equal-weight sibling is the
        // orphan case.
        let c1 = extend(&g, 3, 120, 2);
        n.handle(
            NodeEvent::BlockBody {
                from: NodeId(1),
                block: Arc::clone(&b1),
            },
            &mut rng(),
        );
        n.handle(
            NodeEvent::BlockBody {
                from: NodeId(2),
                block: Arc::clone(&c1),
            },
            &mut rng(),
        );
        assert_eq!(n.tip().unwrap().id(), b1.id());
        assert_eq!(n.orphan_count(), 1);

        // Adopting b2 leaves c1 pooled (still lighter), tip moves on.
        n.handle(
            NodeEvent::BlockBody {
                from: NodeId(1),
                block: Arc::clone(&b2),
            },
            &mut rng(),
        );
        assert_eq!(n.tip().unwrap().id(), b2.id());
        assert_eq!(n.orphan_count(), 1);

        // A child of c1 heavy enough to win pulls the chain over; the
        // pooled c1 stays an ancestor of the new tip.
        let c2 = extend(&c1, 4, 300, 2);
        let c3 = extend(&c2, 5, 400, 2);
        n.handle(
            NodeEvent::BlockBody {
                from: NodeId(2),
                block: Arc::clone(&c3),
            },
            &mut rng(),
        );
        assert_eq!(n.tip().unwrap().id(), c3.id());
    }
}
