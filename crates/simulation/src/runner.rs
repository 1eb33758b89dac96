//! Simulation driver: bootstraps nodes, pumps the event queue, executes
//! tasks, and routes their effects.

use crate::config::{ConfigError, SimulationConfig};
use crate::observer::PropagationObserver;
use crate::scheduler::{Scheduler, TaskHandle};
use crate::task::{MessageTask, MiningTask, Task};
use blockprop_consensus::{ConsensusAlgo, ConsensusError};
use blockprop_network::NetworkModel;
use blockprop_node::{CbrPolicy, Node, NodeAction, NodeEvent, OutboundMessage};
use blockprop_types::{Block, BlockId, NodeId, TimeMs};
use num_bigint::BigUint;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use std::io::Write;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace};

/// Fatal simulation failures.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("consensus arithmetic failure: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("failed to write propagation output: {0}")]
    Io(#[from] std::io::Error),
}

/// Counters collected while the simulation runs.
#[derive(Debug, Default, Clone)]
pub struct SimulationStats {
    /// Tasks dequeued and executed (tombstoned tasks excluded).
    pub events_processed: u64,
    /// Messages scheduled for delivery.
    pub messages_sent: u64,
    /// Blocks minted across all nodes (including losing forks).
    pub blocks_minted: u64,
    /// Mining tasks armed.
    pub mining_tasks_scheduled: u64,
    /// Mining tasks tombstoned by a tip change.
    pub mining_tasks_cancelled: u64,
    /// Mining tasks that fired stale (parent no longer the tip).
    pub stale_mining_tasks: u64,
    /// Block transfers served compactly.
    pub compact_blocks_sent: u64,
    /// Block transfers served as full bodies.
    pub full_blocks_sent: u64,
    /// Compact transfers that failed and fell back.
    pub cbr_failures: u64,
}

/// Discrete-event simulation of block propagation.
///
/// Owns every shared structure — clock, queue, RNG, node table, observer —
/// and threads them through task execution, so nothing global leaks
/// between runs and two runners with the same config and seed produce
/// identical output.
pub struct SimulationRunner<W: Write> {
    config: SimulationConfig,
    scheduler: Scheduler<Task>,
    network: NetworkModel,
    consensus: Arc<dyn ConsensusAlgo>,
    nodes: Vec<Node>,
    /// Pending mining task per node, for tombstone cancellation.
    mining_handles: Vec<Option<TaskHandle>>,
    /// Mining power per node id, for the difficulty retarget window.
    powers: Vec<u64>,
    observer: PropagationObserver<W>,
    rng: ChaCha8Rng,
    next_block_id: u64,
    max_tip_height: u64,
    stats: SimulationStats,
}

impl<W: Write> SimulationRunner<W> {
    /// Build the simulation: sample node attributes, wire the topology,
    /// seed genesis everywhere, and arm the initial mining round.
    pub fn new(config: SimulationConfig, sink: W) -> Result<Self, SimulationError> {
        config.validate()?;
        let network = NetworkModel::new(config.network.clone()).map_err(ConfigError::from)?;
        let consensus = config.consensus()?;
        let routing = config.routing_table()?;
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

        let cbr_policy = Arc::new(CbrPolicy {
            block_size_bytes: config.block_size,
            failure_rate_control: config.cbr_failure_rate_for_control_node,
            failure_rate_churn: config.cbr_failure_rate_for_churn_node,
            failure_size_distribution_control: config
                .cbr_failure_block_size_distribution_for_control_node
                .clone(),
            failure_size_distribution_churn: config
                .cbr_failure_block_size_distribution_for_churn_node
                .clone(),
        });

        let power_sampler = Normal::new(
            config.average_mining_power as f64,
            config.stdev_of_mining_power as f64,
        )
        .map_err(|e| ConfigError::InvalidValue {
            field: "STDEV_OF_MINING_POWER",
            reason: e.to_string(),
        })?;

        let mut nodes = Vec::with_capacity(config.num_of_nodes);
        let mut powers = Vec::with_capacity(config.num_of_nodes);
        for i in 0..config.num_of_nodes {
            let id = NodeId(i as u32);
            let region = network.sample_region(&mut rng);
            // Truncated normal: anything below one hash/ms is clamped.
            let mining_power = power_sampler.sample(&mut rng).max(1.0) as u64;
            let use_cbr = rng.gen::<f64>() < config.cbr_usage_rate;
            let is_churn = rng.gen::<f64>() < config.churn_node_rate;
            powers.push(mining_power);
            nodes.push(Node::new(
                id,
                region,
                mining_power,
                use_cbr,
                is_churn,
                Arc::clone(&consensus),
                Arc::clone(&cbr_policy),
            ));
        }

        for i in 0..nodes.len() {
            let neighbors =
                routing.outbound_neighbors(NodeId(i as u32), nodes.len(), &network, &mut rng);
            nodes[i].set_neighbors(neighbors);
        }

        let total_power: BigUint = powers.iter().map(|&p| BigUint::from(p)).sum();
        let genesis = Arc::new(Block::genesis(
            BlockId(0),
            NodeId(0),
            consensus.genesis_next_difficulty(&total_power),
        ));

        let mut observer = PropagationObserver::new(config.propagation_window, sink);
        for node in nodes.iter_mut() {
            node.seed_genesis(Arc::clone(&genesis));
            observer.arrive_block(&genesis, node.id(), 0)?;
        }

        let num_nodes = nodes.len();
        let mut runner = Self {
            config,
            scheduler: Scheduler::new(),
            network,
            consensus,
            mining_handles: vec![None; num_nodes],
            powers,
            nodes,
            observer,
            rng,
            next_block_id: 1,
            max_tip_height: 0,
            stats: SimulationStats::default(),
        };

        for i in 0..num_nodes {
            runner.start_mining(NodeId(i as u32))?;
        }

        info!(
            num_nodes,
            seed = runner.config.seed,
            end_block_height = runner.config.end_block_height,
            genesis_next_difficulty = %genesis.next_difficulty(),
            "simulation bootstrapped"
        );
        Ok(runner)
    }

    // ─── Accessors ───

    pub fn now(&self) -> TimeMs {
        self.scheduler.now()
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Highest tip height adopted by any node so far.
    pub fn max_tip_height(&self) -> u64 {
        self.max_tip_height
    }

    // ─── Main loop ───

    /// Run until the queue drains or a tip reaches the end height.
    pub fn run(&mut self) -> Result<(), SimulationError> {
        while self.step()? {}
        info!(
            final_time = self.scheduler.now(),
            events = self.stats.events_processed,
            blocks = self.stats.blocks_minted,
            max_height = self.max_tip_height,
            "simulation complete"
        );
        Ok(())
    }

    /// Execute one task. Returns `false` once the termination predicate
    /// holds (queue empty, or any tip at the end height).
    pub fn step(&mut self) -> Result<bool, SimulationError> {
        if self.max_tip_height >= self.config.end_block_height {
            return Ok(false);
        }
        let Some((_, task)) = self.scheduler.run_next() else {
            return Ok(false);
        };
        self.stats.events_processed += 1;
        match task {
            Task::Mining(mining) => self.execute_mining(mining)?,
            Task::Message(message) => self.execute_message(message)?,
        }
        Ok(true)
    }

    /// Drain the observer and hand back the output sink.
    pub fn finish(self) -> Result<W, SimulationError> {
        Ok(self.observer.finish()?)
    }

    // ─── Task execution ───

    fn execute_mining(&mut self, task: MiningTask) -> Result<(), SimulationError> {
        let idx = task.node.index();
        let tip = self.nodes[idx].tip().map(|b| b.id());
        if tip != Some(task.parent) {
            // The tip moved while this attempt was pending; a replacement
            // task is already armed.
            self.stats.stale_mining_tasks += 1;
            return Ok(());
        }

        let parent = Arc::clone(self.nodes[idx].tip().expect("mining node has a tip"));
        let now = self.scheduler.now();
        let next_difficulty = self.consensus.child_next_difficulty(
            &parent,
            &task.difficulty,
            now,
            task.node,
            &self.powers,
        );
        let id = BlockId(self.next_block_id);
        self.next_block_id += 1;
        let block = Arc::new(Block::new(
            id,
            task.node,
            parent,
            now,
            task.difficulty,
            next_difficulty,
        ));

        self.mining_handles[idx] = None;
        self.stats.blocks_minted += 1;
        debug!(node = %task.node, block = %id, height = block.height(), time = now, "minted block");

        let actions = self.nodes[idx].handle(NodeEvent::MintCompleted { block }, &mut self.rng);
        self.apply_actions(task.node, actions)
    }

    fn execute_message(&mut self, message: MessageTask) -> Result<(), SimulationError> {
        let to = message.to;
        trace!(from = %message.from, to = %to, "delivering message");
        let actions = self.nodes[to.index()].handle(message.into_event(), &mut self.rng);
        self.apply_actions(to, actions)
    }

    fn apply_actions(
        &mut self,
        origin: NodeId,
        actions: Vec<NodeAction>,
    ) -> Result<(), SimulationError> {
        for action in actions {
            match action {
                NodeAction::Send { to, message } => self.send_message(origin, to, message),
                NodeAction::RestartMining => self.start_mining(origin)?,
                NodeAction::BlockArrived { block } => {
                    self.max_tip_height = self
                        .max_tip_height
                        .max(self.nodes[origin.index()].tip_height());
                    let now = self.scheduler.now();
                    self.observer.arrive_block(&block, origin, now)?;
                }
            }
        }
        Ok(())
    }

    /// Schedule a message with the transfer timing its kind calls for.
    fn send_message(&mut self, from: NodeId, to: NodeId, message: OutboundMessage) {
        let from_region = self.nodes[from.index()].region();
        let to_region = self.nodes[to.index()].region();

        let interval = match &message {
            OutboundMessage::Inv(_) | OutboundMessage::BlockRequest { .. } => {
                self.network
                    .message_latency(from_region, to_region, &mut self.rng)
            }
            OutboundMessage::GetBlockTxn { .. } => {
                self.stats.cbr_failures += 1;
                self.network
                    .message_latency(from_region, to_region, &mut self.rng)
            }
            OutboundMessage::CompactBlock(_) => {
                self.stats.compact_blocks_sent += 1;
                self.network.download_time(
                    from_region,
                    to_region,
                    self.config.compact_block_size,
                    &mut self.rng,
                )
            }
            OutboundMessage::BlockBody(_) => {
                self.stats.full_blocks_sent += 1;
                self.network
                    .download_time(from_region, to_region, self.config.block_size, &mut self.rng)
            }
            OutboundMessage::BlockTxn { bytes, .. } => {
                self.network
                    .download_time(from_region, to_region, *bytes, &mut self.rng)
            }
        };

        self.stats.messages_sent += 1;
        self.scheduler
            .schedule(Task::Message(MessageTask { from, to, message }), interval);
    }

    /// Tombstone any pending mining task and arm a fresh one on the
    /// current tip.
    fn start_mining(&mut self, node: NodeId) -> Result<(), SimulationError> {
        let idx = node.index();
        if let Some(handle) = self.mining_handles[idx].take() {
            self.scheduler.cancel(handle);
            self.stats.mining_tasks_cancelled += 1;
        }

        let tip = Arc::clone(self.nodes[idx].tip().expect("mining requires a tip"));
        let schedule =
            self.consensus
                .mining_schedule(&tip, self.nodes[idx].mining_power(), &mut self.rng)?;
        trace!(node = %node, delay = schedule.delay_ms, "armed mining task");

        let handle = self.scheduler.schedule(
            Task::Mining(MiningTask {
                node,
                parent: tip.id(),
                difficulty: schedule.difficulty,
            }),
            schedule.delay_ms,
        );
        self.mining_handles[idx] = Some(handle);
        self.stats.mining_tasks_scheduled += 1;
        Ok(())
    }
}
