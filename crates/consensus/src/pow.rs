//! Proof-of-work consensus: difficulty schedule and fork choice.

use crate::{sample_mining_delay, ConsensusAlgo, ConsensusError, MiningSchedule};
use blockprop_types::{Block, NodeId, TimeMs};
use num_bigint::BigUint;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

/// Proof-of-work strategy.
///
/// Difficulty is expressed in expected hash attempts: the genesis
/// `next_difficulty` is the network's total mining power times the target
/// block interval, which makes the expected network-wide inter-block time
/// equal the target. Every `difficulty_interval` blocks the difficulty is
/// retargeted from the observed intervals in the trailing window; between
/// retargets a block passes its own difficulty on to its child.
#[derive(Debug, Clone)]
pub struct ProofOfWork {
    target_interval_ms: u64,
    /// Retarget period in blocks; 0 disables retargeting.
    difficulty_interval: u64,
}

impl ProofOfWork {
    pub fn new(target_interval_ms: u64, difficulty_interval: u64) -> Self {
        Self {
            target_interval_ms,
            difficulty_interval,
        }
    }

    pub fn target_interval_ms(&self) -> u64 {
        self.target_interval_ms
    }
}

impl ConsensusAlgo for ProofOfWork {
    fn genesis_next_difficulty(&self, total_mining_power: &BigUint) -> BigUint {
        total_mining_power * self.target_interval_ms
    }

    fn mining_schedule(
        &self,
        tip: &Arc<Block>,
        mining_power: u64,
        rng: &mut ChaCha8Rng,
    ) -> Result<MiningSchedule, ConsensusError> {
        let difficulty = tip.next_difficulty().clone();
        let delay_ms = sample_mining_delay(&difficulty, mining_power, rng)?;
        Ok(MiningSchedule {
            delay_ms,
            difficulty,
        })
    }

    fn is_received_block_valid(
        &self,
        received: &Arc<Block>,
        current: Option<&Arc<Block>>,
    ) -> bool {
        let meets_parent_difficulty = match received.parent() {
            None => true,
            Some(parent) => received.difficulty() >= parent.next_difficulty(),
        };
        let improves_fork_choice = match current {
            None => true,
            Some(tip) => received.total_difficulty() > tip.total_difficulty(),
        };
        meets_parent_difficulty && improves_fork_choice
    }

    fn child_next_difficulty(
        &self,
        parent: &Arc<Block>,
        child_difficulty: &BigUint,
        child_mint_time: TimeMs,
        child_producer: NodeId,
        powers: &[u64],
    ) -> BigUint {
        let child_height = parent.height() + 1;
        if self.difficulty_interval == 0 || child_height % self.difficulty_interval != 0 {
            return child_difficulty.clone();
        }

        // Retarget over the `difficulty_interval` blocks ending at the
        // child: sum the producers' powers and telescope the observed
        // minting intervals down to one subtraction.
        let mut power_sum = BigUint::from(powers[child_producer.index()]);
        let mut cursor = Arc::clone(parent);
        for _ in 1..self.difficulty_interval {
            power_sum += powers[cursor.producer().index()];
            match cursor.parent() {
                Some(p) => cursor = Arc::clone(p),
                None => break,
            }
        }
        let observed_interval = child_mint_time.saturating_sub(cursor.mint_time());
        if observed_interval == 0 {
            return child_difficulty.clone();
        }

        parent.difficulty() * power_sum * self.target_interval_ms / observed_interval
    }
}
