//! Consensus contract for the block-propagation simulator.
//!
//! Consensus decides three things: when a node's next mining attempt lands
//! (a stochastic delay in virtual ms), whether a received block beats the
//! node's current tip, and how difficulty evolves along a chain. Only
//! proof-of-work is implemented; the trait keeps the seam open for other
//! strategies without committing to any.
//!
//! The state machine and runner treat the strategy as opaque: they hand it
//! the chain context and the shared seeded RNG and act on the result.

mod pow;
mod sampler;

pub use pow::ProofOfWork;
pub use sampler::sample_mining_delay;

use blockprop_types::{Block, NodeId, TimeMs};
use num_bigint::BigUint;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use thiserror::Error;

/// The delay and difficulty of a node's next mining attempt.
#[derive(Debug, Clone)]
pub struct MiningSchedule {
    /// Virtual ms until the attempt completes.
    pub delay_ms: TimeMs,
    /// Difficulty the minted block will carry.
    pub difficulty: BigUint,
}

/// Errors from consensus arithmetic.
///
/// All of these are fatal: they indicate a configuration or invariant bug,
/// never a recoverable runtime condition.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// `p = 1/difficulty` dropped to or below `2^-70`. The original
    /// implementation silently skipped the mining attempt here; reaching
    /// this branch means the difficulty parameters are broken, so it is
    /// surfaced as an error instead.
    #[error("mining success probability 1/{difficulty} is at or below 2^-70")]
    VanishingSuccessProbability { difficulty: BigUint },

    #[error("ln precondition violated: argument {0} is not positive")]
    LnOutOfDomain(f64),

    #[error("node has zero mining power")]
    ZeroMiningPower,

    #[error("mining difficulty is zero")]
    ZeroDifficulty,

    #[error("sampled mining delay exceeds the virtual clock range")]
    DelayOverflow,
}

/// A pluggable consensus strategy.
pub trait ConsensusAlgo: Send + Sync {
    /// Difficulty required of the first post-genesis block, derived from
    /// the network's total mining power.
    fn genesis_next_difficulty(&self, total_mining_power: &BigUint) -> BigUint;

    /// Sample the node's next mining attempt on top of `tip`.
    fn mining_schedule(
        &self,
        tip: &Arc<Block>,
        mining_power: u64,
        rng: &mut ChaCha8Rng,
    ) -> Result<MiningSchedule, ConsensusError>;

    /// Whether `received` should replace `current` as the node's tip.
    fn is_received_block_valid(&self, received: &Arc<Block>, current: Option<&Arc<Block>>)
        -> bool;

    /// The `next_difficulty` a freshly minted child of `parent` carries,
    /// applying the periodic retarget rule. `powers` maps node ids to
    /// mining power.
    fn child_next_difficulty(
        &self,
        parent: &Arc<Block>,
        child_difficulty: &BigUint,
        child_mint_time: TimeMs,
        child_producer: NodeId,
        powers: &[u64],
    ) -> BigUint;
}
