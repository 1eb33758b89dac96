//! Immutable block objects linked into an append-only chain DAG.

use crate::{BlockId, NodeId, TimeMs};
use num_bigint::BigUint;
use num_traits::Zero;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A proof-of-work block.
///
/// Blocks are immutable after construction and live for the whole
/// simulation. Parent links form an append-only DAG: forks are simply
/// multiple children of the same parent. Equality and hashing go by
/// [`BlockId`] only.
///
/// `next_difficulty` is the difficulty any direct child must carry; it is
/// computed by the consensus strategy at mint time and frozen into the
/// block so validity checks never re-derive it.
#[derive(Debug)]
pub struct Block {
    id: BlockId,
    producer: NodeId,
    parent: Option<Arc<Block>>,
    height: u64,
    mint_time: TimeMs,
    difficulty: BigUint,
    total_difficulty: BigUint,
    next_difficulty: BigUint,
}

impl Block {
    /// Construct a non-genesis block on top of `parent`.
    ///
    /// Height and total difficulty are derived from the parent;
    /// `next_difficulty` comes from the consensus difficulty rule.
    pub fn new(
        id: BlockId,
        producer: NodeId,
        parent: Arc<Block>,
        mint_time: TimeMs,
        difficulty: BigUint,
        next_difficulty: BigUint,
    ) -> Self {
        let height = parent.height + 1;
        let total_difficulty = &parent.total_difficulty + &difficulty;
        Self {
            id,
            producer,
            parent: Some(parent),
            height,
            mint_time,
            difficulty,
            total_difficulty,
            next_difficulty,
        }
    }

    /// Construct the genesis block.
    ///
    /// Genesis carries zero difficulty and zero total difficulty; only its
    /// `next_difficulty` matters, since it seeds the first real mining round.
    pub fn genesis(id: BlockId, producer: NodeId, next_difficulty: BigUint) -> Self {
        Self {
            id,
            producer,
            parent: None,
            height: 0,
            mint_time: 0,
            difficulty: BigUint::zero(),
            total_difficulty: BigUint::zero(),
            next_difficulty,
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn producer(&self) -> NodeId {
        self.producer
    }

    pub fn parent(&self) -> Option<&Arc<Block>> {
        self.parent.as_ref()
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn mint_time(&self) -> TimeMs {
        self.mint_time
    }

    pub fn difficulty(&self) -> &BigUint {
        &self.difficulty
    }

    pub fn total_difficulty(&self) -> &BigUint {
        &self.total_difficulty
    }

    pub fn next_difficulty(&self) -> &BigUint {
        &self.next_difficulty
    }

    pub fn is_genesis(&self) -> bool {
        self.parent.is_none()
    }

    /// The ancestor of this block at exactly `height`, walking parent links.
    ///
    /// Returns `None` when `height` exceeds this block's own height. The
    /// result, when present, always lies on this block's ancestor chain.
    pub fn block_with_height(self: &Arc<Self>, height: u64) -> Option<Arc<Block>> {
        if height > self.height {
            return None;
        }
        let mut cursor = Arc::clone(self);
        while cursor.height > height {
            // Non-genesis blocks always have a parent, and height
            // decreases by one per step, so this terminates at `height`.
            cursor = Arc::clone(cursor.parent.as_ref()?);
        }
        Some(cursor)
    }

    /// Whether `self` and `other` lie on one chain (either is an ancestor
    /// of the other, or they are the same block).
    pub fn on_same_chain(self: &Arc<Self>, other: &Arc<Block>) -> bool {
        if self.height <= other.height {
            other
                .block_with_height(self.height)
                .is_some_and(|b| b.id == self.id)
        } else {
            self.block_with_height(other.height)
                .is_some_and(|b| b.id == other.id)
        }
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Block {}

impl Hash for Block {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
