//! Task taxonomy: everything the event queue can dispatch.

use blockprop_node::{NodeEvent, OutboundMessage};
use blockprop_types::{BlockId, NodeId};
use num_bigint::BigUint;

/// A unit of work executing at its scheduled virtual time.
#[derive(Debug, Clone)]
pub enum Task {
    /// A node's pending mining attempt.
    Mining(MiningTask),
    /// A message in flight between two nodes.
    Message(MessageTask),
}

/// A mining attempt armed when a node adopted `parent` as its tip.
///
/// Execution is a no-op when the node's tip has moved on — the task is
/// stale and the node already armed a replacement. Tombstoning catches
/// most stale tasks before they surface; the parent check is the backstop.
#[derive(Debug, Clone)]
pub struct MiningTask {
    pub node: NodeId,
    /// Tip the attempt builds on.
    pub parent: BlockId,
    /// Difficulty the minted block will carry.
    pub difficulty: BigUint,
}

/// A protocol message between two nodes.
///
/// The runner computes the scheduling interval from the payload kind:
/// latency-only for announcements and requests, latency plus transfer time
/// for block bodies. Latency is sampled per message, so same-route
/// messages may overtake each other.
#[derive(Debug, Clone)]
pub struct MessageTask {
    pub from: NodeId,
    pub to: NodeId,
    pub message: OutboundMessage,
}

impl MessageTask {
    /// The receiver-side event this message produces on arrival.
    pub fn into_event(self) -> NodeEvent {
        let from = self.from;
        match self.message {
            OutboundMessage::Inv(block) => NodeEvent::Inv { from, block },
            OutboundMessage::BlockRequest { block, cbr } => {
                NodeEvent::BlockRequest { from, block, cbr }
            }
            OutboundMessage::CompactBlock(block) => NodeEvent::CompactBlock { from, block },
            OutboundMessage::GetBlockTxn { block, bytes } => {
                NodeEvent::GetBlockTxn { from, block, bytes }
            }
            OutboundMessage::BlockTxn { block, bytes: _ } => NodeEvent::BlockTxn { from, block },
            OutboundMessage::BlockBody(block) => NodeEvent::BlockBody { from, block },
        }
    }
}
