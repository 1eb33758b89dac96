//! Per-node behavior for the block-propagation simulator.
//!
//! A node is a synchronous state machine in the spirit of
//! `events in → actions out`:
//!
//! ```text
//! NodeEvent → Node::handle() → Vec<NodeAction>
//! ```
//!
//! `handle` mutates the node (tip, download set, orphan pool) but performs
//! no I/O and never touches the event queue; the runner turns the returned
//! actions into scheduled message tasks, mining restarts, and observer
//! notifications. The only nondeterminism is drawn from the runner's
//! seeded RNG, passed in per call.

mod routing;
mod state;

pub use routing::{RandomTable, RoutingTable};
pub use state::{CbrPolicy, Node, NodeAction, NodeEvent, OutboundMessage};
