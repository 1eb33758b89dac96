//! Propagation observer: per-block arrival bookkeeping and the output
//! stream.

use blockprop_types::{Block, NodeId, TimeMs};
use std::collections::{HashSet, VecDeque};
use std::io::{self, Write};
use std::sync::Arc;

/// One tracked block and its arrival times, in insertion order.
#[derive(Debug)]
struct TrackedBlock {
    block: Arc<Block>,
    /// `(node, delay_ms)` pairs in first-arrival order.
    arrivals: Vec<(NodeId, TimeMs)>,
    /// Nodes already recorded, for first-seen semantics.
    seen: HashSet<NodeId>,
}

/// Records, per observed block, when each node first saw it, and streams
/// completed records to the output sink.
///
/// The observer holds a FIFO window of `window` blocks. When a new block
/// shows up at capacity, the oldest record is written out and evicted;
/// whatever remains is written on [`finish`](Self::finish). A record line
/// is the propagation delay in ms as a decimal integer; zero delays (the
/// minter's own sighting) are suppressed.
///
/// Repeat arrivals never overwrite: the first sighting per (block, node)
/// wins.
#[derive(Debug)]
pub struct PropagationObserver<W: Write> {
    window: usize,
    tracked: VecDeque<TrackedBlock>,
    sink: W,
}

impl<W: Write> PropagationObserver<W> {
    /// Create an observer retaining up to `window` blocks (at least 1).
    pub fn new(window: usize, sink: W) -> Self {
        Self {
            window: window.max(1),
            tracked: VecDeque::with_capacity(window.max(1)),
            sink,
        }
    }

    /// Record that `node` saw `block` at virtual time `now`.
    pub fn arrive_block(
        &mut self,
        block: &Arc<Block>,
        node: NodeId,
        now: TimeMs,
    ) -> io::Result<()> {
        let delay = now - block.mint_time();
        if let Some(record) = self
            .tracked
            .iter_mut()
            .find(|t| t.block.id() == block.id())
        {
            if record.seen.insert(node) {
                record.arrivals.push((node, delay));
            }
            return Ok(());
        }

        if self.tracked.len() == self.window {
            let oldest = self.tracked.pop_front().expect("window is non-empty");
            write_record(&mut self.sink, &oldest)?;
        }
        self.tracked.push_back(TrackedBlock {
            block: Arc::clone(block),
            arrivals: vec![(node, delay)],
            seen: HashSet::from([node]),
        });
        Ok(())
    }

    /// Flush every remaining record and the sink itself, returning the
    /// sink for inspection.
    pub fn finish(mut self) -> io::Result<W> {
        while let Some(record) = self.tracked.pop_front() {
            write_record(&mut self.sink, &record)?;
        }
        self.sink.flush()?;
        Ok(self.sink)
    }

    /// Number of blocks currently tracked.
    pub fn tracked_blocks(&self) -> usize {
        self.tracked.len()
    }
}

fn write_record<W: Write>(sink: &mut W, record: &TrackedBlock) -> io::Result<()> {
    for &(_, delay) in &record.arrivals {
        if delay != 0 {
            writeln!(sink, "{delay}")?;
        }
    }
    Ok(())
}
