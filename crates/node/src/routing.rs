//! Topology construction strategies.
//!
//! A routing table decides each node's outbound neighbors once, at
//! bootstrap. The simulator treats the strategy as opaque; [`RandomTable`]
//! is the built-in policy, drawing an outbound degree from the network's
//! degree distribution and wiring to uniformly random distinct peers.

use blockprop_network::NetworkModel;
use blockprop_types::NodeId;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

/// Strategy for selecting a node's outbound neighbors.
pub trait RoutingTable: Send + Sync {
    /// Pick the outbound neighbor set for `node` in a network of
    /// `num_nodes` participants.
    fn outbound_neighbors(
        &self,
        node: NodeId,
        num_nodes: usize,
        network: &NetworkModel,
        rng: &mut ChaCha8Rng,
    ) -> Vec<NodeId>;
}

/// Uniformly random outbound neighbors, degree drawn from the network's
/// degree-distribution CDF.
#[derive(Debug, Default)]
pub struct RandomTable;

impl RoutingTable for RandomTable {
    fn outbound_neighbors(
        &self,
        node: NodeId,
        num_nodes: usize,
        network: &NetworkModel,
        rng: &mut ChaCha8Rng,
    ) -> Vec<NodeId> {
        let degree = network.sample_degree(rng).min(num_nodes.saturating_sub(1));
        let mut candidates: Vec<NodeId> = (0..num_nodes as u32)
            .map(NodeId)
            .filter(|&id| id != node)
            .collect();
        candidates.shuffle(rng);
        candidates.truncate(degree);
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockprop_network::NetworkConfig;
    use rand::SeedableRng;

    fn model() -> NetworkModel {
        NetworkModel::new(NetworkConfig::default()).unwrap()
    }

    #[test]
    fn neighbors_are_distinct_and_exclude_self() {
        let table = RandomTable;
        let model = model();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        for id in 0..20u32 {
            let neighbors = table.outbound_neighbors(NodeId(id), 50, &model, &mut rng);
            assert!(!neighbors.contains(&NodeId(id)));
            let mut sorted = neighbors.clone();
            sorted.sort();
            sorted.dedup();
            assert_eq!(sorted.len(), neighbors.len());
        }
    }

    #[test]
    fn degree_is_capped_by_network_size() {
        let table = RandomTable;
        let model = model();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let neighbors = table.outbound_neighbors(NodeId(0), 3, &model, &mut rng);
        assert!(neighbors.len() <= 2);
    }

    #[test]
    fn single_node_network_has_no_neighbors() {
        let table = RandomTable;
        let model = model();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        assert!(table
            .outbound_neighbors(NodeId(0), 1, &model, &mut rng)
            .is_empty());
    }
}
