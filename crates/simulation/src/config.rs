//! Simulation configuration: recognized options, defaults, validation,
//! and strategy selection.

use blockprop_consensus::{ConsensusAlgo, ProofOfWork};
use blockprop_network::{NetworkConfig, NetworkConfigError};
use blockprop_node::{RandomTable, RoutingTable};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

/// Default empirical distribution of the data fraction a control node
/// pulls after a failed compact transfer: usually a small top-up, with a
/// thin tail approaching the full block.
const CBR_FAILURE_SIZES_CONTROL: [f64; 40] = [
    0.01, 0.01, 0.01, 0.01, 0.01, 0.01, 0.01, 0.01, 0.01, 0.01, 0.01, 0.01, 0.01, 0.01, 0.01,
    0.01, 0.01, 0.01, 0.01, 0.01, 0.01, 0.01, 0.01, 0.01, 0.02, 0.02, 0.02, 0.02, 0.03, 0.03,
    0.04, 0.05, 0.07, 0.10, 0.14, 0.20, 0.31, 0.48, 0.71, 0.96,
];

/// Same distribution for churn nodes, whose stale mempools make large
/// fallback transfers much more common.
const CBR_FAILURE_SIZES_CHURN: [f64; 40] = [
    0.01, 0.01, 0.01, 0.01, 0.01, 0.01, 0.01, 0.01, 0.01, 0.01, 0.01, 0.01, 0.02, 0.02, 0.02,
    0.03, 0.03, 0.04, 0.05, 0.06, 0.08, 0.10, 0.13, 0.16, 0.20, 0.25, 0.30, 0.36, 0.42, 0.49,
    0.56, 0.63, 0.70, 0.77, 0.83, 0.88, 0.92, 0.95, 0.97, 0.98,
];

/// Errors detected while validating configuration or resolving strategy
/// identifiers. All are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown consensus algorithm {0:?}")]
    UnknownConsensus(String),

    #[error("unknown routing table {0:?}")]
    UnknownRoutingTable(String),

    #[error("{field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: String,
    },

    #[error(transparent)]
    Network(#[from] NetworkConfigError),
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

/// All recognized simulation options.
///
/// Deserializes from JSON with the historical SCREAMING_SNAKE_CASE key
/// names (`NUM_OF_NODES`, `INTERVAL`, …); every field also has a builder
/// method for programmatic setup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SimulationConfig {
    /// Number of participating nodes.
    pub num_of_nodes: usize,
    /// Target mean mining interval, ms.
    pub interval: u64,
    /// Mean of the per-node mining-power sampler, hashes/ms.
    pub average_mining_power: u64,
    /// Standard deviation of the mining-power sampler.
    pub stdev_of_mining_power: u64,
    /// Stop once any node's tip reaches this height.
    pub end_block_height: u64,
    /// Full block size, bytes.
    pub block_size: u64,
    /// Compact block size, bytes.
    pub compact_block_size: u64,
    /// Bernoulli rate of CBR-capable nodes.
    pub cbr_usage_rate: f64,
    /// Bernoulli rate of churn nodes.
    pub churn_node_rate: f64,
    /// Compact-relay failure rate for always-on nodes.
    pub cbr_failure_rate_for_control_node: f64,
    /// Compact-relay failure rate for churn nodes.
    pub cbr_failure_rate_for_churn_node: f64,
    /// Fallback-size fractions for control nodes, sampled uniformly.
    pub cbr_failure_block_size_distribution_for_control_node: Vec<f64>,
    /// Fallback-size fractions for churn nodes, sampled uniformly.
    pub cbr_failure_block_size_distribution_for_churn_node: Vec<f64>,
    /// Routing-table strategy identifier.
    pub table: String,
    /// Consensus strategy identifier.
    pub algo: String,
    /// Difficulty retarget period in blocks; 0 disables retargeting.
    pub difficulty_interval: u64,
    /// Capacity of the propagation observer's FIFO window.
    pub propagation_window: usize,
    /// PRNG seed; the sole source of randomness.
    pub seed: u64,
    /// Region latency/bandwidth tables.
    pub network: NetworkConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            num_of_nodes: 300,
            interval: 600_000,
            average_mining_power: 400_000,
            stdev_of_mining_power: 100_000,
            end_block_height: 100,
            block_size: 535_000,
            compact_block_size: 18_000,
            cbr_usage_rate: 0.964,
            churn_node_rate: 0.976,
            cbr_failure_rate_for_control_node: 0.13,
            cbr_failure_rate_for_churn_node: 0.27,
            cbr_failure_block_size_distribution_for_control_node: CBR_FAILURE_SIZES_CONTROL
                .to_vec(),
            cbr_failure_block_size_distribution_for_churn_node: CBR_FAILURE_SIZES_CHURN.to_vec(),
            table: "random".to_owned(),
            algo: "pow".to_owned(),
            difficulty_interval: 2016,
            propagation_window: 10,
            seed: 10,
            network: NetworkConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn with_num_of_nodes(mut self, num_of_nodes: usize) -> Self {
        self.num_of_nodes = num_of_nodes;
        self
    }

    pub fn with_interval(mut self, interval_ms: u64) -> Self {
        self.interval = interval_ms;
        self
    }

    pub fn with_end_block_height(mut self, height: u64) -> Self {
        self.end_block_height = height;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_block_size(mut self, bytes: u64) -> Self {
        self.block_size = bytes;
        self
    }

    pub fn with_compact_block_size(mut self, bytes: u64) -> Self {
        self.compact_block_size = bytes;
        self
    }

    pub fn with_mining_power(mut self, average: u64, stdev: u64) -> Self {
        self.average_mining_power = average;
        self.stdev_of_mining_power = stdev;
        self
    }

    pub fn with_cbr_usage_rate(mut self, rate: f64) -> Self {
        self.cbr_usage_rate = rate;
        self
    }

    pub fn with_churn_node_rate(mut self, rate: f64) -> Self {
        self.churn_node_rate = rate;
        self
    }

    pub fn with_cbr_failure_rates(mut self, control: f64, churn: f64) -> Self {
        self.cbr_failure_rate_for_control_node = control;
        self.cbr_failure_rate_for_churn_node = churn;
        self
    }

    pub fn with_propagation_window(mut self, window: usize) -> Self {
        self.propagation_window = window;
        self
    }

    pub fn with_network(mut self, network: NetworkConfig) -> Self {
        self.network = network;
        self
    }

    /// Check every option for consistency. Called by the runner before
    /// anything is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_of_nodes == 0 {
            return Err(invalid("NUM_OF_NODES", "must be at least 1"));
        }
        if self.interval == 0 {
            return Err(invalid("INTERVAL", "must be at least 1 ms"));
        }
        if self.average_mining_power == 0 {
            return Err(invalid("AVERAGE_MINING_POWER", "must be at least 1"));
        }
        if self.block_size == 0 {
            return Err(invalid("BLOCK_SIZE", "must be at least 1 byte"));
        }
        if self.difficulty_interval == 1 {
            return Err(invalid(
                "DIFFICULTY_INTERVAL",
                "a one-block window degenerates the retarget rule; use 0 to disable",
            ));
        }
        for (field, rate) in [
            ("CBR_USAGE_RATE", self.cbr_usage_rate),
            ("CHURN_NODE_RATE", self.churn_node_rate),
            (
                "CBR_FAILURE_RATE_FOR_CONTROL_NODE",
                self.cbr_failure_rate_for_control_node,
            ),
            (
                "CBR_FAILURE_RATE_FOR_CHURN_NODE",
                self.cbr_failure_rate_for_churn_node,
            ),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(invalid(field, format!("rate {rate} outside [0, 1]")));
            }
        }
        for (field, distribution) in [
            (
                "CBR_FAILURE_BLOCK_SIZE_DISTRIBUTION_FOR_CONTROL_NODE",
                &self.cbr_failure_block_size_distribution_for_control_node,
            ),
            (
                "CBR_FAILURE_BLOCK_SIZE_DISTRIBUTION_FOR_CHURN_NODE",
                &self.cbr_failure_block_size_distribution_for_churn_node,
            ),
        ] {
            if distribution.is_empty() {
                return Err(invalid(field, "must not be empty"));
            }
            if distribution.iter().any(|f| !(0.0..=1.0).contains(f)) {
                return Err(invalid(field, "fractions must lie in [0, 1]"));
            }
        }
        self.network.validate()?;
        Ok(())
    }

    /// Resolve the `ALGO` identifier to a consensus strategy.
    pub fn consensus(&self) -> Result<Arc<dyn ConsensusAlgo>, ConfigError> {
        match self.algo.as_str() {
            "pow" => Ok(Arc::new(ProofOfWork::new(
                self.interval,
                self.difficulty_interval,
            ))),
            other => Err(ConfigError::UnknownConsensus(other.to_owned())),
        }
    }

    /// Resolve the `TABLE` identifier to a routing strategy.
    pub fn routing_table(&self) -> Result<Box<dyn RoutingTable>, ConfigError> {
        match self.table.as_str() {
            "random" => Ok(Box::new(RandomTable)),
            other => Err(ConfigError::UnknownRoutingTable(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(SimulationConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_nodes() {
        let config = SimulationConfig::default().with_num_of_nodes(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "NUM_OF_NODES",
                ..
            })
        ));
    }

    #[test]
    fn rejects_out_of_range_rates() {
        let config = SimulationConfig::default().with_cbr_usage_rate(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_one_block_retarget_window() {
        let mut config = SimulationConfig::default();
        config.difficulty_interval = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_strategy_ids_are_fatal() {
        let mut config = SimulationConfig::default();
        config.algo = "pos".to_owned();
        assert!(matches!(
            config.consensus(),
            Err(ConfigError::UnknownConsensus(_))
        ));
        config.table = "bitcoin-core".to_owned();
        assert!(matches!(
            config.routing_table(),
            Err(ConfigError::UnknownRoutingTable(_))
        ));
    }

    #[test]
    fn deserializes_historical_key_names() {
        let json = r#"{
            "NUM_OF_NODES": 42,
            "INTERVAL": 30000,
            "END_BLOCK_HEIGHT": 7,
            "CBR_USAGE_RATE": 0.5,
            "ALGO": "pow",
            "SEED": 99
        }"#;
        let config: SimulationConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.num_of_nodes, 42);
        assert_eq!(config.interval, 30_000);
        assert_eq!(config.end_block_height, 7);
        assert_eq!(config.cbr_usage_rate, 0.5);
        assert_eq!(config.seed, 99);
        // Unspecified keys keep their defaults.
        assert_eq!(config.propagation_window, 10);
    }
}
