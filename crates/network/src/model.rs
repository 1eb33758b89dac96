//! Latency and download-time computation over the region tables.

use crate::tables;
use blockprop_types::{RegionId, TimeMs};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Pareto};
use serde::Deserialize;
use thiserror::Error;

/// Fixed per-message processing overhead added on top of link latency.
const PROCESSING_DELAY_MS: u64 = 10;

/// Errors detected while validating a [`NetworkConfig`].
#[derive(Debug, Error)]
pub enum NetworkConfigError {
    #[error("latency matrix must be square and non-empty, got {rows} rows")]
    MalformedLatencyMatrix { rows: usize },

    #[error("{table} table has {len} entries, expected one per region ({regions})")]
    TableSizeMismatch {
        table: &'static str,
        len: usize,
        regions: usize,
    },

    #[error("{table} distribution must be non-decreasing and end at 1.0")]
    MalformedDistribution { table: &'static str },

    #[error("region {region} has zero bandwidth")]
    ZeroBandwidth { region: RegionId },
}

/// Region tables consumed by the network model.
///
/// Defaults to the built-in six-region tables; scenarios may override any
/// of them (e.g. a single-region matrix for a symmetric-latency test).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct NetworkConfig {
    /// Mean one-way latency between region pairs, ms.
    pub latency: Vec<Vec<u64>>,
    /// Per-region upload bandwidth, bits/ms.
    pub upload_bandwidth: Vec<u64>,
    /// Per-region download bandwidth, bits/ms.
    pub download_bandwidth: Vec<u64>,
    /// Cumulative distribution of nodes over regions.
    pub region_distribution: Vec<f64>,
    /// Cumulative distribution of outbound degree; index `d` is degree `d + 1`.
    pub degree_distribution: Vec<f64>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            latency: tables::LATENCY_MS.iter().map(|row| row.to_vec()).collect(),
            upload_bandwidth: tables::UPLOAD_BANDWIDTH_BITS_PER_MS.to_vec(),
            download_bandwidth: tables::DOWNLOAD_BANDWIDTH_BITS_PER_MS.to_vec(),
            region_distribution: tables::REGION_DISTRIBUTION.to_vec(),
            degree_distribution: tables::DEGREE_DISTRIBUTION.to_vec(),
        }
    }
}

impl NetworkConfig {
    /// A single-region configuration with symmetric latency and ample
    /// bandwidth. Handy for scenario tests that want network effects
    /// reduced to one knob.
    pub fn single_region(latency_ms: u64, bandwidth_bits_per_ms: u64) -> Self {
        Self {
            latency: vec![vec![latency_ms]],
            upload_bandwidth: vec![bandwidth_bits_per_ms],
            download_bandwidth: vec![bandwidth_bits_per_ms],
            region_distribution: vec![1.0],
            degree_distribution: vec![1.0],
        }
    }

    pub fn regions(&self) -> usize {
        self.latency.len()
    }

    /// Check table shapes and distribution monotonicity.
    pub fn validate(&self) -> Result<(), NetworkConfigError> {
        let regions = self.latency.len();
        if regions == 0 || self.latency.iter().any(|row| row.len() != regions) {
            return Err(NetworkConfigError::MalformedLatencyMatrix { rows: regions });
        }
        for (table, len) in [
            ("upload bandwidth", self.upload_bandwidth.len()),
            ("download bandwidth", self.download_bandwidth.len()),
            ("region distribution", self.region_distribution.len()),
        ] {
            if len != regions {
                return Err(NetworkConfigError::TableSizeMismatch {
                    table,
                    len,
                    regions,
                });
            }
        }
        for (table, cdf) in [
            ("region", &self.region_distribution),
            ("degree", &self.degree_distribution),
        ] {
            if !is_cdf(cdf) {
                return Err(NetworkConfigError::MalformedDistribution { table });
            }
        }
        for (region, (&up, &down)) in self
            .upload_bandwidth
            .iter()
            .zip(&self.download_bandwidth)
            .enumerate()
        {
            if up == 0 || down == 0 {
                return Err(NetworkConfigError::ZeroBandwidth { region });
            }
        }
        Ok(())
    }
}

fn is_cdf(values: &[f64]) -> bool {
    !values.is_empty()
        && values.windows(2).all(|w| w[0] <= w[1])
        && values.iter().all(|&v| (0.0..=1.0).contains(&v))
        && values.last().is_some_and(|&v| v >= 1.0 - 1e-9)
}

/// The network model: latency sampling, download-time computation, and the
/// node-placement distributions.
///
/// Latency draws follow a Pareto distribution around the configured mean
/// (shape `0.2 * mean`, scale `mean - 5`), which concentrates samples just
/// above the scale with a thin high tail. Means at or below the scale floor
/// are used as-is.
#[derive(Debug, Clone)]
pub struct NetworkModel {
    config: NetworkConfig,
}

impl NetworkModel {
    /// Build a model from validated tables.
    pub fn new(config: NetworkConfig) -> Result<Self, NetworkConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn regions(&self) -> usize {
        self.config.regions()
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Sample a region for a new node from the region CDF.
    pub fn sample_region(&self, rng: &mut ChaCha8Rng) -> RegionId {
        sample_cdf(&self.config.region_distribution, rng)
    }

    /// Sample an outbound degree for a new node from the degree CDF.
    pub fn sample_degree(&self, rng: &mut ChaCha8Rng) -> usize {
        sample_cdf(&self.config.degree_distribution, rng) + 1
    }

    /// One-way message latency between two regions: a Pareto draw around
    /// the configured mean plus the fixed processing term.
    pub fn message_latency(&self, from: RegionId, to: RegionId, rng: &mut ChaCha8Rng) -> TimeMs {
        let mean = self.config.latency[from][to];
        let link = if mean <= 5 {
            mean
        } else {
            let shape = 0.2 * mean as f64;
            let scale = (mean - 5) as f64;
            // Scale and shape are positive here, so construction cannot fail.
            let pareto = Pareto::new(scale, shape).expect("positive Pareto parameters");
            pareto.sample(rng).round() as u64
        };
        link + PROCESSING_DELAY_MS
    }

    /// Time to push `bytes` from a node in `from` to a node in `to`:
    /// serialization over the narrower of the two links, plus one message
    /// latency.
    pub fn download_time(
        &self,
        from: RegionId,
        to: RegionId,
        bytes: u64,
        rng: &mut ChaCha8Rng,
    ) -> TimeMs {
        let bandwidth = self.config.upload_bandwidth[from].min(self.config.download_bandwidth[to]);
        bytes * 8 / bandwidth + self.message_latency(from, to, rng)
    }
}

fn sample_cdf(cdf: &[f64], rng: &mut ChaCha8Rng) -> usize {
    let u = rng.gen::<f64>();
    cdf.iter().position(|&p| u < p).unwrap_or(cdf.len() - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn default_tables_validate() {
        assert!(NetworkConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_ragged_latency_matrix() {
        let config = NetworkConfig {
            latency: vec![vec![10, 20], vec![10]],
            ..NetworkConfig::single_region(10, 1000)
        };
        assert!(matches!(
            config.validate(),
            Err(NetworkConfigError::MalformedLatencyMatrix { .. })
        ));
    }

    #[test]
    fn rejects_non_monotonic_region_cdf() {
        let config = NetworkConfig {
            region_distribution: vec![0.9, 0.5, 1.0],
            latency: vec![vec![10; 3]; 3],
            upload_bandwidth: vec![1000; 3],
            download_bandwidth: vec![1000; 3],
            degree_distribution: vec![1.0],
        };
        assert!(matches!(
            config.validate(),
            Err(NetworkConfigError::MalformedDistribution { table: "region" })
        ));
    }

    #[test]
    fn rejects_zero_bandwidth() {
        let mut config = NetworkConfig::single_region(10, 1000);
        config.download_bandwidth[0] = 0;
        assert!(matches!(
            config.validate(),
            Err(NetworkConfigError::ZeroBandwidth { region: 0 })
        ));
    }

    #[test]
    fn latency_is_deterministic_per_seed() {
        let model = NetworkModel::new(NetworkConfig::default()).unwrap();
        let mut rng1 = ChaCha8Rng::seed_from_u64(7);
        let mut rng2 = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..100 {
            assert_eq!(
                model.message_latency(0, 3, &mut rng1),
                model.message_latency(0, 3, &mut rng2)
            );
        }
    }

    #[test]
    fn latency_includes_processing_term() {
        let model = NetworkModel::new(NetworkConfig::single_region(100, 1000)).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..200 {
            let latency = model.message_latency(0, 0, &mut rng);
            // Pareto scale floor is mean - 5; everything sits above scale + 10.
            assert!(latency >= 105, "latency {latency} below floor");
        }
    }

    #[test]
    fn download_time_is_transfer_plus_latency() {
        // 1000 bits/ms on both sides, 8000 bytes = 64 ms of serialization.
        let model = NetworkModel::new(NetworkConfig::single_region(100, 1000)).unwrap();
        let mut rng1 = ChaCha8Rng::seed_from_u64(9);
        let mut rng2 = ChaCha8Rng::seed_from_u64(9);
        let with_transfer = model.download_time(0, 0, 8000, &mut rng1);
        let latency_only = model.message_latency(0, 0, &mut rng2);
        assert_eq!(with_transfer, latency_only + 64);
    }

    #[test]
    fn region_sampling_respects_cdf_bounds() {
        let model = NetworkModel::new(NetworkConfig::default()).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..1000 {
            assert!(model.sample_region(&mut rng) < model.regions());
        }
    }

    #[test]
    fn degree_sampling_is_at_least_one() {
        let model = NetworkModel::new(NetworkConfig::default()).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        for _ in 0..1000 {
            let degree = model.sample_degree(&mut rng);
            assert!((1..=20).contains(&degree));
        }
    }
}
