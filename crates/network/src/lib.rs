//! Simulated wide-area network with region-to-region latency and
//! bandwidth-limited transfers.
//!
//! The model is entirely table-driven: a mean-latency matrix, per-region
//! upload/download bandwidths, a region-distribution CDF used when placing
//! nodes, and a degree-distribution CDF used when building topology. The
//! built-in tables describe six coarse geographic regions; scenarios
//! override them through [`NetworkConfig`].
//!
//! All sampling draws from the caller-supplied seeded RNG, so two runs with
//! the same seed see identical latencies.

mod model;
mod tables;

pub use model::{NetworkConfig, NetworkConfigError, NetworkModel};
pub use tables::{
    DEGREE_DISTRIBUTION, DOWNLOAD_BANDWIDTH_BITS_PER_MS, LATENCY_MS, NUM_REGIONS,
    REGION_DISTRIBUTION, UPLOAD_BANDWIDTH_BITS_PER_MS,
};
