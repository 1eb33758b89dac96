//! Deterministic discrete-event simulation of block propagation.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                     SimulationRunner                       │
//! │                                                            │
//! │  ┌───────────────────────────────────────────────────────┐ │
//! │  │     Scheduler (BTreeMap<EventKey, Task>)              │ │
//! │  │     Ordered by: virtual time, insertion sequence      │ │
//! │  └──────────────────────────┬────────────────────────────┘ │
//! │                             │ run_next()                   │
//! │                             ▼                              │
//! │  ┌───────────────────────────────────────────────────────┐ │
//! │  │     MiningTask → mint block → Node::handle()          │ │
//! │  │     MessageTask → NodeEvent → Node::handle()          │ │
//! │  └──────────────────────────┬────────────────────────────┘ │
//! │                             │ NodeActions                  │
//! │                             ▼                              │
//! │  ┌───────────────────────────────────────────────────────┐ │
//! │  │     Send → schedule with network timing               │ │
//! │  │     RestartMining → tombstone + sample + schedule     │ │
//! │  │     BlockArrived → propagation observer               │ │
//! │  └───────────────────────────────────────────────────────┘ │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything is single-threaded and serialized by the event queue; with a
//! fixed seed, two runs produce byte-identical output files.

mod config;
mod observer;
mod runner;
mod scheduler;
mod task;

pub use config::{ConfigError, SimulationConfig};
pub use observer::PropagationObserver;
pub use runner::{SimulationError, SimulationRunner, SimulationStats};
pub use scheduler::{EventKey, Scheduler, TaskHandle};
pub use task::{MessageTask, MiningTask, Task};
