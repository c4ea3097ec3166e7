// SPDX-License-Identifier: MIT

//! In-memory EBFT backends
//!
//! [`MemBlockEngine`] keeps a validator's chain in memory and
//! [`MemNetwork`] connects any number of validators running in the same
//! process. [`MemCluster`] wires a whole validator set together. Meant for
//! tests and simulations.

mod cluster;
mod engine;
mod network;

pub use cluster::{MemCluster, MemStrategy, MemValidator};
pub use engine::{DEFAULT_MAX_BLOCK_TRANSACTIONS, MemBlockEngine, MemEngineError};
pub use network::{MemNetwork, MemTransport};

const LOG_TARGET: &str = "ebft::engine-mem";
