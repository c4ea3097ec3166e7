// SPDX-License-Identifier: MIT

//! EBFT consensus logic
//!
//! [`status_manager::StatusManager`] is a deterministic, side-effect free
//! state machine: it tracks the believed status of every validator and
//! derives a single [`ebft_consensus_core::intent::BlockIntent`] from them.
//!
//! [`block_manager::BlockManager`] executes those intents against a
//! [`block_database::BlockDatabase`], which serializes all work on the
//! underlying [`engine::BlockEngine`]. Talking to other validators is left
//! to the higher level code (see `ebft-node`).

pub mod block_database;
pub mod block_manager;
pub mod config;
pub mod engine;
pub mod status_manager;
pub mod strategy;

const LOG_TARGET: &str = "ebft::consensus";

#[cfg(test)]
mod test_engine;
