// SPDX-License-Identifier: MIT

//! EBFT chain worker
//!
//! Drives [`ebft_consensus`] for a single chain: a [`ChainWorker`] task owns
//! the [`ebft_consensus::block_manager::BlockManager`], ticks it, turns its
//! intents into requests to other validators and feeds their answers back.
//!
//! Actual networking is abstracted away behind [`transport::PeerTransport`].
mod handle;
mod intent_tracker;
mod revolt_tracker;
mod status_sender;
pub mod transport;
mod worker;

use ebft_consensus::status_manager::InitError;
pub use handle::ChainWorkerHandle;
use snafu::Snafu;
pub use worker::ChainWorker;

const LOG_TARGET: &str = "ebft::node";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ChainWorkerError {
    #[snafu(transparent)]
    StatusManagerInit { source: InitError },
    #[snafu(display("Too many validators: {count}"))]
    TooManyPeers { count: usize },
    #[snafu(display("Chain worker is gone"))]
    WorkerGone,
}

pub type ChainWorkerResult<T> = Result<T, ChainWorkerError>;
