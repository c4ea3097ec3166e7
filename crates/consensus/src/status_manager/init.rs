use ebft_consensus_core::block::BlockHeight;
use ebft_consensus_core::intent::BlockIntent;
use ebft_consensus_core::num_peers::NumPeers;
use ebft_consensus_core::peer::PeerIdx;
use ebft_consensus_core::status::NodeStatus;
use snafu::{Snafu, ensure};

use super::StatusManager;
use crate::config::DEFAULT_RECOMPUTE_MAX_ITERATIONS;

#[derive(Debug, Snafu)]
pub enum InitError {
    EmptyValidatorSet,
    #[snafu(display("Own index {my_idx} out of range for {num_peers} validators"))]
    MyIdxOutOfRange {
        my_idx: PeerIdx,
        num_peers: NumPeers,
    },
}

type InitResult<T> = Result<T, InitError>;

#[bon::bon]
impl StatusManager {
    /// Create a state machine for a validator about to work on `my_next_height`
    ///
    /// `my_next_height` is the best committed height plus one, or `0` for an
    /// empty chain.
    #[builder]
    pub fn new(
        num_peers: NumPeers,
        my_idx: PeerIdx,
        my_next_height: BlockHeight,
        #[builder(default = DEFAULT_RECOMPUTE_MAX_ITERATIONS)] recompute_max_iterations: usize,
        #[builder(default = NodeStatus::initial_serial())] serial: u64,
    ) -> InitResult<Self> {
        ensure!(0 < num_peers.total(), EmptyValidatorSetSnafu);
        ensure!(
            num_peers.contains(my_idx),
            MyIdxOutOfRangeSnafu { my_idx, num_peers }
        );

        let mut node_statuses = vec![NodeStatus::default(); num_peers.total()];
        node_statuses[my_idx.as_usize()] = NodeStatus::new(my_next_height, serial);

        Ok(Self {
            num_peers,
            my_idx,
            node_statuses,
            commit_signatures: vec![None; num_peers.total()],
            intent: BlockIntent::DoNothing,
            recompute_max_iterations,
            recompute_cap_hits: 0,
        })
    }
}
