use std::time::Duration;

use ebft_consensus_core::block::{BlockHeight, BlockRound};
use ebft_consensus_core::status::NodeStatus;
use tokio::time::Instant;

/// Rounds past which the revolt timeout stops growing
const MAX_BACKOFF_ROUNDS: u8 = 50;

/// Starts a revolt when own height and round stop moving
///
/// The deadline is re-armed whenever the height or the round changes. Each
/// round at the same height gets 10% more time than the previous one, so a
/// slow but honest primary eventually gets enough time.
#[derive(Debug)]
pub(crate) struct RevoltTracker {
    base_timeout: Duration,
    height: BlockHeight,
    round: BlockRound,
    deadline: Instant,
}

impl RevoltTracker {
    pub(crate) fn new(base_timeout: Duration, my_status: &NodeStatus, now: Instant) -> Self {
        Self {
            base_timeout,
            height: my_status.height,
            round: my_status.round,
            deadline: now + Self::timeout_for(base_timeout, my_status.round),
        }
    }

    fn timeout_for(base_timeout: Duration, round: BlockRound) -> Duration {
        let exp = u8::try_from(round.to_number())
            .unwrap_or(MAX_BACKOFF_ROUNDS)
            .min(MAX_BACKOFF_ROUNDS);
        base_timeout.mul_f64(1.1f64.powi(i32::from(exp)))
    }

    /// Should own node start revolting now
    pub(crate) fn update(&mut self, my_status: &NodeStatus, now: Instant) -> bool {
        if my_status.height != self.height || my_status.round != self.round {
            self.height = my_status.height;
            self.round = my_status.round;
            self.deadline = now + Self::timeout_for(self.base_timeout, self.round);
            return false;
        }

        !my_status.revolting && self.deadline < now
    }
}
