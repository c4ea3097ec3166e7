use std::time::Duration;

use ebft_consensus_core::status::NodeStatus;
use tokio::time::Instant;

/// Decides when own status needs to be broadcast
///
/// On every change (new `serial`), and periodically even without one, so
/// peers that missed a message eventually catch up.
#[derive(Debug)]
pub(crate) struct StatusSender {
    resend_interval: Duration,
    last_serial: Option<u64>,
    last_sent: Option<Instant>,
}

impl StatusSender {
    pub(crate) fn new(resend_interval: Duration) -> Self {
        Self {
            resend_interval,
            last_serial: None,
            last_sent: None,
        }
    }

    /// Status to broadcast now, if any
    pub(crate) fn update(&mut self, my_status: &NodeStatus, now: Instant) -> Option<NodeStatus> {
        let changed = self.last_serial != Some(my_status.serial);
        let due = self
            .last_sent
            .is_none_or(|last_sent| self.resend_interval <= now.saturating_duration_since(last_sent));

        if !changed && !due {
            return None;
        }

        self.last_serial = Some(my_status.serial);
        self.last_sent = Some(now);
        Some(*my_status)
    }
}
