use std::time::Duration;

use ebft_consensus_core::intent::BlockIntent;
use ebft_consensus_core::msg::EbftMessage;
use ebft_consensus_core::peer::PeerIdx;
use ebft_consensus_core::status::NodeStatus;
use rand::Rng;
use rand::seq::IteratorRandom as _;
use tokio::time::Instant;

const RETRY_BACKOFF: f64 = 1.1;

/// Rate limits peer requests issued for the same [`BlockIntent`]
///
/// A new intent is acted on immediately. The same intent is acted on again
/// only once its timeout passed, and every retry waits 10% longer.
#[derive(Debug)]
pub(crate) struct IntentTracker {
    base_timeout: Duration,
    current: Option<TrackedIntent>,
}

#[derive(Debug)]
struct TrackedIntent {
    intent: BlockIntent,
    timeout: Duration,
    deadline: Instant,
}

impl IntentTracker {
    pub(crate) fn new(base_timeout: Duration) -> Self {
        Self {
            base_timeout,
            current: None,
        }
    }

    /// Should requests for `intent` be sent out now
    pub(crate) fn should_issue(&mut self, intent: BlockIntent, now: Instant) -> bool {
        match self.current.as_mut() {
            Some(tracked) if tracked.intent == intent => {
                if now < tracked.deadline {
                    return false;
                }
                tracked.timeout = tracked.timeout.mul_f64(RETRY_BACKOFF);
                tracked.deadline = now + tracked.timeout;
                true
            }
            _ => {
                self.current = Some(TrackedIntent {
                    intent,
                    timeout: self.base_timeout,
                    deadline: now + self.base_timeout,
                });
                true
            }
        }
    }
}

/// Requests to send to peers to make progress on `intent`
pub(crate) fn intent_requests(
    intent: BlockIntent,
    statuses: &[NodeStatus],
    my_idx: PeerIdx,
    rng: &mut impl Rng,
) -> Vec<(PeerIdx, EbftMessage)> {
    let others = || {
        statuses
            .iter()
            .enumerate()
            .filter_map(|(idx, status)| Some((PeerIdx::new(u8::try_from(idx).ok()?), status)))
            .filter(move |(peer_idx, _)| *peer_idx != my_idx)
    };

    match intent {
        BlockIntent::FetchBlockAtHeight { height } => others()
            .filter(|(_, status)| height < status.height)
            .choose(rng)
            .map(|(peer_idx, _)| (peer_idx, EbftMessage::GetBlockAtHeight { height }))
            .into_iter()
            .collect(),
        BlockIntent::FetchUnfinishedBlock { block_rid } => {
            let Some(my_height) = statuses.get(my_idx.as_usize()).map(|s| s.height) else {
                return vec![];
            };
            others()
                .filter(|(_, status)| {
                    status.height == my_height && status.block_rid == Some(block_rid)
                })
                .choose(rng)
                .map(|(peer_idx, _)| (peer_idx, EbftMessage::GetUnfinishedBlock { block_rid }))
                .into_iter()
                .collect()
        }
        BlockIntent::FetchCommitSignature { block_rid, peers } => peers
            .iter()
            .filter(|peer_idx| *peer_idx != my_idx)
            .map(|peer_idx| (peer_idx, EbftMessage::GetBlockSignature { block_rid }))
            .collect(),
        BlockIntent::DoNothing | BlockIntent::BuildBlock | BlockIntent::CommitBlock => vec![],
    }
}
