use async_trait::async_trait;
use ebft_consensus_core::msg::EbftMessage;
use ebft_consensus_core::peer::PeerIdx;
use ebft_util_error::WhateverResult;

/// Delivery of [`EbftMessage`]s to other validators of the chain
///
/// Delivery is best effort: a message that could not be sent is logged and
/// forgotten; consensus re-requests whatever it still needs. Inbound
/// messages are handed to [`crate::ChainWorkerHandle::on_peer_message`] by
/// whoever owns the receiving side.
#[async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    async fn send_to(&self, peer_idx: PeerIdx, msg: EbftMessage) -> WhateverResult<()>;

    /// Send to every validator except self
    async fn broadcast(&self, msg: EbftMessage) -> WhateverResult<()>;
}
