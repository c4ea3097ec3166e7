use ebft_consensus_core::bincode::STD_BINCODE_CONFIG;
use ebft_consensus_core::msg::EbftMessage;
use ebft_consensus_core::peer::PeerIdx;
use ebft_node::transport::PeerTransport as _;
use ebft_util_bincode::decode_whole;
use ebft_util_error::BoxedErrorResult;

use super::{Envelope, MemNetwork};

fn take_inbox(
    network: &MemNetwork,
    peer_idx: PeerIdx,
) -> tokio::sync::mpsc::UnboundedReceiver<Envelope> {
    network.receivers.lock().expect("Locking failed")[peer_idx.as_usize()]
        .take()
        .expect("Not taken yet")
}

fn msg(height: u64) -> EbftMessage {
    EbftMessage::GetBlockAtHeight {
        height: height.into(),
    }
}

#[test_log::test(tokio::test)]
async fn messages_arrive_encoded() -> BoxedErrorResult<()> {
    let network = MemNetwork::new(3);
    let mut inbox_1 = take_inbox(&network, PeerIdx::new(1));
    let mut inbox_2 = take_inbox(&network, PeerIdx::new(2));

    let transport = network.transport(PeerIdx::new(0));
    transport.send_to(PeerIdx::new(1), msg(1)).await?;
    transport.broadcast(msg(2)).await?;

    let envelope = inbox_1.recv().await.expect("Message");
    assert_eq!(envelope.from, PeerIdx::new(0));
    assert_eq!(decode_whole::<EbftMessage, _>(&envelope.bytes, STD_BINCODE_CONFIG)?, msg(1));

    for inbox in [&mut inbox_1, &mut inbox_2] {
        let envelope = inbox.recv().await.expect("Message");
        assert_eq!(decode_whole::<EbftMessage, _>(&envelope.bytes, STD_BINCODE_CONFIG)?, msg(2));
    }
    // Broadcast skips the sender
    assert!(take_inbox(&network, PeerIdx::new(0)).try_recv().is_err());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn offline_peers_miss_messages() -> BoxedErrorResult<()> {
    let network = MemNetwork::new(2);
    let mut inbox = take_inbox(&network, PeerIdx::new(1));
    let transport = network.transport(PeerIdx::new(0));

    network.set_online(PeerIdx::new(1), false);
    transport.send_to(PeerIdx::new(1), msg(1)).await?;
    assert!(inbox.try_recv().is_err());

    network.set_online(PeerIdx::new(1), true);
    network.set_online(PeerIdx::new(0), false);
    transport.send_to(PeerIdx::new(1), msg(2)).await?;
    assert!(inbox.try_recv().is_err());

    network.set_online(PeerIdx::new(0), true);
    transport.send_to(PeerIdx::new(1), msg(3)).await?;
    let envelope = inbox.recv().await.expect("Message");
    assert_eq!(decode_whole::<EbftMessage, _>(&envelope.bytes, STD_BINCODE_CONFIG)?, msg(3));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn unknown_peer_is_an_error() {
    let network = MemNetwork::new(2);
    let transport = network.transport(PeerIdx::new(0));
    assert!(transport.send_to(PeerIdx::new(5), msg(1)).await.is_err());
}
