use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use ebft_consensus_core::bincode::STD_BINCODE_CONFIG;
use ebft_consensus_core::msg::EbftMessage;
use ebft_consensus_core::peer::PeerIdx;
use ebft_node::ChainWorkerHandle;
use ebft_node::transport::PeerTransport;
use ebft_util_bincode::{decode_whole, encode_to_vec_expect};
use ebft_util_error::WhateverResult;
use ebft_util_error::fmt::FmtCompact as _;
use n0_future::task::AbortOnDropHandle;
use snafu::{OptionExt as _, whatever};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::LOG_TARGET;

#[cfg(test)]
mod tests;

/// Message in flight, encoded the way it would go over the wire
struct Envelope {
    from: PeerIdx,
    bytes: Vec<u8>,
}

/// In-process network connecting validators of one chain
///
/// Every message is bincode encoded on send and decoded on delivery. A
/// validator can be taken offline, which silently drops everything it
/// sends or is sent.
pub struct MemNetwork {
    inboxes: Vec<mpsc::UnboundedSender<Envelope>>,
    receivers: Mutex<Vec<Option<mpsc::UnboundedReceiver<Envelope>>>>,
    online: Vec<AtomicBool>,
    pumps: Mutex<Vec<AbortOnDropHandle<()>>>,
}

impl MemNetwork {
    pub fn new(num_peers: usize) -> Arc<Self> {
        let (inboxes, receivers): (Vec<_>, Vec<_>) = (0..num_peers)
            .map(|_| {
                let (tx, rx) = mpsc::unbounded_channel();
                (tx, Some(rx))
            })
            .unzip();
        Arc::new(Self {
            inboxes,
            receivers: Mutex::new(receivers),
            online: (0..num_peers).map(|_| AtomicBool::new(true)).collect(),
            pumps: Mutex::default(),
        })
    }

    /// Outbound side for validator `my_idx`
    pub fn transport(self: &Arc<Self>, my_idx: PeerIdx) -> Arc<MemTransport> {
        Arc::new(MemTransport {
            network: self.clone(),
            my_idx,
        })
    }

    /// Feed messages addressed to `peer_idx` into its worker
    ///
    /// Each validator can be connected once.
    pub fn connect(&self, peer_idx: PeerIdx, handle: ChainWorkerHandle) -> WhateverResult<()> {
        let Some(mut inbox_rx) = self
            .receivers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(peer_idx.as_usize())
            .and_then(Option::take)
        else {
            whatever!("Peer {peer_idx} unknown or already connected");
        };

        let pump = tokio::spawn(async move {
            while let Some(Envelope { from, bytes }) = inbox_rx.recv().await {
                let msg: EbftMessage = match decode_whole(&bytes, STD_BINCODE_CONFIG) {
                    Ok(msg) => msg,
                    Err(err) => {
                        warn!(target: LOG_TARGET, %from, err = %err.fmt_compact(), "Invalid message");
                        continue;
                    }
                };
                if handle.on_peer_message(from, msg).is_err() {
                    debug!(target: LOG_TARGET, %peer_idx, "Worker gone, disconnecting");
                    break;
                }
            }
        });
        self.pumps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(AbortOnDropHandle::new(pump));
        Ok(())
    }

    /// Take `peer_idx` off (or back on) the network
    pub fn set_online(&self, peer_idx: PeerIdx, online: bool) {
        if let Some(flag) = self.online.get(peer_idx.as_usize()) {
            flag.store(online, Ordering::SeqCst);
        }
    }

    pub fn is_online(&self, peer_idx: PeerIdx) -> bool {
        self.online
            .get(peer_idx.as_usize())
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Stop delivering messages
    pub fn disconnect_all(&self) {
        self.pumps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn deliver(&self, from: PeerIdx, to: PeerIdx, bytes: Vec<u8>) -> WhateverResult<()> {
        let inbox = self
            .inboxes
            .get(to.as_usize())
            .whatever_context(format!("Unknown peer {to}"))?;
        if !self.is_online(from) || !self.is_online(to) {
            trace!(target: LOG_TARGET, %from, %to, "Peer offline, dropping message");
            return Ok(());
        }
        // Receiving side gone just means the message is lost
        let _ = inbox.send(Envelope { from, bytes });
        Ok(())
    }
}

/// [`PeerTransport`] of one validator on a [`MemNetwork`]
pub struct MemTransport {
    network: Arc<MemNetwork>,
    my_idx: PeerIdx,
}

#[async_trait]
impl PeerTransport for MemTransport {
    async fn send_to(&self, peer_idx: PeerIdx, msg: EbftMessage) -> WhateverResult<()> {
        let bytes = encode_to_vec_expect(&msg, STD_BINCODE_CONFIG);
        self.network.deliver(self.my_idx, peer_idx, bytes)
    }

    async fn broadcast(&self, msg: EbftMessage) -> WhateverResult<()> {
        let bytes = encode_to_vec_expect(&msg, STD_BINCODE_CONFIG);
        let peers = (0..self.network.inboxes.len())
            .filter_map(|idx| u8::try_from(idx).ok())
            .map(PeerIdx::new);
        for to in peers {
            if to != self.my_idx {
                self.network.deliver(self.my_idx, to, bytes.clone())?;
            }
        }
        Ok(())
    }
}
