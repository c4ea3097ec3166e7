use std::sync::Arc;

use ebft_consensus::block_database::BlockDatabase;
use ebft_consensus::block_manager::BlockManager;
use ebft_consensus::config::EbftConfig;
use ebft_consensus::engine::BlockEngine;
use ebft_consensus::status_manager::StatusManager;
use ebft_consensus::strategy::BlockBuildingStrategy;
use ebft_consensus_core::block::BlockHeight;
use ebft_consensus_core::num_peers::NumPeers;
use ebft_consensus_core::peer::{PeerIdx, PeerPubkey};
use ebft_util_fmt_opt::AsFmtOption as _;
use snafu::OptionExt as _;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::info;

use super::{ChainWorker, send_outbound};
use crate::intent_tracker::IntentTracker;
use crate::revolt_tracker::RevoltTracker;
use crate::status_sender::StatusSender;
use crate::transport::PeerTransport;
use crate::{ChainWorkerResult, LOG_TARGET, TooManyPeersSnafu};

#[bon::bon]
impl ChainWorker {
    /// Set up the worker for one validator of a chain
    ///
    /// Starts the block database worker, so must be called within a tokio
    /// runtime. Nothing else runs until [`ChainWorker::spawn`].
    #[builder]
    pub fn new(
        #[builder(default)] config: EbftConfig,
        peers: Vec<PeerPubkey>,
        my_idx: PeerIdx,
        engine: Arc<dyn BlockEngine>,
        transport: Arc<dyn PeerTransport>,
        strategy: Box<dyn BlockBuildingStrategy>,
    ) -> ChainWorkerResult<Self> {
        let num_peers = u8::try_from(peers.len())
            .ok()
            .map(NumPeers::from)
            .context(TooManyPeersSnafu { count: peers.len() })?;

        let best_height = engine.best_height();
        let my_next_height = best_height.map_or(BlockHeight::from(0), BlockHeight::next_expect);

        let status_manager = StatusManager::builder()
            .num_peers(num_peers)
            .my_idx(my_idx)
            .my_next_height(my_next_height)
            .recompute_max_iterations(config.recompute_max_iterations)
            .build()?;

        let db = Arc::new(
            BlockDatabase::builder()
                .engine(engine)
                .stop_timeout(config.db_stop_timeout)
                .name(format!("peer-{my_idx}"))
                .build(),
        );
        let (block_manager, completions_rx) = BlockManager::new(status_manager, db, strategy);

        info!(
            target: LOG_TARGET,
            %my_idx,
            %num_peers,
            best_height = %best_height.fmt_option(),
            "Chain worker initialized"
        );

        let my_status = *block_manager.status_manager().my_status();
        let now = Instant::now();
        let (status_tx, _) = watch::channel(my_status);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        // Finishes once the worker (the only sender) is gone
        tokio::spawn(send_outbound(transport, outbound_rx));

        Ok(Self {
            status_sender: StatusSender::new(config.status_resend_interval),
            revolt_tracker: RevoltTracker::new(config.revolt_timeout, &my_status, now),
            intent_tracker: IntentTracker::new(config.intent_retry_timeout),
            config,
            peers,
            block_manager,
            completions_rx,
            outbound_tx,
            status_tx,
        })
    }
}
