use ebft_consensus_core::block::{BlockHeight, BlockRid};
use ebft_consensus_core::intent::BlockIntent;
use ebft_consensus_core::num_peers::NumPeers;
use ebft_consensus_core::peer::{PeerIdx, PeerSeckey};
use ebft_consensus_core::signed::CommitSignature;
use ebft_consensus_core::status::{NodeState, NodeStatus};

use super::{StatusManager, StatusOutcome};

const RID_A: BlockRid = BlockRid::from_bytes([0xaa; 32]);
const RID_B: BlockRid = BlockRid::from_bytes([0xbb; 32]);

fn status_manager(n: u8, my_idx: u8, height: u64) -> StatusManager {
    StatusManager::builder()
        .num_peers(NumPeers::from(n))
        .my_idx(PeerIdx::new(my_idx))
        .my_next_height(BlockHeight::from(height))
        .serial(1000)
        .build()
        .expect("Valid params")
}

fn sig(block_rid: BlockRid) -> CommitSignature {
    CommitSignature::sign(block_rid, PeerSeckey::generate())
}

fn peer_status(
    height: u64,
    state: NodeState,
    block_rid: Option<BlockRid>,
    serial: u64,
) -> NodeStatus {
    NodeStatus {
        height: height.into(),
        state,
        block_rid,
        serial,
        ..NodeStatus::default()
    }
}

#[test]
fn init_rejects_invalid_params() {
    assert!(
        StatusManager::builder()
            .num_peers(NumPeers::from(0))
            .my_idx(PeerIdx::new(0))
            .my_next_height(0.into())
            .build()
            .is_err()
    );
    assert!(
        StatusManager::builder()
            .num_peers(NumPeers::from(4))
            .my_idx(PeerIdx::new(4))
            .my_next_height(0.into())
            .build()
            .is_err()
    );
}

#[test]
fn initial_serial_comes_from_the_clock() {
    let sm = StatusManager::builder()
        .num_peers(NumPeers::from(1))
        .my_idx(PeerIdx::new(0))
        .my_next_height(3.into())
        .build()
        .expect("Valid params");
    assert!(1000 < sm.my_status().serial);
    assert_eq!(sm.my_status().height, BlockHeight::from(3));
    assert_eq!(sm.my_status().state, NodeState::WaitBlock);
}

#[test_log::test]
fn single_node_loop() {
    let mut sm = status_manager(1, 0, 0);

    for height in 0..5u64 {
        assert_eq!(sm.my_status().height, BlockHeight::from(height));
        assert_eq!(sm.block_intent(), BlockIntent::BuildBlock);

        let rid = BlockRid::from_bytes([u8::try_from(height).expect("small"); 32]);
        assert_eq!(sm.on_built_block(rid, sig(rid)), StatusOutcome::Ok);
        assert_eq!(sm.my_status().state, NodeState::Prepared);
        assert_eq!(sm.block_intent(), BlockIntent::CommitBlock);

        assert_eq!(sm.on_committed_block(rid), StatusOutcome::Ok);
    }
    assert_eq!(sm.recompute_cap_hits(), 0);
}

#[test_log::test]
fn primary_builds_and_waits_for_quorum() {
    let mut sm = status_manager(4, 0, 0);
    assert!(sm.is_my_node_primary());
    assert_eq!(sm.block_intent(), BlockIntent::BuildBlock);

    assert_eq!(sm.on_built_block(RID_A, sig(RID_A)), StatusOutcome::Ok);
    assert_eq!(sm.my_status().state, NodeState::HaveBlock);
    assert_eq!(sm.block_intent(), BlockIntent::DoNothing);

    // Built block that was not asked for
    assert_eq!(sm.on_built_block(RID_B, sig(RID_B)), StatusOutcome::Stale);
    assert_eq!(sm.my_status().block_rid, Some(RID_A));
}

#[test_log::test]
fn commit_needs_quorum_of_signatures() {
    // n = 4, Q = 3; validator 1 follows primary 0 at height 0
    let mut sm = status_manager(4, 1, 0);
    assert!(!sm.is_my_node_primary());
    assert_eq!(sm.block_intent(), BlockIntent::DoNothing);

    let _ = sm.on_status_update(0.into(), peer_status(0, NodeState::HaveBlock, Some(RID_A), 1));
    assert_eq!(
        sm.block_intent(),
        BlockIntent::FetchUnfinishedBlock { block_rid: RID_A }
    );

    assert_eq!(sm.on_received_block(RID_A, sig(RID_A)), StatusOutcome::Ok);
    assert_eq!(sm.my_status().state, NodeState::HaveBlock);
    assert!(sm.my_commit_signature().is_some());

    let _ = sm.on_status_update(2.into(), peer_status(0, NodeState::HaveBlock, Some(RID_A), 1));
    assert_eq!(sm.my_status().state, NodeState::Prepared);
    // Nobody else prepared yet, so nobody to ask
    assert_eq!(sm.block_intent(), BlockIntent::DoNothing);

    let _ = sm.on_status_update(0.into(), peer_status(0, NodeState::Prepared, Some(RID_A), 2));
    assert_eq!(
        sm.block_intent(),
        BlockIntent::FetchCommitSignature {
            block_rid: RID_A,
            peers: [PeerIdx::new(0)].into_iter().collect(),
        }
    );

    assert_eq!(
        sm.on_commit_signature(0.into(), RID_A, sig(RID_A)),
        StatusOutcome::Ok
    );
    // Q - 1 signatures: no commit
    assert_eq!(sm.block_intent(), BlockIntent::DoNothing);

    let _ = sm.on_status_update(2.into(), peer_status(0, NodeState::Prepared, Some(RID_A), 2));
    assert_eq!(
        sm.block_intent(),
        BlockIntent::FetchCommitSignature {
            block_rid: RID_A,
            peers: [PeerIdx::new(2)].into_iter().collect(),
        }
    );
    assert_eq!(
        sm.on_commit_signature(2.into(), RID_A, sig(RID_A)),
        StatusOutcome::Ok
    );
    assert_eq!(sm.block_intent(), BlockIntent::CommitBlock);
    assert_eq!(sm.commit_signatures().iter().flatten().count(), 3);

    assert_eq!(sm.on_committed_block(RID_A), StatusOutcome::Ok);
    assert_eq!(sm.my_status().height, BlockHeight::from(1));
    assert_eq!(sm.my_status().state, NodeState::WaitBlock);
    assert_eq!(sm.commit_signatures().iter().flatten().count(), 0);
    // Height 1: validator 1 is the primary
    assert_eq!(sm.block_intent(), BlockIntent::BuildBlock);
}

#[test_log::test]
fn commit_signature_for_wrong_block_is_ignored() {
    let mut sm = status_manager(4, 1, 0);

    // Not prepared at all
    assert_eq!(
        sm.on_commit_signature(0.into(), RID_A, sig(RID_A)),
        StatusOutcome::Stale
    );

    let _ = sm.on_status_update(0.into(), peer_status(0, NodeState::Prepared, Some(RID_A), 1));
    let _ = sm.on_status_update(2.into(), peer_status(0, NodeState::Prepared, Some(RID_A), 1));
    assert_eq!(sm.on_received_block(RID_A, sig(RID_A)), StatusOutcome::Ok);
    assert_eq!(sm.my_status().state, NodeState::Prepared);

    assert_eq!(
        sm.on_commit_signature(0.into(), RID_B, sig(RID_B)),
        StatusOutcome::Stale
    );
    assert_eq!(
        sm.on_commit_signature(9.into(), RID_A, sig(RID_A)),
        StatusOutcome::Rejected
    );
    assert_eq!(sm.commit_signatures().iter().flatten().count(), 1);
}

#[test_log::test]
fn received_block_must_match_intent() {
    let mut sm = status_manager(4, 1, 0);

    assert_eq!(sm.on_received_block(RID_A, sig(RID_A)), StatusOutcome::Stale);

    let _ = sm.on_status_update(0.into(), peer_status(0, NodeState::HaveBlock, Some(RID_A), 1));
    assert_eq!(sm.on_received_block(RID_B, sig(RID_B)), StatusOutcome::Mismatch);
    assert_eq!(sm.my_status().state, NodeState::WaitBlock);
    assert_eq!(sm.my_status().block_rid, None);
}

#[test_log::test]
fn revolt_rotates_primary() {
    // n = 4, primary 0 is silent
    let mut sm = status_manager(4, 1, 0);
    for peer in [0u8, 2, 3] {
        let _ = sm.on_status_update(peer.into(), peer_status(0, NodeState::WaitBlock, None, 1));
    }
    assert_eq!(sm.block_intent(), BlockIntent::DoNothing);

    sm.on_start_revolting();
    assert!(sm.my_status().revolting);
    assert_eq!(sm.my_status().round, 0.into());

    let revolting = NodeStatus {
        revolting: true,
        ..peer_status(0, NodeState::WaitBlock, None, 2)
    };
    let _ = sm.on_status_update(2.into(), revolting);
    // 2 of 3 needed
    assert!(sm.my_status().revolting);

    let _ = sm.on_status_update(3.into(), revolting);
    assert!(!sm.my_status().revolting);
    assert_eq!(sm.my_status().round, 1.into());
    assert_eq!(sm.primary_index(), PeerIdx::new(1));
    assert_eq!(sm.block_intent(), BlockIntent::BuildBlock);
}

#[test_log::test]
fn revolt_succeeds_when_quorum_is_in_higher_rounds() {
    let mut sm = status_manager(4, 3, 0);
    sm.on_start_revolting();

    let ahead = NodeStatus {
        round: 1.into(),
        ..peer_status(0, NodeState::WaitBlock, None, 5)
    };
    let _ = sm.on_status_update(1.into(), ahead);
    let _ = sm.on_status_update(2.into(), ahead);

    assert_eq!(sm.my_status().round, 1.into());
    assert!(!sm.my_status().revolting);
}

#[test_log::test]
fn revolt_keeps_prepared_block() {
    let mut sm = status_manager(4, 1, 0);
    let _ = sm.on_status_update(0.into(), peer_status(0, NodeState::Prepared, Some(RID_A), 1));
    let _ = sm.on_status_update(2.into(), peer_status(0, NodeState::Prepared, Some(RID_A), 1));
    assert_eq!(sm.on_received_block(RID_A, sig(RID_A)), StatusOutcome::Ok);
    assert_eq!(sm.my_status().state, NodeState::Prepared);

    sm.on_start_revolting();
    let revolting = NodeStatus {
        revolting: true,
        ..peer_status(0, NodeState::Prepared, Some(RID_A), 3)
    };
    let _ = sm.on_status_update(0.into(), revolting);
    let _ = sm.on_status_update(2.into(), revolting);

    assert_eq!(sm.my_status().round, 1.into());
    assert_eq!(sm.my_status().state, NodeState::Prepared);
    assert_eq!(sm.my_status().block_rid, Some(RID_A));
}

#[test_log::test]
fn revolt_drops_unprepared_block() {
    let mut sm = status_manager(4, 1, 0);
    let _ = sm.on_status_update(0.into(), peer_status(0, NodeState::HaveBlock, Some(RID_A), 1));
    assert_eq!(sm.on_received_block(RID_A, sig(RID_A)), StatusOutcome::Ok);
    assert_eq!(sm.my_status().state, NodeState::HaveBlock);

    sm.on_start_revolting();
    let revolting = NodeStatus {
        revolting: true,
        ..peer_status(0, NodeState::WaitBlock, None, 3)
    };
    let _ = sm.on_status_update(2.into(), revolting);
    let _ = sm.on_status_update(3.into(), revolting);

    assert_eq!(sm.my_status().round, 1.into());
    assert_eq!(sm.my_status().state, NodeState::WaitBlock);
    assert_eq!(sm.my_status().block_rid, None);
    assert!(sm.my_commit_signature().is_none());
}

#[test_log::test]
fn falls_back_to_sync_when_quorum_moved_on() {
    let mut sm = status_manager(4, 3, 0);
    let _ = sm.on_status_update(0.into(), peer_status(0, NodeState::HaveBlock, Some(RID_A), 1));
    assert_eq!(sm.on_received_block(RID_A, sig(RID_A)), StatusOutcome::Ok);
    assert_eq!(sm.my_status().state, NodeState::HaveBlock);

    for peer in [0u8, 1, 2] {
        let _ = sm.on_status_update(peer.into(), peer_status(5, NodeState::WaitBlock, None, 10));
    }
    assert_eq!(sm.my_status().state, NodeState::WaitBlock);
    assert_eq!(sm.my_status().block_rid, None);
    assert_eq!(
        sm.block_intent(),
        BlockIntent::FetchBlockAtHeight { height: 0.into() }
    );

    assert_eq!(sm.on_height_advance(1.into()), StatusOutcome::Ok);
    assert_eq!(
        sm.block_intent(),
        BlockIntent::FetchBlockAtHeight { height: 1.into() }
    );
    assert_eq!(sm.recompute_cap_hits(), 0);
}

#[test_log::test]
fn height_only_moves_by_one() {
    let mut sm = status_manager(4, 2, 7);
    let before = *sm.my_status();

    assert_eq!(sm.on_height_advance(9.into()), StatusOutcome::Mismatch);
    assert_eq!(sm.on_height_advance(7.into()), StatusOutcome::Mismatch);
    assert_eq!(sm.on_height_advance(6.into()), StatusOutcome::Mismatch);
    assert_eq!(*sm.my_status(), before);

    assert_eq!(sm.on_committed_block(RID_A), StatusOutcome::Mismatch);
    assert_eq!(*sm.my_status(), before);

    assert_eq!(sm.on_height_advance(8.into()), StatusOutcome::Ok);
    assert_eq!(sm.my_status().height, BlockHeight::from(8));
    assert_eq!(sm.my_status().serial, before.serial + 1);
}

#[test_log::test]
fn fast_forward_height() {
    let mut sm = status_manager(4, 2, 3);

    assert_eq!(sm.fast_forward_height(0.into()), StatusOutcome::Mismatch);
    assert_eq!(sm.my_status().height, BlockHeight::from(3));

    assert_eq!(sm.fast_forward_height(2.into()), StatusOutcome::Ok);
    assert_eq!(sm.my_status().height, BlockHeight::from(3));

    assert_eq!(sm.fast_forward_height(9.into()), StatusOutcome::Ok);
    assert_eq!(sm.my_status().height, BlockHeight::from(10));
    assert_eq!(sm.my_status().round, 0.into());
}

#[test_log::test]
fn status_updates_are_merged_by_freshness() {
    let mut sm = status_manager(4, 0, 0);

    let newer = peer_status(0, NodeState::HaveBlock, Some(RID_A), 10);
    let older = peer_status(0, NodeState::WaitBlock, None, 9);

    assert_eq!(sm.on_status_update(1.into(), newer), StatusOutcome::Ok);
    assert_eq!(sm.on_status_update(1.into(), older), StatusOutcome::Stale);
    assert_eq!(sm.node_status(1.into()), Some(&newer));

    // Own slot and unknown peers are never overwritten
    assert_eq!(sm.on_status_update(0.into(), newer), StatusOutcome::Rejected);
    assert_eq!(sm.on_status_update(4.into(), newer), StatusOutcome::Rejected);
    assert_eq!(sm.my_status().block_rid, None);
}

#[test_log::test]
fn intent_is_idempotent() {
    let mut sm = status_manager(4, 1, 0);
    let _ = sm.on_status_update(0.into(), peer_status(0, NodeState::HaveBlock, Some(RID_A), 1));

    let first = sm.block_intent();
    let serial = sm.my_status().serial;
    for _ in 0..10 {
        assert_eq!(sm.block_intent(), first);
    }
    assert_eq!(sm.my_status().serial, serial);
    assert_eq!(sm.recompute_cap_hits(), 0);
}

#[test_log::test]
fn primary_from_other_height_is_not_fetched_from() {
    let mut sm = status_manager(4, 1, 0);
    // Primary for height 0 already moved on and holds a block at height 1
    let _ = sm.on_status_update(0.into(), peer_status(1, NodeState::HaveBlock, Some(RID_A), 1));
    let _ = sm.on_status_update(2.into(), peer_status(0, NodeState::WaitBlock, None, 1));
    let _ = sm.on_status_update(3.into(), peer_status(0, NodeState::WaitBlock, None, 1));

    assert_eq!(sm.block_intent(), BlockIntent::DoNothing);
}

#[test_log::test]
fn tiny_recompute_cap_is_reported() {
    let mut sm = StatusManager::builder()
        .num_peers(NumPeers::from(1))
        .my_idx(PeerIdx::new(0))
        .my_next_height(0.into())
        .recompute_max_iterations(0)
        .build()
        .expect("Valid params");

    let _ = sm.block_intent();
    assert_eq!(sm.recompute_cap_hits(), 1);
    assert_eq!(sm.intent(), BlockIntent::DoNothing);
}
