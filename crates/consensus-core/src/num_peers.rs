use core::fmt;

use bincode::{Decode, Encode};
use derive_more::From;

use crate::block::{BlockHeight, BlockRound};
use crate::peer::PeerIdx;

/// Size of the validator set
#[derive(Debug, Clone, Copy, From, PartialEq, Eq, PartialOrd, Ord, Encode, Decode)]
pub struct NumPeers(u8);

impl fmt::Display for NumPeers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl NumPeers {
    /// Total number of peers
    pub fn total(self) -> usize {
        self.0.into()
    }

    /// Max number of faulty nodes
    pub fn max_faulty(self) -> usize {
        self.total().saturating_sub(1) / 3
    }

    /// Number of peers required to reach consensus (`Q(n)`)
    ///
    /// Any two sets of this size intersect in at least `max_faulty + 1`
    /// peers, so in at least one honest one.
    pub fn threshold(self) -> usize {
        self.total() - self.max_faulty()
    }

    /// Round-robin primary: `(height + round) mod n`
    pub fn primary_idx(self, height: BlockHeight, round: BlockRound) -> PeerIdx {
        assert!(0 < self.0, "Empty validator set has no primary");
        let sum = u128::from(height.to_number()) + u128::from(round.to_number());
        let idx = sum % u128::from(self.0);
        PeerIdx::new(u8::try_from(idx).expect("Smaller than a u8 modulus"))
    }

    /// Iterator over given number of [`PeerIdx`]es
    pub fn peer_idx_iter(self) -> impl Iterator<Item = PeerIdx> {
        (0..self.0).map(PeerIdx::new)
    }

    pub fn contains(self, peer_idx: PeerIdx) -> bool {
        peer_idx.as_usize() < self.total()
    }
}

pub trait ToNumPeers {
    fn to_num_peers(&self) -> NumPeers;
}

impl<T> ToNumPeers for [T] {
    fn to_num_peers(&self) -> NumPeers {
        let num_peers: u8 = <usize as TryInto<u8>>::try_into(self.len())
            .expect("ToNumPeers used for Vec of size larger than u8");
        NumPeers::from(num_peers)
    }
}

impl<T> ToNumPeers for Vec<T> {
    fn to_num_peers(&self) -> NumPeers {
        self.as_slice().to_num_peers()
    }
}

#[test]
fn num_peers_sanity() {
    use convi::CastFrom;
    for (n, f, t) in [(1, 0, 1), (2, 0, 2), (3, 0, 3), (4, 1, 3), (7, 2, 5), (10, 3, 7)] {
        let num = NumPeers::from(n);
        assert_eq!(usize::cast_from(n), num.total());
        assert_eq!(f, num.max_faulty());
        assert_eq!(t, num.threshold());
    }
}

#[test]
fn quorums_always_intersect_in_an_honest_peer() {
    for n in 1u8..=25 {
        let num = NumPeers::from(n);
        let q = num.threshold();
        assert_eq!(q, num.total() - (num.total() - 1) / 3);
        // Two quorums out of `n` overlap in at least `2q - n` peers.
        let overlap = 2 * q - num.total();
        assert!(
            num.max_faulty() < overlap,
            "n={n} q={q} overlap={overlap} f={}",
            num.max_faulty()
        );
    }
}

#[test]
fn primary_idx_is_round_robin() {
    let num = NumPeers::from(4);
    assert_eq!(num.primary_idx(0.into(), 0.into()), PeerIdx::new(0));
    assert_eq!(num.primary_idx(1.into(), 0.into()), PeerIdx::new(1));
    assert_eq!(num.primary_idx(1.into(), 3.into()), PeerIdx::new(0));
    assert_eq!(num.primary_idx(6.into(), 1.into()), PeerIdx::new(3));
    assert_eq!(
        num.primary_idx(u64::MAX.into(), u64::MAX.into()),
        PeerIdx::new(2)
    );
}
