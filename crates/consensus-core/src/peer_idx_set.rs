use bincode::{Decode, Encode};
use convi::CastInto as _;
use ebft_util_array_type::{array_type_define, array_type_impl_zero_default};

use crate::peer::PeerIdx;

array_type_define! {
    /// Bitset over all possible [`PeerIdx`]es
    #[derive(Copy, Clone, Debug, Hash, Encode, Decode)]
    pub struct PeerIdxSet[32];
}
array_type_impl_zero_default!(PeerIdxSet);

impl std::ops::BitOr for PeerIdxSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        let mut res = self;

        for i in 0..self.0.len() {
            res.0[i] |= rhs.0[i]
        }

        res
    }
}

impl PeerIdxSet {
    fn byte(&self, peer_idx: PeerIdx) -> &u8 {
        let bit = usize::from(peer_idx);
        &self.0[31 - (bit >> 3)]
    }

    fn byte_mut(&mut self, peer_idx: PeerIdx) -> &mut u8 {
        let bit = usize::from(peer_idx);
        &mut self.0[31 - (bit >> 3)]
    }

    fn bit(peer_idx: PeerIdx) -> u8 {
        let bit = usize::from(peer_idx);

        1 << (bit & 0x7)
    }

    pub fn insert(&mut self, peer_idx: PeerIdx) {
        *self.byte_mut(peer_idx) |= Self::bit(peer_idx);
    }

    pub fn remove(&mut self, peer_idx: PeerIdx) {
        *self.byte_mut(peer_idx) &= !Self::bit(peer_idx);
    }

    pub fn contains(&self, peer_idx: PeerIdx) -> bool {
        *self.byte(peer_idx) & Self::bit(peer_idx) != 0
    }

    pub fn len(self) -> usize {
        self.0
            .into_iter()
            .fold(0, |acc, b| acc + b.count_ones())
            .cast_into()
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// Members in ascending order
    pub fn iter(self) -> impl Iterator<Item = PeerIdx> {
        (PeerIdx::MIN.to_u8()..=PeerIdx::MAX.to_u8())
            .map(PeerIdx::new)
            .filter(move |peer_idx| self.contains(*peer_idx))
    }
}

impl FromIterator<PeerIdx> for PeerIdxSet {
    fn from_iter<T: IntoIterator<Item = PeerIdx>>(iter: T) -> Self {
        let mut set = Self::default();
        for peer_idx in iter {
            set.insert(peer_idx);
        }
        set
    }
}

impl std::fmt::Display for PeerIdxSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("{")?;
        for (i, peer_idx) in self.iter().enumerate() {
            if i != 0 {
                f.write_str(",")?;
            }
            peer_idx.fmt(f)?;
        }
        f.write_str("}")
    }
}
