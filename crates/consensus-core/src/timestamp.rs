use std::time::Duration;

use bincode::{Decode, Encode};
use ebft_util_array_type::{array_type_fixed_size_define, array_type_fixed_size_impl_serde};
use time::UtcDateTime;

array_type_fixed_size_define! {
    /// Microsecond-precision absolute timestamp, UTC
    #[derive(Encode, Decode, Clone, Copy, Hash)]
    pub struct Timestamp(u64);
}
array_type_fixed_size_impl_serde!(Timestamp);

impl Timestamp {
    pub fn now() -> Self {
        Self::from(
            u64::try_from(UtcDateTime::now().unix_timestamp_nanos() / 1000).unwrap_or_default(),
        )
    }

    /// Convert to datetime, if in range
    pub fn to_datetime(self) -> Option<UtcDateTime> {
        UtcDateTime::from_unix_timestamp_nanos(i128::from(self.to_number()) * 1000).ok()
    }

    pub fn as_millis(self) -> u64 {
        self.to_number() / 1000
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future
    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_micros(self.to_number().saturating_sub(earlier.to_number()))
    }
}

#[test]
fn timestamp_millis_and_elapsed() {
    let a = Timestamp::from(5_000_000);
    let b = Timestamp::from(5_250_000);
    assert_eq!(a.as_millis(), 5_000);
    assert_eq!(b.saturating_duration_since(a), Duration::from_millis(250));
    assert_eq!(a.saturating_duration_since(b), Duration::ZERO);
    assert!(Timestamp::now().to_datetime().is_some());
}
