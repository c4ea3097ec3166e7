use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_STATUS_RESEND_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_REVOLT_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_INTENT_RETRY_TIMEOUT: Duration = Duration::from_millis(1000);
pub const DEFAULT_RECOMPUTE_MAX_ITERATIONS: usize = 1000;
pub const DEFAULT_DB_STOP_TIMEOUT: Duration = Duration::from_millis(1000);

/// Tunables of a single chain's consensus
///
/// Durations are (de)serialized as milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(default, rename_all = "kebab-case")]
pub struct EbftConfig {
    /// How often the chain worker polls the current intent
    #[builder(default = DEFAULT_TICK_INTERVAL)]
    #[serde(with = "duration_millis")]
    pub tick_interval: Duration,

    /// Own status is re-broadcast at least this often, even if unchanged
    #[builder(default = DEFAULT_STATUS_RESEND_INTERVAL)]
    #[serde(with = "duration_millis")]
    pub status_resend_interval: Duration,

    /// No height or round progress for this long starts a revolt
    #[builder(default = DEFAULT_REVOLT_TIMEOUT)]
    #[serde(with = "duration_millis")]
    pub revolt_timeout: Duration,

    /// Initial delay before re-issuing peer requests for the same intent
    #[builder(default = DEFAULT_INTENT_RETRY_TIMEOUT)]
    #[serde(with = "duration_millis")]
    pub intent_retry_timeout: Duration,

    #[builder(default = DEFAULT_RECOMPUTE_MAX_ITERATIONS)]
    pub recompute_max_iterations: usize,

    /// Bounded wait for in-flight block database work on shutdown
    #[builder(default = DEFAULT_DB_STOP_TIMEOUT)]
    #[serde(with = "duration_millis")]
    pub db_stop_timeout: Duration,
}

impl Default for EbftConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

pub(crate) mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize as _, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[test]
fn config_defaults_and_json() {
    let config = EbftConfig::default();
    assert_eq!(config.tick_interval, Duration::from_millis(50));
    assert_eq!(config.revolt_timeout, Duration::from_secs(10));
    assert_eq!(config.recompute_max_iterations, 1000);

    let partial: EbftConfig =
        serde_json::from_str(r#"{ "revolt-timeout": 500 }"#).expect("Valid json");
    assert_eq!(partial.revolt_timeout, Duration::from_millis(500));
    assert_eq!(partial.db_stop_timeout, DEFAULT_DB_STOP_TIMEOUT);

    let json = serde_json::to_value(&config).expect("Can't fail");
    assert_eq!(json["tick-interval"], 50);
}
