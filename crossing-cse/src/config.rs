use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::util::config::StoredConfig;
use crate::util::http::Uri;

// IMPORTANT: CseConfig is persisted to disk as the device identity.
// Failing to deserialize it after a change means the device comes up under
// a new originator and provisions a second, unrelated resource tree on the
// CSE. Always consider how an older stored document migrates.

/// CSE connection and identity configuration
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct CseConfig {
    /// Base URI of the CSE host, e.g. `http://3.88.130.137:80`
    pub endpoint: Uri,

    /// Resource name of the CSE base, used as the discovery root
    pub cse_base: String,

    /// Originator this device uses for every request (`X-M2M-Origin`)
    pub originator: String,

    /// Resource name of the Application entity, e.g. `intersectionA`
    pub application: String,

    /// Originator of the dashboard that is granted access through the ACP
    pub dashboard_originator: String,

    #[serde(default)]
    pub request: RequestConfig,
}

impl StoredConfig for CseConfig {
    fn kind() -> &'static str {
        "cse"
    }
}

/// Durations stored as a number of milliseconds
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RequestConfig {
    /// Maximum time to wait for a single regular request
    #[serde(with = "millis")]
    pub timeout: Duration,

    /// Maximum time to wait on the polling channel. This needs to exceed the
    /// hold window of the CSE, otherwise every long poll ends in a client
    /// timeout instead of a 504
    #[serde(with = "millis")]
    pub poll_timeout: Duration,

    /// Initial wait after the polling channel becomes unreachable
    #[serde(with = "millis")]
    pub min_interval: Duration,

    /// Upper bound for the polling back-off
    #[serde(with = "millis")]
    pub max_backoff: Duration,

    /// How often to retry provisioning while the link is up but the
    /// resource tree is incomplete
    #[serde(with = "millis")]
    pub reprovision_interval: Duration,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(12_000),
            poll_timeout: Duration::from_millis(90_000),
            min_interval: Duration::from_millis(1_000),
            max_backoff: Duration::from_millis(60_000),
            reprovision_interval: Duration::from_millis(30_000),
        }
    }
}
