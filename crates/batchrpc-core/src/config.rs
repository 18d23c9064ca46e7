//! Client configuration: batch policy, request deadline and target network.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which parachain / relay-chain pair the node talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkSelector {
    #[default]
    Mainnet,
    Testnet,
}

impl NetworkSelector {
    /// Name of the parachain spec loaded for this network.
    pub fn chain(&self) -> &'static str {
        match self {
            Self::Mainnet => "nodle",
            Self::Testnet => "nodle-testnet",
        }
    }

    /// Name of the relay chain the parachain is attached to.
    pub fn relay_chain(&self) -> &'static str {
        match self {
            Self::Mainnet => "polkadot",
            Self::Testnet => "rococo",
        }
    }
}

impl std::fmt::Display for NetworkSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mainnet => write!(f, "mainnet"),
            Self::Testnet => write!(f, "testnet"),
        }
    }
}

impl FromStr for NetworkSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            other => Err(format!("unknown network '{other}' (expected mainnet or testnet)")),
        }
    }
}

/// Configuration for a [`BatchRpcClient`](crate::client::BatchRpcClient).
///
/// With neither `max_batch_size` nor `batch_interval_ms` set, requests only
/// leave the queue on an explicit `flush()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Flush as soon as this many calls are pending. `None` = no size trigger.
    #[serde(default)]
    pub max_batch_size: Option<usize>,
    /// Flush a non-empty queue every this many milliseconds. `None` = no timer.
    #[serde(default)]
    pub batch_interval_ms: Option<u64>,
    /// Evict a sent request and fail its caller if no response arrives within
    /// this many milliseconds. `None` = wait forever.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    /// Target network.
    #[serde(default)]
    pub network: NetworkSelector,
}

impl ClientConfig {
    /// Flush on every call.
    pub fn unbatched() -> Self {
        Self {
            max_batch_size: Some(1),
            ..Self::default()
        }
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = Some(size);
        self
    }

    /// Sub-millisecond intervals round up to 1 ms rather than disabling the timer.
    pub fn with_batch_interval(mut self, interval: Duration) -> Self {
        self.batch_interval_ms = Some(whole_millis(interval));
        self
    }

    /// Sub-millisecond timeouts round up to 1 ms.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = Some(whole_millis(timeout));
        self
    }

    pub fn with_network(mut self, network: NetworkSelector) -> Self {
        self.network = network;
        self
    }

    /// Effective size threshold. A configured size of 0 disables the trigger.
    pub fn size_threshold(&self) -> Option<usize> {
        self.max_batch_size.filter(|n| *n > 0)
    }

    /// Effective flush interval. A configured interval of 0 disables the timer.
    pub fn batch_interval(&self) -> Option<Duration> {
        self.batch_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Effective per-request deadline.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

/// Milliseconds in `d`, rounded up so only `Duration::ZERO` maps to 0.
fn whole_millis(d: Duration) -> u64 {
    let ms = u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
    if ms == 0 && !d.is_zero() {
        1
    } else {
        ms
    }
}
