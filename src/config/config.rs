use std::path::PathBuf;

use chrono::Duration;
use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;
use url::Url;

use crate::client::DEFAULT_QUERY_TIMEOUT;
use crate::utils::{DEFAULT_THAWING_PERIOD_EPOCHS, EPOCH_DURATION_SECONDS};

/// Environment variable holding the network subgraph endpoint.
pub const NETWORK_SUBGRAPH_URL_ENV: &str = "THEGRAPH_NETWORK_SUBGRAPH_URL";
/// Environment variable holding the ENS subgraph endpoint.
pub const ENS_SUBGRAPH_URL_ENV: &str = "ENS_SUBGRAPH_URL";
/// Environment variable holding the operator's own indexer address.
pub const MY_INDEXER_ID_ENV: &str = "MY_INDEXER_ID";
/// Overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "GRTINFO_CONFIG";

/// Deployment id of the ENS subgraph on the decentralized network.
const ENS_SUBGRAPH_ID: &str = "QmcE8RpWtsiN5hkJKdfCXGfTDoTgPEjMbQwnjLPfThT7kZ";

/// Tunables of the timeline reconciler and metrics engine.
///
/// Read from the `analysis` object of the config file, e.g.
/// `{ "analysis": { "upgrade_tolerance_secs": 120 } }`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AnalysisSettings {
    /// Max distance between the two halves of a signal upgrade
    #[serde(default = "default_upgrade_tolerance_secs")]
    pub upgrade_tolerance_secs: i64,
    /// Percentage of unallocated stake above which a close is flagged
    #[serde(default = "default_unallocated_warning_threshold")]
    pub unallocated_warning_threshold: u32,
    /// Blocks per reward period (one epoch)
    #[serde(default = "default_blocks_per_period")]
    pub blocks_per_period: u64,
    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: u64,
    #[serde(default = "default_thawing_period_epochs")]
    pub thawing_period_epochs: i64,
    #[serde(default = "default_epoch_duration_secs")]
    pub epoch_duration_secs: i64,
}

fn default_upgrade_tolerance_secs() -> i64 {
    300 // 5 minutes
}

fn default_unallocated_warning_threshold() -> u32 {
    40
}

fn default_blocks_per_period() -> u64 {
    7_200 // 12s L1 blocks over 24h
}

fn default_periods_per_year() -> u64 {
    365
}

fn default_thawing_period_epochs() -> i64 {
    DEFAULT_THAWING_PERIOD_EPOCHS
}

fn default_epoch_duration_secs() -> i64 {
    EPOCH_DURATION_SECONDS
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            upgrade_tolerance_secs: default_upgrade_tolerance_secs(),
            unallocated_warning_threshold: default_unallocated_warning_threshold(),
            blocks_per_period: default_blocks_per_period(),
            periods_per_year: default_periods_per_year(),
            thawing_period_epochs: default_thawing_period_epochs(),
            epoch_duration_secs: default_epoch_duration_secs(),
        }
    }
}

impl AnalysisSettings {
    /// Zero when out of range; [`Settings::load`] rejects such values.
    pub fn upgrade_tolerance(&self) -> Duration {
        Duration::try_seconds(self.upgrade_tolerance_secs).unwrap_or_default()
    }

    /// Default thawing period for undelegations whose end is unknown.
    ///
    /// Zero when out of range; [`Settings::load`] rejects such values.
    pub fn thawing_period(&self) -> Duration {
        self.thawing_period_secs()
            .and_then(Duration::try_seconds)
            .unwrap_or_default()
    }

    fn thawing_period_secs(&self) -> Option<i64> {
        self.thawing_period_epochs.checked_mul(self.epoch_duration_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |detail: &str| Err(ConfigError::Message(format!("analysis.{}", detail)));

        if self.upgrade_tolerance_secs < 0 || Duration::try_seconds(self.upgrade_tolerance_secs).is_none() {
            return invalid("upgrade_tolerance_secs must be a non-negative number of seconds");
        }
        if self.epoch_duration_secs <= 0 {
            return invalid("epoch_duration_secs must be positive");
        }
        match self.thawing_period_secs().and_then(Duration::try_seconds) {
            Some(period) if period >= Duration::zero() => Ok(()),
            _ => invalid("thawing_period_epochs x epoch_duration_secs is out of range"),
        }
    }
}

/// Shape of `~/.grtinfo/config.json` after environment overrides.
#[derive(Debug, Deserialize)]
struct RawSettings {
    #[serde(default)]
    network_subgraph_url: Option<String>,
    /// Legacy key for `network_subgraph_url`
    #[serde(default)]
    subgraph_url: Option<String>,
    #[serde(default)]
    ens_subgraph_url: Option<String>,
    #[serde(default)]
    my_indexer_id: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    request_timeout_secs: u64,
    #[serde(default)]
    analysis: AnalysisSettings,
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_QUERY_TIMEOUT.as_secs()
}

/// Root application configuration.
///
/// Sources, highest priority first:
/// - environment variables (`THEGRAPH_NETWORK_SUBGRAPH_URL`, `ENS_SUBGRAPH_URL`, `MY_INDEXER_ID`)
/// - `~/.grtinfo/config.json` (optional)
/// - built-in defaults
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub network_subgraph_url: String,
    pub ens_subgraph_url: Option<String>,
    /// Lowercased; only used to highlight matching entities
    pub my_indexer_id: Option<String>,
    pub request_timeout_secs: u64,
    pub analysis: AnalysisSettings,
}

impl Settings {
    /// Load from the process environment and the default config file.
    pub fn new() -> Result<Self, ConfigError> {
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        Self::load(default_config_path(&env), env)
    }

    /// Load from an explicit config file path and environment lookup.
    pub fn load<E>(path: Option<PathBuf>, env: E) -> Result<Self, ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Json).required(false));
        }

        let s = builder
            .set_override_option("network_subgraph_url", env(NETWORK_SUBGRAPH_URL_ENV))?
            .set_override_option("ens_subgraph_url", env(ENS_SUBGRAPH_URL_ENV))?
            .set_override_option("my_indexer_id", env(MY_INDEXER_ID_ENV))?
            .build()?;

        let raw: RawSettings = s.try_deserialize()?;

        Self::resolve(raw)
    }

    fn resolve(raw: RawSettings) -> Result<Self, ConfigError> {
        let network_subgraph_url = raw
            .network_subgraph_url
            .or(raw.subgraph_url)
            .map(|u| trim_url(&u))
            .ok_or_else(|| {
                ConfigError::Message(format!(
                    "No TheGraph Network subgraph URL configured. Set {} or add \
                     'network_subgraph_url' to ~/.grtinfo/config.json",
                    NETWORK_SUBGRAPH_URL_ENV
                ))
            })?;
        validate_url(&network_subgraph_url)?;

        let ens_subgraph_url = match raw.ens_subgraph_url {
            Some(url) => Some(trim_url(&url)),
            None => derive_ens_url(&network_subgraph_url),
        };
        if let Some(url) = &ens_subgraph_url {
            validate_url(url)?;
        }

        raw.analysis.validate()?;

        Ok(Self {
            network_subgraph_url,
            ens_subgraph_url,
            my_indexer_id: raw.my_indexer_id.map(|id| id.trim().to_lowercase()),
            request_timeout_secs: raw.request_timeout_secs,
            analysis: raw.analysis,
        })
    }
}

fn default_config_path<E>(env: &E) -> Option<PathBuf>
where
    E: Fn(&str) -> Option<String>,
{
    if let Some(path) = env(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(path));
    }
    env("HOME").map(|home| PathBuf::from(home).join(".grtinfo").join("config.json"))
}

fn trim_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn validate_url(url: &str) -> Result<(), ConfigError> {
    Url::parse(url)
        .map(|_| ())
        .map_err(|e| ConfigError::Message(format!("Invalid URL '{}': {}", url, e)))
}

/// Gateway URLs look like `https://gateway/api/<key>/subgraphs/id/<id>`; the ENS
/// subgraph lives behind the same gateway and key.
fn derive_ens_url(network_url: &str) -> Option<String> {
    let (base, _) = network_url.split_once("/subgraphs/id/")?;
    Some(format!("{}/subgraphs/id/{}", base, ENS_SUBGRAPH_ID))
}
