#[allow(clippy::module_inception)]
mod config;

pub use self::config::{
    AnalysisSettings, Settings, CONFIG_PATH_ENV, ENS_SUBGRAPH_URL_ENV, MY_INDEXER_ID_ENV,
    NETWORK_SUBGRAPH_URL_ENV,
};
