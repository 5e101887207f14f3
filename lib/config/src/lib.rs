pub mod log;
pub mod outbound;
pub mod provider;

use config::{Config, File};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    log::LoggingConfig, outbound::OutboundOptions, provider::OutboundProviderOptions,
};

#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct StrandConfig {
    /// The node logger configuration.
    #[serde(default)]
    pub log: LoggingConfig,

    /// On-disk cache for provider subscription payloads.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Statically configured outbounds.
    #[serde(default)]
    pub outbounds: Vec<OutboundOptions>,

    /// Remote subscription providers.
    #[serde(default)]
    pub outbound_providers: Vec<OutboundProviderOptions>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Persists provider payloads between restarts.
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// Directory the cache files are written to.
    #[serde(default = "default_cache_directory")]
    pub directory: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            directory: default_cache_directory(),
        }
    }
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_directory() -> String {
    "cache".to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum StrandConfigError {
    #[error("Failed to load configuration: {0}")]
    ConfigLoadError(#[from] config::ConfigError),
}

static DEFAULT_FILE_NAMES: &[&str] = &[
    "strand.config.yaml",
    "strand.config.yml",
    "strand.config.json",
];

pub fn load_config(
    override_config_path: Option<String>,
) -> Result<StrandConfig, StrandConfigError> {
    let mut builder = Config::builder();

    if let Some(path) = override_config_path {
        builder = builder.add_source(File::with_name(&path).required(true));
    } else {
        for name in DEFAULT_FILE_NAMES {
            builder = builder.add_source(File::with_name(name).required(false));
        }
    }

    Ok(builder.build()?.try_deserialize::<StrandConfig>()?)
}
