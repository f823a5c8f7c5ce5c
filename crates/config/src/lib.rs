use std::path::Path;

use config::{Config, ConfigError, Environment, File};
use kws::{FusionConfig, IndexConfig, NormalizationConfig};
use serde::{Deserialize, Serialize};

/// Default settings file looked up in the working directory (any format the
/// `config` crate recognizes, e.g. `kws.toml`).
pub const DEFAULT_SETTINGS_FILE: &str = "kws";

/// Environment prefix; nested keys use `__`, e.g. `KWS__INDEX__SILENCE_GAP_SECS=0.7`.
pub const ENV_PREFIX: &str = "KWS";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KwsSettings {
    pub index: IndexConfig,
    pub fusion: FusionConfig,
    pub normalization: NormalizationConfig,
}

impl KwsSettings {
    /// Loads defaults, then `kws.*` from the working directory if present,
    /// then `KWS__*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Like [`KwsSettings::load`], with an explicit settings file that must
    /// exist layered over the optional default one.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .add_source(Config::try_from(&KwsSettings::default())?)
            .add_source(File::with_name(DEFAULT_SETTINGS_FILE).required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Effective settings as pretty JSON (for `kws settings`).
    pub fn to_pretty_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
