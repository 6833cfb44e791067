use crate::datadir::DataPaths;
use remb_api::{DEFAULT_API_URL, DEFAULT_CLIENT_ID, DEFAULT_ISSUER_URL};
use remb_core::{RembError, RembResult};
use serde::{Deserialize, Serialize};
use std::fs;

pub const DEFAULT_SITE_URL: &str = "https://www.rember.com";
pub const DEFAULT_SLOT_LIMIT: usize = 100;
pub const MAX_SLOT_LIMIT: usize = 100;
pub const DEFAULT_LISTEN_TIMEOUT_SECS: u64 = 120;

/// User-editable settings stored as `config.toml` in the data directory.
///
/// Every field has a default, so a missing or partial file is always usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub issuer_url: String,
    pub client_id: String,
    pub api_url: String,
    pub site_url: String,
    pub slot_limit: usize,
    pub listen_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            issuer_url: DEFAULT_ISSUER_URL.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            site_url: DEFAULT_SITE_URL.to_string(),
            slot_limit: DEFAULT_SLOT_LIMIT,
            listen_timeout_secs: DEFAULT_LISTEN_TIMEOUT_SECS,
        }
    }
}

impl Config {
    pub fn validate(&self) -> RembResult<()> {
        if self.slot_limit == 0 || self.slot_limit > MAX_SLOT_LIMIT {
            return Err(RembError::usage(format!(
                "slot_limit must be between 1 and {MAX_SLOT_LIMIT}, got {}",
                self.slot_limit
            )));
        }

        for (field, value) in [
            ("issuer_url", &self.issuer_url),
            ("client_id", &self.client_id),
            ("api_url", &self.api_url),
            ("site_url", &self.site_url),
        ] {
            if value.trim().is_empty() {
                return Err(RembError::usage(format!(
                    "config field '{field}' must not be empty"
                )));
            }
        }

        Ok(())
    }
}

pub fn load_config(paths: &DataPaths) -> RembResult<Config> {
    if !paths.config_path.exists() {
        return Ok(Config::default());
    }

    let contents = fs::read_to_string(&paths.config_path).map_err(|err| {
        RembError::io(format!(
            "failed to read config '{}': {}",
            paths.config_path.display(),
            err
        ))
    })?;

    let config: Config = toml::from_str(&contents).map_err(|err| {
        RembError::io(format!(
            "failed to parse config '{}': {}",
            paths.config_path.display(),
            err
        ))
    })?;
    config.validate()?;
    Ok(config)
}

pub fn save_config(paths: &DataPaths, config: &Config) -> RembResult<()> {
    let serialized = toml::to_string_pretty(config)
        .map_err(|err| RembError::io(format!("failed to encode config.toml: {err}")))?;

    fs::write(&paths.config_path, serialized).map_err(|err| {
        RembError::io(format!(
            "failed to write config '{}': {}",
            paths.config_path.display(),
            err
        ))
    })
}
