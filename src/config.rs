use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::WiscatError;

pub const DEFAULT_GDC_URL: &str = "https://api.weather.gc.ca/collections/wis2-discovery-metadata";
pub const DEFAULT_WIS1_URL: &str = "https://gisc.dwd.de/oaidownload/wis-catalogue.tar.gz";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const CONFIG_FILE_NAME: &str = "wiscat.json";

pub const ENV_GDC_URL: &str = "WISCAT_GDC_URL";
pub const ENV_BUNDLE_URL: &str = "WISCAT_BUNDLE_URL";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub gdc_url: Option<String>,
    #[serde(default)]
    pub bundle_url: Option<String>,
    #[serde(default)]
    pub wis1_url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub cache_dir: Option<String>,
}

/// Settings resolved once at start-up and handed to the catalogue client.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub gdc_url: String,
    pub bundle_url: Option<String>,
    pub wis1_url: String,
    pub timeout: Duration,
    pub cache_dir: Option<Utf8PathBuf>,
}

impl ResolvedConfig {
    pub fn with_gdc_url(gdc_url: impl Into<String>) -> Self {
        Self {
            gdc_url: gdc_url.into().trim_end_matches('/').to_string(),
            bundle_url: None,
            wis1_url: DEFAULT_WIS1_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            cache_dir: None,
        }
    }

    /// Explicit cache directory, or `wiscat/<catalogue>` under the platform
    /// cache location.
    pub fn cache_dir_or_default(&self, catalogue: &str) -> Result<Utf8PathBuf, WiscatError> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.cache_dir().join("wiscat").join(catalogue)).ok()
            })
            .ok_or_else(|| WiscatError::Filesystem("unable to resolve cache directory".to_string()))
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self::with_gdc_url(DEFAULT_GDC_URL)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults, then the JSON config file, then the environment.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, WiscatError> {
        let config = Self::read(path)?;
        Ok(Self::resolve_config(config, |key| std::env::var(key).ok()))
    }

    fn read(path: Option<&str>) -> Result<Config, WiscatError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE_NAME),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| WiscatError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| WiscatError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config<F>(config: Config, env: F) -> ResolvedConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |value: Option<String>| value.filter(|value| !value.trim().is_empty());

        let gdc_url = non_empty(env(ENV_GDC_URL))
            .or(non_empty(config.gdc_url))
            .unwrap_or_else(|| DEFAULT_GDC_URL.to_string());
        let bundle_url = non_empty(env(ENV_BUNDLE_URL)).or(non_empty(config.bundle_url));
        let wis1_url = non_empty(config.wis1_url).unwrap_or_else(|| DEFAULT_WIS1_URL.to_string());

        ResolvedConfig {
            gdc_url: gdc_url.trim_end_matches('/').to_string(),
            bundle_url,
            wis1_url,
            timeout: Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            cache_dir: config.cache_dir.map(Utf8PathBuf::from),
        }
    }
}
