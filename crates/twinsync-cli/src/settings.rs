//! Config file and environment loading

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use twinsync_engine::EngineConfig;
use twinsync_store::HttpStoreConfig;

/// Contents of a `--config` file. Any section may be omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub engine: EngineConfig,
    pub store: Option<HttpStoreConfig>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub engine: EngineConfig,
    pub store: HttpStoreConfig,
}

impl Settings {
    /// Config file when given, environment otherwise. The bearer token is
    /// never written to config files, so it always may come from
    /// `TWINSYNC_STORE_TOKEN`.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        Self::load_with(config_path, |name| std::env::var(name).ok())
    }

    pub fn load_with<F>(config_path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(path) = config_path else {
            return Ok(Self {
                engine: EngineConfig::from_lookup(&lookup)?,
                store: HttpStoreConfig::from_lookup(&lookup)?,
            });
        };

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let file: FileConfig = serde_json::from_str(&text)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        file.engine.validate()?;

        let mut store = match file.store {
            Some(store) => store,
            None => HttpStoreConfig::from_lookup(&lookup)?,
        };
        if store.bearer_token.is_none() {
            store.bearer_token = lookup("TWINSYNC_STORE_TOKEN").filter(|token| !token.is_empty());
        }
        store.validate()?;

        Ok(Self {
            engine: file.engine,
            store,
        })
    }
}
