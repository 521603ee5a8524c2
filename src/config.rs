use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use tinypcm_engine::{PcmConfig, SessionOptions};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub card: u32,
    pub device: u32,
    pub playback: PcmConfig,
    pub capture: PcmConfig,
    pub session: SessionOptions,
}

impl Config {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config '{}'", path.display()))?;
        toml::from_str(&text).with_context(|| format!("invalid config '{}'", path.display()))
    }
}
