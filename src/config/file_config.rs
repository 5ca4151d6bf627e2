use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub db_path: Option<String>,
    pub git_dir: Option<String>,
    pub http_timeout_sec: Option<u64>,
    pub sqlite_timeout_sec: Option<u64>,
    pub user_agent: Option<String>,

    pub donors: Option<DonorsConfig>,
    pub archive: Option<ArchiveConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DonorsConfig {
    /// URL of the single dump file served with cache validators.
    pub che_url: Option<String>,
    /// URL of the directory listing with `registry-*.zip` files.
    pub zavod_url: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ArchiveConfig {
    pub head_ref: Option<String>,
    pub light_branch: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
