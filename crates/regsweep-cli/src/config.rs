use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regsweep_crawler::CrawlerConfig;
use regsweep_export::ExportConfig;
use serde::{Deserialize, Serialize};

/// Whole YAML configuration file. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub crawler: CrawlerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub export: ExportConfig,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let file = fs_err::File::open(path)?;
                serde_yaml::from_reader(file)
                    .with_context(|| format!("Invalid configuration in {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Holds the daily error counters and, with the file backend, checkpoints
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default = "default_checkpoints")]
    pub checkpoints: CheckpointBackend,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: default_max_connections(),
            state_dir: default_state_dir(),
            checkpoints: default_checkpoints(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_checkpoints() -> CheckpointBackend {
    CheckpointBackend::Database
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum CheckpointBackend {
    Database,
    File,
}
