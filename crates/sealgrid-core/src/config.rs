//! sealgrid.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::resources::WorkerResources;
use crate::types::{StorageId, StorageInfo};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub remote: RemoteConfig,
    pub worker: Option<WorkerConfig>,
    #[serde(default)]
    pub storage: Vec<StorageConfig>,
}

/// Settings for talking to remote storage nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Headers attached to every outbound request (authentication).
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Root under which `MoveCache` relocates sector files.
    pub cache_root: Option<PathBuf>,
    /// Per-request deadline, e.g. "30s" or "5m".
    pub request_timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub gpus: Vec<String>,
    pub gpu_slots: Option<u64>,
    pub mem_reserved: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub id: String,
    pub path: PathBuf,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub weight: u64,
    #[serde(default)]
    pub can_seal: bool,
    #[serde(default)]
    pub can_store: bool,
}

impl NodeConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: NodeConfig = toml::from_str(content)?;
        config.remote.request_timeout()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

impl RemoteConfig {
    /// Parsed `request_timeout`, if configured.
    pub fn request_timeout(&self) -> anyhow::Result<Option<Duration>> {
        match &self.request_timeout {
            None => Ok(None),
            Some(raw) => parse_duration(raw)
                .map(Some)
                .ok_or_else(|| anyhow::anyhow!("invalid request_timeout: {raw:?}")),
        }
    }
}

impl WorkerConfig {
    /// Probe the host and overlay the configured GPU and reservation settings.
    pub fn resources(&self) -> WorkerResources {
        let mut wr = WorkerResources::probe(self.mem_reserved.unwrap_or(0));
        wr.gpus = self.gpus.clone();
        if let Some(slots) = self.gpu_slots {
            wr.gpu_slots = slots;
        }
        wr
    }
}

impl StorageConfig {
    pub fn info(&self) -> StorageInfo {
        StorageInfo {
            id: StorageId::new(self.id.clone()),
            urls: self.urls.clone(),
            weight: self.weight,
            can_seal: self.can_seal,
            can_store: self.can_store,
        }
    }
}

/// Parse a duration string like "5s", "500ms", "2m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
