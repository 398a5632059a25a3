//! Persistent trust cache
//!
//! A keyed JSON document beside the configuration file. The cache is the
//! engine's authority for skipping destination listing on incremental
//! runs, so it is only rewritten after every configured phase succeeds,
//! atomically; a partial failure leaves the previous cache intact.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use deploy_db::ScriptCacheEntry;
use deploy_fs::{io as fsio, NormalizedPath};

use crate::error::Result;

/// Cached metadata for one deployed file, keyed by relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCacheEntry {
    pub size: u64,
    pub mtime: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<String>,
}

/// The whole cache document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployCache {
    /// Relative path -> metadata observed at the last successful deploy
    #[serde(default)]
    pub files: BTreeMap<String, FileCacheEntry>,
    /// Wall-clock timestamp of the previous successful run
    #[serde(default)]
    pub last_deployment: Option<String>,
    /// Absolute SQL path -> mtime at last successful execution
    #[serde(default)]
    pub db_scripts: BTreeMap<String, ScriptCacheEntry>,
    /// Rename target -> source mtime at last copy
    #[serde(default)]
    pub file_mappings: BTreeMap<String, i64>,
    /// Watched pre-build source path -> mtime at last successful build
    #[serde(default)]
    pub prebuild: BTreeMap<String, i64>,
}

/// Loads and atomically persists the cache document.
pub struct CacheStore {
    path: NormalizedPath,
}

impl CacheStore {
    /// The cache lives beside the configuration file, named after its
    /// stem: `.deploy_cache_<config-stem>.json`.
    pub fn for_config(config_path: &Path) -> Self {
        let stem = config_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "config".to_string());
        let file_name = format!(".deploy_cache_{stem}.json");
        let path = match config_path.parent() {
            Some(parent) if parent != Path::new("") => {
                NormalizedPath::new(parent.join(file_name))
            }
            _ => NormalizedPath::new(file_name),
        };
        Self { path }
    }

    pub fn path(&self) -> &NormalizedPath {
        &self.path
    }

    /// Load the cache; a missing or unreadable file is an empty cache and
    /// forces a full comparison on this run.
    pub fn load(&self) -> (DeployCache, bool) {
        if !self.path.exists() {
            debug!("No cache file at {}, treating as first deployment", self.path);
            return (DeployCache::default(), false);
        }

        match fsio::read_text(&self.path)
            .map_err(|e| e.to_string())
            .and_then(|content| {
                serde_json::from_str::<DeployCache>(&content).map_err(|e| e.to_string())
            }) {
            Ok(cache) => {
                debug!("Loaded cache from {}", self.path);
                (cache, true)
            }
            Err(e) => {
                warn!(
                    "Failed to load cache from {}: {}; treating as first deployment",
                    self.path, e
                );
                (DeployCache::default(), false)
            }
        }
    }

    /// Serialize to a temp sibling and rename over the real cache file.
    pub fn save(&self, cache: &DeployCache) -> Result<()> {
        let content = serde_json::to_vec_pretty(cache)?;
        fsio::write_atomic(&self.path, &content)?;
        debug!("Saved cache to {}", self.path);
        Ok(())
    }
}
