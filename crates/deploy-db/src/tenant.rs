//! Tenant discovery
//!
//! Each JSON file under the tenant configuration directory describes one
//! tenant; its required top-level `webid` string is the tenant's identity
//! and parameterizes per-tenant SQL through `{{WEBID}}`.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};

/// One tenant derived from its configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantDescriptor {
    /// Identity used in `{{WEBID}}` substitution
    pub webid: String,
    /// The JSON file this tenant came from
    pub source_file: PathBuf,
}

/// Load tenants from a directory, in sorted-filename order.
///
/// Files that fail to parse or lack `webid` abort loading; per-tenant SQL
/// against an unknown identity is never worth guessing at.
pub fn load_tenants(dir: &Path, extension: &str) -> Result<Vec<TenantDescriptor>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| Error::io(dir, e))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(extension))
        })
        .collect();
    files.sort();

    let mut tenants = Vec::with_capacity(files.len());
    for file in files {
        let content = fs::read_to_string(&file).map_err(|e| Error::io(&file, e))?;
        let value: Value = serde_json::from_str(&content).map_err(|e| Error::Json {
            file: file.clone(),
            source: e,
        })?;

        let webid = value
            .get("webid")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::MissingWebid { file: file.clone() })?
            .to_string();

        debug!("Loaded tenant {} from {}", webid, file.display());
        tenants.push(TenantDescriptor {
            webid,
            source_file: file,
        });
    }

    Ok(tenants)
}
