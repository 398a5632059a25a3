//! Deployment configuration model
//!
//! One JSON document describes both halves of a run: file topology
//! (source, destination, ignore rules, renames) and database topology
//! (main database, per-tenant databases, data scripts, seed tables).
//! The document is parsed to a JSON tree first so the template pass can
//! expand `{{APPLICATION_NAME}}` before typed deserialization.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use deploy_db::{ScriptSet, SeedTableSpec};

use crate::error::{Error, Result};
use crate::template;

/// The agent name this engine answers to.
pub const AGENT_NAME: &str = "ai-deploy";

fn default_true() -> bool {
    true
}

fn default_ssh_port() -> u16 {
    22
}

fn default_db_host() -> String {
    "127.0.0.1".to_string()
}

fn default_db_port() -> u16 {
    3306
}

fn default_max_transfers() -> usize {
    20
}

fn default_json_extension() -> String {
    ".json".to_string()
}

/// Transport of a source or destination endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationKind {
    WindowsShare,
    Ssh,
}

/// One endpoint location from the configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
    #[serde(rename = "type")]
    pub kind: LocationKind,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub key_file: Option<String>,
    #[serde(default)]
    pub passphrase: Option<String>,
}

/// Three-tier ignore rules.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IgnoreConfig {
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub folders: Vec<String>,
    #[serde(default)]
    pub extensions: Vec<String>,
}

/// Run options with their documented defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct OptionsConfig {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_true")]
    pub delete_extra_files: bool,
    #[serde(default = "default_true")]
    pub verbose: bool,
    #[serde(default)]
    pub ignore_cache: bool,
    #[serde(default)]
    pub clean_install: bool,
    #[serde(default)]
    pub migration_only: bool,
    #[serde(default = "default_max_transfers")]
    pub max_concurrent_transfers: usize,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            delete_extra_files: true,
            verbose: true,
            ignore_cache: false,
            clean_install: false,
            migration_only: false,
            max_concurrent_transfers: default_max_transfers(),
        }
    }
}

/// Confirmation gate owned by the CLI layer; carried through untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WarnConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// Destination website settings; `path` overrides `destination.path`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebsiteConfig {
    #[serde(default)]
    pub path: Option<String>,
}

/// One explicit rename: copy `source` to `destination` after the plan.
#[derive(Debug, Clone, Deserialize)]
pub struct FileMapping {
    /// Absolute local path, or a path relative to the source root.
    /// Absolute sources are always read from the local machine, whatever
    /// transport the source endpoint uses.
    pub source: String,
    /// Destination-relative target
    pub destination: String,
}

/// Optional local build step gating the run.
#[derive(Debug, Clone, Deserialize)]
pub struct PrebuildConfig {
    /// Shell command run locally before anything touches the destination
    pub command: String,
    /// Paths whose mtimes decide whether the command needs to run
    #[serde(default)]
    pub watch_paths: Vec<PathBuf>,
}

/// Tenant configuration directory.
#[derive(Debug, Clone, Deserialize)]
pub struct TenantsConfig {
    pub config_files_path: PathBuf,
    #[serde(default = "default_json_extension")]
    pub config_files_extension: String,
}

/// Directories of SQL scripts for one database.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptSetConfig {
    #[serde(default)]
    pub db_name: String,
    #[serde(default)]
    pub setup_path: Option<PathBuf>,
    #[serde(default)]
    pub tables_path: Option<PathBuf>,
    #[serde(default)]
    pub procedures_path: Option<PathBuf>,
    #[serde(default)]
    pub data_path: Option<PathBuf>,
    #[serde(default)]
    pub migration_path: Option<PathBuf>,
}

impl ScriptSetConfig {
    pub fn to_script_set(&self) -> ScriptSet {
        ScriptSet {
            db_name: self.db_name.clone(),
            setup_path: self.setup_path.clone(),
            tables_path: self.tables_path.clone(),
            procedures_path: self.procedures_path.clone(),
            data_path: self.data_path.clone(),
            migration_path: self.migration_path.clone(),
        }
    }
}

/// Per-tenant database template; `db_name` and paths may carry `{{WEBID}}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TenantDatabaseConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(flatten)]
    pub scripts: ScriptSetConfig,
}

/// One-shot cross-database data scripts.
#[derive(Debug, Clone, Deserialize)]
pub struct TenantDataScriptsConfig {
    pub data_path: PathBuf,
}

/// Template-driven table seeding from JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedTablesConfig {
    #[serde(default)]
    pub enabled: bool,
    pub config_files_path: PathBuf,
    #[serde(default = "default_json_extension")]
    pub config_files_extension: String,
    #[serde(default)]
    pub tables: Vec<SeedTableSpec>,
}

/// Database half of the configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub ssh_host: Option<String>,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    #[serde(default)]
    pub ssh_username: Option<String>,
    #[serde(default)]
    pub ssh_password: Option<String>,
    #[serde(default)]
    pub ssh_key_file: Option<String>,
    #[serde(default)]
    pub ssh_passphrase: Option<String>,
    #[serde(default = "default_db_host")]
    pub db_host: String,
    #[serde(default = "default_db_port")]
    pub db_port: u16,
    #[serde(default)]
    pub admin_username: Option<String>,
    #[serde(default)]
    pub admin_password: Option<String>,
    #[serde(default)]
    pub main_database: Option<ScriptSetConfig>,
    #[serde(default)]
    pub tenant_database: Option<TenantDatabaseConfig>,
    #[serde(default)]
    pub tenant_data_scripts: Option<TenantDataScriptsConfig>,
    #[serde(default)]
    pub seed_tables: Option<SeedTablesConfig>,
}

/// The whole deployment document.
#[derive(Debug, Clone, Deserialize)]
pub struct DeployConfig {
    pub agent_name: String,
    #[serde(default)]
    pub application_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub warn: Option<WarnConfig>,
    pub source: LocationConfig,
    pub destination: LocationConfig,
    #[serde(default)]
    pub ignore: IgnoreConfig,
    #[serde(default)]
    pub options: OptionsConfig,
    #[serde(default)]
    pub website: Option<WebsiteConfig>,
    #[serde(default)]
    pub file_mappings: Vec<FileMapping>,
    #[serde(default)]
    pub set_permissions_script: Option<String>,
    #[serde(default)]
    pub prebuild: Option<PrebuildConfig>,
    #[serde(default)]
    pub tenants: Option<TenantsConfig>,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
}

impl DeployConfig {
    /// Load a configuration file: parse, expand `{{APPLICATION_NAME}}`,
    /// deserialize, validate.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::parse(&content)
    }

    /// Parse configuration JSON text.
    pub fn parse(content: &str) -> Result<Self> {
        let mut value: serde_json::Value = serde_json::from_str(content)?;
        template::expand_application_name(&mut value);
        let config: DeployConfig = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// The destination root: `website.path` wins over `destination.path`.
    pub fn destination_path(&self) -> Option<&str> {
        self.website
            .as_ref()
            .and_then(|w| w.path.as_deref())
            .or(self.destination.path.as_deref())
    }

    fn validate(&self) -> Result<()> {
        if self.agent_name != AGENT_NAME {
            return Err(Error::config(format!(
                "agent_name must be {AGENT_NAME:?}, got {:?}",
                self.agent_name
            )));
        }

        if self.source.path.as_deref().unwrap_or("").is_empty() {
            return Err(Error::config("source.path is required"));
        }
        if self.destination_path().unwrap_or("").is_empty() {
            return Err(Error::config(
                "destination.path (or website.path) is required",
            ));
        }

        validate_location(&self.source, "source")?;
        validate_location(&self.destination, "destination")?;

        if self.options.max_concurrent_transfers == 0 {
            return Err(Error::config(
                "options.max_concurrent_transfers must be greater than 0",
            ));
        }
        if self.options.migration_only && self.options.clean_install {
            return Err(Error::config(
                "options.migration_only and options.clean_install are mutually exclusive",
            ));
        }

        if let Some(database) = &self.database {
            if database.enabled {
                validate_database(database)?;
            }
        }

        Ok(())
    }
}

fn validate_location(location: &LocationConfig, name: &str) -> Result<()> {
    if location.kind == LocationKind::Ssh {
        if location.host.as_deref().unwrap_or("").is_empty() {
            return Err(Error::config(format!("{name}.host is required for ssh")));
        }
        if location.username.as_deref().unwrap_or("").is_empty() {
            return Err(Error::config(format!(
                "{name}.username is required for ssh"
            )));
        }
        if location.password.is_none() && location.key_file.is_none() {
            return Err(Error::config(format!(
                "{name} must have either password or key_file"
            )));
        }
    }
    Ok(())
}

fn validate_database(database: &DatabaseConfig) -> Result<()> {
    if database.ssh_host.as_deref().unwrap_or("").is_empty() {
        return Err(Error::config("database.ssh_host is required when enabled"));
    }
    if database.admin_username.is_none() || database.admin_password.is_none() {
        return Err(Error::config(
            "database.admin_username and admin_password are required when enabled",
        ));
    }
    if database.ssh_password.is_none() && database.ssh_key_file.is_none() {
        return Err(Error::config(
            "database must have either ssh_password or ssh_key_file",
        ));
    }

    if let Some(main) = &database.main_database {
        if main.db_name.is_empty() {
            return Err(Error::config("database.main_database.db_name is required"));
        }
    }

    if let Some(tenant_db) = &database.tenant_database {
        if tenant_db.enabled && tenant_db.scripts.db_name.is_empty() {
            return Err(Error::config(
                "database.tenant_database.db_name is required when enabled",
            ));
        }
    }

    if let Some(seed) = &database.seed_tables {
        if seed.enabled {
            if seed.tables.is_empty() {
                return Err(Error::config(
                    "database.seed_tables.tables cannot be empty when enabled",
                ));
            }
            for (idx, table) in seed.tables.iter().enumerate() {
                if table.table_name.is_empty() {
                    return Err(Error::config(format!(
                        "database.seed_tables.tables[{idx}].table_name is required"
                    )));
                }
                if table.begin_mark.is_empty() || table.end_mark.is_empty() {
                    return Err(Error::config(format!(
                        "database.seed_tables.tables[{idx}] needs begin_mark and end_mark"
                    )));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config(extra: &str) -> String {
        format!(
            r#"{{
                "agent_name": "ai-deploy",
                "source": {{"type": "windows_share", "path": "/src"}},
                "destination": {{"type": "ssh", "path": "/dst", "host": "h", "username": "u", "password": "p"}}
                {extra}
            }}"#
        )
    }

    #[test]
    fn test_minimal_config_parses_with_defaults() {
        let config = DeployConfig::parse(&minimal_config("")).unwrap();
        assert_eq!(config.options.max_concurrent_transfers, 20);
        assert!(config.options.delete_extra_files);
        assert!(config.options.verbose);
        assert!(!config.options.ignore_cache);
        assert_eq!(config.destination.port, 22);
    }

    #[test]
    fn test_wrong_agent_name_rejected() {
        let content = minimal_config("").replace("ai-deploy", "other-agent");
        assert!(matches!(
            DeployConfig::parse(&content),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn test_ssh_without_credentials_rejected() {
        let content = r#"{
            "agent_name": "ai-deploy",
            "source": {"type": "windows_share", "path": "/src"},
            "destination": {"type": "ssh", "path": "/dst", "host": "h", "username": "u"}
        }"#;
        assert!(matches!(
            DeployConfig::parse(content),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn test_migration_only_plus_clean_install_rejected() {
        let content = minimal_config(
            r#", "options": {"migration_only": true, "clean_install": true}"#,
        );
        assert!(matches!(
            DeployConfig::parse(&content),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn test_website_path_overrides_destination() {
        let content = minimal_config(r#", "website": {"path": "/var/www/site"}"#);
        let config = DeployConfig::parse(&content).unwrap();
        assert_eq!(config.destination_path(), Some("/var/www/site"));
    }

    #[test]
    fn test_application_name_expands_in_paths() {
        let content = r#"{
            "agent_name": "ai-deploy",
            "application_name": "acme",
            "source": {"type": "windows_share", "path": "/builds/{{APPLICATION_NAME}}"},
            "destination": {"type": "ssh", "path": "/srv/{{APPLICATION_NAME}}", "host": "h", "username": "u", "password": "p"},
            "database": {
                "enabled": true,
                "ssh_host": "h",
                "ssh_password": "p",
                "admin_username": "root",
                "admin_password": "r",
                "main_database": {"db_name": "{{APPLICATION_NAME}}"}
            }
        }"#;
        let config = DeployConfig::parse(content).unwrap();
        assert_eq!(config.source.path.as_deref(), Some("/builds/acme"));
        assert_eq!(config.destination.path.as_deref(), Some("/srv/acme"));
        assert_eq!(
            config.database.unwrap().main_database.unwrap().db_name,
            "acme"
        );
    }

    #[test]
    fn test_seed_tables_deserialize() {
        let content = minimal_config(
            r#", "database": {
                "enabled": true,
                "ssh_host": "h",
                "ssh_password": "p",
                "admin_username": "root",
                "admin_password": "r",
                "seed_tables": {
                    "enabled": true,
                    "config_files_path": "/seeds",
                    "tables": [{
                        "table_name": "settings",
                        "database": "tenant",
                        "table_script_file": "/sql/settings.sql",
                        "begin_mark": "BEGIN AI-AGENT.AI-DEPLOY:",
                        "end_mark": "END AI-AGENT.AI-DEPLOY:",
                        "variables": [
                            {"sql_var": "{{WEBID}}", "json_field": "webid"},
                            {"sql_var": "{{NAME}}", "json_field": "name", "default_value": "unnamed"}
                        ]
                    }]
                }
            }"#,
        );
        let config = DeployConfig::parse(&content).unwrap();
        let seed = config.database.unwrap().seed_tables.unwrap();
        assert_eq!(seed.tables.len(), 1);
        assert_eq!(seed.tables[0].variables[1].default_value, Some("unnamed".into()));
        assert_eq!(seed.config_files_extension, ".json");
    }

    #[test]
    fn test_empty_seed_tables_rejected_when_enabled() {
        let content = minimal_config(
            r#", "database": {
                "enabled": true,
                "ssh_host": "h",
                "ssh_password": "p",
                "admin_username": "root",
                "admin_password": "r",
                "seed_tables": {"enabled": true, "config_files_path": "/seeds", "tables": []}
            }"#,
        );
        assert!(matches!(
            DeployConfig::parse(&content),
            Err(Error::Config { .. })
        ));
    }
}
