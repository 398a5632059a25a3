//! Ordered SQL script execution
//!
//! Walks the plan's phases in order, splitting each file into statements
//! and routing them through the runner. A rejected statement aborts the
//! containing file and the whole phase sequence; seeding never runs after
//! a failed phase.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::plan::{DatabaseDeploymentPlan, Phase, PhaseScope};
use crate::runner::SqlRunner;
use crate::splitter::split_statements;
use crate::vars::TemplateVars;

/// Cache entry for one executed SQL file, keyed by absolute path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptCacheEntry {
    /// File mtime (whole seconds) at the moment it last ran successfully
    pub mtime: i64,
    /// RFC 3339 wall-clock time of that run
    pub executed_at: String,
}

/// Options narrowed from the run configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutorOptions {
    pub dry_run: bool,
    pub ignore_cache: bool,
    pub clean_install: bool,
}

/// What a run of the executor did.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    pub files_executed: usize,
    pub files_skipped: usize,
    pub databases_dropped: usize,
}

impl ExecutionReport {
    pub fn any_scripts_executed(&self) -> bool {
        self.files_executed > 0 || self.databases_dropped > 0
    }
}

/// Executes a [`DatabaseDeploymentPlan`] through a [`SqlRunner`].
pub struct SqlExecutor<'a> {
    runner: &'a dyn SqlRunner,
    options: ExecutorOptions,
    application_name: Option<String>,
    db_scripts: &'a mut BTreeMap<String, ScriptCacheEntry>,
}

impl<'a> SqlExecutor<'a> {
    pub fn new(
        runner: &'a dyn SqlRunner,
        options: ExecutorOptions,
        application_name: Option<String>,
        db_scripts: &'a mut BTreeMap<String, ScriptCacheEntry>,
    ) -> Self {
        Self {
            runner,
            options,
            application_name,
            db_scripts,
        }
    }

    /// Drop every database the plan is about to create.
    ///
    /// Clean-install only; absent databases are probed first and skipped.
    pub fn drop_databases(&mut self, plan: &DatabaseDeploymentPlan) -> Result<usize> {
        let mut dropped = 0;
        for db in &plan.databases {
            if self.options.dry_run {
                info!("[dry-run] Would drop database {}", db);
                continue;
            }
            if !self.database_exists(db)? {
                debug!("Database {} does not exist, nothing to drop", db);
                continue;
            }
            self.runner
                .execute(&format!("DROP DATABASE IF EXISTS {db}"), None)?;
            info!("Dropped database {}", db);
            dropped += 1;
        }
        Ok(dropped)
    }

    /// Whether a database already exists on the server.
    pub fn database_exists(&self, name: &str) -> Result<bool> {
        let row = self
            .runner
            .query_scalar(&format!("SHOW DATABASES LIKE '{name}'"), None)?;
        Ok(row.is_some_and(|r| r == name))
    }

    /// Execute every phase in order.
    ///
    /// The first SQL error propagates immediately; remaining phases are
    /// skipped per the run's error policy.
    pub fn run(&mut self, plan: &DatabaseDeploymentPlan) -> Result<ExecutionReport> {
        let mut report = ExecutionReport::default();

        if self.options.clean_install {
            report.databases_dropped = self.drop_databases(plan)?;
        }

        for phase in &plan.phases {
            self.run_phase(phase, &mut report)?;
        }

        Ok(report)
    }

    fn run_phase(&mut self, phase: &Phase, report: &mut ExecutionReport) -> Result<()> {
        if !phase.dir.is_dir() {
            warn!("SQL directory not found, skipping: {}", phase.dir.display());
            return Ok(());
        }

        let files = collect_sql_files(&phase.dir)?;
        if files.is_empty() {
            debug!("No SQL files in {}", phase.dir.display());
            return Ok(());
        }

        let scope_label = match &phase.scope {
            PhaseScope::Main => "main".to_string(),
            PhaseScope::Tenant { webid } => format!("tenant {webid}"),
            PhaseScope::Routed => "cross-database".to_string(),
        };
        info!(
            "Phase {} / {}: {} SQL file(s)",
            scope_label,
            phase.kind.as_str(),
            files.len()
        );

        // A phase whose database is missing runs in full, whatever the
        // cache says; its setup scripts are the ones that create it
        let force = self.phase_database_missing(phase)?;
        if force {
            info!(
                "Database {} does not exist, forcing {} scripts to run",
                phase.owner_db.as_deref().unwrap_or("?"),
                phase.kind.as_str()
            );
        }

        for file in files {
            self.run_file(phase, &file, force, report)?;
        }

        Ok(())
    }

    fn phase_database_missing(&self, phase: &Phase) -> Result<bool> {
        match &phase.owner_db {
            Some(db) if !self.options.dry_run => Ok(!self.database_exists(db)?),
            _ => Ok(false),
        }
    }

    fn run_file(
        &mut self,
        phase: &Phase,
        file: &Path,
        force: bool,
        report: &mut ExecutionReport,
    ) -> Result<()> {
        let key = file.to_string_lossy().to_string();
        let mtime = file_mtime(file)?;

        let cache_hit = self
            .db_scripts
            .get(&key)
            .is_some_and(|entry| entry.mtime == mtime);
        if cache_hit && !force && !self.options.ignore_cache && !self.options.clean_install {
            debug!("Skipping unchanged SQL file {}", file.display());
            report.files_skipped += 1;
            return Ok(());
        }

        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| key.clone());

        if self.options.dry_run {
            info!("[dry-run] Would execute {}", name);
            return Ok(());
        }

        let raw = fs::read_to_string(file).map_err(|e| Error::io(file, e))?;
        let expanded = self.phase_vars(phase).apply(&raw);

        let statements = split_statements(&expanded);
        debug!("Executing {} ({} statement(s))", name, statements.len());

        for statement in &statements {
            self.runner
                .execute(statement, phase.database.as_deref())
                .map_err(|e| match e {
                    Error::Sql { message, .. } => Error::sql(key.clone(), message),
                    other => other,
                })?;
        }

        info!("Executed {}", name);
        report.files_executed += 1;
        self.db_scripts.insert(
            key,
            ScriptCacheEntry {
                mtime,
                executed_at: chrono::Utc::now().to_rfc3339(),
            },
        );
        Ok(())
    }

    fn phase_vars(&self, phase: &Phase) -> TemplateVars {
        let vars = TemplateVars::new().set_opt(
            "APPLICATION_NAME",
            self.application_name.as_deref(),
        );
        match &phase.scope {
            PhaseScope::Tenant { webid } => vars.set("WEBID", webid),
            _ => vars,
        }
    }
}

/// All `.sql` files under a directory, recursively, sorted by full path.
fn collect_sql_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_into(dir, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_into(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            collect_into(&path, files)?;
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("sql"))
        {
            files.push(path);
        }
    }
    Ok(())
}

fn file_mtime(path: &Path) -> Result<i64> {
    let metadata = fs::metadata(path).map_err(|e| Error::io(path, e))?;
    Ok(metadata
        .modified()
        .map_err(|e| Error::io(path, e))?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0))
}
