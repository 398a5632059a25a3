//! Run orchestration
//!
//! One concrete orchestrator wires the whole run: template pass, ignore
//! matcher, endpoint drivers, pre-build gate, sync plan, file mappings,
//! database phases, permissions script, cache write. Endpoints are held
//! for the entire run and released on every exit path; the cache is
//! rewritten only when every configured phase succeeded.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use tracing::{debug, error, info, warn};

use deploy_db::{
    load_tenants, DatabaseDeploymentPlan, ExecutorOptions, SeedEngine, SqlExecutor,
    SshMysqlRunner, TenantDescriptor,
};
use deploy_endpoint::{
    FileDriver, LocalDriver, SshAuth, SshDriver, SshSession, SshSettings,
};
use deploy_fs::NormalizedPath;

use crate::cache::{CacheStore, DeployCache, FileCacheEntry};
use crate::config::{DatabaseConfig, DeployConfig, LocationConfig, LocationKind};
use crate::error::{Error, Result};
use crate::ignore::IgnoreMatcher;
use crate::sync::{build_plan, execute_plan, DestinationView, SyncOptions, SyncPlan};

/// Final numbers for the CLI's structured summary.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub transfer_failures: usize,
    pub mappings_copied: usize,
    pub scripts_executed: usize,
    pub records_seeded: usize,
    pub dry_run: bool,
}

/// Drives one deployment run from a loaded configuration.
pub struct Orchestrator {
    config: DeployConfig,
    config_path: PathBuf,
}

impl Orchestrator {
    pub fn new(config: DeployConfig, config_path: impl Into<PathBuf>) -> Self {
        Self {
            config,
            config_path: config_path.into(),
        }
    }

    /// Execute the deployment.
    ///
    /// Fatal errors (configuration, endpoint, SQL, pre-build) abort the
    /// run; per-file transfer failures are recorded and surface as a
    /// single [`Error::Transfer`] after everything else has run. The
    /// cache is written only on a fully successful non-dry run.
    pub fn run(&self) -> Result<RunSummary> {
        let options = self.config.options.clone();
        let mut summary = RunSummary {
            dry_run: options.dry_run,
            ..Default::default()
        };

        let store = CacheStore::for_config(&self.config_path);
        let (mut cache, cache_existed) = store.load();
        if options.ignore_cache {
            info!("Cache disabled (ignore_cache=true), performing full comparison");
        }

        self.run_prebuild_gate(&mut cache, options.dry_run)?;

        let source_path = self
            .config
            .source
            .path
            .as_deref()
            .ok_or_else(|| Error::config("source.path is required"))?;
        let destination_path = self
            .config
            .destination_path()
            .ok_or_else(|| Error::config("destination path is required"))?;

        info!("Opening source endpoint...");
        let (source_driver, _source_session) = open_driver(
            &self.config.source,
            source_path,
            options.max_concurrent_transfers,
        )?;
        info!("Opening destination endpoint...");
        let (destination_driver, destination_session) = open_driver(
            &self.config.destination,
            destination_path,
            options.max_concurrent_transfers,
        )?;

        if options.clean_install {
            warn!("CLEAN INSTALL: destination contents and databases will be recreated");
            self.clean_destination(destination_driver.as_ref(), options.dry_run)?;
            if !options.dry_run {
                cache = DeployCache::default();
            }
        }

        let fold_case = NormalizedPath::new(source_path).is_windows_root();
        let matcher = IgnoreMatcher::new(&self.config.ignore, fold_case)?;

        info!("Listing source files...");
        let source_records = source_driver.list()?;
        info!("Found {} file(s) in source", source_records.len());

        let must_list_destination =
            options.ignore_cache || options.clean_install || !cache_existed;
        let destination_view = if must_list_destination {
            info!("Listing destination files...");
            let records = destination_driver.list()?;
            info!("Found {} file(s) in destination", records.len());
            DestinationView::Listed(
                records
                    .into_iter()
                    .map(|r| (r.path.clone(), r))
                    .collect::<HashMap<_, _>>(),
            )
        } else {
            debug!("Destination listing skipped, trusting cache");
            DestinationView::Cached(&cache.files)
        };

        let mapping_targets: HashSet<String> = self
            .config
            .file_mappings
            .iter()
            .map(|m| m.destination.replace('\\', "/"))
            .collect();

        let plan = build_plan(
            &source_records,
            &destination_view,
            &matcher,
            options.delete_extra_files,
            &mapping_targets,
        );
        summary.creates = plan.creates.len();
        summary.updates = plan.updates.len();
        summary.deletes = plan.deletes.len();
        log_plan_summary(&plan);

        if options.dry_run {
            warn!("DRY RUN MODE - no changes will be made");
        }

        let outcome = execute_plan(
            source_driver.as_ref(),
            destination_driver.as_ref(),
            &plan,
            SyncOptions {
                dry_run: options.dry_run,
                max_concurrent_transfers: options.max_concurrent_transfers,
            },
        );
        summary.transfer_failures = outcome.failures.len();
        let mut made_changes = outcome.made_changes();

        if !options.dry_run {
            update_file_cache(&mut cache, &source_records, &matcher);
        }

        summary.mappings_copied = self.apply_file_mappings(
            source_driver.as_ref(),
            destination_driver.as_ref(),
            &mut cache,
            options.dry_run,
            options.ignore_cache,
        )?;
        made_changes |= summary.mappings_copied > 0;

        if let Some(database) = &self.config.database {
            if database.enabled {
                let (scripts, seeded) =
                    self.deploy_database(database, destination_session.clone(), &mut cache)?;
                summary.scripts_executed = scripts;
                summary.records_seeded = seeded;
                made_changes |= scripts > 0 || seeded > 0;
            } else {
                debug!("Database deployment is disabled");
            }
        }

        if made_changes {
            self.run_permissions_script(destination_driver.as_ref(), options.dry_run);
        } else {
            debug!("No changes deployed, skipping permissions script");
        }

        if !options.dry_run && outcome.failures.is_empty() {
            cache.last_deployment = Some(chrono::Utc::now().to_rfc3339());
            if let Err(e) = store.save(&cache) {
                // The deploy itself succeeded; losing the cache only costs
                // a full comparison next run
                error!("FAILED TO WRITE CACHE {}: {}", store.path(), e);
            }
        }

        if !outcome.failures.is_empty() {
            return Err(Error::Transfer {
                failed: outcome.failures.len(),
            });
        }

        info!("Deployment completed successfully");
        Ok(summary)
    }

    /// Run the configured local build command when watched inputs changed.
    ///
    /// Completes fully before the run continues; a nonzero exit aborts the
    /// run before anything touches the destination.
    fn run_prebuild_gate(&self, cache: &mut DeployCache, dry_run: bool) -> Result<()> {
        let Some(prebuild) = &self.config.prebuild else {
            return Ok(());
        };

        let mut observed: Vec<(String, i64)> = Vec::new();
        for path in &prebuild.watch_paths {
            collect_mtimes(path, &mut observed)?;
        }

        let changed = observed.is_empty()
            || observed
                .iter()
                .any(|(path, mtime)| cache.prebuild.get(path) != Some(mtime));
        if !changed {
            debug!("Pre-build inputs unchanged, skipping build command");
            return Ok(());
        }

        if dry_run {
            info!("[dry-run] Would run pre-build command: {}", prebuild.command);
            return Ok(());
        }

        info!("Running pre-build command: {}", prebuild.command);
        let status = shell_command(&prebuild.command)
            .status()
            .map_err(|e| Error::io(&prebuild.command, e))?;
        if !status.success() {
            return Err(Error::Prebuild {
                command: prebuild.command.clone(),
                code: status.code().unwrap_or(-1),
            });
        }

        cache.prebuild = observed.into_iter().collect();
        Ok(())
    }

    /// Delete every entry directly under the destination root, recursively.
    fn clean_destination(&self, destination: &dyn FileDriver, dry_run: bool) -> Result<()> {
        info!("Cleaning destination directory {}", destination.root());
        let tree = destination.list_tree()?;
        let top_level: Vec<_> = tree.iter().filter(|r| !r.path.contains('/')).collect();

        if dry_run {
            info!(
                "[dry-run] Would delete {} top-level entr(ies) from {}",
                top_level.len(),
                destination.root()
            );
            return Ok(());
        }

        for record in top_level {
            if record.is_dir {
                destination.delete_dir(&record.path)?;
            } else {
                destination.delete_file(&record.path)?;
            }
        }
        info!("Destination directory cleaned");
        Ok(())
    }

    /// Copy explicit renames after the main plan.
    ///
    /// Mappings bypass the ignore matcher and may overwrite files the plan
    /// just wrote. Absolute sources are read from the local machine, with
    /// an mtime skip through the cache; relative sources go through the
    /// source driver and are always copied.
    fn apply_file_mappings(
        &self,
        source: &dyn FileDriver,
        destination: &dyn FileDriver,
        cache: &mut DeployCache,
        dry_run: bool,
        ignore_cache: bool,
    ) -> Result<usize> {
        if self.config.file_mappings.is_empty() {
            return Ok(0);
        }

        info!(
            "Processing {} file mapping(s)",
            self.config.file_mappings.len()
        );
        let mut copied = 0;

        for mapping in &self.config.file_mappings {
            let target = mapping.destination.replace('\\', "/");
            let source_path = Path::new(&mapping.source);
            let is_absolute =
                source_path.is_absolute() || NormalizedPath::new(&mapping.source).is_windows_root();

            let result = if is_absolute {
                self.copy_absolute_mapping(
                    source_path,
                    &target,
                    destination,
                    cache,
                    dry_run,
                    ignore_cache,
                )
            } else {
                self.copy_relative_mapping(&mapping.source, &target, source, destination, dry_run)
            };

            match result {
                Ok(true) => copied += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(
                        "Error processing mapping {} -> {}: {}",
                        mapping.source, target, e
                    );
                }
            }
        }

        if copied > 0 {
            info!("Copied {} file mapping(s)", copied);
        }
        Ok(copied)
    }

    fn copy_absolute_mapping(
        &self,
        source_path: &Path,
        target: &str,
        destination: &dyn FileDriver,
        cache: &mut DeployCache,
        dry_run: bool,
        ignore_cache: bool,
    ) -> Result<bool> {
        let metadata = fs::metadata(source_path).map_err(|e| Error::io(source_path, e))?;
        let mtime = metadata
            .modified()
            .map_err(|e| Error::io(source_path, e))?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        if !ignore_cache && cache.file_mappings.get(target) == Some(&mtime) {
            debug!("Skipping unchanged mapping: {}", source_path.display());
            return Ok(false);
        }

        info!("Mapping: {} -> {}", source_path.display(), target);
        if dry_run {
            info!("[dry-run] Would copy and rename file");
            return Ok(false);
        }

        let content = fs::read(source_path).map_err(|e| Error::io(source_path, e))?;
        destination.write(target, &content)?;
        cache.file_mappings.insert(target.to_string(), mtime);
        Ok(true)
    }

    fn copy_relative_mapping(
        &self,
        source_rel: &str,
        target: &str,
        source: &dyn FileDriver,
        destination: &dyn FileDriver,
        dry_run: bool,
    ) -> Result<bool> {
        info!("Mapping: {} -> {}", source_rel, target);
        if dry_run {
            info!("[dry-run] Would copy and rename file");
            return Ok(false);
        }

        let content = source.read(source_rel)?;
        destination.write(target, &content)?;
        Ok(true)
    }

    /// Execute the database phases and the seed engine.
    fn deploy_database(
        &self,
        database: &DatabaseConfig,
        destination_session: Option<Arc<SshSession>>,
        cache: &mut DeployCache,
    ) -> Result<(usize, usize)> {
        let options = &self.config.options;
        info!("DATABASE DEPLOYMENT");

        let tenants = self.load_tenant_descriptors()?;

        let main_set = database
            .main_database
            .as_ref()
            .map(|c| c.to_script_set());
        let tenant_set = database
            .tenant_database
            .as_ref()
            .filter(|t| t.enabled)
            .map(|t| t.scripts.to_script_set());
        let routed = database
            .tenant_data_scripts
            .as_ref()
            .map(|d| d.data_path.clone());

        let plan = DatabaseDeploymentPlan::build(
            main_set.as_ref(),
            tenant_set.as_ref(),
            &tenants,
            routed.as_ref(),
            options.migration_only,
        );

        let session = self.database_session(database, destination_session)?;
        let runner = SshMysqlRunner::new(
            session,
            database.db_host.clone(),
            database.db_port,
            database.admin_username.clone().unwrap_or_default(),
            database.admin_password.clone().unwrap_or_default(),
        );

        let executor_options = ExecutorOptions {
            dry_run: options.dry_run,
            ignore_cache: options.ignore_cache,
            clean_install: options.clean_install,
        };
        let mut executor = SqlExecutor::new(
            &runner,
            executor_options,
            self.config.application_name.clone(),
            &mut cache.db_scripts,
        );
        let report = executor.run(&plan)?;
        info!(
            "Database phases complete: {} file(s) executed, {} skipped",
            report.files_executed, report.files_skipped
        );

        let mut seeded = 0;
        if !options.migration_only {
            if let Some(seed_config) = database.seed_tables.as_ref().filter(|s| s.enabled) {
                let engine = SeedEngine::new(&runner, options.dry_run);
                let seed_report = engine.seed(
                    &seed_config.tables,
                    &seed_config.config_files_path,
                    &seed_config.config_files_extension,
                    main_set.as_ref().map(|s| s.db_name.as_str()),
                    tenant_set.as_ref().map(|s| s.db_name.as_str()),
                )?;
                seeded = seed_report.records_inserted;
                if !seed_report.success() {
                    return Err(deploy_db::Error::seed(
                        "seed_tables",
                        format!("{} spec(s) failed", seed_report.specs_failed),
                    )
                    .into());
                }
            }
        }

        Ok((report.files_executed, seeded))
    }

    /// The SSH session for database work: the destination's own session
    /// when it points at the same host, otherwise a dedicated connection.
    fn database_session(
        &self,
        database: &DatabaseConfig,
        destination_session: Option<Arc<SshSession>>,
    ) -> Result<Arc<SshSession>> {
        let host = database.ssh_host.as_deref().unwrap_or_default();

        if let Some(session) = destination_session {
            if session.host() == host {
                debug!("Reusing destination SSH session for database work");
                return Ok(session);
            }
        }

        let username = database
            .ssh_username
            .as_deref()
            .or(database.admin_username.as_deref())
            .unwrap_or_default();
        let auth = match (&database.ssh_password, &database.ssh_key_file) {
            (_, Some(key_file)) => SshAuth::KeyFile {
                path: PathBuf::from(key_file),
                passphrase: database.ssh_passphrase.clone(),
            },
            (Some(password), None) => SshAuth::Password(password.clone()),
            (None, None) => {
                return Err(Error::config(
                    "database must have either ssh_password or ssh_key_file",
                ))
            }
        };
        let settings = SshSettings::new(host, database.ssh_port, username, auth);
        Ok(SshSession::connect(&settings)?)
    }

    fn load_tenant_descriptors(&self) -> Result<Vec<TenantDescriptor>> {
        match &self.config.tenants {
            Some(tenants) => {
                let loaded = load_tenants(
                    &tenants.config_files_path,
                    &tenants.config_files_extension,
                )?;
                info!("Loaded {} tenant(s)", loaded.len());
                Ok(loaded)
            }
            None => Ok(Vec::new()),
        }
    }

    /// Run the configured permissions script on an SSH destination.
    ///
    /// Failure is logged loudly but does not invalidate the deploy that
    /// already completed.
    fn run_permissions_script(&self, destination: &dyn FileDriver, dry_run: bool) {
        let Some(script) = &self.config.set_permissions_script else {
            return;
        };

        if !destination.is_remote() {
            warn!("set_permissions_script only works with SSH destinations - skipping");
            return;
        }

        let root = destination.root().as_str().to_string();
        let script_path = format!("{root}/{script}");

        if dry_run {
            info!("[dry-run] Would execute permissions script: {}", script_path);
            return;
        }

        info!("Executing permissions script: {}", script_path);
        let commands = [
            format!("sed -i 's/\\r$//' {script_path}"),
            format!("chmod +x {script_path}"),
            format!("cd {root} && bash {script_path}"),
        ];
        for command in &commands {
            match destination.exec(command) {
                Ok(output) if output.exit_code == 0 => {
                    for line in output.stdout.lines().filter(|l| !l.trim().is_empty()) {
                        info!("  {}", line);
                    }
                }
                Ok(output) => {
                    error!(
                        "Permissions script step failed with exit code {}: {}",
                        output.exit_code,
                        output.stderr.trim()
                    );
                    return;
                }
                Err(e) => {
                    error!("Permissions script step failed: {}", e);
                    return;
                }
            }
        }
        info!("Permissions script executed successfully");
    }
}

fn log_plan_summary(plan: &SyncPlan) {
    info!("SYNCHRONIZATION SUMMARY");
    info!("New files: {}", plan.creates.len());
    info!("Modified files: {}", plan.updates.len());
    info!("Files to delete: {}", plan.deletes.len());
    if !plan.destination_listed {
        debug!("(destination view from trust cache)");
    }
}

/// Rebuild the cache's file map from the post-ignore source listing.
fn update_file_cache(
    cache: &mut DeployCache,
    source_records: &[deploy_endpoint::FileRecord],
    matcher: &IgnoreMatcher,
) {
    cache.files = source_records
        .iter()
        .filter(|r| !r.is_dir && !matcher.is_ignored(&r.path))
        .map(|r| {
            (
                r.path.clone(),
                FileCacheEntry {
                    size: r.size,
                    mtime: r.mtime,
                    deployed_at: Some(chrono::Utc::now().to_rfc3339()),
                },
            )
        })
        .collect();
}

/// Build the driver for one configured endpoint.
fn open_driver(
    location: &LocationConfig,
    root_path: &str,
    channels: usize,
) -> Result<(Box<dyn FileDriver>, Option<Arc<SshSession>>)> {
    let root = NormalizedPath::new(root_path);

    match location.kind {
        LocationKind::WindowsShare => {
            let driver = LocalDriver::open(root)?;
            Ok((Box::new(driver), None))
        }
        LocationKind::Ssh => {
            let host = location
                .host
                .as_deref()
                .ok_or_else(|| Error::config("ssh endpoint needs a host"))?;
            let username = location
                .username
                .as_deref()
                .ok_or_else(|| Error::config("ssh endpoint needs a username"))?;
            let auth = match (&location.password, &location.key_file) {
                (_, Some(key_file)) => SshAuth::KeyFile {
                    path: PathBuf::from(key_file),
                    passphrase: location.passphrase.clone(),
                },
                (Some(password), None) => SshAuth::Password(password.clone()),
                (None, None) => {
                    return Err(Error::config(
                        "ssh endpoint must have either password or key_file",
                    ))
                }
            };

            let settings = SshSettings::new(host, location.port, username, auth);
            let session = SshSession::connect(&settings)?;
            let driver = SshDriver::open(Arc::clone(&session), root, channels)?;
            Ok((Box::new(driver), Some(session)))
        }
    }
}

fn collect_mtimes(path: &Path, observed: &mut Vec<(String, i64)>) -> Result<()> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        // A watched path that does not exist yet simply forces the build
        Err(_) => return Ok(()),
    };

    if metadata.is_dir() {
        for entry in fs::read_dir(path).map_err(|e| Error::io(path, e))? {
            let entry = entry.map_err(|e| Error::io(path, e))?;
            collect_mtimes(&entry.path(), observed)?;
        }
    } else {
        let mtime = metadata
            .modified()
            .map_err(|e| Error::io(path, e))?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        observed.push((path.to_string_lossy().replace('\\', "/"), mtime));
    }
    Ok(())
}

fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    }
}
