//! End-to-end runs over local endpoints
//!
//! Exercises the orchestrator against real temp directories: first
//! deploys, incremental cache-trusting runs, deletions, clean installs,
//! dry runs, file mappings, and the pre-build gate.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use deploy_core::{DeployConfig, Orchestrator};

struct Fixture {
    root: TempDir,
    source: PathBuf,
    destination: PathBuf,
    config_path: PathBuf,
}

impl Fixture {
    fn new(options: &str) -> Self {
        let root = TempDir::new().unwrap();
        let source = root.path().join("source");
        let destination = root.path().join("destination");
        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&destination).unwrap();

        let config_path = root.path().join("deploy.json");
        let content = format!(
            r#"{{
                "agent_name": "ai-deploy",
                "source": {{"type": "windows_share", "path": {source:?}}},
                "destination": {{"type": "windows_share", "path": {destination:?}}}
                {options}
            }}"#,
            source = source,
            destination = destination,
        );
        fs::write(&config_path, content).unwrap();

        Self {
            root,
            source,
            destination,
            config_path,
        }
    }

    fn rewrite_options(&self, options: &str) {
        let content = format!(
            r#"{{
                "agent_name": "ai-deploy",
                "source": {{"type": "windows_share", "path": {source:?}}},
                "destination": {{"type": "windows_share", "path": {destination:?}}}
                {options}
            }}"#,
            source = self.source,
            destination = self.destination,
        );
        fs::write(&self.config_path, content).unwrap();
    }

    fn run(&self) -> deploy_core::Result<deploy_core::RunSummary> {
        let config = DeployConfig::load(&self.config_path)?;
        Orchestrator::new(config, &self.config_path).run()
    }

    fn cache_path(&self) -> PathBuf {
        self.config_path
            .parent()
            .unwrap()
            .join(".deploy_cache_deploy.json")
    }

    fn cache_json(&self) -> serde_json::Value {
        serde_json::from_str(&fs::read_to_string(self.cache_path()).unwrap()).unwrap()
    }
}

fn write(root: &Path, relative: &str, content: &[u8]) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[test]
fn test_first_deploy_copies_tree_and_writes_cache() {
    let fixture = Fixture::new("");
    write(&fixture.source, "a/b.txt", b"0123456789");
    write(&fixture.source, "index.html", b"<html></html>");

    let summary = fixture.run().unwrap();

    assert_eq!(summary.creates, 2);
    assert_eq!(summary.updates, 0);
    assert_eq!(summary.deletes, 0);
    assert_eq!(
        fs::read(fixture.destination.join("a/b.txt")).unwrap(),
        b"0123456789"
    );

    let cache = fixture.cache_json();
    assert_eq!(cache["files"]["a/b.txt"]["size"], 10);
    assert!(cache["files"]["a/b.txt"]["mtime"].as_i64().unwrap() > 0);
    assert!(cache["last_deployment"].is_string());
}

#[test]
fn test_incremental_run_trusts_cache_over_destination() {
    let fixture = Fixture::new("");
    write(&fixture.source, "a/b.txt", b"payload");
    fixture.run().unwrap();

    // Remove the file behind the engine's back; the cache still vouches
    // for it, so the incremental run plans nothing
    fs::remove_file(fixture.destination.join("a/b.txt")).unwrap();

    let first_stamp = fixture.cache_json()["last_deployment"]
        .as_str()
        .unwrap()
        .to_string();
    let summary = fixture.run().unwrap();

    assert_eq!(summary.creates, 0);
    assert_eq!(summary.updates, 0);
    assert_eq!(summary.deletes, 0);
    assert!(!fixture.destination.join("a/b.txt").exists());

    // The successful no-op still advances the deployment stamp
    let second_stamp = fixture.cache_json()["last_deployment"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(second_stamp >= first_stamp);
}

#[test]
fn test_changed_size_is_an_update_without_destination_listing() {
    let fixture = Fixture::new("");
    write(&fixture.source, "a/b.txt", b"0123456789");
    fixture.run().unwrap();

    write(&fixture.source, "a/b.txt", b"012345678901");
    let summary = fixture.run().unwrap();

    assert_eq!(summary.creates, 0);
    assert_eq!(summary.updates, 1);
    assert_eq!(
        fs::read(fixture.destination.join("a/b.txt")).unwrap(),
        b"012345678901"
    );
    let cache = fixture.cache_json();
    assert_eq!(cache["files"]["a/b.txt"]["size"], 12);
}

#[test]
fn test_deletes_only_happen_when_destination_is_listed() {
    let fixture = Fixture::new("");
    write(&fixture.source, "keep.txt", b"k");
    fixture.run().unwrap();

    // Extra file appears on the destination only
    write(&fixture.destination, "extra.txt", b"e");

    // Cache-trusting run: no listing, so no deletes
    let summary = fixture.run().unwrap();
    assert_eq!(summary.deletes, 0);
    assert!(fixture.destination.join("extra.txt").exists());

    // Full-comparison run sees and removes it
    fixture.rewrite_options(r#", "options": {"ignore_cache": true}"#);
    let summary = fixture.run().unwrap();
    assert_eq!(summary.deletes, 1);
    assert!(!fixture.destination.join("extra.txt").exists());
}

#[test]
fn test_ignored_paths_never_sync_or_delete() {
    let fixture = Fixture::new(
        r#", "ignore": {"folders": ["node_modules"], "extensions": [".log"]},
            "options": {"ignore_cache": true}"#,
    );
    write(&fixture.source, "app.js", b"app");
    write(&fixture.source, "node_modules/lib/x.js", b"x");
    write(&fixture.source, "debug.log", b"d");
    write(&fixture.destination, "old.log", b"o");

    let summary = fixture.run().unwrap();

    assert_eq!(summary.creates, 1);
    assert!(fixture.destination.join("app.js").exists());
    assert!(!fixture.destination.join("node_modules").exists());
    assert!(!fixture.destination.join("debug.log").exists());
    // Ignored destination files are not deleted either
    assert!(fixture.destination.join("old.log").exists());
}

#[test]
fn test_dry_run_plans_but_touches_nothing() {
    let fixture = Fixture::new(r#", "options": {"dry_run": true}"#);
    write(&fixture.source, "a.txt", b"a");
    write(&fixture.destination, "extra.txt", b"e");

    let summary = fixture.run().unwrap();

    assert!(summary.dry_run);
    assert_eq!(summary.creates, 1);
    assert!(!fixture.destination.join("a.txt").exists());
    assert!(fixture.destination.join("extra.txt").exists());
    // No cache is written on a dry run
    assert!(!fixture.cache_path().exists());
}

#[test]
fn test_clean_install_wipes_destination_first() {
    let fixture = Fixture::new(r#", "options": {"clean_install": true}"#);
    write(&fixture.source, "new.txt", b"n");
    write(&fixture.destination, "stale/deep/old.txt", b"o");
    write(&fixture.destination, "stale_top.txt", b"o");

    let summary = fixture.run().unwrap();

    assert_eq!(summary.creates, 1);
    assert!(fixture.destination.join("new.txt").exists());
    assert!(!fixture.destination.join("stale").exists());
    assert!(!fixture.destination.join("stale_top.txt").exists());
}

#[test]
fn test_file_mapping_copies_and_skips_unchanged() {
    let fixture = Fixture::new("");
    let env_file = fixture.root.path().join("config.staging.json");
    fs::write(&env_file, b"{\"env\": \"staging\"}").unwrap();

    fixture.rewrite_options(&format!(
        r#", "file_mappings": [{{"source": {env_file:?}, "destination": "config/app.json"}}]"#
    ));

    let summary = fixture.run().unwrap();
    assert_eq!(summary.mappings_copied, 1);
    assert_eq!(
        fs::read(fixture.destination.join("config/app.json")).unwrap(),
        b"{\"env\": \"staging\"}"
    );

    // Unchanged mapping source is skipped on the next run
    let summary = fixture.run().unwrap();
    assert_eq!(summary.mappings_copied, 0);
}

#[test]
fn test_mapping_target_not_deleted_as_extra_file() {
    let fixture = Fixture::new("");
    let env_file = fixture.root.path().join("settings.json");
    fs::write(&env_file, b"{}").unwrap();
    fixture.rewrite_options(&format!(
        r#", "options": {{"ignore_cache": true}},
            "file_mappings": [{{"source": {env_file:?}, "destination": "settings.json"}}]"#
    ));
    write(&fixture.source, "app.txt", b"a");

    fixture.run().unwrap();
    assert!(fixture.destination.join("settings.json").exists());

    // The rename target survives the full-comparison deletion pass
    let summary = fixture.run().unwrap();
    assert_eq!(summary.deletes, 0);
    assert!(fixture.destination.join("settings.json").exists());
}

#[test]
fn test_prebuild_gate_runs_once_per_input_change() {
    let fixture = Fixture::new("");
    write(&fixture.source, "main.c", b"int main(){}");
    let marker = fixture.root.path().join("built.marker");
    let watch = fixture.source.join("main.c");

    fixture.rewrite_options(&format!(
        r#", "prebuild": {{"command": "echo built >> {marker}", "watch_paths": [{watch:?}]}}"#,
        marker = marker.display(),
    ));

    fixture.run().unwrap();
    assert!(marker.exists());
    let first = fs::read_to_string(&marker).unwrap();

    // Unchanged inputs: the command does not run again
    fixture.run().unwrap();
    let second = fs::read_to_string(&marker).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_failing_prebuild_aborts_before_any_transfer() {
    let fixture = Fixture::new(
        r#", "prebuild": {"command": "exit 3", "watch_paths": []}"#,
    );
    write(&fixture.source, "a.txt", b"a");

    let result = fixture.run();

    assert!(matches!(
        result,
        Err(deploy_core::Error::Prebuild { code: 3, .. })
    ));
    assert!(!fixture.destination.join("a.txt").exists());
    assert!(!fixture.cache_path().exists());
}

#[test]
fn test_sync_idempotence_under_ignore_cache() {
    let fixture = Fixture::new(r#", "options": {"ignore_cache": true}"#);
    write(&fixture.source, "a/b.txt", b"stable");
    let summary = fixture.run().unwrap();
    assert_eq!(summary.creates, 1);

    // Second full comparison finds size equal and destination no older
    let summary = fixture.run().unwrap();
    assert_eq!(summary.creates, 0);
    assert_eq!(summary.updates, 0);
    assert_eq!(summary.deletes, 0);
}
