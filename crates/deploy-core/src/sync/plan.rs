//! Plan construction: listing views and diffing

use std::collections::{BTreeMap, HashMap, HashSet};

use deploy_endpoint::FileRecord;

use crate::cache::FileCacheEntry;
use crate::ignore::IgnoreMatcher;

/// The destination tree as the diff sees it: either a real listing or
/// the trust cache standing in for one.
pub enum DestinationView<'a> {
    Listed(HashMap<String, FileRecord>),
    Cached(&'a BTreeMap<String, FileCacheEntry>),
}

impl DestinationView<'_> {
    pub fn was_listed(&self) -> bool {
        matches!(self, Self::Listed(_))
    }

    fn get(&self, path: &str) -> Option<(u64, i64)> {
        match self {
            Self::Listed(map) => map.get(path).map(|r| (r.size, r.mtime)),
            Self::Cached(map) => map.get(path).map(|e| (e.size, e.mtime)),
        }
    }
}

/// Three disjoint sets of work over the source tree view.
///
/// Immutable once built. `delete_dirs` is derived from `deletes`: the
/// directories left empty once every deleted file is gone, deepest first.
#[derive(Debug, Default)]
pub struct SyncPlan {
    pub creates: Vec<FileRecord>,
    pub updates: Vec<FileRecord>,
    pub deletes: Vec<String>,
    pub delete_dirs: Vec<String>,
    /// Whether the destination was actually listed for this plan
    pub destination_listed: bool,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    pub fn transfer_count(&self) -> usize {
        self.creates.len() + self.updates.len()
    }
}

/// Diff the source listing against the destination view.
///
/// Rules, per source record `s` with destination entry `d` by path:
/// absent `d` is a create; differing size or strictly newer source mtime
/// is an update; anything else is in sync. Deletions are only inferred
/// when a real listing was performed and `delete_extra_files` is on;
/// ignored paths and file-mapping targets are never deleted.
pub fn build_plan(
    source: &[FileRecord],
    destination: &DestinationView<'_>,
    matcher: &IgnoreMatcher,
    delete_extra_files: bool,
    mapping_targets: &HashSet<String>,
) -> SyncPlan {
    let mut plan = SyncPlan {
        destination_listed: destination.was_listed(),
        ..Default::default()
    };

    let mut source_paths = HashSet::new();
    for record in source {
        if record.is_dir || matcher.is_ignored(&record.path) {
            continue;
        }
        source_paths.insert(record.path.clone());

        match destination.get(&record.path) {
            None => plan.creates.push(record.clone()),
            Some((size, mtime)) => {
                if record.size != size || record.mtime > mtime {
                    plan.updates.push(record.clone());
                }
            }
        }
    }

    if delete_extra_files {
        if let DestinationView::Listed(dest_map) = destination {
            let mut deletes: Vec<String> = dest_map
                .keys()
                .filter(|path| !source_paths.contains(*path))
                .filter(|path| !matcher.is_ignored(path))
                .filter(|path| !mapping_targets.contains(*path))
                .cloned()
                .collect();
            deletes.sort();

            plan.delete_dirs = reap_candidates(&deletes, &source_paths, dest_map);
            plan.deletes = deletes;
        }
    }

    plan
}

/// Directories that will be empty once the deletes run: every ancestor of
/// a deleted path that is ancestor to no surviving file, deepest first.
fn reap_candidates(
    deletes: &[String],
    source_paths: &HashSet<String>,
    dest_map: &HashMap<String, FileRecord>,
) -> Vec<String> {
    let delete_set: HashSet<&String> = deletes.iter().collect();

    let mut survivors: HashSet<&str> = source_paths.iter().map(String::as_str).collect();
    survivors.extend(
        dest_map
            .keys()
            .filter(|path| !delete_set.contains(*path))
            .map(String::as_str),
    );

    let mut candidates = HashSet::new();
    for path in deletes {
        let mut slice = path.as_str();
        while let Some(idx) = slice.rfind('/') {
            slice = &slice[..idx];
            candidates.insert(slice.to_string());
        }
    }

    let mut dirs: Vec<String> = candidates
        .into_iter()
        .filter(|dir| {
            let prefix = format!("{dir}/");
            !survivors.iter().any(|path| path.starts_with(&prefix))
        })
        .collect();
    // Deepest first so children go before parents
    dirs.sort_by(|a, b| {
        b.matches('/')
            .count()
            .cmp(&a.matches('/').count())
            .then_with(|| a.cmp(b))
    });
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IgnoreConfig;

    fn record(path: &str, size: u64, mtime: i64) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            full_path: format!("/root/{path}"),
            size,
            mtime,
            is_dir: false,
        }
    }

    fn no_ignore() -> IgnoreMatcher {
        IgnoreMatcher::new(&IgnoreConfig::default(), false).unwrap()
    }

    fn listed(records: &[FileRecord]) -> DestinationView<'static> {
        DestinationView::Listed(
            records
                .iter()
                .map(|r| (r.path.clone(), r.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_absent_destination_entry_is_a_create() {
        let source = vec![record("a/b.txt", 10, 1_700_000_000)];
        let plan = build_plan(
            &source,
            &listed(&[]),
            &no_ignore(),
            true,
            &HashSet::new(),
        );
        assert_eq!(plan.creates.len(), 1);
        assert!(plan.updates.is_empty());
        assert!(plan.deletes.is_empty());
    }

    #[test]
    fn test_size_change_and_newer_mtime_are_updates() {
        let source = vec![
            record("same.txt", 10, 100),
            record("bigger.txt", 12, 100),
            record("newer.txt", 10, 200),
            record("older.txt", 10, 50),
        ];
        let dest = listed(&[
            record("same.txt", 10, 100),
            record("bigger.txt", 10, 100),
            record("newer.txt", 10, 100),
            record("older.txt", 10, 100),
        ]);
        let plan = build_plan(&source, &dest, &no_ignore(), true, &HashSet::new());

        let updated: Vec<&str> = plan.updates.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(updated, vec!["bigger.txt", "newer.txt"]);
    }

    #[test]
    fn test_cached_view_never_yields_deletes() {
        let mut cached = BTreeMap::new();
        cached.insert(
            "gone.txt".to_string(),
            FileCacheEntry {
                size: 5,
                mtime: 100,
                deployed_at: None,
            },
        );
        let plan = build_plan(
            &[],
            &DestinationView::Cached(&cached),
            &no_ignore(),
            true,
            &HashSet::new(),
        );
        assert!(plan.deletes.is_empty());
        assert!(!plan.destination_listed);
    }

    #[test]
    fn test_listed_extra_file_is_deleted_unless_excluded() {
        let dest = listed(&[
            record("keep.txt", 1, 1),
            record("extra.txt", 1, 1),
            record("mapped.txt", 1, 1),
            record("junk.tmp", 1, 1),
        ]);
        let source = vec![record("keep.txt", 1, 1)];
        let matcher = IgnoreMatcher::new(
            &IgnoreConfig {
                extensions: vec![".tmp".to_string()],
                ..Default::default()
            },
            false,
        )
        .unwrap();
        let mapping_targets: HashSet<String> = ["mapped.txt".to_string()].into();

        let plan = build_plan(&source, &dest, &matcher, true, &mapping_targets);
        assert_eq!(plan.deletes, vec!["extra.txt"]);
    }

    #[test]
    fn test_ignored_source_files_never_planned() {
        let matcher = IgnoreMatcher::new(
            &IgnoreConfig {
                folders: vec!["node_modules".to_string()],
                ..Default::default()
            },
            false,
        )
        .unwrap();
        let source = vec![
            record("app.js", 1, 1),
            record("node_modules/lib/x.js", 1, 1),
        ];
        let plan = build_plan(&source, &listed(&[]), &matcher, true, &HashSet::new());
        assert_eq!(plan.creates.len(), 1);
        assert_eq!(plan.creates[0].path, "app.js");
    }

    #[test]
    fn test_delete_dirs_are_emptied_ancestors_deepest_first() {
        let dest = listed(&[
            record("old/deep/a.txt", 1, 1),
            record("old/deep/b.txt", 1, 1),
            record("old/keep/c.txt", 1, 1),
        ]);
        let source = vec![record("old/keep/c.txt", 1, 1)];
        let plan = build_plan(&source, &dest, &no_ignore(), true, &HashSet::new());

        assert_eq!(
            plan.deletes,
            vec!["old/deep/a.txt", "old/deep/b.txt"]
        );
        // old/ still holds keep/c.txt, so only old/deep is reaped
        assert_eq!(plan.delete_dirs, vec!["old/deep"]);
    }

    #[test]
    fn test_delete_extra_files_off_means_no_deletes() {
        let dest = listed(&[record("extra.txt", 1, 1)]);
        let plan = build_plan(&[], &dest, &no_ignore(), false, &HashSet::new());
        assert!(plan.deletes.is_empty());
        assert!(plan.delete_dirs.is_empty());
    }
}
