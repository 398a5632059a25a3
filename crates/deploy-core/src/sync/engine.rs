//! Plan execution through a bounded worker pool

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::Mutex;

use tracing::{error, info};

use deploy_endpoint::{with_retry, FileDriver, FileRecord};

use super::plan::SyncPlan;

/// Execution knobs narrowed from the run options.
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub max_concurrent_transfers: usize,
}

/// What the execution actually did.
#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub transferred: usize,
    pub deleted: usize,
    /// Per-path transfer failures recorded after retries; the run
    /// continues past them but finishes nonzero
    pub failures: Vec<(String, String)>,
}

impl SyncOutcome {
    pub fn made_changes(&self) -> bool {
        self.transferred > 0 || self.deleted > 0
    }
}

/// Execute a plan: creates and updates through the worker pool, then
/// deletes single-threaded, files before directories.
///
/// Worker count follows `max_concurrent_transfers` when at least one
/// endpoint is remote; purely local syncs run on a single worker since
/// local I/O is not the bottleneck.
pub fn execute_plan(
    source: &dyn FileDriver,
    destination: &dyn FileDriver,
    plan: &SyncPlan,
    options: SyncOptions,
) -> SyncOutcome {
    let mut outcome = SyncOutcome::default();

    if options.dry_run {
        for record in &plan.creates {
            info!("[dry-run] Would copy: {}", record.path);
        }
        for record in &plan.updates {
            info!("[dry-run] Would update: {}", record.path);
        }
        for path in &plan.deletes {
            info!("[dry-run] Would delete: {}", path);
        }
        for dir in &plan.delete_dirs {
            info!("[dry-run] Would remove empty directory: {}", dir);
        }
        return outcome;
    }

    let workers = if source.is_remote() || destination.is_remote() {
        options.max_concurrent_transfers.max(1)
    } else {
        1
    };

    let jobs: Mutex<VecDeque<&FileRecord>> =
        Mutex::new(plan.creates.iter().chain(plan.updates.iter()).collect());
    let total = plan.transfer_count();
    let (tx, rx) = mpsc::channel::<(String, Option<String>)>();

    std::thread::scope(|scope| {
        for _ in 0..workers.min(total.max(1)) {
            let tx = tx.clone();
            let jobs = &jobs;
            scope.spawn(move || loop {
                let record = match jobs.lock().expect("job queue poisoned").pop_front() {
                    Some(record) => record,
                    None => break,
                };
                let result = transfer(source, destination, record);
                let report = match result {
                    Ok(()) => (record.path.clone(), None),
                    Err(e) => (record.path.clone(), Some(e.to_string())),
                };
                if tx.send(report).is_err() {
                    break;
                }
            });
        }
        drop(tx);

        let mut done = 0;
        while let Ok((path, failure)) = rx.recv() {
            done += 1;
            match failure {
                None => {
                    info!("  [{}/{}] Transferred: {}", done, total, path);
                    outcome.transferred += 1;
                }
                Some(message) => {
                    error!("  [{}/{}] Error transferring {}: {}", done, total, path, message);
                    outcome.failures.push((path, message));
                }
            }
        }
    });

    // All writes have drained; deletes run after them, single-threaded
    for path in &plan.deletes {
        match with_retry("delete", || destination.delete_file(path)) {
            Ok(()) => {
                info!("  Deleted: {}", path);
                outcome.deleted += 1;
            }
            Err(e) => {
                error!("  Error deleting {}: {}", path, e);
                outcome.failures.push((path.clone(), e.to_string()));
            }
        }
    }
    for dir in &plan.delete_dirs {
        if let Err(e) = destination.delete_dir(dir) {
            error!("  Error removing directory {}: {}", dir, e);
        }
    }

    outcome
}

fn transfer(
    source: &dyn FileDriver,
    destination: &dyn FileDriver,
    record: &FileRecord,
) -> deploy_endpoint::Result<()> {
    with_retry(&record.path, || {
        source.with_reader(&record.path, &mut |reader| {
            destination.write_stream(&record.path, reader)?;
            Ok(())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IgnoreConfig;
    use crate::ignore::IgnoreMatcher;
    use crate::sync::plan::{build_plan, DestinationView};
    use deploy_endpoint::LocalDriver;
    use deploy_fs::NormalizedPath;
    use std::collections::{HashMap, HashSet};
    use std::fs;
    use tempfile::TempDir;

    fn local_pair() -> (TempDir, TempDir, LocalDriver, LocalDriver) {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let src_driver = LocalDriver::open(NormalizedPath::new(src.path())).unwrap();
        let dst_driver = LocalDriver::open(NormalizedPath::new(dst.path())).unwrap();
        (src, dst, src_driver, dst_driver)
    }

    fn plan_between(
        src_driver: &LocalDriver,
        dst_driver: &LocalDriver,
        delete_extra: bool,
    ) -> SyncPlan {
        let matcher = IgnoreMatcher::new(&IgnoreConfig::default(), false).unwrap();
        let source = src_driver.list().unwrap();
        let dest: HashMap<_, _> = dst_driver
            .list()
            .unwrap()
            .into_iter()
            .map(|r| (r.path.clone(), r))
            .collect();
        build_plan(
            &source,
            &DestinationView::Listed(dest),
            &matcher,
            delete_extra,
            &HashSet::new(),
        )
    }

    #[test]
    fn test_execute_copies_nested_files() {
        let (src, _dst, src_driver, dst_driver) = local_pair();
        fs::create_dir_all(src.path().join("a/b")).unwrap();
        fs::write(src.path().join("a/b/c.txt"), b"payload").unwrap();
        fs::write(src.path().join("top.txt"), b"top").unwrap();

        let plan = plan_between(&src_driver, &dst_driver, true);
        assert_eq!(plan.creates.len(), 2);

        let outcome = execute_plan(
            &src_driver,
            &dst_driver,
            &plan,
            SyncOptions {
                dry_run: false,
                max_concurrent_transfers: 4,
            },
        );

        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.transferred, 2);
        assert_eq!(dst_driver.read("a/b/c.txt").unwrap(), b"payload");
    }

    #[test]
    fn test_deletes_run_and_empty_dirs_reaped() {
        let (_src, dst, src_driver, dst_driver) = local_pair();
        fs::create_dir_all(dst.path().join("stale/deep")).unwrap();
        fs::write(dst.path().join("stale/deep/x.txt"), b"x").unwrap();

        let plan = plan_between(&src_driver, &dst_driver, true);
        assert_eq!(plan.deletes, vec!["stale/deep/x.txt"]);

        let outcome = execute_plan(
            &src_driver,
            &dst_driver,
            &plan,
            SyncOptions {
                dry_run: false,
                max_concurrent_transfers: 1,
            },
        );

        assert_eq!(outcome.deleted, 1);
        assert!(!dst.path().join("stale/deep").exists());
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let (src, dst, src_driver, dst_driver) = local_pair();
        fs::write(src.path().join("new.txt"), b"n").unwrap();
        fs::write(dst.path().join("extra.txt"), b"e").unwrap();

        let plan = plan_between(&src_driver, &dst_driver, true);
        let outcome = execute_plan(
            &src_driver,
            &dst_driver,
            &plan,
            SyncOptions {
                dry_run: true,
                max_concurrent_transfers: 4,
            },
        );

        assert!(!outcome.made_changes());
        assert!(!dst.path().join("new.txt").exists());
        assert!(dst.path().join("extra.txt").exists());
    }

    #[test]
    fn test_second_run_is_a_no_op() {
        let (src, _dst, src_driver, dst_driver) = local_pair();
        fs::write(src.path().join("file.txt"), b"data").unwrap();

        let plan = plan_between(&src_driver, &dst_driver, true);
        execute_plan(
            &src_driver,
            &dst_driver,
            &plan,
            SyncOptions {
                dry_run: false,
                max_concurrent_transfers: 1,
            },
        );

        // Destination mtime after write is at least the source's, so the
        // strict-newer rule yields an empty second plan
        let second = plan_between(&src_driver, &dst_driver, true);
        assert!(second.is_empty());
    }
}
