//! Atomic file replacement for the trust cache

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::{Error, NormalizedPath, Result};

/// Replace `path` with `content` in one observable step.
///
/// The payload lands in a staging file first and is renamed over the
/// target only once fully flushed, so a crash mid-write can never leave a
/// truncated file. The trust cache depends on exactly that: after a
/// failed run the previous cache must still be byte-identical on disk.
pub fn write_atomic(path: &NormalizedPath, content: &[u8]) -> Result<()> {
    let target = path.to_native();

    if let Some(dir) = target.parent() {
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    }

    let stage = staging_path(&target);
    fill_staged(&stage, &target, content)?;

    fs::rename(&stage, &target).map_err(|e| Error::io(&target, e))
}

/// Staging file in the target's own directory, keyed by pid, so the final
/// rename never crosses a filesystem.
fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.stage{}", name, std::process::id()))
}

/// Write the whole payload to the staging file under an advisory lock and
/// flush it to disk before returning.
fn fill_staged(stage: &Path, target: &Path, content: &[u8]) -> Result<()> {
    let lock_failed = || Error::LockFailed {
        path: target.to_path_buf(),
    };

    let mut file = fs::File::create(stage).map_err(|e| Error::io(stage, e))?;
    file.lock_exclusive().map_err(|_| lock_failed())?;

    let written = file.write_all(content).and_then(|()| file.sync_all());
    let unlocked = file.unlock();

    written.map_err(|e| Error::io(stage, e))?;
    unlocked.map_err(|_| lock_failed())
}

/// Read a file as UTF-8 text.
pub fn read_text(path: &NormalizedPath) -> Result<String> {
    let native = path.to_native();
    fs::read_to_string(&native).map_err(|e| Error::io(&native, e))
}
