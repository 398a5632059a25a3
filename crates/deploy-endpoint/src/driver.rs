//! The shared endpoint capability set

use std::io::Read;

use deploy_fs::NormalizedPath;

use crate::error::{Error, Result};
use crate::record::FileRecord;

/// Output of a remote shell command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Uniform file operations over one endpoint.
///
/// The orchestrator holds drivers as `Box<dyn FileDriver>` and selects the
/// concrete transport from the configuration's `type` field at endpoint
/// construction. Drivers are read-only once opened; all methods take
/// `&self` and implementations are safe to share across transfer workers.
pub trait FileDriver: Send + Sync {
    /// The endpoint root this driver is anchored at.
    fn root(&self) -> &NormalizedPath;

    /// Recursively list every regular file under the root.
    ///
    /// Paths are relative to the root using `/`, mtimes truncated to
    /// whole seconds, hidden files included.
    fn list(&self) -> Result<Vec<FileRecord>>;

    /// Recursively list every entry under the root, directories included.
    ///
    /// Used by the clean-install wipe, which must reap directories too.
    fn list_tree(&self) -> Result<Vec<FileRecord>>;

    /// Stat a single relative path, `Ok(None)` when absent.
    fn stat(&self, relative: &str) -> Result<Option<FileRecord>>;

    /// Open the file at `relative` and hand a streaming reader to `f`.
    ///
    /// The reader is only valid inside the callback; remote drivers hold
    /// an SFTP channel lease for exactly that scope.
    fn with_reader(
        &self,
        relative: &str,
        f: &mut dyn FnMut(&mut dyn Read) -> Result<()>,
    ) -> Result<()>;

    /// Stream `reader` into the file at `relative`.
    ///
    /// Missing ancestor directories are created first; an existing target
    /// is replaced.
    fn write_stream(&self, relative: &str, reader: &mut dyn Read) -> Result<u64>;

    /// Delete a single file.
    fn delete_file(&self, relative: &str) -> Result<()>;

    /// Delete a directory and everything under it.
    fn delete_dir(&self, relative: &str) -> Result<()>;

    /// Execute a shell command on the endpoint host.
    ///
    /// Only remote endpoints have a shell; the local driver refuses.
    fn exec(&self, _command: &str) -> Result<ExecOutput> {
        Err(Error::ExecUnsupported)
    }

    /// Whether this endpoint is on the far side of a network transport.
    fn is_remote(&self) -> bool;

    /// Read an entire file into memory.
    ///
    /// Convenience for small payloads (file mappings, SQL uploads); bulk
    /// transfers go through [`with_reader`](Self::with_reader) and
    /// [`write_stream`](Self::write_stream) instead.
    fn read(&self, relative: &str) -> Result<Vec<u8>> {
        let mut content = Vec::new();
        self.with_reader(relative, &mut |reader| {
            reader
                .read_to_end(&mut content)
                .map_err(|e| Error::io(relative, e))?;
            Ok(())
        })?;
        Ok(content)
    }

    /// Write an in-memory buffer to `relative`.
    fn write(&self, relative: &str, content: &[u8]) -> Result<()> {
        let mut cursor = std::io::Cursor::new(content);
        self.write_stream(relative, &mut cursor)?;
        Ok(())
    }
}
