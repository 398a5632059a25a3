//! Local filesystem driver
//!
//! Covers plain directories and mounted UNC shares; authentication for a
//! share is the operating system's business, the driver only verifies the
//! root is reachable.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tracing::debug;
use walkdir::WalkDir;

use deploy_fs::{validate_relative_path, NormalizedPath};

use crate::driver::FileDriver;
use crate::error::{Error, Result};
use crate::record::FileRecord;

/// Driver over a local (or OS-mounted) directory tree.
pub struct LocalDriver {
    root: NormalizedPath,
}

impl LocalDriver {
    /// Open the driver, verifying the root exists and is a directory.
    pub fn open(root: NormalizedPath) -> Result<Self> {
        let native = root.to_native();
        if !native.is_dir() {
            return Err(Error::Connect {
                endpoint: root.as_str().to_string(),
                message: "root does not exist or is not a directory".to_string(),
            });
        }
        debug!("Opened local endpoint at {}", root);
        Ok(Self { root })
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let validated = validate_relative_path(relative)?;
        Ok(self.root.join(&validated).to_native())
    }

    fn record_for(&self, path: &Path, metadata: &fs::Metadata) -> Result<FileRecord> {
        let full = NormalizedPath::new(path);
        let relative = full
            .as_str()
            .strip_prefix(self.root.as_str())
            .map(|s| s.trim_start_matches('/').to_string())
            .unwrap_or_else(|| full.as_str().to_string());

        let mtime = metadata
            .modified()
            .map_err(|e| Error::io(path, e))?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        Ok(FileRecord {
            path: relative,
            full_path: full.as_str().to_string(),
            size: metadata.len(),
            mtime,
            is_dir: metadata.is_dir(),
        })
    }

    fn walk(&self, include_dirs: bool) -> Result<Vec<FileRecord>> {
        let mut records = Vec::new();

        for entry in WalkDir::new(self.root.to_native()).min_depth(1) {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                match e.into_io_error() {
                    Some(io) => Error::io(path, io),
                    None => Error::NotFound {
                        path: path.display().to_string(),
                    },
                }
            })?;

            let metadata = entry
                .metadata()
                .map_err(|e| match e.into_io_error() {
                    Some(io) => Error::io(entry.path(), io),
                    None => Error::NotFound {
                        path: entry.path().display().to_string(),
                    },
                })?;

            if metadata.is_dir() && !include_dirs {
                continue;
            }
            records.push(self.record_for(entry.path(), &metadata)?);
        }

        Ok(records)
    }
}

impl FileDriver for LocalDriver {
    fn root(&self) -> &NormalizedPath {
        &self.root
    }

    fn list(&self) -> Result<Vec<FileRecord>> {
        self.walk(false)
    }

    fn list_tree(&self) -> Result<Vec<FileRecord>> {
        self.walk(true)
    }

    fn stat(&self, relative: &str) -> Result<Option<FileRecord>> {
        let native = self.resolve(relative)?;
        match fs::metadata(&native) {
            Ok(metadata) => Ok(Some(self.record_for(&native, &metadata)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(native, e)),
        }
    }

    fn with_reader(
        &self,
        relative: &str,
        f: &mut dyn FnMut(&mut dyn Read) -> Result<()>,
    ) -> Result<()> {
        let native = self.resolve(relative)?;
        let mut file = fs::File::open(&native).map_err(|e| Error::io(&native, e))?;
        f(&mut file)
    }

    fn write_stream(&self, relative: &str, reader: &mut dyn Read) -> Result<u64> {
        let native = self.resolve(relative)?;

        if let Some(parent) = native.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        // Stream into a sibling temp file, then rename over the target
        let temp_name = format!(
            ".{}.{}.part",
            native
                .file_name()
                .map(|n| n.to_string_lossy())
                .unwrap_or_default(),
            std::process::id()
        );
        let temp_path = native.with_file_name(&temp_name);

        let mut temp_file = fs::File::create(&temp_path).map_err(|e| Error::io(&temp_path, e))?;
        let written =
            std::io::copy(reader, &mut temp_file).map_err(|e| Error::io(&temp_path, e))?;
        temp_file.sync_all().map_err(|e| Error::io(&temp_path, e))?;
        drop(temp_file);

        fs::rename(&temp_path, &native).map_err(|e| Error::io(&native, e))?;
        Ok(written)
    }

    fn delete_file(&self, relative: &str) -> Result<()> {
        let native = self.resolve(relative)?;
        match fs::remove_file(&native) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(native, e)),
        }
    }

    fn delete_dir(&self, relative: &str) -> Result<()> {
        let native = self.resolve(relative)?;
        match fs::remove_dir_all(&native) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(native, e)),
        }
    }

    fn is_remote(&self) -> bool {
        false
    }
}
