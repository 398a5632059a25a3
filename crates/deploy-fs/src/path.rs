//! Slash-normalized paths shared by both endpoint transports

use std::path::{Path, PathBuf};

use crate::{Error, Result};

fn normalize(raw: &str) -> String {
    raw.replace('\\', "/")
}

/// A path held with `/` separators regardless of platform.
///
/// Endpoint-relative paths are compared byte-for-byte across transports,
/// so everything entering the engine goes through this type and only
/// becomes platform-native again at an I/O boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NormalizedPath(String);

impl NormalizedPath {
    /// Normalize any path-like input.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self(normalize(&path.as_ref().to_string_lossy()))
    }

    /// The normalized text of the path.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Platform-native form for handing to the OS.
    pub fn to_native(&self) -> PathBuf {
        PathBuf::from(&self.0)
    }

    /// The path without any trailing separator; the root keeps its `/`.
    fn trimmed(&self) -> &str {
        match self.0.trim_end_matches('/') {
            "" if self.0.starts_with('/') => "/",
            trimmed => trimmed,
        }
    }

    /// Append a relative piece, normalizing its separators too.
    pub fn join(&self, piece: &str) -> Self {
        let head = self.0.trim_end_matches('/');
        Self(format!("{head}/{}", normalize(piece)))
    }

    /// Iterate over the non-empty `/`-separated segments.
    pub fn segments(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// The last segment, if the path has one.
    pub fn file_name(&self) -> Option<&str> {
        self.segments().next_back()
    }

    /// Everything before the last segment.
    pub fn parent(&self) -> Option<Self> {
        let trimmed = self.trimmed();
        if trimmed == "/" {
            return None;
        }
        match trimmed.rsplit_once('/') {
            Some(("", _)) => Some(Self("/".to_string())),
            Some((head, _)) => Some(Self(head.to_string())),
            None => None,
        }
    }

    /// The extension with its leading dot, when the last segment has one.
    ///
    /// Ignore rules carry extensions in `.ext` form, so the dot stays.
    pub fn dot_extension(&self) -> Option<&str> {
        let name = self.file_name()?;
        match name.rfind('.') {
            Some(0) | None => None,
            Some(idx) => Some(&name[idx..]),
        }
    }

    /// Whether the path resolves to something on the local filesystem.
    pub fn exists(&self) -> bool {
        self.to_native().exists()
    }

    /// Whether this looks like a Windows-style root.
    ///
    /// UNC shares (`//server/share`, `\\server\share`) and drive letters
    /// count; ignore patterns fold case under such roots.
    pub fn is_windows_root(&self) -> bool {
        if self.0.starts_with("//") || self.0.starts_with("\\\\") {
            return true;
        }
        let mut chars = self.0.chars();
        matches!(
            (chars.next(), chars.next()),
            (Some(drive), Some(':')) if drive.is_ascii_alphabetic()
        )
    }
}

/// Validate an endpoint-relative path and return it slash-normalized.
///
/// Rejects absolute paths and any `..` component so a configured relative
/// path can never escape the endpoint root.
pub fn validate_relative_path(relative: &str) -> Result<String> {
    let normalized = normalize(relative);

    if normalized.starts_with('/') || NormalizedPath::new(&normalized).is_windows_root() {
        return Err(Error::InvalidPath {
            path: relative.to_string(),
            reason: "absolute paths are not allowed".to_string(),
        });
    }

    if normalized.split('/').any(|part| part == "..") {
        return Err(Error::InvalidPath {
            path: relative.to_string(),
            reason: "parent references are not allowed".to_string(),
        });
    }

    Ok(normalized)
}

impl AsRef<Path> for NormalizedPath {
    fn as_ref(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl std::fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
