//! Three-tier ignore matcher
//!
//! A relative path is ignored iff any path segment matches a folder
//! pattern, the final segment matches a file pattern, or the extension
//! (leading dot included) equals a listed extension. Patterns use
//! shell-style wildcards: `*`, `?`, `[...]`, `[!...]`.

use glob::{MatchOptions, Pattern};

use deploy_fs::NormalizedPath;

use crate::config::IgnoreConfig;
use crate::error::{Error, Result};

/// Compiled ignore rules for one run.
pub struct IgnoreMatcher {
    files: Vec<Pattern>,
    folders: Vec<Pattern>,
    extensions: Vec<String>,
    options: MatchOptions,
    fold_case: bool,
}

impl IgnoreMatcher {
    /// Compile the configured patterns.
    ///
    /// `fold_case` comes from the source root: Windows-style roots match
    /// case-insensitively, everything else is case-sensitive.
    pub fn new(config: &IgnoreConfig, fold_case: bool) -> Result<Self> {
        let compile = |patterns: &[String]| -> Result<Vec<Pattern>> {
            patterns
                .iter()
                .map(|p| {
                    Pattern::new(p).map_err(|e| {
                        Error::config(format!("invalid ignore pattern {p:?}: {e}"))
                    })
                })
                .collect()
        };

        Ok(Self {
            files: compile(&config.files)?,
            folders: compile(&config.folders)?,
            extensions: config.extensions.clone(),
            options: MatchOptions {
                case_sensitive: !fold_case,
                require_literal_separator: false,
                require_literal_leading_dot: false,
            },
            fold_case,
        })
    }

    /// Whether a slash-normalized relative path is ignored.
    pub fn is_ignored(&self, relative: &str) -> bool {
        let path = NormalizedPath::new(relative);

        for segment in path.segments() {
            if self
                .folders
                .iter()
                .any(|p| p.matches_with(segment, self.options))
            {
                return true;
            }
        }

        if let Some(name) = path.file_name() {
            if self
                .files
                .iter()
                .any(|p| p.matches_with(name, self.options))
            {
                return true;
            }
        }

        if let Some(ext) = path.dot_extension() {
            let matches = if self.fold_case {
                self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
            } else {
                self.extensions.iter().any(|e| e == ext)
            };
            if matches {
                return true;
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(files: &[&str], folders: &[&str], extensions: &[&str], fold: bool) -> IgnoreMatcher {
        let config = IgnoreConfig {
            files: files.iter().map(|s| s.to_string()).collect(),
            folders: folders.iter().map(|s| s.to_string()).collect(),
            extensions: extensions.iter().map(|s| s.to_string()).collect(),
        };
        IgnoreMatcher::new(&config, fold).unwrap()
    }

    #[test]
    fn test_folder_pattern_matches_any_segment() {
        let m = matcher(&[], &["node_modules", ".git"], &[], false);
        assert!(m.is_ignored("web/node_modules/pkg/index.js"));
        assert!(m.is_ignored(".git/config"));
        assert!(!m.is_ignored("web/modules/index.js"));
    }

    #[test]
    fn test_file_pattern_matches_final_segment_only() {
        let m = matcher(&["*.log", "Thumbs.db"], &[], &[], false);
        assert!(m.is_ignored("logs/app.log"));
        assert!(m.is_ignored("Thumbs.db"));
        assert!(!m.is_ignored("app.log.txt"));
    }

    #[test]
    fn test_extension_includes_dot() {
        let m = matcher(&[], &[], &[".tmp", ".bak"], false);
        assert!(m.is_ignored("cache/data.tmp"));
        assert!(m.is_ignored("backup.bak"));
        assert!(!m.is_ignored("tmp"));
        assert!(!m.is_ignored("file.tmpx"));
    }

    #[test]
    fn test_wildcards_and_classes() {
        let m = matcher(&["build-?.zip", "v[0-9]*.tar"], &[], &[], false);
        assert!(m.is_ignored("out/build-1.zip"));
        assert!(m.is_ignored("v2-final.tar"));
        assert!(!m.is_ignored("build-12.zip"));
    }

    #[test]
    fn test_negated_class() {
        let m = matcher(&["draft-[!0-9]*"], &[], &[], false);
        assert!(m.is_ignored("draft-abc"));
        assert!(!m.is_ignored("draft-1"));
    }

    #[test]
    fn test_case_folding_on_windows_roots() {
        let sensitive = matcher(&["README*"], &[], &[".TMP"], false);
        assert!(!sensitive.is_ignored("readme.md"));
        assert!(!sensitive.is_ignored("x.tmp"));

        let folded = matcher(&["README*"], &[], &[".TMP"], true);
        assert!(folded.is_ignored("readme.md"));
        assert!(folded.is_ignored("x.tmp"));
    }
}
