use std::path::{Path, PathBuf};

use globset::GlobMatcher;

use crate::error::{Error, Result};

/// A discovered source document.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Path relative to the source directory.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
}

impl DiscoveredFile {
    /// Stable document identifier: the relative path with `/` separators.
    pub fn document_id(&self) -> String {
        self.relative_path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Recursively walk a directory and discover documents whose relative path
/// matches `matcher`.
///
/// Skips hidden files/directories (names starting with `.`). Results are
/// sorted by relative path so runs are deterministic.
pub fn discover_files(
    root: &Path,
    matcher: &GlobMatcher,
) -> Result<Vec<DiscoveredFile>> {
    if !root.is_dir() {
        return Err(Error::NotFound {
            kind: "source directory",
            name: root.display().to_string(),
        });
    }
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, matcher, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    matcher: &GlobMatcher,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if file_name.to_string_lossy().starts_with('.') {
            continue;
        }

        let file_type = entry.file_type()?;
        let path = entry.path();

        if file_type.is_dir() {
            walk_dir(root, &path, matcher, results)?;
        } else if file_type.is_symlink() {
            let Ok(resolved) = path.canonicalize() else {
                continue; // broken symlink
            };
            // Directory symlinks are not followed (cycle prevention).
            if resolved.is_file() {
                push_if_matching(root, &path, &resolved, matcher, results);
            }
        } else if file_type.is_file() {
            let abs = path.canonicalize()?;
            push_if_matching(root, &path, &abs, matcher, results);
        }
    }

    Ok(())
}

fn push_if_matching(
    root: &Path,
    original_path: &Path,
    absolute_path: &Path,
    matcher: &GlobMatcher,
    results: &mut Vec<DiscoveredFile>,
) {
    let relative_path = original_path
        .strip_prefix(root)
        .unwrap_or(original_path)
        .to_path_buf();
    if matcher.is_match(&relative_path) {
        results.push(DiscoveredFile {
            relative_path,
            absolute_path: absolute_path.to_path_buf(),
        });
    }
}
