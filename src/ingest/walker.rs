use crate::error::{KbError, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A knowledge file found on disk
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub relative_path: String,
    pub absolute_path: PathBuf,
}

impl SourceFile {
    /// Stable document id derived from the relative path:
    /// lowercase, extension dropped, separators and spaces become `-`
    pub fn document_id(&self) -> String {
        let normalized = self.relative_path.replace('\\', "/");
        let stem = match normalized.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() && !stem.ends_with('/') => stem,
            _ => normalized.as_str(),
        };
        stem.to_lowercase()
            .split(|c: char| c == '/' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("-")
    }

    pub fn filename(&self) -> String {
        self.absolute_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.relative_path.clone())
    }
}

/// Discover markdown and plain-text files under `root`.
///
/// A single file path is returned as-is.
pub fn discover_files(root: &Path) -> Result<Vec<SourceFile>> {
    if root.is_file() {
        return Ok(vec![SourceFile {
            relative_path: root
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            absolute_path: root.to_path_buf(),
        }]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_lowercase();
        if !matches!(extension.as_str(), "md" | "markdown" | "txt") {
            continue;
        }

        let relative_path = path
            .strip_prefix(root)
            .map_err(|_| {
                KbError::Config(format!("Failed to compute relative path for: {}", path.display()))
            })?
            .to_string_lossy()
            .to_string();

        files.push(SourceFile {
            relative_path,
            absolute_path: path.to_path_buf(),
        });
    }

    log::info!("Discovered {} files in {}", files.len(), root.display());
    Ok(files)
}
