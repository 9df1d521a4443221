//! # Path Guard
//!
//! Every path the pipeline touches goes through [`PathGuard`] first. It
//! rejects:
//!
//! - paths containing a `..` component
//! - anything under the system directories `/etc`, `/usr`, `/bin`, `/sbin`,
//!   `/boot`, `/sys` and `/proc`
//! - symlinks, for paths reported by the watcher
//!
//! Paths under the system temp directory are accepted when `allow_temp` is set,
//! which the pipeline needs for its own scratch rasters.

use std::path::{Component, Path, PathBuf};

use crate::error::{OcrError, OcrResult};

const SENSITIVE_DIRS: [&str; 7] = ["/etc", "/usr", "/bin", "/sbin", "/boot", "/sys", "/proc"];

/// Validates and normalizes filesystem paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathGuard;

impl PathGuard {
    pub fn new() -> Self {
        Self
    }

    /// Validates a path and returns its resolved absolute form.
    ///
    /// With `allow_temp`, anything under the system temp directory is accepted
    /// without the denylist check.
    pub fn validate(&self, path: &Path, allow_temp: bool) -> OcrResult<PathBuf> {
        if path
            .components()
            .any(|component| matches!(component, Component::ParentDir))
        {
            return Err(reject(path, "path traversal detected"));
        }

        let resolved = resolve(path)?;

        if allow_temp && resolved.starts_with(temp_root()) {
            return Ok(resolved);
        }

        if let Some(dir) = SENSITIVE_DIRS
            .iter()
            .find(|dir| resolved.starts_with(Path::new(dir)))
        {
            return Err(reject(
                path,
                format!("access to system directory {} is not allowed", dir),
            ));
        }

        Ok(resolved)
    }

    /// Validates a path reported by the watcher. Symlinks are rejected, checked
    /// on the path as given before it is resolved.
    pub fn validate_watch_target(&self, path: &Path) -> OcrResult<PathBuf> {
        // symlink_metadata does not follow the link
        if let Ok(meta) = std::fs::symlink_metadata(path) {
            if meta.file_type().is_symlink() {
                return Err(reject(path, "symbolic links are not allowed"));
            }
        }
        self.validate(path, false)
    }

    /// Validates a diagram source: must exist, be a regular file and carry a
    /// `.md` or `.excalidraw` suffix.
    pub fn validate_source(&self, path: &Path) -> OcrResult<PathBuf> {
        let resolved = self.validate(path, false)?;
        let meta = std::fs::metadata(&resolved).map_err(|e| OcrError::io("stat", path, e))?;
        if !meta.is_file() {
            return Err(reject(path, "not a regular file"));
        }
        let name = resolved
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if !(name.ends_with(".md") || name.ends_with(".excalidraw")) {
            return Err(reject(path, "expected a .md or .excalidraw file"));
        }
        Ok(resolved)
    }

    /// Validates a folder to be watched or batch processed.
    pub fn validate_dir(&self, path: &Path) -> OcrResult<PathBuf> {
        let resolved = self.validate(path, false)?;
        let meta = std::fs::metadata(&resolved).map_err(|e| OcrError::io("stat", path, e))?;
        if !meta.is_dir() {
            return Err(reject(path, "not a directory"));
        }
        Ok(resolved)
    }
}

fn reject(path: &Path, reason: impl Into<String>) -> OcrError {
    let error = OcrError::path_rejected(path, reason);
    tracing::warn!("{}", error);
    error
}

fn temp_root() -> PathBuf {
    let tmp = std::env::temp_dir();
    std::fs::canonicalize(&tmp).unwrap_or(tmp)
}

/// Absolute, symlink-resolved path. Non-existent files resolve through their
/// parent so output paths can be validated before they are written.
fn resolve(path: &Path) -> OcrResult<PathBuf> {
    if let Ok(resolved) = std::fs::canonicalize(path) {
        return Ok(resolved);
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| OcrError::io("resolve working directory", path, e))?
            .join(path)
    };
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => {
            let parent = std::fs::canonicalize(parent).unwrap_or_else(|_| parent.to_path_buf());
            Ok(parent.join(name))
        }
        _ => Ok(absolute),
    }
}
