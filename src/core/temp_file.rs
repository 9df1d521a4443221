//! Scratch files for intermediate rasters.
//!
//! Files are created owner-only (0600 on Unix). On drop the contents are
//! overwritten with zeros, unless the file is larger than [`WIPE_LIMIT`], and
//! then the file is unlinked.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use tempfile::{Builder, NamedTempFile};

use crate::error::{OcrError, OcrResult};

/// Files at or above this size are unlinked without being wiped first.
pub const WIPE_LIMIT: u64 = 100 * 1024 * 1024;

const WIPE_CHUNK: usize = 64 * 1024;

/// A named temporary file that is wiped and removed on drop.
#[derive(Debug)]
pub struct SecureTempFile {
    inner: Option<NamedTempFile>,
}

impl SecureTempFile {
    /// Creates an empty scratch file with the given suffix in the system temp dir.
    pub fn new(suffix: &str) -> OcrResult<Self> {
        let file = Builder::new()
            .prefix("exocr-")
            .suffix(suffix)
            .tempfile()
            .map_err(|e| OcrError::io("create temp file", std::env::temp_dir(), e))?;
        tracing::trace!(path = %file.path().display(), "Created scratch file");
        Ok(Self { inner: Some(file) })
    }

    pub fn path(&self) -> &Path {
        match &self.inner {
            Some(file) => file.path(),
            None => Path::new(""),
        }
    }
}

impl Drop for SecureTempFile {
    fn drop(&mut self) {
        let Some(file) = self.inner.take() else {
            return;
        };
        if let Err(e) = wipe(file.path()) {
            tracing::debug!(path = %file.path().display(), error = %e, "Scratch file wipe failed");
        }
        if let Err(e) = file.close() {
            tracing::warn!(error = %e, "Failed to remove scratch file");
        }
    }
}

/// Overwrites a file's contents with zeros in place.
fn wipe(path: &Path) -> io::Result<()> {
    let len = std::fs::metadata(path)?.len();
    if len == 0 || len >= WIPE_LIMIT {
        return Ok(());
    }
    let mut file = OpenOptions::new().write(true).open(path)?;
    let zeros = [0u8; WIPE_CHUNK];
    let mut remaining = len as usize;
    while remaining > 0 {
        let n = remaining.min(WIPE_CHUNK);
        file.write_all(&zeros[..n])?;
        remaining -= n;
    }
    file.sync_all()
}
