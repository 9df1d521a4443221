//! # Content-Addressed Output Cache
//!
//! Each output file starts with a small metadata header recording the
//! fingerprint of the diagram payload it was produced from:
//!
//! ```text
//! ---
//! excalidraw-ocr-hash: ba7816bf8f01cfea
//! ---
//!
//! recognized text
//! ```
//!
//! A diagram is reprocessed only when the header is missing or its fingerprint
//! differs from the current payload. Outputs are written through a temp file
//! in the same directory and renamed into place.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::core::PathGuard;
use crate::error::{OcrError, OcrResult};

/// Header key holding the payload fingerprint.
pub const HASH_KEY: &str = "excalidraw-ocr-hash";

const HEADER_MARKER: &str = "---";

/// Number of hex characters kept from the SHA-256 digest.
pub const FINGERPRINT_LEN: usize = 16;

/// First 16 lowercase hex characters of the SHA-256 of `payload`.
pub fn fingerprint(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    let mut hex = String::with_capacity(FINGERPRINT_LEN);
    for byte in digest.iter().take(FINGERPRINT_LEN / 2) {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// Derives the output path for a diagram.
///
/// `X.excalidraw.md` becomes `X.md`, `X.excalidraw` becomes `X.txt`, anything
/// else becomes `<stem>.txt` next to the input.
pub fn output_path_for(input: &Path) -> PathBuf {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = if let Some(base) = name.strip_suffix(".excalidraw.md") {
        format!("{}.md", base)
    } else if let Some(base) = name.strip_suffix(".excalidraw") {
        format!("{}.txt", base)
    } else {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{}.txt", stem)
    };
    input.with_file_name(file_name)
}

/// Why a diagram has to go through the pipeline again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReprocessReason {
    Forced,
    NoExistingOutput,
    NoFingerprintRecorded,
    ContentChanged,
}

impl fmt::Display for ReprocessReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            ReprocessReason::Forced => "forced",
            ReprocessReason::NoExistingOutput => "no existing output",
            ReprocessReason::NoFingerprintRecorded => "no fingerprint recorded",
            ReprocessReason::ContentChanged => "content changed",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    Reprocess(ReprocessReason),
    UseCached,
}

impl CacheDecision {
    pub fn should_reprocess(&self) -> bool {
        matches!(self, CacheDecision::Reprocess(_))
    }

    pub fn reason(&self) -> String {
        match self {
            CacheDecision::Reprocess(reason) => reason.to_string(),
            CacheDecision::UseCached => "up to date".to_string(),
        }
    }
}

/// Parsed metadata header of an output file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheRecord {
    pub fingerprint: Option<String>,
}

impl CacheRecord {
    /// Parses the header at the top of `content`.
    ///
    /// Returns `None` when the first line is not the marker or the header is
    /// never closed. Keys may appear in any order; unknown keys are ignored.
    pub fn parse(content: &str) -> Option<Self> {
        let mut lines = content.lines();
        if lines.next()?.trim() != HEADER_MARKER {
            return None;
        }
        let mut record = CacheRecord::default();
        for line in lines {
            let line = line.trim();
            if line == HEADER_MARKER {
                return Some(record);
            }
            if let Some((key, value)) = line.split_once(':') {
                if key.trim() == HASH_KEY {
                    let value = value.trim();
                    if !value.is_empty() {
                        record.fingerprint = Some(value.to_string());
                    }
                }
            }
        }
        None
    }
}

/// Splits `content` into the header record and the trimmed body.
fn split_header(content: &str) -> (Option<CacheRecord>, &str) {
    let Some(record) = CacheRecord::parse(content) else {
        return (None, content.trim());
    };
    // Skip the opening marker line, then everything through the closing marker.
    let after_open = content
        .find('\n')
        .map(|idx| &content[idx + 1..])
        .unwrap_or_default();
    let mut offset = 0;
    for line in after_open.split_inclusive('\n') {
        offset += line.len();
        if line.trim() == HEADER_MARKER {
            break;
        }
    }
    (Some(record), after_open[offset..].trim())
}

/// Reads and writes fingerprinted output artifacts.
#[derive(Debug, Clone, Default)]
pub struct ContentCache {
    guard: PathGuard,
}

impl ContentCache {
    pub fn new(guard: PathGuard) -> Self {
        Self { guard }
    }

    /// Reads the header of an existing output; `None` if absent or unreadable.
    pub fn read_record(&self, output: &Path) -> Option<CacheRecord> {
        let content = std::fs::read_to_string(output).ok()?;
        CacheRecord::parse(&content)
    }

    pub fn decide(&self, output: &Path, current: &str, force: bool) -> CacheDecision {
        let decision = if force {
            CacheDecision::Reprocess(ReprocessReason::Forced)
        } else if !output.exists() {
            CacheDecision::Reprocess(ReprocessReason::NoExistingOutput)
        } else {
            match self.read_record(output).and_then(|record| record.fingerprint) {
                None => CacheDecision::Reprocess(ReprocessReason::NoFingerprintRecorded),
                Some(recorded) if recorded != current => {
                    CacheDecision::Reprocess(ReprocessReason::ContentChanged)
                }
                Some(_) => CacheDecision::UseCached,
            }
        };
        tracing::debug!(
            output = %output.display(),
            fingerprint = current,
            reason = %decision.reason(),
            "Cache decision"
        );
        decision
    }

    /// Returns the cached body with the header removed.
    pub fn read_cached(&self, output: &Path) -> OcrResult<String> {
        let content = std::fs::read_to_string(output)
            .map_err(|e| OcrError::io("read cached output", output, e))?;
        Ok(split_header(&content).1.to_string())
    }

    /// Writes `body` under a fresh header. Returns the resolved output path.
    pub fn write(&self, output: &Path, body: &str, fingerprint: &str) -> OcrResult<PathBuf> {
        let output = self.guard.validate(output, true)?;
        let dir = output
            .parent()
            .ok_or_else(|| OcrError::path_rejected(&output, "output has no parent directory"))?;

        let content = format!(
            "{marker}\n{key}: {fp}\n{marker}\n\n{body}\n",
            marker = HEADER_MARKER,
            key = HASH_KEY,
            fp = fingerprint,
            body = body.trim()
        );

        let mut temp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| OcrError::io("create output temp file", dir, e))?;
        temp.write_all(content.as_bytes())
            .map_err(|e| OcrError::io("write output", &output, e))?;
        temp.persist(&output)
            .map_err(|e| OcrError::io("persist output", &output, e.error))?;

        tracing::info!(output = %output.display(), fingerprint, "Wrote output");
        Ok(output)
    }
}
