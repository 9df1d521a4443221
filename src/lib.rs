//! # Excalidraw OCR
//!
//! Incremental text recognition for hand-drawn Excalidraw diagrams.
//!
//! Each diagram file carries a compressed scene. The library decompresses it,
//! renders the drawable elements to SVG, rasterizes and encodes the canvas and
//! sends it to a vision-capable chat-completions endpoint. The transcribed text
//! is written next to the source with a fingerprint of the payload, so an
//! unchanged diagram is never sent twice.
//!
//! ## Architecture
//!
//! - `core`: path validation, scratch files, debounce and stabilization maps,
//!   rate limiting and the shutdown flag
//! - `config`: watch, provider and pipeline limit configuration
//! - `source`: payload extraction and scene decompression
//! - `render`: element model and the SVG renderer
//! - `processing`: rasterization, upload encoding and recognition
//! - `cache`: fingerprints and output artifacts
//! - `watch`: filesystem events, filtering and bounded dispatch
//! - `session`: the per-file pipeline and the watch loop
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use excalidraw_ocr::config::{ProviderConfig, WatchConfig};
//! use excalidraw_ocr::core::Shutdown;
//! use excalidraw_ocr::session::OcrSession;
//!
//! # async fn example() -> excalidraw_ocr::OcrResult<()> {
//! let session = OcrSession::builder()
//!     .with_provider(ProviderConfig::from_env(None)?)
//!     .build()?;
//!
//! let shutdown = Shutdown::new();
//! let report = Arc::new(session)
//!     .watch_loop(Path::new("vault/drawings"), WatchConfig::default(), shutdown)
//!     .await?;
//! println!("{} processed", report.stats.processed);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod core;
pub mod error;
pub mod processing;
pub mod render;
pub mod session;
pub mod source;
pub mod watch;

pub use error::{OcrError, OcrResult, Retryable};
pub use session::{BatchReport, OcrSession, RunResult, WatchReport};
