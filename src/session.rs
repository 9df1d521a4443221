//! # OCR Session
//!
//! Orchestrates the per-diagram pipeline and the long-running watch loop.
//!
//! ## Pipeline
//!
//! ```text
//! validate → read payload → fingerprint → cache decision
//!                                            │
//!                     ┌──────── cached ──────┤
//!                     ▼                      ▼ reprocess
//!               return body      decompress → render → rasterize (temp PNG)
//!                                  → encode JPEG → recognize → strip fence
//!                                  → write output with fingerprint header
//! ```
//!
//! A cache hit never touches the output file. The intermediate raster lives in
//! a [`SecureTempFile`] and is wiped and unlinked as soon as it has been
//! encoded, including when any later step fails.
//!
//! ## Collaborators
//!
//! The rasterizer and recognizer are injected through the builder as trait
//! objects, which is how tests replace the network and font stack.
//!
//! ```rust,no_run
//! use std::path::Path;
//! use excalidraw_ocr::config::ProviderConfig;
//! use excalidraw_ocr::session::OcrSession;
//!
//! # fn main() -> excalidraw_ocr::error::OcrResult<()> {
//! let provider = ProviderConfig::from_env(None)?;
//! let session = OcrSession::builder().with_provider(provider).build()?;
//! let result = session.run_once(Path::new("Board.excalidraw.md"), false)?;
//! println!("{}", result.text);
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::cache::{ContentCache, output_path_for};
use crate::config::{PipelineLimits, ProviderConfig, WatchConfig};
use crate::core::{PathGuard, SecureTempFile, Shutdown};
use crate::error::{OcrError, OcrResult, classify};
use crate::processing::{
    HttpRecognizer, Rasterizer, Recognizer, ResvgRasterizer, prepare_upload, strip_code_fence,
};
use crate::render::render;
use crate::source::DiagramSource;
use crate::watch::{
    FileProcessor, ProcessOutcome, StatsSnapshot, WatchDispatcher, start_watcher,
};

/// Outcome of a single [`OcrSession::run_once`].
#[derive(Debug, Clone)]
pub struct RunResult {
    pub text: String,
    /// False when the cached output was returned.
    pub reprocessed: bool,
    pub fingerprint: String,
    pub output: PathBuf,
}

/// Counts for a sequential batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub reprocessed: usize,
    pub cached: usize,
    pub errors: usize,
    pub vanished: usize,
    pub failed: Vec<PathBuf>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.reprocessed + self.cached + self.errors + self.vanished
    }
}

/// Final counters of a watch session.
#[derive(Debug, Clone, Default)]
pub struct WatchReport {
    pub stats: StatsSnapshot,
    /// Files still waiting out their stabilization delay at exit.
    pub pending: Vec<PathBuf>,
}

pub struct OcrSession {
    model: String,
    limits: PipelineLimits,
    guard: PathGuard,
    cache: ContentCache,
    rasterizer: Arc<dyn Rasterizer>,
    recognizer: Arc<dyn Recognizer>,
    output_override: Option<PathBuf>,
}

impl std::fmt::Debug for OcrSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcrSession")
            .field("model", &self.model)
            .field("limits", &self.limits)
            .field("output_override", &self.output_override)
            .finish_non_exhaustive()
    }
}

impl OcrSession {
    pub fn builder() -> OcrSessionBuilder {
        OcrSessionBuilder::new()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn limits(&self) -> &PipelineLimits {
        &self.limits
    }

    /// Runs the pipeline for one diagram.
    pub fn run_once(&self, path: &Path, force: bool) -> OcrResult<RunResult> {
        let path = self.guard.validate_source(path)?;
        let source = DiagramSource::read(&path, &self.limits)?;
        let output = self
            .output_override
            .clone()
            .unwrap_or_else(|| output_path_for(&path));

        let decision = self.cache.decide(&output, &source.fingerprint, force);
        if !decision.should_reprocess() {
            tracing::info!(
                file = %path.display(),
                output = %output.display(),
                "Diagram unchanged, using cached result"
            );
            let text = self.cache.read_cached(&output)?;
            return Ok(RunResult {
                text,
                reprocessed: false,
                fingerprint: source.fingerprint,
                output,
            });
        }
        tracing::info!(file = %path.display(), reason = %decision.reason(), "Processing diagram");

        let elements = source.elements(&self.limits)?;
        let canvas = render(&elements)?;
        tracing::info!(
            elements = canvas.element_count,
            width = canvas.width,
            height = canvas.height,
            "Rendered canvas"
        );

        let image = {
            let raster = SecureTempFile::new(".png")?;
            self.rasterizer
                .rasterize(&canvas.svg, raster.path(), self.limits.render_scale)?;
            prepare_upload(raster.path(), &self.limits)?
        };

        let raw = self.recognizer.recognize(&image.base64, &self.model)?;
        let text = strip_code_fence(&raw);
        let output = self.cache.write(&output, &text, &source.fingerprint)?;

        Ok(RunResult {
            text,
            reprocessed: true,
            fingerprint: source.fingerprint,
            output,
        })
    }

    /// Runs every path in order. Failures are logged and counted, never fatal.
    pub fn run_batch(&self, paths: &[PathBuf], force: bool) -> BatchReport {
        let mut report = BatchReport::default();
        for (index, path) in paths.iter().enumerate() {
            tracing::info!(
                file = %path.display(),
                index = index + 1,
                total = paths.len(),
                "Batch item"
            );
            match self.run_once(path, force) {
                Ok(result) if result.reprocessed => report.reprocessed += 1,
                Ok(_) => report.cached += 1,
                Err(error) if classify::is_vanished(&error) => {
                    tracing::warn!(file = %path.display(), "File vanished, skipping");
                    report.vanished += 1;
                }
                Err(error) => {
                    tracing::error!(
                        file = %path.display(),
                        category = error.category(),
                        error = %error,
                        "Processing failed"
                    );
                    report.errors += 1;
                    report.failed.push(path.clone());
                }
            }
        }
        tracing::info!(
            reprocessed = report.reprocessed,
            cached = report.cached,
            errors = report.errors,
            "Batch complete"
        );
        report
    }

    /// Lists the diagram files directly inside `folder`, sorted by name.
    pub fn scan_folder(&self, folder: &Path, config: &WatchConfig) -> OcrResult<Vec<PathBuf>> {
        let folder = self.guard.validate_dir(folder)?;
        let entries =
            std::fs::read_dir(&folder).map_err(|e| OcrError::io("list folder", &folder, e))?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|name| config.accepts_name(name))
            })
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Watches `folder` until `shutdown` fires.
    ///
    /// Existing diagrams are processed first. In-flight work is awaited before
    /// returning, while files still waiting for a permit are skipped; files
    /// still inside their stabilization delay are reported in
    /// [`WatchReport::pending`].
    pub async fn watch_loop(
        self: Arc<Self>,
        folder: &Path,
        config: WatchConfig,
        shutdown: Shutdown,
    ) -> OcrResult<WatchReport> {
        config
            .validate()
            .map_err(|reason| OcrError::config("watch", folder.display().to_string(), reason))?;
        let folder = self.guard.validate_dir(folder)?;
        let poll_interval = config.poll_interval();

        let initial = self.scan_folder(&folder, &config)?;
        let processor: Arc<dyn FileProcessor> = self.clone();
        let dispatcher = Arc::new(WatchDispatcher::new(config, processor));

        tracing::info!(
            folder = %folder.display(),
            files = initial.len(),
            delay = ?dispatcher.config().delay(),
            concurrency = dispatcher.config().concurrency,
            "Initial pass"
        );
        futures_util::future::join_all(
            initial
                .into_iter()
                .map(|path| dispatcher.process_file_unless_shutdown(path, &shutdown)),
        )
        .await;
        let initial_stats = dispatcher.stats();
        tracing::info!(
            processed = initial_stats.processed,
            cached = initial_stats.cached,
            errors = initial_stats.errors,
            vanished = initial_stats.vanished,
            skipped = initial_stats.skipped,
            "Initial pass finished"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = start_watcher(&folder, tx)?;
        let pump = tokio::spawn(event_pump(Arc::clone(&dispatcher), rx, shutdown.clone()));

        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.wait() => {}
            }

            for path in dispatcher.tracker().drain_ready() {
                if !path.exists() {
                    tracing::warn!(file = %path.display(), "File no longer exists, skipping");
                    continue;
                }
                tracing::info!(file = %path.display(), "File stabilized");
                let dispatcher = Arc::clone(&dispatcher);
                let shutdown = shutdown.clone();
                in_flight.spawn(async move {
                    if !dispatcher.process_file_unless_shutdown(path.clone(), &shutdown).await {
                        tracing::info!(file = %path.display(), "Skipped, shutting down");
                    }
                });
            }
            while let Some(joined) = in_flight.try_join_next() {
                log_task_panic(joined);
            }

            if shutdown.is_triggered() {
                break;
            }
        }

        drop(watcher);
        if let Err(e) = pump.await {
            tracing::error!(error = %e, "Event pump task failed");
        }
        if !in_flight.is_empty() {
            tracing::info!(tasks = in_flight.len(), "Waiting for in-flight processing");
        }
        while let Some(joined) = in_flight.join_next().await {
            log_task_panic(joined);
        }

        let report = WatchReport {
            stats: dispatcher.stats(),
            pending: dispatcher.tracker().pending_paths(),
        };
        tracing::info!(
            processed = report.stats.processed,
            cached = report.stats.cached,
            errors = report.stats.errors,
            vanished = report.stats.vanished,
            skipped = report.stats.skipped,
            pending = report.pending.len(),
            "Watch session finished"
        );
        for path in &report.pending {
            tracing::info!(file = %path.display(), "Still pending at shutdown");
        }
        Ok(report)
    }
}

impl FileProcessor for OcrSession {
    fn process(&self, path: &Path, force: bool) -> OcrResult<ProcessOutcome> {
        let result = self.run_once(path, force)?;
        Ok(if result.reprocessed {
            ProcessOutcome::Reprocessed
        } else {
            ProcessOutcome::Cached
        })
    }
}

/// Spawns one handler per event so stability sleeps never hold up the queue.
async fn event_pump(
    dispatcher: Arc<WatchDispatcher>,
    mut rx: mpsc::UnboundedReceiver<crate::watch::WatchEvent>,
    shutdown: Shutdown,
) {
    let mut handlers = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            event = rx.recv() => match event {
                Some(event) => {
                    let dispatcher = Arc::clone(&dispatcher);
                    handlers.spawn(async move { dispatcher.handle_event(event).await });
                }
                None => break,
            },
            Some(joined) = handlers.join_next(), if !handlers.is_empty() => log_task_panic(joined),
        }
    }
    while let Some(joined) = handlers.join_next().await {
        log_task_panic(joined);
    }
}

fn log_task_panic(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "Watch task panicked");
    }
}

/// Fluent construction of an [`OcrSession`].
#[derive(Default)]
pub struct OcrSessionBuilder {
    provider: Option<ProviderConfig>,
    model: Option<String>,
    limits: PipelineLimits,
    guard: PathGuard,
    rasterizer: Option<Arc<dyn Rasterizer>>,
    recognizer: Option<Arc<dyn Recognizer>>,
    output_override: Option<PathBuf>,
}

impl OcrSessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider used for the default HTTP recognizer and default model.
    pub fn with_provider(mut self, provider: ProviderConfig) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_limits(mut self, limits: PipelineLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_guard(mut self, guard: PathGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_rasterizer<R: Rasterizer + 'static>(mut self, rasterizer: R) -> Self {
        self.rasterizer = Some(Arc::new(rasterizer));
        self
    }

    pub fn with_recognizer<R: Recognizer + 'static>(mut self, recognizer: R) -> Self {
        self.recognizer = Some(Arc::new(recognizer));
        self
    }

    /// Writes the result to `path` instead of next to the source.
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_override = Some(path.into());
        self
    }

    pub fn build(self) -> OcrResult<OcrSession> {
        self.limits
            .validate()
            .map_err(|reason| OcrError::config("limits", "", reason))?;

        let model = self
            .model
            .or_else(|| self.provider.as_ref().map(|p| p.model.clone()))
            .ok_or_else(|| OcrError::config("model", "", "no model or provider configured"))?;

        let recognizer: Arc<dyn Recognizer> = match (self.recognizer, self.provider) {
            (Some(recognizer), _) => recognizer,
            (None, Some(provider)) => Arc::new(HttpRecognizer::new(provider, &self.limits)),
            (None, None) => {
                return Err(OcrError::config(
                    "provider",
                    "",
                    "no recognizer or provider configured",
                ));
            }
        };
        let rasterizer = self
            .rasterizer
            .unwrap_or_else(|| Arc::new(ResvgRasterizer::new(self.limits.rasterize_timeout)));

        Ok(OcrSession {
            model,
            limits: self.limits,
            guard: self.guard,
            cache: ContentCache::new(self.guard),
            rasterizer,
            recognizer,
            output_override: self.output_override,
        })
    }
}
