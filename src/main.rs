use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use excalidraw_ocr::config::{Provider, ProviderConfig, WatchConfig};
use excalidraw_ocr::core::Shutdown;
use excalidraw_ocr::session::OcrSession;
use tracing_subscriber::EnvFilter;

/// Extract text from hand-drawn Excalidraw diagrams.
///
/// Results are written next to each diagram and reused until the drawing
/// changes.
#[derive(Parser, Debug)]
#[command(name = "exocr", version)]
#[command(about = "✏️  OCR for Excalidraw diagrams with cached, incremental results")]
struct Args {
    /// Diagram file, or a folder of diagrams
    #[arg(help = "Path to an .excalidraw.md / .excalidraw file or a folder")]
    path: PathBuf,

    /// Output path override (single-file mode only)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Model override for the selected provider
    #[arg(short, long)]
    model: Option<String>,

    /// Recognition provider; detected from API keys when omitted
    #[arg(long, value_enum)]
    provider: Option<Provider>,

    /// Reprocess even when the cached result is current
    #[arg(short, long)]
    force: bool,

    /// Keep watching the folder for changes
    #[arg(short, long)]
    watch: bool,

    /// Minutes a file must stay unchanged before processing (watch mode)
    #[arg(long, conflicts_with = "no_delay")]
    delay: Option<u64>,

    /// Process files as soon as they are stable (watch mode)
    #[arg(long)]
    no_delay: bool,

    /// Maximum diagrams processed at once (watch mode)
    #[arg(long, default_value_t = 3)]
    concurrency: usize,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let provider = match ProviderConfig::from_env(args.provider) {
        Ok(provider) => provider.with_model(args.model.clone()),
        Err(e) => {
            tracing::error!("{}", e);
            return Ok(ExitCode::FAILURE);
        }
    };
    tracing::info!(provider = provider.name(), model = %provider.model, "Using recognition provider");

    let mut builder = OcrSession::builder().with_provider(provider);
    if let Some(output) = &args.output {
        if args.path.is_dir() || args.watch {
            tracing::error!("--output only applies to a single diagram file");
            return Ok(ExitCode::FAILURE);
        }
        builder = builder.with_output(output);
    }
    let session = Arc::new(builder.build().context("failed to configure session")?);

    if args.watch {
        if !args.path.is_dir() {
            tracing::error!(path = %args.path.display(), "--watch requires a folder");
            return Ok(ExitCode::FAILURE);
        }
        return watch(session, &args).await;
    }

    if args.path.is_dir() {
        batch(session, &args.path, args.force).await
    } else {
        single(session, args.path, args.force).await
    }
}

async fn single(session: Arc<OcrSession>, path: PathBuf, force: bool) -> Result<ExitCode> {
    let result = tokio::task::spawn_blocking(move || session.run_once(&path, force))
        .await
        .context("processing task failed")?;
    match result {
        Ok(result) => {
            println!("{}", result.text);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            tracing::error!(category = e.category(), "{}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn batch(session: Arc<OcrSession>, folder: &Path, force: bool) -> Result<ExitCode> {
    let config = WatchConfig::default();
    let paths = session
        .scan_folder(folder, &config)
        .with_context(|| format!("cannot scan {}", folder.display()))?;
    if paths.is_empty() {
        tracing::warn!(folder = %folder.display(), "No diagrams found");
        return Ok(ExitCode::SUCCESS);
    }

    let report = tokio::task::spawn_blocking(move || session.run_batch(&paths, force))
        .await
        .context("batch task failed")?;
    for path in &report.failed {
        tracing::error!(file = %path.display(), "Failed");
    }
    Ok(if report.errors > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn watch(session: Arc<OcrSession>, args: &Args) -> Result<ExitCode> {
    let delay_minutes = if args.no_delay {
        0
    } else {
        args.delay.unwrap_or_else(WatchConfig::from_env_delay)
    };
    let config = WatchConfig {
        delay_minutes,
        force: args.force,
        concurrency: args.concurrency,
        ..WatchConfig::default()
    };
    if let Err(reason) = config.validate() {
        tracing::error!("Invalid watch configuration: {}", reason);
        return Ok(ExitCode::FAILURE);
    }

    let shutdown = Shutdown::new();
    tokio::spawn(forward_signals(shutdown.clone()));

    let report = match session.watch_loop(&args.path, config, shutdown).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(category = e.category(), "{}", e);
            return Ok(ExitCode::FAILURE);
        }
    };
    Ok(if report.stats.errors > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Triggers shutdown on Ctrl-C, and on SIGTERM where available.
async fn forward_signals(shutdown: Shutdown) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    shutdown.trigger();
}
