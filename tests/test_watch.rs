mod common;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use common::{CountingRecognizer, StubRasterizer, labelled_box_scene, session_with, write_diagram};
use excalidraw_ocr::config::{PipelineLimits, WatchConfig};
use excalidraw_ocr::core::{Shutdown, StabilizationTracker};
use excalidraw_ocr::error::OcrResult;
use excalidraw_ocr::session::WatchReport;
use excalidraw_ocr::watch::{
    FileProcessor, ProcessOutcome, WatchDispatcher, WatchEvent, WatchEventKind,
};
use tempfile::TempDir;
use tokio::task::JoinHandle;

/// Sleeps through each run and records the peak number of concurrent runs.
#[derive(Default)]
struct SlowProcessor {
    running: AtomicUsize,
    peak: AtomicUsize,
    runs: AtomicUsize,
}

impl FileProcessor for SlowProcessor {
    fn process(&self, _path: &Path, _force: bool) -> OcrResult<ProcessOutcome> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(100));
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(ProcessOutcome::Reprocessed)
    }
}

fn fast_config(delay_minutes: u64) -> WatchConfig {
    WatchConfig {
        delay_minutes,
        stability_interval: Duration::from_millis(20),
        create_backoff_step: Duration::from_millis(5),
        poll_interval_override: Some(Duration::from_millis(50)),
        ..WatchConfig::default()
    }
}

fn short_delay_config(delay: Duration) -> WatchConfig {
    WatchConfig {
        delay_override: Some(delay),
        ..fast_config(0)
    }
}

async fn finish(handle: JoinHandle<OcrResult<WatchReport>>) -> WatchReport {
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn processing_is_bounded_by_concurrency() {
    let dir = TempDir::new().unwrap();
    let processor = Arc::new(SlowProcessor::default());
    let dispatcher = Arc::new(WatchDispatcher::new(fast_config(0), processor.clone()));

    let mut tasks = Vec::new();
    for i in 0..8 {
        let path = dir.path().join(format!("d{}.excalidraw.md", i));
        std::fs::write(&path, "x").unwrap();
        let dispatcher = Arc::clone(&dispatcher);
        tasks.push(tokio::spawn(async move { dispatcher.process_file(path).await }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(processor.runs.load(Ordering::SeqCst), 8);
    assert!(processor.peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(dispatcher.stats().processed, 8);
}

#[tokio::test]
async fn duplicate_events_within_window_dispatch_once() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("Board.excalidraw.md");
    std::fs::write(&path, "content").unwrap();

    let processor = Arc::new(SlowProcessor::default());
    let dispatcher = WatchDispatcher::new(fast_config(0), processor.clone());
    dispatcher
        .handle_event(WatchEvent::new(&path, WatchEventKind::Modified))
        .await;
    dispatcher
        .handle_event(WatchEvent::new(&path, WatchEventKind::Modified))
        .await;

    assert_eq!(processor.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn ignored_names_never_reach_the_processor() {
    let dir = TempDir::new().unwrap();
    let processor = Arc::new(SlowProcessor::default());
    let dispatcher = WatchDispatcher::new(fast_config(0), processor.clone());

    for name in [".Board.excalidraw.md", "Board.excalidraw.md.swp", "Board.md", "Board.excalidraw.md~"] {
        let path = dir.path().join(name);
        std::fs::write(&path, "content").unwrap();
        dispatcher
            .handle_event(WatchEvent::new(path, WatchEventKind::Created))
            .await;
    }
    assert_eq!(processor.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_files_are_unstable() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("Board.excalidraw.md");
    std::fs::write(&path, "").unwrap();

    let processor = Arc::new(SlowProcessor::default());
    let dispatcher = WatchDispatcher::new(fast_config(0), processor.clone());
    dispatcher
        .handle_event(WatchEvent::new(&path, WatchEventKind::Created))
        .await;
    assert_eq!(processor.runs.load(Ordering::SeqCst), 0);
}

#[test]
fn new_events_restart_the_delay() {
    let tracker = StabilizationTracker::new(Duration::from_secs(5));
    let path = Path::new("/vault/Board.excalidraw.md");
    let t0 = Instant::now();

    tracker.touch_at(path, t0);
    tracker.touch_at(path, t0 + Duration::from_secs(2));

    assert!(tracker.drain_ready_at(t0 + Duration::from_secs(5)).is_empty());
    assert_eq!(tracker.drain_ready_at(t0 + Duration::from_secs(7)), vec![path.to_path_buf()]);
    assert_eq!(tracker.pending_count(), 0);
}

#[tokio::test]
async fn deletion_clears_queued_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("Board.excalidraw.md");
    std::fs::write(&path, "content").unwrap();

    let dispatcher = WatchDispatcher::new(fast_config(10), Arc::new(SlowProcessor::default()));
    dispatcher
        .handle_event(WatchEvent::new(&path, WatchEventKind::Created))
        .await;
    assert_eq!(dispatcher.tracker().pending_count(), 1);

    std::fs::remove_file(&path).unwrap();
    dispatcher
        .handle_event(WatchEvent::new(&path, WatchEventKind::Deleted))
        .await;
    assert_eq!(dispatcher.tracker().pending_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn watch_loop_processes_existing_files_and_stops() {
    let dir = TempDir::new().unwrap();
    write_diagram(dir.path(), "Board.excalidraw.md", &labelled_box_scene("hello"));
    let recognizer = CountingRecognizer::new("hello");
    let session = Arc::new(session_with(
        StubRasterizer::default(),
        recognizer.clone(),
        PipelineLimits::default(),
    ));

    let shutdown = Shutdown::new();
    let folder = dir.path().to_path_buf();
    let handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { session.watch_loop(&folder, fast_config(0), shutdown).await })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    shutdown.trigger();
    let report = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(report.stats.processed, 1);
    assert_eq!(report.stats.errors, 0);
    assert!(report.pending.is_empty());
    assert_eq!(recognizer.calls(), 1);
    assert!(dir.path().join("Board.md").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn watch_loop_reports_files_still_pending() {
    let dir = TempDir::new().unwrap();
    let session = Arc::new(session_with(
        StubRasterizer::default(),
        CountingRecognizer::new("x"),
        PipelineLimits::default(),
    ));

    let shutdown = Shutdown::new();
    let folder = dir.path().to_path_buf();
    let handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { session.watch_loop(&folder, fast_config(1), shutdown).await })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    write_diagram(dir.path(), "Late.excalidraw.md", &labelled_box_scene("late"));
    tokio::time::sleep(Duration::from_millis(1500)).await;
    shutdown.trigger();

    let report = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(report.stats.processed, 0);
    let pending: Vec<_> = report
        .pending
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(pending, vec!["Late.excalidraw.md"]);
}

#[tokio::test]
async fn invalid_watch_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    let session = Arc::new(session_with(
        StubRasterizer::default(),
        CountingRecognizer::new("x"),
        PipelineLimits::default(),
    ));
    let config = WatchConfig {
        concurrency: 0,
        ..WatchConfig::default()
    };
    let err = session
        .watch_loop(dir.path(), config, Shutdown::new())
        .await
        .unwrap_err();
    assert_eq!(err.category(), "config");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_during_initial_pass_skips_queued_files() {
    let dir = TempDir::new().unwrap();
    for i in 0..8 {
        write_diagram(dir.path(), &format!("D{}.excalidraw.md", i), &labelled_box_scene("slow"));
    }
    let recognizer = CountingRecognizer::slow("slow", Duration::from_millis(400));
    let session = Arc::new(session_with(
        StubRasterizer::default(),
        recognizer.clone(),
        PipelineLimits::default(),
    ));
    let config = WatchConfig {
        concurrency: 1,
        ..fast_config(0)
    };

    let shutdown = Shutdown::new();
    let folder = dir.path().to_path_buf();
    let started = Instant::now();
    let handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { session.watch_loop(&folder, config, shutdown).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.trigger();
    let report = finish(handle).await;

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(report.stats.processed, 1);
    assert_eq!(report.stats.skipped, 7);
    assert_eq!(recognizer.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn file_created_during_watch_is_processed_after_delay() {
    let dir = TempDir::new().unwrap();
    let recognizer = CountingRecognizer::new("late");
    let session = Arc::new(session_with(
        StubRasterizer::default(),
        recognizer.clone(),
        PipelineLimits::default(),
    ));

    let shutdown = Shutdown::new();
    let folder = dir.path().to_path_buf();
    let handle = {
        let shutdown = shutdown.clone();
        let config = short_delay_config(Duration::from_millis(300));
        tokio::spawn(async move { session.watch_loop(&folder, config, shutdown).await })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    write_diagram(dir.path(), "Late.excalidraw.md", &labelled_box_scene("late"));
    tokio::time::sleep(Duration::from_millis(1500)).await;
    shutdown.trigger();
    let report = finish(handle).await;

    assert_eq!(report.stats.processed, 1);
    assert_eq!(report.stats.errors, 0);
    assert!(report.pending.is_empty());
    assert_eq!(recognizer.calls(), 1);
    assert!(dir.path().join("Late.md").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn file_deleted_inside_delay_is_never_processed() {
    let dir = TempDir::new().unwrap();
    let recognizer = CountingRecognizer::new("gone");
    let session = Arc::new(session_with(
        StubRasterizer::default(),
        recognizer.clone(),
        PipelineLimits::default(),
    ));

    let shutdown = Shutdown::new();
    let folder = dir.path().to_path_buf();
    let handle = {
        let shutdown = shutdown.clone();
        let config = short_delay_config(Duration::from_millis(600));
        tokio::spawn(async move { session.watch_loop(&folder, config, shutdown).await })
    };

    tokio::time::sleep(Duration::from_millis(300)).await;
    let path = write_diagram(dir.path(), "Gone.excalidraw.md", &labelled_box_scene("gone"));
    tokio::time::sleep(Duration::from_millis(200)).await;
    std::fs::remove_file(&path).unwrap();
    tokio::time::sleep(Duration::from_millis(1000)).await;
    shutdown.trigger();
    let report = finish(handle).await;

    assert_eq!(report.stats.processed, 0);
    assert_eq!(report.stats.errors, 0);
    assert!(report.pending.is_empty());
    assert_eq!(recognizer.calls(), 0);
}
