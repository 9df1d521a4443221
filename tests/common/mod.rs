//! Shared fixtures for the integration tests: diagram files built from scene
//! JSON, and collaborators that replace the font stack and the network.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use excalidraw_ocr::config::PipelineLimits;
use excalidraw_ocr::error::{OcrError, OcrResult};
use excalidraw_ocr::processing::{RasterInfo, Rasterizer, Recognizer};
use excalidraw_ocr::session::OcrSession;

/// A scene with one rectangle and one text label.
pub fn labelled_box_scene(label: &str) -> String {
    serde_json::json!({
        "type": "excalidraw",
        "version": 2,
        "elements": [
            {
                "type": "rectangle",
                "x": 0, "y": 0, "width": 120, "height": 60,
                "strokeColor": "#1e1e1e",
                "backgroundColor": "transparent",
                "strokeWidth": 2
            },
            {
                "type": "text",
                "x": 10, "y": 20, "width": 100, "height": 25,
                "text": label,
                "fontSize": 20,
                "fontFamily": 1
            }
        ]
    })
    .to_string()
}

/// Wraps a scene the way drawing notes store it.
pub fn diagram_markdown(scene_json: &str) -> String {
    let payload = lz_str::compress_to_base64(scene_json);
    format!(
        "---\nexcalidraw-plugin: parsed\n---\n\n# Drawing\n```compressed-json\n{}\n```\n%%\n",
        payload
    )
}

pub fn write_diagram(dir: &Path, name: &str, scene_json: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, diagram_markdown(scene_json)).unwrap();
    path
}

/// Writes a small white PNG and remembers where it wrote.
#[derive(Clone, Default)]
pub struct StubRasterizer {
    pub calls: Arc<AtomicUsize>,
    pub last_out: Arc<Mutex<Option<PathBuf>>>,
}

impl Rasterizer for StubRasterizer {
    fn rasterize(&self, svg: &str, out: &Path, _scale: f32) -> OcrResult<RasterInfo> {
        assert!(svg.starts_with("<svg"));
        self.calls.fetch_add(1, Ordering::SeqCst);
        image::RgbaImage::from_pixel(16, 8, image::Rgba([255, 255, 255, 255]))
            .save(out)
            .map_err(|e| OcrError::rasterize(e.to_string()))?;
        *self.last_out.lock().unwrap() = Some(out.to_path_buf());
        Ok(RasterInfo {
            width: 16,
            height: 8,
        })
    }
}

/// Returns a fixed reply and counts requests, optionally after a pause.
#[derive(Clone)]
pub struct CountingRecognizer {
    pub calls: Arc<AtomicUsize>,
    pub reply: String,
    pub latency: Duration,
}

impl CountingRecognizer {
    pub fn new(reply: &str) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            reply: reply.to_string(),
            latency: Duration::ZERO,
        }
    }

    pub fn slow(reply: &str, latency: Duration) -> Self {
        Self {
            latency,
            ..Self::new(reply)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Recognizer for CountingRecognizer {
    fn recognize(&self, image_base64: &str, model: &str) -> OcrResult<String> {
        assert!(!image_base64.is_empty());
        assert_eq!(model, "test-model");
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.latency);
        Ok(self.reply.clone())
    }
}

pub fn session_with(
    rasterizer: StubRasterizer,
    recognizer: CountingRecognizer,
    limits: PipelineLimits,
) -> OcrSession {
    OcrSession::builder()
        .with_model("test-model")
        .with_limits(limits)
        .with_rasterizer(rasterizer)
        .with_recognizer(recognizer)
        .build()
        .unwrap()
}
