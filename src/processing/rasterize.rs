//! SVG to PNG rasterization.
//!
//! [`ResvgRasterizer`] parses the canvas with usvg, renders it with resvg and
//! writes a PNG. The system font database is loaded once and shared between
//! renders. Each render runs on a helper thread so a pathological document
//! cannot hold a pipeline worker past the configured timeout; the helper
//! thread is abandoned, not killed, when the deadline passes.

use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use resvg::tiny_skia;
use resvg::usvg;

use crate::error::{OcrError, OcrResult};

/// Dimensions of a written raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterInfo {
    pub width: u32,
    pub height: u32,
}

/// Renders SVG markup into a PNG file at `out`.
pub trait Rasterizer: Send + Sync {
    fn rasterize(&self, svg: &str, out: &Path, scale: f32) -> OcrResult<RasterInfo>;
}

#[derive(Debug, Clone)]
pub struct ResvgRasterizer {
    fontdb: Arc<usvg::fontdb::Database>,
    timeout: Duration,
}

impl ResvgRasterizer {
    pub fn new(timeout: Duration) -> Self {
        let mut fontdb = usvg::fontdb::Database::new();
        fontdb.load_system_fonts();
        tracing::debug!(faces = fontdb.len(), "Loaded system fonts");
        Self {
            fontdb: Arc::new(fontdb),
            timeout,
        }
    }
}

impl Rasterizer for ResvgRasterizer {
    fn rasterize(&self, svg: &str, out: &Path, scale: f32) -> OcrResult<RasterInfo> {
        let (tx, rx) = mpsc::channel();
        let fontdb = Arc::clone(&self.fontdb);
        let svg = svg.to_owned();

        std::thread::Builder::new()
            .name("rasterize".to_string())
            .spawn(move || {
                // receiver may be gone after a timeout
                let _ = tx.send(render_png(&svg, fontdb, scale));
            })
            .map_err(|e| OcrError::rasterize(format!("failed to spawn render thread: {}", e)))?;

        let (png, info) = match rx.recv_timeout(self.timeout) {
            Ok(result) => result?,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                return Err(OcrError::timeout(
                    "rasterization",
                    self.timeout.as_millis() as u64,
                ));
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(OcrError::rasterize("render thread exited without a result"));
            }
        };

        std::fs::write(out, png).map_err(|e| OcrError::io("write raster", out, e))?;
        tracing::debug!(
            width = info.width,
            height = info.height,
            out = %out.display(),
            "Rasterized canvas"
        );
        Ok(info)
    }
}

fn render_png(
    svg: &str,
    fontdb: Arc<usvg::fontdb::Database>,
    scale: f32,
) -> OcrResult<(Vec<u8>, RasterInfo)> {
    let mut opt = usvg::Options::default();
    opt.fontdb = fontdb;
    opt.font_family = "Arial".to_string();

    let tree = usvg::Tree::from_str(svg, &opt)
        .map_err(|e| OcrError::rasterize(format!("invalid SVG: {}", e)))?;

    let size = tree.size();
    let width = (size.width() * scale).ceil().max(1.0) as u32;
    let height = (size.height() * scale).ceil().max(1.0) as u32;

    let mut pixmap = tiny_skia::Pixmap::new(width, height)
        .ok_or_else(|| OcrError::rasterize(format!("cannot allocate {}x{} pixmap", width, height)))?;
    resvg::render(
        &tree,
        tiny_skia::Transform::from_scale(scale, scale),
        &mut pixmap.as_mut(),
    );

    let png = pixmap
        .encode_png()
        .map_err(|e| OcrError::rasterize(format!("PNG encoding failed: {}", e)))?;
    Ok((png, RasterInfo { width, height }))
}
