//! Raster preparation for upload.
//!
//! The PNG is flattened onto white, clamped to the maximum long side and sent
//! as a base64 JPEG. Downscaling goes through `ocr_scale` so thin pen strokes
//! survive the resize.

use std::path::Path;

use base64::{Engine as _, engine::general_purpose};
use fast_image_resize::Resizer;
use image::codecs::jpeg::JpegEncoder;
use image::{RgbImage, RgbaImage};
use ocr_scale::cpu::scale_rgb_cpu;
use ocr_scale::presets::{ScaleTarget, Size, build_plan};

use crate::config::PipelineLimits;
use crate::error::{OcrError, OcrResult};

/// Base64 JPEG ready to embed in a recognition request.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub base64: String,
    pub width: u32,
    pub height: u32,
    /// Size of the JPEG before base64 encoding.
    pub jpeg_bytes: usize,
}

/// Loads the PNG at `png_path` and turns it into an upload-ready JPEG.
pub fn prepare_upload(png_path: &Path, limits: &PipelineLimits) -> OcrResult<EncodedImage> {
    let raster = image::open(png_path)
        .map_err(|e| OcrError::rasterize(format!("cannot read raster: {}", e)))?
        .to_rgba8();

    let rgb = flatten_on_white(&raster);
    let rgb = clamp_long_side(rgb, limits.max_upload_dimension)?;

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, limits.jpeg_quality)
        .encode_image(&rgb)
        .map_err(|e| OcrError::rasterize(format!("JPEG encoding failed: {}", e)))?;

    tracing::debug!(
        width = rgb.width(),
        height = rgb.height(),
        jpeg_bytes = jpeg.len(),
        "Prepared upload image"
    );

    Ok(EncodedImage {
        base64: general_purpose::STANDARD.encode(&jpeg),
        width: rgb.width(),
        height: rgb.height(),
        jpeg_bytes: jpeg.len(),
    })
}

/// Composites RGBA pixels over an opaque white background.
pub fn flatten_on_white(rgba: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let blend = |c: u8| -> u8 {
            let (c, a) = (c as u32, a as u32);
            ((c * a + 255 * (255 - a) + 127) / 255) as u8
        };
        image::Rgb([blend(r), blend(g), blend(b)])
    })
}

fn clamp_long_side(rgb: RgbImage, max_long_side: u32) -> OcrResult<RgbImage> {
    let plan = build_plan(
        Size {
            w: rgb.width(),
            h: rgb.height(),
        },
        ScaleTarget::MaxLongSide(max_long_side),
    );
    if !plan.needs_scaling() {
        return Ok(rgb);
    }

    tracing::info!(
        from_w = plan.input.w,
        from_h = plan.input.h,
        to_w = plan.out.w,
        to_h = plan.out.h,
        "Downscaling raster for upload"
    );
    let mut resizer = Resizer::new();
    let scaled = scale_rgb_cpu(&mut resizer, rgb.as_raw(), &plan)
        .map_err(|e| OcrError::rasterize(format!("downscale failed: {}", e)))?;
    RgbImage::from_raw(plan.out.w, plan.out.h, scaled)
        .ok_or_else(|| OcrError::rasterize("downscaled buffer has the wrong size"))
}
