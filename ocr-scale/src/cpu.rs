// SPDX-License-Identifier: MIT
// CPU scaler built on fast_image_resize (SIMD-accelerated).
// RGB8 in → RGB8 out, tightly packed rows on both sides.

use fast_image_resize as fir;
use fir::images::{TypedImage, TypedImageRef};
use fir::pixels::U8x3;
use fir::{FilterType, ResizeAlg, ResizeOptions, Resizer};

use crate::presets::ScalePlan;

#[derive(Debug)]
pub enum ScaleError {
    BufferTooSmall { expected: usize, actual: usize },
    Fir(fir::ResizeError),
    ImageBuf(fir::ImageBufferError),
}

impl From<fir::ResizeError> for ScaleError { fn from(e: fir::ResizeError) -> Self { Self::Fir(e) } }
impl From<fir::ImageBufferError> for ScaleError { fn from(e: fir::ImageBufferError) -> Self { Self::ImageBuf(e) } }

impl std::fmt::Display for ScaleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScaleError::BufferTooSmall { expected, actual } => {
                write!(f, "Input buffer too small: expected {} bytes, got {}", expected, actual)
            }
            ScaleError::Fir(e) => write!(f, "Fast image resize error: {}", e),
            ScaleError::ImageBuf(e) => write!(f, "Image buffer error: {}", e),
        }
    }
}

impl std::error::Error for ScaleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScaleError::Fir(e) => Some(e),
            ScaleError::ImageBuf(e) => Some(e),
            _ => None,
        }
    }
}

/// Scale a tightly packed RGB8 buffer according to `plan`.
///
/// Uses Lanczos3 since the output goes to text recognition and thin pen
/// strokes must survive the downscale. Returns a new buffer of
/// `plan.out.w * plan.out.h * 3` bytes.
pub fn scale_rgb_cpu(
    resizer: &mut Resizer,
    src_rgb: &[u8],
    plan: &ScalePlan,
) -> Result<Vec<u8>, ScaleError> {
    let src = plan.input;
    let src_len = (src.w as usize) * (src.h as usize) * 3;
    if src_rgb.len() < src_len {
        return Err(ScaleError::BufferTooSmall {
            expected: src_len,
            actual: src_rgb.len(),
        });
    }

    let src_view = TypedImageRef::<U8x3>::from_buffer(src.w, src.h, &src_rgb[..src_len])?;

    let mut dst = vec![0u8; (plan.out.w as usize) * (plan.out.h as usize) * 3];
    {
        let mut dst_image = TypedImage::<U8x3>::from_buffer(plan.out.w, plan.out.h, &mut dst)?;
        let opts = ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Lanczos3));
        resizer.resize_typed::<U8x3>(&src_view, &mut dst_image, &opts)?;
    }

    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::{build_plan, ScaleTarget, Size};

    #[test]
    fn downscales_solid_image() {
        let input = Size { w: 64, h: 32 };
        let src = vec![200u8; 64 * 32 * 3];
        let plan = build_plan(input, ScaleTarget::MaxLongSide(16));
        let mut resizer = Resizer::new();
        let out = scale_rgb_cpu(&mut resizer, &src, &plan).unwrap();
        assert_eq!(out.len(), 16 * 8 * 3);
        assert!(out.iter().all(|&b| (199..=201).contains(&b)));
    }

    #[test]
    fn rejects_short_buffer() {
        let plan = build_plan(Size { w: 10, h: 10 }, ScaleTarget::MaxLongSide(5));
        let mut resizer = Resizer::new();
        let err = scale_rgb_cpu(&mut resizer, &[0u8; 12], &plan).unwrap_err();
        assert!(matches!(err, ScaleError::BufferTooSmall { .. }));
    }
}
