//! # Pipeline Limits
//!
//! Ceilings on input size, scene size and request time, plus the raster and
//! JPEG quality settings used for every diagram. [`PipelineLimits::validate`]
//! rejects values outside their usable range.
//!
//! ```rust
//! use excalidraw_ocr::config::PipelineLimits;
//!
//! let limits = PipelineLimits {
//!     max_elements: 0,
//!     ..PipelineLimits::default()
//! };
//! assert!(limits.validate().is_err());
//! assert!(PipelineLimits::default().validate().is_ok());
//! ```

use std::time::Duration;

/// Size, time and quality bounds applied to every diagram.
#[derive(Debug, Clone)]
pub struct PipelineLimits {
    /// Largest source file accepted, in bytes.
    pub max_file_bytes: u64,
    /// Largest decompressed scene document, in bytes.
    pub max_decompressed_bytes: usize,
    /// Most elements a scene may carry.
    pub max_elements: usize,
    /// Rasterization scale factor.
    pub render_scale: f32,
    /// Long-side cap of the uploaded image.
    pub max_upload_dimension: u32,
    pub jpeg_quality: u8,
    pub rasterize_timeout: Duration,
    pub request_timeout: Duration,
    /// Retries after the first recognition attempt.
    pub max_request_retries: u32,
    /// Recognition calls allowed per `rate_window`.
    pub rate_limit_calls: usize,
    pub rate_window: Duration,
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: 10 * 1024 * 1024,
            max_decompressed_bytes: 50 * 1024 * 1024,
            max_elements: 10_000,
            render_scale: 2.0,
            max_upload_dimension: 4096,
            jpeg_quality: 95,
            rasterize_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            max_request_retries: 3,
            rate_limit_calls: 10,
            rate_window: Duration::from_secs(60),
        }
    }
}

impl PipelineLimits {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_file_bytes == 0 || self.max_decompressed_bytes == 0 {
            return Err("Size limits must be greater than 0".to_string());
        }
        if self.max_elements == 0 {
            return Err("Element limit must be greater than 0".to_string());
        }
        if !(self.render_scale > 0.0 && self.render_scale.is_finite()) {
            return Err(format!("Invalid render scale: {}", self.render_scale));
        }
        if self.max_upload_dimension == 0 {
            return Err("Upload dimension must be greater than 0".to_string());
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(format!("JPEG quality out of range: {}", self.jpeg_quality));
        }
        if self.rate_limit_calls == 0 {
            return Err("Rate limit must allow at least one call".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let limits = PipelineLimits::default();
        assert!(limits.validate().is_ok());
        assert_eq!(limits.max_file_bytes, 10_485_760);
        assert_eq!(limits.max_elements, 10_000);
    }

    #[test]
    fn rejects_bad_quality_and_scale() {
        let mut limits = PipelineLimits {
            jpeg_quality: 0,
            ..PipelineLimits::default()
        };
        assert!(limits.validate().is_err());
        limits.jpeg_quality = 95;
        limits.render_scale = f32::NAN;
        assert!(limits.validate().is_err());
    }
}
