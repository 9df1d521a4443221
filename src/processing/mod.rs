//! # Processing Module
//!
//! External collaborators of the pipeline: SVG rasterization, image
//! preparation for upload and text recognition. Rasterization and recognition
//! sit behind traits so the session can run against in-process fakes.

pub mod encode;
pub mod rasterize;
pub mod recognize;

pub use encode::{EncodedImage, prepare_upload};
pub use rasterize::{RasterInfo, Rasterizer, ResvgRasterizer};
pub use recognize::{HttpRecognizer, OCR_PROMPT, Recognizer, strip_code_fence};
