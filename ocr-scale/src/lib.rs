// SPDX-License-Identifier: MIT
//! # ocr-scale: Upload-Size Scaling for OCR Input
//!
//! Rendered diagrams can get very large (a wide whiteboard rendered at 2× easily
//! exceeds 10k pixels on its long side). Vision endpoints reject or silently
//! downsample such images, so the pipeline clamps the longest side before
//! encoding.
//!
//! ## Key Components
//!
//! - [`presets`]: Scaling plan computation (longest-side clamp, aspect preserved)
//! - [`cpu`]: CPU-based RGB scaling using fast_image_resize
//!
//! ## Usage Example
//!
//! ```rust
//! use ocr_scale::presets::{build_plan, ScaleTarget, Size};
//!
//! let plan = build_plan(Size { w: 8192, h: 2048 }, ScaleTarget::MaxLongSide(4096));
//! assert_eq!((plan.out.w, plan.out.h), (4096, 1024));
//! assert!(plan.needs_scaling());
//! ```

pub mod cpu;
pub mod presets;
