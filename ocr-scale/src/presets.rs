// SPDX-License-Identifier: MIT
//! # Scaling Plan Computation
//!
//! Computes the output size for an image given a size constraint. Only
//! downscaling is ever planned: inputs already within bounds keep their size.
//!
//! - All computations use floating-point for precision but round to integers
//! - Clamp to minimum 1px to prevent zero-sized outputs

/// Represents a 2D size with width and height in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Size {
    pub w: u32,
    pub h: u32,
}

/// Defines the target size constraint for scaling operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScaleTarget {
    /// Clamp the longest side to a maximum value, derive the other side proportionally.
    MaxLongSide(u32),
}

/// Complete scaling plan computed from input parameters.
#[derive(Clone, Copy, Debug)]
pub struct ScalePlan {
    /// Original input dimensions
    pub input: Size,
    /// Target size constraint used for planning
    pub target: ScaleTarget,
    /// Final computed output dimensions
    pub out: Size,
}

impl ScalePlan {
    /// Whether executing the plan changes the image at all.
    pub fn needs_scaling(&self) -> bool {
        self.input != self.out
    }
}

/// Compute a scaling plan from input parameters.
///
/// # Arguments
/// * `input` - Source image dimensions
/// * `target` - Size constraint to apply
///
/// # Returns
/// A ScalePlan containing all parameters needed for scaling execution
pub fn build_plan(input: Size, target: ScaleTarget) -> ScalePlan {
    let (w, h) = match target {
        ScaleTarget::MaxLongSide(max_side) => fit_preserve(input, max_side),
    };
    ScalePlan {
        input,
        target,
        out: Size { w, h },
    }
}

/// Fit image within max_long on its longest dimension while preserving aspect ratio.
/// Never upscales.
fn fit_preserve(input: Size, max_long: u32) -> (u32, u32) {
    let (w, h) = (input.w as f64, input.h as f64);
    let long = w.max(h);
    if long <= max_long as f64 {
        return (input.w.max(1), input.h.max(1));
    }
    let s = max_long as f64 / long;
    (
        ((w * s) as u32).max(1),
        ((h * s) as u32).max(1),
    )
}
