//! # Render Engine
//!
//! Turns a scene's element list into a self-contained SVG canvas. Rendering is
//! a pure function of the element list: the same elements always produce the
//! same markup, byte for byte.
//!
//! ## Layout
//!
//! The canvas covers the bounding box of every non-deleted element, padded by
//! [`PADDING`] on each side. Element coordinates are translated so the padded
//! box origin sits at `(0, 0)`, and a white background rectangle fills the
//! canvas.
//!
//! ## Supported Kinds
//!
//! | Kind | Output |
//! |------|--------|
//! | freedraw, line | `<path>` polyline (two or more points) |
//! | arrow | polyline plus a two-segment head |
//! | rectangle | `<rect>` |
//! | ellipse | `<ellipse>` centered in the element box |
//! | text | one `<text>` per line |
//!
//! Any other kind is skipped but still counted as a visible element.

pub mod element;

use std::f64::consts::PI;
use std::fmt::Write as _;

pub use element::{Element, ElementKind, FontFamily, StrokeStyle};

use crate::error::{OcrError, OcrResult};

/// Padding added around the element bounding box.
pub const PADDING: f64 = 40.0;

/// Length of each arrow-head segment.
pub const ARROW_HEAD_LENGTH: f64 = 15.0;

/// Angle of each arrow-head segment relative to the final segment.
pub const ARROW_HEAD_ANGLE: f64 = PI / 6.0;

const LINE_HEIGHT: f64 = 1.2;

/// Rendered SVG document and its dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct Canvas {
    pub svg: String,
    pub width: u32,
    pub height: u32,
    /// Non-deleted elements, including kinds that produced no markup.
    pub element_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    fn extend(this: &mut Option<Self>, x: f64, y: f64) {
        match this {
            Some(b) => {
                b.min_x = b.min_x.min(x);
                b.min_y = b.min_y.min(y);
                b.max_x = b.max_x.max(x);
                b.max_y = b.max_y.max(y);
            }
            None => {
                *this = Some(Self {
                    min_x: x,
                    min_y: y,
                    max_x: x,
                    max_y: y,
                })
            }
        }
    }

    fn padded(self, padding: f64) -> Self {
        Self {
            min_x: self.min_x - padding,
            min_y: self.min_y - padding,
            max_x: self.max_x + padding,
            max_y: self.max_y + padding,
        }
    }
}

/// Unpadded bounding box of all non-deleted elements with a position.
///
/// Point-based elements contribute every point; other kinds contribute their
/// position and position plus size.
pub fn bounding_box(elements: &[Element]) -> Option<BoundingBox> {
    let mut bbox = None;
    for element in elements.iter().filter(|e| !e.is_deleted()) {
        let Some((x, y)) = element.position() else {
            continue;
        };
        let points = element.points();
        if element.kind.is_point_based() && !points.is_empty() {
            for [px, py] in points {
                BoundingBox::extend(&mut bbox, x + px, y + py);
            }
        } else {
            BoundingBox::extend(&mut bbox, x, y);
            BoundingBox::extend(&mut bbox, x + element.width(), y + element.height());
        }
    }
    bbox
}

/// Renders the element list onto a padded SVG canvas.
pub fn render(elements: &[Element]) -> OcrResult<Canvas> {
    if elements.is_empty() {
        return Err(OcrError::render("no elements found in diagram"));
    }
    let visible: Vec<&Element> = elements.iter().filter(|e| !e.is_deleted()).collect();
    if visible.is_empty() {
        return Err(OcrError::render("all elements are deleted"));
    }
    let bbox = bounding_box(elements)
        .ok_or_else(|| OcrError::render("no renderable geometry"))?
        .padded(PADDING);

    let width = (bbox.max_x - bbox.min_x) as u32;
    let height = (bbox.max_y - bbox.min_y) as u32;

    let mut svg = String::with_capacity(256 + visible.len() * 160);
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = width,
        h = height
    );
    let _ = write!(svg, r#"<rect width="{}" height="{}" fill="white"/>"#, width, height);
    svg.push_str("<g>");

    for element in &visible {
        let x = element.x.unwrap_or(0.0) - bbox.min_x;
        let y = element.y.unwrap_or(0.0) - bbox.min_y;
        render_element(&mut svg, element, x, y);
    }

    svg.push_str("</g></svg>");

    Ok(Canvas {
        svg,
        width,
        height,
        element_count: visible.len(),
    })
}

fn render_element(svg: &mut String, element: &Element, x: f64, y: f64) {
    let stroke = escape_xml(element.stroke_color());
    let stroke_width = element.stroke_width();
    let opacity = element.opacity();
    let dash = element
        .stroke_style()
        .dash_array()
        .map(|d| format!(r#" stroke-dasharray="{}""#, d))
        .unwrap_or_default();

    match element.kind {
        ElementKind::Freedraw | ElementKind::Line | ElementKind::Arrow => {
            let points = element.points();
            if points.len() < 2 {
                return;
            }
            let mut d = format!("M {} {}", x + points[0][0], y + points[0][1]);
            for [px, py] in &points[1..] {
                let _ = write!(d, " L {} {}", x + px, y + py);
            }
            let _ = write!(
                svg,
                r#"<path d="{}" stroke="{}" stroke-width="{}" fill="none" opacity="{}"{}/>"#,
                d, stroke, stroke_width, opacity, dash
            );

            if element.kind == ElementKind::Arrow {
                let [p1, p2] = [points[points.len() - 2], points[points.len() - 1]];
                let tip = (x + p2[0], y + p2[1]);
                let (left, right) = arrow_head(tip, (x + p1[0], y + p1[1]));
                let _ = write!(
                    svg,
                    r#"<path d="M {tx} {ty} L {lx} {ly} M {tx} {ty} L {rx} {ry}" stroke="{s}" stroke-width="{sw}" fill="none" opacity="{o}"/>"#,
                    tx = tip.0,
                    ty = tip.1,
                    lx = left.0,
                    ly = left.1,
                    rx = right.0,
                    ry = right.1,
                    s = stroke,
                    sw = stroke_width,
                    o = opacity
                );
            }
        }
        ElementKind::Rectangle => {
            let _ = write!(
                svg,
                r#"<rect x="{}" y="{}" width="{}" height="{}" stroke="{}" stroke-width="{}" fill="{}" opacity="{}"{}/>"#,
                x,
                y,
                element.width(),
                element.height(),
                stroke,
                stroke_width,
                escape_xml(element.fill()),
                opacity,
                dash
            );
        }
        ElementKind::Ellipse => {
            let (w, h) = (element.width(), element.height());
            let _ = write!(
                svg,
                r#"<ellipse cx="{}" cy="{}" rx="{}" ry="{}" stroke="{}" stroke-width="{}" fill="{}" opacity="{}"{}/>"#,
                x + w / 2.0,
                y + h / 2.0,
                w / 2.0,
                h / 2.0,
                stroke,
                stroke_width,
                escape_xml(element.fill()),
                opacity,
                dash
            );
        }
        ElementKind::Text => {
            let text = element.text();
            if text.is_empty() {
                return;
            }
            let font_size = element.font_size();
            let font_family = escape_xml(&element.font_family());
            for (i, line) in text.split('\n').enumerate() {
                let text_y = y + font_size + i as f64 * font_size * LINE_HEIGHT;
                let _ = write!(
                    svg,
                    r#"<text x="{}" y="{}" font-size="{}" font-family="{}" fill="{}" opacity="{}">{}</text>"#,
                    x,
                    text_y,
                    font_size,
                    font_family,
                    stroke,
                    opacity,
                    escape_xml(line)
                );
            }
        }
        ElementKind::Unknown => {}
    }
}

/// End points of the two arrow-head segments for an arrow ending at `tip`
/// and arriving from `from`.
pub fn arrow_head(tip: (f64, f64), from: (f64, f64)) -> ((f64, f64), (f64, f64)) {
    let angle = (tip.1 - from.1).atan2(tip.0 - from.0);
    let end = |offset: f64| {
        (
            tip.0 - ARROW_HEAD_LENGTH * (angle + offset).cos(),
            tip.1 - ARROW_HEAD_LENGTH * (angle + offset).sin(),
        )
    };
    (end(-ARROW_HEAD_ANGLE), end(ARROW_HEAD_ANGLE))
}

/// Escapes the five XML-reserved characters.
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
