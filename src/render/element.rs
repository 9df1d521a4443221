//! Scene element model as found in the decompressed diagram document.
//!
//! Fields are lenient: anything missing or `null` falls back to the drawing
//! defaults, and unrecognized kinds or stroke styles deserialize to a catch-all
//! instead of failing the whole scene.

use serde::Deserialize;

pub const DEFAULT_STROKE_COLOR: &str = "#000000";
pub const DEFAULT_FONT_FAMILY: &str = "Arial, sans-serif";
pub const DEFAULT_FONT_SIZE: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Freedraw,
    Line,
    Arrow,
    Rectangle,
    Ellipse,
    Text,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ElementKind {
    /// Kinds whose geometry is a point list relative to the element origin.
    pub fn is_point_based(self) -> bool {
        matches!(self, ElementKind::Freedraw | ElementKind::Line | ElementKind::Arrow)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrokeStyle {
    #[default]
    Solid,
    Dashed,
    Dotted,
    #[serde(other)]
    Other,
}

impl StrokeStyle {
    pub fn dash_array(self) -> Option<&'static str> {
        match self {
            StrokeStyle::Dashed => Some("12,8"),
            StrokeStyle::Dotted => Some("2,6"),
            StrokeStyle::Solid | StrokeStyle::Other => None,
        }
    }
}

/// Font family given either by name or by the editor's numeric font code.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FontFamily {
    Name(String),
    Code(f64),
}

impl FontFamily {
    /// CSS font-family value.
    pub fn css(&self) -> String {
        match self {
            FontFamily::Name(name) => name.clone(),
            FontFamily::Code(code) => match *code as i64 {
                1 => "Virgil, Segoe Print, cursive".to_string(),
                2 => "Helvetica, Arial, sans-serif".to_string(),
                3 => "Cascadia, Consolas, monospace".to_string(),
                _ => DEFAULT_FONT_FAMILY.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    #[serde(rename = "type", default)]
    pub kind: ElementKind,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub points: Option<Vec<[f64; 2]>>,
    pub stroke_color: Option<String>,
    pub background_color: Option<String>,
    pub stroke_width: Option<f64>,
    pub stroke_style: Option<StrokeStyle>,
    pub opacity: Option<f64>,
    pub is_deleted: Option<bool>,
    pub text: Option<String>,
    pub font_size: Option<f64>,
    pub font_family: Option<FontFamily>,
}

impl Element {
    pub fn is_deleted(&self) -> bool {
        self.is_deleted.unwrap_or(false)
    }

    pub fn position(&self) -> Option<(f64, f64)> {
        Some((self.x?, self.y?))
    }

    pub fn width(&self) -> f64 {
        self.width.unwrap_or(0.0)
    }

    pub fn height(&self) -> f64 {
        self.height.unwrap_or(0.0)
    }

    pub fn points(&self) -> &[[f64; 2]] {
        self.points.as_deref().unwrap_or(&[])
    }

    pub fn stroke_color(&self) -> &str {
        self.stroke_color.as_deref().unwrap_or(DEFAULT_STROKE_COLOR)
    }

    /// Fill color; `transparent` and a missing background both mean no fill.
    pub fn fill(&self) -> &str {
        match self.background_color.as_deref() {
            None | Some("transparent") => "none",
            Some(color) => color,
        }
    }

    pub fn stroke_width(&self) -> f64 {
        self.stroke_width.unwrap_or(1.0)
    }

    pub fn stroke_style(&self) -> StrokeStyle {
        self.stroke_style.unwrap_or_default()
    }

    /// Opacity scaled from 0..100 to 0..1. Out-of-range values pass through.
    pub fn opacity(&self) -> f64 {
        self.opacity.unwrap_or(100.0) / 100.0
    }

    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    pub fn font_size(&self) -> f64 {
        self.font_size.unwrap_or(DEFAULT_FONT_SIZE)
    }

    pub fn font_family(&self) -> String {
        self.font_family
            .as_ref()
            .map(FontFamily::css)
            .unwrap_or_else(|| DEFAULT_FONT_FAMILY.to_string())
    }
}
