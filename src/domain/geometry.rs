//! Viewport sizing, capture clipping and printed page geometry.

use serde::Serialize;

use super::format::ImageEncoding;

/// Largest width or height accepted for a viewport, in CSS pixels.
pub const MAX_DIMENSION: u32 = 2048;

/// Pixel dimensions used for page layout and image capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    /// Resolve raw query values against configured defaults.
    pub fn resolve(width: Option<&str>, height: Option<&str>, defaults: Viewport) -> Self {
        Self {
            width: resolve_dimension(width, defaults.width),
            height: resolve_dimension(height, defaults.height),
        }
    }

    /// Capture region covering the whole viewport.
    pub fn full_clip(self) -> ClipRect {
        ClipRect {
            x: 0,
            y: 0,
            width: self.width,
            height: self.height,
        }
    }
}

/// Parse a raw dimension, clamping to [`MAX_DIMENSION`].
///
/// Anything that is not a positive base-10 integer falls back to `default`.
/// Oversized values clamp rather than overflow, so `99999999999999999999`
/// yields [`MAX_DIMENSION`].
pub fn resolve_dimension(raw: Option<&str>, default: u32) -> u32 {
    let Some(raw) = raw else {
        return default;
    };
    let digits = raw.trim();
    let digits = digits.strip_prefix('+').unwrap_or(digits);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return default;
    }

    let significant = digits.trim_start_matches('0');
    if significant.is_empty() {
        return default;
    }
    if significant.len() > 4 {
        return MAX_DIMENSION;
    }

    match significant.parse::<u32>() {
        Ok(value) => value.min(MAX_DIMENSION),
        Err(_) => default,
    }
}

/// Region of the rendered page captured into an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Printed page layout for document output, in inches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub paper_width: f64,
    pub paper_height: f64,
    pub margin: f64,
    pub landscape: bool,
    pub print_background: bool,
}

impl PageGeometry {
    const CM_PER_INCH: f64 = 2.54;

    /// A4 portrait with a 1cm margin on every side.
    pub fn a4_portrait() -> Self {
        Self {
            paper_width: 21.0 / Self::CM_PER_INCH,
            paper_height: 29.7 / Self::CM_PER_INCH,
            margin: 1.0 / Self::CM_PER_INCH,
            landscape: false,
            print_background: true,
        }
    }
}

/// Geometry chosen for the emit stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Geometry {
    Page(PageGeometry),
    Clip {
        clip: ClipRect,
        encoding: ImageEncoding,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULTS: Viewport = Viewport {
        width: 1280,
        height: 720,
    };

    #[test]
    fn clamps_oversized_dimensions() {
        assert_eq!(resolve_dimension(Some("2049"), 1280), MAX_DIMENSION);
        assert_eq!(resolve_dimension(Some("5000"), 1280), MAX_DIMENSION);
        assert_eq!(
            resolve_dimension(Some("99999999999999999999"), 1280),
            MAX_DIMENSION
        );
        assert_eq!(resolve_dimension(Some("2048"), 1280), 2048);
    }

    #[test]
    fn invalid_or_non_positive_values_use_default() {
        for raw in ["", "0", "000", "-5", "abc", "12px", "1.5", " "] {
            assert_eq!(resolve_dimension(Some(raw), 1280), 1280, "raw = {raw:?}");
        }
        assert_eq!(resolve_dimension(None, 720), 720);
    }

    #[test]
    fn accepts_plain_positive_integers() {
        assert_eq!(resolve_dimension(Some("800"), 1280), 800);
        assert_eq!(resolve_dimension(Some(" 600 "), 1280), 600);
        assert_eq!(resolve_dimension(Some("+1"), 1280), 1);
        assert_eq!(resolve_dimension(Some("0042"), 1280), 42);
    }

    #[test]
    fn viewport_resolves_each_axis_independently() {
        let viewport = Viewport::resolve(Some("4096"), Some("nope"), DEFAULTS);
        assert_eq!(
            viewport,
            Viewport {
                width: MAX_DIMENSION,
                height: 720
            }
        );
    }

    #[test]
    fn full_clip_starts_at_origin() {
        let clip = Viewport {
            width: 800,
            height: 600,
        }
        .full_clip();
        assert_eq!(
            clip,
            ClipRect {
                x: 0,
                y: 0,
                width: 800,
                height: 600
            }
        );
    }

    #[test]
    fn a4_geometry_is_portrait_with_one_centimetre_margin() {
        let page = PageGeometry::a4_portrait();
        assert!(!page.landscape);
        assert!((page.paper_width - 8.267).abs() < 0.001);
        assert!((page.paper_height - 11.692).abs() < 0.001);
        assert!((page.margin - 0.3937).abs() < 0.0001);
    }
}
