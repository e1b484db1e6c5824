//! Document-space to viewport-pixel geometry.
//!
//! All functions are pure and total: rectangles outside the nominal page
//! bounds are mapped, never clamped. Rotation, scale and page geometry are
//! always passed explicitly.

use crate::error::{Result, ViewerError};
use serde::{Deserialize, Serialize};

/// Width of the document-space reference box, in points (1/72 inch).
pub const REFERENCE_WIDTH_PT: f64 = 612.0;

/// Height of the document-space reference box, in points (1/72 inch).
pub const REFERENCE_HEIGHT_PT: f64 = 792.0;

/// Document-wide page rotation, clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// All rotations in clockwise order.
    pub const ALL: [Rotation; 4] = [
        Rotation::Deg0,
        Rotation::Deg90,
        Rotation::Deg180,
        Rotation::Deg270,
    ];

    /// Build a rotation from degrees. Any multiple of 90 is accepted,
    /// negative values included.
    pub fn from_degrees(degrees: i32) -> Result<Self> {
        if degrees % 90 != 0 {
            return Err(ViewerError::InvalidRotation(degrees));
        }
        Ok(match degrees.rem_euclid(360) {
            0 => Rotation::Deg0,
            90 => Rotation::Deg90,
            180 => Rotation::Deg180,
            _ => Rotation::Deg270,
        })
    }

    /// Rotation in degrees.
    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Next rotation on the clockwise ring.
    pub fn clockwise(self) -> Self {
        match self {
            Rotation::Deg0 => Rotation::Deg90,
            Rotation::Deg90 => Rotation::Deg180,
            Rotation::Deg180 => Rotation::Deg270,
            Rotation::Deg270 => Rotation::Deg0,
        }
    }

    /// Next rotation on the counterclockwise ring.
    pub fn counter_clockwise(self) -> Self {
        match self {
            Rotation::Deg0 => Rotation::Deg270,
            Rotation::Deg90 => Rotation::Deg0,
            Rotation::Deg180 => Rotation::Deg90,
            Rotation::Deg270 => Rotation::Deg180,
        }
    }

    /// True for 90 and 270, where on-screen width and height swap.
    pub fn is_sideways(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

/// Unrotated, unscaled page size in device-independent pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageGeometry {
    pub width: f64,
    pub height: f64,
}

impl PageGeometry {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned rectangle, either in page pixels or screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PageRect {
    pub top: f64,
    pub left: f64,
    pub height: f64,
    pub width: f64,
}

impl PageRect {
    pub fn new(top: f64, left: f64, height: f64, width: f64) -> Self {
        Self {
            top,
            left,
            height,
            width,
        }
    }

    /// Whether two rectangles match within `epsilon` on every field.
    pub fn approx_eq(&self, other: &PageRect, epsilon: f64) -> bool {
        (self.top - other.top).abs() <= epsilon
            && (self.left - other.left).abs() <= epsilon
            && (self.height - other.height).abs() <= epsilon
            && (self.width - other.width).abs() <= epsilon
    }
}

/// A point in document space: points, origin bottom-left, Y up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DocumentPoint {
    pub x: f64,
    pub y: f64,
}

/// A point on screen, relative to the page box's top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub left: f64,
    pub top: f64,
}

/// On-screen width of the page box.
pub fn page_width(geometry: &PageGeometry, rotation: Rotation, scale: f64) -> f64 {
    if rotation.is_sideways() {
        geometry.height * scale
    } else {
        geometry.width * scale
    }
}

/// On-screen height of the page box.
pub fn page_height(geometry: &PageGeometry, rotation: Rotation, scale: f64) -> f64 {
    if rotation.is_sideways() {
        geometry.width * scale
    } else {
        geometry.height * scale
    }
}

/// Map a rectangle in unscaled, unrotated page pixels to the rectangle to
/// paint on screen.
pub fn rotate_rect(
    rect: &PageRect,
    geometry: &PageGeometry,
    rotation: Rotation,
    scale: f64,
) -> PageRect {
    let PageGeometry { width, height } = *geometry;
    let mapped = match rotation {
        Rotation::Deg0 => *rect,
        Rotation::Deg90 => PageRect {
            top: rect.left,
            left: height - rect.top - rect.height,
            height: rect.width,
            width: rect.height,
        },
        Rotation::Deg180 => PageRect {
            top: height - rect.top - rect.height,
            left: width - rect.left - rect.width,
            height: rect.height,
            width: rect.width,
        },
        Rotation::Deg270 => PageRect {
            top: width - rect.left - rect.width,
            left: rect.top,
            height: rect.width,
            width: rect.height,
        },
    };
    scale_rect(&mapped, scale)
}

/// Inverse of [`rotate_rect`]: map a screen rectangle back to unscaled,
/// unrotated page pixels.
pub fn unrotate_rect(
    rect: &PageRect,
    geometry: &PageGeometry,
    rotation: Rotation,
    scale: f64,
) -> PageRect {
    let PageGeometry { width, height } = *geometry;
    let r = scale_rect(rect, 1.0 / scale);
    match rotation {
        Rotation::Deg0 => r,
        Rotation::Deg90 => PageRect {
            top: height - r.left - r.width,
            left: r.top,
            height: r.width,
            width: r.height,
        },
        Rotation::Deg180 => PageRect {
            top: height - r.top - r.height,
            left: width - r.left - r.width,
            height: r.height,
            width: r.width,
        },
        Rotation::Deg270 => PageRect {
            top: r.left,
            left: width - r.top - r.height,
            height: r.width,
            width: r.height,
        },
    }
}

fn scale_rect(rect: &PageRect, scale: f64) -> PageRect {
    PageRect {
        top: rect.top * scale,
        left: rect.left * scale,
        height: rect.height * scale,
        width: rect.width * scale,
    }
}

/// Map a document-space point to on-screen pixels within the page box,
/// for scroll targeting.
///
/// The point is first normalized against the 612x792pt reference box and
/// flipped to a top-left origin, then placed on the page and rotated.
pub fn point_to_pixels(
    point: &DocumentPoint,
    geometry: &PageGeometry,
    rotation: Rotation,
    scale: f64,
) -> ScreenPoint {
    let x = point.x / REFERENCE_WIDTH_PT * geometry.width;
    let y = (REFERENCE_HEIGHT_PT - point.y) / REFERENCE_HEIGHT_PT * geometry.height;

    let (left, top) = match rotation {
        Rotation::Deg0 => (x, y),
        Rotation::Deg90 => (geometry.height - y, x),
        Rotation::Deg180 => (geometry.width - x, geometry.height - y),
        Rotation::Deg270 => (y, geometry.width - x),
    };

    ScreenPoint {
        left: left * scale,
        top: top * scale,
    }
}

/// Offset of a page's top edge from the top of a vertically stacked layout.
///
/// `page_number` is 1-based; page 1 starts at 0.
pub fn page_top_offset(
    page_number: u32,
    geometry: &PageGeometry,
    rotation: Rotation,
    scale: f64,
    gap: f64,
) -> f64 {
    let index = page_number.saturating_sub(1) as f64;
    index * (page_height(geometry, rotation, scale) + gap)
}
