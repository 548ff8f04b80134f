//! Page geometry
//!
//! Pixel bounding boxes and their page-relative percentage form. All boxes use
//! a top-left origin with y growing downwards.

use serde::{Deserialize, Serialize};

/// Pixel size of a page in the space records are expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageDimensions {
    pub width: u32,
    pub height: u32,
}

impl PageDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Length of the page diagonal in pixels
    pub fn diagonal(&self) -> f64 {
        (self.width as f64).hypot(self.height as f64)
    }

    /// Bounding box covering the whole page
    pub fn full_box(&self) -> BoundingBox {
        BoundingBox::new(0.0, 0.0, self.width as f64, self.height as f64)
    }
}

/// Axis-aligned box in pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge
    pub x: f64,

    /// Top edge
    pub y: f64,

    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Create from edge coordinates
    pub fn from_edges(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self::new(left, top, (right - left).max(0.0), (bottom - top).max(0.0))
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Check whether two boxes share a region of positive area
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Calculate the area of intersection with another box
    pub fn intersection_area(&self, other: &BoundingBox) -> f64 {
        if !self.intersects(other) {
            return 0.0;
        }

        let x_overlap = self.right().min(other.right()) - self.x.max(other.x);
        let y_overlap = self.bottom().min(other.bottom()) - self.y.max(other.y);

        x_overlap * y_overlap
    }

    /// Smallest box containing both boxes
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox::from_edges(
            self.x.min(other.x),
            self.y.min(other.y),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    /// Grow the box by `dx` on the left and right and `dy` on the top and bottom
    pub fn expand(&self, dx: f64, dy: f64) -> BoundingBox {
        BoundingBox::new(
            self.x - dx,
            self.y - dy,
            self.width + 2.0 * dx,
            self.height + 2.0 * dy,
        )
    }

    /// Intersect with the page, returning `None` when nothing remains
    pub fn clamp_to(&self, dims: PageDimensions) -> Option<BoundingBox> {
        let clamped = BoundingBox::from_edges(
            self.x.max(0.0),
            self.y.max(0.0),
            self.right().min(dims.width as f64),
            self.bottom().min(dims.height as f64),
        );
        (!clamped.is_empty()).then_some(clamped)
    }

    /// Whole-pixel crop rectangle `(x, y, width, height)` inside the page
    pub fn pixel_rect(&self, dims: PageDimensions) -> Option<(u32, u32, u32, u32)> {
        let clamped = self.clamp_to(dims)?;
        let left = clamped.x.floor() as u32;
        let top = clamped.y.floor() as u32;
        let right = (clamped.right().ceil() as u32).min(dims.width);
        let bottom = (clamped.bottom().ceil() as u32).min(dims.height);
        if right <= left || bottom <= top {
            return None;
        }
        Some((left, top, right - left, bottom - top))
    }

    /// Euclidean distance between box centres
    pub fn center_distance(&self, other: &BoundingBox) -> f64 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        (ax - bx).hypot(ay - by)
    }

    /// Scale coordinates independently along each axis
    pub fn scale(&self, sx: f64, sy: f64) -> BoundingBox {
        BoundingBox::new(self.x * sx, self.y * sy, self.width * sx, self.height * sy)
    }

    pub fn to_percent(&self, dims: PageDimensions) -> PercentBox {
        let width = dims.width.max(1) as f64;
        let height = dims.height.max(1) as f64;
        PercentBox {
            x_percentage: self.x / width * 100.0,
            y_percentage: self.y / height * 100.0,
            width_percentage: self.width / width * 100.0,
            height_percentage: self.height / height * 100.0,
        }
    }
}

/// Page-relative box, each component in percent of the page size
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentBox {
    pub x_percentage: f64,
    pub y_percentage: f64,
    pub width_percentage: f64,
    pub height_percentage: f64,
}

impl PercentBox {
    pub fn to_pixels(&self, dims: PageDimensions) -> BoundingBox {
        let width = dims.width as f64;
        let height = dims.height as f64;
        BoundingBox::new(
            self.x_percentage / 100.0 * width,
            self.y_percentage / 100.0 * height,
            self.width_percentage / 100.0 * width,
            self.height_percentage / 100.0 * height,
        )
    }

    pub fn center(&self) -> (f64, f64) {
        (
            self.x_percentage + self.width_percentage / 2.0,
            self.y_percentage + self.height_percentage / 2.0,
        )
    }
}
