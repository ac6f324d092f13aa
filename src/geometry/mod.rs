//! Coordinate types and projections.

pub mod projection;

use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in some coordinate reference system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl BoundingBox {
    #[must_use]
    pub fn new(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Self {
        Self { minx, miny, maxx, maxy }
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        self.maxx - self.minx
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.maxy - self.miny
    }

    /// Boxes touching only along an edge do not intersect.
    #[must_use]
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.minx < other.maxx
            && other.minx < self.maxx
            && self.miny < other.maxy
            && other.miny < self.maxy
    }

    #[must_use]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.minx && x <= self.maxx && y >= self.miny && y <= self.maxy
    }

    /// Smallest box covering all given points, `None` for an empty iterator.
    pub fn enclosing<I: IntoIterator<Item = (f64, f64)>>(points: I) -> Option<Self> {
        points.into_iter().fold(None, |acc, (x, y)| {
            Some(match acc {
                None => Self::new(x, y, x, y),
                Some(b) => Self::new(b.minx.min(x), b.miny.min(y), b.maxx.max(x), b.maxy.max(y)),
            })
        })
    }
}

/// North-up affine georeferencing: pixel (0, 0) has its top-left corner at
/// (`origin_x`, `origin_y`), x grows by `pixel_width` per column and y shrinks
/// by `pixel_height` per row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    #[must_use]
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self { origin_x, origin_y, pixel_width, pixel_height }
    }

    /// Transform anchored at the top-left corner of `bounds`.
    #[must_use]
    pub fn for_bounds(bounds: &BoundingBox, resolution: (f64, f64)) -> Self {
        Self::new(bounds.minx, bounds.maxy, resolution.0, resolution.1)
    }

    /// World coordinate of a (fractional) pixel position.
    /// Use `px + 0.5, py + 0.5` for the pixel centre.
    #[must_use]
    pub fn pixel_to_world(&self, px: f64, py: f64) -> (f64, f64) {
        (
            self.origin_x + px * self.pixel_width,
            self.origin_y - py * self.pixel_height,
        )
    }

    /// Fractional pixel position of a world coordinate.
    #[must_use]
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin_x) / self.pixel_width,
            (self.origin_y - y) / self.pixel_height,
        )
    }

    /// Extent covered by a `width` x `height` raster.
    #[must_use]
    pub fn bounds(&self, width: usize, height: usize) -> BoundingBox {
        // Allow cast precision loss: raster dimensions are far below 2^52
        #[allow(clippy::cast_precision_loss)]
        let (maxx, miny) = self.pixel_to_world(width as f64, height as f64);
        BoundingBox::new(self.origin_x, miny, maxx, self.origin_y)
    }
}
