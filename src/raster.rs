//! In-memory raster types passed between pipeline stages.
//!
//! Each stage takes its input by reference and produces a fresh raster, so a
//! raster is never mutated after it has been handed on.

use crate::error::{BrowseError, Result};
use crate::geometry::{BoundingBox, GeoTransform};

/// Samples per pixel in an [`RgbaRaster`].
pub const RGBA: usize = 4;

/// Alpha value of a valid pixel.
pub const ALPHA_VALID: u8 = 255;

/// One spectral band of digital numbers with georeferencing.
#[derive(Debug, Clone)]
pub struct BandRaster {
    pub width: usize,
    pub height: usize,
    /// Row-major samples
    pub data: Vec<f32>,
    pub transform: GeoTransform,
    /// EPSG code
    pub crs: i32,
    /// Nodata value declared by the file, if any
    pub nodata: Option<f64>,
}

impl BandRaster {
    pub fn new(
        width: usize,
        height: usize,
        data: Vec<f32>,
        transform: GeoTransform,
        crs: i32,
    ) -> Result<Self> {
        if data.len() != width * height {
            return Err(BrowseError::InvalidData(format!(
                "band has {} samples, expected {width}x{height}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
            transform,
            crs,
            nodata: None,
        })
    }

    #[must_use]
    pub fn with_nodata(mut self, nodata: Option<f64>) -> Self {
        self.nodata = nodata;
        self
    }

    #[must_use]
    pub fn bounds(&self) -> BoundingBox {
        self.transform.bounds(self.width, self.height)
    }

    /// Whether two bands share one pixel grid and can be stacked.
    #[must_use]
    pub fn same_grid(&self, other: &BandRaster) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.crs == other.crs
            && self.transform == other.transform
    }
}

/// Interleaved 8-bit red, green, blue, alpha raster.
///
/// Used both for a stretched granule in its native grid and for a destination
/// cell. A pixel is valid iff its alpha is non-zero; invalid pixels always have
/// all colour channels at 0.
#[derive(Debug, Clone, PartialEq)]
pub struct RgbaRaster {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
    pub transform: GeoTransform,
    pub crs: i32,
}

impl RgbaRaster {
    /// All-nodata raster.
    #[must_use]
    pub fn empty(width: usize, height: usize, transform: GeoTransform, crs: i32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width * height * RGBA],
            transform,
            crs,
        }
    }

    pub fn from_pixels(
        width: usize,
        height: usize,
        pixels: Vec<u8>,
        transform: GeoTransform,
        crs: i32,
    ) -> Result<Self> {
        if pixels.len() != width * height * RGBA {
            return Err(BrowseError::InvalidData(format!(
                "RGBA raster has {} bytes, expected {}",
                pixels.len(),
                width * height * RGBA
            )));
        }
        Ok(Self { width, height, pixels, transform, crs })
    }

    #[inline]
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    #[must_use]
    pub fn rgba(&self, index: usize) -> [u8; 4] {
        let o = index * RGBA;
        [self.pixels[o], self.pixels[o + 1], self.pixels[o + 2], self.pixels[o + 3]]
    }

    #[inline]
    #[must_use]
    pub fn is_valid(&self, index: usize) -> bool {
        self.pixels[index * RGBA + 3] != 0
    }

    #[must_use]
    pub fn valid_count(&self) -> usize {
        self.pixels.chunks_exact(RGBA).filter(|p| p[3] != 0).count()
    }

    #[must_use]
    pub fn bounds(&self) -> BoundingBox {
        self.transform.bounds(self.width, self.height)
    }

    /// Whether two rasters cover the same pixels of the same grid.
    #[must_use]
    pub fn same_grid(&self, other: &RgbaRaster) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.crs == other.crs
            && self.transform == other.transform
    }

    /// Colour channels only, interleaved RGB.
    #[must_use]
    pub fn rgb_pixels(&self) -> Vec<u8> {
        self.pixels
            .chunks_exact(RGBA)
            .flat_map(|p| [p[0], p[1], p[2]])
            .collect()
    }

    /// Rebuild from interleaved RGB, deriving alpha from colour: a pixel whose
    /// three channels are all 0 is nodata.
    pub fn from_rgb(
        width: usize,
        height: usize,
        rgb: &[u8],
        transform: GeoTransform,
        crs: i32,
    ) -> Result<Self> {
        if rgb.len() != width * height * 3 {
            return Err(BrowseError::InvalidData(format!(
                "RGB raster has {} bytes, expected {}",
                rgb.len(),
                width * height * 3
            )));
        }
        let pixels = rgb
            .chunks_exact(3)
            .flat_map(|p| {
                let alpha = if p.iter().any(|&v| v != 0) { ALPHA_VALID } else { 0 };
                [p[0], p[1], p[2], alpha]
            })
            .collect();
        Ok(Self { width, height, pixels, transform, crs })
    }
}
