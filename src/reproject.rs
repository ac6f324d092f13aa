//! Warp a stretched granule into the pixel grid of one destination cell.
//!
//! Every destination pixel centre is projected into the source CRS and sampled
//! there. Validity is taken from the nearest source pixel, so the footprint
//! edge stays crisp; colour is resampled with the configured kernel over the
//! valid neighbours only. Output pixels outside the source footprint are
//! nodata, and the output grid is the cell itself, so clipping falls out of
//! the geometry.
//!
//! Projecting every pixel exactly is the dominant cost. Rows are instead
//! projected exactly every `approx_step` columns and interpolated linearly in
//! between, which stays well under a tenth of a source pixel for UTM to
//! lon/lat at browse resolutions.
//!
//! # Example
//!
//! ```rust,no_run
//! use hls_browse::config::{DestinationConfig, ResamplingKernel};
//! use hls_browse::lookup::TileLookup;
//! use hls_browse::reproject::{CellGrid, ReprojectOutcome, Reprojector};
//! # fn stretched() -> hls_browse::raster::RgbaRaster { unimplemented!() }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let lookup = TileLookup::from_json_file("lookup.json")?;
//!     let rgba = stretched();
//!     for cell in lookup.candidates("01LAC")? {
//!         let grid = CellGrid::for_cell(cell, &DestinationConfig::default())?;
//!         match Reprojector::new(&rgba).kernel(ResamplingKernel::Cubic).reproject(&grid)? {
//!             ReprojectOutcome::Contribution(raster) => println!("{}: {} px", grid.cell_id, raster.valid_count()),
//!             ReprojectOutcome::Empty => println!("{}: nothing to add", grid.cell_id),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use rayon::prelude::*;
use tracing::debug;

use crate::casting::{
    extent_to_dimension, f64_floor_to_isize, f64_to_pixel_index, f64_to_u8_saturating,
    neighbour_index,
};
use crate::config::{DestinationConfig, ResamplingKernel};
use crate::error::{BrowseError, Result};
use crate::geometry::projection::CoordTransformer;
use crate::geometry::{BoundingBox, GeoTransform};
use crate::lookup::CellCandidate;
use crate::raster::{RgbaRaster, ALPHA_VALID, RGBA};

/// Columns between exactly projected points within a row.
pub const DEFAULT_APPROX_STEP: usize = 16;

/// Points sampled along each edge when projecting a footprint.
const FOOTPRINT_EDGE_SAMPLES: usize = 21;

/// Lookup bounds are always geographic.
const LOOKUP_CRS: i32 = 4326;

/// Pixel geometry of one destination cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CellGrid {
    pub cell_id: String,
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub crs: i32,
}

impl CellGrid {
    /// Grid covering a lookup cell at the destination resolution.
    ///
    /// Dimensions are the cell extent divided by the resolution, rounded to
    /// the nearest pixel.
    pub fn for_cell(cell: &CellCandidate, destination: &DestinationConfig) -> Result<Self> {
        let bounds = if destination.crs == LOOKUP_CRS {
            cell.bounds()
        } else {
            CoordTransformer::new(LOOKUP_CRS, destination.crs)
                .and_then(|t| t.transform_bounds(&cell.bounds(), FOOTPRINT_EDGE_SAMPLES))
                .map_err(BrowseError::Projection)?
        };

        let (rx, ry) = destination.resolution;
        let dims = extent_to_dimension(bounds.width(), rx).zip(extent_to_dimension(bounds.height(), ry));
        let Some((width, height)) = dims else {
            return Err(BrowseError::InvalidData(format!(
                "cell {} is smaller than one pixel at resolution ({rx}, {ry})",
                cell.cell_id
            )));
        };

        Ok(Self {
            cell_id: cell.cell_id.clone(),
            width,
            height,
            transform: GeoTransform::for_bounds(&bounds, destination.resolution),
            crs: destination.crs,
        })
    }

    #[must_use]
    pub fn bounds(&self) -> BoundingBox {
        self.transform.bounds(self.width, self.height)
    }

    /// All-nodata raster in this grid.
    #[must_use]
    pub fn empty_raster(&self) -> RgbaRaster {
        RgbaRaster::empty(self.width, self.height, self.transform, self.crs)
    }
}

/// Result of warping a granule into one cell.
#[derive(Debug, Clone, PartialEq)]
pub enum ReprojectOutcome {
    /// At least one valid pixel landed in the cell.
    Contribution(RgbaRaster),
    /// The clipped footprint holds no valid pixel; nothing to merge.
    Empty,
}

impl ReprojectOutcome {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    #[must_use]
    pub fn into_raster(self) -> Option<RgbaRaster> {
        match self {
            Self::Contribution(raster) => Some(raster),
            Self::Empty => None,
        }
    }
}

/// Builder for warping one stretched raster into destination cells.
#[derive(Debug, Clone, Copy)]
pub struct Reprojector<'a> {
    source: &'a RgbaRaster,
    kernel: ResamplingKernel,
    approx_step: usize,
}

impl<'a> Reprojector<'a> {
    #[must_use]
    pub fn new(source: &'a RgbaRaster) -> Self {
        Self {
            source,
            kernel: ResamplingKernel::default(),
            approx_step: DEFAULT_APPROX_STEP,
        }
    }

    #[must_use]
    pub fn kernel(mut self, kernel: ResamplingKernel) -> Self {
        self.kernel = kernel;
        self
    }

    /// Columns between exact projections; 1 projects every pixel.
    #[must_use]
    pub fn approx_step(mut self, step: usize) -> Self {
        self.approx_step = step.max(1);
        self
    }

    /// Warp the source into `grid`.
    ///
    /// # Errors
    /// [`BrowseError::Projection`] if either CRS cannot be set up.
    pub fn reproject(&self, grid: &CellGrid) -> Result<ReprojectOutcome> {
        let src_crs = self.source.crs;
        let dst_crs = grid.crs;

        let footprint = CoordTransformer::new(src_crs, dst_crs)
            .and_then(|t| t.transform_bounds(&self.source.bounds(), FOOTPRINT_EDGE_SAMPLES))
            .map_err(BrowseError::Projection)?;
        if !footprint.intersects(&grid.bounds()) {
            debug!(cell = %grid.cell_id, "Source footprint misses cell");
            return Ok(ReprojectOutcome::Empty);
        }
        CoordTransformer::new(dst_crs, src_crs).map_err(BrowseError::Projection)?;

        let mut pixels = vec![0_u8; grid.width * grid.height * RGBA];
        pixels
            .par_chunks_mut(grid.width * RGBA)
            .enumerate()
            .for_each_init(
                || CoordTransformer::new(dst_crs, src_crs).ok(),
                |transformer, (row, out)| {
                    if let Some(t) = transformer {
                        self.fill_row(t, grid, row, out);
                    }
                },
            );

        let raster = RgbaRaster::from_pixels(grid.width, grid.height, pixels, grid.transform, grid.crs)?;
        let valid = raster.valid_count();
        debug!(cell = %grid.cell_id, valid, kernel = ?self.kernel, "Reprojected into cell");

        if valid == 0 {
            Ok(ReprojectOutcome::Empty)
        } else {
            Ok(ReprojectOutcome::Contribution(raster))
        }
    }

    fn fill_row(&self, t: &CoordTransformer, grid: &CellGrid, row: usize, out: &mut [u8]) {
        let coords = source_coords_for_row(t, grid, &self.source.transform, row, self.approx_step);
        for (col, coord) in coords.into_iter().enumerate() {
            let Some((sx, sy)) = coord else { continue };
            if let Some(rgba) = self.sample(sx, sy) {
                out[col * RGBA..(col + 1) * RGBA].copy_from_slice(&rgba);
            }
        }
    }

    /// Sample at a fractional source pixel position.
    fn sample(&self, sx: f64, sy: f64) -> Option<[u8; 4]> {
        let src = self.source;
        let ix = f64_to_pixel_index(sx, src.width)?;
        let iy = f64_to_pixel_index(sy, src.height)?;
        let nearest = iy * src.width + ix;
        if !src.is_valid(nearest) {
            return None;
        }

        let p = src.rgba(nearest);
        let nearest_rgb = [p[0], p[1], p[2]];
        let rgb = match self.kernel {
            ResamplingKernel::Nearest => nearest_rgb,
            ResamplingKernel::Bilinear => self.convolve(sx, sy, 1, bilinear_weight).unwrap_or(nearest_rgb),
            ResamplingKernel::Cubic => self.convolve(sx, sy, 2, cubic_weight).unwrap_or(nearest_rgb),
        };
        Some([rgb[0], rgb[1], rgb[2], ALPHA_VALID])
    }

    /// Separable convolution over valid neighbours, weights renormalised.
    ///
    /// `radius` is 1 for a 2x2 footprint and 2 for 4x4.
    // Allow cast precision loss: neighbour offsets are tiny
    #[allow(clippy::cast_precision_loss)]
    fn convolve(&self, sx: f64, sy: f64, radius: isize, weight: fn(f64) -> f64) -> Option<[u8; 3]> {
        let src = self.source;
        // source pixel centres sit at i + 0.5
        let u = sx - 0.5;
        let v = sy - 0.5;
        let x0 = f64_floor_to_isize(u);
        let y0 = f64_floor_to_isize(v);
        let fx = u - x0 as f64;
        let fy = v - y0 as f64;

        let mut acc = [0.0_f64; 3];
        let mut weight_sum = 0.0;
        for dy in (1 - radius)..=radius {
            let Some(yy) = neighbour_index(y0, dy, src.height) else { continue };
            let wy = weight(dy as f64 - fy);
            if wy == 0.0 {
                continue;
            }
            for dx in (1 - radius)..=radius {
                let Some(xx) = neighbour_index(x0, dx, src.width) else { continue };
                let i = yy * src.width + xx;
                if !src.is_valid(i) {
                    continue;
                }
                let w = wy * weight(dx as f64 - fx);
                if w == 0.0 {
                    continue;
                }
                let p = src.rgba(i);
                for (a, &c) in acc.iter_mut().zip(&p[..3]) {
                    *a += w * f64::from(c);
                }
                weight_sum += w;
            }
        }

        if weight_sum <= 1e-6 {
            return None;
        }
        Some(acc.map(|a| f64_to_u8_saturating(a / weight_sum)))
    }
}

/// Warp `source` into the grid of a lookup cell.
pub fn reproject_to_cell(
    source: &RgbaRaster,
    cell: &CellCandidate,
    destination: &DestinationConfig,
    kernel: ResamplingKernel,
) -> Result<ReprojectOutcome> {
    let grid = CellGrid::for_cell(cell, destination)?;
    Reprojector::new(source).kernel(kernel).reproject(&grid)
}

fn bilinear_weight(d: f64) -> f64 {
    (1.0 - d.abs()).max(0.0)
}

/// Keys cubic convolution kernel, a = -0.5.
fn cubic_weight(d: f64) -> f64 {
    const A: f64 = -0.5;
    let d = d.abs();
    if d <= 1.0 {
        ((A + 2.0) * d - (A + 3.0)) * d * d + 1.0
    } else if d < 2.0 {
        ((A * d - 5.0 * A) * d + 8.0 * A) * d - 4.0 * A
    } else {
        0.0
    }
}

/// Fractional source pixel position of every destination pixel centre in a row.
///
/// Exact projection every `step` columns (and at the last column), linear
/// interpolation in between. Spans whose endpoints fail to project fall back
/// to exact projection per pixel.
// Allow cast precision loss: column and row indices are far below 2^52
#[allow(clippy::cast_precision_loss)]
fn source_coords_for_row(
    t: &CoordTransformer,
    grid: &CellGrid,
    source: &GeoTransform,
    row: usize,
    step: usize,
) -> Vec<Option<(f64, f64)>> {
    let exact = |col: usize| -> Option<(f64, f64)> {
        let (x, y) = grid.transform.pixel_to_world(col as f64 + 0.5, row as f64 + 0.5);
        let (wx, wy) = t.transform(x, y).ok()?;
        let (px, py) = source.world_to_pixel(wx, wy);
        (px.is_finite() && py.is_finite()).then_some((px, py))
    };

    let width = grid.width;
    let mut coords = vec![None; width];
    if width == 0 {
        return coords;
    }
    let step = step.max(1);

    let mut start = 0;
    let mut start_coord = exact(0);
    coords[0] = start_coord;
    while start + 1 < width {
        let end = (start + step).min(width - 1);
        let end_coord = exact(end);
        match (start_coord, end_coord) {
            (Some(a), Some(b)) => {
                let span = (end - start) as f64;
                for (col, slot) in coords.iter_mut().enumerate().take(end).skip(start + 1) {
                    let f = (col - start) as f64 / span;
                    *slot = Some((a.0 + f * (b.0 - a.0), a.1 + f * (b.1 - a.1)));
                }
            }
            _ => {
                for (col, slot) in coords.iter_mut().enumerate().take(end).skip(start + 1) {
                    *slot = exact(col);
                }
            }
        }
        coords[end] = end_coord;
        start = end;
        start_coord = end_coord;
    }
    coords
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::projection::project_point;

    const RES: f64 = 0.001;

    fn dest() -> DestinationConfig {
        DestinationConfig { crs: 4326, resolution: (RES, RES) }
    }

    /// Geographic source raster aligned with the destination grid.
    fn aligned_source(width: usize, height: usize, origin: (f64, f64), f: impl Fn(usize, usize) -> [u8; 4]) -> RgbaRaster {
        let mut r = RgbaRaster::empty(width, height, GeoTransform::new(origin.0, origin.1, RES, RES), 4326);
        for y in 0..height {
            for x in 0..width {
                let o = (y * width + x) * RGBA;
                r.pixels[o..o + RGBA].copy_from_slice(&f(x, y));
            }
        }
        r
    }

    fn cell(minx: f64, miny: f64, maxx: f64, maxy: f64) -> CellCandidate {
        CellCandidate::new("320071", BoundingBox::new(minx, miny, maxx, maxy))
    }

    #[test]
    fn test_cell_grid_dimensions() {
        let c = cell(-180.0, 89.4375, -179.4375, 90.0);
        let grid = CellGrid::for_cell(&c, &DestinationConfig::default()).unwrap();
        assert_eq!((grid.width, grid.height), (2048, 2048));
        assert_eq!(grid.transform.origin_x, -180.0);
        assert_eq!(grid.transform.origin_y, 90.0);
    }

    #[test]
    fn test_aligned_identity_is_exact() {
        let source = aligned_source(10, 10, (10.0, 50.0), |x, y| [x as u8 * 10 + 1, y as u8 * 10 + 1, 7, 255]);
        let grid = CellGrid::for_cell(&cell(10.0, 49.99, 10.01, 50.0), &dest()).unwrap();
        for kernel in [ResamplingKernel::Bilinear, ResamplingKernel::Cubic, ResamplingKernel::Nearest] {
            let out = Reprojector::new(&source).kernel(kernel).reproject(&grid).unwrap();
            let raster = out.into_raster().unwrap();
            assert_eq!(raster.pixels, source.pixels, "{kernel:?}");
        }
    }

    #[test]
    fn test_partial_footprint_is_clipped() {
        // source covers only the western half of the cell
        let source = aligned_source(5, 10, (10.0, 50.0), |_, _| [90, 90, 90, 255]);
        let grid = CellGrid::for_cell(&cell(10.0, 49.99, 10.01, 50.0), &dest()).unwrap();
        let raster = Reprojector::new(&source).reproject(&grid).unwrap().into_raster().unwrap();
        assert_eq!(raster.valid_count(), 50);
        for y in 0..10 {
            assert!(raster.is_valid(y * 10 + 4));
            assert_eq!(raster.rgba(y * 10 + 5), [0, 0, 0, 0]);
        }
    }

    #[test]
    fn test_disjoint_footprint_is_empty() {
        let source = aligned_source(5, 5, (10.0, 50.0), |_, _| [1, 1, 1, 255]);
        let grid = CellGrid::for_cell(&cell(20.0, 49.99, 20.01, 50.0), &dest()).unwrap();
        assert!(Reprojector::new(&source).reproject(&grid).unwrap().is_empty());
    }

    #[test]
    fn test_all_nodata_overlap_is_empty() {
        let source = aligned_source(10, 10, (10.0, 50.0), |_, _| [0, 0, 0, 0]);
        let grid = CellGrid::for_cell(&cell(10.0, 49.99, 10.01, 50.0), &dest()).unwrap();
        assert_eq!(Reprojector::new(&source).reproject(&grid).unwrap(), ReprojectOutcome::Empty);
    }

    #[test]
    fn test_kernel_ignores_invalid_neighbours() {
        // destination shifted east by 0.4 source pixels: every output pixel
        // straddles a valid and a nodata column
        let source = aligned_source(4, 4, (10.0, 50.0), |x, _| {
            if x % 2 == 0 { [200, 100, 50, 255] } else { [0, 0, 0, 0] }
        });
        let shifted = cell(10.0 + 0.4 * RES, 50.0 - 4.0 * RES, 10.0 + 3.4 * RES, 50.0);
        let grid = CellGrid::for_cell(&shifted, &dest()).unwrap();
        assert_eq!((grid.width, grid.height), (3, 4));
        let raster = Reprojector::new(&source).reproject(&grid).unwrap().into_raster().unwrap();
        for y in 0..4 {
            assert_eq!(raster.rgba(y * 3), [200, 100, 50, 255]);
            assert_eq!(raster.rgba(y * 3 + 1), [0, 0, 0, 0]);
            assert_eq!(raster.rgba(y * 3 + 2), [200, 100, 50, 255]);
        }
    }

    #[test]
    fn test_bilinear_blends_valid_neighbours() {
        let source = aligned_source(2, 1, (10.0, 50.0), |x, _| if x == 0 { [100, 100, 100, 255] } else { [200, 200, 200, 255] });
        // one destination pixel centred on the shared edge of the two sources,
        // nudged west so the nearest pixel is well defined
        let c = cell(10.0 + 0.49 * RES, 50.0 - RES, 10.0 + 1.49 * RES, 50.0);
        let grid = CellGrid::for_cell(&c, &dest()).unwrap();
        let raster = Reprojector::new(&source).reproject(&grid).unwrap().into_raster().unwrap();
        let p = raster.rgba(0);
        assert!((148..=150).contains(&p[0]), "{p:?}");

        let nearest = Reprojector::new(&source).kernel(ResamplingKernel::Nearest).reproject(&grid).unwrap();
        assert_eq!(nearest.into_raster().unwrap().rgba(0), [100, 100, 100, 255]);
    }

    fn utm_source() -> RgbaRaster {
        let mut r = RgbaRaster::empty(400, 400, GeoTransform::new(500_000.0, 4_200_000.0, 30.0, 30.0), 32610);
        for p in r.pixels.chunks_exact_mut(RGBA) {
            p.copy_from_slice(&[100, 150, 200, 255]);
        }
        r
    }

    fn utm_cell() -> CellCandidate {
        let (lon, lat) = project_point(32610, 4326, 506_000.0, 4_194_000.0).unwrap();
        cell(lon - 0.02, lat - 0.02, lon + 0.02, lat + 0.02)
    }

    #[test]
    fn test_utm_to_geographic() {
        let source = utm_source();
        let outcome = reproject_to_cell(&source, &utm_cell(), &dest(), ResamplingKernel::Cubic).unwrap();
        let raster = outcome.into_raster().unwrap();
        assert_eq!((raster.width, raster.height), (40, 40));
        assert_eq!(raster.crs, 4326);
        assert_eq!(raster.valid_count(), 1600);
        assert!(raster.pixels.chunks_exact(RGBA).all(|p| p == [100, 150, 200, 255]));
    }

    #[test]
    fn test_approximate_rows_track_exact_projection() {
        let source = utm_source();
        let grid = CellGrid::for_cell(&utm_cell(), &dest()).unwrap();
        let t = CoordTransformer::new(4326, 32610).unwrap();
        for row in [0, 17, 39] {
            let approx = source_coords_for_row(&t, &grid, &source.transform, row, 16);
            let exact = source_coords_for_row(&t, &grid, &source.transform, row, 1);
            for (a, e) in approx.iter().zip(&exact) {
                let (a, e) = (a.unwrap(), e.unwrap());
                assert!((a.0 - e.0).abs() < 0.05 && (a.1 - e.1).abs() < 0.05, "{a:?} vs {e:?}");
            }
        }
    }

    #[test]
    fn test_kernel_weights() {
        assert_eq!(bilinear_weight(0.0), 1.0);
        assert_eq!(bilinear_weight(0.25), 0.75);
        assert_eq!(bilinear_weight(1.5), 0.0);
        assert_eq!(cubic_weight(0.0), 1.0);
        assert!(cubic_weight(1.0).abs() < 1e-12);
        assert!(cubic_weight(1.5) < 0.0);
        assert_eq!(cubic_weight(2.5), 0.0);
        // partition of unity
        let f = 0.3;
        let sum: f64 = [-1.0, 0.0, 1.0, 2.0].iter().map(|d| cubic_weight(d - f)).sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }
}
