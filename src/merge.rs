//! Compositing of a new contribution into a destination cell.
//!
//! Valid contribution pixels overwrite whatever the cell held; nodata pixels
//! in the contribution leave the cell untouched. The merged alpha is therefore
//! the OR of the two validity masks.
//!
//! Compositing is order-independent only when contributions do not overlap.
//! Where they do, the granule merged last wins.
//!
//! Compositing runs serially: it happens while the pipeline holds a cell lock,
//! and no rayon work may run under a cell lock.

use crate::error::{BrowseError, Result};
use crate::raster::{RgbaRaster, RGBA};

/// Composite `contribution` over `existing` (last valid wins per pixel).
///
/// # Errors
/// [`BrowseError::InvalidData`] if the two rasters do not share one pixel grid
/// (dimensions, CRS, origin and resolution).
pub fn composite(existing: &RgbaRaster, contribution: &RgbaRaster) -> Result<RgbaRaster> {
    if !existing.same_grid(contribution) {
        return Err(BrowseError::InvalidData(format!(
            "stored cell is {}x{} EPSG:{} {:?}, contribution is {}x{} EPSG:{} {:?}",
            existing.width,
            existing.height,
            existing.crs,
            existing.transform,
            contribution.width,
            contribution.height,
            contribution.crs,
            contribution.transform
        )));
    }

    let mut pixels = existing.pixels.clone();
    for (dst, src) in pixels
        .chunks_exact_mut(RGBA)
        .zip(contribution.pixels.chunks_exact(RGBA))
    {
        if src[3] != 0 {
            dst.copy_from_slice(src);
        }
    }

    Ok(RgbaRaster {
        pixels,
        ..existing.clone()
    })
}

/// Merge a contribution into an optional stored raster.
///
/// Without a stored raster the cell starts all-nodata, so the result is the
/// contribution itself.
pub fn merge_into_cell(existing: Option<&RgbaRaster>, contribution: &RgbaRaster) -> Result<RgbaRaster> {
    match existing {
        Some(stored) => composite(stored, contribution),
        None => Ok(contribution.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GeoTransform;

    const W: usize = 4;
    const H: usize = 2;

    fn raster(f: impl Fn(usize, usize) -> Option<[u8; 3]>) -> RgbaRaster {
        let mut r = RgbaRaster::empty(W, H, GeoTransform::new(-100.0, 40.0, 0.5, 0.5), 4326);
        for y in 0..H {
            for x in 0..W {
                if let Some([red, g, b]) = f(x, y) {
                    let o = (y * W + x) * RGBA;
                    r.pixels[o..o + RGBA].copy_from_slice(&[red, g, b, 255]);
                }
            }
        }
        r
    }

    fn west() -> RgbaRaster {
        raster(|x, _| (x < 2).then_some([10, 20, 30]))
    }

    fn east() -> RgbaRaster {
        raster(|x, _| (x >= 2).then_some([40, 50, 60]))
    }

    #[test]
    fn test_merge_into_empty_cell_is_identity() {
        let empty = RgbaRaster::empty(W, H, west().transform, 4326);
        assert_eq!(composite(&empty, &west()).unwrap(), west());
        assert_eq!(merge_into_cell(None, &west()).unwrap(), west());
    }

    #[test]
    fn test_non_overlapping_order_independent() {
        let ab = composite(&west(), &east()).unwrap();
        let ba = composite(&east(), &west()).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(ab.valid_count(), W * H);
        assert_eq!(ab.rgba(0), [10, 20, 30, 255]);
        assert_eq!(ab.rgba(3), [40, 50, 60, 255]);
    }

    #[test]
    fn test_overlapping_last_wins() {
        let a = raster(|_, _| Some([1, 1, 1]));
        let b = raster(|x, _| (x > 0).then_some([9, 9, 9]));
        let ab = composite(&a, &b).unwrap();
        let ba = composite(&b, &a).unwrap();
        assert_ne!(ab, ba);
        assert_eq!(ab.rgba(1), [9, 9, 9, 255]);
        assert_eq!(ba.rgba(1), [1, 1, 1, 255]);
        // pixel only `a` covers keeps `a` in both orders
        assert_eq!(ab.rgba(0), [1, 1, 1, 255]);
        assert_eq!(ba.rgba(0), [1, 1, 1, 255]);
    }

    #[test]
    fn test_nodata_never_erases() {
        let merged = composite(&west(), &RgbaRaster::empty(W, H, west().transform, 4326)).unwrap();
        assert_eq!(merged, west());
    }

    #[test]
    fn test_alpha_is_union_of_validity() {
        let a = raster(|x, y| (x == 0 && y == 0).then_some([5, 5, 5]));
        let b = raster(|x, y| (x == 3 && y == 1).then_some([6, 6, 6]));
        let merged = composite(&a, &b).unwrap();
        assert_eq!(merged.valid_count(), 2);
        assert!(merged.is_valid(0) && merged.is_valid(7));
    }

    #[test]
    fn test_dimension_mismatch() {
        let small = RgbaRaster::empty(2, 2, west().transform, 4326);
        let err = composite(&small, &west()).unwrap_err();
        assert!(matches!(err, BrowseError::InvalidData(_)));
    }

    #[test]
    fn test_shifted_grid_rejected() {
        let mut shifted = RgbaRaster::empty(W, H, GeoTransform::new(-99.5, 40.0, 0.5, 0.5), 4326);
        assert!(matches!(composite(&shifted, &west()), Err(BrowseError::InvalidData(_))));

        shifted.transform = GeoTransform::new(-100.0, 40.0, 0.25, 0.25);
        assert!(matches!(composite(&shifted, &west()), Err(BrowseError::InvalidData(_))));
    }
}
