//! EPSG-to-EPSG coordinate projection in pure Rust (proj4rs + crs-definitions).
//!
//! HLS granules arrive in UTM zones (EPSG:326xx / 327xx) and the browse grid is
//! geographic (EPSG:4326), so the hot path is UTM <-> lon/lat.

use proj4rs::proj::Proj;
use proj4rs::transform::transform;

use super::BoundingBox;

/// Project a single point from one CRS to another.
///
/// # Errors
/// Returns an error if either EPSG code is unknown or the transform fails.
#[inline]
pub fn project_point(source_epsg: i32, target_epsg: i32, x: f64, y: f64) -> Result<(f64, f64), String> {
    if source_epsg == target_epsg {
        return Ok((x, y));
    }
    CoordTransformer::new(source_epsg, target_epsg)?.transform(x, y)
}

/// Get PROJ4 string for an EPSG code using the crs-definitions database
#[inline]
#[must_use]
pub fn get_proj_string(epsg: i32) -> Option<&'static str> {
    u16::try_from(epsg).ok()
        .and_then(crs_definitions::from_code)
        .map(|def| def.proj4)
}

/// Check if an EPSG code represents a geographic (lon/lat) CRS
#[inline]
#[must_use]
pub fn is_geographic_crs(epsg: i32) -> bool {
    if let Some(proj_str) = get_proj_string(epsg) {
        proj_str.contains("+proj=longlat")
    } else {
        epsg == 4326 || (4000..5000).contains(&epsg)
    }
}

/// Reusable transformer between two EPSG codes.
///
/// Parsing PROJ strings is far more expensive than transforming a point, so a
/// reprojection builds one of these per cell and reuses it for every pixel.
pub struct CoordTransformer {
    source_epsg: i32,
    target_epsg: i32,
    projs: Option<(Proj, Proj)>,
    source_is_geographic: bool,
    target_is_geographic: bool,
}

impl CoordTransformer {
    /// # Errors
    /// Returns an error if either code is missing from the crs-definitions database.
    pub fn new(source_epsg: i32, target_epsg: i32) -> Result<Self, String> {
        let projs = if source_epsg == target_epsg {
            None
        } else {
            Some((parse_proj(source_epsg)?, parse_proj(target_epsg)?))
        };

        Ok(Self {
            source_epsg,
            target_epsg,
            projs,
            source_is_geographic: is_geographic_crs(source_epsg),
            target_is_geographic: is_geographic_crs(target_epsg),
        })
    }

    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.projs.is_none()
    }

    /// Transform one coordinate pair. Geographic coordinates are in degrees.
    ///
    /// # Errors
    /// Returns an error if proj4rs cannot transform the point.
    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64), String> {
        let Some((source, target)) = &self.projs else {
            return Ok((x, y));
        };

        // proj4rs works in radians for geographic coordinates
        let mut point = if self.source_is_geographic {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };

        transform(source, target, &mut point).map_err(|e| {
            format!(
                "Transform from EPSG:{} to EPSG:{} failed: {e:?}",
                self.source_epsg, self.target_epsg
            )
        })?;

        if self.target_is_geographic {
            Ok((point.0.to_degrees(), point.1.to_degrees()))
        } else {
            Ok((point.0, point.1))
        }
    }

    /// Project a bounding box by densifying its edges.
    ///
    /// Straight edges in one CRS are curves in another, so projecting only the
    /// corners under-estimates the extent.
    ///
    /// # Errors
    /// Returns an error if every sample point fails to project.
    // Allow cast precision loss: sample counts are tiny
    #[allow(clippy::cast_precision_loss)]
    pub fn transform_bounds(&self, bounds: &BoundingBox, samples_per_edge: usize) -> Result<BoundingBox, String> {
        let n = samples_per_edge.max(2);
        let mut points = Vec::with_capacity(4 * n);
        for i in 0..n {
            let t = i as f64 / (n - 1) as f64;
            let x = bounds.minx + t * bounds.width();
            let y = bounds.miny + t * bounds.height();
            points.push((x, bounds.miny));
            points.push((x, bounds.maxy));
            points.push((bounds.minx, y));
            points.push((bounds.maxx, y));
        }

        let projected = points
            .into_iter()
            .filter_map(|(x, y)| self.transform(x, y).ok())
            .filter(|(x, y)| x.is_finite() && y.is_finite());

        BoundingBox::enclosing(projected).ok_or_else(|| {
            format!(
                "No corner of the box projects from EPSG:{} to EPSG:{}",
                self.source_epsg, self.target_epsg
            )
        })
    }
}

fn parse_proj(epsg: i32) -> Result<Proj, String> {
    let proj_str = get_proj_string(epsg)
        .ok_or_else(|| format!("EPSG:{epsg} is not in the crs-definitions database"))?;
    Proj::from_proj_string(proj_str).map_err(|e| format!("Invalid projection EPSG:{epsg}: {e:?}"))
}
