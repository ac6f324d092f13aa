//! Checked numeric conversions between world coordinates, pixel indices and
//! 8-bit samples.
//!
//! # Assumptions
//!
//! ## Raster dimensions (`usize` ↔ `f64`)
//! `usize` to `f64` conversions are unchecked. A 0.5625° cell at the browse
//! resolution is 2048 pixels across; `f64` represents every integer below
//! 2^53 exactly.
//!
//! ## Pixel coordinates (`f64` → `usize`)
//! Fractional pixel positions come out of a projection and may be negative,
//! NaN, or past the raster edge, so every conversion to an index is checked.
//!
//! ## Samples (`f64` → `u8`)
//! Resampled colour values are rounded to nearest and saturate at 0 and 255.

/// Convert a float to a pixel index, returning `None` if out of bounds.
///
/// This function handles:
/// - Negative values (returns `None`)
/// - Values at or past `max_value` (returns `None`)
/// - NaN values (returns `None`)
#[inline]
#[must_use]
pub fn f64_to_pixel_index(value: f64, max_value: usize) -> Option<usize> {
    if value.is_nan() || value < 0.0 {
        return None;
    }
    // Safety: value >= 0 and not NaN
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let index = value as usize;
    if index >= max_value {
        None
    } else {
        Some(index)
    }
}

/// Floor a fractional pixel position to a signed index.
///
/// Kernel footprints hang over the raster edge, so neighbours may be negative.
#[inline]
#[must_use]
pub fn f64_floor_to_isize(value: f64) -> isize {
    // Saturating cast: NaN becomes 0, infinities clamp
    #[allow(clippy::cast_possible_truncation)]
    let index = value.floor() as isize;
    index
}

/// Offset a signed base index and check it against `max_value`.
#[inline]
#[must_use]
pub fn neighbour_index(base: isize, offset: isize, max_value: usize) -> Option<usize> {
    let i = usize::try_from(base.checked_add(offset)?).ok()?;
    (i < max_value).then_some(i)
}

/// Round to nearest and saturate into `0..=255`.
#[inline]
#[must_use]
pub fn f64_to_u8_saturating(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    // Safety: clamped into u8 range above the cast
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let v = value.round().clamp(0.0, 255.0) as u8;
    v
}

/// Number of whole pixels covering `extent` at `resolution`, rounded to nearest.
///
/// Returns `None` unless the result is at least one pixel.
#[inline]
#[must_use]
pub fn extent_to_dimension(extent: f64, resolution: f64) -> Option<usize> {
    let n = (extent / resolution).round();
    if !n.is_finite() || n < 1.0 || n > f64::from(u32::MAX) {
        return None;
    }
    // Safety: range-checked above
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let dimension = n as usize;
    Some(dimension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f64_to_pixel_index() {
        assert_eq!(f64_to_pixel_index(0.0, 100), Some(0));
        assert_eq!(f64_to_pixel_index(50.5, 100), Some(50));
        assert_eq!(f64_to_pixel_index(99.9, 100), Some(99));
        assert_eq!(f64_to_pixel_index(100.0, 100), None);
        assert_eq!(f64_to_pixel_index(-1.0, 100), None);
        assert_eq!(f64_to_pixel_index(f64::NAN, 100), None);
    }

    #[test]
    fn test_floor_to_isize() {
        assert_eq!(f64_floor_to_isize(2.7), 2);
        assert_eq!(f64_floor_to_isize(-0.2), -1);
        assert_eq!(f64_floor_to_isize(f64::NAN), 0);
    }

    #[test]
    fn test_neighbour_index() {
        assert_eq!(neighbour_index(0, 1, 10), Some(1));
        assert_eq!(neighbour_index(0, -1, 10), None);
        assert_eq!(neighbour_index(9, 1, 10), None);
        assert_eq!(neighbour_index(isize::MAX, 1, 10), None);
    }

    #[test]
    fn test_u8_saturating() {
        assert_eq!(f64_to_u8_saturating(127.5), 128);
        assert_eq!(f64_to_u8_saturating(127.4), 127);
        assert_eq!(f64_to_u8_saturating(300.0), 255);
        assert_eq!(f64_to_u8_saturating(-3.0), 0);
        assert_eq!(f64_to_u8_saturating(f64::NAN), 0);
    }

    #[test]
    fn test_extent_to_dimension() {
        assert_eq!(extent_to_dimension(0.5625, 2.746_582_031_25e-4), Some(2048));
        assert_eq!(extent_to_dimension(0.1, 1.0), None);
        assert_eq!(extent_to_dimension(1.0, 0.0), None);
    }
}
