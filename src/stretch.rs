//! Radiometric stretch from digital numbers to 8-bit display values.
//!
//! Samples at or below the lower threshold map to the low value, samples at or
//! above the upper threshold map to the high value, and everything in between
//! is interpolated on the transformed scale:
//!
//! ```text
//! out = high_value * (f(s) - f(lower)) / (f(upper) - f(lower))
//! ```
//!
//! where `f` is the identity ([`StretchMode::Linear`]) or `ln`
//! ([`StretchMode::Log`]). Interpolated values are rounded up and clamped into
//! `[low_value, high_value]`.
//!
//! # Example
//!
//! ```rust
//! use hls_browse::config::StretchMode;
//! use hls_browse::stretch::StretchParams;
//!
//! let params = StretchParams::new(StretchMode::Linear, 100.0, 1600.0, 0.0, 255.0).unwrap();
//! assert_eq!(params.apply(850.0, None), Some(128));
//! assert_eq!(params.apply(50.0, None), Some(0));
//! assert_eq!(params.apply(-9999.0, Some(-9999.0)), None);
//! ```

use rayon::prelude::*;
use tracing::debug;

use crate::config::{StretchConfig, StretchMode};
use crate::error::{BrowseError, Result};
use crate::raster::{BandRaster, RgbaRaster, ALPHA_VALID, RGBA};

/// Tolerance subtracted before rounding up, so values that are integral up to
/// floating point noise are not bumped to the next integer.
const CEIL_EPSILON: f64 = 1e-9;

/// Validated parameters for stretching one band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StretchParams {
    mode: StretchMode,
    lower: f64,
    upper: f64,
    low_value: u8,
    high_value: u8,
    f_lower: f64,
    f_span: f64,
}

impl StretchParams {
    /// # Errors
    /// [`BrowseError::InvalidParameters`] if `lower >= upper`, an output value
    /// lies outside `[0, 255]`, `low_value > high_value`, or log mode is given a
    /// non-positive lower threshold.
    pub fn new(
        mode: StretchMode,
        lower: f64,
        upper: f64,
        low_value: f64,
        high_value: f64,
    ) -> Result<Self> {
        let invalid = |msg: String| Err(BrowseError::InvalidParameters(msg));

        if !(lower.is_finite() && upper.is_finite()) || lower >= upper {
            return invalid(format!("lower threshold {lower} must be below upper threshold {upper}"));
        }
        for (name, v) in [("low", low_value), ("high", high_value)] {
            if !(0.0..=255.0).contains(&v) {
                return invalid(format!("{name} output value {v} outside [0, 255]"));
            }
        }
        if low_value > high_value {
            return invalid(format!("low output value {low_value} exceeds high output value {high_value}"));
        }
        if mode == StretchMode::Log && lower <= 0.0 {
            return invalid(format!("log stretch needs a positive lower threshold, got {lower}"));
        }

        let f = |v: f64| transform(mode, v);
        // Allow truncation: both values are range-checked above
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let (low_u8, high_u8) = (low_value.round() as u8, high_value.round() as u8);

        Ok(Self {
            mode,
            lower,
            upper,
            low_value: low_u8,
            high_value: high_u8,
            f_lower: f(lower),
            f_span: f(upper) - f(lower),
        })
    }

    /// Parameters for one colour channel (0 = red, 1 = green, 2 = blue).
    pub fn for_channel(config: &StretchConfig, channel: usize) -> Result<Self> {
        let window = config.thresholds_for(channel);
        Self::new(config.mode, window.lower, window.upper, config.low_value, config.high_value)
    }

    #[must_use]
    pub fn mode(&self) -> StretchMode {
        self.mode
    }

    /// Stretch one sample. `None` marks nodata: the sample equals `nodata`, is
    /// not finite, or is non-positive in log mode.
    #[inline]
    #[must_use]
    pub fn apply(&self, sample: f64, nodata: Option<f64>) -> Option<u8> {
        if !sample.is_finite() || nodata.is_some_and(|nd| sample == nd) {
            return None;
        }
        if self.mode == StretchMode::Log && sample <= 0.0 {
            return None;
        }
        if sample <= self.lower {
            return Some(self.low_value);
        }
        if sample >= self.upper {
            return Some(self.high_value);
        }

        let scaled = f64::from(self.high_value) * (transform(self.mode, sample) - self.f_lower) / self.f_span;
        let rounded = (scaled - CEIL_EPSILON)
            .ceil()
            .clamp(f64::from(self.low_value), f64::from(self.high_value));
        // Allow truncation: clamped into u8 range above
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let value = rounded as u8;
        Some(value)
    }
}

#[inline]
fn transform(mode: StretchMode, v: f64) -> f64 {
    match mode {
        StretchMode::Linear => v,
        StretchMode::Log => v.ln(),
    }
}

/// A single stretched band plus its per-pixel validity.
#[derive(Debug, Clone)]
pub struct StretchedBand {
    pub values: Vec<u8>,
    pub valid: Vec<bool>,
}

/// Stretch one band. Invalid samples come out as 0.
///
/// Samples equal to `nodata` or to the fill value the band file declares are
/// both invalid.
#[must_use]
pub fn stretch_band(band: &BandRaster, params: &StretchParams, nodata: Option<f64>) -> StretchedBand {
    let declared = band.nodata;
    let (values, valid) = band
        .data
        .par_iter()
        .map(|&dn| {
            let sample = f64::from(dn);
            if declared.is_some_and(|nd| sample == nd) {
                return (0, false);
            }
            match params.apply(sample, nodata) {
                Some(v) => (v, true),
                None => (0, false),
            }
        })
        .unzip();
    StretchedBand { values, valid }
}

/// Stretch red, green and blue bands into one RGBA raster on the bands' grid.
///
/// A pixel is valid only where all three bands are valid; elsewhere every
/// channel is 0. Both the configured nodata value and the value declared by
/// each band file mark invalid samples.
///
/// # Errors
/// [`BrowseError::InvalidParameters`] for a bad stretch window and
/// [`BrowseError::InvalidData`] when the three bands do not share one grid.
pub fn stretch_rgb(bands: [&BandRaster; 3], config: &StretchConfig) -> Result<RgbaRaster> {
    let [red, green, blue] = bands;
    if !(red.same_grid(green) && red.same_grid(blue)) {
        return Err(BrowseError::InvalidData(
            "red, green and blue bands do not share a pixel grid".to_string(),
        ));
    }

    let stretched: Vec<StretchedBand> = bands
        .iter()
        .enumerate()
        .map(|(channel, band)| {
            let params = StretchParams::for_channel(config, channel)?;
            Ok(stretch_band(band, &params, config.nodata))
        })
        .collect::<Result<_>>()?;

    let mut pixels = vec![0u8; red.width * red.height * RGBA];
    pixels
        .par_chunks_exact_mut(RGBA)
        .enumerate()
        .for_each(|(i, px)| {
            if stretched.iter().all(|b| b.valid[i]) {
                px[0] = stretched[0].values[i];
                px[1] = stretched[1].values[i];
                px[2] = stretched[2].values[i];
                px[3] = ALPHA_VALID;
            }
        });

    let raster = RgbaRaster::from_pixels(red.width, red.height, pixels, red.transform, red.crs)?;
    debug!(
        width = raster.width,
        height = raster.height,
        valid = raster.valid_count(),
        mode = ?config.mode,
        "Stretched granule bands"
    );
    Ok(raster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BandThresholds;
    use crate::geometry::GeoTransform;

    fn linear() -> StretchParams {
        StretchParams::new(StretchMode::Linear, 100.0, 1600.0, 0.0, 255.0).unwrap()
    }

    fn log() -> StretchParams {
        StretchParams::new(StretchMode::Log, 100.0, 1600.0, 0.0, 255.0).unwrap()
    }

    fn band(data: Vec<f32>) -> BandRaster {
        let n = data.len();
        BandRaster::new(n, 1, data, GeoTransform::new(0.0, 0.0, 30.0, 30.0), 32633).unwrap()
    }

    #[test]
    fn test_midpoint_rounds_up() {
        // 255 * (850 - 100) / (1600 - 100) = 127.5
        assert_eq!(linear().apply(850.0, None), Some(128));
    }

    #[test]
    fn test_integral_result_not_bumped() {
        // 255 * 300 / 1500 = 51 exactly
        assert_eq!(linear().apply(400.0, None), Some(51));
    }

    #[test]
    fn test_thresholds_hit_output_values_exactly() {
        for params in [linear(), log()] {
            assert_eq!(params.apply(100.0, None), Some(0));
            assert_eq!(params.apply(1600.0, None), Some(255));
        }
        let shifted = StretchParams::new(StretchMode::Log, 100.0, 1600.0, 1.0, 200.0).unwrap();
        assert_eq!(shifted.apply(100.0, None), Some(1));
        assert_eq!(shifted.apply(1600.0, None), Some(200));
    }

    #[test]
    fn test_outside_window_clamps() {
        assert_eq!(linear().apply(-50.0, None), Some(0));
        assert_eq!(linear().apply(20_000.0, None), Some(255));
        assert_eq!(log().apply(5.0, None), Some(0));
        assert_eq!(log().apply(9_000.0, None), Some(255));
    }

    #[test]
    fn test_monotonic_both_modes() {
        let shifted = StretchParams::new(StretchMode::Log, 100.0, 1600.0, 1.0, 255.0).unwrap();
        for params in [linear(), log(), shifted] {
            let mut previous = 0u8;
            for s in 100..=1600 {
                let v = params.apply(f64::from(s), None).unwrap();
                assert!(v >= previous, "{:?}: {s} gave {v} after {previous}", params.mode());
                previous = v;
            }
        }
    }

    #[test]
    fn test_log_non_positive_is_nodata() {
        let params = log();
        assert_eq!(params.apply(0.0, None), None);
        assert_eq!(params.apply(-1.0, None), None);
        assert_eq!(params.apply(-9999.0, Some(-1.0)), None);
        // linear mode clamps instead
        assert_eq!(linear().apply(0.0, None), Some(0));
    }

    #[test]
    fn test_nodata_sample() {
        assert_eq!(linear().apply(-9999.0, Some(-9999.0)), None);
        assert_eq!(linear().apply(f64::NAN, None), None);
    }

    #[test]
    fn test_log_interpolation_value() {
        // ln(400) sits at (ln 400 - ln 100) / (ln 1600 - ln 100) = 0.5 of the span
        assert_eq!(log().apply(400.0, None), Some(128));
    }

    #[test]
    fn test_invalid_parameters() {
        let bad = [
            (StretchMode::Linear, 1600.0, 100.0, 0.0, 255.0),
            (StretchMode::Linear, 100.0, 100.0, 0.0, 255.0),
            (StretchMode::Linear, 100.0, 1600.0, -1.0, 255.0),
            (StretchMode::Linear, 100.0, 1600.0, 0.0, 256.0),
            (StretchMode::Linear, 100.0, 1600.0, 200.0, 100.0),
            (StretchMode::Log, 0.0, 1600.0, 0.0, 255.0),
        ];
        for (mode, lo, hi, lv, hv) in bad {
            let err = StretchParams::new(mode, lo, hi, lv, hv).unwrap_err();
            assert!(matches!(err, BrowseError::InvalidParameters(_)), "{lo} {hi} {lv} {hv}");
        }
    }

    #[test]
    fn test_stretch_band_marks_nodata() {
        let b = band(vec![-9999.0, 100.0, 850.0, 1600.0]);
        let out = stretch_band(&b, &linear(), Some(-9999.0));
        assert_eq!(out.values, vec![0, 0, 128, 255]);
        assert_eq!(out.valid, vec![false, true, true, true]);
    }

    #[test]
    fn test_stretch_rgb_alpha_requires_all_bands() {
        let config = StretchConfig {
            mode: StretchMode::Linear,
            nodata: Some(-9999.0),
            ..StretchConfig::default()
        };
        let red = band(vec![850.0, 850.0, 1600.0]);
        let green = band(vec![850.0, -9999.0, 1600.0]);
        let blue = band(vec![850.0, 850.0, 1600.0]);
        let rgba = stretch_rgb([&red, &green, &blue], &config).unwrap();
        assert_eq!(rgba.rgba(0), [128, 128, 128, 255]);
        assert_eq!(rgba.rgba(1), [0, 0, 0, 0]);
        assert_eq!(rgba.rgba(2), [255, 255, 255, 255]);
    }

    #[test]
    fn test_stretch_rgb_per_band_windows() {
        let config = StretchConfig {
            mode: StretchMode::Linear,
            band_thresholds: Some([
                BandThresholds { lower: 0.0, upper: 1000.0 },
                BandThresholds { lower: 0.0, upper: 2000.0 },
                BandThresholds { lower: 0.0, upper: 4000.0 },
            ]),
            ..StretchConfig::default()
        };
        let b = band(vec![1000.0]);
        let rgba = stretch_rgb([&b, &b, &b], &config).unwrap();
        assert_eq!(rgba.rgba(0), [255, 128, 64, 255]);
    }

    #[test]
    fn test_stretch_rgb_uses_band_nodata() {
        let config = StretchConfig {
            mode: StretchMode::Linear,
            nodata: None,
            ..StretchConfig::default()
        };
        let b = band(vec![-1.0, 500.0]).with_nodata(Some(-1.0));
        let rgba = stretch_rgb([&b, &b, &b], &config).unwrap();
        assert!(!rgba.is_valid(0));
        assert!(rgba.is_valid(1));
    }

    #[test]
    fn test_configured_and_declared_nodata_both_invalid() {
        let config = StretchConfig {
            mode: StretchMode::Linear,
            nodata: Some(-9999.0),
            ..StretchConfig::default()
        };
        let b = band(vec![-9999.0, 0.0, 850.0]).with_nodata(Some(0.0));
        let rgba = stretch_rgb([&b, &b, &b], &config).unwrap();
        assert!(!rgba.is_valid(0));
        assert!(!rgba.is_valid(1));
        assert_eq!(rgba.rgba(2), [128, 128, 128, 255]);

        let out = stretch_band(&b, &linear(), None);
        assert_eq!(out.valid, vec![true, false, true]);
    }

    #[test]
    fn test_stretch_rgb_rejects_mismatched_grids() {
        let a = band(vec![1.0, 2.0]);
        let b = band(vec![1.0, 2.0, 3.0]);
        assert!(stretch_rgb([&a, &b, &a], &StretchConfig::default()).is_err());
    }
}
