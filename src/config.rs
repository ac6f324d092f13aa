//! Run configuration.
//!
//! A [`BrowseConfig`] is built once (from defaults, a JSON file, or the
//! `with_*` builders), validated, and then passed by reference to every stage.
//! Nothing in the crate reads configuration from global state.
//!
//! # Example
//!
//! ```rust
//! use hls_browse::config::{BrowseConfig, ResamplingKernel, StretchMode};
//!
//! let config = BrowseConfig::default()
//!     .with_stretch_mode(StretchMode::Linear)
//!     .with_resampling(ResamplingKernel::Cubic)
//!     .with_emit_alpha(true);
//! config.validate().unwrap();
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BrowseError, Result};
use crate::geotiff::GeoTiffCompression;

/// Degrees per destination pixel used by the browse-image grid.
pub const DEFAULT_DEST_RESOLUTION: f64 = 2.746_582_031_25e-4;

/// Transform applied to samples and thresholds before interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StretchMode {
    Linear,
    #[default]
    Log,
}

/// Kernel used when resampling colour channels into a destination cell.
///
/// The validity mask is always resampled with nearest neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResamplingKernel {
    #[default]
    Bilinear,
    Cubic,
    Nearest,
}

/// Lower/upper DN window for one colour channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandThresholds {
    pub lower: f64,
    pub upper: f64,
}

/// Radiometric stretch parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StretchConfig {
    pub mode: StretchMode,
    #[serde(alias = "lower_threshold")]
    pub lower: f64,
    #[serde(alias = "upper_threshold")]
    pub upper: f64,
    #[serde(alias = "min_DN")]
    pub low_value: f64,
    #[serde(alias = "max_DN")]
    pub high_value: f64,
    /// DN marking "no measurement" in the input bands.
    pub nodata: Option<f64>,
    /// Optional per-channel windows in red, green, blue order.
    pub band_thresholds: Option<[BandThresholds; 3]>,
}

impl Default for StretchConfig {
    fn default() -> Self {
        Self {
            mode: StretchMode::Log,
            lower: 100.0,
            upper: 1600.0,
            low_value: 0.0,
            high_value: 255.0,
            nodata: Some(-9999.0),
            band_thresholds: None,
        }
    }
}

impl StretchConfig {
    /// Threshold window for the given channel (0 = red, 1 = green, 2 = blue).
    #[must_use]
    pub fn thresholds_for(&self, channel: usize) -> BandThresholds {
        self.band_thresholds
            .and_then(|bands| bands.get(channel).copied())
            .unwrap_or(BandThresholds {
                lower: self.lower,
                upper: self.upper,
            })
    }
}

/// Geometry of the destination grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationConfig {
    /// EPSG code of the destination grid.
    #[serde(alias = "destination_CRS")]
    pub crs: i32,
    /// Pixel size (x, y) in destination CRS units.
    pub resolution: (f64, f64),
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            crs: 4326,
            resolution: (DEFAULT_DEST_RESOLUTION, DEFAULT_DEST_RESOLUTION),
        }
    }
}

/// Full configuration for a browse run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowseConfig {
    pub stretch: StretchConfig,
    pub destination: DestinationConfig,
    /// Write a fourth (alpha/validity) channel into cell rasters.
    pub emit_alpha: bool,
    pub resampling_kernel: ResamplingKernel,
    pub compression: GeoTiffCompression,
    /// Red, green, blue band names keyed by product (`S30`, `L30`).
    pub product_bands: HashMap<String, [String; 3]>,
    /// Key prefix the granule band files are read from.
    pub input_prefix: String,
    /// Key prefix cell rasters and metadata are written under.
    pub output_prefix: String,
    /// Worker threads for granule processing (0 = rayon default).
    pub worker_threads: usize,
}

impl Default for BrowseConfig {
    fn default() -> Self {
        let hls_bands = || ["B04".to_string(), "B03".to_string(), "B02".to_string()];
        let mut product_bands = HashMap::new();
        product_bands.insert("S30".to_string(), hls_bands());
        product_bands.insert("L30".to_string(), hls_bands());

        Self {
            stretch: StretchConfig::default(),
            destination: DestinationConfig::default(),
            emit_alpha: true,
            resampling_kernel: ResamplingKernel::Bilinear,
            compression: GeoTiffCompression::Lzw,
            product_bands,
            input_prefix: "granules".to_string(),
            output_prefix: "cells".to_string(),
            worker_threads: 0,
        }
    }
}

impl BrowseConfig {
    /// Load a configuration from a JSON document. Missing fields take defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    #[must_use]
    pub fn with_stretch_mode(mut self, mode: StretchMode) -> Self {
        self.stretch.mode = mode;
        self
    }

    #[must_use]
    pub fn with_thresholds(mut self, lower: f64, upper: f64) -> Self {
        self.stretch.lower = lower;
        self.stretch.upper = upper;
        self
    }

    #[must_use]
    pub fn with_output_range(mut self, low_value: f64, high_value: f64) -> Self {
        self.stretch.low_value = low_value;
        self.stretch.high_value = high_value;
        self
    }

    #[must_use]
    pub fn with_nodata(mut self, nodata: Option<f64>) -> Self {
        self.stretch.nodata = nodata;
        self
    }

    #[must_use]
    pub fn with_resampling(mut self, kernel: ResamplingKernel) -> Self {
        self.resampling_kernel = kernel;
        self
    }

    #[must_use]
    pub fn with_emit_alpha(mut self, emit_alpha: bool) -> Self {
        self.emit_alpha = emit_alpha;
        self
    }

    #[must_use]
    pub fn with_destination(mut self, crs: i32, resolution: (f64, f64)) -> Self {
        self.destination = DestinationConfig { crs, resolution };
        self
    }

    #[must_use]
    pub fn with_prefixes(mut self, input: impl Into<String>, output: impl Into<String>) -> Self {
        self.input_prefix = input.into();
        self.output_prefix = output.into();
        self
    }

    #[must_use]
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Band names for a product, in red, green, blue order.
    #[must_use]
    pub fn bands_for(&self, product: &str) -> Option<&[String; 3]> {
        self.product_bands.get(product)
    }

    /// Check every parameter that would otherwise fail deep inside a run.
    pub fn validate(&self) -> Result<()> {
        let s = &self.stretch;
        for channel in 0..3 {
            let window = s.thresholds_for(channel);
            crate::stretch::StretchParams::new(
                s.mode,
                window.lower,
                window.upper,
                s.low_value,
                s.high_value,
            )?;
        }

        let (rx, ry) = self.destination.resolution;
        if !(rx.is_finite() && ry.is_finite() && rx > 0.0 && ry > 0.0) {
            return Err(BrowseError::InvalidParameters(format!(
                "destination resolution must be positive, got ({rx}, {ry})"
            )));
        }
        if crate::geometry::projection::get_proj_string(self.destination.crs).is_none() {
            return Err(BrowseError::InvalidParameters(format!(
                "destination CRS EPSG:{} is not supported",
                self.destination.crs
            )));
        }
        if self.product_bands.is_empty() {
            return Err(BrowseError::InvalidParameters(
                "no product band mapping configured".to_string(),
            ));
        }
        Ok(())
    }
}
