#![doc = include_str!("../README.md")]
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`stretch`]: Radiometric stretch of band DNs to 8-bit RGBA
//! - [`lookup`]: Source tile to destination cell lookup
//! - [`reproject`]: Warping and clipping into a destination cell via [`Reprojector`]
//! - [`merge`]: Last-valid-wins compositing into stored cells
//! - [`metadata`]: Cell provenance (time range widening, XML records)
//! - [`pipeline`]: Worker-pool orchestration with per-cell locking
//! - [`granule`]: Granule naming and CMR acquisition records
//! - [`geotiff`]: GeoTIFF band decoding and cell raster encoding
//! - [`geometry`]: Coordinate types ([`BoundingBox`], [`GeoTransform`]) and projections
//! - [`store`]: Object storage abstraction (local directory, in-memory)
//! - [`source`]: Granule discovery from directories and stores
//! - [`config`]: Run configuration
//! - [`raster`]: In-memory band and RGBA rasters

// ============================================================================
// Public modules
// ============================================================================

pub mod casting;
pub mod config;
pub mod error;
pub mod geometry;
pub mod geotiff;
pub mod granule;
pub mod lookup;
pub mod merge;
pub mod metadata;
pub mod pipeline;
pub mod raster;
pub mod reproject;
pub mod source;
pub mod store;
pub mod stretch;

// ============================================================================
// Configuration & Errors
// ============================================================================

pub use config::{
    BandThresholds,
    BrowseConfig,
    DestinationConfig,
    ResamplingKernel,
    StretchConfig,
    StretchMode,
};
pub use error::{BrowseError, Result};

// ============================================================================
// Rasters
// ============================================================================

pub use raster::{BandRaster, RgbaRaster};

// ============================================================================
// Stretch
// ============================================================================
// Primary API: stretch_rgb([&red, &green, &blue], &config.stretch)

pub use stretch::{
    stretch_band,
    stretch_rgb,
    StretchParams,
};

// ============================================================================
// Tile Lookup & Reprojection
// ============================================================================
// Primary API: Reprojector::new(&rgba).kernel(...).reproject(&grid)

pub use lookup::{CellCandidate, TileLookup};
pub use reproject::{
    reproject_to_cell,
    CellGrid,
    ReprojectOutcome,
    Reprojector,
};

// ============================================================================
// Merge & Provenance
// ============================================================================

pub use merge::{composite, merge_into_cell};
pub use metadata::{
    data_day_label,
    format_timestamp,
    parse_timestamp,
    CellMetadata,
    TimeRange,
};

// ============================================================================
// Pipeline
// ============================================================================

pub use pipeline::{
    CellOutcome,
    CellStatus,
    GranuleOutcome,
    GranuleStatus,
    Pipeline,
    RunReport,
    RunStatus,
};

// ============================================================================
// Granules & Discovery
// ============================================================================

pub use granule::{parse_cmr_time_range, GranuleId};
pub use source::{
    GranuleEntry,
    GranuleLocation,
    GranuleSource,
    LocalGranuleSource,
    LocalScanOptions,
    LocalSourceStats,
    StoreGranuleSource,
};

// ============================================================================
// Geometry & Projections
// ============================================================================

pub use geometry::{BoundingBox, GeoTransform};
pub use geometry::projection::{
    get_proj_string,
    is_geographic_crs,
    project_point,
    CoordTransformer,
};

// ============================================================================
// Storage & GeoTIFF I/O
// ============================================================================

pub use store::{LocalObjectStore, MemoryObjectStore, ObjectStore};
pub use geotiff::{
    read_band,
    read_rgba,
    GeoTiffCompression,
    GeoTiffWriter,
};
