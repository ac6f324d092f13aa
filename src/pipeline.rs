//! End-to-end browse run over a batch of granules.
//!
//! Each granule is stretched and warped into every cell its tile overlaps
//! without holding any lock. Only the read-composite-write of a cell raster
//! and its metadata happens under that cell's lock, so granules touching
//! disjoint cells never wait on each other. Nothing under a cell lock runs on
//! the rayon pool.
//!
//! Granules come from store keys ([`Pipeline::run`], [`Pipeline::run_discovered`])
//! or from a local staging directory ([`Pipeline::run_local`]). Cell rasters
//! and metadata always go to the store.
//!
//! Failures stay local: an unknown tile skips its granule, an empty
//! contribution skips its cell, and a storage or decoding error fails only
//! the granule or cell it happened in. Only invalid configuration stops a run,
//! and it does so in [`Pipeline::new`] before any granule is touched.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hls_browse::config::BrowseConfig;
//! use hls_browse::lookup::TileLookup;
//! use hls_browse::pipeline::{Pipeline, RunStatus};
//! use hls_browse::store::LocalObjectStore;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = BrowseConfig::from_json_file("browse.json")?;
//!     let lookup = TileLookup::from_json_file("lookup.json")?;
//!     let store = Arc::new(LocalObjectStore::new("/data/bucket")?);
//!
//!     let pipeline = Pipeline::new(config, lookup, store)?;
//!     let report = pipeline.run_discovered()?;
//!     if report.status() != RunStatus::Success {
//!         eprintln!("{} granules failed", report.failed_granules());
//!     }
//!     Ok(())
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::BrowseConfig;
use crate::error::{BrowseError, Result};
use crate::geotiff::{read_band, read_rgba, GeoTiffWriter};
use crate::granule::{join_key, parse_cmr_time_range, GranuleId};
use crate::lookup::{CellCandidate, TileLookup};
use crate::merge::merge_into_cell;
use crate::metadata::{self, format_timestamp, CellMetadata, TimeRange};
use crate::raster::{BandRaster, RgbaRaster};
use crate::reproject::{CellGrid, ReprojectOutcome, Reprojector};
use crate::source::{
    GranuleEntry, GranuleLocation, GranuleSource, LocalGranuleSource, LocalScanOptions, StoreGranuleSource,
};
use crate::store::ObjectStore;
use crate::stretch::stretch_rgb;

/// Per-cell exclusive locks, created on first use and kept for the run.
#[derive(Debug, Default)]
struct CellLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CellLocks {
    fn lock_for(&self, cell_id: &str) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| BrowseError::storage(cell_id, "cell lock table poisoned"))?;
        Ok(Arc::clone(locks.entry(cell_id.to_string()).or_default()))
    }
}

/// What happened to one destination cell of a granule.
#[derive(Debug)]
pub enum CellStatus {
    /// The contribution was merged into the stored raster.
    Merged {
        valid_pixels: usize,
        /// `false` when the metadata record was left as it was: the time
        /// range could not be parsed, the stored record was unreadable, or
        /// writing the new record failed after the raster was stored.
        metadata_updated: bool,
    },
    /// No valid pixel of the granule landed in the cell.
    Empty,
    Failed(BrowseError),
}

#[derive(Debug)]
pub struct CellOutcome {
    pub cell_id: String,
    pub status: CellStatus,
}

/// What happened to one granule.
#[derive(Debug)]
pub enum GranuleStatus {
    Processed(Vec<CellOutcome>),
    /// The granule's tile has no entry in the lookup.
    Skipped(BrowseError),
    /// The granule could not be read or stretched; no cell was touched.
    Failed(BrowseError),
}

#[derive(Debug)]
pub struct GranuleOutcome {
    pub granule: String,
    pub status: GranuleStatus,
}

impl GranuleOutcome {
    /// Whether the granule or any of its cells failed.
    #[must_use]
    pub fn has_failure(&self) -> bool {
        match &self.status {
            GranuleStatus::Processed(cells) => cells.iter().any(|c| matches!(c.status, CellStatus::Failed(_))),
            GranuleStatus::Skipped(_) => false,
            GranuleStatus::Failed(_) => true,
        }
    }

    /// Cells this granule was merged into.
    #[must_use]
    pub fn merged_cells(&self) -> usize {
        match &self.status {
            GranuleStatus::Processed(cells) => cells
                .iter()
                .filter(|c| matches!(c.status, CellStatus::Merged { .. }))
                .count(),
            _ => 0,
        }
    }
}

/// Overall result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every granule was processed or legitimately skipped, and something was merged.
    Success,
    /// Some granules or cells failed while others were merged.
    PartialFailure,
    /// Failures only; nothing was merged.
    TotalFailure,
    /// No failures and nothing to merge.
    NothingToDo,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<GranuleOutcome>,
}

impl RunReport {
    #[must_use]
    pub fn status(&self) -> RunStatus {
        let failed = self.failed_granules();
        let merged = self.merged_cells();
        match (failed, merged) {
            (0, 0) => RunStatus::NothingToDo,
            (0, _) => RunStatus::Success,
            (_, 0) => RunStatus::TotalFailure,
            _ => RunStatus::PartialFailure,
        }
    }

    /// Granules that failed outright or had a failed cell.
    #[must_use]
    pub fn failed_granules(&self) -> usize {
        self.outcomes.iter().filter(|o| o.has_failure()).count()
    }

    #[must_use]
    pub fn merged_cells(&self) -> usize {
        self.outcomes.iter().map(GranuleOutcome::merged_cells).sum()
    }

    #[must_use]
    pub fn get(&self, granule: &str) -> Option<&GranuleOutcome> {
        self.outcomes.iter().find(|o| o.granule == granule)
    }
}

/// Browse run over one object store.
pub struct Pipeline {
    config: BrowseConfig,
    lookup: TileLookup,
    store: Arc<dyn ObjectStore>,
    locks: CellLocks,
    pool: rayon::ThreadPool,
    production_time: Option<DateTime<Utc>>,
}

impl Pipeline {
    /// # Errors
    /// [`BrowseError::InvalidParameters`] if the configuration does not
    /// validate or the worker pool cannot be built.
    pub fn new(config: BrowseConfig, lookup: TileLookup, store: Arc<dyn ObjectStore>) -> Result<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("browse-worker-{i}"))
            .build()
            .map_err(|e| BrowseError::InvalidParameters(format!("cannot build worker pool: {e}")))?;

        Ok(Self {
            config,
            lookup,
            store,
            locks: CellLocks::default(),
            pool,
            production_time: None,
        })
    }

    /// Stamp every metadata update with `ts` instead of the current time.
    #[must_use]
    pub fn with_production_time(mut self, ts: DateTime<Utc>) -> Self {
        self.production_time = Some(ts);
        self
    }

    #[must_use]
    pub fn config(&self) -> &BrowseConfig {
        &self.config
    }

    /// Object key of a cell raster.
    #[must_use]
    pub fn cell_raster_key(&self, cell_id: &str) -> String {
        join_key(&self.config.output_prefix, &format!("{cell_id}.tif"))
    }

    /// Object key of a cell metadata record.
    #[must_use]
    pub fn cell_metadata_key(&self, cell_id: &str) -> String {
        join_key(&self.config.output_prefix, &format!("{cell_id}.xml"))
    }

    /// Process every granule found under the input prefix.
    pub fn run_discovered(&self) -> Result<RunReport> {
        let source = StoreGranuleSource::list(self.store.as_ref(), &self.config.input_prefix)?;
        Ok(self.run_source(&source))
    }

    /// Process every granule in a local staging directory.
    ///
    /// # Errors
    /// [`BrowseError::StorageUnavailable`] if `root` is not a directory.
    pub fn run_local<P: AsRef<Path>>(&self, root: P, options: &LocalScanOptions) -> Result<RunReport> {
        let root = root.as_ref();
        let source = LocalGranuleSource::scan(root, options)?;
        let stats = source.stats();
        info!(
            root = %root.display(),
            granules = stats.granule_count,
            band_files = stats.band_file_count,
            missing_cmr = stats.missing_cmr,
            size_mb = stats.total_size_mb(),
            "Scanned staging directory"
        );
        Ok(self.run_source(&source))
    }

    /// Process every granule a source discovered, reading files where it found them.
    pub fn run_source(&self, source: &dyn GranuleSource) -> RunReport {
        self.run_entries(source.entries())
    }

    /// Process a batch of granules stored under the input prefix.
    pub fn run(&self, granules: &[GranuleId]) -> RunReport {
        let entries: Vec<GranuleEntry> = granules.iter().map(|g| self.store_entry(g)).collect();
        self.run_entries(&entries)
    }

    fn run_entries(&self, entries: &[GranuleEntry]) -> RunReport {
        info!(granules = entries.len(), store = self.store.name(), "Starting browse run");
        let outcomes: Vec<GranuleOutcome> =
            self.pool.install(|| entries.par_iter().map(|e| self.process_entry(e)).collect());

        let report = RunReport { outcomes };
        info!(
            status = ?report.status(),
            merged_cells = report.merged_cells(),
            failed_granules = report.failed_granules(),
            "Browse run finished"
        );
        report
    }

    /// Stretch, warp and merge one stored granule into every cell it overlaps.
    pub fn process_granule(&self, granule: &GranuleId) -> GranuleOutcome {
        self.process_entry(&self.store_entry(granule))
    }

    /// Stretch, warp and merge one discovered granule into every cell it overlaps.
    pub fn process_entry(&self, entry: &GranuleEntry) -> GranuleOutcome {
        let granule = &entry.granule;
        let status = match self.granule_cells(entry) {
            Ok(cells) => GranuleStatus::Processed(cells),
            Err(e @ BrowseError::UnknownTile(_)) => {
                warn!(granule = %granule, error = %e, "Skipping granule");
                GranuleStatus::Skipped(e)
            }
            Err(e) => {
                warn!(granule = %granule, error = %e, "Granule failed");
                GranuleStatus::Failed(e)
            }
        };
        GranuleOutcome {
            granule: granule.name().to_string(),
            status,
        }
    }

    /// Entry for a granule laid out under the input prefix.
    fn store_entry(&self, granule: &GranuleId) -> GranuleEntry {
        let prefix = &self.config.input_prefix;
        let bands: BTreeMap<String, GranuleLocation> = self
            .config
            .bands_for(granule.product())
            .into_iter()
            .flatten()
            .map(|band| (band.clone(), GranuleLocation::Key(granule.band_key(prefix, band))))
            .collect();
        GranuleEntry {
            granule: granule.clone(),
            bands,
            cmr: Some(GranuleLocation::Key(granule.cmr_key(prefix))),
        }
    }

    fn granule_cells(&self, entry: &GranuleEntry) -> Result<Vec<CellOutcome>> {
        let granule = &entry.granule;
        let candidates = self.lookup.candidates(granule.tile())?;
        let bands = self.config.bands_for(granule.product()).ok_or_else(|| {
            BrowseError::InvalidData(format!("no band mapping for product {}", granule.product()))
        })?;

        let time_range = self.read_time_range(entry)?;
        if let Err(e) = &time_range {
            warn!(granule = %granule, error = %e, "Unusable time range; cell metadata will not be updated");
        }

        let red = self.read_band(entry, &bands[0])?;
        let green = self.read_band(entry, &bands[1])?;
        let blue = self.read_band(entry, &bands[2])?;
        let stretched = stretch_rgb([&red, &green, &blue], &self.config.stretch)?;
        debug!(granule = %granule, cells = candidates.len(), valid = stretched.valid_count(), "Stretched granule");

        let reprojector = Reprojector::new(&stretched).kernel(self.config.resampling_kernel);
        let outcomes = candidates
            .iter()
            .map(|cell| {
                let status = self
                    .contribute(&reprojector, cell, time_range.as_ref().ok())
                    .unwrap_or_else(|e| {
                        warn!(granule = %granule, cell = %cell.cell_id, error = %e, "Cell merge failed");
                        CellStatus::Failed(e)
                    });
                CellOutcome {
                    cell_id: cell.cell_id.clone(),
                    status,
                }
            })
            .collect();
        Ok(outcomes)
    }

    fn read_band(&self, entry: &GranuleEntry, band: &str) -> Result<BandRaster> {
        let location = entry.bands.get(band).ok_or_else(|| {
            BrowseError::storage(entry.granule.band_key(&self.config.input_prefix, band), "band file not found")
        })?;
        read_band(&location.read(self.store.as_ref())?)
    }

    /// The outer error fails the granule; the inner one only disables metadata.
    fn read_time_range(&self, entry: &GranuleEntry) -> Result<Result<TimeRange>> {
        let location = entry.cmr.as_ref().ok_or_else(|| {
            BrowseError::storage(entry.granule.cmr_key(&self.config.input_prefix), "acquisition record not found")
        })?;
        let bytes = location.read(self.store.as_ref())?;
        let xml = String::from_utf8_lossy(&bytes);
        match parse_cmr_time_range(&xml) {
            Ok(range) => Ok(Ok(range)),
            Err(e @ BrowseError::InvalidTimestamp { .. }) => Ok(Err(e)),
            Err(e) => Err(e),
        }
    }

    /// Warp into one cell (unlocked), then merge under the cell lock.
    fn contribute(
        &self,
        reprojector: &Reprojector<'_>,
        cell: &CellCandidate,
        time_range: Option<&TimeRange>,
    ) -> Result<CellStatus> {
        let grid = CellGrid::for_cell(cell, &self.config.destination)?;
        match reprojector.reproject(&grid)? {
            ReprojectOutcome::Empty => {
                debug!(cell = %cell.cell_id, "Empty contribution");
                Ok(CellStatus::Empty)
            }
            ReprojectOutcome::Contribution(raster) => self.merge_cell(&cell.cell_id, &raster, time_range),
        }
    }

    /// Read-composite-write of one cell raster plus its metadata, as a unit.
    ///
    /// No rayon work may be spawned while the cell guard is held.
    pub fn merge_cell(
        &self,
        cell_id: &str,
        contribution: &RgbaRaster,
        time_range: Option<&TimeRange>,
    ) -> Result<CellStatus> {
        let raster_key = self.cell_raster_key(cell_id);
        let metadata_key = self.cell_metadata_key(cell_id);

        let lock = self.locks.lock_for(cell_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| BrowseError::storage(&raster_key, "cell lock poisoned"))?;

        let existing = self.store.get(&raster_key)?.map(|b| read_rgba(&b)).transpose()?;
        let merged = merge_into_cell(existing.as_ref(), contribution)?;

        // An unreadable record is left alone rather than replaced by a narrower one
        let (prior, prior_corrupt) = match self.store.get(&metadata_key)? {
            Some(bytes) => match CellMetadata::from_xml(&String::from_utf8_lossy(&bytes)) {
                Ok(m) => (Some(m), false),
                Err(e) => {
                    warn!(cell = %cell_id, error = %e, "Stored cell metadata unreadable");
                    (None, true)
                }
            },
            None => (None, false),
        };

        let file_name = format!("{cell_id}.tif");
        let production = self.production_time.unwrap_or_else(Utc::now);
        let updated = match time_range {
            Some(range) if !prior_corrupt => Some(metadata::update(prior.as_ref(), cell_id, &file_name, range, production)),
            _ => None,
        };

        let mut writer = GeoTiffWriter::new(&merged)
            .compression(self.config.compression)
            .emit_alpha(self.config.emit_alpha);
        if let Some(m) = updated.as_ref().or(prior.as_ref()) {
            writer = writer
                .metadata_item("START_DATE", format_timestamp(&m.range.start))
                .metadata_item("END_DATE", format_timestamp(&m.range.end));
        }
        self.store.put(&raster_key, &writer.to_bytes()?)?;

        // The raster is already stored, so a failed record write only loses the update
        let metadata_updated = match &updated {
            Some(m) => match m.to_xml().and_then(|xml| self.store.put(&metadata_key, xml.as_bytes())) {
                Ok(()) => true,
                Err(e) => {
                    warn!(cell = %cell_id, error = %e, "Cell raster merged but metadata write failed");
                    false
                }
            },
            None => false,
        };

        let valid_pixels = merged.valid_count();
        debug!(cell = %cell_id, valid_pixels, metadata_updated, "Merged cell");
        Ok(CellStatus::Merged {
            valid_pixels,
            metadata_updated,
        })
    }
}
