//! Local filesystem granule source.
//!
//! Walks a directory tree for band GeoTIFFs and CMR records and groups them by
//! granule name.

use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{BrowseError, Result};

use super::{group_files, GranuleEntry, GranuleLocation, GranuleSource};

/// Options for scanning local directories.
#[derive(Debug, Clone)]
pub struct LocalScanOptions {
    /// Minimum directory depth to scan (0 = include root files)
    pub min_depth: usize,
    /// Maximum directory depth to scan (None = unlimited)
    pub max_depth: Option<usize>,
    /// Whether to follow symbolic links
    pub follow_links: bool,
}

impl Default for LocalScanOptions {
    fn default() -> Self {
        Self {
            min_depth: 0,
            max_depth: None,
            follow_links: false,
        }
    }
}

impl LocalScanOptions {
    /// Only files directly inside the root (one staging directory per run).
    #[must_use]
    pub fn flat() -> Self {
        Self {
            max_depth: Some(1),
            ..Default::default()
        }
    }

    /// Set minimum depth
    #[must_use]
    pub fn with_min_depth(mut self, depth: usize) -> Self {
        self.min_depth = depth;
        self
    }

    /// Set maximum depth
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }
}

/// Granule source that scans local directories.
///
/// # Example
///
/// ```rust,no_run
/// use hls_browse::source::{GranuleSource, LocalGranuleSource, LocalScanOptions};
///
/// fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
///     let source = LocalGranuleSource::scan("/staging", &LocalScanOptions::flat())?;
///     println!("{} granules, {} MB", source.len(), source.stats().total_size_mb());
///     Ok(())
/// }
/// ```
pub struct LocalGranuleSource {
    entries: Vec<GranuleEntry>,
    total_size_bytes: u64,
}

impl LocalGranuleSource {
    /// Scan a directory for granule files.
    ///
    /// # Errors
    /// Returns an error if the root directory does not exist.
    pub fn scan<P: AsRef<Path>>(root: P, options: &LocalScanOptions) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(BrowseError::storage(
                root.display().to_string(),
                "directory does not exist",
            ));
        }

        let mut walker = WalkDir::new(root)
            .min_depth(options.min_depth)
            .follow_links(options.follow_links);
        if let Some(max) = options.max_depth {
            walker = walker.max_depth(max);
        }

        let mut files = Vec::new();
        let mut total_size_bytes = 0;
        for entry in walker.into_iter().filter_map(std::result::Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            total_size_bytes += entry.metadata().map_or(0, |m| m.len());
            debug!(path = %entry.path().display(), "Discovered file");
            files.push((file_name, GranuleLocation::Local(entry.into_path())));
        }

        let entries = group_files(files.iter().map(|(name, loc)| (name.as_str(), loc.clone())));
        debug!(root = %root.display(), granules = entries.len(), "Scanned granule directory");
        Ok(Self {
            entries,
            total_size_bytes,
        })
    }

    /// Get statistics about discovered granules.
    #[must_use]
    pub fn stats(&self) -> LocalSourceStats {
        LocalSourceStats {
            granule_count: self.entries.len(),
            band_file_count: self.entries.iter().map(|e| e.bands.len()).sum(),
            missing_cmr: self.entries.iter().filter(|e| e.cmr.is_none()).count(),
            total_size_bytes: self.total_size_bytes,
        }
    }
}

impl GranuleSource for LocalGranuleSource {
    fn entries(&self) -> &[GranuleEntry] {
        &self.entries
    }
}

/// Statistics about a local granule source.
#[derive(Debug, Clone)]
pub struct LocalSourceStats {
    pub granule_count: usize,
    pub band_file_count: usize,
    /// Granules without an acquisition record
    pub missing_cmr: usize,
    /// Total size of all scanned files in bytes
    pub total_size_bytes: u64,
}

impl LocalSourceStats {
    /// Get total size in megabytes
    #[must_use]
    pub fn total_size_mb(&self) -> f64 {
        // Allow cast precision loss: file sizes in MB don't need exact precision
        #[allow(clippy::cast_precision_loss)]
        { self.total_size_bytes as f64 / 1024.0 / 1024.0 }
    }
}
