//! Granule discovery.
//!
//! A granule is a set of band files plus a CMR acquisition record sharing one
//! granule name. Sources group the files they find by that name so the
//! pipeline only sees granules, never loose files.
//!
//! # Example
//!
//! ```rust,no_run
//! // Import GranuleSource trait to use the entries() method
//! use hls_browse::source::{GranuleSource, LocalGranuleSource, LocalScanOptions};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let source = LocalGranuleSource::scan("/data/granules", &LocalScanOptions::default())?;
//!     for entry in source.complete(&["B04", "B03", "B02"]) {
//!         println!("{} ({} bands)", entry.granule, entry.bands.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod local;
pub mod store;

pub use local::{LocalGranuleSource, LocalScanOptions, LocalSourceStats};
pub use store::StoreGranuleSource;

use std::collections::BTreeMap;

use tracing::warn;

use crate::error::{BrowseError, Result};
use crate::granule::{GranuleId, CMR_SUFFIX};
use crate::store::ObjectStore;

/// Where a discovered file lives (local path or store key).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GranuleLocation {
    Local(std::path::PathBuf),
    Key(String),
}

impl GranuleLocation {
    /// Get a display string for the location
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            GranuleLocation::Local(path) => path.display().to_string(),
            GranuleLocation::Key(key) => key.clone(),
        }
    }

    /// Read the whole file. Keys resolve against `store`, paths against the
    /// local filesystem.
    ///
    /// # Errors
    /// [`BrowseError::StorageUnavailable`] if the file is missing or unreadable.
    pub fn read(&self, store: &dyn ObjectStore) -> Result<Vec<u8>> {
        match self {
            GranuleLocation::Key(key) => store
                .get(key)?
                .ok_or_else(|| BrowseError::storage(key.as_str(), "object not found")),
            GranuleLocation::Local(path) => {
                std::fs::read(path).map_err(|e| BrowseError::storage(path.display().to_string(), e))
            }
        }
    }
}

/// One discovered granule.
#[derive(Debug, Clone)]
pub struct GranuleEntry {
    pub granule: GranuleId,
    /// Band files keyed by band name (`B04`, ...).
    pub bands: BTreeMap<String, GranuleLocation>,
    /// Acquisition time record, if present.
    pub cmr: Option<GranuleLocation>,
}

impl GranuleEntry {
    /// Whether every requested band and the time record are present.
    #[must_use]
    pub fn is_complete(&self, bands: &[&str]) -> bool {
        self.cmr.is_some() && bands.iter().all(|b| self.bands.contains_key(*b))
    }
}

/// What a file name says about the granule it belongs to.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum GranuleFile<'a> {
    Band { granule: &'a str, band: &'a str },
    Cmr { granule: &'a str },
}

/// Classify a file name (no directory part).
pub(crate) fn classify_file_name(file_name: &str) -> Option<GranuleFile<'_>> {
    if let Some(granule) = file_name.strip_suffix(CMR_SUFFIX).and_then(|s| s.strip_suffix('.')) {
        return Some(GranuleFile::Cmr { granule });
    }
    let stem = file_name
        .strip_suffix(".tif")
        .or_else(|| file_name.strip_suffix(".tiff"))?;
    let (granule, band) = stem.rsplit_once('.')?;
    Some(GranuleFile::Band { granule, band })
}

/// Group `(file name, location)` pairs into granule entries, sorted by name.
///
/// Files whose granule name does not parse are skipped with a warning.
pub(crate) fn group_files<'a, I>(files: I) -> Vec<GranuleEntry>
where
    I: IntoIterator<Item = (&'a str, GranuleLocation)>,
{
    let mut grouped: BTreeMap<String, GranuleEntry> = BTreeMap::new();
    for (file_name, location) in files {
        let Some(kind) = classify_file_name(file_name) else {
            continue;
        };
        let name = match kind {
            GranuleFile::Band { granule, .. } | GranuleFile::Cmr { granule } => granule,
        };
        if !grouped.contains_key(name) {
            match GranuleId::parse(name) {
                Ok(granule) => {
                    grouped.insert(
                        name.to_string(),
                        GranuleEntry { granule, bands: BTreeMap::new(), cmr: None },
                    );
                }
                Err(e) => {
                    warn!(file = %location.display(), error = %e, "Skipping file with unrecognised granule name");
                    continue;
                }
            }
        }
        let Some(entry) = grouped.get_mut(name) else {
            continue;
        };
        match kind {
            GranuleFile::Band { band, .. } => {
                entry.bands.insert(band.to_string(), location);
            }
            GranuleFile::Cmr { .. } => entry.cmr = Some(location),
        }
    }
    grouped.into_values().collect()
}

/// Trait for discovering granules from a source.
pub trait GranuleSource: Send + Sync {
    /// All discovered granules, sorted by name.
    fn entries(&self) -> &[GranuleEntry];

    /// Get a granule by name.
    fn get(&self, name: &str) -> Option<&GranuleEntry> {
        self.entries().iter().find(|e| e.granule.name() == name)
    }

    fn len(&self) -> usize {
        self.entries().len()
    }

    fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Granules holding every requested band and a time record.
    fn complete(&self, bands: &[&str]) -> Vec<&GranuleEntry> {
        self.entries().iter().filter(|e| e.is_complete(bands)).collect()
    }

    /// Identifiers of every discovered granule.
    fn granules(&self) -> Vec<GranuleId> {
        self.entries().iter().map(|e| e.granule.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAME: &str = "HLS.S30.T01LAC.2021183T221941.v1.5";

    #[test]
    fn test_classify_file_name() {
        assert_eq!(
            classify_file_name(&format!("{NAME}.B04.tif")),
            Some(GranuleFile::Band { granule: NAME, band: "B04" })
        );
        assert_eq!(
            classify_file_name(&format!("{NAME}.cmr.xml")),
            Some(GranuleFile::Cmr { granule: NAME })
        );
        assert_eq!(classify_file_name("readme.txt"), None);
    }

    #[test]
    fn test_group_files() {
        let files = [
            format!("{NAME}.B04.tif"),
            format!("{NAME}.B03.tif"),
            format!("{NAME}.cmr.xml"),
            "HLS.L30.T10SEG.2021190T183910.v2.0.B02.tif".to_string(),
            "garbage.B04.tif".to_string(),
        ];
        let entries = group_files(files.iter().map(|f| (f.as_str(), GranuleLocation::Key(f.clone()))));
        assert_eq!(entries.len(), 2);
        // sorted by name: L30 before S30
        assert_eq!(entries[0].granule.product(), "L30");
        let s30 = &entries[1];
        assert_eq!(s30.bands.len(), 2);
        assert!(s30.is_complete(&["B04", "B03"]));
        assert!(!s30.is_complete(&["B04", "B03", "B02"]));
        assert!(!entries[0].is_complete(&["B02"]));
    }

    #[test]
    fn test_location_read() {
        use crate::store::MemoryObjectStore;

        let store = MemoryObjectStore::new();
        store.put("granules/a.B04.tif", b"band").unwrap();
        assert_eq!(GranuleLocation::Key("granules/a.B04.tif".into()).read(&store).unwrap(), b"band");

        let missing = GranuleLocation::Key("granules/b.B04.tif".into()).read(&store).unwrap_err();
        assert!(matches!(missing, BrowseError::StorageUnavailable { .. }));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.cmr.xml");
        std::fs::write(&path, b"<Granule/>").unwrap();
        assert_eq!(GranuleLocation::Local(path).read(&store).unwrap(), b"<Granule/>");
        let gone = GranuleLocation::Local(dir.path().join("gone.tif")).read(&store).unwrap_err();
        assert!(matches!(gone, BrowseError::StorageUnavailable { .. }));
    }

    #[test]
    fn test_location_display() {
        let local = GranuleLocation::Local(std::path::PathBuf::from("/data/a.B04.tif"));
        assert_eq!(local.display(), "/data/a.B04.tif");
        assert_eq!(GranuleLocation::Key("granules/a.tif".into()).display(), "granules/a.tif");
    }
}
