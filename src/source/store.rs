//! Granule discovery by listing an [`ObjectStore`] prefix.

use tracing::debug;

use crate::error::Result;
use crate::store::ObjectStore;

use super::{group_files, GranuleEntry, GranuleLocation, GranuleSource};

/// Granules found under one key prefix of an object store.
pub struct StoreGranuleSource {
    entries: Vec<GranuleEntry>,
}

impl StoreGranuleSource {
    /// List `prefix` and group the keys by granule name.
    pub fn list(store: &dyn ObjectStore, prefix: &str) -> Result<Self> {
        let keys = store.list(prefix)?;
        let entries = group_files(keys.iter().map(|key| {
            let file_name = key.rsplit_once('/').map_or(key.as_str(), |(_, name)| name);
            (file_name, GranuleLocation::Key(key.clone()))
        }));
        debug!(store = store.name(), prefix, keys = keys.len(), granules = entries.len(), "Listed granules");
        Ok(Self { entries })
    }
}

impl GranuleSource for StoreGranuleSource {
    fn entries(&self) -> &[GranuleEntry] {
        &self.entries
    }
}
