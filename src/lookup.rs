//! Source tile to destination cell lookup.
//!
//! The lookup is a precomputed JSON artifact mapping each source tile ID to the
//! ordered list of destination grid cells its footprint overlaps:
//!
//! ```json
//! {
//!   "01LAC": [
//!     {"GID": "003152", "minlon": -178.3125, "minlat": -10.6875,
//!      "maxlon": -177.75, "maxlat": -10.125}
//!   ]
//! }
//! ```
//!
//! It is loaded once per run and only ever read.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BrowseError, Result};
use crate::geometry::BoundingBox;

/// One destination cell a source tile overlaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellCandidate {
    #[serde(alias = "GID")]
    pub cell_id: String,
    #[serde(alias = "minlon")]
    pub min_lon: f64,
    #[serde(alias = "minlat")]
    pub min_lat: f64,
    #[serde(alias = "maxlon")]
    pub max_lon: f64,
    #[serde(alias = "maxlat")]
    pub max_lat: f64,
}

impl CellCandidate {
    #[must_use]
    pub fn new(cell_id: impl Into<String>, bounds: BoundingBox) -> Self {
        Self {
            cell_id: cell_id.into(),
            min_lon: bounds.minx,
            min_lat: bounds.miny,
            max_lon: bounds.maxx,
            max_lat: bounds.maxy,
        }
    }

    /// Geographic extent of the cell.
    #[must_use]
    pub fn bounds(&self) -> BoundingBox {
        BoundingBox::new(self.min_lon, self.min_lat, self.max_lon, self.max_lat)
    }
}

/// Read-only source tile lookup.
#[derive(Debug, Clone, Default)]
pub struct TileLookup {
    entries: HashMap<String, Vec<CellCandidate>>,
}

impl TileLookup {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let lookup = Self::from_json_str(&std::fs::read_to_string(path)?)?;
        debug!(path = %path.display(), tiles = lookup.len(), "Loaded tile lookup");
        Ok(lookup)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let entries: HashMap<String, Vec<CellCandidate>> = serde_json::from_str(text)?;
        for (tile, cells) in &entries {
            if let Some(bad) = cells.iter().find(|c| {
                let b = c.bounds();
                !(b.width() > 0.0 && b.height() > 0.0)
            }) {
                return Err(BrowseError::InvalidData(format!(
                    "lookup entry {tile} has degenerate bounds for cell {}",
                    bad.cell_id
                )));
            }
        }
        Ok(Self { entries })
    }

    /// Insert or replace the candidates of one tile.
    #[must_use]
    pub fn with_entry(mut self, tile: impl Into<String>, cells: Vec<CellCandidate>) -> Self {
        self.entries.insert(tile.into(), cells);
        self
    }

    /// Destination cells overlapping `tile`, in artifact order.
    ///
    /// # Errors
    /// [`BrowseError::UnknownTile`] when the tile has no entry.
    pub fn candidates(&self, tile: &str) -> Result<&[CellCandidate]> {
        self.entries
            .get(tile)
            .map(Vec::as_slice)
            .ok_or_else(|| BrowseError::UnknownTile(tile.to_string()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
