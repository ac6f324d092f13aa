//! Granule naming and the per-granule acquisition record.
//!
//! Granule names follow `HLS.<product>.T<tile>.<YYYYDDDTHHMMSS>.<version>`,
//! e.g. `HLS.S30.T01LAC.2021183T221941.v1.5`. Band files and the CMR time
//! record sit next to each other under the input prefix:
//!
//! ```text
//! granules/HLS.S30.T01LAC.2021183T221941.v1.5.B04.tif
//! granules/HLS.S30.T01LAC.2021183T221941.v1.5.cmr.xml
//! ```

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{BrowseError, Result};
use crate::metadata::TimeRange;

/// Suffix of the acquisition record that accompanies each granule.
pub const CMR_SUFFIX: &str = "cmr.xml";

/// Parsed granule identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GranuleId {
    name: String,
    product: String,
    tile: String,
    acquisition: String,
    version: String,
}

impl GranuleId {
    pub fn parse(name: &str) -> Result<Self> {
        let invalid = || BrowseError::InvalidGranuleName(name.to_string());
        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() < 5 || parts[0] != "HLS" {
            return Err(invalid());
        }
        let tile = parts[2].strip_prefix('T').filter(|t| !t.is_empty()).ok_or_else(invalid)?;
        if parts[1].is_empty() || parts[3].is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            name: name.to_string(),
            product: parts[1].to_string(),
            tile: tile.to_string(),
            acquisition: parts[3].to_string(),
            version: parts[4..].join("."),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Product code, `S30` or `L30`.
    #[must_use]
    pub fn product(&self) -> &str {
        &self.product
    }

    /// Source tile ID without the leading `T`, the tile lookup key.
    #[must_use]
    pub fn tile(&self) -> &str {
        &self.tile
    }

    #[must_use]
    pub fn acquisition(&self) -> &str {
        &self.acquisition
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Object key of one band file.
    #[must_use]
    pub fn band_key(&self, prefix: &str, band: &str) -> String {
        join_key(prefix, &format!("{}.{band}.tif", self.name))
    }

    /// Object key of the acquisition record.
    #[must_use]
    pub fn cmr_key(&self, prefix: &str) -> String {
        join_key(prefix, &format!("{}.{CMR_SUFFIX}", self.name))
    }
}

impl FromStr for GranuleId {
    type Err = BrowseError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for GranuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

pub(crate) fn join_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CmrGranule {
    temporal: CmrTemporal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CmrTemporal {
    range_date_time: CmrRangeDateTime,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CmrRangeDateTime {
    beginning_date_time: String,
    ending_date_time: String,
}

/// Acquisition time range from a granule's CMR record
/// (`Granule/Temporal/RangeDateTime`).
///
/// # Errors
/// [`BrowseError::Xml`] if the document lacks the range elements and
/// [`BrowseError::InvalidTimestamp`] if they cannot be parsed.
pub fn parse_cmr_time_range(xml: &str) -> Result<TimeRange> {
    let granule: CmrGranule = quick_xml::de::from_str(xml)?;
    let range = granule.temporal.range_date_time;
    TimeRange::parse(&range.beginning_date_time, &range.ending_date_time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::format_timestamp;

    const CMR: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Granule>
  <GranuleUR>HLS.S30.T01LAC.2021183T221941.v1.5</GranuleUR>
  <InsertTime>2021-07-03T05:31:12.000Z</InsertTime>
  <Collection><DataSetId>HLS Sentinel-2</DataSetId></Collection>
  <Temporal>
    <RangeDateTime>
      <BeginningDateTime>2021-07-02T22:19:41.024Z</BeginningDateTime>
      <EndingDateTime>2021-07-02T22:19:55.431Z</EndingDateTime>
    </RangeDateTime>
  </Temporal>
</Granule>"#;

    #[test]
    fn test_parse_granule_name() {
        let g = GranuleId::parse("HLS.S30.T01LAC.2021183T221941.v1.5").unwrap();
        assert_eq!(g.product(), "S30");
        assert_eq!(g.tile(), "01LAC");
        assert_eq!(g.acquisition(), "2021183T221941");
        assert_eq!(g.version(), "v1.5");
        assert_eq!(g.to_string(), "HLS.S30.T01LAC.2021183T221941.v1.5");
    }

    #[test]
    fn test_malformed_names() {
        for bad in ["", "HLS.S30", "XYZ.S30.T01LAC.2021183T221941.v1.5", "HLS.S30.01LAC.2021183.v1", "HLS.S30.T.2021183.v1"] {
            assert!(matches!(
                bad.parse::<GranuleId>(),
                Err(BrowseError::InvalidGranuleName(_))
            ), "{bad}");
        }
    }

    #[test]
    fn test_keys() {
        let g = GranuleId::parse("HLS.L30.T10SEG.2021190T183910.v2.0").unwrap();
        assert_eq!(g.band_key("granules/", "B04"), "granules/HLS.L30.T10SEG.2021190T183910.v2.0.B04.tif");
        assert_eq!(g.cmr_key(""), "HLS.L30.T10SEG.2021190T183910.v2.0.cmr.xml");
    }

    #[test]
    fn test_cmr_time_range() {
        let range = parse_cmr_time_range(CMR).unwrap();
        assert_eq!(format_timestamp(&range.start), "2021-07-02T22:19:41.024000Z");
        assert_eq!(format_timestamp(&range.end), "2021-07-02T22:19:55.431000Z");
    }

    #[test]
    fn test_cmr_missing_temporal() {
        let err = parse_cmr_time_range("<Granule><GranuleUR>x</GranuleUR></Granule>").unwrap_err();
        assert!(matches!(err, BrowseError::Xml(_)));
    }

    #[test]
    fn test_cmr_bad_timestamp() {
        let xml = CMR.replace("2021-07-02T22:19:41.024Z", "2021/07/02");
        let err = parse_cmr_time_range(&xml).unwrap_err();
        assert!(matches!(err, BrowseError::InvalidTimestamp { .. }));
    }
}
