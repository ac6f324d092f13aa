//! Provenance metadata for destination cells.
//!
//! Each cell carries the time range its pixels were acquired in. Merging a new
//! contribution widens that range (earliest start, latest end) and stamps a
//! fresh production time; the range never narrows.
//!
//! Records are stored as XML:
//!
//! ```xml
//! <ImageryMetadata>
//!   <ProviderProductId>320071.tif</ProviderProductId>
//!   <ProductionDateTime>2021-07-03T10:00:00.000000Z</ProductionDateTime>
//!   <DataStartDateTime>2021-07-02T22:19:41.024000Z</DataStartDateTime>
//!   <DataEndDateTime>2021-07-02T22:19:55.000000Z</DataEndDateTime>
//!   <DataDay>2021183</DataDay>
//!   <PartialId>320071</PartialId>
//! </ImageryMetadata>
//! ```

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BrowseError, Result};

/// Accepted timestamp layout; the fraction may have 1 to 9 digits.
const TIMESTAMP_INPUT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";
const TIMESTAMP_OUTPUT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Parse a `YYYY-MM-DDTHH:MM:SS.ffffffZ` UTC timestamp.
///
/// # Errors
/// [`BrowseError::InvalidTimestamp`] on any other layout.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let trimmed = value.trim();
    if !trimmed.ends_with('Z') {
        return Err(BrowseError::InvalidTimestamp {
            value: value.to_string(),
            reason: "missing trailing 'Z'".to_string(),
        });
    }
    // `%.f` alone would also accept whole seconds
    let seconds = trimmed.rsplit_once(':').map_or("", |(_, secs)| secs);
    if !seconds.contains('.') {
        return Err(BrowseError::InvalidTimestamp {
            value: value.to_string(),
            reason: "missing fractional seconds".to_string(),
        });
    }
    NaiveDateTime::parse_from_str(trimmed, TIMESTAMP_INPUT_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| BrowseError::InvalidTimestamp {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Format a timestamp with microsecond precision and a trailing `Z`.
#[must_use]
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_OUTPUT_FORMAT).to_string()
}

/// Year and zero-padded day of year, e.g. `2021183`.
#[must_use]
pub fn data_day_label(ts: &DateTime<Utc>) -> String {
    format!("{}{:03}", ts.year(), ts.ordinal())
}

/// Acquisition time range of one contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// # Errors
    /// [`BrowseError::InvalidTimestamp`] if `end` precedes `start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end < start {
            return Err(BrowseError::InvalidTimestamp {
                value: format_timestamp(&end),
                reason: format!("range ends before it starts at {}", format_timestamp(&start)),
            });
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Self::new(parse_timestamp(start)?, parse_timestamp(end)?)
    }

    /// Smallest range covering both.
    #[must_use]
    pub fn union(&self, other: &TimeRange) -> TimeRange {
        TimeRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Provenance record of one destination cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellMetadata {
    pub cell_id: String,
    /// File name of the stored cell raster.
    pub provider_product_id: String,
    pub range: TimeRange,
    pub production: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "ImageryMetadata", rename_all = "PascalCase")]
struct ImageryMetadataXml {
    provider_product_id: String,
    production_date_time: String,
    data_start_date_time: String,
    data_end_date_time: String,
    data_day: String,
    partial_id: String,
}

impl CellMetadata {
    /// Label of the earliest acquisition day in the cell.
    #[must_use]
    pub fn data_day(&self) -> String {
        data_day_label(&self.range.start)
    }

    pub fn to_xml(&self) -> Result<String> {
        let record = ImageryMetadataXml {
            provider_product_id: self.provider_product_id.clone(),
            production_date_time: format_timestamp(&self.production),
            data_start_date_time: format_timestamp(&self.range.start),
            data_end_date_time: format_timestamp(&self.range.end),
            data_day: self.data_day(),
            partial_id: self.cell_id.clone(),
        };
        quick_xml::se::to_string(&record).map_err(|e| BrowseError::Xml(e.to_string()))
    }

    /// # Errors
    /// [`BrowseError::Xml`] for malformed documents and
    /// [`BrowseError::InvalidTimestamp`] for unparseable dates.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let record: ImageryMetadataXml = quick_xml::de::from_str(xml)?;
        Ok(Self {
            cell_id: record.partial_id,
            provider_product_id: record.provider_product_id,
            range: TimeRange::parse(&record.data_start_date_time, &record.data_end_date_time)?,
            production: parse_timestamp(&record.production_date_time)?,
        })
    }
}

/// Fold one contribution into a cell's provenance.
///
/// Without a prior record the contribution's range is taken as is. The
/// production timestamp is always replaced.
#[must_use]
pub fn update(
    prior: Option<&CellMetadata>,
    cell_id: &str,
    provider_product_id: &str,
    contribution: &TimeRange,
    production: DateTime<Utc>,
) -> CellMetadata {
    let range = prior.map_or(*contribution, |p| p.range.union(contribution));
    CellMetadata {
        cell_id: cell_id.to_string(),
        provider_product_id: provider_product_id.to_string(),
        range,
        production,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        parse_timestamp(s).unwrap()
    }

    fn range(a: &str, b: &str) -> TimeRange {
        TimeRange::parse(a, b).unwrap()
    }

    #[test]
    fn test_parse_and_format() {
        let t = ts("2021-07-02T22:19:41.024Z");
        assert_eq!(format_timestamp(&t), "2021-07-02T22:19:41.024000Z");
        let t = ts("2021-07-02T22:19:41.123456789Z");
        assert_eq!(format_timestamp(&t), "2021-07-02T22:19:41.123456Z");
    }

    #[test]
    fn test_invalid_timestamps() {
        for bad in [
            "2021-07-02",
            "2021-07-02 22:19:41.0Z",
            "2021-07-02T22:19:41.000",
            "2021-07-02T22:19:41Z",
            "soon",
        ] {
            let err = parse_timestamp(bad).unwrap_err();
            assert!(matches!(err, BrowseError::InvalidTimestamp { .. }), "{bad}");
        }
    }

    #[test]
    fn test_data_day_label() {
        assert_eq!(data_day_label(&ts("2021-07-02T00:00:00.0Z")), "2021183");
        assert_eq!(data_day_label(&ts("2020-01-05T12:00:00.0Z")), "2020005");
        assert_eq!(data_day_label(&ts("2020-12-31T12:00:00.0Z")), "2020366");
    }

    #[test]
    fn test_reversed_range_rejected() {
        assert!(TimeRange::parse("2021-07-02T10:00:00.0Z", "2021-07-02T09:00:00.0Z").is_err());
    }

    #[test]
    fn test_first_contribution_taken_as_is() {
        let r = range("2021-07-02T10:00:00.0Z", "2021-07-02T10:00:10.0Z");
        let production = ts("2021-07-03T00:00:00.0Z");
        let m = update(None, "320071", "320071.tif", &r, production);
        assert_eq!(m.range, r);
        assert_eq!(m.production, production);
        assert_eq!(m.data_day(), "2021183");
    }

    #[test]
    fn test_bounds_only_widen() {
        let a = range("2021-07-02T10:00:00.0Z", "2021-07-02T10:00:10.0Z");
        let b = range("2021-07-05T10:00:00.0Z", "2021-07-05T10:00:10.0Z");
        let inner = range("2021-07-03T00:00:00.0Z", "2021-07-03T00:00:01.0Z");
        let p1 = ts("2021-07-06T00:00:00.0Z");
        let p2 = ts("2021-07-07T00:00:00.0Z");

        let orders: [[&TimeRange; 3]; 3] = [[&a, &b, &inner], [&inner, &b, &a], [&b, &inner, &a]];
        for order in orders {
            let mut meta: Option<CellMetadata> = None;
            let mut last_width = chrono::Duration::zero();
            for r in order {
                let next = update(meta.as_ref(), "320071", "320071.tif", r, p1);
                let width = next.range.end - next.range.start;
                assert!(width >= last_width);
                last_width = width;
                meta = Some(next);
            }
            let meta = meta.unwrap();
            assert_eq!(meta.range.start, a.start);
            assert_eq!(meta.range.end, b.end);
        }

        let m = update(None, "1", "1.tif", &a, p1);
        assert_eq!(update(Some(&m), "1", "1.tif", &inner, p2).production, p2);
    }

    #[test]
    fn test_xml_roundtrip() {
        let m = update(
            None,
            "320071",
            "320071.tif",
            &range("2021-07-02T22:19:41.024Z", "2021-07-02T22:19:55.0Z"),
            ts("2021-07-03T10:00:00.0Z"),
        );
        let xml = m.to_xml().unwrap();
        assert!(xml.starts_with("<ImageryMetadata>"));
        assert!(xml.contains("<DataDay>2021183</DataDay>"));
        assert!(xml.contains("<PartialId>320071</PartialId>"));
        assert!(xml.contains("<DataStartDateTime>2021-07-02T22:19:41.024000Z</DataStartDateTime>"));
        assert_eq!(CellMetadata::from_xml(&xml).unwrap(), m);
    }

    #[test]
    fn test_stored_record_with_bad_date() {
        let xml = "<ImageryMetadata><ProviderProductId>a.tif</ProviderProductId>\
            <ProductionDateTime>2021-07-03T10:00:00.000000Z</ProductionDateTime>\
            <DataStartDateTime>July 2nd</DataStartDateTime>\
            <DataEndDateTime>2021-07-02T22:19:55.000000Z</DataEndDateTime>\
            <DataDay>2021183</DataDay><PartialId>a</PartialId></ImageryMetadata>";
        let err = CellMetadata::from_xml(xml).unwrap_err();
        assert!(matches!(err, BrowseError::InvalidTimestamp { .. }));
    }
}
