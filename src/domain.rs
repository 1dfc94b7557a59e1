use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::WiscatError;

/// Bucket for records that declare no organization.
pub const UNSPECIFIED_ORGANIZATION: &str = "unspecified";

static URN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^urn:[A-Za-z0-9][A-Za-z0-9.-]*(:[^:\s/]+){3,}$").expect("valid URN pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DataPolicy {
    Core,
    Recommended,
}

impl DataPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataPolicy::Core => "core",
            DataPolicy::Recommended => "recommended",
        }
    }
}

impl fmt::Display for DataPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DataPolicy {
    type Err = WiscatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "core" => Ok(DataPolicy::Core),
            "recommended" => Ok(DataPolicy::Recommended),
            _ => Err(WiscatError::InvalidArgument(format!(
                "unknown data policy: {value}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    Any,
    #[default]
    All,
}

impl MatchMode {
    /// `haystack` must already be lower-cased.
    pub fn matches(&self, haystack: &str, terms: &[String]) -> bool {
        let mut lowered = terms.iter().map(|term| term.to_lowercase());
        match self {
            MatchMode::Any => lowered.any(|term| haystack.contains(&term)),
            MatchMode::All => lowered.all(|term| haystack.contains(&term)),
        }
    }
}

/// Canonical catalogue record identifier, e.g.
/// `urn:wmo:md:ca-eccc-msc:weather.observations.swob-realtime` or the
/// legacy `urn:x-wmo:md:can:eccc-msc:<uuid>` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(String);

impl RecordId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wraps an identifier read from a record without validating it. Cached
    /// WIS1 records carry identifiers with empty components.
    pub(crate) fn from_raw(value: &str) -> Self {
        Self(value.to_string())
    }

    fn component(&self, index: usize) -> Option<&str> {
        self.0.split(':').nth(index).filter(|value| !value.is_empty())
    }

    /// Fourth `:`-separated component, the authority that issued the record.
    pub fn citation_authority(&self) -> Option<&str> {
        self.component(3)
    }

    /// ISO 3166 alpha-3 country code, present only in the legacy identifier form.
    pub fn country(&self) -> Option<&str> {
        self.component(3).filter(|value| {
            value.len() == 3
                && value.chars().all(|ch| ch.is_ascii_alphabetic())
                && self.0.split(':').count() > 5
        })
    }

    pub fn centre_id(&self) -> Option<&str> {
        match self.country() {
            Some(_) => self.component(4),
            None => self.component(3),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = WiscatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if !URN_PATTERN.is_match(trimmed) {
            return Err(WiscatError::InvalidArgument(format!(
                "record identifier is not a URN: {value}"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Result<Self, WiscatError> {
        let values = [west, south, east, north];
        if values.iter().any(|value| !value.is_finite()) {
            return Err(WiscatError::InvalidArgument(
                "bounding box values must be finite numbers".to_string(),
            ));
        }
        if !(-180.0..=180.0).contains(&west) || !(-180.0..=180.0).contains(&east) {
            return Err(WiscatError::InvalidArgument(format!(
                "bounding box longitudes must lie within [-180, 180]: {west}, {east}"
            )));
        }
        if !(-90.0..=90.0).contains(&south) || !(-90.0..=90.0).contains(&north) {
            return Err(WiscatError::InvalidArgument(format!(
                "bounding box latitudes must lie within [-90, 90]: {south}, {north}"
            )));
        }
        if west >= east {
            return Err(WiscatError::InvalidArgument(format!(
                "bounding box west ({west}) must be less than east ({east})"
            )));
        }
        if south >= north {
            return Err(WiscatError::InvalidArgument(format!(
                "bounding box south ({south}) must be less than north ({north})"
            )));
        }
        Ok(Self {
            west,
            south,
            east,
            north,
        })
    }

    pub fn from_slice(values: &[f64]) -> Result<Self, WiscatError> {
        match values {
            [west, south, east, north] => Self::new(*west, *south, *east, *north),
            _ => Err(WiscatError::InvalidArgument(format!(
                "bounding box needs 4 values (west,south,east,north), got {}",
                values.len()
            ))),
        }
    }

    /// Envelope of a list of `[lon, lat]` positions. Not validated, records
    /// in the wild carry degenerate point geometries.
    pub fn envelope<'a>(points: impl IntoIterator<Item = &'a [f64]>) -> Option<Self> {
        let mut bbox: Option<Self> = None;
        for point in points {
            let [x, y, ..] = point else {
                continue;
            };
            bbox = Some(match bbox {
                None => Self {
                    west: *x,
                    south: *y,
                    east: *x,
                    north: *y,
                },
                Some(current) => Self {
                    west: current.west.min(*x),
                    south: current.south.min(*y),
                    east: current.east.max(*x),
                    north: current.north.max(*y),
                },
            });
        }
        bbox
    }

    pub fn to_query_value(&self) -> String {
        format!("{},{},{},{}", self.west, self.south, self.east, self.north)
    }
}

impl FromStr for BoundingBox {
    type Err = WiscatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let values = value
            .split(',')
            .map(|part| {
                part.trim().parse::<f64>().map_err(|_| {
                    WiscatError::InvalidArgument(format!("invalid bounding box value: {part}"))
                })
            })
            .collect::<Result<Vec<_>, WiscatError>>()?;
        Self::from_slice(&values)
    }
}

/// One page of a remote catalogue search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub bbox: Option<BoundingBox>,
    pub data_policy: Option<DataPolicy>,
    pub begin: Option<String>,
    pub end: Option<String>,
    pub sortby: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl SearchQuery {
    /// Request parameters in the order the catalogue documents them.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(q) = &self.q {
            params.push(("q", q.replace('/', "\\/")));
        }
        if let Some(bbox) = &self.bbox {
            params.push(("bbox", bbox.to_query_value()));
        }
        if let Some(policy) = self.data_policy {
            params.push(("wmo:dataPolicy", policy.to_string()));
        }
        if self.begin.is_some() || self.end.is_some() {
            let begin = self.begin.as_deref().unwrap_or("..");
            let end = self.end.as_deref().unwrap_or("..");
            params.push(("datetime", format!("{begin}/{end}")));
        }
        if let Some(sortby) = &self.sortby {
            let sortby = if sortby.contains(':') {
                sortby.clone()
            } else {
                format!("{sortby}:A")
            };
            params.push(("sortby", sortby));
        }
        if let Some(limit) = self.limit {
            params.push(("limit", limit.to_string()));
        }
        if let Some(offset) = self.offset {
            params.push(("offset", offset.to_string()));
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_record_id_legacy_form() {
        let id: RecordId = "urn:x-wmo:md:can:eccc-msc:c7c9d726-c48a-49e3-98ab-78a1ab87cda8"
            .parse()
            .unwrap();
        assert_eq!(id.country(), Some("can"));
        assert_eq!(id.centre_id(), Some("eccc-msc"));
        assert_eq!(id.citation_authority(), Some("can"));
    }

    #[test]
    fn parse_record_id_wcmp2_form() {
        let id: RecordId = "urn:wmo:md:ca-eccc-msc:weather.observations.swob-realtime"
            .parse()
            .unwrap();
        assert_eq!(id.country(), None);
        assert_eq!(id.centre_id(), Some("ca-eccc-msc"));
    }

    #[test]
    fn parse_record_id_invalid() {
        let err = "not-a-urn".parse::<RecordId>().unwrap_err();
        assert_matches!(err, WiscatError::InvalidArgument(_));
        let err = "urn:wmo:md".parse::<RecordId>().unwrap_err();
        assert_matches!(err, WiscatError::InvalidArgument(_));
    }

    #[test]
    fn match_mode_any_and_all() {
        let terms = vec!["GRIB".to_string(), "ozone".to_string()];
        assert!(MatchMode::Any.matches("grib2 forecast", &terms));
        assert!(!MatchMode::All.matches("grib2 forecast", &terms));
        assert!(MatchMode::All.matches("grib2 ozone forecast", &terms));
    }

    #[test]
    fn query_params_escape_and_default_sort_direction() {
        let query = SearchQuery {
            q: Some("a/b".to_string()),
            sortby: Some("title".to_string()),
            end: Some("2024-01-01T00:00:00Z".to_string()),
            ..SearchQuery::default()
        };
        let params = query.to_params();
        assert_eq!(params[0], ("q", "a\\/b".to_string()));
        assert_eq!(params[1], ("datetime", "../2024-01-01T00:00:00Z".to_string()));
        assert_eq!(params[2], ("sortby", "title:A".to_string()));
    }
}
