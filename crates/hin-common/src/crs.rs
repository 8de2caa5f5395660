//! Coordinate reference system identifiers
//!
//! Feature services do not reliably declare the spatial reference of the
//! coordinates they return, so every run carries an explicit target CRS that
//! is stamped onto persisted geometry columns.

use crate::error::{HinError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An authority-qualified CRS such as `EPSG:26918`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Crs {
    srid: i32,
}

impl Crs {
    /// NAD83 / UTM zone 18N, the default target for regional datasets
    pub const EPSG_26918: Crs = Crs { srid: 26918 };

    /// WGS 84 geographic coordinates, the GeoJSON default
    pub const EPSG_4326: Crs = Crs { srid: 4326 };

    pub fn from_srid(srid: i32) -> Result<Self> {
        if srid <= 0 {
            return Err(HinError::InvalidCrs(format!("SRID must be positive, got {}", srid)));
        }
        Ok(Self { srid })
    }

    /// Spatial reference id as understood by PostGIS
    pub fn srid(&self) -> i32 {
        self.srid
    }
}

impl FromStr for Crs {
    type Err = HinError;

    /// Accepts `EPSG:26918`, `epsg:26918` or a bare `26918`.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let code = match trimmed.split_once(':') {
            Some((authority, code)) if authority.eq_ignore_ascii_case("epsg") => code,
            Some((authority, _)) => {
                return Err(HinError::InvalidCrs(format!(
                    "unsupported authority '{}' in '{}'",
                    authority, trimmed
                )))
            },
            None => trimmed,
        };

        let srid = code
            .trim()
            .parse::<i32>()
            .map_err(|_| HinError::InvalidCrs(format!("'{}' is not an EPSG code", trimmed)))?;

        Self::from_srid(srid)
    }
}

impl TryFrom<String> for Crs {
    type Error = HinError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.to_string()
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.srid)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_epsg_forms() {
        assert_eq!("EPSG:26918".parse::<Crs>().unwrap(), Crs::EPSG_26918);
        assert_eq!("epsg:4326".parse::<Crs>().unwrap(), Crs::EPSG_4326);
        assert_eq!(" 26918 ".parse::<Crs>().unwrap().srid(), 26918);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("ESRI:102100".parse::<Crs>().is_err());
        assert!("EPSG:abc".parse::<Crs>().is_err());
        assert!("EPSG:-1".parse::<Crs>().is_err());
        assert!("".parse::<Crs>().is_err());
    }

    #[test]
    fn test_display_round_trips_through_serde() {
        let crs = Crs::EPSG_26918;
        assert_eq!(crs.to_string(), "EPSG:26918");

        let json = serde_json::to_string(&crs).unwrap();
        assert_eq!(json, "\"EPSG:26918\"");
        assert_eq!(serde_json::from_str::<Crs>(&json).unwrap(), crs);
    }
}
