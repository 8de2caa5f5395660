//! Validity filter
//!
//! Decides whether an assembled collection is written as a spatial table or
//! as plain attributes, drops records whose geometry is missing or empty, and
//! normalizes attribute names to lower case.

use crate::assembler::IngestedCollection;
use crate::geometry;
use crate::normalizer::{FeatureRecord, GEOM_TEXT_ATTRIBUTE};
use hin_common::Crs;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{info, warn};

/// Why a collection is stored without a geometry column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeOnlyReason {
    /// No page was normalized with geometry
    NoGeometryColumn,
    /// A geometry column existed but no record had a usable geometry
    NoValidGeometries,
}

impl fmt::Display for AttributeOnlyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeOnlyReason::NoGeometryColumn => write!(f, "no geometry column"),
            AttributeOnlyReason::NoValidGeometries => write!(f, "no valid geometries"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Spatial,
    AttributeOnly(AttributeOnlyReason),
}

/// A collection ready for persistence
#[derive(Debug, Clone)]
pub struct FilteredCollection {
    pub records: Vec<FeatureRecord>,
    pub classification: Classification,
    pub crs: Crs,
    /// Records removed for having no usable geometry
    pub dropped: usize,
}

impl FilteredCollection {
    pub fn is_spatial(&self) -> bool {
        self.classification == Classification::Spatial
    }

    /// The same records with geometry stripped
    pub fn into_attribute_only(self, reason: AttributeOnlyReason) -> Self {
        let records = self
            .records
            .into_iter()
            .map(|record| FeatureRecord::attributes_only(record.attributes))
            .collect();

        Self {
            records,
            classification: Classification::AttributeOnly(reason),
            crs: self.crs,
            dropped: self.dropped,
        }
    }
}

/// A geometry is valid when it is present and has at least one coordinate
pub fn is_valid(record: &FeatureRecord) -> bool {
    record.geometry.as_ref().is_some_and(|g| !geometry::is_empty(g))
}

/// Classify `collection` and apply the matching record filter
pub fn classify(collection: IngestedCollection) -> FilteredCollection {
    let IngestedCollection {
        records,
        has_geometry_column,
        crs,
        ..
    } = collection;

    let (classification, records, dropped) = if !has_geometry_column {
        let records = records
            .into_iter()
            .map(|r| FeatureRecord::attributes_only(r.attributes))
            .collect();
        (
            Classification::AttributeOnly(AttributeOnlyReason::NoGeometryColumn),
            records,
            0,
        )
    } else {
        let total = records.len();
        let valid = records.iter().filter(|r| is_valid(r)).count();

        if valid == 0 {
            info!(records = total, "No valid geometries, storing attributes only");
            let records = records
                .into_iter()
                .map(|r| FeatureRecord::attributes_only(r.attributes))
                .collect();
            (
                Classification::AttributeOnly(AttributeOnlyReason::NoValidGeometries),
                records,
                0,
            )
        } else {
            if valid < total {
                info!(kept = valid, dropped = total - valid, "Dropping records with invalid geometry");
            }
            let records: Vec<FeatureRecord> = records.into_iter().filter(is_valid).collect();
            (Classification::Spatial, records, total - valid)
        }
    };

    let spatial = classification == Classification::Spatial;
    let mut collisions = BTreeSet::new();
    let records = records
        .into_iter()
        .map(|mut record| {
            let (attributes, dropped_keys) = normalize_attribute_names(record.attributes, spatial);
            collisions.extend(dropped_keys);
            record.attributes = attributes;
            record
        })
        .collect();

    if !collisions.is_empty() {
        warn!(
            columns = ?collisions,
            "Attribute names collide after lower-casing, keeping the first occurrence"
        );
    }

    FilteredCollection {
        records,
        classification,
        crs,
        dropped,
    }
}

/// Lower-case every attribute name
///
/// The first occurrence of a lower-cased name wins; the names that lost are
/// returned. In a spatial collection `geometry` is reserved for the geometry
/// column, so an attribute with that name becomes `geom_text`.
pub fn normalize_attribute_names(
    attributes: Map<String, Value>,
    spatial: bool,
) -> (Map<String, Value>, Vec<String>) {
    let mut normalized = Map::with_capacity(attributes.len());
    let mut collisions = Vec::new();

    for (name, value) in attributes {
        let mut lowered = name.to_lowercase();
        if spatial && lowered == "geometry" {
            lowered = GEOM_TEXT_ATTRIBUTE.to_string();
        }

        if normalized.contains_key(&lowered) {
            collisions.push(name);
        } else {
            normalized.insert(lowered, value);
        }
    }

    (normalized, collisions)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use geo::{point, Geometry, LineString};
    use proptest::prelude::*;
    use serde_json::json;

    fn record(id: i64, geometry: Option<Geometry<f64>>) -> FeatureRecord {
        let mut attributes = Map::new();
        attributes.insert("ID".to_string(), json!(id));
        FeatureRecord {
            attributes,
            geometry,
            measures: None,
        }
    }

    fn collection(records: Vec<FeatureRecord>, has_geometry_column: bool) -> IngestedCollection {
        IngestedCollection {
            records,
            has_geometry_column,
            crs: Crs::EPSG_26918,
            pages_loaded: 1,
            pages_skipped: 0,
        }
    }

    fn pt(x: f64) -> Option<Geometry<f64>> {
        Some(Geometry::Point(point!(x: x, y: 0.0)))
    }

    #[test]
    fn test_no_geometry_column() {
        let filtered = classify(collection(vec![record(1, None), record(2, None)], false));
        assert_eq!(
            filtered.classification,
            Classification::AttributeOnly(AttributeOnlyReason::NoGeometryColumn)
        );
        assert_eq!(filtered.records.len(), 2);
        assert_eq!(filtered.dropped, 0);
    }

    #[test]
    fn test_zero_valid_degrades_to_attribute_only() {
        let empty_line = Some(Geometry::LineString(LineString::<f64>::new(vec![])));
        let filtered = classify(collection(vec![record(1, None), record(2, empty_line)], true));

        assert_eq!(
            filtered.classification,
            Classification::AttributeOnly(AttributeOnlyReason::NoValidGeometries)
        );
        assert_eq!(filtered.records.len(), 2);
        assert!(filtered.records.iter().all(|r| r.geometry.is_none()));
    }

    #[test]
    fn test_mixed_validity_keeps_valid_subset() {
        let filtered = classify(collection(
            vec![record(1, pt(1.0)), record(2, None), record(3, pt(3.0))],
            true,
        ));

        assert!(filtered.is_spatial());
        assert_eq!(filtered.dropped, 1);
        let ids: Vec<i64> = filtered
            .records
            .iter()
            .map(|r| r.attributes["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_case_collision_keeps_first() {
        let mut attributes = Map::new();
        attributes.insert("Name".to_string(), json!("first"));
        attributes.insert("NAME".to_string(), json!("second"));

        let (normalized, collisions) = normalize_attribute_names(attributes, false);
        assert_eq!(normalized["name"], json!("first"));
        assert_eq!(collisions, vec!["NAME".to_string()]);
    }

    #[test]
    fn test_geometry_attribute_renamed_only_when_spatial() {
        let mut attributes = Map::new();
        attributes.insert("Geometry".to_string(), json!("POINT(1 2)"));

        let (spatial, _) = normalize_attribute_names(attributes.clone(), true);
        assert_eq!(spatial[GEOM_TEXT_ATTRIBUTE], json!("POINT(1 2)"));
        assert!(!spatial.contains_key("geometry"));

        let (plain, _) = normalize_attribute_names(attributes, false);
        assert_eq!(plain["geometry"], json!("POINT(1 2)"));
    }

    #[test]
    fn test_into_attribute_only() {
        let filtered = classify(collection(vec![record(1, pt(1.0))], true));
        let plain = filtered.into_attribute_only(AttributeOnlyReason::NoValidGeometries);
        assert!(!plain.is_spatial());
        assert!(plain.records[0].geometry.is_none());
        assert_eq!(plain.records[0].attributes["id"], json!(1));
    }

    proptest! {
        #[test]
        fn prop_name_normalization_is_idempotent(
            names in prop::collection::vec("[A-Za-z_]{1,8}", 0..12),
            spatial in any::<bool>(),
        ) {
            let attributes: Map<String, Value> = names
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), json!(i)))
                .collect();

            let (once, _) = normalize_attribute_names(attributes, spatial);
            let (twice, collisions) = normalize_attribute_names(once.clone(), spatial);

            prop_assert_eq!(&once, &twice);
            prop_assert!(collisions.is_empty());
            prop_assert!(once.keys().all(|k| *k == k.to_lowercase()));
        }
    }
}
