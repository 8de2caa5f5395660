//! Geometry normalizer
//!
//! Turns one raw page into uniform [`FeatureRecord`]s. Each dialect has an
//! ordered chain of [`Strategy`] values; the first strategy that succeeds
//! produces the page. Later strategies keep less geometry, down to plain
//! attribute records, so a bad page degrades instead of failing the service.

use crate::error::{IngestError, Result};
use crate::fetcher::RawPage;
use crate::geometry::{decode_esri, decode_geojson, geojson_to_geo};
use crate::service::Dialect;
use geo::Geometry;
use hin_common::Crs;
use serde_json::{Map, Value};
use std::fmt;
use tracing::{debug, warn};

/// Auxiliary attribute holding serialized EsriJSON measure values
pub const M_VALUES_ATTRIBUTE: &str = "m_values";

/// Where a GeoJSON property literally named `geometry` is moved to
pub const GEOM_TEXT_ATTRIBUTE: &str = "geom_text";

/// One feature after normalization
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureRecord {
    pub attributes: Map<String, Value>,
    pub geometry: Option<Geometry<f64>>,
    /// Linear-referencing M values, in vertex order
    pub measures: Option<Vec<f64>>,
}

impl FeatureRecord {
    pub fn attributes_only(attributes: Map<String, Value>) -> Self {
        Self {
            attributes,
            ..Default::default()
        }
    }
}

/// A way of turning a page's feature list into records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    EsriGeometry,
    EsriAttributes,
    /// Typed deserialization of the whole page in one pass
    GeoJsonBulk,
    /// Dispatch on each feature's declared geometry type
    GeoJsonPerFeature,
    GeoJsonAttributes,
}

const ESRI_GEOMETRY_CHAIN: &[Strategy] = &[Strategy::EsriGeometry, Strategy::EsriAttributes];
const ESRI_ATTRIBUTE_CHAIN: &[Strategy] = &[Strategy::EsriAttributes];
const GEOJSON_CHAIN: &[Strategy] = &[
    Strategy::GeoJsonBulk,
    Strategy::GeoJsonPerFeature,
    Strategy::GeoJsonAttributes,
];

impl Strategy {
    /// Strategies to try for `features`, in order
    pub fn chain(dialect: Dialect, features: &[Value]) -> &'static [Strategy] {
        match dialect {
            Dialect::GeoJson => GEOJSON_CHAIN,
            Dialect::EsriJson => {
                let geometry_bearing = features
                    .first()
                    .is_some_and(|feature| feature.get("geometry").is_some());
                if geometry_bearing {
                    ESRI_GEOMETRY_CHAIN
                } else {
                    ESRI_ATTRIBUTE_CHAIN
                }
            },
        }
    }

    /// Whether records from this strategy belong in a geometry column
    pub fn carries_geometry(self) -> bool {
        matches!(
            self,
            Strategy::EsriGeometry | Strategy::GeoJsonBulk | Strategy::GeoJsonPerFeature
        )
    }

    fn apply(self, features: &[Value], m_index: usize) -> Result<Vec<FeatureRecord>> {
        match self {
            Strategy::EsriGeometry => esri_geometry(features, m_index),
            Strategy::EsriAttributes => esri_attributes(features),
            Strategy::GeoJsonBulk => geojson_bulk(features),
            Strategy::GeoJsonPerFeature => geojson_per_feature(features),
            Strategy::GeoJsonAttributes => Ok(geojson_attributes(features)),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::EsriGeometry => "esri-geometry",
            Strategy::EsriAttributes => "esri-attributes",
            Strategy::GeoJsonBulk => "geojson-bulk",
            Strategy::GeoJsonPerFeature => "geojson-per-feature",
            Strategy::GeoJsonAttributes => "geojson-attributes",
        };
        f.write_str(name)
    }
}

/// The normalized form of one page
#[derive(Debug, Clone)]
pub struct NormalizedPage {
    pub offset: u64,
    pub records: Vec<FeatureRecord>,
    pub strategy: Strategy,
    pub crs: Crs,
}

impl NormalizedPage {
    pub fn geometry_bearing(&self) -> bool {
        self.strategy.carries_geometry()
    }
}

pub struct GeometryNormalizer {
    dialect: Dialect,
    crs: Crs,
}

impl GeometryNormalizer {
    pub fn new(dialect: Dialect, crs: Crs) -> Self {
        Self { dialect, crs }
    }

    /// Normalize `page` with the first strategy in its chain that succeeds
    pub fn normalize(&self, page: &RawPage) -> Result<NormalizedPage> {
        let features = page.features().unwrap_or_default();
        let features = match self.dialect {
            Dialect::GeoJson => detach_geometry_properties(features),
            Dialect::EsriJson => features.to_vec(),
        };

        let m_index = if page.flag("hasZ") && page.flag("hasM") { 3 } else { 2 };
        let mut last_error = None;

        for &strategy in Strategy::chain(self.dialect, &features) {
            match strategy.apply(&features, m_index) {
                Ok(records) => {
                    debug!(offset = page.offset, %strategy, records = records.len(), "Normalized page");
                    return Ok(NormalizedPage {
                        offset: page.offset,
                        records,
                        strategy,
                        crs: self.crs,
                    });
                },
                Err(e) => {
                    warn!(offset = page.offset, %strategy, error = %e, "Normalization strategy failed");
                    last_error = Some(e);
                },
            }
        }

        Err(last_error.unwrap_or_else(|| {
            IngestError::MalformedPayload(format!("no strategy for page at offset {}", page.offset))
        }))
    }
}

// ============================================================================
// EsriJSON strategies
// ============================================================================

fn esri_attributes_of(feature: &Value, position: usize) -> Result<Map<String, Value>> {
    let object = feature.as_object().ok_or_else(|| {
        IngestError::MalformedPayload(format!("feature {} is not an object", position))
    })?;

    match object.get("attributes") {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(attributes)) => Ok(attributes.clone()),
        Some(_) => Err(IngestError::MalformedPayload(format!(
            "feature {} has non-object attributes",
            position
        ))),
    }
}

fn esri_geometry(features: &[Value], m_index: usize) -> Result<Vec<FeatureRecord>> {
    let mut records = Vec::with_capacity(features.len());

    for (position, feature) in features.iter().enumerate() {
        let mut record = FeatureRecord::attributes_only(esri_attributes_of(feature, position)?);

        let Some(geometry) = feature.get("geometry") else {
            records.push(record);
            continue;
        };

        match decode_esri(geometry, m_index) {
            Ok(Some(shape)) => {
                if shape.measures.is_some() {
                    record.attributes.insert(
                        M_VALUES_ATTRIBUTE.to_string(),
                        Value::String(measure_text(geometry, m_index)),
                    );
                }
                record.geometry = Some(shape.geometry);
                record.measures = shape.measures;
            },
            Ok(None) => {},
            Err(e) => warn!(feature = position, error = %e, "Dropping unreadable Esri geometry"),
        }

        records.push(record);
    }

    Ok(records)
}

/// Measure values as list text, `[10, 20.5]`, each number in its source form
fn measure_text(geometry: &Value, m_index: usize) -> String {
    let numbers: Vec<String> = match geometry.get("paths").and_then(Value::as_array) {
        Some(paths) => paths
            .iter()
            .filter_map(Value::as_array)
            .flatten()
            .filter_map(Value::as_array)
            .filter_map(|vertex| vertex.get(m_index))
            .map(Value::to_string)
            .collect(),
        None => geometry.get("m").map(Value::to_string).into_iter().collect(),
    };

    format!("[{}]", numbers.join(", "))
}

fn esri_attributes(features: &[Value]) -> Result<Vec<FeatureRecord>> {
    features
        .iter()
        .enumerate()
        .map(|(position, feature)| {
            esri_attributes_of(feature, position).map(FeatureRecord::attributes_only)
        })
        .collect()
}

// ============================================================================
// GeoJSON strategies
// ============================================================================

/// Move a `geometry` property out of the way of the reserved geometry member
///
/// Non-null values are kept under [`GEOM_TEXT_ATTRIBUTE`]; the original key
/// is always removed.
pub fn detach_geometry_properties(features: &[Value]) -> Vec<Value> {
    let mut features = features.to_vec();

    for feature in &mut features {
        let Some(properties) = feature.get_mut("properties").and_then(Value::as_object_mut) else {
            continue;
        };
        if let Some(value) = properties.remove("geometry") {
            if !value.is_null() {
                properties.insert(GEOM_TEXT_ATTRIBUTE.to_string(), value);
            }
        }
    }

    features
}

fn properties_of(feature: &Value) -> Map<String, Value> {
    feature
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

/// Parse the whole page as typed GeoJSON features in one pass
///
/// Any feature that is not a well-formed `Feature`, or any geometry that does
/// not convert, fails the page so the next strategy can take over.
fn geojson_bulk(features: &[Value]) -> Result<Vec<FeatureRecord>> {
    let typed: Vec<geojson::Feature> = serde_json::from_value(Value::Array(features.to_vec()))
        .map_err(|e| IngestError::Geometry(format!("bulk decode failed: {}", e)))?;

    typed
        .into_iter()
        .map(|feature| {
            Ok(FeatureRecord {
                attributes: feature.properties.unwrap_or_default(),
                geometry: feature.geometry.map(geojson_to_geo).transpose()?,
                measures: None,
            })
        })
        .collect()
}

fn geojson_per_feature(features: &[Value]) -> Result<Vec<FeatureRecord>> {
    let mut records = Vec::with_capacity(features.len());

    for (position, feature) in features.iter().enumerate() {
        if !feature.is_object() {
            return Err(IngestError::MalformedPayload(format!(
                "feature {} is not an object",
                position
            )));
        }

        let geometry = match feature.get("geometry").map(decode_geojson) {
            None => None,
            Some(Ok(geometry)) => geometry,
            Some(Err(e)) => {
                warn!(feature = position, error = %e, "Dropping unreadable GeoJSON geometry");
                None
            },
        };

        records.push(FeatureRecord {
            attributes: properties_of(feature),
            geometry,
            measures: None,
        });
    }

    Ok(records)
}

fn geojson_attributes(features: &[Value]) -> Vec<FeatureRecord> {
    features
        .iter()
        .enumerate()
        .filter_map(|(position, feature)| {
            if feature.is_object() {
                Some(FeatureRecord::attributes_only(properties_of(feature)))
            } else {
                warn!(feature = position, "Skipping feature that is not an object");
                None
            }
        })
        .collect()
}
