//! Persistence sink
//!
//! Turns a filtered collection into a [`TablePlan`] and hands it to a
//! [`TableWriter`]. Write strategies are tried in order: a spatial table
//! first, then a plain attribute table when the spatial write finds no
//! geometry it can store.

pub mod postgis;

use crate::error::{IngestError, Result};
use crate::geometry::encode_geojson;
use crate::normalizer::FeatureRecord;
use crate::service::ServiceDescriptor;
use crate::validity::{AttributeOnlyReason, FilteredCollection};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

pub use postgis::PostgisWriter;

/// Name of the geometry column in spatial tables
pub const GEOMETRY_COLUMN: &str = "geometry";

/// SQL type of an attribute column, inferred from its values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Boolean,
    BigInt,
    Double,
    Text,
}

impl ColumnType {
    /// Type of a single value; `None` for null
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(ColumnType::Boolean),
            Value::Number(n) if n.is_i64() => Some(ColumnType::BigInt),
            Value::Number(_) => Some(ColumnType::Double),
            Value::String(_) | Value::Array(_) | Value::Object(_) => Some(ColumnType::Text),
        }
    }

    /// Widen two observed types into one that holds both
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            (ColumnType::BigInt, ColumnType::Double) | (ColumnType::Double, ColumnType::BigInt) => {
                ColumnType::Double
            },
            _ => ColumnType::Text,
        }
    }

    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Double => "DOUBLE PRECISION",
            ColumnType::Text => "TEXT",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Boolean(bool),
    BigInt(i64),
    Double(f64),
    Text(String),
}

impl CellValue {
    /// Convert an attribute value into a cell of column type `ty`
    ///
    /// Arrays and objects land in text columns as serialized JSON.
    pub fn coerce(value: Option<&Value>, ty: ColumnType) -> Self {
        match (value, ty) {
            (None | Some(Value::Null), _) => CellValue::Null,
            (Some(Value::Bool(b)), ColumnType::Boolean) => CellValue::Boolean(*b),
            (Some(Value::Number(n)), ColumnType::BigInt) => n.as_i64().map_or(CellValue::Null, CellValue::BigInt),
            (Some(Value::Number(n)), ColumnType::Double) => n.as_f64().map_or(CellValue::Null, CellValue::Double),
            (Some(Value::String(s)), ColumnType::Text) => CellValue::Text(s.clone()),
            (Some(other), ColumnType::Text) => CellValue::Text(other.to_string()),
            _ => CellValue::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

/// Geometry values in wire form (GeoJSON text) with the SRID to stamp
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryColumn {
    pub srid: i32,
    pub values: Vec<Option<String>>,
}

impl GeometryColumn {
    pub fn non_null(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }
}

/// Everything needed to replace one table
#[derive(Debug, Clone, PartialEq)]
pub struct TablePlan {
    pub schema: String,
    pub table: String,
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<CellValue>>,
    pub geometry: Option<GeometryColumn>,
}

impl TablePlan {
    /// Attribute-only table; any geometry on the records is ignored
    pub fn plain(schema: &str, table: &str, records: &[FeatureRecord]) -> Self {
        let columns = infer_columns(records);
        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|column| CellValue::coerce(record.attributes.get(&column.name), column.ty))
                    .collect()
            })
            .collect();

        Self {
            schema: schema.to_string(),
            table: table.to_string(),
            columns,
            rows,
            geometry: None,
        }
    }

    /// Spatial table stamped with `srid`
    ///
    /// Geometries that cannot be put in wire form (non-finite coordinates,
    /// unsupported kinds) become NULL. When none survive the result is
    /// [`IngestError::NoValidGeometries`].
    pub fn spatial(schema: &str, table: &str, records: &[FeatureRecord], srid: i32) -> Result<Self> {
        let values: Vec<Option<String>> = records
            .iter()
            .map(|record| {
                record
                    .geometry
                    .as_ref()
                    .and_then(encode_geojson)
                    .map(|geojson| geojson.to_string())
            })
            .collect();

        let geometry = GeometryColumn { srid, values };
        if geometry.non_null() == 0 {
            return Err(IngestError::NoValidGeometries);
        }

        let mut plan = Self::plain(schema, table, records);
        if let Some(position) = plan.columns.iter().position(|c| c.name == GEOMETRY_COLUMN) {
            plan.columns.remove(position);
            for row in &mut plan.rows {
                row.remove(position);
            }
        }
        plan.geometry = Some(geometry);
        Ok(plan)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Bound parameters per inserted row
    pub fn params_per_row(&self) -> usize {
        self.columns.len() + usize::from(self.geometry.is_some())
    }
}

/// Attribute columns in first-seen order with merged types
fn infer_columns(records: &[FeatureRecord]) -> Vec<Column> {
    let mut order: Vec<(String, Option<ColumnType>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in records {
        for (name, value) in &record.attributes {
            let observed = ColumnType::of(value);
            match index.get(name) {
                Some(&i) => {
                    let slot = &mut order[i].1;
                    *slot = match (*slot, observed) {
                        (Some(a), Some(b)) => Some(a.merge(b)),
                        (a, b) => a.or(b),
                    };
                },
                None => {
                    index.insert(name.clone(), order.len());
                    order.push((name.clone(), observed));
                },
            }
        }
    }

    order
        .into_iter()
        .map(|(name, ty)| Column {
            name,
            ty: ty.unwrap_or(ColumnType::Text),
        })
        .collect()
}

/// Replaces a table with the contents of a plan
#[async_trait]
pub trait TableWriter: Send + Sync {
    /// Drop any existing table of the same name, create it and insert every
    /// row, atomically. Returns the number of rows written.
    async fn replace_table(&self, plan: &TablePlan) -> Result<u64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStrategy {
    Spatial,
    Plain,
}

impl fmt::Display for WriteStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteStrategy::Spatial => write!(f, "spatial"),
            WriteStrategy::Plain => write!(f, "plain"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub rows: u64,
    pub strategy: WriteStrategy,
}

impl WriteOutcome {
    pub fn spatial(&self) -> bool {
        self.strategy == WriteStrategy::Spatial
    }
}

#[derive(Clone)]
pub struct PersistenceSink {
    writer: Arc<dyn TableWriter>,
}

impl PersistenceSink {
    pub fn new(writer: Arc<dyn TableWriter>) -> Self {
        Self { writer }
    }

    /// Strategies to try for a collection, in order
    pub fn strategies(collection: &FilteredCollection) -> &'static [WriteStrategy] {
        if collection.is_spatial() {
            &[WriteStrategy::Spatial, WriteStrategy::Plain]
        } else {
            &[WriteStrategy::Plain]
        }
    }

    /// Replace the descriptor's table with `collection`
    pub async fn write(
        &self,
        collection: &FilteredCollection,
        descriptor: &ServiceDescriptor,
    ) -> Result<WriteOutcome> {
        let table = descriptor.table_name();
        let schema = descriptor.target_schema.as_str();

        for &strategy in Self::strategies(collection) {
            let result = match strategy {
                WriteStrategy::Spatial => {
                    match TablePlan::spatial(schema, &table, &collection.records, collection.crs.srid()) {
                        Ok(plan) => self.writer.replace_table(&plan).await,
                        Err(e) => Err(e),
                    }
                },
                WriteStrategy::Plain => {
                    let plan = TablePlan::plain(schema, &table, &collection.records);
                    self.writer.replace_table(&plan).await
                },
            };

            match result {
                Ok(rows) => {
                    info!(service = %descriptor.key, table = %table, rows, %strategy, "Table replaced");
                    return Ok(WriteOutcome { rows, strategy });
                },
                Err(IngestError::NoValidGeometries) => {
                    warn!(
                        service = %descriptor.key,
                        reason = %AttributeOnlyReason::NoValidGeometries,
                        "Spatial write failed, falling back to plain table"
                    );
                },
                Err(e) => return Err(e),
            }
        }

        Err(IngestError::Persistence(format!("no write strategy succeeded for '{}'", table)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use geo::{point, Geometry};
    use serde_json::{json, Map};

    fn record(attributes: Value, geometry: Option<Geometry<f64>>) -> FeatureRecord {
        let attributes: Map<String, Value> = attributes.as_object().cloned().unwrap();
        FeatureRecord {
            attributes,
            geometry,
            measures: None,
        }
    }

    #[test]
    fn test_column_type_merge() {
        use ColumnType::*;
        assert_eq!(BigInt.merge(BigInt), BigInt);
        assert_eq!(BigInt.merge(Double), Double);
        assert_eq!(Double.merge(BigInt), Double);
        assert_eq!(Boolean.merge(BigInt), Text);
        assert_eq!(Text.merge(Double), Text);
    }

    #[test]
    fn test_infer_columns() {
        let records = vec![
            record(json!({"id": 1, "speed": 25, "name": "A", "empty": null}), None),
            record(json!({"id": 2, "speed": 35.5, "name": null, "flag": true}), None),
        ];

        let columns = infer_columns(&records);
        let described: Vec<(&str, ColumnType)> =
            columns.iter().map(|c| (c.name.as_str(), c.ty)).collect();

        assert_eq!(
            described,
            vec![
                ("id", ColumnType::BigInt),
                ("speed", ColumnType::Double),
                ("name", ColumnType::Text),
                ("empty", ColumnType::Text),
                ("flag", ColumnType::Boolean),
            ]
        );
    }

    #[test]
    fn test_plain_plan_fills_missing_cells_with_null() {
        let records = vec![
            record(json!({"id": 1, "tags": ["a", "b"]}), None),
            record(json!({"id": 2}), None),
        ];

        let plan = TablePlan::plain("input", "crashes", &records);
        assert_eq!(plan.row_count(), 2);
        assert_eq!(plan.rows[0], vec![CellValue::BigInt(1), CellValue::Text("[\"a\",\"b\"]".to_string())]);
        assert_eq!(plan.rows[1], vec![CellValue::BigInt(2), CellValue::Null]);
        assert!(plan.geometry.is_none());
        assert_eq!(plan.params_per_row(), 2);
    }

    #[test]
    fn test_spatial_plan() {
        let records = vec![
            record(json!({"id": 1}), Some(Geometry::Point(point!(x: 1.0, y: 2.0)))),
            record(json!({"id": 2}), Some(Geometry::Point(point!(x: f64::NAN, y: 2.0)))),
        ];

        let plan = TablePlan::spatial("input", "crashes", &records, 26918).unwrap();
        let geometry = plan.geometry.as_ref().unwrap();
        assert_eq!(geometry.srid, 26918);
        assert_eq!(geometry.non_null(), 1);
        assert!(geometry.values[1].is_none());
        assert_eq!(plan.params_per_row(), 2);
    }

    #[test]
    fn test_spatial_plan_without_wire_geometries() {
        let records = vec![record(
            json!({"id": 1}),
            Some(Geometry::Point(point!(x: f64::INFINITY, y: 0.0))),
        )];
        assert!(matches!(
            TablePlan::spatial("input", "t", &records, 26918),
            Err(IngestError::NoValidGeometries)
        ));
    }

    #[test]
    fn test_spatial_plan_drops_geometry_named_attribute() {
        let records = vec![record(
            json!({"id": 1, "geometry": "stale"}),
            Some(Geometry::Point(point!(x: 1.0, y: 2.0))),
        )];

        let plan = TablePlan::spatial("input", "t", &records, 26918).unwrap();
        assert_eq!(plan.columns.len(), 1);
        assert_eq!(plan.rows[0], vec![CellValue::BigInt(1)]);
    }
}
