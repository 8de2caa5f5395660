//! Geometry decoding and encoding
//!
//! Decodes GeoJSON (through the `geojson` crate) and EsriJSON geometry
//! members into `geo` types, and encodes `geo` geometries back into GeoJSON
//! text for PostGIS (`ST_GeomFromGeoJSON`). Coordinates beyond the first two
//! are dropped from the 2D geometry; EsriJSON measure values are returned
//! separately.

use crate::error::{IngestError, Result};
use geo::{
    Coord, CoordsIter, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point,
    Polygon, Winding,
};
use serde::Deserialize;
use serde_json::Value;

type Position = Vec<f64>;

fn coord(position: &[f64]) -> Result<Coord<f64>> {
    match position {
        [x, y, ..] => Ok(Coord { x: *x, y: *y }),
        _ => Err(IngestError::Geometry(format!(
            "position needs at least 2 values, got {}",
            position.len()
        ))),
    }
}

fn line(positions: &[Position]) -> Result<LineString<f64>> {
    positions
        .iter()
        .map(|p| coord(p))
        .collect::<Result<Vec<_>>>()
        .map(LineString::new)
}

// ============================================================================
// GeoJSON
// ============================================================================

/// Convert a parsed GeoJSON geometry into `geo`
///
/// Positions with fewer than two values are rejected up front; Z and any
/// further ordinates are dropped by the conversion.
pub fn geojson_to_geo(geometry: geojson::Geometry) -> Result<Geometry<f64>> {
    check_positions(&geometry.value)?;
    Geometry::try_from(geometry.value).map_err(|e| IngestError::Geometry(e.to_string()))
}

/// Decode one GeoJSON geometry member by its declared type
///
/// `null` decodes to `None`. An unknown type, a missing `coordinates` member
/// or malformed coordinates is an error the caller may downgrade.
pub fn decode_geojson(value: &Value) -> Result<Option<Geometry<f64>>> {
    if value.is_null() {
        return Ok(None);
    }

    let geometry: geojson::Geometry = serde_json::from_value(value.clone())
        .map_err(|e| IngestError::Geometry(format!("bad GeoJSON geometry: {}", e)))?;
    geojson_to_geo(geometry).map(Some)
}

fn check_positions(value: &geojson::Value) -> Result<()> {
    use geojson::Value as G;

    let short = |p: &Vec<f64>| p.len() < 2;
    let malformed = match value {
        G::Point(p) => short(p),
        G::MultiPoint(ps) | G::LineString(ps) => ps.iter().any(short),
        G::MultiLineString(ls) | G::Polygon(ls) => ls.iter().flatten().any(short),
        G::MultiPolygon(polygons) => polygons.iter().flatten().flatten().any(short),
        G::GeometryCollection(members) => {
            return members.iter().try_for_each(|member| check_positions(&member.value));
        },
    };

    if malformed {
        return Err(IngestError::Geometry(
            "position needs at least 2 values".to_string(),
        ));
    }
    Ok(())
}

fn from_coordinates<T: for<'de> Deserialize<'de>>(coordinates: Value) -> Result<T> {
    serde_json::from_value(coordinates)
        .map_err(|e| IngestError::Geometry(format!("bad coordinates: {}", e)))
}

// ============================================================================
// EsriJSON
// ============================================================================

/// A decoded Esri geometry plus the measure values it carried
#[derive(Debug, Clone, PartialEq)]
pub struct EsriShape {
    pub geometry: Geometry<f64>,
    pub measures: Option<Vec<f64>>,
}

/// Decode an Esri geometry object
///
/// `m_index` is the position of the measure value inside a path vertex: 2
/// for `[x, y, m]`, 3 when the layer also has Z (`[x, y, z, m]`). Measures
/// are only reported when every vertex has one.
pub fn decode_esri(value: &Value, m_index: usize) -> Result<Option<EsriShape>> {
    if value.is_null() {
        return Ok(None);
    }

    if let Some(paths) = value.get("paths") {
        let paths: Vec<Vec<Position>> = from_coordinates(paths.clone())?;
        return decode_esri_paths(&paths, m_index).map(Some);
    }

    if let Some(rings) = value.get("rings") {
        let rings: Vec<Vec<Position>> = from_coordinates(rings.clone())?;
        let geometry = esri_rings(&rings)?;
        return Ok(Some(EsriShape { geometry, measures: None }));
    }

    if let Some(points) = value.get("points") {
        let points: Vec<Position> = from_coordinates(points.clone())?;
        let points = points
            .iter()
            .map(|p| coord(p).map(Point::from))
            .collect::<Result<Vec<_>>>()?;
        return Ok(Some(EsriShape {
            geometry: MultiPoint::new(points).into(),
            measures: None,
        }));
    }

    match (value.get("x").and_then(Value::as_f64), value.get("y").and_then(Value::as_f64)) {
        (Some(x), Some(y)) => Ok(Some(EsriShape {
            geometry: Point::new(x, y).into(),
            measures: value.get("m").and_then(Value::as_f64).map(|m| vec![m]),
        })),
        // Esri encodes an empty point as {"x": null}
        _ if value.get("x").is_some() => Ok(None),
        _ => Err(IngestError::Geometry(
            "unrecognised Esri geometry: expected paths, rings, points or x/y".to_string(),
        )),
    }
}

/// One path becomes a LineString, several a MultiLineString
pub fn decode_esri_paths(paths: &[Vec<Position>], m_index: usize) -> Result<EsriShape> {
    let mut lines = paths.iter().map(|p| line(p)).collect::<Result<Vec<_>>>()?;

    let measures: Option<Vec<f64>> = paths
        .iter()
        .flatten()
        .map(|vertex| vertex.get(m_index).copied())
        .collect();
    let measures = measures.filter(|m| !m.is_empty());

    let geometry = if lines.len() == 1 {
        lines.remove(0).into()
    } else {
        MultiLineString::new(lines).into()
    };

    Ok(EsriShape { geometry, measures })
}

/// Esri rings carry no nesting: clockwise rings are exteriors and
/// counter-clockwise rings are holes of the exterior before them.
fn esri_rings(rings: &[Vec<Position>]) -> Result<Geometry<f64>> {
    let mut polygons: Vec<(LineString<f64>, Vec<LineString<f64>>)> = Vec::new();

    for ring in rings {
        let ring = line(ring)?;
        let is_hole = ring.is_ccw() && !polygons.is_empty();
        match polygons.last_mut() {
            Some((_, holes)) if is_hole => holes.push(ring),
            _ => polygons.push((ring, Vec::new())),
        }
    }

    let mut polygons: Vec<Polygon<f64>> = polygons
        .into_iter()
        .map(|(exterior, holes)| Polygon::new(exterior, holes))
        .collect();

    Ok(match polygons.len() {
        0 => Polygon::new(LineString::new(Vec::new()), Vec::new()).into(),
        1 => polygons.remove(0).into(),
        _ => MultiPolygon::new(polygons).into(),
    })
}

// ============================================================================
// Encoding and checks
// ============================================================================

/// A geometry with no coordinates at all
pub fn is_empty(geometry: &Geometry<f64>) -> bool {
    geometry.coords_count() == 0
}

/// Encode as a GeoJSON geometry object
///
/// Returns `None` for geometries PostGIS cannot take: non-finite
/// coordinates, or a polygon whose exterior ring is empty while it still
/// has holes.
pub fn encode_geojson(geometry: &Geometry<f64>) -> Option<Value> {
    if geometry.coords_iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return None;
    }
    if has_hollow_polygon(geometry) {
        return None;
    }

    serde_json::to_value(geojson::Geometry::new(geojson::Value::from(geometry))).ok()
}

fn has_hollow_polygon(geometry: &Geometry<f64>) -> bool {
    let hollow = |p: &Polygon<f64>| {
        p.exterior().0.is_empty() && p.interiors().iter().any(|r| !r.0.is_empty())
    };

    match geometry {
        Geometry::Polygon(p) => hollow(p),
        Geometry::MultiPolygon(mp) => mp.iter().any(hollow),
        Geometry::GeometryCollection(gc) => gc.iter().any(has_hollow_polygon),
        _ => false,
    }
}
