//! Geofence domain model.
//!
//! Stored geofences always carry a `Polygon` or `MultiPolygon`. Line geometries are
//! accepted only at ingestion ([`GeofenceGeometry`]) and closed into polygons there.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// A GeoJSON position, `[lon, lat, ...]`.
pub type Position = Vec<f64>;

/// A sequence of positions forming a ring or a line.
pub type Ring = Vec<Position>;

/// Polygonal geometry as stored on a geofence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PolygonGeometry {
    Polygon { coordinates: Vec<Ring> },
    MultiPolygon { coordinates: Vec<Vec<Ring>> },
}

impl PolygonGeometry {
    /// Every member polygon as a list of rings.
    pub fn polygons(&self) -> Vec<&[Ring]> {
        match self {
            PolygonGeometry::Polygon { coordinates } => vec![coordinates.as_slice()],
            PolygonGeometry::MultiPolygon { coordinates } => {
                coordinates.iter().map(|p| p.as_slice()).collect()
            }
        }
    }

    /// Whether the geometry has no positions at all.
    pub fn is_empty(&self) -> bool {
        self.polygons()
            .iter()
            .all(|rings| rings.iter().all(|ring| ring.is_empty()))
    }
}

/// Geometry accepted at the ingestion boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GeofenceGeometry {
    Polygon { coordinates: Vec<Ring> },
    MultiPolygon { coordinates: Vec<Vec<Ring>> },
    LineString { coordinates: Ring },
    MultiLineString { coordinates: Vec<Ring> },
}

impl GeofenceGeometry {
    /// Converts to a stored polygon, closing any open line into a ring.
    pub fn into_polygon(self) -> PolygonGeometry {
        match self {
            GeofenceGeometry::Polygon { coordinates } => PolygonGeometry::Polygon { coordinates },
            GeofenceGeometry::MultiPolygon { coordinates } => {
                PolygonGeometry::MultiPolygon { coordinates }
            }
            GeofenceGeometry::LineString { coordinates } => PolygonGeometry::Polygon {
                coordinates: vec![close_ring(coordinates)],
            },
            GeofenceGeometry::MultiLineString { coordinates } => PolygonGeometry::Polygon {
                coordinates: coordinates.into_iter().map(close_ring).collect(),
            },
        }
    }
}

impl From<PolygonGeometry> for GeofenceGeometry {
    fn from(polygon: PolygonGeometry) -> Self {
        match polygon {
            PolygonGeometry::Polygon { coordinates } => GeofenceGeometry::Polygon { coordinates },
            PolygonGeometry::MultiPolygon { coordinates } => {
                GeofenceGeometry::MultiPolygon { coordinates }
            }
        }
    }
}

/// Appends the first position when the line does not already end on it.
fn close_ring(mut line: Ring) -> Ring {
    let needs_closing = match (line.first(), line.last()) {
        (Some(first), Some(last)) => {
            first.first() != last.first() || first.get(1) != last.get(1)
        }
        _ => false,
    };
    if needs_closing {
        let first = line[0].clone();
        line.push(first);
    }
    line
}

/// A named polygonal boundary, optionally scoped to one badge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Geofence {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,

    pub polygon: PolygonGeometry,

    /// Badge this geofence applies to, if any.
    #[serde(default)]
    pub mac: Option<String>,

    #[serde(default)]
    pub stroke_color: Option<String>,

    #[validate(range(min = 0.0, message = "Stroke width must be non-negative"))]
    #[serde(default)]
    pub stroke_width: Option<f64>,

    #[validate(range(min = 0.0, max = 1.0, message = "Stroke opacity must be between 0 and 1"))]
    #[serde(default)]
    pub stroke_opacity: Option<f64>,
}

/// Request payload for creating or replacing a geofence.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpsertGeofenceRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,

    pub polygon: GeofenceGeometry,

    #[serde(default)]
    pub mac: Option<String>,

    #[serde(default)]
    pub stroke_color: Option<String>,

    #[validate(range(min = 0.0, message = "Stroke width must be non-negative"))]
    #[serde(default)]
    pub stroke_width: Option<f64>,

    #[validate(range(min = 0.0, max = 1.0, message = "Stroke opacity must be between 0 and 1"))]
    #[serde(default)]
    pub stroke_opacity: Option<f64>,
}

impl UpsertGeofenceRequest {
    /// Converts to a stored geofence, closing line geometries.
    pub fn into_geofence(self) -> Geofence {
        Geofence {
            name: self.name,
            polygon: self.polygon.into_polygon(),
            mac: self.mac.filter(|m| !m.is_empty()),
            stroke_color: self.stroke_color.filter(|c| !c.is_empty()),
            stroke_width: self.stroke_width,
            stroke_opacity: self.stroke_opacity,
        }
    }
}

/// How a bulk import treats geofences already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Drop everything first.
    Replace,
    /// Upsert by name, keeping the rest.
    #[default]
    Merge,
}

/// Bulk geofence import payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportGeofencesRequest {
    pub geofences: Vec<UpsertGeofenceRequest>,
    #[serde(default)]
    pub mode: ImportMode,
}
