//! GeoJSON document types for zone files and result tables.
//!
//! Geometries stay as raw JSON on the document so they can be written back
//! exactly as read; [`ZoneGeometry`] is the typed view used for overlay.

use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A GeoJSON FeatureCollection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureCollection {
    /// Always "FeatureCollection"
    #[serde(rename = "type")]
    pub type_: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Legacy (pre RFC 7946) named CRS member
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<Value>,

    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new() -> Self {
        Self {
            type_: "FeatureCollection".to_string(),
            name: None,
            crs: None,
            features: Vec::new(),
        }
    }
}

impl Default for FeatureCollection {
    fn default() -> Self {
        Self::new()
    }
}

/// A GeoJSON Feature
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feature {
    /// Always "Feature"
    #[serde(rename = "type")]
    pub type_: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    /// `null` geometries are allowed
    #[serde(default)]
    pub geometry: Option<Value>,

    #[serde(default)]
    pub properties: Option<Map<String, Value>>,
}

impl Feature {
    pub fn new(geometry: Option<Value>, properties: Map<String, Value>) -> Self {
        Self {
            type_: "Feature".to_string(),
            id: None,
            geometry,
            properties: Some(properties),
        }
    }
}

/// Areal geometries a zone may have
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ZoneGeometry {
    /// Rings of positions; the first ring is the exterior
    Polygon { coordinates: Vec<Vec<Vec<f64>>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Vec<f64>>>> },
}

impl ZoneGeometry {
    /// Parse a raw GeoJSON geometry; only polygons qualify
    pub fn from_value(value: &Value) -> Result<Self, String> {
        serde_json::from_value(value.clone()).map_err(|e| {
            let kind = value.get("type").and_then(Value::as_str).unwrap_or("?");
            format!("unsupported zone geometry '{}': {}", kind, e)
        })
    }

    pub fn to_multi_polygon(&self) -> Result<MultiPolygon<f64>, String> {
        match self {
            ZoneGeometry::Polygon { coordinates } => Ok(MultiPolygon(vec![polygon(coordinates)?])),
            ZoneGeometry::MultiPolygon { coordinates } => coordinates
                .iter()
                .map(|rings| polygon(rings))
                .collect::<Result<Vec<_>, _>>()
                .map(MultiPolygon),
        }
    }
}

fn polygon(rings: &[Vec<Vec<f64>>]) -> Result<Polygon<f64>, String> {
    let (exterior, interiors) = rings
        .split_first()
        .ok_or_else(|| "polygon without rings".to_string())?;
    Ok(Polygon::new(
        ring(exterior)?,
        interiors.iter().map(|r| ring(r)).collect::<Result<Vec<_>, _>>()?,
    ))
}

fn ring(positions: &[Vec<f64>]) -> Result<LineString<f64>, String> {
    positions
        .iter()
        .map(|p| match p.as_slice() {
            [x, y, ..] if x.is_finite() && y.is_finite() => Ok(Coord { x: *x, y: *y }),
            _ => Err(format!("invalid position {:?}", p)),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(LineString)
}
