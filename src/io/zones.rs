use crate::io::geojson::{FeatureCollection, ZoneGeometry};
use crate::types::{
    Crs, PipelineError, PipelineResult, ZoneKey, ZonePolygon, ZoneRecord, ZoneSet,
};
use geo::MultiPolygon;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

/// Zone-set reader for GeoJSON polygon collections
pub struct ZoneReader;

impl ZoneReader {
    /// Read every feature of `path`, keyed by the property `key_field`
    pub fn read<P: AsRef<Path>>(path: P, key_field: &str) -> PipelineResult<ZoneSet> {
        let path = path.as_ref();
        log::info!("Reading zones from: {}", path.display());

        let text = std::fs::read_to_string(path).map_err(|e| PipelineError::GeometryRead {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let zones = Self::from_str(&text, key_field, path)?;

        log::info!(
            "Loaded {} zones ({}) keyed by '{}'",
            zones.len(),
            zones.crs,
            key_field
        );
        Ok(zones)
    }

    /// Parse GeoJSON text; `source` only labels errors
    pub fn from_str(text: &str, key_field: &str, source: &Path) -> PipelineResult<ZoneSet> {
        let geometry_error = |reason: String| PipelineError::GeometryRead {
            path: source.to_path_buf(),
            reason,
        };

        let collection: FeatureCollection = serde_json::from_str(text)
            .map_err(|e| geometry_error(format!("not a GeoJSON FeatureCollection: {}", e)))?;
        if collection.type_ != "FeatureCollection" {
            return Err(geometry_error(format!(
                "expected a FeatureCollection, found '{}'",
                collection.type_
            )));
        }

        let crs = match &collection.crs {
            Some(member) => Self::crs_from_member(member).map_err(geometry_error)?,
            None => Crs::wgs84(),
        };

        let mut attribute_names: Vec<String> = Vec::new();
        let mut seen_keys: HashSet<ZoneKey> = HashSet::new();
        let mut zones = Vec::with_capacity(collection.features.len());
        let mut records = Vec::with_capacity(collection.features.len());

        for (index, feature) in collection.features.into_iter().enumerate() {
            let attributes = feature.properties.unwrap_or_default();
            for name in attributes.keys() {
                if !attribute_names.contains(name) {
                    attribute_names.push(name.clone());
                }
            }

            let key = attributes
                .get(key_field)
                .and_then(ZoneKey::from_json)
                .ok_or_else(|| {
                    geometry_error(format!(
                        "feature {} has no usable '{}' key",
                        index, key_field
                    ))
                })?;
            if !seen_keys.insert(key.clone()) {
                return Err(geometry_error(format!("duplicate zone key '{}'", key)));
            }

            let geometry = match &feature.geometry {
                Some(value) => ZoneGeometry::from_value(value)
                    .and_then(|g| g.to_multi_polygon())
                    .map_err(|reason| geometry_error(format!("zone '{}': {}", key, reason)))?,
                None => {
                    log::warn!("Zone '{}' has no geometry", key);
                    MultiPolygon(vec![])
                }
            };

            zones.push(ZonePolygon {
                key: key.clone(),
                geometry,
                crs: crs.clone(),
            });
            records.push(ZoneRecord {
                key,
                geometry: feature.geometry.unwrap_or(Value::Null),
                attributes,
            });
        }

        Ok(ZoneSet {
            name: collection.name,
            crs,
            crs_member: collection.crs,
            key_field: key_field.to_string(),
            attribute_names,
            zones,
            records,
        })
    }

    /// CRS of a legacy `{"type": "name", "properties": {"name": ...}}` member
    fn crs_from_member(member: &Value) -> Result<Crs, String> {
        let name = member
            .get("properties")
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .ok_or_else(|| format!("unsupported crs member {}", member))?;
        Crs::parse(name).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn source() -> PathBuf {
        PathBuf::from("zones.geojson")
    }

    const FIELD: &str = r#"{
        "type": "FeatureCollection",
        "name": "field_A01",
        "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::5179"}},
        "features": [
            {"type": "Feature", "properties": {"no": 2, "yield": 480.0},
             "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}},
            {"type": "Feature", "properties": {"no": 1, "protein": 6.1},
             "geometry": {"type": "Polygon", "coordinates": [[[1,0],[2,0],[2,1],[1,1],[1,0]]]}}
        ]
    }"#;

    #[test]
    fn test_read_zone_set() {
        let zones = ZoneReader::from_str(FIELD, "no", &source()).unwrap();
        assert_eq!(zones.len(), 2);
        assert_eq!(zones.crs, Crs::Epsg(5179));
        assert_eq!(zones.zones[0].key, ZoneKey::Int(2));
        assert_eq!(zones.zones[1].crs, Crs::Epsg(5179));
        assert_eq!(zones.attribute_names, vec!["no", "yield", "protein"]);
        assert_eq!(zones.name.as_deref(), Some("field_A01"));
        assert!(zones.crs_member.is_some());
    }

    #[test]
    fn test_default_crs_is_wgs84() {
        let text = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {"no": "a"}, "geometry": null}
        ]}"#;
        let zones = ZoneReader::from_str(text, "no", &source()).unwrap();
        assert_eq!(zones.crs, Crs::Epsg(4326));
        assert!(zones.zones[0].geometry.0.is_empty());
        assert_eq!(zones.records[0].geometry, Value::Null);
    }

    #[test]
    fn test_missing_key_is_geometry_error() {
        let text = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {"id": 1}, "geometry": null}
        ]}"#;
        assert!(matches!(
            ZoneReader::from_str(text, "no", &source()),
            Err(PipelineError::GeometryRead { .. })
        ));
    }

    #[test]
    fn test_duplicate_key_is_geometry_error() {
        let text = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {"no": 1}, "geometry": null},
            {"type": "Feature", "properties": {"no": 1}, "geometry": null}
        ]}"#;
        let err = ZoneReader::from_str(text, "no", &source()).unwrap_err();
        assert!(err.to_string().contains("duplicate zone key '1'"));
    }

    #[test]
    fn test_line_geometry_is_rejected() {
        let text = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {"no": 1},
             "geometry": {"type": "LineString", "coordinates": [[0,0],[1,1]]}}
        ]}"#;
        assert!(matches!(
            ZoneReader::from_str(text, "no", &source()),
            Err(PipelineError::GeometryRead { .. })
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            ZoneReader::from_str("{not json", "no", &source()),
            Err(PipelineError::GeometryRead { .. })
        ));
        assert!(matches!(
            ZoneReader::read("/nonexistent/zones.geojson", "no"),
            Err(PipelineError::GeometryRead { .. })
        ));
    }
}
