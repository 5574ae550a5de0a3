#![allow(dead_code)]

use ndarray::Array2;
use serde_json::{json, Value};
use std::path::Path;
use vegzone::io::RasterWriter;
use vegzone::{Crs, GeoTransform, RasterDataset};

pub const ORIGIN_X: f64 = 950_000.0;
pub const ORIGIN_Y: f64 = 1_950_000.0;
pub const NODATA: f64 = -9999.0;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 1 m pixels anchored at the fixture origin in EPSG:5179
pub fn korea_raster(data: Array2<f64>) -> RasterDataset {
    RasterDataset::new(
        data,
        GeoTransform::north_up(ORIGIN_X, ORIGIN_Y, 1.0, -1.0),
        Crs::Epsg(5179),
        Some(NODATA),
    )
}

pub fn write_raster(path: &Path, raster: &RasterDataset) {
    RasterWriter::write_geotiff::<f32, _>(raster, path).expect("Failed to write fixture raster");
}

/// Polygon ring of the rectangle (min_x, min_y)-(max_x, max_y)
pub fn rect(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Value {
    json!({
        "type": "Polygon",
        "coordinates": [[
            [min_x, min_y], [max_x, min_y], [max_x, max_y], [min_x, max_y], [min_x, min_y]
        ]]
    })
}

pub fn feature(properties: Value, geometry: Value) -> Value {
    json!({"type": "Feature", "properties": properties, "geometry": geometry})
}

pub fn write_zones(path: &Path, crs_name: Option<&str>, features: Vec<Value>) {
    let mut collection = json!({"type": "FeatureCollection", "features": features});
    if let Some(name) = crs_name {
        collection["crs"] = json!({"type": "name", "properties": {"name": name}});
    }
    std::fs::write(path, serde_json::to_string_pretty(&collection).unwrap())
        .expect("Failed to write fixture zones");
}

pub fn read_json(path: &Path) -> Value {
    let text = std::fs::read_to_string(path).expect("Failed to read output");
    serde_json::from_str(&text).expect("Output is not JSON")
}
