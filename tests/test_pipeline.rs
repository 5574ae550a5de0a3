mod common;

use common::*;
use ndarray::{array, Array2};
use serde_json::{json, Value};
use std::path::Path;
use tempfile::tempdir;
use vegzone::core::CrsTransform;
use vegzone::core::PointTransform;
use vegzone::{Crs, DuplicatePolicy, Pipeline, PipelineConfig, PipelineError};

struct Workspace {
    _root: tempfile::TempDir,
    config: PipelineConfig,
}

fn workspace() -> Workspace {
    let root = tempdir().unwrap();
    let config = PipelineConfig {
        raster_dir: root.path().join("rasters"),
        zone_dir: root.path().join("zones"),
        output_dir: root.path().join("out"),
        workers: 2,
        ..PipelineConfig::default()
    };
    std::fs::create_dir_all(&config.raster_dir).unwrap();
    std::fs::create_dir_all(&config.zone_dir).unwrap();
    Workspace {
        _root: root,
        config,
    }
}

fn ndvi_session_1() -> Array2<f64> {
    array![
        [0.25, 0.5, 0.125, 0.125],
        [0.75, NODATA, 0.125, 0.125],
        [0.5, 0.5, 0.5, 0.25],
        [0.5, 0.5, 0.75, 0.75],
    ]
}

/// Zones 3, 1, 2 (file order deliberately unsorted): top-left 2x2 block,
/// bottom-right 2x2 block, and one far outside the rasters
fn write_field_zones(dir: &Path, name: &str) {
    write_zones(
        &dir.join(name),
        Some("urn:ogc:def:crs:EPSG::5179"),
        vec![
            feature(
                json!({"no": 3, "yield": 401.0}),
                rect(ORIGIN_X + 100.0, ORIGIN_Y + 100.0, ORIGIN_X + 101.0, ORIGIN_Y + 101.0),
            ),
            feature(
                json!({"no": 1, "yield": 512.5}),
                rect(ORIGIN_X, ORIGIN_Y - 2.0, ORIGIN_X + 2.0, ORIGIN_Y),
            ),
            feature(
                json!({"no": 2, "yield": 488.0}),
                rect(ORIGIN_X + 2.0, ORIGIN_Y - 4.0, ORIGIN_X + 4.0, ORIGIN_Y - 2.0),
            ),
        ],
    );
}

fn properties(output: &Value, index: usize) -> &serde_json::Map<String, Value> {
    output["features"][index]["properties"]
        .as_object()
        .expect("feature without properties")
}

#[test]
fn test_full_zonal_pipeline() {
    init_logging();
    let ws = workspace();
    let rasters = &ws.config.raster_dir;

    write_raster(&rasters.join("A01_1_20240501_NDVI.tif"), &korea_raster(ndvi_session_1()));
    write_raster(
        &rasters.join("A01_2_20240515_NDVI.tif"),
        &korea_raster(Array2::from_elem((4, 4), 0.5)),
    );
    write_raster(
        &rasters.join("A01_1_20240501_GNDVI.tif"),
        &korea_raster(Array2::from_elem((4, 4), 0.25)),
    );
    // session is not a number
    write_raster(
        &rasters.join("A01_x_20240601_NDVI.tif"),
        &korea_raster(Array2::from_elem((4, 4), 0.5)),
    );

    write_field_zones(&ws.config.zone_dir, "farm_A-01.geojson");
    // no rasters for B02
    write_field_zones(&ws.config.zone_dir, "farm_B-02.geojson");

    let pipeline = Pipeline::new(ws.config.clone()).unwrap();
    let summary = pipeline.run_zonal_statistics().unwrap();
    println!("{}", summary);

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 1);
    assert!(summary.failures[0]
        .path
        .ends_with("A01_x_20240601_NDVI.tif"));

    let output = read_json(&ws.config.output_dir.join("farm_A-01_zonal_stats.geojson"));
    assert!(!ws.config.output_dir.join("farm_B-02_zonal_stats.geojson").exists());
    assert_eq!(
        output["crs"]["properties"]["name"],
        json!("urn:ogc:def:crs:EPSG::5179")
    );

    let features = output["features"].as_array().unwrap();
    assert_eq!(features.len(), 3);

    let first = properties(&output, 0);
    let columns: Vec<&str> = first.keys().map(String::as_str).collect();
    assert_eq!(columns, vec!["no", "yield", "GNDVI_1", "NDVI_1", "NDVI_2"]);

    let keys: Vec<i64> = (0..3)
        .map(|i| properties(&output, i)["no"].as_i64().unwrap())
        .collect();
    assert_eq!(keys, vec![1, 2, 3]);

    // zone 1: 0.25, 0.5, 0.75 and one nodata pixel
    assert_eq!(first["NDVI_1"], json!(0.5));
    assert_eq!(first["NDVI_2"], json!(0.5));
    assert_eq!(first["GNDVI_1"], json!(0.25));
    assert_eq!(first["yield"], json!(512.5));

    let second = properties(&output, 1);
    assert_eq!(second["NDVI_1"], json!(0.5625));

    // zone 3 lies outside every raster
    let third = properties(&output, 2);
    assert_eq!(third["NDVI_1"], Value::Null);
    assert_eq!(third["GNDVI_1"], Value::Null);
    assert_eq!(third["yield"], json!(401.0));
    assert!(output["features"][2]["geometry"].is_object());
}

#[test]
fn test_duplicate_session_overwrites_in_path_order() {
    init_logging();
    let ws = workspace();
    let rasters = &ws.config.raster_dir;

    // both fill NDVI_1; "A01_01_..." sorts before "A01_1_..."
    write_raster(
        &rasters.join("A01_01_20240501_NDVI.tif"),
        &korea_raster(Array2::from_elem((4, 4), 0.25)),
    );
    write_raster(
        &rasters.join("A01_1_20240502_NDVI.tif"),
        &korea_raster(Array2::from_elem((4, 4), 0.75)),
    );
    write_field_zones(&ws.config.zone_dir, "farm_A01.geojson");

    let summary = Pipeline::new(ws.config.clone())
        .unwrap()
        .run_zonal_statistics()
        .unwrap();
    assert_eq!((summary.processed, summary.failed), (2, 0));

    let output = read_json(&ws.config.output_dir.join("farm_A01_zonal_stats.geojson"));
    assert_eq!(properties(&output, 0)["NDVI_1"], json!(0.75));

    // the same batch under the reject policy keeps the first and fails the second
    let config = PipelineConfig {
        duplicate_policy: DuplicatePolicy::Reject,
        ..ws.config.clone()
    };
    let summary = Pipeline::new(config).unwrap().run_zonal_statistics().unwrap();
    assert_eq!((summary.processed, summary.failed), (1, 1));
    assert!(summary.failures[0].reason.contains("NDVI_1"));

    let output = read_json(&ws.config.output_dir.join("farm_A01_zonal_stats.geojson"));
    assert_eq!(properties(&output, 0)["NDVI_1"], json!(0.25));
}

#[test]
fn test_zone_crs_mismatch_and_zone_reprojection() {
    init_logging();
    let ws = workspace();
    write_raster(
        &ws.config.raster_dir.join("C3_1_20240501_NDVI.tif"),
        &korea_raster(Array2::from_elem((4, 4), 0.5)),
    );

    // the raster footprint shrunk by a quarter pixel, expressed in WGS84
    let to_wgs84 = CrsTransform::new(&Crs::Epsg(5179), &Crs::Epsg(4326)).unwrap();
    let mut xs = vec![ORIGIN_X + 0.25, ORIGIN_X + 3.75, ORIGIN_X + 3.75, ORIGIN_X + 0.25, ORIGIN_X + 0.25];
    let mut ys = vec![ORIGIN_Y - 3.75, ORIGIN_Y - 3.75, ORIGIN_Y - 0.25, ORIGIN_Y - 0.25, ORIGIN_Y - 3.75];
    to_wgs84.transform(&mut xs, &mut ys).unwrap();
    let ring: Vec<Value> = xs.iter().zip(&ys).map(|(x, y)| json!([x, y])).collect();
    write_zones(
        &ws.config.zone_dir.join("farm_C3.geojson"),
        None,
        vec![feature(
            json!({"no": "north"}),
            json!({"type": "Polygon", "coordinates": [ring]}),
        )],
    );

    // never opened while the zone CRS is wrong
    std::fs::write(ws.config.raster_dir.join("C3_2_20240515_NDVI.tif"), b"garbage").unwrap();

    let summary = Pipeline::new(ws.config.clone())
        .unwrap()
        .run_zonal_statistics()
        .unwrap();
    assert_eq!((summary.processed, summary.failed), (0, 1));
    assert!(summary.failures[0].path.ends_with("farm_C3.geojson"));
    assert!(summary.failures[0].reason.contains("CRS mismatch"));
    assert!(!ws.config.output_dir.join("farm_C3_zonal_stats.geojson").exists());

    let config = PipelineConfig {
        reproject_zones: true,
        ..ws.config.clone()
    };
    let summary = Pipeline::new(config).unwrap().run_zonal_statistics().unwrap();
    assert_eq!((summary.processed, summary.failed), (1, 1));
    assert!(summary.failures[0].path.ends_with("C3_2_20240515_NDVI.tif"));

    let output = read_json(&ws.config.output_dir.join("farm_C3_zonal_stats.geojson"));
    assert_eq!(properties(&output, 0)["no"], json!("north"));
    assert_eq!(properties(&output, 0)["NDVI_1"], json!(0.5));
}

#[test]
fn test_raster_in_other_crs_is_reprojected_before_aggregation() {
    init_logging();
    let ws = workspace();

    // same ground as the EPSG:5179 fixtures, but stored in UTM 52N
    let to_utm = CrsTransform::new(&Crs::Epsg(5179), &Crs::Epsg(32652)).unwrap();
    let (x, y) = to_utm.transform_point(ORIGIN_X - 10.0, ORIGIN_Y + 10.0).unwrap();
    let utm = vegzone::RasterDataset::new(
        Array2::from_elem((40, 40), 0.75),
        vegzone::GeoTransform::north_up(x, y, 1.0, -1.0),
        Crs::Epsg(32652),
        Some(NODATA),
    );
    write_raster(&ws.config.raster_dir.join("D4_2_20240501_NDRE.tif"), &utm);
    write_field_zones(&ws.config.zone_dir, "farm_D4.geojson");

    let summary = Pipeline::new(ws.config.clone())
        .unwrap()
        .run_zonal_statistics()
        .unwrap();
    assert_eq!((summary.processed, summary.failed), (1, 0));

    let output = read_json(&ws.config.output_dir.join("farm_D4_zonal_stats.geojson"));
    assert_eq!(properties(&output, 0)["NDRE_2"], json!(0.75));
    assert_eq!(properties(&output, 1)["NDRE_2"], json!(0.75));
    assert_eq!(properties(&output, 2)["NDRE_2"], Value::Null);
}

#[test]
fn test_unreadable_zone_file_counts_as_failure() {
    init_logging();
    let ws = workspace();
    write_raster(
        &ws.config.raster_dir.join("E5_1_20240501_NDVI.tif"),
        &korea_raster(Array2::from_elem((4, 4), 0.5)),
    );
    std::fs::write(ws.config.zone_dir.join("farm_E5.geojson"), "{ broken").unwrap();

    let summary = Pipeline::new(ws.config.clone())
        .unwrap()
        .run_zonal_statistics()
        .unwrap();
    assert_eq!((summary.processed, summary.skipped, summary.failed), (0, 0, 1));
    assert!(summary.failures[0].path.ends_with("farm_E5.geojson"));
}

#[test]
fn test_rasters_not_counted_when_table_write_fails() {
    init_logging();
    let ws = workspace();
    write_raster(
        &ws.config.raster_dir.join("F6_1_20240501_NDVI.tif"),
        &korea_raster(Array2::from_elem((4, 4), 0.5)),
    );
    write_field_zones(&ws.config.zone_dir, "farm_F6.geojson");

    // output folder path is taken by a regular file
    std::fs::write(&ws.config.output_dir, b"in the way").unwrap();

    let summary = Pipeline::new(ws.config.clone())
        .unwrap()
        .run_zonal_statistics()
        .unwrap();
    println!("{}", summary);
    assert_eq!((summary.processed, summary.skipped, summary.failed), (0, 0, 1));
    assert!(summary.failures[0].path.ends_with("farm_F6.geojson"));
}

#[test]
fn test_unresolvable_target_crs_aborts_run() {
    let ws = workspace();
    let config = PipelineConfig {
        target_crs: Crs::Definition("+proj=nonsense".to_string()),
        ..ws.config.clone()
    };
    assert!(matches!(
        Pipeline::new(config),
        Err(PipelineError::CrsResolution { .. })
    ));
}
