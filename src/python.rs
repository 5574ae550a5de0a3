//! Python bindings

use crate::config::PipelineConfig;
use crate::core::histogram::HistogramAnalyzer;
use crate::core::pipeline::Pipeline;
use crate::core::reproject::RasterReprojector;
use crate::core::zonal::ZonalAggregator;
use crate::io::raster::RasterReader;
use crate::io::zones::ZoneReader;
use crate::types::{Crs, GeoTransform, PipelineError, RasterDataset, ZoneKey};
use numpy::{PyReadonlyArray2, ToPyArray};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::path::{Path, PathBuf};

fn to_py_err(e: PipelineError) -> PyErr {
    match e {
        PipelineError::Config(_) | PipelineError::InvalidFileName { .. } => {
            PyValueError::new_err(e.to_string())
        }
        _ => PyErr::new::<PyRuntimeError, _>(format!("{}", e)),
    }
}

fn geotransform_from(coeffs: Vec<f64>) -> PyResult<GeoTransform> {
    let coeffs: [f64; 6] = coeffs
        .try_into()
        .map_err(|_| PyValueError::new_err("geotransform needs 6 coefficients"))?;
    Ok(GeoTransform::from_gdal(coeffs))
}

fn raster_from(
    data: PyReadonlyArray2<f64>,
    geotransform: Vec<f64>,
    crs: &str,
    nodata: Option<f64>,
) -> PyResult<RasterDataset> {
    Ok(RasterDataset::new(
        data.as_array().to_owned(),
        geotransform_from(geotransform)?,
        Crs::parse(crs).map_err(to_py_err)?,
        nodata,
    ))
}

/// Reproject a band; returns a dict with data, geotransform, crs and nodata
#[pyfunction]
#[pyo3(signature = (data, geotransform, crs, target_crs, nodata=None))]
fn reproject_raster(
    py: Python,
    data: PyReadonlyArray2<f64>,
    geotransform: Vec<f64>,
    crs: &str,
    target_crs: &str,
    nodata: Option<f64>,
) -> PyResult<PyObject> {
    let source = raster_from(data, geotransform, crs, nodata)?;
    let target = Crs::parse(target_crs).map_err(to_py_err)?;
    let output = py
        .allow_threads(|| RasterReprojector::reproject_owned(source, &target))
        .map_err(to_py_err)?;

    let result = PyDict::new(py);
    result.set_item("data", output.data.to_pyarray(py))?;
    result.set_item("geotransform", output.transform.to_gdal().to_vec())?;
    result.set_item("crs", output.crs.to_string())?;
    result.set_item("nodata", output.nodata)?;
    Ok(result.into())
}

/// Mean per zone of a GeoJSON zone file; undefined zones map to None
#[pyfunction]
#[pyo3(signature = (data, geotransform, crs, zones_path, key_field="no", nodata=None))]
fn zonal_mean(
    py: Python,
    data: PyReadonlyArray2<f64>,
    geotransform: Vec<f64>,
    crs: &str,
    zones_path: &str,
    key_field: &str,
    nodata: Option<f64>,
) -> PyResult<PyObject> {
    let raster = raster_from(data, geotransform, crs, nodata)?;
    let zones = ZoneReader::read(zones_path, key_field).map_err(to_py_err)?;
    let values = ZonalAggregator::zonal_mean(&raster, &zones.zones).map_err(to_py_err)?;

    let result = PyDict::new(py);
    for (key, value) in values {
        match key {
            ZoneKey::Int(i) => result.set_item(i, value)?,
            ZoneKey::Text(s) => result.set_item(s, value)?,
        }
    }
    Ok(result.into())
}

/// Min, max, mean and count of the valid samples of a raster file
#[pyfunction]
fn band_summary(py: Python, path: &str) -> PyResult<Option<PyObject>> {
    let raster = RasterReader::read(path).map_err(to_py_err)?;
    let Some(summary) = HistogramAnalyzer::band_summary(&raster) else {
        return Ok(None);
    };

    let result = PyDict::new(py);
    result.set_item("min", summary.min)?;
    result.set_item("max", summary.max)?;
    result.set_item("mean", summary.mean)?;
    result.set_item("count", summary.count)?;
    Ok(Some(result.into()))
}

/// Run the zonal-statistics batch; returns (processed, skipped, failed)
#[pyfunction]
#[pyo3(signature = (raster_dir, zone_dir, output_dir, config_path=None))]
fn run_pipeline(
    py: Python,
    raster_dir: &str,
    zone_dir: &str,
    output_dir: &str,
    config_path: Option<&str>,
) -> PyResult<(usize, usize, usize)> {
    let mut config = match config_path {
        Some(path) => PipelineConfig::from_file(Path::new(path)).map_err(to_py_err)?,
        None => PipelineConfig::default(),
    };
    config.raster_dir = PathBuf::from(raster_dir);
    config.zone_dir = PathBuf::from(zone_dir);
    config.output_dir = PathBuf::from(output_dir);

    let summary = py
        .allow_threads(|| Pipeline::new(config)?.run_zonal_statistics())
        .map_err(to_py_err)?;
    Ok((summary.processed, summary.skipped, summary.failed))
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(reproject_raster, m)?)?;
    m.add_function(wrap_pyfunction!(zonal_mean, m)?)?;
    m.add_function(wrap_pyfunction!(band_summary, m)?)?;
    m.add_function(wrap_pyfunction!(run_pipeline, m)?)?;
    Ok(())
}
