//! Pipeline configuration, built once at start-up and passed down.

use crate::core::assembler::DuplicatePolicy;
use crate::core::histogram::HistogramParams;
use crate::types::{Crs, PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Input rasters (zonal stage) or rasters to reproject (reproject stage)
    pub raster_dir: PathBuf,
    pub zone_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Destination of the reproject stage
    pub reprojected_dir: Option<PathBuf>,
    pub target_crs: Crs,
    /// Worker threads; 0 lets rayon decide
    pub workers: usize,
    /// Zone property holding the unique zone key
    pub zone_key_field: String,
    pub raster_extensions: Vec<String>,
    pub zone_extensions: Vec<String>,
    pub duplicate_policy: DuplicatePolicy,
    /// Move zone vertices into the raster CRS instead of failing on mismatch
    pub reproject_zones: bool,
    pub histogram: HistogramParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            raster_dir: PathBuf::from("drone_data_reprojected_5179"),
            zone_dir: PathBuf::from("geo_json_data"),
            output_dir: PathBuf::from("result_geojson"),
            reprojected_dir: None,
            target_crs: Crs::Epsg(5179),
            workers: 0,
            zone_key_field: "no".to_string(),
            raster_extensions: vec!["tif".to_string(), "tiff".to_string()],
            zone_extensions: vec!["geojson".to_string(), "json".to_string()],
            duplicate_policy: DuplicatePolicy::Overwrite,
            reproject_zones: false,
            histogram: HistogramParams::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file; missing keys keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| PipelineError::Config(format!("invalid {}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.zone_key_field.trim().is_empty() {
            return Err(PipelineError::Config("zone_key_field must not be empty".to_string()));
        }
        if self.raster_extensions.is_empty() {
            return Err(PipelineError::Config(
                "at least one raster extension must be given".to_string(),
            ));
        }
        if self.zone_extensions.is_empty() {
            return Err(PipelineError::Config(
                "at least one zone extension must be given".to_string(),
            ));
        }
        if let Some(dir) = &self.reprojected_dir {
            if dir == &self.raster_dir {
                return Err(PipelineError::Config(
                    "reprojected_dir must differ from raster_dir".to_string(),
                ));
            }
        }
        self.histogram.validate()
    }
}
