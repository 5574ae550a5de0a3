//! vegzone: per-zone vegetation-index time series from drone rasters.
//!
//! Rasters are brought onto a common CRS, averaged under each zone polygon
//! and collected into a zone-by-(index, session) table.

pub mod config;
pub mod core;
pub mod io;
#[cfg(feature = "python")]
mod python;
pub mod types;

// Re-export main types and functions for easier access
pub use config::PipelineConfig;
pub use crate::core::{
    BatchSummary, DuplicatePolicy, Pipeline, RasterReprojector, ResultTable, ZonalAggregator,
};
pub use types::{
    ColumnKey, Crs, GeoTransform, PipelineError, PipelineResult, RasterDataset, ZoneKey,
    ZonePolygon, ZoneSet, ZoneValues,
};
