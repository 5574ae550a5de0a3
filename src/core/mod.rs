//! Core processing modules

pub mod assembler;
pub mod histogram;
pub mod pipeline;
pub mod reproject;
pub mod transform;
pub mod zonal;

// Re-export main types
pub use assembler::{DuplicatePolicy, ResultTable, TableRow};
pub use histogram::{BandSummary, HistogramAnalyzer, HistogramParams, HistogramPeak};
pub use pipeline::{BatchSummary, HistogramReport, Pipeline, TaskFailure};
pub use reproject::{reproject_zone_set, OutputGrid, RasterReprojector};
pub use transform::{CrsTransform, IdentityTransform, PointTransform};
pub use zonal::{included_pixels, ZonalAggregator};
