//! File I/O: GeoTIFF rasters, GeoJSON zones and result tables, naming rules

pub mod geojson;
pub mod naming;
pub mod raster;
pub mod table;
pub mod zones;

pub use naming::RasterName;
pub use raster::{RasterReader, RasterWriter};
pub use table::TableWriter;
pub use zones::ZoneReader;
