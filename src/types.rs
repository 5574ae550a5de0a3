use geo::MultiPolygon;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// One zonal result per zone; `None` means no valid pixel overlapped the zone
pub type ZoneValues = BTreeMap<ZoneKey, Option<f64>>;

/// Axis-aligned bounding box in world coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Envelope of a set of points; `None` for an empty slice
    pub fn from_points(points: &[(f64, f64)]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let mut bbox = BoundingBox {
            min_x: first.0,
            min_y: first.1,
            max_x: first.0,
            max_y: first.1,
        };
        for &(x, y) in rest {
            bbox.min_x = bbox.min_x.min(x);
            bbox.min_y = bbox.min_y.min(y);
            bbox.max_x = bbox.max_x.max(x);
            bbox.max_y = bbox.max_y.max(y);
        }
        Some(bbox)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// True when the box has no area or is not finite
    pub fn is_degenerate(&self) -> bool {
        let w = self.width();
        let h = self.height();
        !(w.is_finite() && h.is_finite()) || w <= 0.0 || h <= 0.0
    }
}

/// Affine georeferencing of a raster grid (GDAL coefficient order)
///
/// ```text
/// x = top_left_x + col * pixel_width + row * rotation_x
/// y = top_left_y + col * rotation_y  + row * pixel_height
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform without rotation; `pixel_height` is usually negative
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height,
        }
    }

    pub fn from_gdal(coeffs: [f64; 6]) -> Self {
        Self {
            top_left_x: coeffs[0],
            pixel_width: coeffs[1],
            rotation_x: coeffs[2],
            top_left_y: coeffs[3],
            rotation_y: coeffs[4],
            pixel_height: coeffs[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// World coordinate of a fractional pixel position (col, row).
    /// Integer positions are pixel corners, `+ 0.5` gives the centre.
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.top_left_x + col * self.pixel_width + row * self.rotation_x;
        let y = self.top_left_y + col * self.rotation_y + row * self.pixel_height;
        (x, y)
    }

    pub fn determinant(&self) -> f64 {
        self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y
    }

    pub fn is_invertible(&self) -> bool {
        let det = self.determinant();
        det.is_finite() && det != 0.0
    }

    /// Fractional pixel position (col, row) of a world coordinate.
    /// Returns `None` for a singular transform.
    pub fn world_to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        if !self.is_invertible() {
            return None;
        }
        let det = self.determinant();
        let dx = x - self.top_left_x;
        let dy = y - self.top_left_y;
        let col = (self.pixel_height * dx - self.rotation_x * dy) / det;
        let row = (-self.rotation_y * dx + self.pixel_width * dy) / det;
        Some((col, row))
    }

    /// The four corners of a `width` x `height` grid, clockwise from top-left
    pub fn corners(&self, width: usize, height: usize) -> [(f64, f64); 4] {
        let (w, h) = (width as f64, height as f64);
        [
            self.pixel_to_world(0.0, 0.0),
            self.pixel_to_world(w, 0.0),
            self.pixel_to_world(w, h),
            self.pixel_to_world(0.0, h),
        ]
    }

    pub fn bounds(&self, width: usize, height: usize) -> BoundingBox {
        let corners = self.corners(width, height);
        // four points, never empty
        BoundingBox::from_points(&corners).unwrap_or(BoundingBox {
            min_x: f64::NAN,
            min_y: f64::NAN,
            max_x: f64::NAN,
            max_y: f64::NAN,
        })
    }
}

/// Coordinate reference system identity.
///
/// Two values are the same CRS only when they compare equal; a WKT
/// definition that could not be identified to an EPSG code never equals
/// an `Epsg` value, so such rasters always go through reprojection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Crs {
    Epsg(u32),
    /// WKT, PROJ string or any other definition GDAL understands
    Definition(String),
}

impl Crs {
    pub fn wgs84() -> Self {
        Crs::Epsg(4326)
    }

    /// Parse an identifier such as `EPSG:5179`, `5179`,
    /// `urn:ogc:def:crs:EPSG::5179` or `urn:ogc:def:crs:OGC:1.3:CRS84`.
    /// Anything else is kept verbatim as a definition.
    pub fn parse(identifier: &str) -> PipelineResult<Self> {
        let text = identifier.trim();
        if text.is_empty() {
            return Err(PipelineError::CrsResolution {
                crs: identifier.to_string(),
                reason: "empty CRS identifier".to_string(),
            });
        }

        let upper = text.to_ascii_uppercase();
        if upper.ends_with("CRS84") {
            return Ok(Crs::wgs84());
        }
        if let Ok(code) = text.parse::<u32>() {
            return Ok(Crs::Epsg(code));
        }
        if let Some(pos) = upper.find("EPSG:") {
            // last ':'-separated segment carries the code (skips URN versions)
            let code = upper[pos..].rsplit(':').next().unwrap_or_default();
            return code
                .parse::<u32>()
                .map(Crs::Epsg)
                .map_err(|_| PipelineError::CrsResolution {
                    crs: identifier.to_string(),
                    reason: format!("invalid EPSG code '{}'", code),
                });
        }

        Ok(Crs::Definition(text.to_string()))
    }

    pub fn epsg(&self) -> Option<u32> {
        match self {
            Crs::Epsg(code) => Some(*code),
            Crs::Definition(_) => None,
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Crs::Epsg(code) => write!(f, "EPSG:{}", code),
            Crs::Definition(def) => {
                let short: String = def.chars().take(60).collect();
                if short.len() < def.len() {
                    write!(f, "{}...", short)
                } else {
                    write!(f, "{}", short)
                }
            }
        }
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        match crs {
            Crs::Epsg(code) => format!("EPSG:{}", code),
            Crs::Definition(def) => def,
        }
    }
}

impl TryFrom<String> for Crs {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Crs::parse(&value)
    }
}

/// Single-band raster grid with its georeferencing
#[derive(Debug, Clone, PartialEq)]
pub struct RasterDataset {
    /// Samples, indexed `[[row, col]]`
    pub data: Array2<f64>,
    pub transform: GeoTransform,
    pub crs: Crs,
    pub nodata: Option<f64>,
}

impl RasterDataset {
    pub fn new(data: Array2<f64>, transform: GeoTransform, crs: Crs, nodata: Option<f64>) -> Self {
        Self {
            data,
            transform,
            crs,
            nodata,
        }
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    /// A sample counts as a measurement unless it is NaN or equals the
    /// nodata sentinel.
    pub fn is_valid(&self, value: f64) -> bool {
        if value.is_nan() {
            return false;
        }
        match self.nodata {
            Some(nodata) => value != nodata,
            None => true,
        }
    }

    pub fn bounds(&self) -> BoundingBox {
        self.transform.bounds(self.width(), self.height())
    }
}

/// Unique zone identity. Integers sort before strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ZoneKey {
    Int(i64),
    Text(String),
}

impl ZoneKey {
    /// Key from a GeoJSON property value; only integral numbers and strings qualify
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(ZoneKey::Int(i))
                } else {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                        .map(|f| ZoneKey::Int(f as i64))
                }
            }
            serde_json::Value::String(s) => Some(ZoneKey::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ZoneKey::Int(i) => serde_json::Value::from(*i),
            ZoneKey::Text(s) => serde_json::Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for ZoneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoneKey::Int(i) => write!(f, "{}", i),
            ZoneKey::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for ZoneKey {
    fn from(value: i64) -> Self {
        ZoneKey::Int(value)
    }
}

impl From<&str> for ZoneKey {
    fn from(value: &str) -> Self {
        ZoneKey::Text(value.to_string())
    }
}

/// A (possibly multi-part) zone polygon
#[derive(Debug, Clone, PartialEq)]
pub struct ZonePolygon {
    pub key: ZoneKey,
    pub geometry: MultiPolygon<f64>,
    pub crs: Crs,
}

/// Original feature content carried through to the result table
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneRecord {
    pub key: ZoneKey,
    /// GeoJSON geometry exactly as read
    pub geometry: serde_json::Value,
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// All zones of one field, loaded once and reused for every raster
#[derive(Debug, Clone)]
pub struct ZoneSet {
    pub name: Option<String>,
    pub crs: Crs,
    /// Legacy GeoJSON `crs` member, written back unchanged
    pub crs_member: Option<serde_json::Value>,
    pub key_field: String,
    /// Attribute names in first-seen order
    pub attribute_names: Vec<String>,
    pub zones: Vec<ZonePolygon>,
    pub records: Vec<ZoneRecord>,
}

impl ZoneSet {
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

/// Column identity `<variable_name>_<session>`; orders by variable, then session
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColumnKey {
    pub variable: String,
    pub session: u32,
}

impl ColumnKey {
    pub fn new(variable: impl Into<String>, session: u32) -> Self {
        Self {
            variable: variable.into(),
            session,
        }
    }

    /// Parse `NDVI_3` back into its parts
    pub fn parse(name: &str) -> Option<Self> {
        let (variable, session) = name.rsplit_once('_')?;
        if variable.is_empty() {
            return None;
        }
        let session = session.parse().ok()?;
        Some(Self::new(variable, session))
    }
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.variable, self.session)
    }
}

/// Error types for the zonal time-series pipeline
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("cannot resolve CRS '{crs}': {reason}")]
    CrsResolution { crs: String, reason: String },

    #[error("degenerate raster extent: {0}")]
    DegenerateExtent(String),

    #[error("CRS mismatch: raster is {raster} but zone '{zone}' is {zones}")]
    CrsMismatch {
        raster: String,
        zones: String,
        zone: String,
    },

    #[error("cannot read raster {}: {reason}", .path.display())]
    RasterRead { path: PathBuf, reason: String },

    #[error("cannot read zones {}: {reason}", .path.display())]
    GeometryRead { path: PathBuf, reason: String },

    #[error("unexpected file name '{name}': {reason}")]
    InvalidFileName { name: String, reason: String },

    #[error("column '{0}' inserted twice")]
    DuplicateColumn(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Processing error: {0}")]
    Processing(String),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
