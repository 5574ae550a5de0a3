//! Zonal aggregation of raster values under zone polygons.
//!
//! A pixel belongs to a zone when the zone covers a positive area of the
//! pixel cell ("all touched"): any overlap counts, however small, but a
//! polygon that only shares an edge or a corner with a cell does not.
//! Overlap is measured in pixel space, so rotated grids need no special
//! handling: zone rings go through the inverse geotransform and are then
//! clipped against unit cells.

use crate::types::{
    GeoTransform, PipelineError, PipelineResult, RasterDataset, ZonePolygon, ZoneValues,
};
use geo::{Coord, MultiPolygon};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Cell overlap (as a fraction of one pixel) below which a touch is
/// treated as edge or corner contact
const MIN_OVERLAP: f64 = 1e-9;

/// Mean of valid raster values per zone
pub struct ZonalAggregator;

impl ZonalAggregator {
    /// Mean of the valid pixels each zone touches.
    ///
    /// Every zone gets an entry; zones without a single valid pixel map to
    /// `None`. Zones and raster must share one CRS.
    pub fn zonal_mean(raster: &RasterDataset, zones: &[ZonePolygon]) -> PipelineResult<ZoneValues> {
        if let Some(zone) = zones.iter().find(|z| z.crs != raster.crs) {
            return Err(PipelineError::CrsMismatch {
                raster: raster.crs.to_string(),
                zones: zone.crs.to_string(),
                zone: zone.key.to_string(),
            });
        }
        if !raster.transform.is_invertible() {
            return Err(PipelineError::DegenerateExtent(format!(
                "singular geotransform {:?}",
                raster.transform.to_gdal()
            )));
        }

        #[cfg(feature = "parallel")]
        let means: Vec<Option<f64>> = zones
            .par_iter()
            .map(|zone| Self::zone_mean(raster, &zone.geometry))
            .collect();

        #[cfg(not(feature = "parallel"))]
        let means: Vec<Option<f64>> = zones
            .iter()
            .map(|zone| Self::zone_mean(raster, &zone.geometry))
            .collect();

        let values: ZoneValues = zones
            .iter()
            .zip(means)
            .map(|(zone, mean)| (zone.key.clone(), mean))
            .collect();

        let empty = values.values().filter(|v| v.is_none()).count();
        log::debug!(
            "Zonal mean over {} zones ({} without valid pixels)",
            values.len(),
            empty
        );
        Ok(values)
    }

    fn zone_mean(raster: &RasterDataset, geometry: &MultiPolygon<f64>) -> Option<f64> {
        let mut sum = 0.0f64;
        let mut count = 0usize;

        // included_pixels walks row-major, which fixes the summation order
        for (row, col) in included_pixels(&raster.transform, raster.width(), raster.height(), geometry) {
            let value = raster.data[[row, col]];
            if raster.is_valid(value) {
                sum += value;
                count += 1;
            }
        }

        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }
}

/// Pixels `(row, col)` of a `width` x `height` grid that `geometry`
/// overlaps with positive area, in row-major order.
pub fn included_pixels(
    transform: &GeoTransform,
    width: usize,
    height: usize,
    geometry: &MultiPolygon<f64>,
) -> Vec<(usize, usize)> {
    let parts: Vec<PixelPolygon> = geometry
        .0
        .iter()
        .filter_map(|polygon| {
            let exterior = to_pixel_ring(transform, &polygon.exterior().0)?;
            let holes = polygon
                .interiors()
                .iter()
                .filter_map(|ring| to_pixel_ring(transform, &ring.0))
                .collect();
            Some(PixelPolygon { exterior, holes })
        })
        .collect();

    let Some(extent) = pixel_extent(&parts) else {
        return Vec::new();
    };

    let row_start = extent.min_y.floor().max(0.0) as usize;
    let row_end = (extent.max_y.ceil().min(height as f64)).max(0.0) as usize;

    let mut pixels = Vec::new();
    for row in row_start..row_end {
        let band = Window::row_band(row);
        let band_parts: Vec<PixelPolygon> = parts.iter().map(|p| p.clip(&band)).collect();

        let Some(band_extent) = pixel_extent(&band_parts) else {
            continue;
        };
        let col_start = band_extent.min_x.floor().max(0.0) as usize;
        let col_end = (band_extent.max_x.ceil().min(width as f64)).max(0.0) as usize;

        for col in col_start..col_end {
            let cell = Window::cell(row, col);
            let area: f64 = band_parts.iter().map(|p| p.clipped_area(&cell)).sum();
            if area > MIN_OVERLAP {
                pixels.push((row, col));
            }
        }
    }
    pixels
}

/// Ring vertices in pixel space without the closing vertex
fn to_pixel_ring(transform: &GeoTransform, ring: &[Coord<f64>]) -> Option<Vec<Coord<f64>>> {
    let open = match ring.split_last() {
        Some((last, rest)) if !rest.is_empty() && *last == rest[0] => rest,
        _ => ring,
    };
    if open.len() < 3 {
        return None;
    }
    open.iter()
        .map(|c| {
            transform
                .world_to_pixel(c.x, c.y)
                .filter(|(col, row)| col.is_finite() && row.is_finite())
                .map(|(col, row)| Coord { x: col, y: row })
        })
        .collect()
}

fn pixel_extent(parts: &[PixelPolygon]) -> Option<Window> {
    let mut vertices = parts.iter().flat_map(|p| p.exterior.iter());
    let first = vertices.next()?;
    let mut extent = Window {
        min_x: first.x,
        max_x: first.x,
        min_y: first.y,
        max_y: first.y,
    };
    for v in vertices {
        extent.min_x = extent.min_x.min(v.x);
        extent.max_x = extent.max_x.max(v.x);
        extent.min_y = extent.min_y.min(v.y);
        extent.max_y = extent.max_y.max(v.y);
    }
    Some(extent)
}

/// Polygon with holes, in pixel coordinates (x = column, y = row)
#[derive(Debug, Clone)]
struct PixelPolygon {
    exterior: Vec<Coord<f64>>,
    holes: Vec<Vec<Coord<f64>>>,
}

impl PixelPolygon {
    fn clip(&self, window: &Window) -> PixelPolygon {
        PixelPolygon {
            exterior: window.clip(&self.exterior),
            holes: self.holes.iter().map(|h| window.clip(h)).collect(),
        }
    }

    /// Area of the polygon inside `window`
    fn clipped_area(&self, window: &Window) -> f64 {
        let outer = ring_area(&window.clip(&self.exterior));
        if outer <= 0.0 {
            return 0.0;
        }
        let holes: f64 = self.holes.iter().map(|h| ring_area(&window.clip(h))).sum();
        (outer - holes).max(0.0)
    }
}

/// Axis-aligned clip window in pixel space
#[derive(Debug, Clone, Copy)]
struct Window {
    min_x: f64,
    max_x: f64,
    min_y: f64,
    max_y: f64,
}

#[derive(Debug, Clone, Copy)]
enum Boundary {
    MinX(f64),
    MaxX(f64),
    MinY(f64),
    MaxY(f64),
}

impl Boundary {
    fn keeps(self, p: Coord<f64>) -> bool {
        match self {
            Boundary::MinX(v) => p.x >= v,
            Boundary::MaxX(v) => p.x <= v,
            Boundary::MinY(v) => p.y >= v,
            Boundary::MaxY(v) => p.y <= v,
        }
    }

    /// Crossing of segment a-b with this boundary; only called when
    /// a and b lie on opposite sides
    fn crossing(self, a: Coord<f64>, b: Coord<f64>) -> Coord<f64> {
        match self {
            Boundary::MinX(v) | Boundary::MaxX(v) => {
                let t = (v - a.x) / (b.x - a.x);
                Coord { x: v, y: a.y + t * (b.y - a.y) }
            }
            Boundary::MinY(v) | Boundary::MaxY(v) => {
                let t = (v - a.y) / (b.y - a.y);
                Coord { x: a.x + t * (b.x - a.x), y: v }
            }
        }
    }

    fn clip(self, ring: &[Coord<f64>]) -> Vec<Coord<f64>> {
        let mut out = Vec::with_capacity(ring.len() + 2);
        for (i, &current) in ring.iter().enumerate() {
            let next = ring[(i + 1) % ring.len()];
            match (self.keeps(current), self.keeps(next)) {
                (true, true) => out.push(next),
                (true, false) => out.push(self.crossing(current, next)),
                (false, true) => {
                    out.push(self.crossing(current, next));
                    out.push(next);
                }
                (false, false) => {}
            }
        }
        out
    }
}

impl Window {
    fn row_band(row: usize) -> Self {
        Window {
            min_x: f64::NEG_INFINITY,
            max_x: f64::INFINITY,
            min_y: row as f64,
            max_y: row as f64 + 1.0,
        }
    }

    fn cell(row: usize, col: usize) -> Self {
        Window {
            min_x: col as f64,
            max_x: col as f64 + 1.0,
            min_y: row as f64,
            max_y: row as f64 + 1.0,
        }
    }

    /// Sutherland-Hodgman clip of a ring against this window
    fn clip(&self, ring: &[Coord<f64>]) -> Vec<Coord<f64>> {
        let mut clipped = ring.to_vec();
        for boundary in [
            Boundary::MinX(self.min_x),
            Boundary::MaxX(self.max_x),
            Boundary::MinY(self.min_y),
            Boundary::MaxY(self.max_y),
        ] {
            if clipped.is_empty() {
                break;
            }
            // infinite bounds never cut
            let unbounded = match boundary {
                Boundary::MinX(v) | Boundary::MaxX(v) | Boundary::MinY(v) | Boundary::MaxY(v) => {
                    v.is_infinite()
                }
            };
            if !unbounded {
                clipped = boundary.clip(&clipped);
            }
        }
        clipped
    }
}

/// Unsigned shoelace area of an open ring
fn ring_area(ring: &[Coord<f64>]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let twice: f64 = ring
        .iter()
        .zip(ring.iter().cycle().skip(1))
        .map(|(a, b)| a.x * b.y - b.x * a.y)
        .sum();
    twice.abs() / 2.0
}
