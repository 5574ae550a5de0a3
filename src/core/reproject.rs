//! Raster reprojection onto a target CRS grid.
//!
//! The output grid is derived from the source extent: the four source
//! corners are transformed, their envelope becomes the output extent and
//! the pixel size keeps the source's diagonal pixel count. Every output
//! pixel centre is mapped back into the source grid and takes the value
//! of the source pixel containing it (nearest neighbour). Nodata never
//! propagates as a value: unmapped, out-of-grid and nodata samples all
//! leave the output pixel at the nodata sentinel.

use crate::core::transform::{CrsTransform, PointTransform};
use crate::types::{
    BoundingBox, Crs, GeoTransform, PipelineError, PipelineResult, RasterDataset, ZonePolygon,
    ZoneSet,
};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use ndarray::Array2;

/// Slack allowed when rounding the output size up, in pixels
const SIZE_ROUNDING_TOLERANCE: f64 = 1e-6;

/// Output grid chosen for a reprojection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputGrid {
    pub transform: GeoTransform,
    pub width: usize,
    pub height: usize,
}

/// Nearest-neighbour raster reprojection
pub struct RasterReprojector;

impl RasterReprojector {
    /// Reproject `source` into `target_crs`.
    ///
    /// A source already in `target_crs` is returned as an exact copy.
    pub fn reproject(source: &RasterDataset, target_crs: &Crs) -> PipelineResult<RasterDataset> {
        if source.crs == *target_crs {
            log::debug!("Raster already in {}, passing through", target_crs);
            return Ok(source.clone());
        }

        let forward = CrsTransform::new(&source.crs, target_crs)?;
        let inverse = CrsTransform::new(target_crs, &source.crs)?;
        Self::reproject_with(source, target_crs, &forward, &inverse)
    }

    /// Like [`RasterReprojector::reproject`] but consumes the source, so the
    /// passthrough case costs no copy.
    pub fn reproject_owned(source: RasterDataset, target_crs: &Crs) -> PipelineResult<RasterDataset> {
        if source.crs == *target_crs {
            log::debug!("Raster already in {}, passing through", target_crs);
            return Ok(source);
        }
        Self::reproject(&source, target_crs)
    }

    /// Reproject with explicit transforms: `forward` maps source CRS to
    /// target CRS, `inverse` maps back.
    pub fn reproject_with<F, I>(
        source: &RasterDataset,
        target_crs: &Crs,
        forward: &F,
        inverse: &I,
    ) -> PipelineResult<RasterDataset>
    where
        F: PointTransform + ?Sized,
        I: PointTransform + ?Sized,
    {
        let grid = Self::output_grid(source, forward)?;
        log::debug!(
            "Reprojecting {}x{} raster {} -> {} onto {}x{} grid",
            source.width(),
            source.height(),
            source.crs,
            target_crs,
            grid.width,
            grid.height
        );

        // A source without a sentinel still needs one for unmapped pixels
        let nodata = source.nodata.unwrap_or(f64::NAN);
        let mut output = Array2::from_elem((grid.height, grid.width), nodata);

        let mut xs = vec![0.0; grid.width];
        let mut ys = vec![0.0; grid.width];
        let mut copied = 0usize;

        for row in 0..grid.height {
            for col in 0..grid.width {
                let (x, y) = grid
                    .transform
                    .pixel_to_world(col as f64 + 0.5, row as f64 + 0.5);
                xs[col] = x;
                ys[col] = y;
            }
            inverse.transform(&mut xs, &mut ys)?;

            for col in 0..grid.width {
                if let Some((src_row, src_col)) = Self::nearest_source_pixel(source, xs[col], ys[col]) {
                    let value = source.data[[src_row, src_col]];
                    if source.is_valid(value) {
                        output[[row, col]] = value;
                        copied += 1;
                    }
                }
            }
        }

        let total = grid.width * grid.height;
        log::debug!(
            "Reprojection filled {} of {} pixels ({:.1}%)",
            copied,
            total,
            copied as f64 / total as f64 * 100.0
        );

        Ok(RasterDataset {
            data: output,
            transform: grid.transform,
            crs: target_crs.clone(),
            nodata: Some(nodata),
        })
    }

    /// Output grid for reprojecting `source` through `forward`
    pub fn output_grid<F>(source: &RasterDataset, forward: &F) -> PipelineResult<OutputGrid>
    where
        F: PointTransform + ?Sized,
    {
        let (width, height) = (source.width(), source.height());
        if width == 0 || height == 0 {
            return Err(PipelineError::DegenerateExtent(format!(
                "raster has {}x{} pixels",
                width, height
            )));
        }
        if !source.transform.is_invertible() {
            return Err(PipelineError::DegenerateExtent(format!(
                "singular geotransform {:?}",
                source.transform.to_gdal()
            )));
        }

        let corners = source.transform.corners(width, height);
        let mut xs: Vec<f64> = corners.iter().map(|c| c.0).collect();
        let mut ys: Vec<f64> = corners.iter().map(|c| c.1).collect();
        forward.transform(&mut xs, &mut ys)?;

        if xs.iter().chain(ys.iter()).any(|v| !v.is_finite()) {
            return Err(PipelineError::DegenerateExtent(
                "raster corners cannot be expressed in the target CRS".to_string(),
            ));
        }

        let points: Vec<(f64, f64)> = xs.into_iter().zip(ys).collect();
        let bbox = BoundingBox::from_points(&points)
            .filter(|b| !b.is_degenerate())
            .ok_or_else(|| {
                PipelineError::DegenerateExtent(
                    "transformed extent has zero area".to_string(),
                )
            })?;

        // Same number of pixels along the diagonal as the source
        let diagonal_pixels = (width as f64).hypot(height as f64);
        let resolution = bbox.width().hypot(bbox.height()) / diagonal_pixels;

        let out_width = Self::pixel_count(bbox.width(), resolution);
        let out_height = Self::pixel_count(bbox.height(), resolution);

        Ok(OutputGrid {
            transform: GeoTransform::north_up(bbox.min_x, bbox.max_y, resolution, -resolution),
            width: out_width,
            height: out_height,
        })
    }

    fn pixel_count(extent: f64, resolution: f64) -> usize {
        ((extent / resolution) - SIZE_ROUNDING_TOLERANCE).ceil().max(1.0) as usize
    }

    /// Row/column of the source pixel containing world point (x, y)
    fn nearest_source_pixel(source: &RasterDataset, x: f64, y: f64) -> Option<(usize, usize)> {
        if !(x.is_finite() && y.is_finite()) {
            return None;
        }
        let (col, row) = source.transform.world_to_pixel(x, y)?;
        let (col, row) = (col.floor(), row.floor());
        if col < 0.0 || row < 0.0 || col >= source.width() as f64 || row >= source.height() as f64 {
            return None;
        }
        Some((row as usize, col as usize))
    }
}

/// Reproject every zone of `zones` into `target_crs`
pub fn reproject_zone_set(zones: &ZoneSet, target_crs: &Crs) -> PipelineResult<ZoneSet> {
    if zones.crs == *target_crs {
        return Ok(zones.clone());
    }
    let transform = CrsTransform::new(&zones.crs, target_crs)?;
    reproject_zone_set_with(zones, target_crs, &transform)
}

/// Zone reprojection through an explicit transform. Only the overlay
/// geometry moves; the carried-through GeoJSON records are left as read.
pub fn reproject_zone_set_with<T>(
    zones: &ZoneSet,
    target_crs: &Crs,
    transform: &T,
) -> PipelineResult<ZoneSet>
where
    T: PointTransform + ?Sized,
{
    log::info!(
        "Reprojecting {} zones {} -> {}",
        zones.len(),
        zones.crs,
        target_crs
    );

    let mut reprojected = zones.clone();
    reprojected.crs = target_crs.clone();
    reprojected.zones = zones
        .zones
        .iter()
        .map(|zone| {
            Ok(ZonePolygon {
                key: zone.key.clone(),
                geometry: transform_multi_polygon(&zone.geometry, transform)?,
                crs: target_crs.clone(),
            })
        })
        .collect::<PipelineResult<Vec<_>>>()?;

    Ok(reprojected)
}

fn transform_multi_polygon<T>(
    geometry: &MultiPolygon<f64>,
    transform: &T,
) -> PipelineResult<MultiPolygon<f64>>
where
    T: PointTransform + ?Sized,
{
    let polygons = geometry
        .0
        .iter()
        .map(|polygon| {
            let exterior = transform_ring(polygon.exterior(), transform)?;
            let interiors = polygon
                .interiors()
                .iter()
                .map(|ring| transform_ring(ring, transform))
                .collect::<PipelineResult<Vec<_>>>()?;
            Ok(Polygon::new(exterior, interiors))
        })
        .collect::<PipelineResult<Vec<_>>>()?;
    Ok(MultiPolygon(polygons))
}

fn transform_ring<T>(ring: &LineString<f64>, transform: &T) -> PipelineResult<LineString<f64>>
where
    T: PointTransform + ?Sized,
{
    let mut xs: Vec<f64> = ring.0.iter().map(|c| c.x).collect();
    let mut ys: Vec<f64> = ring.0.iter().map(|c| c.y).collect();
    transform.transform(&mut xs, &mut ys)?;

    if xs.iter().chain(ys.iter()).any(|v| !v.is_finite()) {
        return Err(PipelineError::Processing(
            "zone vertex cannot be expressed in the target CRS".to_string(),
        ));
    }

    Ok(LineString(
        xs.into_iter()
            .zip(ys)
            .map(|(x, y)| Coord { x, y })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transform::IdentityTransform;
    use crate::types::ZoneKey;
    use approx::assert_relative_eq;
    use ndarray::array;

    /// x' = x * scale + dx, y' = y * scale + dy
    struct Affine {
        scale: f64,
        dx: f64,
        dy: f64,
    }

    impl Affine {
        fn inverse(&self) -> Affine {
            Affine {
                scale: 1.0 / self.scale,
                dx: -self.dx / self.scale,
                dy: -self.dy / self.scale,
            }
        }
    }

    impl PointTransform for Affine {
        fn transform(&self, xs: &mut [f64], ys: &mut [f64]) -> PipelineResult<()> {
            for x in xs.iter_mut() {
                *x = *x * self.scale + self.dx;
            }
            for y in ys.iter_mut() {
                *y = *y * self.scale + self.dy;
            }
            Ok(())
        }
    }

    /// Rejects everything west of x = 0
    struct EastOnly;

    impl PointTransform for EastOnly {
        fn transform(&self, xs: &mut [f64], ys: &mut [f64]) -> PipelineResult<()> {
            for (x, y) in xs.iter_mut().zip(ys.iter_mut()) {
                if *x < 0.0 {
                    *x = f64::NAN;
                    *y = f64::NAN;
                }
            }
            Ok(())
        }
    }

    fn sample_raster(nodata: Option<f64>) -> RasterDataset {
        RasterDataset::new(
            array![
                [0.1, 0.2, 0.3, 0.4],
                [0.5, -9999.0, 0.7, 0.8],
                [0.9, 1.0, 1.1, 1.2],
            ],
            GeoTransform::north_up(100.0, 200.0, 2.0, -2.0),
            Crs::Epsg(5179),
            nodata,
        )
    }

    #[test]
    fn test_passthrough_is_identical() {
        let raster = sample_raster(Some(-9999.0));
        let output = RasterReprojector::reproject(&raster, &Crs::Epsg(5179)).unwrap();
        assert_eq!(output, raster);

        let owned = RasterReprojector::reproject_owned(raster.clone(), &Crs::Epsg(5179)).unwrap();
        assert_eq!(owned, raster);
    }

    #[test]
    fn test_translation_keeps_grid_and_values() {
        let raster = sample_raster(Some(-9999.0));
        let shift = Affine { scale: 1.0, dx: 1000.0, dy: -500.0 };
        let output =
            RasterReprojector::reproject_with(&raster, &Crs::Epsg(32652), &shift, &shift.inverse())
                .unwrap();

        assert_eq!(output.crs, Crs::Epsg(32652));
        assert_eq!((output.width(), output.height()), (4, 3));
        assert_relative_eq!(output.transform.top_left_x, 1100.0, epsilon = 1e-9);
        assert_relative_eq!(output.transform.top_left_y, -300.0, epsilon = 1e-9);
        assert_relative_eq!(output.transform.pixel_width, 2.0, epsilon = 1e-9);
        assert_relative_eq!(output.transform.pixel_height, -2.0, epsilon = 1e-9);
        assert_eq!(output.data, raster.data);
        assert_eq!(output.nodata, Some(-9999.0));
    }

    #[test]
    fn test_scaled_grid_rounds_size_up() {
        let raster = sample_raster(None);
        let scale = Affine { scale: 3.0, dx: 0.0, dy: 0.0 };
        let grid = RasterReprojector::output_grid(&raster, &scale).unwrap();
        // nominal resolution scales with the transform, pixel count is kept
        assert_relative_eq!(grid.transform.pixel_width, 6.0, epsilon = 1e-9);
        assert_eq!((grid.width, grid.height), (4, 3));
    }

    #[test]
    fn test_nodata_is_never_copied() {
        let raster = sample_raster(Some(-9999.0));
        let shift = Affine { scale: 1.0, dx: 0.3, dy: 0.3 };
        let output =
            RasterReprojector::reproject_with(&raster, &Crs::Epsg(32652), &shift, &shift.inverse())
                .unwrap();

        let inverse = shift.inverse();
        for ((row, col), value) in output.data.indexed_iter() {
            let (x, y) = output
                .transform
                .pixel_to_world(col as f64 + 0.5, row as f64 + 0.5);
            let (sx, sy) = inverse.transform_point(x, y).unwrap();
            let Some((src_row, src_col)) = RasterReprojector::nearest_source_pixel(&raster, sx, sy)
            else {
                assert_eq!(*value, -9999.0);
                continue;
            };
            let source_value = raster.data[[src_row, src_col]];
            if source_value == -9999.0 {
                assert_eq!(*value, -9999.0);
            } else {
                assert_eq!(*value, source_value);
            }
        }
        assert!(output.data.iter().filter(|v| **v == -9999.0).count() >= 1);
    }

    #[test]
    fn test_missing_nodata_becomes_nan() {
        let raster = sample_raster(None);
        let shift = Affine { scale: 1.0, dx: 0.5, dy: 0.5 };
        let output =
            RasterReprojector::reproject_with(&raster, &Crs::Epsg(32652), &shift, &shift.inverse())
                .unwrap();
        assert!(output.nodata.unwrap().is_nan());
        // shifted by a quarter pixel: every output centre still lands on the source
        assert!(output.data.iter().all(|v| !v.is_nan()));
    }

    #[test]
    fn test_round_trip_drift_within_one_pixel() {
        let raster = sample_raster(Some(-9999.0));
        let there = Affine { scale: 1.7, dx: 35.0, dy: -12.0 };
        let back = there.inverse();

        let moved =
            RasterReprojector::reproject_with(&raster, &Crs::Epsg(32652), &there, &back).unwrap();
        let returned =
            RasterReprojector::reproject_with(&moved, &Crs::Epsg(5179), &back, &there).unwrap();

        let pixel = returned.transform.pixel_width.abs();
        let original_bounds = raster.bounds();
        let returned_bounds = returned.bounds();
        assert!((original_bounds.min_x - returned_bounds.min_x).abs() <= pixel);
        assert!((original_bounds.max_y - returned_bounds.max_y).abs() <= pixel);

        // sample values are distinct, so each one names its origin pixel
        for ((row, col), value) in returned.data.indexed_iter() {
            if !returned.is_valid(*value) {
                continue;
            }
            let (x, y) = returned
                .transform
                .pixel_to_world(col as f64 + 0.5, row as f64 + 0.5);
            let ((src_row, src_col), _) = raster
                .data
                .indexed_iter()
                .find(|(_, v)| **v == *value)
                .unwrap();
            let (ox, oy) = raster
                .transform
                .pixel_to_world(src_col as f64 + 0.5, src_row as f64 + 0.5);
            assert!(
                (ox - x).abs() <= pixel + 1e-9 && (oy - y).abs() <= pixel + 1e-9,
                "value {} at ({}, {}) drifted ({:.3}, {:.3})",
                value,
                row,
                col,
                ox - x,
                oy - y
            );
        }
    }

    #[test]
    fn test_empty_raster_is_degenerate() {
        let raster = RasterDataset::new(
            Array2::zeros((0, 3)),
            GeoTransform::north_up(0.0, 0.0, 1.0, -1.0),
            Crs::Epsg(5179),
            None,
        );
        let result = RasterReprojector::output_grid(&raster, &IdentityTransform);
        assert!(matches!(result, Err(PipelineError::DegenerateExtent(_))));
    }

    #[test]
    fn test_singular_transform_is_degenerate() {
        let mut raster = sample_raster(None);
        raster.transform = GeoTransform::north_up(0.0, 0.0, 1.0, 0.0);
        let result = RasterReprojector::output_grid(&raster, &IdentityTransform);
        assert!(matches!(result, Err(PipelineError::DegenerateExtent(_))));
    }

    #[test]
    fn test_collapsed_extent_is_degenerate() {
        let raster = sample_raster(None);
        let collapse = Affine { scale: 0.0, dx: 5.0, dy: 5.0 };
        let result = RasterReprojector::output_grid(&raster, &collapse);
        assert!(matches!(result, Err(PipelineError::DegenerateExtent(_))));
    }

    #[test]
    fn test_unmappable_pixels_stay_nodata() {
        let raster = RasterDataset::new(
            Array2::from_elem((2, 4), 0.5),
            GeoTransform::north_up(-2.0, 1.0, 1.0, -1.0),
            Crs::Epsg(5179),
            Some(-1.0),
        );
        // the west half cannot be mapped back into the source
        let output =
            RasterReprojector::reproject_with(&raster, &Crs::Epsg(32652), &IdentityTransform, &EastOnly)
                .unwrap();
        for row in 0..output.height() {
            assert_eq!(output.data[[row, 0]], -1.0);
            assert_eq!(output.data[[row, 3]], 0.5);
        }
    }

    #[test]
    fn test_zone_set_reprojection_moves_vertices() {
        let square = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]),
            vec![],
        );
        let zones = ZoneSet {
            name: None,
            crs: Crs::Epsg(4326),
            crs_member: None,
            key_field: "no".to_string(),
            attribute_names: vec![],
            zones: vec![ZonePolygon {
                key: ZoneKey::Int(1),
                geometry: MultiPolygon(vec![square]),
                crs: Crs::Epsg(4326),
            }],
            records: vec![],
        };

        let shift = Affine { scale: 1.0, dx: 10.0, dy: 20.0 };
        let moved = reproject_zone_set_with(&zones, &Crs::Epsg(5179), &shift).unwrap();
        assert_eq!(moved.crs, Crs::Epsg(5179));
        assert_eq!(moved.zones[0].crs, Crs::Epsg(5179));
        let first = moved.zones[0].geometry.0[0].exterior().0[0];
        assert_eq!((first.x, first.y), (10.0, 20.0));
    }
}
