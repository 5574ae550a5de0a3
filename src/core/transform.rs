//! Coordinate transforms between reference systems.
//!
//! Reprojection only needs to move batches of points from one CRS to
//! another, so that is the seam: [`PointTransform`]. The production
//! implementation wraps GDAL/PROJ; tests plug in analytic transforms.

use crate::types::{Crs, PipelineError, PipelineResult};
use gdal::spatial_ref::{CoordTransform, SpatialRef};

/// Transforms points in place from one CRS into another.
///
/// Points that cannot be transformed are set to NaN; an `Err` is reserved
/// for failures of the transform as a whole.
pub trait PointTransform {
    fn transform(&self, xs: &mut [f64], ys: &mut [f64]) -> PipelineResult<()>;

    fn transform_point(&self, x: f64, y: f64) -> PipelineResult<(f64, f64)> {
        let mut xs = [x];
        let mut ys = [y];
        self.transform(&mut xs, &mut ys)?;
        Ok((xs[0], ys[0]))
    }
}

/// Leaves coordinates untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl PointTransform for IdentityTransform {
    fn transform(&self, _xs: &mut [f64], _ys: &mut [f64]) -> PipelineResult<()> {
        Ok(())
    }
}

/// Resolve a CRS identity into a GDAL spatial reference using the
/// traditional GIS axis order (x = easting/longitude, y = northing/latitude).
pub fn resolve_spatial_ref(crs: &Crs) -> PipelineResult<SpatialRef> {
    let resolved = match crs {
        Crs::Epsg(code) => SpatialRef::from_epsg(*code),
        Crs::Definition(definition) => SpatialRef::from_definition(definition),
    };

    let spatial_ref = resolved.map_err(|e| PipelineError::CrsResolution {
        crs: crs.to_string(),
        reason: e.to_string(),
    })?;
    spatial_ref.set_axis_mapping_strategy(
        gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
    );

    Ok(spatial_ref)
}

/// Best identity for a spatial reference: its EPSG code when GDAL can name
/// one, otherwise the WKT definition.
pub fn crs_from_spatial_ref(spatial_ref: &SpatialRef) -> PipelineResult<Crs> {
    if let Some(code) = epsg_code(spatial_ref) {
        return Ok(Crs::Epsg(code));
    }

    // Identification works on a copy so the caller's reference stays as read
    let wkt = spatial_ref.to_wkt()?;
    if let Ok(mut identified) = SpatialRef::from_wkt(&wkt) {
        if identified.auto_identify_epsg().is_ok() {
            if let Some(code) = epsg_code(&identified) {
                return Ok(Crs::Epsg(code));
            }
        }
    }

    log::debug!("CRS has no EPSG identity, keeping WKT definition");
    Ok(Crs::Definition(wkt))
}

fn epsg_code(spatial_ref: &SpatialRef) -> Option<u32> {
    let authority = spatial_ref.auth_name().ok()?;
    if !authority.eq_ignore_ascii_case("EPSG") {
        return None;
    }
    spatial_ref.auth_code().ok().and_then(|code| u32::try_from(code).ok())
}

/// GDAL/PROJ-backed transform between two CRS identities.
///
/// Not `Send`: build one per worker task.
pub struct CrsTransform {
    inner: CoordTransform,
    source: Crs,
    target: Crs,
}

impl CrsTransform {
    pub fn new(source: &Crs, target: &Crs) -> PipelineResult<Self> {
        let source_ref = resolve_spatial_ref(source)?;
        let target_ref = resolve_spatial_ref(target)?;
        let inner = CoordTransform::new(&source_ref, &target_ref).map_err(|e| {
            PipelineError::CrsResolution {
                crs: format!("{} -> {}", source, target),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            inner,
            source: source.clone(),
            target: target.clone(),
        })
    }

    pub fn source(&self) -> &Crs {
        &self.source
    }

    pub fn target(&self) -> &Crs {
        &self.target
    }
}

impl PointTransform for CrsTransform {
    fn transform(&self, xs: &mut [f64], ys: &mut [f64]) -> PipelineResult<()> {
        if xs.len() != ys.len() {
            return Err(PipelineError::Processing(format!(
                "coordinate arrays differ in length: {} vs {}",
                xs.len(),
                ys.len()
            )));
        }
        if xs.is_empty() {
            return Ok(());
        }

        let original_xs = xs.to_vec();
        let original_ys = ys.to_vec();
        let mut zs = vec![0.0; xs.len()];
        if self.inner.transform_coords(xs, ys, &mut zs).is_ok() {
            return Ok(());
        }

        // PROJ rejects the whole batch when a single point fails, and the
        // batch may already be partially overwritten. Redo point by point
        // from the original coordinates.
        log::debug!(
            "Batch transform {} -> {} failed, retrying {} points individually",
            self.source,
            self.target,
            xs.len()
        );
        for (i, (x, y)) in xs.iter_mut().zip(ys.iter_mut()).enumerate() {
            let mut px = [original_xs[i]];
            let mut py = [original_ys[i]];
            let mut pz = [0.0];
            if self.inner.transform_coords(&mut px, &mut py, &mut pz).is_ok()
                && px[0].is_finite()
                && py[0].is_finite()
            {
                *x = px[0];
                *y = py[0];
            } else {
                *x = f64::NAN;
                *y = f64::NAN;
            }
        }
        Ok(())
    }
}
