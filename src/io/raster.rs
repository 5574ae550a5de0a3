use crate::core::transform::{crs_from_spatial_ref, resolve_spatial_ref};
use crate::types::{Crs, GeoTransform, PipelineError, PipelineResult, RasterDataset};
use gdal::raster::{Buffer, GdalDataType, GdalType};
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use num_traits::NumCast;
use std::path::Path;

/// Single-band GeoTIFF reader
pub struct RasterReader;

impl RasterReader {
    /// Read band 1 of `path` with its geotransform, CRS and nodata value
    pub fn read<P: AsRef<Path>>(path: P) -> PipelineResult<RasterDataset> {
        let path = path.as_ref();
        log::debug!("Reading raster: {}", path.display());

        let read_error = |reason: String| PipelineError::RasterRead {
            path: path.to_path_buf(),
            reason,
        };

        let dataset = Dataset::open(path).map_err(|e| read_error(e.to_string()))?;
        let geo_transform = dataset
            .geo_transform()
            .map_err(|e| read_error(format!("no geotransform: {}", e)))?;
        let (width, height) = dataset.raster_size();
        log::debug!("Raster size: {}x{}", width, height);

        let crs = Self::dataset_crs(&dataset, path)?;

        let rasterband = dataset
            .rasterband(1)
            .map_err(|e| read_error(e.to_string()))?;
        let nodata = rasterband.no_data_value();
        let band_data = rasterband
            .read_as::<f64>((0, 0), (width, height), (width, height), None)
            .map_err(|e| read_error(e.to_string()))?;

        let data = Array2::from_shape_vec((height, width), band_data.data)
            .map_err(|e| read_error(format!("failed to reshape band data: {}", e)))?;

        Ok(RasterDataset::new(
            data,
            GeoTransform::from_gdal(geo_transform),
            crs,
            nodata,
        ))
    }

    /// CRS of a raster file without reading its pixels
    pub fn read_crs<P: AsRef<Path>>(path: P) -> PipelineResult<Crs> {
        let path = path.as_ref();
        let dataset = Dataset::open(path).map_err(|e| PipelineError::RasterRead {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::dataset_crs(&dataset, path)
    }

    /// Sample type of band 1 without reading its pixels
    pub fn band_type<P: AsRef<Path>>(path: P) -> PipelineResult<GdalDataType> {
        let path = path.as_ref();
        let read_error = |reason: String| PipelineError::RasterRead {
            path: path.to_path_buf(),
            reason,
        };
        let dataset = Dataset::open(path).map_err(|e| read_error(e.to_string()))?;
        let rasterband = dataset
            .rasterband(1)
            .map_err(|e| read_error(e.to_string()))?;
        Ok(rasterband.band_type())
    }

    fn dataset_crs(dataset: &Dataset, path: &Path) -> PipelineResult<Crs> {
        let spatial_ref = dataset
            .spatial_ref()
            .map_err(|e| PipelineError::CrsResolution {
                crs: path.display().to_string(),
                reason: format!("raster has no usable CRS: {}", e),
            })?;
        crs_from_spatial_ref(&spatial_ref)
    }
}

/// GeoTIFF writer
pub struct RasterWriter;

impl RasterWriter {
    /// Write `raster` as a single-band GeoTIFF with sample type `T`.
    ///
    /// NaN samples are written as the nodata value when `T` cannot hold NaN.
    pub fn write_geotiff<T, P>(raster: &RasterDataset, path: P) -> PipelineResult<()>
    where
        T: GdalType + NumCast + Copy,
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        log::debug!("Writing GeoTIFF: {}", path.display());

        let (height, width) = raster.data.dim();
        let fill = raster
            .nodata
            .and_then(|v| <T as NumCast>::from(v))
            .or_else(|| <T as NumCast>::from(0.0));

        let flat_data = raster
            .data
            .iter()
            .map(|&v| {
                <T as NumCast>::from(v).or(fill).ok_or_else(|| {
                    PipelineError::Processing(format!(
                        "value {} does not fit the output sample type",
                        v
                    ))
                })
            })
            .collect::<PipelineResult<Vec<T>>>()?;

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let mut dataset = driver.create_with_band_type::<T, _>(
            path,
            width as isize,
            height as isize,
            1,
        )?;

        dataset.set_geo_transform(&raster.transform.to_gdal())?;
        dataset.set_spatial_ref(&resolve_spatial_ref(&raster.crs)?)?;

        let mut rasterband = dataset.rasterband(1)?;
        let buffer = Buffer::new((width, height), flat_data);
        rasterband.write((0, 0), (width, height), &buffer)?;

        if let Some(nodata) = raster.nodata {
            rasterband.set_no_data_value(Some(nodata))?;
        }

        log::debug!("GeoTIFF written: {}x{} {}", width, height, raster.crs);
        Ok(())
    }

    /// Write `raster` with the sample type of `band_type`.
    ///
    /// Integer types need a finite nodata value to mark cells outside the
    /// source footprint; without one the raster is written as Float32.
    pub fn write_geotiff_as<P: AsRef<Path>>(
        raster: &RasterDataset,
        path: P,
        band_type: GdalDataType,
    ) -> PipelineResult<()> {
        let finite_nodata = raster.nodata.map_or(false, f64::is_finite);
        match band_type {
            GdalDataType::Float64 => Self::write_geotiff::<f64, _>(raster, path),
            GdalDataType::UInt8 if finite_nodata => Self::write_geotiff::<u8, _>(raster, path),
            GdalDataType::UInt16 if finite_nodata => Self::write_geotiff::<u16, _>(raster, path),
            GdalDataType::Int16 if finite_nodata => Self::write_geotiff::<i16, _>(raster, path),
            GdalDataType::UInt32 if finite_nodata => Self::write_geotiff::<u32, _>(raster, path),
            GdalDataType::Int32 if finite_nodata => Self::write_geotiff::<i32, _>(raster, path),
            _ => Self::write_geotiff::<f32, _>(raster, path),
        }
    }
}
