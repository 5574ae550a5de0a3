//! Batch driver: pairs zone files with rasters, runs one task per raster on
//! a bounded worker pool and merges the results at a single point.

use crate::config::PipelineConfig;
use crate::core::assembler::ResultTable;
use crate::core::histogram::{BandSummary, HistogramAnalyzer, HistogramPeak};
use crate::core::reproject::{reproject_zone_set, RasterReprojector};
use crate::core::transform::resolve_spatial_ref;
use crate::core::zonal::ZonalAggregator;
use crate::io::naming::{self, RasterName};
use crate::io::raster::{RasterReader, RasterWriter};
use crate::io::table::TableWriter;
use crate::io::zones::ZoneReader;
use crate::types::{ColumnKey, Crs, PipelineError, PipelineResult, ZoneSet, ZoneValues};
use std::fmt;
use std::path::{Path, PathBuf};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// A file the batch could not process
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome counts of one batch run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<TaskFailure>,
}

impl BatchSummary {
    fn record_failure(&mut self, path: &Path, error: &PipelineError) {
        log::error!("Failed {}: {}", path.display(), error);
        self.failed += 1;
        self.failures.push(TaskFailure {
            path: path.to_path_buf(),
            reason: error.to_string(),
        });
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed: {}, skipped: {}, failed: {}",
            self.processed, self.skipped, self.failed
        )?;
        for failure in &self.failures {
            write!(f, "\n  {}: {}", failure.path.display(), failure.reason)?;
        }
        Ok(())
    }
}

/// Histogram result for one raster
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramReport {
    pub path: PathBuf,
    pub summary: Option<BandSummary>,
    /// `None` when too few values fall inside the histogram range
    pub peaks: Option<Vec<HistogramPeak>>,
}

/// Per-raster task output handed to the merge step
struct ZonalOutput {
    column: ColumnKey,
    values: ZoneValues,
}

pub struct Pipeline {
    config: PipelineConfig,
    #[cfg_attr(not(feature = "parallel"), allow(dead_code))]
    pool: rayon::ThreadPool,
}

impl Pipeline {
    /// Validate `config`, resolve the target CRS and size the worker pool.
    ///
    /// An unresolvable target CRS fails here, before any file is touched.
    pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
        config.validate()?;
        resolve_spatial_ref(&config.target_crs)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .build()
            .map_err(|e| PipelineError::Processing(format!("cannot build worker pool: {}", e)))?;
        log::info!(
            "Pipeline ready: target {}, {} workers",
            config.target_crs,
            pool.current_num_threads()
        );

        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Zonal statistics for every zone file of `zone_dir` against its
    /// rasters in `raster_dir`; one output table per zone file.
    ///
    /// Rasters are counted as processed or failed; zone files without any
    /// raster are skipped, unreadable zone files failed.
    pub fn run_zonal_statistics(&self) -> PipelineResult<BatchSummary> {
        let config = &self.config;
        let zone_files = naming::list_files(&config.zone_dir, &config.zone_extensions)?;
        let rasters = naming::list_files(&config.raster_dir, &config.raster_extensions)?;
        log::info!(
            "Found {} zone files and {} rasters",
            zone_files.len(),
            rasters.len()
        );

        let mut summary = BatchSummary::default();
        for zone_path in &zone_files {
            if let Err(e) = self.process_zone_file(zone_path, &rasters, &mut summary) {
                summary.record_failure(zone_path, &e);
            }
        }

        log::info!("Zonal statistics finished: {}", summary);
        Ok(summary)
    }

    /// Build and write the result table of one zone file
    pub fn process_zone_file(
        &self,
        zone_path: &Path,
        rasters: &[PathBuf],
        summary: &mut BatchSummary,
    ) -> PipelineResult<Option<PathBuf>> {
        let config = &self.config;
        let field_id = naming::zone_field_id(zone_path)?;
        let field_rasters = naming::rasters_for_field(rasters, &field_id);
        if field_rasters.is_empty() {
            log::warn!(
                "No rasters for field '{}' ({}), skipping",
                field_id,
                zone_path.display()
            );
            summary.skipped += 1;
            return Ok(None);
        }
        log::info!(
            "Field '{}': {} rasters for {}",
            field_id,
            field_rasters.len(),
            zone_path.display()
        );

        let mut zones = ZoneReader::read(zone_path, &config.zone_key_field)?;
        if zones.crs != config.target_crs {
            // every raster is brought to the target CRS before aggregation
            if !config.reproject_zones {
                return Err(PipelineError::CrsMismatch {
                    raster: config.target_crs.to_string(),
                    zones: zones.crs.to_string(),
                    zone: zone_path.display().to_string(),
                });
            }
            zones = reproject_zone_set(&zones, &config.target_crs)?;
        }

        let outputs = self.run_tasks(&field_rasters, |path| {
            Self::zonal_task(path, &zones, &config.target_crs)
        });

        // single merge point, in sorted raster order
        let mut table = ResultTable::from_zone_set(&zones, config.duplicate_policy);
        let mut merged_count = 0;
        for (path, output) in field_rasters.iter().zip(outputs) {
            match output.and_then(|o| table.insert(&o.values, &o.column)) {
                Ok(()) => merged_count += 1,
                Err(e) => summary.record_failure(path, &e),
            }
        }

        // rasters only count once their values are on disk
        let output_path = config.output_dir.join(naming::output_file_name(zone_path)?);
        TableWriter::write(&table, &output_path)?;
        summary.processed += merged_count;
        Ok(Some(output_path))
    }

    /// Load, reproject and aggregate one raster. The raster is dropped when
    /// the task returns.
    fn zonal_task(path: &Path, zones: &ZoneSet, target_crs: &Crs) -> PipelineResult<ZonalOutput> {
        let column = RasterName::from_path(path)?.column();
        log::info!("Computing {} from {}", column, path.display());

        let raster = RasterReader::read(path)?;
        let raster = RasterReprojector::reproject_owned(raster, target_crs)?;
        let values = ZonalAggregator::zonal_mean(&raster, &zones.zones)?;

        Ok(ZonalOutput { column, values })
    }

    /// Reproject every raster of `raster_dir` into `reprojected_dir`.
    /// Rasters already in the target CRS are copied unchanged.
    pub fn reproject_folder(&self) -> PipelineResult<BatchSummary> {
        let config = &self.config;
        let out_dir = config.reprojected_dir.as_ref().ok_or_else(|| {
            PipelineError::Config("reprojected_dir is required for reprojection".to_string())
        })?;
        std::fs::create_dir_all(out_dir)?;

        let rasters = naming::list_files(&config.raster_dir, &config.raster_extensions)?;
        log::info!(
            "Reprojecting {} rasters to {} into {}",
            rasters.len(),
            config.target_crs,
            out_dir.display()
        );

        let results = self.run_tasks(&rasters, |path| {
            Self::reproject_task(path, out_dir, &config.target_crs)
        });

        let mut summary = BatchSummary::default();
        for (path, result) in rasters.iter().zip(results) {
            match result {
                Ok(()) => summary.processed += 1,
                Err(e) => summary.record_failure(path, &e),
            }
        }
        log::info!("Reprojection finished: {}", summary);
        Ok(summary)
    }

    fn reproject_task(path: &Path, out_dir: &Path, target_crs: &Crs) -> PipelineResult<()> {
        let file_name = path.file_name().ok_or_else(|| PipelineError::InvalidFileName {
            name: path.display().to_string(),
            reason: "no file name".to_string(),
        })?;
        let output_path = out_dir.join(file_name);

        let source_crs = RasterReader::read_crs(path)?;
        if source_crs == *target_crs {
            log::info!("{} already in {}, copying", path.display(), target_crs);
            std::fs::copy(path, &output_path)?;
            return Ok(());
        }

        log::info!("Reprojecting {} ({} -> {})", path.display(), source_crs, target_crs);
        let band_type = RasterReader::band_type(path)?;
        let raster = RasterReader::read(path)?;
        let reprojected = RasterReprojector::reproject_owned(raster, target_crs)?;
        RasterWriter::write_geotiff_as(&reprojected, &output_path, band_type)?;
        Ok(())
    }

    /// Band summary and histogram peaks of every raster in `raster_dir`
    pub fn histogram_folder(&self) -> PipelineResult<(Vec<HistogramReport>, BatchSummary)> {
        let config = &self.config;
        let rasters = naming::list_files(&config.raster_dir, &config.raster_extensions)?;

        let results = self.run_tasks(&rasters, |path| {
            let raster = RasterReader::read(path)?;
            Ok(HistogramReport {
                path: path.to_path_buf(),
                summary: HistogramAnalyzer::band_summary(&raster),
                peaks: HistogramAnalyzer::peaks(&raster, &config.histogram),
            })
        });

        let mut reports = Vec::new();
        let mut summary = BatchSummary::default();
        for (path, result) in rasters.iter().zip(results) {
            match result {
                Ok(report) if report.peaks.is_none() => {
                    summary.skipped += 1;
                    reports.push(report);
                }
                Ok(report) => {
                    summary.processed += 1;
                    reports.push(report);
                }
                Err(e) => summary.record_failure(path, &e),
            }
        }
        Ok((reports, summary))
    }

    /// Run `task` for every path on the worker pool; results keep the order
    /// of `paths`.
    #[cfg(feature = "parallel")]
    fn run_tasks<T, F>(&self, paths: &[PathBuf], task: F) -> Vec<PipelineResult<T>>
    where
        T: Send,
        F: Fn(&Path) -> PipelineResult<T> + Sync,
    {
        self.pool
            .install(|| paths.par_iter().map(|p| task(p)).collect())
    }

    #[cfg(not(feature = "parallel"))]
    fn run_tasks<T, F>(&self, paths: &[PathBuf], task: F) -> Vec<PipelineResult<T>>
    where
        T: Send,
        F: Fn(&Path) -> PipelineResult<T> + Sync,
    {
        paths.iter().map(|p| task(p)).collect()
    }
}
