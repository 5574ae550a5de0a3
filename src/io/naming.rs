//! File-name conventions tying rasters, zone files and outputs together.
//!
//! Rasters are named `<field_id>_<session>_<date>_<index_name>.<ext>`,
//! zone files `<anything>_<FIELD-ID>.<ext>`. A raster belongs to a zone file
//! when its name starts with the zone file's field id (hyphens removed).

use crate::types::{ColumnKey, PipelineError, PipelineResult};
use chrono::NaiveDate;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Parsed raster file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterName {
    pub field_id: String,
    pub session: u32,
    /// Acquisition date, when the date segment is a recognisable date
    pub date: Option<NaiveDate>,
    pub index_name: String,
}

impl RasterName {
    pub fn parse(file_name: &str) -> PipelineResult<Self> {
        let invalid = |reason: &str| PipelineError::InvalidFileName {
            name: file_name.to_string(),
            reason: reason.to_string(),
        };

        let pattern = Regex::new(r"^([^_]*)_([^_]*)_([^_]*)_([^_.]*)")
            .map_err(|e| PipelineError::Processing(format!("Regex error: {}", e)))?;
        let captures = pattern
            .captures(file_name)
            .ok_or_else(|| invalid("expected <field>_<session>_<date>_<index>.<ext>"))?;

        let session = captures[2]
            .parse::<u32>()
            .map_err(|_| invalid("session is not an integer"))?;
        let index_name = captures[4].to_string();
        if index_name.is_empty() {
            return Err(invalid("empty index name"));
        }

        Ok(Self {
            field_id: captures[1].to_string(),
            session,
            date: parse_date(&captures[3]),
            index_name,
        })
    }

    pub fn from_path(path: &Path) -> PipelineResult<Self> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PipelineError::InvalidFileName {
                name: path.display().to_string(),
                reason: "not a UTF-8 file name".to_string(),
            })?;
        Self::parse(file_name)
    }

    /// Result column this raster fills, e.g. `NDVI_3`
    pub fn column(&self) -> ColumnKey {
        ColumnKey::new(self.index_name.clone(), self.session)
    }
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%Y-%m-%d"))
        .ok()
}

fn file_stem(path: &Path) -> PipelineResult<&str> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| PipelineError::InvalidFileName {
            name: path.display().to_string(),
            reason: "not a UTF-8 file name".to_string(),
        })
}

/// Field id of a zone file: last `_` segment of the stem, hyphens removed
pub fn zone_field_id(zone_path: &Path) -> PipelineResult<String> {
    let stem = file_stem(zone_path)?;
    let field_id = stem.rsplit('_').next().unwrap_or(stem).replace('-', "");
    if field_id.is_empty() {
        return Err(PipelineError::InvalidFileName {
            name: stem.to_string(),
            reason: "empty field id".to_string(),
        });
    }
    Ok(field_id)
}

/// `<stem>_zonal_stats.<ext>` for a zone file
pub fn output_file_name(zone_path: &Path) -> PipelineResult<String> {
    let stem = file_stem(zone_path)?;
    Ok(match zone_path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}_zonal_stats.{}", stem, ext),
        None => format!("{}_zonal_stats", stem),
    })
}

/// Regular files of `dir` with one of `extensions` (case-insensitive), sorted
pub fn list_files(dir: &Path, extensions: &[String]) -> PipelineResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false);
        if matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Rasters whose file name starts with `field_id`, in the given order
pub fn rasters_for_field(rasters: &[PathBuf], field_id: &str) -> Vec<PathBuf> {
    rasters
        .iter()
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(field_id))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}
