//! Value distribution of a single raster band: summary statistics and the
//! most frequent histogram bins.

use crate::types::{PipelineError, PipelineResult, RasterDataset};
use serde::{Deserialize, Serialize};

/// Histogram configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistogramParams {
    pub bins: usize,
    /// Values must be strictly greater than this
    pub lower: f64,
    /// Values must be strictly less than this
    pub upper: f64,
    /// Number of peaks to report
    pub top_n: usize,
}

impl Default for HistogramParams {
    fn default() -> Self {
        Self {
            bins: 256,
            lower: -2.0,
            upper: 5.0,
            top_n: 2,
        }
    }
}

impl HistogramParams {
    pub fn validate(&self) -> PipelineResult<()> {
        if self.bins == 0 {
            return Err(PipelineError::Config("histogram needs at least one bin".to_string()));
        }
        if !(self.lower < self.upper) {
            return Err(PipelineError::Config(format!(
                "histogram range ({}, {}) is empty",
                self.lower, self.upper
            )));
        }
        Ok(())
    }
}

/// Min/max/mean over the valid samples of a band
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BandSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
}

/// One reported histogram bin
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistogramPeak {
    pub rank: usize,
    /// Bin centre
    pub value: f64,
    pub count: usize,
}

/// Equal-width histogram; the last bin includes its upper edge
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub min: f64,
    pub max: f64,
    pub counts: Vec<usize>,
}

impl Histogram {
    pub fn bin_width(&self) -> f64 {
        (self.max - self.min) / self.counts.len() as f64
    }

    pub fn bin_centre(&self, index: usize) -> f64 {
        self.min + (index as f64 + 0.5) * self.bin_width()
    }

    /// The `n` fullest bins, largest count first; ties go to the lower bin
    pub fn peaks(&self, n: usize) -> Vec<HistogramPeak> {
        let mut order: Vec<usize> = (0..self.counts.len()).collect();
        order.sort_by(|&a, &b| self.counts[b].cmp(&self.counts[a]).then(a.cmp(&b)));
        order
            .into_iter()
            .take(n)
            .enumerate()
            .map(|(rank, index)| HistogramPeak {
                rank: rank + 1,
                value: self.bin_centre(index),
                count: self.counts[index],
            })
            .collect()
    }
}

pub struct HistogramAnalyzer;

impl HistogramAnalyzer {
    /// Summary of the valid samples; `None` when the band has none
    pub fn band_summary(raster: &RasterDataset) -> Option<BandSummary> {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut count = 0usize;

        for &value in raster.data.iter().filter(|v| raster.is_valid(**v)) {
            min = min.min(value);
            max = max.max(value);
            sum += value;
            count += 1;
        }

        if count == 0 {
            return None;
        }
        Some(BandSummary {
            min,
            max,
            mean: sum / count as f64,
            count,
        })
    }

    /// Valid samples inside the open range `(lower, upper)`
    pub fn filtered_values(raster: &RasterDataset, params: &HistogramParams) -> Vec<f64> {
        raster
            .data
            .iter()
            .copied()
            .filter(|v| raster.is_valid(*v) && *v > params.lower && *v < params.upper)
            .collect()
    }

    /// Histogram over `[min, max]` of the filtered values; `None` with fewer
    /// than two values
    pub fn histogram(values: &[f64], bins: usize) -> Option<Histogram> {
        if values.len() < 2 || bins == 0 {
            return None;
        }

        let mut min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let mut max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if min == max {
            // constant data: centre a unit-wide range on it
            min -= 0.5;
            max += 0.5;
        }

        let width = (max - min) / bins as f64;
        let mut counts = vec![0usize; bins];
        for &v in values {
            let index = (((v - min) / width) as usize).min(bins - 1);
            counts[index] += 1;
        }

        Some(Histogram { min, max, counts })
    }

    /// Top peaks of a raster's value distribution
    pub fn peaks(raster: &RasterDataset, params: &HistogramParams) -> Option<Vec<HistogramPeak>> {
        let values = Self::filtered_values(raster, params);
        let Some(histogram) = Self::histogram(&values, params.bins) else {
            log::warn!(
                "Only {} values inside ({}, {}), no histogram",
                values.len(),
                params.lower,
                params.upper
            );
            return None;
        };

        let peaks = histogram.peaks(params.top_n);
        for peak in &peaks {
            log::info!("Peak {}: {:.4} ({} pixels)", peak.rank, peak.value, peak.count);
        }
        Some(peaks)
    }
}
