//! vegzone command line: reprojection, zonal statistics and histograms
//! over folders of drone rasters.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use vegzone::core::HistogramAnalyzer;
use vegzone::io::RasterReader;
use vegzone::{BatchSummary, Crs, DuplicatePolicy, Pipeline, PipelineConfig};

#[derive(Parser)]
#[command(name = "vegzone")]
#[command(about = "Per-zone vegetation-index time series from drone rasters", long_about = None)]
struct Cli {
    /// JSON configuration file; command-line options override it
    #[arg(short, long, global = true, env = "VEGZONE_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Overrides {
    /// Raster input folder
    #[arg(long)]
    raster_dir: Option<PathBuf>,

    /// Target CRS, e.g. EPSG:5179
    #[arg(long)]
    target_crs: Option<String>,

    /// Worker threads (0 = one per core)
    #[arg(short, long)]
    workers: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Zonal statistics for every zone file against its rasters
    Run {
        #[command(flatten)]
        overrides: Overrides,

        /// Zone (GeoJSON) folder
        #[arg(long)]
        zone_dir: Option<PathBuf>,

        /// Output folder for result tables
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Zone property holding the zone key
        #[arg(long)]
        key_field: Option<String>,

        /// Fail instead of overwriting when an index/session column repeats
        #[arg(long)]
        reject_duplicates: bool,

        /// Reproject zones into the target CRS instead of failing on mismatch
        #[arg(long)]
        reproject_zones: bool,
    },

    /// Reproject a raster folder into the target CRS
    Reproject {
        #[command(flatten)]
        overrides: Overrides,

        /// Destination folder
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Report the most frequent value bins of every raster
    Histogram {
        #[command(flatten)]
        overrides: Overrides,

        /// Number of peaks to report
        #[arg(short = 'n', long)]
        top: Option<usize>,
    },

    /// Print min/max/mean of raster files
    Stats {
        /// Raster files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<PipelineConfig> {
    Ok(match path {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    })
}

fn apply(config: &mut PipelineConfig, overrides: Overrides) -> anyhow::Result<()> {
    if let Some(dir) = overrides.raster_dir {
        config.raster_dir = dir;
    }
    if let Some(crs) = overrides.target_crs {
        config.target_crs = Crs::parse(&crs)?;
    }
    if let Some(workers) = overrides.workers {
        config.workers = workers;
    }
    Ok(())
}

fn report(summary: &BatchSummary) {
    println!("{}", summary);
    if !summary.is_clean() {
        log::warn!("{} item(s) failed", summary.failed);
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let mut config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Run {
            overrides,
            zone_dir,
            output_dir,
            key_field,
            reject_duplicates,
            reproject_zones,
        } => {
            apply(&mut config, overrides)?;
            if let Some(dir) = zone_dir {
                config.zone_dir = dir;
            }
            if let Some(dir) = output_dir {
                config.output_dir = dir;
            }
            if let Some(field) = key_field {
                config.zone_key_field = field;
            }
            if reject_duplicates {
                config.duplicate_policy = DuplicatePolicy::Reject;
            }
            if reproject_zones {
                config.reproject_zones = true;
            }

            let pipeline = Pipeline::new(config)?;
            report(&pipeline.run_zonal_statistics()?);
        }
        Commands::Reproject {
            overrides,
            output_dir,
        } => {
            apply(&mut config, overrides)?;
            if let Some(dir) = output_dir {
                config.reprojected_dir = Some(dir);
            }

            let pipeline = Pipeline::new(config)?;
            report(&pipeline.reproject_folder()?);
        }
        Commands::Histogram { overrides, top } => {
            apply(&mut config, overrides)?;
            if let Some(n) = top {
                config.histogram.top_n = n;
            }

            let pipeline = Pipeline::new(config)?;
            let (reports, summary) = pipeline.histogram_folder()?;
            for r in &reports {
                let name = r.path.file_name().unwrap_or_default().to_string_lossy();
                match &r.peaks {
                    Some(peaks) => {
                        let text: Vec<String> = peaks
                            .iter()
                            .map(|p| format!("#{} {:.4} ({})", p.rank, p.value, p.count))
                            .collect();
                        println!("{:<40} {}", name, text.join("  "));
                    }
                    None => println!("{:<40} not enough valid data", name),
                }
            }
            report(&summary);
        }
        Commands::Stats { files } => {
            for path in &files {
                let name = path.file_name().unwrap_or_default().to_string_lossy();
                let raster = match RasterReader::read(path) {
                    Ok(raster) => raster,
                    Err(e) => {
                        log::error!("{}", e);
                        continue;
                    }
                };
                match HistogramAnalyzer::band_summary(&raster) {
                    Some(s) => println!(
                        "{:<25} -> Min: {:.4}, Max: {:.4}, Mean: {:.4}, Count: {}",
                        name, s.min, s.max, s.mean, s.count
                    ),
                    None => println!("{:<25} -> no valid pixels", name),
                }
            }
        }
    }

    Ok(())
}
