//! specview CLI - Command-line interface for spectral bin aggregation.
//!
//! Reads ERDAS LAN cubes or band file lists and reports value ranges and
//! per-label bin statistics.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use specview_algorithms::{
    AggregationConfig, AggregationEngine, DataRange, NormMode, NormRange, RebuildOutcome,
    ScanStrategy,
};
use specview_core::{
    BinSet, BinSetSummary, LabelMask, Representation, Roi, SharedContext, SpectralImage, Value,
    ViewportContext,
};
use specview_io::{read_label_mask, write_filelist, BandEncoding, FileList, LanReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    SpecviewIo(#[from] specview_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] specview_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rebuild was superseded (generation {built}, current {current})")]
    Stale { built: u64, current: u64 },

    #[error("rebuild predates label edits (epoch {built}, current {current})")]
    LabelsChanged { built: u64, current: u64 },
}

/// Range scan strategy selection.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Strategy {
    /// Single-threaded fold
    Sequential,
    /// Parallel tree reduction
    Parallel,
}

impl From<Strategy> for ScanStrategy {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Sequential => ScanStrategy::Sequential,
            Strategy::Parallel => ScanStrategy::Parallel,
        }
    }
}

/// Representation to bin.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum View {
    /// Raw image values
    Image,
    /// Spectral gradient
    Gradient,
}

/// Normalization range source.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Norm {
    /// Scan the data
    Observed,
    /// Range of the value domain
    Theoretical,
}

/// Band image sample width for `export`.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Depth {
    /// 8-bit PNG
    Gray8,
    /// 16-bit PNG
    Gray16,
}

/// Spectral bin aggregation for hyperspectral images.
#[derive(Parser)]
#[command(name = "specview")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Lower bound of the value domain raw samples are mapped to
    #[arg(long, global = true, default_value = "0.0")]
    minval: Value,

    /// Upper bound of the value domain raw samples are mapped to
    #[arg(long, global = true, default_value = "255.0")]
    maxval: Value,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a LAN file or band file list
    Info {
        /// Input LAN file or file list (.txt)
        input: PathBuf,
    },

    /// Compute the value range of an image
    Scan {
        /// Input LAN file or file list (.txt)
        input: PathBuf,

        /// Scan strategy
        #[arg(short, long, value_enum, default_value = "parallel")]
        strategy: Strategy,

        /// Region of interest as x,y,width,height
        #[arg(long, value_parser = parse_roi)]
        roi: Option<Roi>,
    },

    /// Aggregate pixels into per-label bin sets
    Bin {
        /// Input LAN file or file list (.txt)
        input: PathBuf,

        /// Bins per band
        #[arg(short, long, default_value = "64")]
        nbins: usize,

        /// Label mask (raw bytes, PNG or TIFF; one label per pixel)
        #[arg(short, long)]
        labels: Option<PathBuf>,

        /// Label names for labels 1.. (comma separated)
        #[arg(long, value_delimiter = ',')]
        label_names: Vec<String>,

        /// Representation to bin
        #[arg(short, long, value_enum, default_value = "image")]
        representation: View,

        /// Normalization range source
        #[arg(long, value_enum, default_value = "theoretical")]
        norm: Norm,

        /// Worker threads (default: all cores)
        #[arg(short = 'j', long)]
        threads: Option<usize>,

        /// Maximum number of bins per label
        #[arg(long)]
        bin_limit: Option<usize>,

        /// Derive the bin limit from this fraction of available memory
        #[arg(long)]
        memory_fraction: Option<f64>,

        /// Print a JSON report
        #[arg(long)]
        json: bool,
    },

    /// Write the bands of an image as PNG files plus a file list
    Export {
        /// Input LAN file or file list (.txt)
        input: PathBuf,

        /// Output base path; bands become <base>NN.png, the list <base>.txt
        #[arg(short, long)]
        output: PathBuf,

        /// Sample width of the written images
        #[arg(long, value_enum, default_value = "gray8")]
        depth: Depth,
    },

    /// Benchmark range scans and rebuilds
    Benchmark {
        /// Input LAN file or file list (.txt)
        input: PathBuf,

        /// Number of iterations
        #[arg(short, long, default_value = "3")]
        iterations: usize,

        /// Bins per band
        #[arg(short, long, default_value = "64")]
        nbins: usize,
    },
}

/// JSON report of the `bin` command.
#[derive(Serialize)]
struct BinReport {
    representation: String,
    nbins: usize,
    binsize: Value,
    range: DataRange,
    generation: u64,
    pixels: usize,
    dropped: usize,
    elapsed_ms: f64,
    sets: Vec<BinSetSummary>,
}

fn parse_roi(s: &str) -> std::result::Result<Roi, String> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<usize>().map_err(|e| format!("'{p}': {e}")))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    match parts[..] {
        [x, y, width, height] => Ok(Roi::new(x, y, width, height)),
        _ => Err(format!("expected x,y,width,height, got '{s}'")),
    }
}

fn is_filelist(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("txt"))
}

fn load_image(path: &Path, minval: Value, maxval: Value) -> Result<SpectralImage> {
    let image = if is_filelist(path) {
        FileList::open(path)?.load(minval, maxval)?
    } else {
        LanReader::open(path)?.read(minval, maxval)?
    };
    Ok(image)
}

fn time_ms<T>(f: impl FnOnce() -> T) -> (T, f64) {
    let start = Instant::now();
    let out = f();
    (out, start.elapsed().as_secs_f64() * 1000.0)
}

fn print_stats(name: &str, times: &[f64]) {
    let min_time = times.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let max_time = times.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    let mean_time = times.iter().sum::<f64>() / times.len().max(1) as f64;
    println!(
        "{:<22} | {:<15.3} | {:<15.3} | {:<15.3}",
        name, mean_time, min_time, max_time
    );
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let (minval, maxval) = (cli.minval, cli.maxval);

    match cli.command {
        Commands::Info { input } => {
            println!("File: {}", input.display());
            if is_filelist(&input) {
                let list = FileList::open(&input)?;
                println!("Bands: {}", list.len());
                for (file, desc) in list.files.iter().zip(&list.descs) {
                    match (desc.bounds(), desc.center_wavelength()) {
                        (Some((a, b)), _) => println!("  {} [{} - {} nm]", file.display(), a, b),
                        (None, Some(c)) => println!("  {} [{} nm]", file.display(), c),
                        (None, None) => println!("  {}", file.display()),
                    }
                }
            } else {
                let reader = LanReader::open(&input)?;
                let header = reader.header();
                let file_size = reader.file_size();
                println!(
                    "Size: {} bytes ({:.2} MB)",
                    file_size,
                    file_size as f64 / 1_000_000.0
                );
                println!("Bands: {}", header.bands);
                println!("Spatial size: {}x{}", header.cols, header.rows);
                println!("Sample depth: {} bit", header.depth.bytes() * 8);
            }
        }

        Commands::Scan {
            input,
            strategy,
            roi,
        } => {
            let image = load_image(&input, minval, maxval)?;
            let scanner = ScanStrategy::from(strategy).scanner();
            let (range, elapsed) = time_ms(|| scanner.scan(&image, roi));
            if range.is_empty() {
                println!("No finite samples in region");
            } else {
                println!("Range: [{}, {}]", range.min, range.max);
            }
            println!("Scanner: {} ({:.3} ms)", scanner.name(), elapsed);
        }

        Commands::Bin {
            input,
            nbins,
            labels,
            label_names,
            representation,
            norm,
            threads,
            bin_limit,
            memory_fraction,
            json,
        } => {
            let mut image = load_image(&input, minval, maxval)?;
            let representation = match representation {
                View::Image => Representation::Image,
                View::Gradient => {
                    image = image.spectral_gradient()?;
                    Representation::Gradient
                }
            };
            let mode = match norm {
                Norm::Observed => NormMode::Observed,
                Norm::Theoretical => NormMode::Theoretical,
            };
            let scanner = ScanStrategy::Parallel.scanner();
            let (range, image) = NormRange::new(representation, mode)
                .with_domain_max(maxval)
                .apply(image, scanner.as_ref())?;

            let mask = match &labels {
                Some(path) => read_label_mask(path, image.width(), image.height())?,
                None => LabelMask::unlabeled(image.width(), image.height()),
            };
            let mut names = label_names;
            let declared = usize::from(mask.max_label().unwrap_or(0));
            while names.len() < declared {
                names.push(format!("label{}", names.len() + 1));
            }

            let ctx = ViewportContext::for_image(&image, nbins)?
                .with_representation(representation)
                .with_labels(names);
            let mut config = AggregationConfig {
                bin_limit,
                memory_fraction,
                ..AggregationConfig::default()
            };
            if let Some(threads) = threads {
                config = config.with_parallelism(threads);
            }
            let engine = AggregationEngine::new(Arc::new(SharedContext::new(ctx)), config)?;

            if cli.verbose {
                eprintln!("Binning {} ({})", input.display(), representation);
                eprintln!("Bins per band: {}", nbins);
                eprintln!("Range: [{}, {}]", range.min, range.max);
            }

            let (outcome, elapsed_ms) = time_ms(|| engine.rebuild(&image, &mask));
            let (generation, stats) = match outcome? {
                RebuildOutcome::Published { generation, stats } => (generation, stats),
                RebuildOutcome::Stale { built, current } => {
                    return Err(CliError::Stale { built, current });
                }
                RebuildOutcome::LabelsChanged { built, current } => {
                    return Err(CliError::LabelsChanged { built, current });
                }
            };
            let published = engine.current();
            let sets: Vec<BinSetSummary> = published.sets().iter().map(BinSet::summary).collect();

            if json {
                let report = BinReport {
                    representation: representation.to_string(),
                    nbins,
                    binsize: published.context().binsize(),
                    range,
                    generation,
                    pixels: stats.pixels,
                    dropped: stats.dropped,
                    elapsed_ms,
                    sets,
                };
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Binned {} pixels in {:.2} ms ({} dropped)",
                    stats.pixels, elapsed_ms, stats.dropped
                );
                println!("{:<16} | {:<12} | {:<10}", "Label", "Weight", "Bins");
                println!("{:-<44}", "");
                for set in &sets {
                    println!(
                        "{:<16} | {:<12} | {:<10}",
                        set.name, set.total_weight, set.bins
                    );
                }
            }
        }

        Commands::Export {
            input,
            output,
            depth,
        } => {
            let image = load_image(&input, minval, maxval)?;
            let encoding = match depth {
                Depth::Gray8 => BandEncoding::Gray8,
                Depth::Gray16 => BandEncoding::Gray16,
            };
            let list = write_filelist(&image, &output, encoding)?;
            println!("Wrote {} bands, list: {}", image.band_count(), list.display());
        }

        Commands::Benchmark {
            input,
            iterations,
            nbins,
        } => {
            let image = load_image(&input, minval, maxval)?;
            let mask = LabelMask::unlabeled(image.width(), image.height());
            println!(
                "Benchmarking with {}x{}x{} samples, {} iterations",
                image.width(),
                image.height(),
                image.band_count(),
                iterations
            );
            println!(
                "{:<22} | {:<15} | {:<15} | {:<15}",
                "Stage", "Mean Time (ms)", "Min Time (ms)", "Max Time (ms)"
            );
            println!("{:-<77}", "");

            for strategy in [ScanStrategy::Sequential, ScanStrategy::Parallel] {
                let scanner = strategy.scanner();
                // warmup
                let _ = scanner.scan(&image, None);
                let times: Vec<f64> = (0..iterations)
                    .map(|_| time_ms(|| scanner.scan(&image, None)).1)
                    .collect();
                print_stats(&format!("scan ({})", strategy), &times);
            }

            for parallel in [false, true] {
                let ctx = ViewportContext::for_image(&image, nbins)?;
                let context = Arc::new(SharedContext::new(ctx));
                let engine = AggregationEngine::new(
                    Arc::clone(&context),
                    AggregationConfig::default().with_parallel(parallel),
                )?;
                let mut times = Vec::with_capacity(iterations);
                for _ in 0..iterations {
                    context.invalidate();
                    let (outcome, elapsed) = time_ms(|| engine.rebuild(&image, &mask));
                    outcome?;
                    times.push(elapsed);
                }
                let name = if parallel {
                    "rebuild (parallel)"
                } else {
                    "rebuild (sequential)"
                };
                print_stats(name, &times);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roi() {
        assert_eq!(parse_roi("1, 2,30,40").unwrap(), Roi::new(1, 2, 30, 40));
        assert!(parse_roi("1,2,3").is_err());
        assert!(parse_roi("a,b,c,d").is_err());
    }

    #[test]
    fn test_filelist_detection() {
        assert!(is_filelist(Path::new("cube.TXT")));
        assert!(!is_filelist(Path::new("cube.lan")));
    }

    #[test]
    fn test_cli_parses_bin() {
        let cli = Cli::try_parse_from([
            "specview",
            "bin",
            "cube.lan",
            "--nbins",
            "32",
            "--label-names",
            "leaf,bark",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Bin {
                nbins,
                label_names,
                json,
                ..
            } => {
                assert_eq!(nbins, 32);
                assert_eq!(label_names, ["leaf", "bark"]);
                assert!(json);
            }
            _ => panic!("expected bin command"),
        }
    }
}
