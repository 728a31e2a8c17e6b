use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};

use hibf_core::{
    archive::{read_filters, read_mapping},
    builder::{self, write_outputs},
    compute_layout,
    config::prefixed_path,
    consts::{FILTERS_FILE, MANIFEST_FILE, MAPPING_FILE},
    layout_file,
    user_bin::read_counts,
    utils::write_atomic,
    BuildConfig, BuildManifest, HibfStatistics, LayoutConfig, LayoutParams, SequenceFileKeys,
};

#[derive(Parser)]
#[command(name = "hibf", about = "Hierarchical interleaved Bloom filter layout and build")]
struct Cli {
    /// Log progress at debug level (default: warnings only)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Compute a layout from per-user-bin k-mer counts
    Layout {
        /// `<name>\t<kmer_count>` per line
        #[arg(long)]
        counts: PathBuf,
        #[arg(long, default_value = "binning.out")]
        output: PathBuf,
        /// Technical bins per level; the upper bound when searching
        #[arg(long = "tmax", default_value_t = 64)]
        t_max: usize,
        #[arg(long, default_value_t = 0.05)]
        false_positive_rate: f64,
        #[arg(long, default_value_t = 2)]
        num_hash_functions: usize,
        /// Try several t_max up to --tmax and keep the cheapest
        #[arg(long, default_value_t = false)]
        determine_best_tmax: bool,
        /// Evaluate every candidate instead of stopping at the first non-improvement
        #[arg(long, default_value_t = false, requires = "determine_best_tmax")]
        force_all_binnings: bool,
        #[arg(long, default_value_t = false)]
        output_verbose_statistics: bool,
    },

    /// Build the filters described by a layout file
    Build {
        #[arg(long)]
        layout: PathBuf,
        #[arg(long, default_value_t = 20)]
        kmer_size: u8,
        /// Prepended to every output file name; may end in a directory separator
        #[arg(long)]
        out_prefix: PathBuf,
        /// Overlap between split regions of one sequence. Accepted but unused:
        /// split bins spread whole k-mer sets by hash, not sequence regions
        #[arg(short = 'l', long, default_value_t = 0)]
        overlap: u64,
    },

    /// Verify and describe a finished build
    Info {
        #[arg(long)]
        prefix: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn stats_path(layout: &Path) -> PathBuf {
    let mut s: OsString = layout.as_os_str().to_os_string();
    s.push(".stats");
    PathBuf::from(s)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.cmd {
        Cmd::Layout {
            counts,
            output,
            t_max,
            false_positive_rate,
            num_hash_functions,
            determine_best_tmax,
            force_all_binnings,
            output_verbose_statistics,
        } => {
            let bins = read_counts(&counts).with_context(|| format!("reading counts {}", counts.display()))?;
            info!(user_bins = bins.len(), "counts read");
            let requested = LayoutConfig {
                t_max,
                num_hash_functions,
                false_positive_rate,
                determine_best_t_max: determine_best_tmax,
                force_all_binnings,
                output_verbose_statistics,
            };
            let (run, config) = compute_layout(&bins, &requested)?;
            let params = LayoutParams::from(&config);
            layout_file::write_to_path(&output, &run.chosen.layout, &params, &run.candidates)
                .with_context(|| format!("writing layout {}", output.display()))?;

            if run.searched {
                let path = stats_path(&output);
                write_atomic(&path, run.stats_report(&config).as_bytes())
                    .with_context(|| format!("writing stats {}", path.display()))?;
                println!("stats: {}", path.display());
            } else if config.output_verbose_statistics {
                println!("{}", HibfStatistics::header_line(true));
                println!("{}", run.chosen.summary_row);
            }
            let stats = &run.chosen.stats;
            println!(
                "layout: {} user bins, t_max={}, levels={}, expected cost={:.4}, memory={:.3} MiB -> {}",
                stats.num_user_bins,
                config.t_max,
                stats.levels.len(),
                stats.expected_query_cost,
                stats.memory_mib(),
                output.display()
            );
        }

        Cmd::Build { layout, kmer_size, out_prefix, overlap } => {
            if overlap > 0 {
                warn!(overlap, "--overlap has no effect, split bins are filled by k-mer hash");
            }
            let config = BuildConfig { kmer_size, output_prefix: out_prefix };
            config.validate()?;
            let (params, layout_data) = layout_file::read_from_path(&layout)
                .with_context(|| format!("reading layout {}", layout.display()))?;
            let source = SequenceFileKeys::new(kmer_size)?;
            let index = builder::build(&layout_data, params, &source)?;
            let manifest = write_outputs(&index, &config)?;
            println!(
                "build: levels={}, user_bins={}, bits={} -> {}",
                manifest.levels.len(),
                manifest.num_user_bins,
                index.bit_count(),
                config.artifact_path(MANIFEST_FILE).display()
            );
        }

        Cmd::Info { prefix } => {
            let manifest_path = prefixed_path(&prefix, MANIFEST_FILE);
            if !manifest_path.exists() {
                bail!("no finished build at {} (missing {MANIFEST_FILE})", prefix.display());
            }
            let manifest = BuildManifest::load(&manifest_path)?;
            manifest.verify(&prefix).context("checksum verification")?;
            let filters = read_filters(&prefixed_path(&prefix, FILTERS_FILE))?;
            let mapping = read_mapping(&prefixed_path(&prefix, MAPPING_FILE))?;
            if filters.len() != manifest.levels.len() || mapping.len() != manifest.num_user_bins {
                bail!("archives do not match the manifest");
            }

            println!(
                "kmer_size={} hash_functions={} fpr={} t_max={}",
                manifest.kmer_size, manifest.num_hash_functions, manifest.false_positive_rate, manifest.t_max
            );
            for (level, f) in filters.iter().enumerate() {
                println!("level {level}: bins={} bin_size={} bits={}", f.bins(), f.bin_size(), f.bit_count());
            }
            println!("user bins: {}", mapping.len());
            println!("checksums: ok");
        }
    }
    Ok(())
}
