use crate::consts::{
    DEFAULT_FALSE_POSITIVE_RATE, DEFAULT_NUM_HASH_FUNCTIONS, DEFAULT_T_MAX, MAX_KMER_SIZE,
    MAX_NUM_HASH_FUNCTIONS,
};
use crate::errors::{HibfError, Result};
use crate::utils::next_multiple_of_64;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Parameters of the layout phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Requested number of technical bins per level (ceiling when searching).
    pub t_max: usize,
    pub num_hash_functions: usize,
    pub false_positive_rate: f64,
    /// Run the bin-count search instead of a single binning at `t_max`.
    pub determine_best_t_max: bool,
    /// Evaluate every candidate instead of stopping at the first non-improvement.
    pub force_all_binnings: bool,
    pub output_verbose_statistics: bool,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            t_max: DEFAULT_T_MAX,
            num_hash_functions: DEFAULT_NUM_HASH_FUNCTIONS,
            false_positive_rate: DEFAULT_FALSE_POSITIVE_RATE,
            determine_best_t_max: false,
            force_all_binnings: false,
            output_verbose_statistics: false,
        }
    }
}

impl LayoutConfig {
    pub fn validate(&self) -> Result<()> {
        if self.t_max == 0 {
            return Err(HibfError::Config("t_max must be greater than 0".into()));
        }
        if self.num_hash_functions == 0 || self.num_hash_functions > MAX_NUM_HASH_FUNCTIONS {
            return Err(HibfError::Config(format!(
                "number of hash functions must be in 1..={MAX_NUM_HASH_FUNCTIONS}, got {}",
                self.num_hash_functions
            )));
        }
        if !(self.false_positive_rate > 0.0 && self.false_positive_rate < 1.0) {
            return Err(HibfError::Config(format!(
                "false positive rate must be in (0, 1), got {}",
                self.false_positive_rate
            )));
        }
        if self.force_all_binnings && !self.determine_best_t_max {
            return Err(HibfError::Config(
                "force_all_binnings requires determine_best_t_max".into(),
            ));
        }
        Ok(())
    }

    /// Raise `t_max` to the next multiple of 64. A level occupies whole words
    /// per bit position, so anything less would be allocated anyway.
    pub fn normalize_t_max(&mut self) -> usize {
        let rounded = next_multiple_of_64(self.t_max);
        if rounded != self.t_max {
            warn!(
                requested = self.t_max,
                effective = rounded,
                "requested number of technical bins is not a multiple of 64; increasing it"
            );
            self.t_max = rounded;
        }
        self.t_max
    }
}

/// Parameters of the build phase. FP parameters come from the layout header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    pub kmer_size: u8,
    /// Prefix prepended to every artifact name, e.g. `out/run1_`.
    pub output_prefix: PathBuf,
}

impl BuildConfig {
    pub fn validate(&self) -> Result<()> {
        if self.kmer_size == 0 || self.kmer_size > MAX_KMER_SIZE {
            return Err(HibfError::Config(format!(
                "kmer size must be in 1..={MAX_KMER_SIZE}, got {}",
                self.kmer_size
            )));
        }
        if self.output_prefix.as_os_str().is_empty() {
            return Err(HibfError::Config("output prefix must not be empty".into()));
        }
        Ok(())
    }

    pub fn artifact_path(&self, name: &str) -> PathBuf { prefixed_path(&self.output_prefix, name) }
}

/// `<prefix><name>`; the prefix is a string prefix, not a directory.
pub fn prefixed_path(prefix: &Path, name: &str) -> PathBuf {
    let mut s = prefix.as_os_str().to_os_string();
    s.push(name);
    PathBuf::from(s)
}
