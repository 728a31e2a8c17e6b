//! False-positive correction for technical bins shared by several user bins
//! (merged) or several technical bins holding one user bin (split).
//!
//! A query that has to consult `s` technical bins for one answer sees the
//! union of their false positives: `1 - (1 - p)^s`. To keep the answer at the
//! target rate `p`, each of those bins must be sized for
//! `p_s = 1 - (1 - p)^(1/s)`. With `k` hash functions a Bloom filter holding
//! `n` elements at rate `q` needs `-k n / ln(1 - q^(1/k))` bits, so the size
//! multiplier relative to an unshared bin is
//!
//! ```text
//! factor(s) = ln(1 - p^(1/k)) / ln(1 - p_s^(1/k))
//! ```
//!
//! `factor(1) == 1` and the factor is non-decreasing in `s`.

use crate::errors::{HibfError, Result};

#[derive(Debug, Clone)]
pub struct FpCorrection {
    false_positive_rate: f64,
    num_hash_functions: usize,
    /// `factors[s]` for `s` in `1..=t_max`; index 0 unused.
    factors: Vec<f64>,
}

impl FpCorrection {
    pub fn build(false_positive_rate: f64, num_hash_functions: usize, t_max: usize) -> Result<Self> {
        if t_max == 0 {
            return Err(HibfError::Numeric("fp correction needs t_max > 0".into()));
        }
        if !(false_positive_rate > 0.0 && false_positive_rate < 1.0) {
            return Err(HibfError::Numeric(format!(
                "fp correction needs a rate in (0, 1), got {false_positive_rate}"
            )));
        }
        if num_hash_functions == 0 {
            return Err(HibfError::Numeric("fp correction needs at least one hash function".into()));
        }

        let mut factors = Vec::with_capacity(t_max + 1);
        factors.push(1.0);
        factors.push(1.0);
        let mut prev = 1.0f64;
        for s in 2..=t_max {
            let f = correction_factor(false_positive_rate, num_hash_functions, s).max(prev);
            factors.push(f);
            prev = f;
        }
        Ok(Self { false_positive_rate, num_hash_functions, factors })
    }

    pub fn false_positive_rate(&self) -> f64 { self.false_positive_rate }
    pub fn num_hash_functions(&self) -> usize { self.num_hash_functions }

    /// Largest sharer count covered by the precomputed table.
    pub fn t_max(&self) -> usize { self.factors.len() - 1 }

    /// Size multiplier for `sharers` technical bins answering together.
    /// Counts beyond the table are computed on demand.
    pub fn factor(&self, sharers: usize) -> f64 {
        match sharers {
            0 | 1 => 1.0,
            s if s < self.factors.len() => self.factors[s],
            s => correction_factor(self.false_positive_rate, self.num_hash_functions, s)
                .max(self.factors[self.factors.len() - 1]),
        }
    }

    /// Largest sharer count in `1..=bound` whose factor stays at or below `limit`.
    pub fn max_sharers(&self, bound: usize, limit: f64) -> usize {
        (2..=bound).take_while(|&s| self.factor(s) <= limit).last().unwrap_or(1)
    }

    /// Per-bin rate that keeps `sharers` bins at the target rate together.
    pub fn per_bin_rate(&self, sharers: usize) -> f64 {
        let s = sharers.max(1) as f64;
        -((-self.false_positive_rate).ln_1p() / s).exp_m1()
    }

    /// Rate observed over `sharers` bins each sized for the target rate.
    pub fn effective_rate(&self, sharers: usize) -> f64 {
        let s = sharers.max(1) as f64;
        -(s * (-self.false_positive_rate).ln_1p()).exp_m1()
    }

    /// `count` scaled by `factor(sharers)`, rounded up.
    pub fn corrected(&self, count: u64, sharers: usize) -> u64 {
        if sharers <= 1 {
            return count;
        }
        (count as f64 * self.factor(sharers)).ceil() as u64
    }
}

fn correction_factor(fpr: f64, hashes: usize, sharers: usize) -> f64 {
    let k = hashes as f64;
    let per_bin = -((-fpr).ln_1p() / sharers as f64).exp_m1();
    let denominator = (-(per_bin.ln() / k).exp()).ln_1p();
    let numerator = (-(fpr.ln() / k).exp()).ln_1p();
    numerator / denominator
}
