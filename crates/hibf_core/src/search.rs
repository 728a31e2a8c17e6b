//! Choosing the number of technical bins.
//!
//! Candidates are every power of two from 64 up to the ceiling plus the
//! multiple of 64 nearest above `sqrt(#user bins)`, visited in ascending
//! order. A candidate replaces the best so far only if its expected query
//! cost is strictly lower. Without `force_all_binnings` the search stops at
//! the first candidate that does not improve.

use crate::binning::HierarchicalBinning;
use crate::config::LayoutConfig;
use crate::errors::{HibfError, Result};
use crate::fp_correction::FpCorrection;
use crate::layout::Layout;
use crate::stats::HibfStatistics;
use crate::user_bin::UserBin;
use crate::utils::next_multiple_of_64;
use rayon::prelude::*;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Everything one candidate produced. Candidates never share buffers.
#[derive(Debug, Clone)]
pub struct CandidateOutcome {
    pub t_max: usize,
    pub layout: Layout,
    pub stats: HibfStatistics,
    pub summary_row: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSummary {
    pub t_max: usize,
    pub expected_query_cost: f64,
    pub memory_bits: u64,
    pub summary_row: String,
}

impl From<&CandidateOutcome> for CandidateSummary {
    fn from(c: &CandidateOutcome) -> Self {
        Self {
            t_max: c.t_max,
            expected_query_cost: c.stats.expected_query_cost,
            memory_bits: c.stats.memory_bits,
            summary_row: c.summary_row.clone(),
        }
    }
}

/// Result of the layout phase: the chosen candidate and, when a search ran,
/// the summaries of every candidate visited.
#[derive(Debug, Clone)]
pub struct LayoutRun {
    pub chosen: CandidateOutcome,
    pub candidates: Vec<CandidateSummary>,
    pub searched: bool,
}

impl LayoutRun {
    /// Text of the `.stats` file: parameter echo, one row per candidate and
    /// the chosen t_max.
    pub fn stats_report(&self, config: &LayoutConfig) -> String {
        let mut out = String::new();
        out.push_str("## ### Parameters ###\n");
        out.push_str(&format!("## number of user bins = {}\n", self.chosen.layout.user_bins.len()));
        out.push_str(&format!("## number of hash functions = {}\n", config.num_hash_functions));
        out.push_str(&format!("## false positive rate = {}\n", config.false_positive_rate));
        out.push_str(&HibfStatistics::header_line(config.output_verbose_statistics));
        out.push('\n');
        for c in &self.candidates {
            out.push_str(&c.summary_row);
            out.push('\n');
        }
        out.push_str(&format!(
            "# Best t_max (regarding expected query runtime): {}\n",
            self.chosen.t_max
        ));
        out
    }
}

/// Powers of two in `64..=ceiling` plus the sqrt heuristic, ascending.
pub fn candidate_t_maxes(num_user_bins: usize, t_max_ceiling: usize) -> Vec<usize> {
    let mut set = BTreeSet::new();
    let mut t = 64usize;
    while t <= t_max_ceiling {
        set.insert(t);
        t *= 2;
    }
    let sqrt = (num_user_bins as f64).sqrt().ceil() as usize;
    set.insert(next_multiple_of_64(sqrt).max(64));
    set.into_iter().collect()
}

/// Bin and evaluate one candidate width.
pub fn evaluate_candidate(
    user_bins: &[UserBin],
    t_max: usize,
    fp: &FpCorrection,
    verbose: bool,
) -> Result<CandidateOutcome> {
    let layout = HierarchicalBinning::new(user_bins, t_max, fp)?.execute();
    let stats = HibfStatistics::evaluate(&layout, fp);
    let summary_row = stats.summary_row(verbose);
    debug!(t_max, cost = stats.expected_query_cost, memory_bits = stats.memory_bits, "candidate evaluated");
    Ok(CandidateOutcome { t_max, layout, stats, summary_row })
}

/// Run the bin-count search up to `config.t_max` (already a multiple of 64).
pub fn search(user_bins: &[UserBin], config: &LayoutConfig) -> Result<LayoutRun> {
    let candidates = candidate_t_maxes(user_bins.len(), config.t_max);
    let widest = candidates.iter().copied().max().unwrap_or(config.t_max);
    let fp = FpCorrection::build(config.false_positive_rate, config.num_hash_functions, widest)?;
    let verbose = config.output_verbose_statistics;
    info!(candidates = ?candidates, "searching number of technical bins");

    let run = if config.force_all_binnings {
        let all: Vec<Result<CandidateOutcome>> = candidates
            .par_iter()
            .map(|&t| evaluate_candidate(user_bins, t, &fp, verbose))
            .collect();
        reduce(all.into_iter(), true)?
    } else {
        let lazy = candidates.iter().map(|&t| evaluate_candidate(user_bins, t, &fp, verbose));
        reduce(lazy, false)?
    };
    info!(best_t_max = run.chosen.t_max, cost = run.chosen.stats.expected_query_cost, "best t_max chosen");
    Ok(run)
}

/// Fold candidates in ascending order. Ties keep the earlier candidate.
fn reduce<I>(outcomes: I, force_all: bool) -> Result<LayoutRun>
where
    I: Iterator<Item = Result<CandidateOutcome>>,
{
    let mut best: Option<CandidateOutcome> = None;
    let mut visited = Vec::new();
    for outcome in outcomes {
        let outcome = outcome?;
        info!(row = %outcome.summary_row, "candidate");
        visited.push(CandidateSummary::from(&outcome));
        let improves = best
            .as_ref()
            .map_or(true, |b| outcome.stats.expected_query_cost < b.stats.expected_query_cost);
        if improves {
            best = Some(outcome);
        } else if !force_all {
            break;
        }
    }
    match best {
        Some(chosen) => Ok(LayoutRun { chosen, candidates: visited, searched: true }),
        None => Err(HibfError::Config("no candidate t_max to evaluate".into())),
    }
}

/// The whole layout phase: validate, round t_max, then either one binning
/// at `t_max` or the search.
pub fn compute_layout(user_bins: &[UserBin], config: &LayoutConfig) -> Result<(LayoutRun, LayoutConfig)> {
    config.validate()?;
    let mut config = config.clone();
    config.normalize_t_max();

    if config.determine_best_t_max {
        let run = search(user_bins, &config)?;
        config.t_max = run.chosen.t_max;
        return Ok((run, config));
    }

    let fp = FpCorrection::build(config.false_positive_rate, config.num_hash_functions, config.t_max)?;
    let chosen = evaluate_candidate(user_bins, config.t_max, &fp, config.output_verbose_statistics)?;
    info!(t_max = config.t_max, cost = chosen.stats.expected_query_cost, "layout computed");
    Ok((LayoutRun { chosen, candidates: Vec::new(), searched: false }, config))
}
