//! Cost model over a finished layout.
//!
//! For a level `L` of width `t` the local cost is
//!
//! ```text
//! local(L) = t / 64 + Σ_merged m · ε(m) + Σ_split ε(s)
//! ```
//!
//! where `ε(s) = 1 - (1 - p)^s`: probing a level costs one unit per 64
//! technical bins, a merged slot with `m` occupants reports all of them on a
//! hit, and a bin split over `s` slots is answered by `s` filters. A query
//! reaches the root with probability 1 and descends into the child behind a
//! recursed slot `r` with probability `min(1, share(r) + p)`, where `share(r)`
//! is the fraction of the level's k-mers stored below `r`. The expected
//! query cost is the sum of `reach(L) · local(L)` over all levels.
//!
//! Memory is `Σ t · bits_per_slot`, each level sized for its largest
//! corrected slot load.

use crate::filter::bin_size_in_bits;
use crate::fp_correction::FpCorrection;
use crate::layout::{Layout, Slot};
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq)]
pub struct LevelStats {
    pub level: usize,
    pub depth: usize,
    pub t_max: usize,
    pub bits_per_slot: usize,
    pub occupied: usize,
    pub singles: usize,
    pub split_bins: usize,
    pub merged_groups: usize,
    pub merged_bins: usize,
    pub recursed: usize,
    pub max_load: u64,
    pub local_cost: f64,
    /// Probability that a query probes this level.
    pub reach: f64,
}

impl LevelStats {
    pub fn memory_bits(&self) -> u64 { (self.t_max as u64) * (self.bits_per_slot as u64) }
    pub fn weighted_cost(&self) -> f64 { self.reach * self.local_cost }
}

/// First phase: per-level counters. Aggregates are only available after
/// [`StatsAccumulator::finalize`].
pub struct StatsAccumulator<'a> {
    layout: &'a Layout,
    fp: &'a FpCorrection,
    levels: Vec<LevelStats>,
}

impl<'a> StatsAccumulator<'a> {
    pub fn new(layout: &'a Layout, fp: &'a FpCorrection) -> Self {
        Self { layout, fp, levels: Vec::with_capacity(layout.levels.len()) }
    }

    /// Collect local counters of every level, root first.
    pub fn accumulate(mut self) -> Self {
        let p = self.fp.false_positive_rate();
        let k = self.fp.num_hash_functions();
        let layout = self.layout;
        for lvl in &layout.levels {
            let mut st = LevelStats {
                level: lvl.id,
                depth: 0,
                t_max: lvl.t_max,
                bits_per_slot: 0,
                occupied: lvl.occupied(),
                singles: 0,
                split_bins: 0,
                merged_groups: 0,
                merged_bins: 0,
                recursed: 0,
                max_load: layout.max_effective_load(lvl.id, self.fp),
                local_cost: lvl.t_max as f64 / 64.0,
                reach: 0.0,
            };
            for slot in &lvl.slots {
                match slot {
                    Slot::Empty => {}
                    Slot::Single { .. } => st.singles += 1,
                    Slot::Split { part, of, .. } => {
                        if *part == 0 {
                            st.split_bins += 1;
                            st.local_cost += self.fp.effective_rate(*of);
                        }
                    }
                    Slot::Merged { members, .. } => {
                        st.merged_groups += 1;
                        st.merged_bins += members.len();
                        st.local_cost += members.len() as f64 * self.fp.effective_rate(members.len());
                    }
                    Slot::Recursed { .. } => st.recursed += 1,
                }
            }
            st.bits_per_slot = bin_size_in_bits(st.max_load, p, k);
            self.levels.push(st);
        }
        self
    }

    /// Second phase: propagate reach probabilities and sum the aggregates.
    pub fn finalize(mut self) -> HibfStatistics {
        let p = self.fp.false_positive_rate();
        let layout = self.layout;
        let subtree: Vec<u64> = subtree_counts(layout);
        if let Some(root) = self.levels.first_mut() {
            root.reach = 1.0;
        }
        // parents precede children in id order
        for lvl in &layout.levels {
            let parent_reach = self.levels[lvl.id].reach;
            let parent_depth = self.levels[lvl.id].depth;
            let total = subtree[lvl.id];
            for slot in &lvl.slots {
                if let Slot::Recursed { child } = slot {
                    let share = if total == 0 { 0.0 } else { subtree[*child] as f64 / total as f64 };
                    self.levels[*child].reach = parent_reach * (share + p).min(1.0);
                    self.levels[*child].depth = parent_depth + 1;
                }
            }
        }
        let expected_query_cost = self.levels.iter().map(LevelStats::weighted_cost).sum();
        let memory_bits = self.levels.iter().map(LevelStats::memory_bits).sum();
        HibfStatistics {
            t_max: layout.t_max,
            num_user_bins: layout.user_bins.len(),
            expected_query_cost,
            memory_bits,
            levels: self.levels,
        }
    }
}

fn subtree_counts(layout: &Layout) -> Vec<u64> {
    let mut sub = vec![0u64; layout.levels.len()];
    for lvl in layout.levels.iter().rev() {
        let total: u64 = lvl
            .slots
            .iter()
            .map(|s| match s {
                Slot::Recursed { child } => sub[*child],
                other => layout.raw_load(other),
            })
            .sum();
        sub[lvl.id] = total;
    }
    sub
}

/// Finalized statistics of one layout.
#[derive(Debug, Clone, PartialEq)]
pub struct HibfStatistics {
    pub t_max: usize,
    pub num_user_bins: usize,
    pub expected_query_cost: f64,
    pub memory_bits: u64,
    pub levels: Vec<LevelStats>,
}

impl HibfStatistics {
    pub fn evaluate(layout: &Layout, fp: &FpCorrection) -> Self {
        StatsAccumulator::new(layout, fp).accumulate().finalize()
    }

    pub fn memory_mib(&self) -> f64 { self.memory_bits as f64 / 8.0 / 1024.0 / 1024.0 }

    pub fn header_line(verbose: bool) -> String {
        let mut s = String::from(
            "#T_Max\tLevels\tExpected_Query_Cost\tMemory_Bits\tMemory_MiB\tSplit_Bins\tMerged_Bins\tRecursed_Slots",
        );
        if verbose {
            s.push_str("\tLevel_Breakdown");
        }
        s
    }

    /// One tab-separated summary row, plus the per-level breakdown when `verbose`.
    pub fn summary_row(&self, verbose: bool) -> String {
        let split: usize = self.levels.iter().map(|l| l.split_bins).sum();
        let merged: usize = self.levels.iter().map(|l| l.merged_bins).sum();
        let recursed: usize = self.levels.iter().map(|l| l.recursed).sum();
        let mut s = format!(
            "{}\t{}\t{:.6}\t{}\t{:.3}\t{}\t{}\t{}",
            self.t_max,
            self.levels.len(),
            self.expected_query_cost,
            self.memory_bits,
            self.memory_mib(),
            split,
            merged,
            recursed
        );
        if verbose {
            let parts: Vec<String> = self
                .levels
                .iter()
                .map(|l| {
                    format!(
                        "L{}[d={},t={},bits={},occ={},reach={:.4},cost={:.4}]",
                        l.level, l.depth, l.t_max, l.bits_per_slot, l.occupied, l.reach, l.local_cost
                    )
                })
                .collect();
            let _ = write!(s, "\t{}", parts.join(","));
        }
        s
    }
}
