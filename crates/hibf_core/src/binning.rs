//! Hierarchical binning: distribute user bins over the technical bins of a
//! level, recursing into child levels for groups too large to share a slot.
//!
//! Bins are visited by descending k-mer count (ties keep input order). The
//! per-slot budget is the unplaced k-mer total divided by the free slots,
//! recomputed after every placement:
//!
//! * a bin above budget is split over `ceil(count / budget)` consecutive
//!   slots, leaving room for the bins still to come;
//! * while there are more bins left than slots, consecutive bins are grouped
//!   into one slot. A group takes at least its fair share of the remaining
//!   bins and keeps growing while its corrected load stays within budget or
//!   below the largest load already on the level;
//! * a group of at most `merge_ceiling` bins is merged into the slot. A larger
//!   group becomes a child level of its own. The ceiling is the largest
//!   sharer count whose correction factor stays within [`MERGE_FACTOR_LIMIT`];
//! * once a single slot remains, every bin left forms the last group.
//!
//! The engine is a pure function of its inputs.

use crate::consts::MERGE_FACTOR_LIMIT;
use crate::errors::{HibfError, Result};
use crate::fp_correction::FpCorrection;
use crate::layout::{IndexLevel, Layout, ParentSlot, Placement, Role, Slot};
use crate::user_bin::UserBin;
use crate::utils::next_multiple_of_64;
use std::cmp::Reverse;
use tracing::debug;

pub struct HierarchicalBinning<'a> {
    user_bins: &'a [UserBin],
    t_max: usize,
    fp: &'a FpCorrection,
    merge_ceiling: usize,
}

enum Pending {
    Single(usize),
    Split { user_bin: usize, of: usize },
    Merged(Vec<usize>),
    Recurse(Vec<usize>),
}

struct Arena {
    levels: Vec<IndexLevel>,
    placements: Vec<Option<Placement>>,
    next_group: usize,
}

impl<'a> HierarchicalBinning<'a> {
    pub fn new(user_bins: &'a [UserBin], t_max: usize, fp: &'a FpCorrection) -> Result<Self> {
        if t_max == 0 || t_max % 64 != 0 {
            return Err(HibfError::Config(format!(
                "t_max must be a positive multiple of 64, got {t_max}"
            )));
        }
        let merge_ceiling = fp.max_sharers(t_max, MERGE_FACTOR_LIMIT);
        debug!(t_max, merge_ceiling, "binning engine ready");
        Ok(Self { user_bins, t_max, fp, merge_ceiling })
    }

    pub fn execute(&self) -> Layout {
        let n = self.user_bins.len();
        let mut arena = Arena { levels: Vec::new(), placements: vec![None; n], next_group: 0 };
        if n > 0 {
            let mut order: Vec<usize> = (0..n).collect();
            order.sort_by_key(|&i| Reverse(self.user_bins[i].kmer_count));
            self.layout_level(&order, self.t_max, None, &mut arena);
        }
        let placements: Vec<Placement> = arena.placements.into_iter().flatten().collect();
        debug_assert_eq!(placements.len(), n, "every user bin is placed");
        Layout {
            t_max: self.t_max,
            user_bins: self.user_bins.to_vec(),
            levels: arena.levels,
            placements,
        }
    }

    fn count(&self, user_bin: usize) -> u64 { self.user_bins[user_bin].kmer_count }

    /// Most user bins one merged slot may hold.
    pub fn merge_ceiling(&self) -> usize { self.merge_ceiling }

    /// Lay out `members` (sorted) on a fresh level of width `t`; returns its id.
    fn layout_level(&self, members: &[usize], t: usize, parent: Option<ParentSlot>, arena: &mut Arena) -> usize {
        let id = arena.levels.len();
        arena.levels.push(IndexLevel::new(id, t, parent));
        let pending = self.sweep(members, t);

        let mut slots = vec![Slot::Empty; t];
        let mut cursor = 0usize;
        for p in pending {
            match p {
                Pending::Single(user_bin) => {
                    slots[cursor] = Slot::Single { user_bin };
                    arena.placements[user_bin] =
                        Some(Placement { level: id, slot: cursor, span: 1, role: Role::Single });
                    cursor += 1;
                }
                Pending::Split { user_bin, of } => {
                    for part in 0..of {
                        slots[cursor + part] = Slot::Split { user_bin, part, of };
                    }
                    arena.placements[user_bin] =
                        Some(Placement { level: id, slot: cursor, span: of, role: Role::Split });
                    cursor += of;
                }
                Pending::Merged(mut group_members) => {
                    group_members.sort_unstable();
                    let group = arena.next_group;
                    arena.next_group += 1;
                    for &m in &group_members {
                        arena.placements[m] = Some(Placement {
                            level: id,
                            slot: cursor,
                            span: 1,
                            role: Role::Merged { group },
                        });
                    }
                    slots[cursor] = Slot::Merged { group, members: group_members };
                    cursor += 1;
                }
                Pending::Recurse(group_members) => {
                    let child_t = t.min(next_multiple_of_64(group_members.len()));
                    let at = ParentSlot { level: id, slot: cursor };
                    let child = self.layout_level(&group_members, child_t, Some(at), arena);
                    debug!(level = id, slot = cursor, child, members = group_members.len(), "recursing");
                    slots[cursor] = Slot::Recursed { child };
                    cursor += 1;
                }
            }
        }
        arena.levels[id].slots = slots;
        id
    }

    /// Greedy sweep over one level. Produces slot assignments in slot order.
    fn sweep(&self, members: &[usize], t: usize) -> Vec<Pending> {
        let n = members.len();
        let mut remaining: u64 = members.iter().map(|&b| self.count(b)).sum();
        let mut used = 0usize;
        let mut max_load = 0u64;
        let mut out = Vec::new();
        let mut i = 0usize;

        while i < n {
            let slots_left = t - used;
            let rest = n - i;

            if slots_left == 1 && rest > 1 {
                let group = members[i..].to_vec();
                if group.len() <= self.merge_ceiling {
                    out.push(Pending::Merged(group));
                } else {
                    out.push(Pending::Recurse(group));
                }
                break;
            }

            let bin = members[i];
            let c = self.count(bin);
            let rest_after = rest - 1;

            if rest <= slots_left || exceeds_budget(c, slots_left, remaining) {
                let upper = if rest <= slots_left {
                    slots_left - rest_after
                } else {
                    let reserve = proportional(remaining - c, slots_left, remaining).max(1);
                    slots_left - reserve.min(slots_left - 1)
                };
                let of = proportional(c, slots_left, remaining).clamp(1, upper);
                let load = if of == 1 {
                    out.push(Pending::Single(bin));
                    c
                } else {
                    out.push(Pending::Split { user_bin: bin, of });
                    self.fp.corrected(c.div_ceil(of as u64), of)
                };
                max_load = max_load.max(load);
                used += of;
                remaining -= c;
                i += 1;
                continue;
            }

            let fair_share = rest.div_ceil(slots_left);
            let mut j = i + 1;
            let mut sum = c;
            while j < n && n - j > slots_left - 1 {
                let next = sum + self.count(members[j]);
                let load = self.fp.corrected(next, j + 1 - i);
                let within = load <= max_load || !exceeds_budget(load, slots_left, remaining);
                if j - i >= fair_share && !within {
                    break;
                }
                sum = next;
                j += 1;
            }
            let size = j - i;
            let load = if size == 1 {
                out.push(Pending::Single(bin));
                c
            } else if size <= self.merge_ceiling {
                out.push(Pending::Merged(members[i..j].to_vec()));
                self.fp.corrected(sum, size)
            } else {
                out.push(Pending::Recurse(members[i..j].to_vec()));
                sum
            };
            max_load = max_load.max(load);
            used += 1;
            remaining -= sum;
            i = j;
        }
        out
    }
}

/// `load > remaining / slots_left`, exact.
fn exceeds_budget(load: u64, slots_left: usize, remaining: u64) -> bool {
    (load as u128) * (slots_left as u128) > remaining as u128
}

/// `ceil(count / (remaining / slots_left))`: slots `count` needs at the current budget.
fn proportional(count: u64, slots_left: usize, remaining: u64) -> usize {
    if remaining == 0 {
        return 1;
    }
    let need = ((count as u128) * (slots_left as u128)).div_ceil(remaining as u128);
    need.min(slots_left as u128) as usize
}

/// Convenience wrapper around [`HierarchicalBinning`].
pub fn execute(user_bins: &[UserBin], t_max: usize, fp: &FpCorrection) -> Result<Layout> {
    Ok(HierarchicalBinning::new(user_bins, t_max, fp)?.execute())
}
