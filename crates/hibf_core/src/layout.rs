//! In-memory layout: a flat arena of index levels plus one placement per user bin.
//!
//! Level 0 is the root. A child level records the parent slot it hangs from;
//! that slot carries `Slot::Recursed`. Ids follow creation order (pre-order).

use crate::fp_correction::FpCorrection;
use crate::user_bin::UserBin;

/// What occupies one technical bin. Exactly one role per slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    Empty,
    Single { user_bin: usize },
    /// Fragment `part` of a user bin spread over `of` consecutive slots.
    Split { user_bin: usize, part: usize, of: usize },
    /// Several user bins whose keys share this slot without distinction.
    Merged { group: usize, members: Vec<usize> },
    /// The slot stands for the union of a child level.
    Recursed { child: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentSlot {
    pub level: usize,
    pub slot: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexLevel {
    pub id: usize,
    pub t_max: usize,
    pub parent: Option<ParentSlot>,
    pub slots: Vec<Slot>,
}

impl IndexLevel {
    pub fn new(id: usize, t_max: usize, parent: Option<ParentSlot>) -> Self {
        Self { id, t_max, parent, slots: vec![Slot::Empty; t_max] }
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| **s != Slot::Empty).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Single,
    Split,
    Merged { group: usize },
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Single => "single",
            Role::Split => "split",
            Role::Merged { .. } => "merged",
        }
    }
}

/// Where one user bin ended up: `span` consecutive slots from `slot` on `level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub level: usize,
    pub slot: usize,
    pub span: usize,
    pub role: Role,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layout {
    /// Width of the root level; children may be narrower.
    pub t_max: usize,
    pub user_bins: Vec<UserBin>,
    pub levels: Vec<IndexLevel>,
    /// `placements[i]` belongs to `user_bins[i]`.
    pub placements: Vec<Placement>,
}

impl Layout {
    pub fn is_empty(&self) -> bool { self.user_bins.is_empty() }

    /// Highest level id, `None` for an empty layout.
    pub fn max_level_id(&self) -> Option<usize> { self.levels.len().checked_sub(1) }

    /// Slots the user bin's keys go into, its own level first, then every
    /// ancestor's recursed slot up to the root.
    pub fn path(&self, user_bin: usize) -> Vec<(usize, usize, usize)> {
        let p = self.placements[user_bin];
        let mut out = vec![(p.level, p.slot, p.span)];
        let mut parent = self.levels[p.level].parent;
        while let Some(ps) = parent {
            out.push((ps.level, ps.slot, 1));
            parent = self.levels[ps.level].parent;
        }
        out
    }

    /// Sum of raw k-mer counts of every user bin below (and on) `level`.
    pub fn subtree_count(&self, level: usize) -> u64 {
        self.levels[level]
            .slots
            .iter()
            .map(|s| self.raw_load(s))
            .sum()
    }

    /// Raw k-mers stored in a slot; a split bin contributes its share.
    pub fn raw_load(&self, slot: &Slot) -> u64 {
        match slot {
            Slot::Empty => 0,
            Slot::Single { user_bin } => self.user_bins[*user_bin].kmer_count,
            Slot::Split { user_bin, part, of } => {
                split_share(self.user_bins[*user_bin].kmer_count, *part, *of)
            }
            Slot::Merged { members, .. } => members.iter().map(|m| self.user_bins[*m].kmer_count).sum(),
            Slot::Recursed { child } => self.subtree_count(*child),
        }
    }

    /// Load a slot must be sized for, after false-positive correction.
    pub fn effective_load(&self, slot: &Slot, fp: &FpCorrection) -> u64 {
        match slot {
            Slot::Empty => 0,
            Slot::Single { user_bin } => self.user_bins[*user_bin].kmer_count,
            Slot::Split { user_bin, of, .. } => {
                let count = self.user_bins[*user_bin].kmer_count;
                fp.corrected(count.div_ceil(*of as u64), *of)
            }
            Slot::Merged { members, .. } => {
                let sum = members.iter().map(|m| self.user_bins[*m].kmer_count).sum();
                fp.corrected(sum, members.len())
            }
            Slot::Recursed { child } => self.subtree_count(*child),
        }
    }

    /// Largest effective load over the slots of `level`.
    pub fn max_effective_load(&self, level: usize, fp: &FpCorrection) -> u64 {
        self.levels[level]
            .slots
            .iter()
            .map(|s| self.effective_load(s, fp))
            .max()
            .unwrap_or(0)
    }
}

/// Keys of a split bin are spread by hash, so each part holds about `count / of`.
fn split_share(count: u64, part: usize, of: usize) -> u64 {
    let of = of as u64;
    let base = count / of;
    if (part as u64) < count % of { base + 1 } else { base }
}
