use hibf_core::binning::execute;
use hibf_core::layout::{Layout, Role, Slot};
use hibf_core::{FpCorrection, HibfError, HibfStatistics, HierarchicalBinning, UserBin};

fn bins(counts: &[u64]) -> Vec<UserBin> {
    counts.iter().enumerate().map(|(i, &c)| UserBin::new(format!("ub{i}"), c)).collect()
}

fn fp(t_max: usize) -> FpCorrection {
    FpCorrection::build(0.05, 2, t_max).unwrap()
}

/// Structural checks every layout must pass.
fn check_invariants(layout: &Layout) {
    assert_eq!(layout.placements.len(), layout.user_bins.len());
    let mut seen = vec![0usize; layout.user_bins.len()];

    for lvl in &layout.levels {
        assert_eq!(lvl.slots.len(), lvl.t_max);
        assert!(lvl.t_max > 0 && lvl.t_max % 64 == 0);
        assert!(lvl.t_max <= layout.t_max);
        if let Some(p) = lvl.parent {
            assert!(p.level < lvl.id);
            assert_eq!(layout.levels[p.level].slots[p.slot], Slot::Recursed { child: lvl.id });
        } else {
            assert_eq!(lvl.id, 0, "only the root has no parent");
        }
        for slot in &lvl.slots {
            match slot {
                Slot::Empty => {}
                Slot::Single { user_bin } => seen[*user_bin] += 1,
                Slot::Split { user_bin, part, .. } => {
                    if *part == 0 {
                        seen[*user_bin] += 1;
                    }
                }
                Slot::Merged { members, .. } => {
                    assert!(members.len() > 1);
                    for m in members {
                        seen[*m] += 1;
                    }
                }
                Slot::Recursed { child } => assert_eq!(layout.levels[*child].parent.map(|p| p.level), Some(lvl.id)),
            }
        }
    }
    assert!(seen.iter().all(|&n| n == 1), "every user bin occupies exactly one role: {seen:?}");

    for (ub, p) in layout.placements.iter().enumerate() {
        let slots = &layout.levels[p.level].slots;
        assert!(p.slot + p.span <= slots.len());
        match p.role {
            Role::Single => assert_eq!(slots[p.slot], Slot::Single { user_bin: ub }),
            Role::Split => {
                for part in 0..p.span {
                    assert_eq!(slots[p.slot + part], Slot::Split { user_bin: ub, part, of: p.span });
                }
            }
            Role::Merged { group } => match &slots[p.slot] {
                Slot::Merged { group: g, members } => {
                    assert_eq!(*g, group);
                    assert!(members.contains(&ub));
                }
                other => panic!("user bin {ub} expected in merged slot, found {other:?}"),
            },
        }
    }
}

/// Bins held on `level` or anywhere below it.
fn bins_below(layout: &Layout, level: usize) -> usize {
    layout
        .placements
        .iter()
        .filter(|p| {
            let mut at = Some(p.level);
            while let Some(l) = at {
                if l == level {
                    return true;
                }
                at = layout.levels[l].parent.map(|ps| ps.level);
            }
            false
        })
        .count()
}

/// Every slot respects the level's largest load, and a merged group only
/// exceeds the budget in force when it was formed if it had to: it was no
/// larger than the level's load so far, or no bigger than its fair share of
/// the bins still to place.
fn check_budgets(layout: &Layout, fp: &FpCorrection) {
    for lvl in &layout.levels {
        let max = layout.max_effective_load(lvl.id, fp);
        // (slot, raw k-mers, user bins, effective load) per occupant, slot order
        let mut occupants: Vec<(usize, u64, usize, u64)> = Vec::new();
        for (k, slot) in lvl.slots.iter().enumerate() {
            let eff = layout.effective_load(slot, fp);
            assert!(eff <= max, "level {} slot {k} above the level maximum", lvl.id);
            let (raw, held) = match slot {
                Slot::Empty | Slot::Split { part: 1.., .. } => continue,
                Slot::Single { user_bin } | Slot::Split { user_bin, .. } => (layout.user_bins[*user_bin].kmer_count, 1),
                Slot::Merged { members, .. } => (layout.raw_load(slot), members.len()),
                Slot::Recursed { child } => (layout.subtree_count(*child), bins_below(layout, *child)),
            };
            occupants.push((k, raw, held, eff));
        }

        let mut remaining: u64 = occupants.iter().map(|o| o.1).sum();
        let mut rest: usize = occupants.iter().map(|o| o.2).sum();
        let mut max_before = 0u64;
        for &(k, raw, held, eff) in &occupants {
            if let Slot::Merged { members, .. } = &lvl.slots[k] {
                let slots_left = lvl.t_max - k;
                let fits = eff <= max_before
                    || (eff as u128) * (slots_left as u128) <= remaining as u128
                    || members.len() <= rest.div_ceil(slots_left);
                assert!(fits, "merged slot {k} on level {} formed over budget", lvl.id);
            }
            max_before = max_before.max(eff);
            remaining -= raw;
            rest -= held;
        }
    }
}

#[test]
fn large_bins_split_small_bins_merge() {
    let mut counts = vec![10u64; 190];
    counts.extend([5_000_000, 4_000_000, 3_500_000, 3_000_000, 2_500_000, 2_000_000, 1_500_000, 1_000_000, 800_000, 600_000]);
    let fp = fp(128);
    let layout = execute(&bins(&counts), 128, &fp).unwrap();
    check_invariants(&layout);
    check_budgets(&layout, &fp);

    for ub in 190..200 {
        assert_eq!(layout.placements[ub].level, 0);
        assert_eq!(layout.placements[ub].role, Role::Split, "large bin {ub}");
    }
    // the largest bin sits in front and gets the widest range
    assert_eq!(layout.placements[190].slot, 0);
    assert!(layout.placements[190].span > layout.placements[199].span);

    // 190 small bins are too many for one slot: they move to a child level
    // right behind the split ranges and share slots there
    assert_eq!(layout.levels.len(), 2);
    let after_splits = layout.placements[199].slot + layout.placements[199].span;
    assert_eq!(layout.levels[0].slots[after_splits], Slot::Recursed { child: 1 });
    assert!(layout.placements[..190].iter().all(|p| p.level == 1));
    let merged = layout.placements[..190].iter().filter(|p| matches!(p.role, Role::Merged { .. })).count();
    assert!(merged > 0, "small bins share slots on the child level");
}

#[test]
fn single_oversized_bin_is_split_not_recursed() {
    let fp = fp(64);
    let layout = execute(&bins(&[1_000_000]), 64, &fp).unwrap();
    check_invariants(&layout);
    assert_eq!(layout.levels.len(), 1);
    let p = layout.placements[0];
    assert_eq!(p.role, Role::Split);
    assert_eq!((p.slot, p.span), (0, 64));
}

fn mixed_counts(n: u64) -> Vec<u64> {
    (0..n).map(|i| 50 + (i * 37) % 400).collect()
}

#[test]
fn overflowing_levels_recurse_into_children() {
    let fp = fp(64);
    let layout = execute(&bins(&mixed_counts(500)), 64, &fp).unwrap();
    check_invariants(&layout);

    assert!(layout.levels.len() > 1, "500 bins cannot fit 64 slots without a child level");
    assert_eq!(layout.max_level_id(), Some(layout.levels.len() - 1));
    let child = &layout.levels[1];
    assert_eq!(child.parent.map(|p| p.level), Some(0));
    // children are never wider than their parent
    assert!(child.t_max <= 64);
    // placed deeper means a path through every ancestor's recursed slot
    let deep = layout.placements.iter().position(|p| p.level == 1).unwrap();
    let path = layout.path(deep);
    assert_eq!(path.len(), 2);
    assert_eq!(path[1].0, 0);
}

#[test]
fn merged_slots_stay_under_the_occupant_ceiling() {
    let fp = fp(64);
    let input = bins(&mixed_counts(500));
    let engine = HierarchicalBinning::new(&input, 64, &fp).unwrap();
    let ceiling = engine.merge_ceiling();
    assert_eq!(ceiling, fp.max_sharers(64, hibf_core::consts::MERGE_FACTOR_LIMIT));
    let layout = engine.execute();
    check_invariants(&layout);
    for lvl in &layout.levels {
        for slot in &lvl.slots {
            if let Slot::Merged { members, .. } = slot {
                assert!(members.len() <= ceiling, "{} bins share a slot", members.len());
            }
        }
    }
}

#[test]
fn large_inputs_fan_out_instead_of_chaining() {
    let fp = fp(64);
    let layout = execute(&bins(&[100u64; 10_000]), 64, &fp).unwrap();
    check_invariants(&layout);
    check_budgets(&layout, &fp);

    let recursed = |id: usize| layout.levels[id].slots.iter().filter(|s| matches!(s, Slot::Recursed { .. })).count();
    let widest = (0..layout.levels.len()).map(recursed).max().unwrap();
    assert!(widest > 1, "every level has at most one child");
    assert!(recursed(0) > 1);
    // a fan-out keeps the tree shallow
    let deepest = (0..layout.user_bins.len()).map(|ub| layout.path(ub).len()).max().unwrap();
    assert!(deepest <= 3, "tree depth {deepest}");
}

#[test]
fn merged_groups_respect_the_budget_in_force() {
    let fp64 = fp(64);
    for n in [150, 500] {
        let layout = execute(&bins(&mixed_counts(n)), 64, &fp64).unwrap();
        check_budgets(&layout, &fp64);
    }

    let mut counts = vec![10u64; 190];
    counts.extend([5_000_000, 4_000_000, 3_500_000, 3_000_000, 2_500_000, 2_000_000, 1_500_000, 1_000_000, 800_000, 600_000]);
    let fp128 = fp(128);
    let layout = execute(&bins(&counts), 128, &fp128).unwrap();
    check_budgets(&layout, &fp128);

    let layout = execute(&bins(&[7u64; 100]), 64, &fp64).unwrap();
    check_budgets(&layout, &fp64);
}

#[test]
fn empty_input_gives_empty_layout_and_zero_cost() {
    let fp = fp(64);
    let layout = execute(&[], 64, &fp).unwrap();
    assert!(layout.is_empty());
    assert!(layout.levels.is_empty());
    assert_eq!(layout.max_level_id(), None);

    let stats = HibfStatistics::evaluate(&layout, &fp);
    assert_eq!(stats.expected_query_cost, 0.0);
    assert_eq!(stats.memory_bits, 0);
}

#[test]
fn fewer_bins_than_slots_are_spread_over_the_level() {
    let fp = fp(64);
    let layout = execute(&bins(&[300, 100, 100, 0]), 64, &fp).unwrap();
    check_invariants(&layout);
    assert_eq!(layout.levels.len(), 1);
    // bin 3 has no k-mers but still owns a slot
    assert_eq!(layout.placements[3].span, 1);
    let used: usize = layout.placements.iter().map(|p| p.span).sum();
    assert_eq!(used, 64);
}

#[test]
fn engine_is_deterministic_and_stable_on_ties() {
    let counts = vec![7u64; 100];
    let fp = fp(64);
    let a = execute(&bins(&counts), 64, &fp).unwrap();
    let b = execute(&bins(&counts), 64, &fp).unwrap();
    check_invariants(&a);
    assert_eq!(a, b);
}

#[test]
fn t_max_must_be_word_aligned() {
    let fp = fp(128);
    let input = bins(&[1, 2, 3]);
    assert!(matches!(HierarchicalBinning::new(&input, 100, &fp), Err(HibfError::Config(_))));
    assert!(matches!(HierarchicalBinning::new(&input, 0, &fp), Err(HibfError::Config(_))));
}

#[test]
fn cost_accounts_for_every_level() {
    let fp = fp(64);
    let layout = execute(&bins(&mixed_counts(500)), 64, &fp).unwrap();
    assert!(layout.levels.len() > 1);
    let stats = HibfStatistics::evaluate(&layout, &fp);

    assert_eq!(stats.levels.len(), layout.levels.len());
    assert_eq!(stats.levels[0].reach, 1.0);
    for l in &stats.levels[1..] {
        assert!(l.reach > 0.0 && l.reach <= 1.0);
        assert_eq!(l.depth, 1);
    }
    // at least one probe of the root
    assert!(stats.expected_query_cost >= 1.0);
    let memory: u64 = stats.levels.iter().map(|l| l.t_max as u64 * l.bits_per_slot as u64).sum();
    assert_eq!(stats.memory_bits, memory);

    let row = stats.summary_row(true);
    assert!(row.starts_with(&format!("64\t{}\t", layout.levels.len())));
    assert!(row.contains("L1[d=1"));
}
