//! Build phase: turn a layout plus raw keys into one interleaved Bloom
//! filter per level and the position mapping.
//!
//! Every user bin inserts its keys into the slots of its placement and into
//! the recursed slot of each ancestor level, so a query can descend from the
//! root. Keys of a split bin are spread over its slot range by a seeded hash.

use crate::archive::{write_filters, write_mapping};
use crate::config::BuildConfig;
use crate::consts::{FILTERS_FILE, MANIFEST_FILE, MAPPING_FILE, SPLIT_SEED};
use crate::errors::{HibfError, Result};
use crate::filter::{bin_size_in_bits, InterleavedBloomFilter};
use crate::fp_correction::FpCorrection;
use crate::keys::KeySource;
use crate::layout::Layout;
use crate::layout_file::LayoutParams;
use crate::manifest::{ArtifactRec, BuildManifest, LevelShape};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fs;
use tracing::{debug, info};
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// Where one user bin's own keys live: `span` slots from `slot` on `level`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    pub user_bin: usize,
    pub name: String,
    pub level: usize,
    pub slot: usize,
    pub span: usize,
}

/// User bin id → filter and slot range, indexed by user bin id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionMapping {
    entries: Vec<MappingEntry>,
}

impl PositionMapping {
    pub(crate) fn from_entries(entries: Vec<MappingEntry>) -> Self { Self { entries } }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    pub fn entries(&self) -> &[MappingEntry] { &self.entries }
    pub fn get(&self, user_bin: usize) -> Option<&MappingEntry> { self.entries.get(user_bin) }

    pub fn find(&self, name: &str) -> Option<&MappingEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

/// The built artifact: filters by ascending level id plus the mapping.
#[derive(Debug, Clone)]
pub struct HibfIndex {
    pub params: LayoutParams,
    pub filters: Vec<InterleavedBloomFilter>,
    pub mapping: PositionMapping,
}

impl HibfIndex {
    pub fn bit_count(&self) -> u64 { self.filters.iter().map(InterleavedBloomFilter::bit_count).sum() }
}

pub struct IndexBuilder<'a> {
    layout: &'a Layout,
    params: LayoutParams,
    fp: Option<FpCorrection>,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(layout: &'a Layout, params: LayoutParams) -> Result<Self> {
        let fp = if layout.levels.is_empty() {
            None
        } else {
            Some(FpCorrection::build(params.false_positive_rate, params.num_hash_functions, layout.t_max)?)
        };
        Ok(Self { layout, params, fp })
    }

    pub fn build(&self, source: &dyn KeySource) -> Result<HibfIndex> {
        let layout = self.layout;
        check_identities(layout, source)?;
        let fp = match &self.fp {
            Some(fp) => fp,
            None => {
                info!("empty layout, nothing to build");
                return Ok(HibfIndex {
                    params: self.params,
                    filters: Vec::new(),
                    mapping: PositionMapping::default(),
                });
            }
        };

        let keys: Vec<Vec<u64>> = layout.user_bins.par_iter().map(|b| source.keys_for(b)).collect::<Result<_>>()?;
        debug!(user_bins = keys.len(), total_keys = keys.iter().map(Vec::len).sum::<usize>(), "keys loaded");

        // (user bin, first slot, span) per level
        let mut work: Vec<Vec<(usize, usize, usize)>> = vec![Vec::new(); layout.levels.len()];
        for ub in 0..layout.user_bins.len() {
            for (level, slot, span) in layout.path(ub) {
                work[level].push((ub, slot, span));
            }
        }

        let mut filters: Vec<InterleavedBloomFilter> = layout
            .levels
            .iter()
            .map(|lvl| {
                let load = layout.max_effective_load(lvl.id, fp);
                let bits = bin_size_in_bits(load, self.params.false_positive_rate, self.params.num_hash_functions);
                debug!(level = lvl.id, t_max = lvl.t_max, max_load = load, bin_size = bits, "allocating level");
                InterleavedBloomFilter::new(lvl.t_max, bits, self.params.num_hash_functions)
            })
            .collect();

        filters.par_iter_mut().zip(&work).for_each(|(ibf, items)| {
            for &(ub, slot, span) in items {
                for &key in &keys[ub] {
                    ibf.emplace(key, slot + split_offset(key, span));
                }
            }
        });

        let entries = layout
            .user_bins
            .iter()
            .zip(&layout.placements)
            .enumerate()
            .map(|(i, (bin, p))| MappingEntry {
                user_bin: i,
                name: bin.name.clone(),
                level: p.level,
                slot: p.slot,
                span: p.span,
            })
            .collect();

        let index = HibfIndex { params: self.params, filters, mapping: PositionMapping::from_entries(entries) };
        info!(levels = index.filters.len(), user_bins = index.mapping.len(), bits = index.bit_count(), "index built");
        Ok(index)
    }
}

/// Slot within a split range that `key` goes to; `0` for unsplit bins.
#[inline]
pub fn split_offset(key: u64, span: usize) -> usize {
    if span <= 1 {
        return 0;
    }
    (xxh3_64_with_seed(&key.to_le_bytes(), SPLIT_SEED) % span as u64) as usize
}

/// Layout and key source must agree on the set of user bins.
fn check_identities(layout: &Layout, source: &dyn KeySource) -> Result<()> {
    let Some(known) = source.identities() else { return Ok(()) };
    let known: BTreeSet<&str> = known.iter().map(String::as_str).collect();
    let laid_out: BTreeSet<&str> = layout.user_bins.iter().map(|b| b.name.as_str()).collect();
    if laid_out.len() != layout.user_bins.len() {
        return Err(HibfError::Consistency("layout names a user bin more than once".into()));
    }
    if let Some(name) = laid_out.difference(&known).next() {
        return Err(HibfError::Consistency(format!("user bin {name:?} is in the layout but has no key data")));
    }
    if let Some(name) = known.difference(&laid_out).next() {
        return Err(HibfError::Consistency(format!("key data for {name:?} has no place in the layout")));
    }
    Ok(())
}

pub fn build(layout: &Layout, params: LayoutParams, source: &dyn KeySource) -> Result<HibfIndex> {
    IndexBuilder::new(layout, params)?.build(source)
}

/// Persist filters and mapping under the output prefix, then the manifest.
/// The manifest is written last; a prefix without one is an unfinished build.
pub fn write_outputs(index: &HibfIndex, config: &BuildConfig) -> Result<BuildManifest> {
    config.validate()?;
    let filters_path = config.artifact_path(FILTERS_FILE);
    if let Some(dir) = filters_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| HibfError::resource(dir, e))?;
    }
    let mapping_path = config.artifact_path(MAPPING_FILE);

    let filters_crc = write_filters(&filters_path, &index.filters)?;
    let mapping_crc = write_mapping(&mapping_path, &index.mapping)?;
    debug!(path = %filters_path.display(), crc = filters_crc, "filters written");
    debug!(path = %mapping_path.display(), crc = mapping_crc, "mapping written");

    let manifest = BuildManifest::new(
        config.kmer_size,
        index.params,
        index.mapping.len(),
        ArtifactRec { file: FILTERS_FILE.to_string(), crc32: filters_crc },
        ArtifactRec { file: MAPPING_FILE.to_string(), crc32: mapping_crc },
        index
            .filters
            .iter()
            .enumerate()
            .map(|(level, f)| LevelShape { level, bins: f.bins(), bin_size: f.bin_size() })
            .collect(),
    );
    manifest.save_atomic(&config.artifact_path(MANIFEST_FILE))?;
    info!(prefix = %config.output_prefix.display(), "build outputs written");
    Ok(manifest)
}
