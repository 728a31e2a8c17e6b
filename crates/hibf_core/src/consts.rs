// crates/hibf_core/src/consts.rs

pub const MAGIC_FILTERS: &[u8; 4] = b"HIBF";
pub const MAGIC_MAPPING: &[u8; 4] = b"HIBM";
pub const VERSION: u16 = 1;

/// Fixed part of every archive: magic[4] + version[2] + reserved[2].
pub const ARCHIVE_HDR_SIZE: usize = 8;

/// Technical bin counts are always a multiple of one machine word.
pub const WORD_BITS: usize = 64;

pub const DEFAULT_T_MAX: usize = 64;
pub const DEFAULT_NUM_HASH_FUNCTIONS: usize = 2;
pub const DEFAULT_FALSE_POSITIVE_RATE: f64 = 0.05;
pub const MAX_NUM_HASH_FUNCTIONS: usize = 5;
pub const MAX_KMER_SIZE: u8 = 32;

/// Merged slots hold at most as many user bins as keep the correction
/// factor at or below this value; larger groups get a child level.
pub const MERGE_FACTOR_LIMIT: f64 = 4.0;

/// Seed for choosing the fragment slot of a split user bin.
pub const SPLIT_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

pub const FILTERS_FILE: &str = "hibf.out";
pub const MAPPING_FILE: &str = "position_mapping.out";
pub const MANIFEST_FILE: &str = "manifest.json";
