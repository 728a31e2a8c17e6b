pub mod consts;
pub mod errors;
pub mod utils;
pub mod config;
pub mod user_bin;
pub mod fp_correction;
pub mod layout;
pub mod binning;
pub mod stats;
pub mod search;
pub mod layout_file;
pub mod filter;
pub mod keys;
pub mod archive;
pub mod builder;
pub mod manifest;

pub use binning::HierarchicalBinning;
pub use builder::{HibfIndex, IndexBuilder, MappingEntry, PositionMapping};
pub use config::{BuildConfig, LayoutConfig};
pub use errors::{HibfError, Result};
pub use filter::InterleavedBloomFilter;
pub use fp_correction::FpCorrection;
pub use keys::{InMemoryKeys, KeySource, SequenceFileKeys};
pub use layout::{IndexLevel, Layout, Placement, Role, Slot};
pub use layout_file::LayoutParams;
pub use manifest::BuildManifest;
pub use search::{compute_layout, CandidateOutcome, CandidateSummary, LayoutRun};
pub use stats::HibfStatistics;
pub use user_bin::UserBin;
