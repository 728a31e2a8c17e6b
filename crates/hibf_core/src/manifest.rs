use crate::archive::stored_checksum;
use crate::config::prefixed_path;
use crate::consts::VERSION;
use crate::errors::{HibfError, Result};
use crate::layout_file::LayoutParams;
use crate::utils::write_atomic;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRec {
    /// File name relative to the output prefix.
    pub file: String,
    pub crc32: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelShape {
    pub level: usize,
    pub bins: usize,
    pub bin_size: usize,
}

/// `manifest.json`: what a finished build consists of.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildManifest {
    pub version: u16,
    pub created_unix: i64,
    pub kmer_size: u8,
    pub num_hash_functions: usize,
    pub false_positive_rate: f64,
    pub t_max: usize,
    pub num_user_bins: usize,
    pub filters: ArtifactRec,
    pub mapping: ArtifactRec,
    #[serde(default)]
    pub levels: Vec<LevelShape>,
}

impl BuildManifest {
    pub fn new(
        kmer_size: u8,
        params: LayoutParams,
        num_user_bins: usize,
        filters: ArtifactRec,
        mapping: ArtifactRec,
        levels: Vec<LevelShape>,
    ) -> Self {
        Self {
            version: VERSION,
            created_unix: time::OffsetDateTime::now_utc().unix_timestamp(),
            kmer_size,
            num_hash_functions: params.num_hash_functions,
            false_positive_rate: params.false_positive_rate,
            t_max: params.t_max,
            num_user_bins,
            filters,
            mapping,
            levels,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let s = fs::read_to_string(path).map_err(|e| HibfError::resource(path, e))?;
        let m: BuildManifest = serde_json::from_str(&s)?;
        if m.version != VERSION {
            return Err(HibfError::BadHeader);
        }
        Ok(m)
    }

    pub fn save_atomic(&self, path: &Path) -> Result<()> {
        write_atomic(path, serde_json::to_string_pretty(self)?.as_bytes())
    }

    /// Both archives exist, are intact and match the checksums recorded here.
    pub fn verify(&self, prefix: &Path) -> Result<()> {
        for rec in [&self.filters, &self.mapping] {
            let path = prefixed_path(prefix, &rec.file);
            if stored_checksum(&path)? != rec.crc32 {
                return Err(HibfError::Corrupt);
            }
        }
        Ok(())
    }
}
