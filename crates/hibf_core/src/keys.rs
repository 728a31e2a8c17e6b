//! Where the build phase gets the keys of a user bin from.

use crate::consts::MAX_KMER_SIZE;
use crate::errors::{HibfError, Result};
use crate::user_bin::UserBin;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::Path;

/// Raw key data per user bin. Implementations are shared across build workers.
pub trait KeySource: Send + Sync {
    /// Identities this source knows about, when it can enumerate them.
    /// The builder checks them against the layout in both directions.
    fn identities(&self) -> Option<Vec<String>>;

    /// Sorted, deduplicated keys of one user bin. A bin the source has no
    /// data for is a [`HibfError::Consistency`] error.
    fn keys_for(&self, bin: &UserBin) -> Result<Vec<u64>>;
}

/// Keys held in memory, addressed by user bin name.
#[derive(Debug, Clone, Default)]
pub struct InMemoryKeys {
    keys: HashMap<String, Vec<u64>>,
}

impl InMemoryKeys {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&mut self, name: impl Into<String>, mut keys: Vec<u64>) {
        keys.sort_unstable();
        keys.dedup();
        self.keys.insert(name.into(), keys);
    }

    pub fn len(&self) -> usize { self.keys.len() }
    pub fn is_empty(&self) -> bool { self.keys.is_empty() }
}

impl FromIterator<(String, Vec<u64>)> for InMemoryKeys {
    fn from_iter<I: IntoIterator<Item = (String, Vec<u64>)>>(iter: I) -> Self {
        let mut out = Self::new();
        for (name, keys) in iter {
            out.insert(name, keys);
        }
        out
    }
}

impl KeySource for InMemoryKeys {
    fn identities(&self) -> Option<Vec<String>> {
        let mut names: Vec<String> = self.keys.keys().cloned().collect();
        names.sort();
        Some(names)
    }

    fn keys_for(&self, bin: &UserBin) -> Result<Vec<u64>> {
        self.keys
            .get(&bin.name)
            .cloned()
            .ok_or_else(|| HibfError::Consistency(format!("no key data for user bin {:?}", bin.name)))
    }
}

/// Canonical k-mers of the sequence files a user bin names.
///
/// A file whose first non-empty line starts with `>` is read as FASTA: the
/// lines of one record form one sequence. Any other file holds one sequence
/// per line. Characters outside `ACGT` (either case) restart the window.
#[derive(Debug, Clone, Copy)]
pub struct SequenceFileKeys {
    kmer_size: u8,
}

impl SequenceFileKeys {
    pub fn new(kmer_size: u8) -> Result<Self> {
        if kmer_size == 0 || kmer_size > MAX_KMER_SIZE {
            return Err(HibfError::Config(format!(
                "kmer size must be in 1..={MAX_KMER_SIZE}, got {kmer_size}"
            )));
        }
        Ok(Self { kmer_size })
    }

    pub fn kmer_size(&self) -> u8 { self.kmer_size }

    fn read_file(&self, path: &Path, out: &mut Vec<u64>) -> Result<()> {
        let f = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(HibfError::Consistency(format!(
                    "sequence file {} listed in the layout does not exist",
                    path.display()
                )))
            }
            Err(e) => return Err(HibfError::resource(path, e)),
        };
        let mut window = KmerWindow::new(self.kmer_size);
        let mut fasta: Option<bool> = None;
        for line in BufReader::new(f).lines() {
            let line = line?;
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let is_fasta = *fasta.get_or_insert_with(|| line.starts_with('>'));
            if line.starts_with('>') || !is_fasta {
                window.reset();
                if line.starts_with('>') {
                    continue;
                }
            }
            for &b in line.as_bytes() {
                if let Some(kmer) = window.push(b) {
                    out.push(kmer);
                }
            }
        }
        Ok(())
    }
}

impl KeySource for SequenceFileKeys {
    fn identities(&self) -> Option<Vec<String>> { None }

    fn keys_for(&self, bin: &UserBin) -> Result<Vec<u64>> {
        let mut keys = Vec::new();
        for file in bin.files() {
            self.read_file(Path::new(file), &mut keys)?;
        }
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }
}

/// Rolling 2-bit encoding of the forward strand and its reverse complement.
struct KmerWindow {
    k: u32,
    mask: u64,
    fwd: u64,
    rev: u64,
    filled: u32,
}

impl KmerWindow {
    fn new(k: u8) -> Self {
        let k = u32::from(k);
        let mask = if k == 32 { u64::MAX } else { (1u64 << (2 * k)) - 1 };
        Self { k, mask, fwd: 0, rev: 0, filled: 0 }
    }

    fn reset(&mut self) {
        self.fwd = 0;
        self.rev = 0;
        self.filled = 0;
    }

    /// Feed one base; yields the canonical k-mer once the window is full.
    fn push(&mut self, base: u8) -> Option<u64> {
        let code = match base {
            b'A' | b'a' => 0u64,
            b'C' | b'c' => 1,
            b'G' | b'g' => 2,
            b'T' | b't' => 3,
            _ => {
                self.reset();
                return None;
            }
        };
        self.fwd = ((self.fwd << 2) | code) & self.mask;
        self.rev = (self.rev >> 2) | ((3 - code) << (2 * (self.k - 1)));
        if self.filled < self.k {
            self.filled += 1;
        }
        (self.filled == self.k).then(|| self.fwd.min(self.rev))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn kmers(k: u8, seq: &str) -> Vec<u64> {
        let mut w = KmerWindow::new(k);
        seq.bytes().filter_map(|b| w.push(b)).collect()
    }

    #[test]
    fn reverse_complement_maps_to_same_kmer() {
        // ACG and its reverse complement CGT
        assert_eq!(kmers(3, "ACG"), kmers(3, "CGT"));
        assert_eq!(kmers(4, "ACGTTA").len(), 3);
        assert!(kmers(4, "ACNGT").is_empty());
    }

    #[test]
    fn full_width_kmers_do_not_overflow() {
        let seq = "ACGT".repeat(10);
        assert_eq!(kmers(32, &seq).len(), seq.len() - 31);
    }

    #[test]
    fn reads_fasta_and_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.fa");
        let mut f = File::create(&path).unwrap();
        writeln!(f, ">r1\nACGTAC\nGT\n>r2\nTTTT").unwrap();
        drop(f);

        let src = SequenceFileKeys::new(4).unwrap();
        let keys = src.keys_for(&UserBin::new(path.to_string_lossy(), 0)).unwrap();
        // ACGTACGT spans the line break; TTTT is its own record
        let mut expected = kmers(4, "ACGTACGT");
        expected.extend(kmers(4, "TTTT"));
        expected.sort_unstable();
        expected.dedup();
        assert_eq!(keys, expected);

        let missing = dir.path().join("nope.fa");
        let err = src.keys_for(&UserBin::new(missing.to_string_lossy(), 0)).unwrap_err();
        assert!(matches!(err, HibfError::Consistency(_)));
    }

    #[test]
    fn in_memory_source_rejects_unknown_bins() {
        let src: InMemoryKeys = [("a".to_string(), vec![3, 1, 3])].into_iter().collect();
        assert_eq!(src.keys_for(&UserBin::new("a", 2)).unwrap(), vec![1, 3]);
        assert!(matches!(src.keys_for(&UserBin::new("b", 2)), Err(HibfError::Consistency(_))));
    }
}
