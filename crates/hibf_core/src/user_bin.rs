use crate::errors::{HibfError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Separator joining several files that make up one user bin.
pub const FILE_SEPARATOR: char = ';';

/// One logical key set to be indexed. Its position in the input vector is its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBin {
    pub name: String,
    pub kmer_count: u64,
}

impl UserBin {
    pub fn new(name: impl Into<String>, kmer_count: u64) -> Self {
        Self { name: name.into(), kmer_count }
    }

    /// Files backing this bin, in the order they were listed.
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.name.split(FILE_SEPARATOR).filter(|s| !s.is_empty())
    }
}

/// Parse a counts table: `<name>\t<kmer_count>` per line, `#` comments allowed.
pub fn parse_counts(text: &str) -> Result<Vec<UserBin>> {
    let mut bins = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim_end();
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let lineno = i + 1;
        let (name, count) = match line.split('\t').collect::<Vec<_>>()[..] {
            [name, count] => (name, count),
            _ => return Err(HibfError::parse(lineno, "expected <name>\\t<kmer_count>")),
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(HibfError::parse(lineno, "empty user bin name"));
        }
        let kmer_count = count
            .trim()
            .parse::<u64>()
            .map_err(|e| HibfError::parse(lineno, format!("bad kmer count {count:?}: {e}")))?;
        bins.push(UserBin::new(name, kmer_count));
    }
    Ok(bins)
}

pub fn read_counts(path: &Path) -> Result<Vec<UserBin>> {
    let text = fs::read_to_string(path).map_err(|e| HibfError::resource(path, e))?;
    parse_counts(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_counts_and_multi_file_names() {
        let text = "# header\nA.fa\t100\n\nB.fa;C.fa\t42\n";
        let bins = parse_counts(text).unwrap();
        assert_eq!(bins.len(), 2);
        assert_eq!(bins[1].kmer_count, 42);
        assert_eq!(bins[1].files().collect::<Vec<_>>(), vec!["B.fa", "C.fa"]);
    }

    #[test]
    fn reports_line_of_bad_count() {
        let err = parse_counts("A\t1\nB\tx\n").unwrap_err();
        assert!(matches!(err, HibfError::Parse { line: 2, .. }));
    }
}
