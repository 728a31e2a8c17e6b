//! Interleaved Bloom filter: `bins` Bloom filters of `bin_size` bits sharing
//! one bit vector. Bit `(position, bin)` lives at `position * bins + bin`, so
//! with `bins` a multiple of 64 every position is a run of whole words.

use crate::consts::WORD_BITS;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterleavedBloomFilter {
    bins: usize,
    bin_size: usize,
    hash_count: usize,
    words: Vec<u64>,
}

impl InterleavedBloomFilter {
    /// `bins` must be a multiple of 64.
    pub fn new(bins: usize, bin_size: usize, hash_count: usize) -> Self {
        debug_assert!(bins % WORD_BITS == 0);
        let bin_size = bin_size.max(1);
        let words = vec![0u64; bin_size * (bins / WORD_BITS)];
        Self { bins, bin_size, hash_count: hash_count.max(1), words }
    }

    pub(crate) fn from_words(bins: usize, bin_size: usize, hash_count: usize, words: Vec<u64>) -> Option<Self> {
        if bins == 0 || bins % WORD_BITS != 0 || bin_size == 0 || hash_count == 0 {
            return None;
        }
        if words.len() != bin_size * (bins / WORD_BITS) {
            return None;
        }
        Some(Self { bins, bin_size, hash_count, words })
    }

    pub fn bins(&self) -> usize { self.bins }
    pub fn bin_size(&self) -> usize { self.bin_size }
    pub fn hash_count(&self) -> usize { self.hash_count }
    pub fn words(&self) -> &[u64] { &self.words }

    /// Total bits allocated: `bins * bin_size`.
    pub fn bit_count(&self) -> u64 { (self.bins as u64) * (self.bin_size as u64) }

    #[inline]
    fn positions(&self, key: u64) -> impl Iterator<Item = usize> {
        let dig = *blake3::hash(&key.to_le_bytes()).as_bytes();
        let mut h1 = [0u8; 8];
        let mut h2 = [0u8; 8];
        h1.copy_from_slice(&dig[0..8]);
        h2.copy_from_slice(&dig[8..16]);
        let h1 = u64::from_le_bytes(h1);
        let h2 = u64::from_le_bytes(h2);
        let m = self.bin_size as u64;
        (0..self.hash_count as u64).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % m) as usize)
    }

    #[inline]
    fn locate(&self, position: usize, bin: usize) -> (usize, u64) {
        let idx = position * (self.bins / WORD_BITS) + bin / WORD_BITS;
        (idx, 1u64 << (bin % WORD_BITS))
    }

    pub fn emplace(&mut self, key: u64, bin: usize) {
        debug_assert!(bin < self.bins);
        for pos in self.positions(key) {
            let (idx, mask) = self.locate(pos, bin);
            self.words[idx] |= mask;
        }
    }

    pub fn contains(&self, key: u64, bin: usize) -> bool {
        if bin >= self.bins { return false; }
        self.positions(key).all(|pos| {
            let (idx, mask) = self.locate(pos, bin);
            self.words[idx] & mask != 0
        })
    }

    /// Number of set bits in one technical bin.
    pub fn occupancy(&self, bin: usize) -> usize {
        (0..self.bin_size)
            .filter(|&pos| {
                let (idx, mask) = self.locate(pos, bin);
                self.words[idx] & mask != 0
            })
            .count()
    }
}

/// Bits a Bloom filter needs to hold `elements` at `fpr` with `hash_count` hashes:
/// `ceil(-k n / ln(1 - fpr^(1/k)))`, at least 1.
pub fn bin_size_in_bits(elements: u64, fpr: f64, hash_count: usize) -> usize {
    if elements == 0 {
        return 1;
    }
    let k = hash_count.max(1) as f64;
    let denom = (-(fpr.ln() / k).exp()).ln_1p();
    let bits = (-k * elements as f64 / denom).ceil();
    (bits as usize).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emplaced_keys_are_found_in_their_bin() {
        let mut ibf = InterleavedBloomFilter::new(128, bin_size_in_bits(1000, 0.01, 2), 2);
        for key in 0..1000u64 {
            ibf.emplace(key, 7);
        }
        for key in 0..1000u64 {
            assert!(ibf.contains(key, 7));
        }
        let hits = (0..1000u64).filter(|&k| ibf.contains(k, 8)).count();
        assert_eq!(hits, 0, "bin 8 is empty");
        let fps = (10_000..20_000u64).filter(|&k| ibf.contains(k, 7)).count();
        assert!(fps < 300, "false positives {fps}");
        assert!(ibf.occupancy(7) > 0);
        assert_eq!(ibf.occupancy(8), 0);
    }

    #[test]
    fn bin_size_grows_with_elements_and_precision() {
        assert_eq!(bin_size_in_bits(0, 0.05, 2), 1);
        assert!(bin_size_in_bits(2000, 0.05, 2) > bin_size_in_bits(1000, 0.05, 2));
        assert!(bin_size_in_bits(1000, 0.01, 2) > bin_size_in_bits(1000, 0.05, 2));
    }
}
