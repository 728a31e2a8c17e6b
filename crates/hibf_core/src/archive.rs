//! Binary archives (LE).
//!
//! Filters (`hibf.out`):
//!   magic[4] = "HIBF", version[2], reserved[2]
//!   u32 level_count
//!   repeat level_count * {
//!     u64 bins, u64 bin_size, u32 hash_count, u32 pad,
//!     u64 word_count, word_count * u64
//!   }
//!   u32 crc32(all preceding bytes)
//!
//! Position mapping (`position_mapping.out`):
//!   magic[4] = "HIBM", version[2], reserved[2]
//!   u64 entry_count
//!   repeat entry_count * {
//!     u64 user_bin, u32 name_len, name bytes (UTF-8),
//!     u64 level, u64 slot, u64 span
//!   }
//!   u32 crc32(all preceding bytes)

use crate::builder::{MappingEntry, PositionMapping};
use crate::consts::{ARCHIVE_HDR_SIZE, MAGIC_FILTERS, MAGIC_MAPPING, VERSION};
use crate::errors::{HibfError, Result};
use crate::filter::InterleavedBloomFilter;
use crate::utils::{crc32, fsync_dir, read_u16, read_u32, read_u64, write_u16, write_u32, write_u64};
use memmap2::Mmap;
use std::fs::File;
use std::io::{self, BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Streams an archive into a temp file next to its destination and renames
/// it into place on `finalize`. The checksum covers every byte written.
struct ArchiveWriter {
    path_final: PathBuf,
    out: BufWriter<NamedTempFile>,
    hasher: crc32fast::Hasher,
}

impl ArchiveWriter {
    fn create(path: &Path, magic: &[u8; 4]) -> Result<Self> {
        let dir = match path.parent() {
            Some(d) if !d.as_os_str().is_empty() => d,
            _ => Path::new("."),
        };
        let tmp = tempfile::Builder::new()
            .prefix(".hibf_archive_")
            .tempfile_in(dir)
            .map_err(|e| HibfError::resource(dir, e))?;
        let mut w = Self {
            path_final: path.to_path_buf(),
            out: BufWriter::new(tmp),
            hasher: crc32fast::Hasher::new(),
        };
        w.write_all(magic)?;
        write_u16(&mut w, VERSION)?;
        write_u16(&mut w, 0)?;
        Ok(w)
    }

    /// Append the checksum, sync, publish. Returns the checksum.
    fn finalize(self) -> Result<u32> {
        let Self { path_final, mut out, hasher } = self;
        let crc = hasher.finalize();
        write_u32(&mut out, crc)?;
        let tmp = out.into_inner().map_err(|e| e.into_error())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path_final)?;
        let _ = fsync_dir(&path_final);
        Ok(crc)
    }
}

impl Write for ArchiveWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.out.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> { self.out.flush() }
}

/// Map an archive, check header and checksum, hand back the payload reader.
fn open_verified(path: &Path, magic: &[u8; 4]) -> Result<(Mmap, u32)> {
    let f = File::open(path).map_err(|e| HibfError::resource(path, e))?;
    let len = f.metadata()?.len() as usize;
    if len < ARCHIVE_HDR_SIZE + 4 {
        return Err(HibfError::BadHeader);
    }
    let mmap = unsafe { Mmap::map(&f)? };
    if &mmap[0..4] != magic {
        return Err(HibfError::BadHeader);
    }
    let ver = read_u16(&mut &mmap[4..6])?;
    if ver != VERSION {
        return Err(HibfError::BadHeader);
    }
    let body_end = len - 4;
    let stored = read_u32(&mut &mmap[body_end..])?;
    if crc32(&mmap[..body_end]) != stored {
        return Err(HibfError::Corrupt);
    }
    Ok((mmap, stored))
}

fn payload(mmap: &Mmap) -> Cursor<&[u8]> {
    Cursor::new(&mmap[ARCHIVE_HDR_SIZE..mmap.len() - 4])
}

/// A checksummed payload that does not parse is corrupt, not an IO failure.
fn corrupt(_: io::Error) -> HibfError { HibfError::Corrupt }

fn ensure_consumed(cur: &Cursor<&[u8]>) -> Result<()> {
    if cur.position() as usize != cur.get_ref().len() {
        return Err(HibfError::Corrupt);
    }
    Ok(())
}

/// Write one filter per level, root first. Returns the archive checksum.
pub fn write_filters(path: &Path, filters: &[InterleavedBloomFilter]) -> Result<u32> {
    let mut w = ArchiveWriter::create(path, MAGIC_FILTERS)?;
    write_u32(&mut w, filters.len() as u32)?;
    for ibf in filters {
        write_u64(&mut w, ibf.bins() as u64)?;
        write_u64(&mut w, ibf.bin_size() as u64)?;
        write_u32(&mut w, ibf.hash_count() as u32)?;
        write_u32(&mut w, 0)?;
        write_u64(&mut w, ibf.words().len() as u64)?;
        for &word in ibf.words() {
            write_u64(&mut w, word)?;
        }
    }
    w.finalize()
}

pub fn read_filters(path: &Path) -> Result<Vec<InterleavedBloomFilter>> {
    let (mmap, _) = open_verified(path, MAGIC_FILTERS)?;
    let mut cur = payload(&mmap);
    let count = read_u32(&mut cur).map_err(corrupt)? as usize;
    let mut filters = Vec::with_capacity(count.min(1 << 16));
    for _ in 0..count {
        let bins = read_u64(&mut cur).map_err(corrupt)? as usize;
        let bin_size = read_u64(&mut cur).map_err(corrupt)? as usize;
        let hash_count = read_u32(&mut cur).map_err(corrupt)? as usize;
        let _pad = read_u32(&mut cur).map_err(corrupt)?;
        let word_count = read_u64(&mut cur).map_err(corrupt)? as usize;
        let left = cur.get_ref().len() - cur.position() as usize;
        if word_count.checked_mul(8).map_or(true, |b| b > left) {
            return Err(HibfError::Corrupt);
        }
        let mut words = Vec::with_capacity(word_count);
        for _ in 0..word_count {
            words.push(read_u64(&mut cur).map_err(corrupt)?);
        }
        let ibf = InterleavedBloomFilter::from_words(bins, bin_size, hash_count, words).ok_or(HibfError::Corrupt)?;
        filters.push(ibf);
    }
    ensure_consumed(&cur)?;
    Ok(filters)
}

pub fn write_mapping(path: &Path, mapping: &PositionMapping) -> Result<u32> {
    let mut w = ArchiveWriter::create(path, MAGIC_MAPPING)?;
    write_u64(&mut w, mapping.len() as u64)?;
    for e in mapping.entries() {
        write_u64(&mut w, e.user_bin as u64)?;
        write_u32(&mut w, e.name.len() as u32)?;
        w.write_all(e.name.as_bytes())?;
        write_u64(&mut w, e.level as u64)?;
        write_u64(&mut w, e.slot as u64)?;
        write_u64(&mut w, e.span as u64)?;
    }
    w.finalize()
}

pub fn read_mapping(path: &Path) -> Result<PositionMapping> {
    let (mmap, _) = open_verified(path, MAGIC_MAPPING)?;
    let mut cur = payload(&mmap);
    let count = read_u64(&mut cur).map_err(corrupt)? as usize;
    let mut entries = Vec::with_capacity(count.min(1 << 20));
    for _ in 0..count {
        let user_bin = read_u64(&mut cur).map_err(corrupt)? as usize;
        let name_len = read_u32(&mut cur).map_err(corrupt)? as usize;
        let mut name = vec![0u8; name_len.min(cur.get_ref().len())];
        cur.read_exact(&mut name).map_err(corrupt)?;
        if name.len() != name_len {
            return Err(HibfError::Corrupt);
        }
        let name = String::from_utf8(name).map_err(|_| HibfError::Corrupt)?;
        let level = read_u64(&mut cur).map_err(corrupt)? as usize;
        let slot = read_u64(&mut cur).map_err(corrupt)? as usize;
        let span = read_u64(&mut cur).map_err(corrupt)? as usize;
        entries.push(MappingEntry { user_bin, name, level, slot, span });
    }
    ensure_consumed(&cur)?;
    Ok(PositionMapping::from_entries(entries))
}

/// Checksum stored in an archive's trailer, after verifying it.
pub fn stored_checksum(path: &Path) -> Result<u32> {
    let magic = {
        let mut f = File::open(path).map_err(|e| HibfError::resource(path, e))?;
        let mut m = [0u8; 4];
        f.read_exact(&mut m).map_err(|_| HibfError::BadHeader)?;
        m
    };
    let expected = if &magic == MAGIC_FILTERS { MAGIC_FILTERS } else { MAGIC_MAPPING };
    let (_, crc) = open_verified(path, expected)?;
    Ok(crc)
}
