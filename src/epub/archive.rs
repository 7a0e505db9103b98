//! Package archive container and the atomic rewrite primitive.
//!
//! Broken packages often contain the same entry name more than once, which
//! the `zip` crate's reader collapses on open. [`PackageContainer::read`]
//! walks the central directory itself so every occurrence is kept, and
//! [`PackageContainer::normalize`] then applies last-write-wins.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::error::{Error, Result};

/// Name of the entry that must come first, stored.
pub const MIMETYPE: &str = "mimetype";
/// Content of the `mimetype` entry.
pub const EPUB_MEDIA_TYPE: &[u8] = b"application/epub+zip";

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIR_SIG: u32 = 0x0605_4b50;
const EOCD_LEN: usize = 22;
const MAX_COMMENT_LEN: usize = 0xFFFF;

/// One archive member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub data: Vec<u8>,
    pub compression: CompressionMethod,
    pub modified: DateTime,
}

impl Entry {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>, compression: CompressionMethod) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            compression,
            modified: DateTime::default(),
        }
    }
}

/// In-memory archive: entries in archive order, duplicates allowed until
/// [`normalize`](Self::normalize) runs.
#[derive(Debug, Clone, Default)]
pub struct PackageContainer {
    entries: Vec<Entry>,
}

fn u16_at(buf: &[u8], pos: usize) -> Result<u16> {
    buf.get(pos..pos + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| Error::InvalidArchive(format!("truncated at {pos}")))
}

fn u32_at(buf: &[u8], pos: usize) -> Result<u32> {
    buf.get(pos..pos + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| Error::InvalidArchive(format!("truncated at {pos}")))
}

fn find_end_of_central_dir(buf: &[u8]) -> Result<usize> {
    if buf.len() < EOCD_LEN {
        return Err(Error::InvalidArchive("too short for a ZIP archive".into()));
    }
    let lowest = buf.len().saturating_sub(EOCD_LEN + MAX_COMMENT_LEN);
    (lowest..=buf.len() - EOCD_LEN)
        .rev()
        .find(|&pos| u32_at(buf, pos).is_ok_and(|sig| sig == END_OF_CENTRAL_DIR_SIG))
        .ok_or_else(|| Error::InvalidArchive("no end of central directory".into()))
}

fn inflate(name: &str, method: u16, raw: &[u8]) -> Result<(Vec<u8>, CompressionMethod)> {
    match method {
        0 => Ok((raw.to_vec(), CompressionMethod::Stored)),
        8 => {
            let mut decoder = flate2::read::DeflateDecoder::new(raw);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            Ok((out, CompressionMethod::Deflated))
        }
        other => Err(Error::InvalidArchive(format!(
            "{name}: unsupported compression method {other}"
        ))),
    }
}

impl PackageContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::read(&fs::read(path)?)
    }

    /// Parse an archive, keeping every entry including repeated names.
    pub fn read(buf: &[u8]) -> Result<Self> {
        let eocd = find_end_of_central_dir(buf)?;
        let count = u16_at(buf, eocd + 10)?;
        let cd_offset = u32_at(buf, eocd + 16)?;
        if count == u16::MAX || cd_offset == u32::MAX {
            return Err(Error::InvalidArchive("ZIP64 archives are not supported".into()));
        }

        let mut entries = Vec::with_capacity(count as usize);
        let mut pos = cd_offset as usize;
        for _ in 0..count {
            if u32_at(buf, pos)? != CENTRAL_HEADER_SIG {
                return Err(Error::InvalidArchive(format!("bad central header at {pos}")));
            }
            let flags = u16_at(buf, pos + 8)?;
            let method = u16_at(buf, pos + 10)?;
            let time = u16_at(buf, pos + 12)?;
            let date = u16_at(buf, pos + 14)?;
            let compressed_size = u32_at(buf, pos + 20)? as usize;
            let name_len = u16_at(buf, pos + 28)? as usize;
            let extra_len = u16_at(buf, pos + 30)? as usize;
            let comment_len = u16_at(buf, pos + 32)? as usize;
            let local_offset = u32_at(buf, pos + 42)? as usize;
            let name_bytes = buf
                .get(pos + 46..pos + 46 + name_len)
                .ok_or_else(|| Error::InvalidArchive("truncated entry name".into()))?;
            let name = String::from_utf8_lossy(name_bytes).into_owned();
            pos += 46 + name_len + extra_len + comment_len;

            if flags & 1 != 0 {
                return Err(Error::InvalidArchive(format!("{name}: encrypted entry")));
            }
            if u32_at(buf, local_offset)? != LOCAL_HEADER_SIG {
                return Err(Error::InvalidArchive(format!("{name}: bad local header")));
            }
            let data_start = local_offset
                + 30
                + u16_at(buf, local_offset + 26)? as usize
                + u16_at(buf, local_offset + 28)? as usize;
            let raw = buf
                .get(data_start..data_start + compressed_size)
                .ok_or_else(|| Error::InvalidArchive(format!("{name}: truncated data")))?;
            let (data, compression) = inflate(&name, method, raw)?;

            entries.push(Entry {
                name,
                data,
                compression,
                modified: DateTime::try_from_msdos(date, time).unwrap_or_default(),
            });
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry names in archive order (repeats included).
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Distinct names in the order [`normalize`](Self::normalize) would leave
    /// them (each at its last occurrence).
    pub fn unique_names(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut names: Vec<&str> = self
            .entries
            .iter()
            .rev()
            .map(|e| e.name.as_str())
            .filter(|name| seen.insert(*name))
            .collect();
        names.reverse();
        names
    }

    /// The effective (last written) entry with this name.
    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().rev().find(|e| e.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn push(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    /// Replace the data of the effective entry, or append a deflated one.
    pub fn put(&mut self, name: &str, data: Vec<u8>) {
        match self.entries.iter().rposition(|e| e.name == name) {
            Some(i) => self.entries[i].data = data,
            None => self.push(Entry::new(name, data, CompressionMethod::Deflated)),
        }
    }

    /// True if the archive breaks the uniqueness or `mimetype` rules.
    pub fn needs_cleanup(&self) -> bool {
        let mut seen = HashSet::new();
        if self.entries.iter().any(|e| !seen.insert(e.name.as_str())) {
            return true;
        }
        match self.entries.iter().position(|e| e.name == MIMETYPE) {
            Some(pos) => pos != 0 || self.entries[pos].compression != CompressionMethod::Stored,
            None => false,
        }
    }

    /// Collapse repeated names (last write wins, at the position of that
    /// write) and move a stored `mimetype` entry to the front.
    pub fn normalize(&mut self) {
        let mut last: HashMap<&str, usize> = HashMap::new();
        for (i, entry) in self.entries.iter().enumerate() {
            last.insert(entry.name.as_str(), i);
        }
        let keep: Vec<bool> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| last.get(e.name.as_str()) == Some(&i))
            .collect();
        let mut flags = keep.into_iter();
        self.entries.retain(|_| flags.next().unwrap_or(false));

        if let Some(pos) = self.entries.iter().position(|e| e.name == MIMETYPE) {
            let mut mimetype = self.entries.remove(pos);
            mimetype.compression = CompressionMethod::Stored;
            self.entries.insert(0, mimetype);
        }
    }

    /// Serialize the archive. Entries keep their compression method and
    /// timestamp; `level` applies to deflated entries.
    pub fn to_bytes(&self, level: Option<i64>) -> Result<Vec<u8>> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for entry in &self.entries {
            let options = SimpleFileOptions::default()
                .compression_method(entry.compression)
                .compression_level(match entry.compression {
                    CompressionMethod::Stored => None,
                    _ => level,
                })
                .last_modified_time(entry.modified);
            zip.start_file(entry.name.as_str(), options)?;
            zip.write_all(&entry.data)?;
        }
        Ok(zip.finish()?.into_inner())
    }
}

/// Write `bytes` to `path` through a temp file in the same directory.
///
/// Readers see either the old file or the complete new one. The temp file
/// is removed if anything fails.
pub fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let atomic = |source: std::io::Error| Error::AtomicWrite {
        path: path.to_path_buf(),
        source,
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".bokpub-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(atomic)?;
    tmp.write_all(bytes).map_err(atomic)?;
    tmp.as_file().sync_all().map_err(atomic)?;
    tmp.persist(path).map_err(|e| atomic(e.error))?;
    Ok(())
}

/// Load the archive at `path`, let `edit` mutate it, and write it back.
///
/// `edit` returns whether it changed anything. The file is rewritten only
/// when it did or when the archive needs deduplication; the returned flag
/// is the one from `edit`.
pub fn rewrite_in_place<F>(path: &Path, level: Option<i64>, edit: F) -> Result<bool>
where
    F: FnOnce(&mut PackageContainer) -> Result<bool>,
{
    let mut container = PackageContainer::open(path)?;
    let changed = edit(&mut container)?;
    if !changed && !container.needs_cleanup() {
        log::debug!("{}: unchanged, not rewriting", path.display());
        return Ok(false);
    }
    container.normalize();
    write_atomically(path, &container.to_bytes(level)?)?;
    log::info!("{}: rewritten ({} entries)", path.display(), container.len());
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PackageContainer {
        let mut c = PackageContainer::new();
        c.push(Entry::new("a.txt", "first", CompressionMethod::Deflated));
        c.push(Entry::new(MIMETYPE, EPUB_MEDIA_TYPE, CompressionMethod::Deflated));
        c.push(Entry::new("b.txt", "b", CompressionMethod::Stored));
        c.push(Entry::new("a.txt", "second", CompressionMethod::Deflated));
        c
    }

    #[test]
    fn test_last_write_wins() {
        let c = sample();
        assert_eq!(c.get("a.txt").map(|e| e.data.as_slice()), Some(&b"second"[..]));
        assert_eq!(c.unique_names(), vec![MIMETYPE, "b.txt", "a.txt"]);
        assert!(c.needs_cleanup());
    }

    #[test]
    fn test_normalize() {
        let mut c = sample();
        c.normalize();
        let names: Vec<_> = c.names().collect();
        assert_eq!(names, vec![MIMETYPE, "b.txt", "a.txt"]);
        assert_eq!(c.entries()[0].compression, CompressionMethod::Stored);
        assert!(!c.needs_cleanup());
    }

    #[test]
    fn test_write_read_keeps_compression() {
        let mut c = sample();
        c.normalize();
        let bytes = c.to_bytes(Some(6)).unwrap();
        let back = PackageContainer::read(&bytes).unwrap();
        assert_eq!(back.entries(), c.entries());
        // Serialization is deterministic.
        assert_eq!(back.to_bytes(Some(6)).unwrap(), bytes);
    }

    #[test]
    fn test_read_rejects_garbage() {
        let err = PackageContainer::read(b"not a zip file at all, sorry").unwrap_err();
        assert_eq!(err.kind(), "invalid-archive");
    }

    #[test]
    fn test_atomic_write_and_skip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.epub");
        let mut c = sample();
        c.normalize();
        write_atomically(&path, &c.to_bytes(None).unwrap()).unwrap();
        let before = fs::read(&path).unwrap();

        let changed = rewrite_in_place(&path, None, |_| Ok(false)).unwrap();
        assert!(!changed);
        assert_eq!(fs::read(&path).unwrap(), before);
        // No temp files left behind.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_atomic_write_failure_keeps_original() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-dir").join("book.epub");
        let err = write_atomically(&missing, b"data").unwrap_err();
        assert_eq!(err.kind(), "atomic-write");
    }
}
