//! Structural fingerprints of ZIP archives
//!
//! A fingerprint is the set of `(name, uncompressed size, CRC-32)` triples of an archive's file
//! entries. It survives recompression, re-signing and entry reordering, and is computed from the
//! end-of-central-directory record and the central directory alone: local headers and entry
//! data are never read, so fingerprinting a large archive costs a few small reads.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::{self, Read, Seek, SeekFrom};

use sha2::{Digest, Sha256};

const EOCD_SIGNATURE: u32 = 0x0605_4b50;
const EOCD_LEN: usize = 22;
const MAX_COMMENT_LEN: u64 = u16::MAX as u64;

const ZIP64_LOCATOR_SIGNATURE: u32 = 0x0706_4b50;
const ZIP64_LOCATOR_LEN: usize = 20;
const ZIP64_EOCD_SIGNATURE: u32 = 0x0606_4b50;
const ZIP64_EOCD_LEN: usize = 56;
const ZIP64_EXTRA_ID: u16 = 0x0001;

const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
const CENTRAL_HEADER_LEN: usize = 46;

/// One file entry of an archive
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FingerprintEntry {
    /// Entry name as stored in the archive
    pub name: String,
    /// Uncompressed size in bytes
    pub size: u64,
    /// CRC-32 of the uncompressed data
    pub crc32: u32,
}

/// Unordered set of an archive's file entries, plus its stable digest
///
/// Two fingerprints are equal iff their entry sets are equal.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    entries: BTreeSet<FingerprintEntry>,
    digest: String,
}

impl Fingerprint {
    /// Build a fingerprint from entries in any order; duplicates collapse
    pub fn from_entries(entries: impl IntoIterator<Item = FingerprintEntry>) -> Self {
        let entries: BTreeSet<_> = entries.into_iter().collect();
        let digest = digest_of(&entries);
        Self { entries, digest }
    }

    /// Lowercase hex SHA-256 over the lines `name|size|crc\n` in sorted order
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Entries in sorted order
    pub fn entries(&self) -> impl Iterator<Item = &FingerprintEntry> {
        self.entries.iter()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the archive had no (matching) file entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for Fingerprint {}

impl Hash for Fingerprint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.digest.hash(state);
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.digest)
    }
}

fn digest_of(entries: &BTreeSet<FingerprintEntry>) -> String {
    let mut hasher = Sha256::new();
    for entry in entries {
        hasher.update(format!("{}|{}|{}\n", entry.name, entry.size, entry.crc32).as_bytes());
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Fingerprint the ZIP archive readable from `reader`
///
/// With `extension` set (without the dot, e.g. `"class"`), only entries whose names end in
/// that extension are kept. Directory entries are always excluded. Anything that does not
/// parse as a ZIP central directory yields an [`io::ErrorKind::InvalidData`] error.
pub fn compute_fingerprint<R: Read + Seek>(
    mut reader: R,
    extension: Option<&str>,
) -> io::Result<Fingerprint> {
    let directory = read_central_directory(&mut reader)?;
    let suffix = extension.map(|ext| format!(".{}", ext.trim_start_matches('.')));

    let entries = parse_entries(&directory)?
        .into_iter()
        .filter(|entry| !entry.name.ends_with('/'))
        .filter(|entry| {
            suffix
                .as_deref()
                .is_none_or(|suffix| entry.name.ends_with(suffix))
        });

    Ok(Fingerprint::from_entries(entries))
}

fn invalid(reason: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason.into())
}

fn le_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn le_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

struct CentralDirectory {
    /// Entry count claimed by the end record
    declared_entries: u64,
    bytes: Vec<u8>,
}

fn read_central_directory<R: Read + Seek>(reader: &mut R) -> io::Result<CentralDirectory> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    if file_len < EOCD_LEN as u64 {
        return Err(invalid("too short to be a ZIP archive"));
    }

    // The end record sits at the very end, followed only by a comment of up to 64 KiB
    let tail_len = file_len.min(EOCD_LEN as u64 + MAX_COMMENT_LEN);
    let tail_start = file_len - tail_len;
    reader.seek(SeekFrom::Start(tail_start))?;
    let mut tail = vec![0u8; tail_len as usize];
    reader.read_exact(&mut tail)?;

    let eocd_pos = (0..=tail.len() - EOCD_LEN)
        .rev()
        .find(|&pos| {
            le_u32(&tail, pos) == EOCD_SIGNATURE
                && pos + EOCD_LEN + le_u16(&tail, pos + 20) as usize <= tail.len()
        })
        .ok_or_else(|| invalid("end of central directory record not found"))?;
    let eocd = &tail[eocd_pos..eocd_pos + EOCD_LEN];
    let eocd_offset = tail_start + eocd_pos as u64;

    let mut declared_entries = u64::from(le_u16(eocd, 10));
    let mut cd_size = u64::from(le_u32(eocd, 12));
    let mut cd_offset = u64::from(le_u32(eocd, 16));
    let mut cd_end = eocd_offset;

    if let Some(record_offset) = find_zip64_record(reader, eocd_offset)? {
        if record_offset + ZIP64_EOCD_LEN as u64 > eocd_offset {
            return Err(invalid("ZIP64 end record overlaps the end record"));
        }
        let mut record = [0u8; ZIP64_EOCD_LEN];
        reader.seek(SeekFrom::Start(record_offset))?;
        reader.read_exact(&mut record)?;
        if le_u32(&record, 0) != ZIP64_EOCD_SIGNATURE {
            return Err(invalid("bad ZIP64 end of central directory record"));
        }
        declared_entries = le_u64(&record, 32);
        cd_size = le_u64(&record, 40);
        cd_offset = le_u64(&record, 48);
        cd_end = record_offset;
    }

    // The directory ends where the end records begin; data prepended to the archive (as in
    // self-extracting archives) shifts the stored offset but not this
    let cd_start = cd_end
        .checked_sub(cd_size)
        .ok_or_else(|| invalid("central directory larger than the archive"))?;
    if cd_start != cd_offset {
        tracing::trace!(
            stored = cd_offset,
            actual = cd_start,
            "central directory offset adjusted for prepended data"
        );
    }

    let len = usize::try_from(cd_size).map_err(|_| invalid("central directory too large"))?;
    let mut bytes = vec![0u8; len];
    reader.seek(SeekFrom::Start(cd_start))?;
    reader.read_exact(&mut bytes)?;

    Ok(CentralDirectory {
        declared_entries,
        bytes,
    })
}

/// Offset of the ZIP64 end record, if a ZIP64 locator precedes the end record
fn find_zip64_record<R: Read + Seek>(reader: &mut R, eocd_offset: u64) -> io::Result<Option<u64>> {
    let Some(locator_offset) = eocd_offset.checked_sub(ZIP64_LOCATOR_LEN as u64) else {
        return Ok(None);
    };
    let mut locator = [0u8; ZIP64_LOCATOR_LEN];
    reader.seek(SeekFrom::Start(locator_offset))?;
    reader.read_exact(&mut locator)?;
    if le_u32(&locator, 0) != ZIP64_LOCATOR_SIGNATURE {
        return Ok(None);
    }
    Ok(Some(le_u64(&locator, 8)))
}

fn parse_entries(directory: &CentralDirectory) -> io::Result<Vec<FingerprintEntry>> {
    let bytes = &directory.bytes;
    let mut entries = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        if bytes.len() - pos < CENTRAL_HEADER_LEN {
            return Err(invalid("truncated central directory header"));
        }
        if le_u32(bytes, pos) != CENTRAL_HEADER_SIGNATURE {
            return Err(invalid(format!("bad central directory signature at {pos}")));
        }

        let crc32 = le_u32(bytes, pos + 16);
        let stored_size = le_u32(bytes, pos + 24);
        let name_len = le_u16(bytes, pos + 28) as usize;
        let extra_len = le_u16(bytes, pos + 30) as usize;
        let comment_len = le_u16(bytes, pos + 32) as usize;

        let name_start = pos + CENTRAL_HEADER_LEN;
        let extra_start = name_start + name_len;
        let extra_end = extra_start + extra_len;
        let next = extra_end + comment_len;
        if next > bytes.len() {
            return Err(invalid("central directory entry runs past its end"));
        }

        let name = String::from_utf8_lossy(&bytes[name_start..extra_start]).into_owned();
        let size = if stored_size == u32::MAX {
            zip64_uncompressed_size(&bytes[extra_start..extra_end])
                .ok_or_else(|| invalid(format!("{name}: missing ZIP64 size")))?
        } else {
            u64::from(stored_size)
        };

        entries.push(FingerprintEntry { name, size, crc32 });
        pos = next;
    }

    if entries.len() as u64 != directory.declared_entries {
        tracing::debug!(
            declared = directory.declared_entries,
            found = entries.len(),
            "central directory entry count differs from end record"
        );
    }

    Ok(entries)
}

/// The uncompressed size is the first value of the ZIP64 extra field
fn zip64_uncompressed_size(extra: &[u8]) -> Option<u64> {
    let mut pos = 0;
    while pos + 4 <= extra.len() {
        let id = le_u16(extra, pos);
        let len = le_u16(extra, pos + 2) as usize;
        let data = extra.get(pos + 4..pos + 4 + len)?;
        if id == ZIP64_EXTRA_ID {
            return (data.len() >= 8).then(|| le_u64(data, 0));
        }
        pos += 4 + len;
    }
    None
}
