//! Append-only record file backing the consensus metadata
//!
//! Record format:
//! ```text
//! +--------+--------+---------+--------+
//! | Magic  | Length | Payload | CRC32C |
//! | 4B     | 4B     | var     | 4B     |
//! +--------+--------+---------+--------+
//! ```
//!
//! A crash mid-append leaves at most one incomplete record at the end of
//! the file; opening cuts it off. A damaged record anywhere else is
//! reported as data loss and the file is left untouched.

use chubby_common::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Record magic number
const RECORD_MAGIC: u32 = 0x4D42_4843; // "CHBM"

/// Record header size (magic + length)
const RECORD_HEADER_SIZE: usize = 8;

/// Bytes surrounding every payload
const RECORD_OVERHEAD: usize = RECORD_HEADER_SIZE + 4;

/// Frame a payload into a full record
fn encode_record(payload: &[u8]) -> Result<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::invalid_argument("metadata record too large"))?;

    let mut buf = Vec::with_capacity(RECORD_OVERHEAD + payload.len());
    buf.extend_from_slice(&RECORD_MAGIC.to_le_bytes());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(payload);

    // CRC over everything except the CRC itself
    let crc = crc32c::crc32c(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok(buf)
}

/// Outcome of parsing the bytes at one record offset
#[derive(Debug, PartialEq, Eq)]
enum Frame<'a> {
    /// Valid record: payload and total size
    Record(&'a [u8], usize),
    /// Incomplete record running to the end of the file
    Torn,
    /// Damaged record with more data after it
    Corrupt(&'static str),
}

/// Parse the record at the start of `data` (which runs to end of file)
fn decode_record(data: &[u8]) -> Frame<'_> {
    let Some((header, rest)) = data.split_first_chunk::<RECORD_HEADER_SIZE>() else {
        return Frame::Torn;
    };
    let (magic, len) = header.split_at(4);
    let magic = u32::from_le_bytes([magic[0], magic[1], magic[2], magic[3]]);
    if magic != RECORD_MAGIC {
        // Zero fill past the last sync is a torn tail, anything else is not
        return if data.iter().all(|b| *b == 0) {
            Frame::Torn
        } else {
            Frame::Corrupt("bad record magic")
        };
    }

    let len = u32::from_le_bytes([len[0], len[1], len[2], len[3]]) as usize;
    let Some((body, rest)) = rest.split_at_checked(len) else {
        return Frame::Torn;
    };
    let Some((stored_crc, rest)) = rest.split_first_chunk::<4>() else {
        return Frame::Torn;
    };

    let body_end = RECORD_HEADER_SIZE + len;
    if crc32c::crc32c(&data[..body_end]) != u32::from_le_bytes(*stored_crc) {
        return if rest.is_empty() {
            Frame::Torn
        } else {
            Frame::Corrupt("record checksum mismatch")
        };
    }

    Frame::Record(body, body_end + 4)
}

/// Open record file
pub(crate) struct RecordFile {
    path: PathBuf,
    file: File,
    /// Length covered by complete, synced records
    len: u64,
}

impl RecordFile {
    /// Open (or create) the file at `path` and return every intact record
    /// payload in append order.
    pub(crate) fn open(path: impl AsRef<Path>) -> Result<(Self, Vec<Vec<u8>>)> {
        let path = path.as_ref().to_path_buf();
        let created = !path.exists();

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                Error::internal(format!("failed to open {}: {}", path.display(), e))
            })?;
        if created {
            sync_parent_dir(&path)?;
        }

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        let mut records = Vec::new();
        let mut offset = 0;
        while offset < contents.len() {
            match decode_record(&contents[offset..]) {
                Frame::Record(payload, size) => {
                    records.push(payload.to_vec());
                    offset += size;
                }
                Frame::Torn => {
                    warn!(
                        "Discarding {} trailing bytes of {:?} after {} records",
                        contents.len() - offset,
                        path,
                        records.len()
                    );
                    file.set_len(offset as u64)?;
                    file.sync_all()?;
                    break;
                }
                Frame::Corrupt(reason) => {
                    return Err(Error::data_loss(format!(
                        "{} at offset {} of {}",
                        reason,
                        offset,
                        path.display()
                    )));
                }
            }
        }

        let len = offset as u64;
        Ok((Self { path, file, len }, records))
    }

    /// Append one payload and sync it to disk.
    ///
    /// On failure the file is cut back to its last complete record, so a
    /// retried append never lands behind a partial one.
    pub(crate) fn append(&mut self, payload: &[u8]) -> Result<()> {
        let bytes = encode_record(payload)?;

        if self.file.metadata()?.len() != self.len {
            warn!(
                "Cutting unexpected bytes from {:?} back to {} bytes",
                self.path, self.len
            );
            self.rollback()?;
        }

        if let Err(e) = self
            .file
            .write_all(&bytes)
            .and_then(|()| self.file.sync_data())
        {
            if let Err(rollback) = self.rollback() {
                // Retried by the length check on the next append
                warn!("Failed to roll back {:?}: {}", self.path, rollback);
            }
            return Err(Error::internal(format!(
                "failed to append to {}: {}",
                self.path.display(),
                e
            )));
        }

        self.len += bytes.len() as u64;
        Ok(())
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    fn rollback(&mut self) -> std::io::Result<()> {
        self.file.set_len(self.len)?;
        self.file.sync_all()
    }
}

/// Make a newly created file's directory entry durable
fn sync_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        File::open(parent)?.sync_all()?;
        debug!("Created {:?}", path);
    }
    Ok(())
}
