use crate::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const LOG_HEADER_SIZE: usize = 16;
const LOG_MAGIC: u32 = 0x544C4C00; // "TLL\0"
const LOG_VERSION: u32 = 1;
const RECORD_HEADER_SIZE: usize = 12; // seq(8) + len(4)
const RECORD_TRAILER_SIZE: usize = 4; // crc(4)

/// Append-only framed log backing one store partition
///
/// Format: [magic(4) | version(4) | reserved(8)] [record...]
/// Record: [seq(8) | len(4) | json data | crc(4)]
///
/// Every append is synced before it returns. A failed append is cut back off
/// the file before the error is returned, so acknowledged records are never
/// stranded behind a torn frame. On open, a record that is cut short or fails
/// its checksum ends the log: it and everything after it is truncated away.
pub(crate) struct FramedLog {
    file: File,
    path: PathBuf,
    next_seq: u64,
    records: usize,
    /// Length of the intact prefix; everything past it is a failed append
    valid_len: u64,
    /// Set when a failed append could not be cut back yet
    torn: bool,
    /// Next append writes only this many bytes and fails
    #[cfg(test)]
    pub(super) short_write: Option<usize>,
}

impl FramedLog {
    /// Open the log at `path`, creating it if missing, and replay its entries.
    pub fn open<E: DeserializeOwned>(path: impl AsRef<Path>) -> Result<(Self, Vec<E>)> {
        let path = path.as_ref().to_path_buf();
        let fresh = match fs::metadata(&path) {
            Ok(meta) => (meta.len() as usize) < LOG_HEADER_SIZE,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => return Err(e.into()),
        };
        if fresh {
            let file = create_with_header(&path)?;
            return Ok((
                Self {
                    file,
                    path,
                    next_seq: 1,
                    records: 0,
                    valid_len: LOG_HEADER_SIZE as u64,
                    torn: false,
                    #[cfg(test)]
                    short_write: None,
                },
                Vec::new(),
            ));
        }

        let bytes = fs::read(&path)?;
        let mut header = &bytes[..LOG_HEADER_SIZE];
        if header.get_u32() != LOG_MAGIC {
            return Err(Error::Corruption(format!(
                "invalid log magic in {}",
                path.display()
            )));
        }
        let version = header.get_u32_le();
        if version != LOG_VERSION {
            return Err(Error::Corruption(format!(
                "unsupported log version {} in {}",
                version,
                path.display()
            )));
        }

        let (entries, max_seq, valid_len) = scan(&bytes)?;

        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        if valid_len < bytes.len() {
            warn!(
                path = %path.display(),
                discarded = bytes.len() - valid_len,
                "Truncating torn tail of queue log"
            );
            file.set_len(valid_len as u64)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::End(0))?;

        debug!(path = %path.display(), records = entries.len(), "Replayed queue log");
        let records = entries.len();
        Ok((
            Self {
                file,
                path,
                next_seq: max_seq + 1,
                records,
                valid_len: valid_len as u64,
                torn: false,
                #[cfg(test)]
                short_write: None,
            },
            entries,
        ))
    }

    /// Append one entry and sync it to disk.
    ///
    /// On failure the partial frame is truncated away before returning.
    pub fn append<E: Serialize>(&mut self, entry: &E) -> Result<u64> {
        let seq = self.next_seq;
        let buf = encode(seq, entry)?;
        if self.torn {
            self.truncate_to_valid()?;
        }

        if let Err(e) = self.write_frame(&buf) {
            warn!(
                path = %self.path.display(),
                seq,
                error = %e,
                "Append failed, cutting back partial record"
            );
            self.torn = true;
            if let Err(rollback) = self.truncate_to_valid() {
                warn!(
                    path = %self.path.display(),
                    error = %rollback,
                    "Could not cut back partial record"
                );
            }
            return Err(e);
        }

        self.valid_len += buf.len() as u64;
        self.next_seq += 1;
        self.records += 1;
        Ok(seq)
    }

    fn write_frame(&mut self, buf: &[u8]) -> Result<()> {
        #[cfg(test)]
        {
            if let Some(cut) = self.short_write.take() {
                self.file.write_all(&buf[..cut.min(buf.len())])?;
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "short write",
                )));
            }
        }
        self.file.write_all(buf)?;
        self.file.sync_all()?;
        Ok(())
    }

    fn truncate_to_valid(&mut self) -> Result<()> {
        self.file.set_len(self.valid_len)?;
        self.file.sync_all()?;
        self.file.seek(SeekFrom::Start(self.valid_len))?;
        self.torn = false;
        Ok(())
    }

    /// Replace the log with exactly `entries`, atomically.
    pub fn rewrite<E: Serialize>(&mut self, entries: &[E]) -> Result<()> {
        let tmp = self.path.with_extension("log.tmp");
        let mut file = create_with_header(&tmp)?;

        let mut buf = BytesMut::new();
        for (i, entry) in entries.iter().enumerate() {
            buf.extend_from_slice(&encode(i as u64 + 1, entry)?);
        }
        file.write_all(&buf)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, &self.path)?;
        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;

        self.valid_len = file.seek(SeekFrom::End(0))?;
        self.file = file;
        self.next_seq = entries.len() as u64 + 1;
        self.records = entries.len();
        self.torn = false;
        Ok(())
    }

    /// Number of records currently in the log, live or superseded
    pub fn records(&self) -> usize {
        self.records
    }
}

fn create_with_header(path: &Path) -> Result<File> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;

    let mut header = BytesMut::with_capacity(LOG_HEADER_SIZE);
    header.put_u32(LOG_MAGIC); // big-endian for magic
    header.put_u32_le(LOG_VERSION);
    header.put_u64_le(0); // reserved
    file.write_all(&header)?;
    file.sync_all()?;
    Ok(file)
}

fn encode<E: Serialize>(seq: u64, entry: &E) -> Result<BytesMut> {
    let data = serde_json::to_vec(entry)?;
    let crc = crc32fast::hash(&data);

    let mut buf = BytesMut::with_capacity(RECORD_HEADER_SIZE + data.len() + RECORD_TRAILER_SIZE);
    buf.put_u64_le(seq);
    buf.put_u32_le(data.len() as u32);
    buf.put_slice(&data);
    buf.put_u32_le(crc);
    Ok(buf)
}

/// Decode records after the header. Returns the entries, the highest
/// sequence seen and the length of the intact prefix.
fn scan<E: DeserializeOwned>(bytes: &[u8]) -> Result<(Vec<E>, u64, usize)> {
    let mut entries = Vec::new();
    let mut max_seq = 0u64;
    let mut offset = LOG_HEADER_SIZE;

    loop {
        let rest = &bytes[offset..];
        if rest.len() < RECORD_HEADER_SIZE {
            break;
        }
        let mut cursor = rest;
        let seq = cursor.get_u64_le();
        let len = cursor.get_u32_le() as usize;
        if cursor.len() < len + RECORD_TRAILER_SIZE {
            break;
        }
        let data = &cursor[..len];
        let mut trailer = &cursor[len..len + RECORD_TRAILER_SIZE];
        let expected_crc = trailer.get_u32_le();
        if crc32fast::hash(data) != expected_crc {
            warn!(offset, seq, "Checksum mismatch in queue log record");
            break;
        }

        let entry: E = serde_json::from_slice(data)
            .map_err(|e| Error::Corruption(format!("undecodable log record {}: {}", seq, e)))?;
        entries.push(entry);
        max_seq = max_seq.max(seq);
        offset += RECORD_HEADER_SIZE + len + RECORD_TRAILER_SIZE;
    }

    Ok((entries, max_seq, offset))
}
