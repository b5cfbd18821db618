//! Journal Writer: append-only order journal with checksums
//!
//! Every durable mutation of the order store (order creation, status
//! transition, routing decision) becomes exactly one journal entry, so a
//! single append is the unit of atomicity.
//!
//! # Binary Format (per entry)
//! ```text
//! [body_len: u32]
//! [sequence: u64]
//! [timestamp: i64]
//! [kind_len: u16][kind: bytes]
//! [payload_len: u32][payload: bytes]   // JSON-encoded record
//! [checksum: u32]                      // CRC32C over sequence+timestamp+kind+payload
//! ```

use crc32c::crc32c;
use serde::Deserialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fixed body bytes: seq + ts + kind_len + payload_len + crc.
const MIN_BODY_LEN: usize = 8 + 8 + 2 + 4 + 4;
/// Anything larger is treated as a corrupt length prefix.
const MAX_BODY_LEN: usize = 16 * 1024 * 1024;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed entry: {0}")]
    Malformed(String),

    #[error("Sequence error: expected {expected}, got {got}")]
    SequenceError { expected: u64, got: u64 },
}

// ── Journal Entry ───────────────────────────────────────────────────

/// A single journal entry.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    /// Journal-wide monotonic sequence number, starting at 1
    pub sequence: u64,
    /// Unix nanos at which the mutation was recorded
    pub timestamp: i64,
    /// Record kind, e.g. `order_created`
    pub kind: String,
    /// JSON-encoded record
    pub payload: Vec<u8>,
    /// CRC32C over (sequence ++ timestamp ++ kind ++ payload)
    pub checksum: u32,
}

impl JournalEntry {
    /// Create a new entry, computing the checksum.
    pub fn new(sequence: u64, timestamp: i64, kind: impl Into<String>, payload: Vec<u8>) -> Self {
        let kind = kind.into();
        let checksum = Self::compute_checksum(sequence, timestamp, &kind, &payload);
        Self {
            sequence,
            timestamp,
            kind,
            payload,
            checksum,
        }
    }

    pub fn compute_checksum(sequence: u64, timestamp: i64, kind: &str, payload: &[u8]) -> u32 {
        let mut buf = Vec::with_capacity(16 + kind.len() + payload.len());
        buf.extend_from_slice(&sequence.to_le_bytes());
        buf.extend_from_slice(&timestamp.to_le_bytes());
        buf.extend_from_slice(kind.as_bytes());
        buf.extend_from_slice(payload);
        crc32c(&buf)
    }

    pub fn verify_checksum(&self) -> bool {
        self.checksum
            == Self::compute_checksum(self.sequence, self.timestamp, &self.kind, &self.payload)
    }

    /// Encode to the length-prefixed wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let kind = self.kind.as_bytes();
        let body_len = MIN_BODY_LEN + kind.len() + self.payload.len();

        let mut buf = Vec::with_capacity(4 + body_len);
        buf.extend_from_slice(&(body_len as u32).to_le_bytes());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&(kind.len() as u16).to_le_bytes());
        buf.extend_from_slice(kind);
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Decode one entry from the front of `data`.
    ///
    /// Returns `(entry, bytes_consumed)`. The checksum is decoded but not
    /// verified; callers decide how to treat a mismatch.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize), JournalError> {
        let mut cursor = Cursor::new(data);
        let body_len = cursor.u32()? as usize;
        if !(MIN_BODY_LEN..=MAX_BODY_LEN).contains(&body_len) {
            return Err(JournalError::Malformed(format!(
                "implausible body length {}",
                body_len
            )));
        }
        if data.len() < 4 + body_len {
            return Err(JournalError::Malformed(format!(
                "incomplete entry: need {} bytes, have {}",
                4 + body_len,
                data.len()
            )));
        }

        let mut body = Cursor::new(&data[4..4 + body_len]);
        let sequence = body.u64()?;
        let timestamp = body.i64()?;
        let kind_len = body.u16()? as usize;
        let kind = String::from_utf8(body.take(kind_len)?.to_vec())
            .map_err(|e| JournalError::Malformed(e.to_string()))?;
        let payload_len = body.u32()? as usize;
        let payload = body.take(payload_len)?.to_vec();
        let checksum = body.u32()?;

        Ok((
            Self {
                sequence,
                timestamp,
                kind,
                payload,
                checksum,
            },
            4 + body_len,
        ))
    }
}

/// Bounds-checked little-endian reader.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], JournalError> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.data.len());
        match end {
            Some(end) => {
                let data: &'a [u8] = self.data;
                let slice = &data[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(JournalError::Malformed(format!(
                "field of {} bytes overruns entry at offset {}",
                n, self.pos
            ))),
        }
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], JournalError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16, JournalError> {
        self.array().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> Result<u32, JournalError> {
        self.array().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> Result<u64, JournalError> {
        self.array().map(u64::from_le_bytes)
    }

    fn i64(&mut self) -> Result<i64, JournalError> {
        self.array().map(i64::from_le_bytes)
    }
}

// ── Flush / Fsync Policies ──────────────────────────────────────────

/// Controls when buffered data is flushed to the OS.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    EveryWrite,
    EveryN(usize),
}

/// Controls when `fsync` is called.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsyncPolicy {
    EveryWrite,
    EveryN(usize),
    OnRotation,
}

// ── Journal Writer Configuration ────────────────────────────────────

#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Directory for journal files.
    pub dir: PathBuf,
    /// Maximum file size in bytes before rotation (default 64 MiB).
    pub max_file_size: u64,
    pub flush_policy: FlushPolicy,
    pub fsync_policy: FsyncPolicy,
}

impl JournalConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_file_size: 64 * 1024 * 1024,
            flush_policy: FlushPolicy::EveryWrite,
            fsync_policy: FsyncPolicy::EveryN(64),
        }
    }
}

// ── Journal Writer ──────────────────────────────────────────────────

/// Append-only journal writer with rotation and fsync control.
pub struct JournalWriter {
    config: JournalConfig,
    writer: BufWriter<File>,
    current_file: PathBuf,
    current_file_size: u64,
    file_index: u64,
    next_sequence: u64,
    writes_since_flush: usize,
    writes_since_fsync: usize,
}

impl JournalWriter {
    /// Open the newest journal file in `config.dir` for appending.
    pub fn open(config: JournalConfig) -> Result<Self, JournalError> {
        fs::create_dir_all(&config.dir)?;

        let file_index = latest_index(&config.dir)?.unwrap_or(0);
        let current_file = journal_path(&config.dir, file_index);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&current_file)?;
        let current_file_size = file.metadata()?.len();

        Ok(Self {
            config,
            writer: BufWriter::new(file),
            current_file,
            current_file_size,
            file_index,
            next_sequence: 1,
            writes_since_flush: 0,
            writes_since_fsync: 0,
        })
    }

    /// Set the next expected sequence number (after replay).
    pub fn set_next_sequence(&mut self, seq: u64) {
        self.next_sequence = seq;
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn current_file_path(&self) -> &Path {
        &self.current_file
    }

    /// Append a fully built entry; its sequence must be the next one.
    pub fn append(&mut self, entry: &JournalEntry) -> Result<(), JournalError> {
        if entry.sequence != self.next_sequence {
            return Err(JournalError::SequenceError {
                expected: self.next_sequence,
                got: entry.sequence,
            });
        }

        if self.current_file_size >= self.config.max_file_size {
            self.start_new_file()?;
        }

        let bytes = entry.to_bytes();
        self.writer.write_all(&bytes)?;

        self.current_file_size += bytes.len() as u64;
        self.next_sequence = entry.sequence + 1;
        self.writes_since_flush += 1;
        self.writes_since_fsync += 1;

        self.apply_flush_policy()?;
        self.apply_fsync_policy()?;
        Ok(())
    }

    /// Build an entry with the next sequence number and append it.
    pub fn write_record(
        &mut self,
        timestamp: i64,
        kind: &str,
        payload: Vec<u8>,
    ) -> Result<JournalEntry, JournalError> {
        let entry = JournalEntry::new(self.next_sequence, timestamp, kind, payload);
        self.append(&entry)?;
        Ok(entry)
    }

    /// Force flush + fsync.
    pub fn sync(&mut self) -> Result<(), JournalError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.writes_since_flush = 0;
        self.writes_since_fsync = 0;
        Ok(())
    }

    /// Close the current file and continue in a fresh one.
    ///
    /// Used on rotation and after replay found a torn tail, so new entries
    /// never land behind unreadable bytes.
    pub fn start_new_file(&mut self) -> Result<(), JournalError> {
        self.sync()?;
        self.file_index += 1;
        self.current_file = journal_path(&self.config.dir, self.file_index);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.current_file)?;
        self.writer = BufWriter::new(file);
        self.current_file_size = 0;
        Ok(())
    }

    fn apply_flush_policy(&mut self) -> Result<(), JournalError> {
        let should_flush = match self.config.flush_policy {
            FlushPolicy::EveryWrite => true,
            FlushPolicy::EveryN(n) => self.writes_since_flush >= n,
        };
        if should_flush {
            self.writer.flush()?;
            self.writes_since_flush = 0;
        }
        Ok(())
    }

    fn apply_fsync_policy(&mut self) -> Result<(), JournalError> {
        let should_fsync = match self.config.fsync_policy {
            FsyncPolicy::EveryWrite => true,
            FsyncPolicy::EveryN(n) => self.writes_since_fsync >= n,
            FsyncPolicy::OnRotation => false,
        };
        if should_fsync {
            self.writer.flush()?;
            self.writer.get_ref().sync_all()?;
            self.writes_since_fsync = 0;
        }
        Ok(())
    }
}

impl Drop for JournalWriter {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

// ── File Naming ─────────────────────────────────────────────────────

pub(crate) fn journal_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("orders-{:06}.journal", index))
}

pub(crate) fn parse_index(file_name: &str) -> Option<u64> {
    file_name
        .strip_prefix("orders-")?
        .strip_suffix(".journal")?
        .parse()
        .ok()
}

/// Journal files in `dir`, sorted by index.
pub(crate) fn journal_files(dir: &Path) -> Result<Vec<(u64, PathBuf)>, io::Error> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<(u64, PathBuf)> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let index = parse_index(&e.file_name().to_string_lossy())?;
            Some((index, e.path()))
        })
        .collect();
    files.sort_by_key(|(idx, _)| *idx);
    Ok(files)
}

fn latest_index(dir: &Path) -> Result<Option<u64>, io::Error> {
    Ok(journal_files(dir)?.last().map(|(idx, _)| *idx))
}

// ── Tests ───────────────────────────────────────────────────────────
