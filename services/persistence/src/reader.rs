//! Journal Reader: sequential replay with corruption detection
//!
//! - CRC32C validation on every entry
//! - A torn tail (crash mid-append) is logged and skipped, the valid prefix
//!   is still returned
//! - Gapless sequence validation across files

use crate::journal::{journal_files, JournalEntry, JournalError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("Checksum mismatch at byte offset {offset}: entry seq={sequence}")]
    ChecksumMismatch { offset: u64, sequence: u64 },

    #[error("Sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },
}

// ── Corruption Log ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct CorruptionRecord {
    pub file: PathBuf,
    /// Byte offset inside `file` where parsing stopped.
    pub byte_offset: u64,
    /// Unparseable bytes that were skipped.
    pub skipped_bytes: u64,
    pub detail: String,
}

// ── Journal Reader ──────────────────────────────────────────────────

/// Sequential reader over every journal file of a directory.
pub struct JournalReader {
    files: Vec<PathBuf>,
    current_file_idx: usize,
    data: Vec<u8>,
    pos: usize,
    last_sequence: Option<u64>,
    corruption_log: Vec<CorruptionRecord>,
}

impl JournalReader {
    /// Open a reader over all journal files in `dir`. A missing directory
    /// reads as an empty journal.
    pub fn open(dir: &Path) -> Result<Self, ReaderError> {
        let files = journal_files(dir)?.into_iter().map(|(_, p)| p).collect();
        let mut reader = Self {
            files,
            current_file_idx: 0,
            data: Vec::new(),
            pos: 0,
            last_sequence: None,
            corruption_log: Vec::new(),
        };
        reader.load_current_file()?;
        Ok(reader)
    }

    /// Next valid entry, or `None` once every file is exhausted.
    pub fn next_entry(&mut self) -> Result<Option<JournalEntry>, ReaderError> {
        loop {
            if self.pos >= self.data.len() && !self.advance_file()? {
                return Ok(None);
            }

            let offset = self.pos as u64;
            match JournalEntry::from_bytes(&self.data[self.pos..]) {
                Ok((entry, consumed)) => {
                    if !entry.verify_checksum() {
                        return Err(ReaderError::ChecksumMismatch {
                            offset,
                            sequence: entry.sequence,
                        });
                    }
                    self.pos += consumed;
                    self.last_sequence = Some(entry.sequence);
                    return Ok(Some(entry));
                }
                Err(err) => {
                    let skipped = (self.data.len() - self.pos) as u64;
                    let file = self.files[self.current_file_idx].clone();
                    warn!(
                        file = %file.display(),
                        offset,
                        skipped,
                        "Skipping unreadable journal tail: {}",
                        err
                    );
                    self.corruption_log.push(CorruptionRecord {
                        file,
                        byte_offset: offset,
                        skipped_bytes: skipped,
                        detail: err.to_string(),
                    });
                    self.pos = self.data.len();
                }
            }
        }
    }

    pub fn read_all(&mut self) -> Result<Vec<JournalEntry>, ReaderError> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next_entry()? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Read everything and require sequences to be gapless.
    pub fn read_all_validated(&mut self) -> Result<Vec<JournalEntry>, ReaderError> {
        let entries = self.read_all()?;
        Self::validate_sequences(&entries)?;
        Ok(entries)
    }

    pub fn validate_sequences(entries: &[JournalEntry]) -> Result<(), ReaderError> {
        for pair in entries.windows(2) {
            let expected = pair[0].sequence + 1;
            if pair[1].sequence != expected {
                return Err(ReaderError::SequenceGap {
                    expected,
                    got: pair[1].sequence,
                });
            }
        }
        Ok(())
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    pub fn corruption_log(&self) -> &[CorruptionRecord] {
        &self.corruption_log
    }

    // ── Internal Helpers ────────────────────────────────────────────

    fn load_current_file(&mut self) -> Result<(), ReaderError> {
        self.data = match self.files.get(self.current_file_idx) {
            Some(path) => fs::read(path)?,
            None => Vec::new(),
        };
        self.pos = 0;
        Ok(())
    }

    fn advance_file(&mut self) -> Result<bool, ReaderError> {
        if self.current_file_idx + 1 >= self.files.len() {
            self.current_file_idx = self.files.len();
            self.data.clear();
            self.pos = 0;
            return Ok(false);
        }
        self.current_file_idx += 1;
        self.load_current_file()?;
        Ok(true)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{journal_path, JournalConfig, JournalWriter};
    use std::io::Write;
    use tempfile::TempDir;

    fn write_test_entries(dir: &Path, count: u64) {
        let mut writer = JournalWriter::open(JournalConfig::new(dir)).unwrap();
        for seq in 1..=count {
            writer
                .write_record(
                    1_000_000_000 + seq as i64,
                    "order_transition",
                    format!("{{\"n\":{}}}", seq).into_bytes(),
                )
                .unwrap();
        }
        writer.sync().unwrap();
    }

    #[test]
    fn test_sequential_read() {
        let tmp = TempDir::new().unwrap();
        write_test_entries(tmp.path(), 50);

        let mut reader = JournalReader::open(tmp.path()).unwrap();
        let entries = reader.read_all_validated().unwrap();
        assert_eq!(entries.len(), 50);
        assert_eq!(entries[0].sequence, 1);
        assert_eq!(reader.last_sequence(), Some(50));
        assert!(reader.corruption_log().is_empty());
    }

    #[test]
    fn test_missing_directory_reads_empty() {
        let tmp = TempDir::new().unwrap();
        let mut reader = JournalReader::open(&tmp.path().join("nope")).unwrap();
        assert!(reader.read_all().unwrap().is_empty());
        assert_eq!(reader.last_sequence(), None);
    }

    #[test]
    fn test_checksum_mismatch_is_an_error() {
        let tmp = TempDir::new().unwrap();
        write_test_entries(tmp.path(), 3);

        let path = journal_path(tmp.path(), 0);
        let mut data = fs::read(&path).unwrap();
        // Last byte of the first payload sits just before its 4-byte checksum.
        let first_len = u32::from_le_bytes(data[..4].try_into().unwrap()) as usize;
        data[4 + first_len - 5] ^= 0xFF;
        fs::write(&path, data).unwrap();

        let mut reader = JournalReader::open(tmp.path()).unwrap();
        assert!(matches!(
            reader.next_entry(),
            Err(ReaderError::ChecksumMismatch { sequence: 1, .. })
        ));
    }

    #[test]
    fn test_torn_tail_is_skipped_and_logged() {
        let tmp = TempDir::new().unwrap();
        write_test_entries(tmp.path(), 4);

        let path = journal_path(tmp.path(), 0);
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[40, 0, 0, 0, 1, 2, 3]).unwrap();

        let mut reader = JournalReader::open(tmp.path()).unwrap();
        let entries = reader.read_all().unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(reader.corruption_log().len(), 1);
        assert_eq!(reader.corruption_log()[0].skipped_bytes, 7);
    }

    #[test]
    fn test_multi_file_read() {
        let tmp = TempDir::new().unwrap();
        let config = JournalConfig {
            max_file_size: 120,
            ..JournalConfig::new(tmp.path())
        };
        let mut writer = JournalWriter::open(config).unwrap();
        for seq in 1..=30 {
            writer
                .write_record(seq as i64, "order_created", b"{}".to_vec())
                .unwrap();
        }
        writer.sync().unwrap();
        assert!(journal_files(tmp.path()).unwrap().len() > 1);

        let mut reader = JournalReader::open(tmp.path()).unwrap();
        let entries = reader.read_all_validated().unwrap();
        assert_eq!(entries.len(), 30);
    }

    #[test]
    fn test_sequence_gap_detection() {
        let entries = vec![
            JournalEntry::new(1, 0, "a", vec![]),
            JournalEntry::new(2, 0, "a", vec![]),
            JournalEntry::new(4, 0, "a", vec![]),
        ];
        match JournalReader::validate_sequences(&entries) {
            Err(ReaderError::SequenceGap { expected, got }) => {
                assert_eq!((expected, got), (3, 4));
            }
            other => panic!("Unexpected result: {:?}", other),
        }
    }
}
