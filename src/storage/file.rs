//! Append-only journal storage backend.
//!
//! Every committed [`WriteBatch`] becomes one line of JSON in a single
//! journal file:
//!
//! ```text
//! {"ops":[{"op":"Put",...},{"op":"Append",...}],"checksum":"<blake3 hex>"}
//! ```
//!
//! A batch is durable once its newline is on disk. On open the journal is
//! replayed into memory; a damaged final frame (a torn write) is cut off,
//! while a damaged frame anywhere else fails the open.
//!
//! A failed write is trimmed off immediately. If the trim fails too, the
//! store goes offline for good: one more frame would land behind the
//! partial bytes and merge with them into a line that never decodes.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::{BatchOp, EntityKey, LedgerStore, StoreError, Tables, WriteBatch};
use crate::crypto::CryptoUtils;
use crate::types::{EntityKind, Sequence};

/// On-disk form of one batch op; payloads are base64.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op")]
enum FrameOp {
    Put {
        kind: EntityKind,
        id: String,
        value: String,
    },
    Delete {
        kind: EntityKind,
        id: String,
    },
    Append {
        sequence: Sequence,
        entry: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    ops: Vec<FrameOp>,
    checksum: String,
}

impl Frame {
    fn encode(batch: &WriteBatch) -> Result<Vec<u8>, StoreError> {
        let ops: Vec<FrameOp> = batch
            .ops()
            .iter()
            .map(|op| match op {
                BatchOp::Put { key, value } => FrameOp::Put {
                    kind: key.kind,
                    id: key.id.clone(),
                    value: STANDARD.encode(value),
                },
                BatchOp::Delete { key } => FrameOp::Delete {
                    kind: key.kind,
                    id: key.id.clone(),
                },
                BatchOp::Append { sequence, entry } => FrameOp::Append {
                    sequence: *sequence,
                    entry: STANDARD.encode(entry),
                },
            })
            .collect();

        let checksum = Self::checksum(&ops)?;
        let mut line = serde_json::to_vec(&Frame { ops, checksum }).map_err(std::io::Error::other)?;
        line.push(b'\n');
        Ok(line)
    }

    fn decode(line: &[u8], offset: u64) -> Result<WriteBatch, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt { offset, reason };

        let frame: Frame =
            serde_json::from_slice(line).map_err(|e| corrupt(format!("undecodable frame: {e}")))?;
        if Self::checksum(&frame.ops)? != frame.checksum {
            return Err(corrupt("checksum mismatch".to_string()));
        }

        let mut batch = WriteBatch::new();
        for op in frame.ops {
            match op {
                FrameOp::Put { kind, id, value } => {
                    let value = STANDARD
                        .decode(value)
                        .map_err(|e| corrupt(format!("bad payload: {e}")))?;
                    batch.put(EntityKey::new(kind, id), value);
                }
                FrameOp::Delete { kind, id } => {
                    batch.delete(EntityKey::new(kind, id));
                }
                FrameOp::Append { sequence, entry } => {
                    let entry = STANDARD
                        .decode(entry)
                        .map_err(|e| corrupt(format!("bad payload: {e}")))?;
                    batch.append(sequence, entry);
                }
            }
        }
        Ok(batch)
    }

    fn checksum(ops: &[FrameOp]) -> Result<String, StoreError> {
        let bytes = serde_json::to_vec(ops).map_err(std::io::Error::other)?;
        Ok(CryptoUtils::hash_to_hex(&CryptoUtils::hash(&bytes)))
    }
}

/// Journal-backed ledger store.
///
/// Reads are served from an in-memory index rebuilt at open; writes append
/// one frame per batch and optionally `fsync` before acknowledging.
pub struct FileStore {
    path: PathBuf,
    journal: Mutex<File>,
    tables: RwLock<Tables>,
    sync_writes: bool,
    /// Set once the journal ends in bytes that could not be trimmed
    failed: AtomicBool,
}

impl FileStore {
    /// Open (or create) the journal at `path` and replay it.
    pub fn open(path: impl AsRef<Path>, sync_writes: bool) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        let (tables, valid_len, frames) = Self::replay(&contents)?;
        if valid_len < contents.len() as u64 {
            warn!(
                path = %path.display(),
                discarded = contents.len() as u64 - valid_len,
                "truncating torn journal tail"
            );
            file.set_len(valid_len)?;
            file.sync_data()?;
        }

        info!(path = %path.display(), frames, "journal opened");

        Ok(Self {
            path,
            journal: Mutex::new(file),
            tables: RwLock::new(tables),
            sync_writes,
            failed: AtomicBool::new(false),
        })
    }

    /// Path of the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rebuild tables from journal bytes.
    ///
    /// Returns the tables, the length of the valid prefix, and the number of
    /// frames applied.
    fn replay(contents: &[u8]) -> Result<(Tables, u64, usize), StoreError> {
        let mut tables = Tables::default();
        let mut offset = 0usize;
        let mut frames = 0usize;

        while offset < contents.len() {
            let rest = &contents[offset..];
            let (line, consumed, terminated) = match rest.iter().position(|b| *b == b'\n') {
                Some(end) => (&rest[..end], end + 1, true),
                None => (rest, rest.len(), false),
            };
            let is_last = offset + consumed == contents.len();

            let decoded = Frame::decode(line, offset as u64).and_then(|batch| {
                tables.validate(&batch)?;
                Ok(batch)
            });

            match decoded {
                Ok(batch) if terminated => {
                    tables.apply(batch);
                    frames += 1;
                }
                Ok(_) => {
                    // Complete frame without its newline: never acknowledged.
                    return Ok((tables, offset as u64, frames));
                }
                Err(e) if is_last => {
                    debug!(offset, error = %e, "discarding damaged final frame");
                    return Ok((tables, offset as u64, frames));
                }
                Err(e) => {
                    error!(offset, error = %e, "journal corrupted before its tail");
                    return Err(e);
                }
            }

            offset += consumed;
        }

        Ok((tables, offset as u64, frames))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables.read().map_err(|_| StoreError::Offline)
    }

    /// Whether a damaged frame has taken the store offline.
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }
}

fn write_frame(file: &mut File, line: &[u8], sync: bool) -> std::io::Result<()> {
    file.write_all(line)?;
    file.flush()?;
    if sync {
        file.sync_data()?;
    }
    Ok(())
}

impl LedgerStore for FileStore {
    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        // The journal lock orders commits; tables follow journal order.
        let mut journal = self.journal.lock().map_err(|_| StoreError::Offline)?;
        if self.is_failed() {
            return Err(StoreError::Offline);
        }
        self.read()?.validate(&batch)?;

        let line = Frame::encode(&batch)?;
        let start = journal.metadata()?.len();

        if let Err(e) = write_frame(&mut journal, &line, self.sync_writes) {
            error!(path = %self.path.display(), error = %e, "journal write failed");
            if let Err(truncate_err) = journal.set_len(start) {
                self.failed.store(true, Ordering::SeqCst);
                error!(
                    path = %self.path.display(),
                    error = %truncate_err,
                    "could not trim partial frame, journal closed for writes"
                );
            }
            return Err(e.into());
        }

        debug!(ops = batch.len(), bytes = line.len(), "batch appended to journal");
        self.tables
            .write()
            .map_err(|_| StoreError::Offline)?
            .apply(batch);
        Ok(())
    }

    fn get(&self, key: &EntityKey) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.read()?.get(key))
    }

    fn entities(&self, kind: EntityKind) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        Ok(self.read()?.entities(kind))
    }

    fn scan_log(&self, from: Sequence) -> Result<Vec<(Sequence, Vec<u8>)>, StoreError> {
        Ok(self.read()?.scan_log(from))
    }
}
