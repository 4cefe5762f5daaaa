//! Exited ledger.
//!
//! Presence of an entry vetoes re-admission of that `(owner, asset)`
//! identity. Entries are keyed on identity only, so a later re-buy of the
//! same asset stays vetoed.
//!
//! The file form is JSON Lines in append mode: each upsert appends one
//! line and loading keeps the last line per identity. A torn final line
//! from an interrupted write is skipped, not fatal, and opening the file
//! terminates it so later appends start on a fresh line.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use autoexit_core::{Address, OwnerId, PositionKey};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PersistenceError, PersistenceResult};

/// One exited identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitedLedgerEntry {
    pub owner: OwnerId,
    pub asset: Address,
    pub exited_at: DateTime<Utc>,
}

impl ExitedLedgerEntry {
    #[must_use]
    pub fn new(key: &PositionKey, exited_at: DateTime<Utc>) -> Self {
        Self {
            owner: key.owner.clone(),
            asset: key.asset.clone(),
            exited_at,
        }
    }

    #[must_use]
    pub fn key(&self) -> PositionKey {
        PositionKey::new(self.owner.clone(), self.asset.clone())
    }
}

/// Durable exited-identity store.
pub trait ExitedLedger: Send + Sync {
    /// Insert or overwrite the entry for this identity.
    fn upsert(&self, entry: &ExitedLedgerEntry) -> PersistenceResult<()>;

    /// All entries, one per identity.
    fn load_all(&self) -> PersistenceResult<Vec<ExitedLedgerEntry>>;
}

/// JSON Lines file ledger.
pub struct JsonlExitedLedger {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlExitedLedger {
    /// Open (creating if needed) the ledger at `path`.
    pub fn open(path: impl AsRef<Path>) -> PersistenceResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if has_torn_tail(&path)? {
            // Terminate the torn line so the next entry starts on its own.
            warn!(path = %path.display(), "Exited ledger ends mid-line, terminating it");
            file.write_all(b"\n")?;
            file.sync_data()?;
        }
        info!(path = %path.display(), "Opened exited ledger (append mode)");

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the file with one line per identity.
    pub fn compact(&self) -> PersistenceResult<usize> {
        let entries = self.load_all()?;
        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            for entry in &entries {
                writeln!(out, "{}", serde_json::to_string(entry)?)?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }

        let mut writer = self.writer.lock();
        writer.flush()?;
        std::fs::rename(&tmp, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        *writer = BufWriter::new(file);

        debug!(entries = entries.len(), "Compacted exited ledger");
        Ok(entries.len())
    }
}

/// Non-empty and not ending in a newline.
fn has_torn_tail(path: &Path) -> std::io::Result<bool> {
    let mut file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

impl ExitedLedger for JsonlExitedLedger {
    fn upsert(&self, entry: &ExitedLedgerEntry) -> PersistenceResult<()> {
        let line = serde_json::to_string(entry)?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{line}")?;
        writer.flush()?;
        writer.get_ref().sync_data()?;
        Ok(())
    }

    fn load_all(&self) -> PersistenceResult<Vec<ExitedLedgerEntry>> {
        self.writer.lock().flush()?;

        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut latest: HashMap<PositionKey, ExitedLedgerEntry> = HashMap::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ExitedLedgerEntry>(&line) {
                Ok(entry) => {
                    latest.insert(entry.key(), entry);
                }
                Err(e) => {
                    warn!(line = line_no + 1, error = %e, "Skipping malformed ledger line");
                }
            }
        }

        let mut entries: Vec<_> = latest.into_values().collect();
        entries.sort_by(|a, b| a.exited_at.cmp(&b.exited_at));
        Ok(entries)
    }
}

/// In-memory ledger for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryExitedLedger {
    entries: Mutex<HashMap<PositionKey, ExitedLedgerEntry>>,
    fail_writes: Mutex<bool>,
}

impl MemoryExitedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent upserts fail.
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock() = fail;
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn contains(&self, key: &PositionKey) -> bool {
        self.entries.lock().contains_key(key)
    }
}

impl ExitedLedger for MemoryExitedLedger {
    fn upsert(&self, entry: &ExitedLedgerEntry) -> PersistenceResult<()> {
        if *self.fail_writes.lock() {
            return Err(PersistenceError::Unavailable("writes disabled".to_string()));
        }
        self.entries.lock().insert(entry.key(), entry.clone());
        Ok(())
    }

    fn load_all(&self) -> PersistenceResult<Vec<ExitedLedgerEntry>> {
        Ok(self.entries.lock().values().cloned().collect())
    }
}
