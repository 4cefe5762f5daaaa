//! Exit journal: daily JSON Lines files of confirmed exits.
//!
//! Append mode, one self-contained JSON object per line, flushed per
//! record. A new file is opened when the UTC date changes.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::PersistenceResult;

/// Active writer state for the daily file.
struct ActiveWriter {
    writer: BufWriter<File>,
    date: String,
    records_written: usize,
}

/// Daily-rotating JSON Lines writer.
pub struct ExitJournal {
    base_dir: PathBuf,
    prefix: String,
    active_writer: Option<ActiveWriter>,
}

impl ExitJournal {
    /// Create a journal writing `{base_dir}/{prefix}_{YYYY-MM-DD}.jsonl`.
    pub fn new(base_dir: impl Into<PathBuf>, prefix: impl Into<String>) -> PersistenceResult<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            prefix: prefix.into(),
            active_writer: None,
        })
    }

    /// Path of the file for `date`.
    #[must_use]
    pub fn file_for(&self, date: &str) -> PathBuf {
        self.base_dir.join(format!("{}_{date}.jsonl", self.prefix))
    }

    /// Append one record and flush it to disk.
    pub fn append<T: Serialize>(&mut self, record: &T) -> PersistenceResult<()> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let line = serde_json::to_string(record)?;

        let active = self.writer_for(&today)?;
        writeln!(active.writer, "{line}")?;
        active.writer.flush()?;
        active.records_written += 1;

        debug!(date = %today, "Appended exit record");
        Ok(())
    }

    fn writer_for(&mut self, date: &str) -> PersistenceResult<&mut ActiveWriter> {
        let active = match self.active_writer.take() {
            Some(current) if current.date == date => current,
            stale => {
                if let Some(old) = stale {
                    close_writer(old);
                }
                let filename = self.file_for(date);
                info!(filename = %filename.display(), "Opening exit journal (append mode)");
                let file = OpenOptions::new().create(true).append(true).open(&filename)?;
                ActiveWriter {
                    writer: BufWriter::new(file),
                    date: date.to_string(),
                    records_written: 0,
                }
            }
        };
        Ok(self.active_writer.insert(active))
    }
}

fn close_writer(mut active: ActiveWriter) {
    if let Err(e) = active.writer.flush() {
        warn!(?e, "Failed to flush exit journal on close");
    }
    info!(
        date = %active.date,
        records = active.records_written,
        "Closed exit journal"
    );
}

impl Drop for ExitJournal {
    fn drop(&mut self) {
        if let Some(active) = self.active_writer.take() {
            close_writer(active);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::{BufRead, BufReader};
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Row {
        owner: String,
        received: u64,
    }

    #[test]
    fn test_append_writes_lines() {
        let dir = TempDir::new().unwrap();
        let mut journal = ExitJournal::new(dir.path(), "exits").unwrap();

        journal
            .append(&Row {
                owner: "1".into(),
                received: 10,
            })
            .unwrap();
        journal
            .append(&Row {
                owner: "2".into(),
                received: 20,
            })
            .unwrap();

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let file = File::open(journal.file_for(&today)).unwrap();
        let rows: Vec<Row> = BufReader::new(file)
            .lines()
            .map(|l| serde_json::from_str(&l.unwrap()).unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].received, 20);
    }

    #[test]
    fn test_reopen_appends() {
        let dir = TempDir::new().unwrap();
        for n in 0..2 {
            let mut journal = ExitJournal::new(dir.path(), "exits").unwrap();
            journal
                .append(&Row {
                    owner: n.to_string(),
                    received: n,
                })
                .unwrap();
        }

        let journal = ExitJournal::new(dir.path(), "exits").unwrap();
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let text = std::fs::read_to_string(journal.file_for(&today)).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
