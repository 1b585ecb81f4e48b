//! Ledger persistence
//!
//! Append-only journal of transactions as JSON lines plus a periodic
//! snapshot of balances and stakes. Recovery loads the latest snapshot
//! and replays the journal tail; the result must equal the state at
//! shutdown.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{LedgerError, Result};
use crate::ledger::LedgerSnapshot;
use crate::transaction::Transaction;

const JOURNAL_FILE: &str = "journal.log";
const SNAPSHOT_FILE: &str = "snapshot.json";

fn io_err(e: impl std::fmt::Display) -> LedgerError {
    LedgerError::Journal(e.to_string())
}

/// Append-only transaction journal with snapshot support
pub struct Journal {
    dir: PathBuf,
    writer: BufWriter<File>,
}

impl Journal {
    /// Open (or create) the journal under `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(io_err)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(JOURNAL_FILE))
            .map_err(io_err)?;

        Ok(Journal {
            dir: dir.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    /// Append one transaction as a JSON line.
    pub fn append(&mut self, tx: &Transaction) -> Result<()> {
        let line = serde_json::to_string(tx).map_err(io_err)?;
        writeln!(self.writer, "{}", line).map_err(io_err)?;
        Ok(())
    }

    /// Flush buffered lines to disk.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(io_err)
    }

    /// Write a snapshot atomically and truncate the journal; everything
    /// up to `snapshot.last_seq` is folded into the snapshot file.
    pub fn write_snapshot(&mut self, snapshot: &LedgerSnapshot) -> Result<()> {
        self.flush()?;

        let tmp = self.dir.join(format!("{}.tmp", SNAPSHOT_FILE));
        let json = serde_json::to_vec_pretty(snapshot).map_err(io_err)?;
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, self.dir.join(SNAPSHOT_FILE)).map_err(io_err)?;

        // Journal entries are now redundant; start a fresh file
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.dir.join(JOURNAL_FILE))
            .map_err(io_err)?;
        self.writer = BufWriter::new(file);

        info!(last_seq = snapshot.last_seq, "ledger snapshot written");
        Ok(())
    }

    /// Load the latest snapshot (if any) and the journal tail.
    pub fn recover(dir: &Path) -> Result<(Option<LedgerSnapshot>, Vec<Transaction>)> {
        let snapshot_path = dir.join(SNAPSHOT_FILE);
        let snapshot = if snapshot_path.exists() {
            let bytes = fs::read(&snapshot_path).map_err(io_err)?;
            Some(serde_json::from_slice(&bytes).map_err(io_err)?)
        } else {
            None
        };

        let journal_path = dir.join(JOURNAL_FILE);
        let mut tail = Vec::new();
        if journal_path.exists() {
            let reader = BufReader::new(File::open(&journal_path).map_err(io_err)?);
            for line in reader.lines() {
                let line = line.map_err(io_err)?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Transaction>(&line) {
                    Ok(tx) => tail.push(tx),
                    Err(e) => {
                        // A torn final line after a crash is tolerated
                        warn!(error = %e, "skipping unreadable journal line");
                    }
                }
            }
        }

        Ok((snapshot, tail))
    }
}
