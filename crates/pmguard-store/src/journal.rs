//! JSON Lines journal files.
//!
//! Each line is one complete JSON record, so an interrupted write only
//! costs the last line. Corrupt lines are skipped on read.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::StoreResult;

/// Append-only JSON Lines writer.
pub struct JsonLinesJournal {
    path: PathBuf,
    writer: BufWriter<File>,
    records_written: usize,
}

impl JsonLinesJournal {
    /// Open (or create) the journal in append mode.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        info!(path = %path.display(), "Opening JSON Lines journal (append mode)");

        // Append mode never truncates existing data
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            records_written: 0,
        })
    }

    /// Append one record and flush it to the OS.
    pub fn append<T: Serialize>(&mut self, record: &T) -> StoreResult<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.records_written += 1;
        Ok(())
    }

    /// Append a full set of records after a line break, so a torn line
    /// left by an earlier failed write stays isolated.
    pub fn append_snapshot<'a, T, I>(&mut self, records: I) -> StoreResult<()>
    where
        T: Serialize + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        self.writer.write_all(b"\n")?;
        for record in records {
            serde_json::to_writer(&mut self.writer, record)?;
            self.writer.write_all(b"\n")?;
            self.records_written += 1;
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records_written(&self) -> usize {
        self.records_written
    }

    /// Read every parseable record. A missing file reads as empty.
    pub fn read_all<T: DeserializeOwned>(path: impl AsRef<Path>) -> StoreResult<Vec<T>> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    path = %path.display(),
                    line = idx + 1,
                    error = %e,
                    "Skipping corrupt journal line"
                ),
            }
        }
        debug!(path = %path.display(), count = records.len(), "Read journal");
        Ok(records)
    }

    /// Atomically replace the journal contents with `records`.
    pub fn rewrite<T: Serialize>(path: impl AsRef<Path>, records: &[T]) -> StoreResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("jsonl.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            for record in records {
                serde_json::to_writer(&mut writer, record)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
