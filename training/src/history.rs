//! Per-epoch CSV training logs.
//!
//! Columns follow the Keras `CSVLogger` layout (`epoch,loss,acc,val_loss,val_acc`)
//! so existing plotting scripts keep working. Logs are appended to; the header
//! is only written when the file is new or empty.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// One row of the training log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub loss: f64,
    pub acc: f64,
    pub val_loss: f64,
    pub val_acc: f64,
}

/// Appending CSV writer for [`EpochRecord`]s.
pub struct EpochLogger {
    writer: csv::Writer<File>,
    path: PathBuf,
}

impl EpochLogger {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let needs_header = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log {}", path.display()))?;
        let writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        Ok(Self {
            writer,
            path: path.to_path_buf(),
        })
    }

    /// Append one row and flush it to disk.
    pub fn log(&mut self, record: &EpochRecord) -> anyhow::Result<()> {
        self.writer
            .serialize(record)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        self.writer
            .flush()
            .with_context(|| format!("Failed to flush {}", self.path.display()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read every row of a training log.
pub fn read_history(path: &Path) -> anyhow::Result<Vec<EpochRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open log {}", path.display()))?;
    reader
        .deserialize()
        .collect::<Result<Vec<EpochRecord>, _>>()
        .with_context(|| format!("Failed to parse log {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(epoch: usize) -> EpochRecord {
        EpochRecord {
            epoch,
            loss: 0.5 / epoch as f64,
            acc: 0.6,
            val_loss: 0.7,
            val_acc: 0.55,
        }
    }

    #[test]
    fn test_header_and_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.log");
        let mut logger = EpochLogger::open(&path).unwrap();
        logger.log(&record(1)).unwrap();
        logger.log(&record(2)).unwrap();
        drop(logger);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("epoch,loss,acc,val_loss,val_acc\n"));
        assert_eq!(read_history(&path).unwrap(), vec![record(1), record(2)]);
    }

    #[test]
    fn test_reopen_appends_without_second_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("run.log");
        EpochLogger::open(&path).unwrap().log(&record(1)).unwrap();
        EpochLogger::open(&path).unwrap().log(&record(2)).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("epoch,").count(), 1);
        assert_eq!(read_history(&path).unwrap().len(), 2);
    }
}
