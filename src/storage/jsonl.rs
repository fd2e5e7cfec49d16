use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::SinkError;

/// Append-only JSON Lines stream, one file per label:
/// `{output_dir}/{label}_events.jsonl`.
///
/// Existing lines are never rewritten or truncated, and records are not
/// deduplicated, so resubmitting a window that already succeeded appends its
/// records a second time.
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    output_dir: PathBuf,
}

impl JsonLinesSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn path(&self, label: &str) -> PathBuf {
        self.output_dir.join(format!("{}_events.jsonl", label))
    }

    /// Append one line per record and sync the file before returning.
    pub fn append<T: Serialize>(&self, label: &str, records: &[T]) -> Result<usize, SinkError> {
        if records.is_empty() {
            return Ok(0);
        }

        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| SinkError::io(&self.output_dir, e))?;

        let path = self.path(label);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| SinkError::io(&path, e))?;

        // Serialize the whole batch first so a bad record never leaves a
        // partial batch behind.
        let mut buffer = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buffer, record)?;
            buffer.push(b'\n');
        }

        let mut writer = BufWriter::new(file);
        writer
            .write_all(&buffer)
            .map_err(|e| SinkError::io(&path, e))?;
        let file = writer
            .into_inner()
            .map_err(|e| SinkError::io(&path, e.into_error()))?;
        file.sync_data().map_err(|e| SinkError::io(&path, e))?;

        Ok(records.len())
    }

    /// Read every record in file order. A missing stream reads as empty.
    pub fn read<T: DeserializeOwned>(&self, label: &str) -> Result<Vec<T>, SinkError> {
        let path = self.path(label);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SinkError::io(&path, e)),
        };
        read_lines(&path, file)
    }
}

fn read_lines<T: DeserializeOwned>(path: &Path, file: File) -> Result<Vec<T>, SinkError> {
    let mut records = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| SinkError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|source| SinkError::Corrupt {
            path: path.to_path_buf(),
            line: i + 1,
            source,
        })?;
        records.push(record);
    }
    Ok(records)
}
