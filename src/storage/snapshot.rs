use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use super::error::SinkError;

/// One pretty-printed JSON array per label at `{output_dir}/{label}.json`.
///
/// Writes go to a temporary file in the same directory which then replaces
/// the destination, so readers never observe a half-written snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotSink {
    output_dir: PathBuf,
}

impl SnapshotSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn path(&self, label: &str) -> PathBuf {
        self.output_dir.join(format!("{}.json", label))
    }

    pub fn write<T: Serialize>(
        &self,
        label: &str,
        collection: &[T],
    ) -> Result<PathBuf, SinkError> {
        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| SinkError::io(&self.output_dir, e))?;

        let final_path = self.path(label);
        let temp_file = NamedTempFile::new_in(&self.output_dir)
            .map_err(|e| SinkError::io(&self.output_dir, e))?;

        let mut writer = BufWriter::new(temp_file);
        serde_json::to_writer_pretty(&mut writer, collection)?;
        writer
            .write_all(b"\n")
            .map_err(|e| SinkError::io(&final_path, e))?;

        let temp_file = writer
            .into_inner()
            .map_err(|e| SinkError::io(&final_path, e.into_error()))?;
        temp_file
            .as_file()
            .sync_data()
            .map_err(|e| SinkError::io(&final_path, e))?;
        temp_file
            .persist(&final_path)
            .map_err(|e| SinkError::Persist {
                path: final_path.clone(),
                source: e.error,
            })?;

        tracing::debug!(
            "Wrote snapshot {} ({} entries)",
            final_path.display(),
            collection.len()
        );
        Ok(final_path)
    }

    /// Read a snapshot back. `None` if it was never written.
    pub fn read<T: DeserializeOwned>(&self, label: &str) -> Result<Option<Vec<T>>, SinkError> {
        let path = self.path(label);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SinkError::io(&path, e)),
        };
        let collection =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| SinkError::Corrupt {
                line: e.line(),
                path,
                source: e,
            })?;
        Ok(Some(collection))
    }
}
