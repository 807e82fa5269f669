//! Cache snapshots of parsed per-source tables
//!
//! After every successful parse the record set is written to
//! `<data_dir>/<source>.json`. Offline mode restores the snapshot instead of
//! fetching, which keeps development and tests off the network. The format
//! only has to round-trip structurally, so plain serde_json is enough.

use crate::error::{PipelineError, Result};
use crate::record::{ModTable, SourceKind};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Snapshot location for one source.
pub fn snapshot_path(data_dir: &Path, kind: SourceKind) -> PathBuf {
    data_dir.join(format!("{}.json", kind.table_name()))
}

/// Write the parsed table for `kind`, replacing any previous snapshot.
pub fn write_snapshot(data_dir: &Path, kind: SourceKind, records: &ModTable) -> Result<()> {
    let path = snapshot_path(data_dir, kind);
    debug!("writing {} snapshot to {}", kind, path.display());
    fs::create_dir_all(data_dir).map_err(|e| snapshot_error(&path, "written", e))?;
    let file = File::create(&path).map_err(|e| snapshot_error(&path, "written", e))?;
    serde_json::to_writer_pretty(BufWriter::new(file), records)
        .map_err(|e| snapshot_error(&path, "written", e))
}

/// Restore the parsed table for `kind` from its snapshot.
pub fn read_snapshot(data_dir: &Path, kind: SourceKind) -> Result<ModTable> {
    let path = snapshot_path(data_dir, kind);
    debug!("reading {} snapshot from {}", kind, path.display());
    let file = File::open(&path).map_err(|e| snapshot_error(&path, "read", e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| snapshot_error(&path, "read", e))
}

fn snapshot_error(
    path: &Path,
    operation: &'static str,
    source: impl std::error::Error + Send + Sync + 'static,
) -> PipelineError {
    PipelineError::Snapshot {
        path: path.to_path_buf(),
        operation,
        source: Box::new(source),
    }
}
