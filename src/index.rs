use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::bundle::MANIFEST_FILE_NAME;
use crate::error::WiscatError;
use crate::record::{MetadataRecord, RecordFormat};

#[derive(Debug, Clone)]
pub enum RecordSource {
    Directory(PathBuf),
    Files(Vec<PathBuf>),
}

/// A file that could not be turned into a record. The batch carries on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseWarning {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct LoadedRecords {
    pub records: Vec<MetadataRecord>,
    pub warnings: Vec<ParseWarning>,
}

pub fn load_records(source: &RecordSource) -> Result<LoadedRecords, WiscatError> {
    let files = match source {
        RecordSource::Directory(dir) => record_files(dir)?,
        RecordSource::Files(files) => files.clone(),
    };

    let total = files.len();
    let mut loaded = LoadedRecords::default();
    for (index, path) in files.iter().enumerate() {
        debug!(
            "analyzing {} ({}/{total})",
            path.display(),
            index + 1
        );
        match MetadataRecord::from_path(path) {
            Ok(record) => loaded.records.push(record),
            Err(err) => loaded.warnings.push(ParseWarning {
                path: path.display().to_string(),
                reason: err.to_string(),
            }),
        }
    }
    debug!(
        "loaded {} records, skipped {}",
        loaded.records.len(),
        loaded.warnings.len()
    );
    Ok(loaded)
}

/// Reads a JSON array of record file paths.
pub fn load_file_list(path: &Path) -> Result<Vec<PathBuf>, WiscatError> {
    let content = fs::read_to_string(path).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => {
            WiscatError::NotFound(format!("file list {}", path.display()))
        }
        _ => WiscatError::Filesystem(format!("read {}: {err}", path.display())),
    })?;
    serde_json::from_str::<Vec<PathBuf>>(&content).map_err(|err| {
        WiscatError::InvalidArgument(format!("file list {} is not a JSON array of paths: {err}", path.display()))
    })
}

/// Every `.json` and `.xml` file under `root`, sorted by path.
pub fn record_files(root: &Path) -> Result<Vec<PathBuf>, WiscatError> {
    if !root.is_dir() {
        return Err(WiscatError::NotFound(format!(
            "metadata directory {}",
            root.display()
        )));
    }
    debug!("walking directory {}", root.display());
    let mut files = walk_dir(root)?
        .into_iter()
        .filter(|path| path.is_file())
        .filter(|path| RecordFormat::from_path(path).is_some())
        .filter(|path| path.file_name().map(|name| name != MANIFEST_FILE_NAME).unwrap_or(true))
        .collect::<Vec<_>>();
    files.sort();
    Ok(files)
}

fn walk_dir(root: &Path) -> Result<Vec<PathBuf>, WiscatError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path)
            .map_err(|err| WiscatError::Filesystem(format!("read {}: {err}", path.display())))?;
        for entry in entries {
            let entry = entry.map_err(|err| WiscatError::Filesystem(err.to_string()))?;
            let path = entry.path();
            // Symlinked directories are not descended into.
            let file_type = entry
                .file_type()
                .map_err(|err| WiscatError::Filesystem(format!("{}: {err}", path.display())))?;
            if file_type.is_dir() {
                stack.push(path.clone());
            }
            items.push(path);
        }
    }
    Ok(items)
}
