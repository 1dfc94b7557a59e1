use std::fs;
use std::io::{self, Cursor, Read, Seek};
use std::path::Path;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use chrono::Utc;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use tempfile::Builder;
use tracing::debug;
use zip::ZipArchive;

use crate::error::WiscatError;

pub const MANIFEST_FILE_NAME: &str = ".wiscat-cache.json";

/// Written next to the extracted records after a successful cache run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheManifest {
    pub source_url: String,
    pub downloaded_at: String,
    pub file_count: usize,
    pub tool: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleFormat {
    /// WIS2 GDC archive.
    Zip,
    /// WIS1 catalogue dump.
    TarGz,
}

impl BundleFormat {
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or_default();
        if path.ends_with(".tar.gz") || path.ends_with(".tgz") {
            BundleFormat::TarGz
        } else {
            BundleFormat::Zip
        }
    }
}

/// Replaces the contents of `target_dir` with the records in `archive`.
///
/// The archive is unpacked into a sibling temporary directory first, so a
/// corrupt archive leaves the previous cache in place.
pub fn install_bundle(
    archive: &[u8],
    format: BundleFormat,
    target_dir: &Utf8Path,
    source_url: &str,
) -> Result<CacheManifest, WiscatError> {
    let target_dir = resolve_target(target_dir)?;
    let parent = target_dir.parent().map(Utf8Path::to_path_buf).ok_or_else(|| {
        WiscatError::InvalidArgument(format!("cannot cache into {target_dir}"))
    })?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| WiscatError::Filesystem(format!("create {parent}: {err}")))?;
    let temp_dir = Builder::new()
        .prefix(".wiscat-cache")
        .tempdir_in(parent.as_std_path())
        .map_err(|err| WiscatError::Filesystem(err.to_string()))?;
    if temp_dir.path().starts_with(target_dir.as_std_path()) {
        return Err(WiscatError::InvalidArgument(format!(
            "cache directory {target_dir} contains its own staging directory"
        )));
    }

    debug!("extracting bundle to {}", temp_dir.path().display());
    let file_count = match format {
        BundleFormat::Zip => extract_zip(Cursor::new(archive), temp_dir.path())?,
        BundleFormat::TarGz => extract_tar_gz(archive, temp_dir.path())?,
    };

    replace_dir(temp_dir.path(), target_dir.as_std_path())
        .map_err(|err| WiscatError::Filesystem(format!("replace {target_dir}: {err}")))?;

    let manifest = CacheManifest {
        source_url: source_url.to_string(),
        downloaded_at: Utc::now().to_rfc3339(),
        file_count,
        tool: format!("wiscat/{}", env!("CARGO_PKG_VERSION")),
    };
    write_manifest(&target_dir.join(MANIFEST_FILE_NAME), &manifest)?;
    Ok(manifest)
}

/// Absolute, `.`/`..`-free form of `target_dir`. Refuses the working
/// directory and its ancestors, which the cache replacement would delete.
pub fn resolve_target(target_dir: &Utf8Path) -> Result<Utf8PathBuf, WiscatError> {
    let cwd = std::env::current_dir()
        .and_then(fs::canonicalize)
        .map_err(|err| WiscatError::Filesystem(format!("current directory: {err}")))?;
    let cwd = Utf8PathBuf::from_path_buf(cwd).map_err(|path| {
        WiscatError::Filesystem(format!("current directory is not UTF-8: {}", path.display()))
    })?;

    let mut resolved = if target_dir.is_absolute() {
        Utf8PathBuf::new()
    } else {
        cwd.clone()
    };
    for component in target_dir.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                resolved.pop();
            }
            other => resolved.push(other.as_str()),
        }
    }
    if let Ok(canonical) = fs::canonicalize(resolved.as_std_path())
        && let Ok(canonical) = Utf8PathBuf::from_path_buf(canonical)
    {
        resolved = canonical;
    }

    if resolved.parent().is_none() || cwd.starts_with(&resolved) {
        return Err(WiscatError::InvalidArgument(format!(
            "refusing to replace {target_dir}: it is the working directory or one of its parents"
        )));
    }
    Ok(resolved)
}

/// Extracts a gzip-compressed tar archive below `target_dir`, returning the
/// number of files written. Entries other than files and directories are
/// skipped.
pub fn extract_tar_gz(archive: &[u8], target_dir: &Path) -> Result<usize, WiscatError> {
    let mut archive = tar::Archive::new(GzDecoder::new(archive));
    let entries = archive
        .entries()
        .map_err(|err| WiscatError::Archive(err.to_string()))?;

    let mut file_count = 0;
    for entry in entries {
        let mut entry = entry.map_err(|err| WiscatError::Archive(err.to_string()))?;
        let kind = entry.header().entry_type();
        if !kind.is_file() && !kind.is_dir() {
            debug!("skipping tar entry of type {kind:?}");
            continue;
        }
        let unpacked = entry
            .unpack_in(target_dir)
            .map_err(|err| WiscatError::Archive(err.to_string()))?;
        if !unpacked {
            let name = entry
                .path()
                .map(|path| path.display().to_string())
                .unwrap_or_default();
            return Err(WiscatError::Archive(format!(
                "tar entry path traversal detected: {name}"
            )));
        }
        if kind.is_file() {
            file_count += 1;
        }
    }
    Ok(file_count)
}

/// Extracts every entry of a zip archive below `target_dir`, returning the
/// number of files written.
pub fn extract_zip<R: Read + Seek>(reader: R, target_dir: &Path) -> Result<usize, WiscatError> {
    let mut archive = ZipArchive::new(reader).map_err(|err| WiscatError::Archive(err.to_string()))?;

    let mut file_count = 0;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| WiscatError::Archive(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(WiscatError::Archive(format!(
                    "zip entry path traversal detected: {}",
                    entry.name()
                )));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| WiscatError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| WiscatError::Filesystem(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&entry_path)
            .map_err(|err| WiscatError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| WiscatError::Archive(err.to_string()))?;
        file_count += 1;
    }
    Ok(file_count)
}

pub fn read_manifest(cache_dir: &Utf8Path) -> Result<Option<CacheManifest>, WiscatError> {
    let path = cache_dir.join(MANIFEST_FILE_NAME);
    if !path.as_std_path().exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| WiscatError::Filesystem(err.to_string()))?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|err| WiscatError::Filesystem(format!("corrupt manifest {path}: {err}")))
}

fn write_manifest(path: &Utf8Path, manifest: &CacheManifest) -> Result<(), WiscatError> {
    let tmp_path = path.with_extension("json.tmp");
    let content = serde_json::to_vec_pretty(manifest)
        .map_err(|err| WiscatError::Filesystem(err.to_string()))?;
    fs::write(tmp_path.as_std_path(), &content)
        .map_err(|err| WiscatError::Filesystem(err.to_string()))?;
    fs::rename(tmp_path.as_std_path(), path.as_std_path())
        .map_err(|err| WiscatError::Filesystem(err.to_string()))?;
    Ok(())
}

fn replace_dir(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        fs::remove_dir_all(to)?;
    }
    fs::rename(from, to)
}
