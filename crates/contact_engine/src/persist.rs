use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Failure of durable storage. Fatal to a run: resumability depends on it.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage directory missing or not writable: {path:?}: {message}")]
    Directory { path: PathBuf, message: String },
    #[error("io error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot encode entry for {path:?}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("no checkpoint entry for target {0}")]
    UnknownTarget(String),
    #[error(transparent)]
    Transition(#[from] contact_core::TransitionError),
}

/// Ensure a storage directory exists and is writable; create it if missing.
pub fn ensure_dir(dir: &Path) -> Result<(), StoreError> {
    let fail = |message: String| StoreError::Directory {
        path: dir.to_path_buf(),
        message,
    };
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| fail(e.to_string()))?;
        if !meta.is_dir() {
            return Err(fail("path is not a directory".into()));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| fail(e.to_string()))?;
    }
    NamedTempFile::new_in(dir).map_err(|e| fail(e.to_string()))?;
    Ok(())
}

/// Writes `{dir}/{filename}` through a synced temp file and a rename, so a
/// reader sees either the old or the new content, never a torn write.
#[derive(Debug, Clone)]
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write(&self, filename: &str, content: &[u8]) -> Result<PathBuf, StoreError> {
        let target = self.dir.join(filename);
        let io_err = |source: io::Error| StoreError::Io {
            path: target.clone(),
            source,
        };

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        tmp.write_all(content).map_err(io_err)?;
        tmp.flush().map_err(io_err)?;
        tmp.as_file_mut().sync_all().map_err(io_err)?;
        tmp.persist(&target).map_err(|e| io_err(e.error))?;
        Ok(target)
    }

    pub fn write_json<T: Serialize>(&self, filename: &str, value: &T) -> Result<PathBuf, StoreError> {
        let content = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Encode {
            path: self.dir.join(filename),
            source,
        })?;
        self.write(filename, &content)
    }
}

/// A JSON entry file that failed to decode.
#[derive(Debug)]
pub(crate) struct CorruptEntry {
    pub path: PathBuf,
    pub message: String,
}

/// Read every `*.json` file in `dir`, sorted by file name.
pub(crate) fn read_json_entries<T: DeserializeOwned>(
    dir: &Path,
) -> Result<(Vec<T>, Vec<CorruptEntry>), StoreError> {
    let io_err = |source: io::Error| StoreError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(io_err)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("json"))
        .collect();
    paths.sort();

    let mut entries = Vec::with_capacity(paths.len());
    let mut corrupt = Vec::new();
    for path in paths {
        let content = fs::read(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        match serde_json::from_slice(&content) {
            Ok(entry) => entries.push(entry),
            Err(err) => corrupt.push(CorruptEntry {
                path,
                message: err.to_string(),
            }),
        }
    }
    Ok((entries, corrupt))
}

/// Move an undecodable file aside as `<name>.bak` so it stops shadowing the key.
pub(crate) fn quarantine(entry: &CorruptEntry) -> Result<PathBuf, StoreError> {
    let mut backup = entry.path.clone().into_os_string();
    backup.push(".bak");
    let backup = PathBuf::from(backup);
    fs::rename(&entry.path, &backup).map_err(|source| StoreError::Io {
        path: entry.path.clone(),
        source,
    })?;
    Ok(backup)
}
