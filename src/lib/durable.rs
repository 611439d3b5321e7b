//! Defensive loading and atomic writing of the JSON snapshots (user
//! directory, statistics artifact).
//!
//! Loading never fails: a missing file yields the default, an undecodable
//! file is copied aside to a timestamped quarantine path first and then
//! yields the default. The returned [`LoadStatus`] says which of those
//! happened.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::Local;
use serde::{Serialize, de::DeserializeOwned};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{LeadError, Result};

const QUARANTINE_MARKER: &str = "corrupt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Parsed,
    Missing,
    /// The file could not be decoded. `backup` is the quarantine copy, or
    /// `None` when even the copy failed.
    Corrupt {
        backup: Option<PathBuf>,
        reason: String,
    },
    /// Transient I/O failure; the file was left untouched.
    Unreadable { reason: String },
}

impl LoadStatus {
    /// Maps a defective status onto the error taxonomy for callers that want
    /// to report it.
    pub fn defect(&self, path: &Path) -> Option<LeadError> {
        match self {
            Self::Parsed | Self::Missing => None,
            Self::Corrupt { reason, .. } => Some(LeadError::Corrupt {
                path: path.to_path_buf(),
                reason: reason.clone(),
            }),
            Self::Unreadable { reason } => Some(LeadError::Io(io::Error::other(reason.clone()))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Loaded<T> {
    pub value: T,
    pub status: LoadStatus,
}

impl<T> Loaded<T> {
    pub fn into_value(self) -> T {
        self.value
    }
}

pub fn load<T: DeserializeOwned>(path: &Path, default: T) -> Loaded<T> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!("{} does not exist yet; using default", path.display());
            return Loaded {
                value: default,
                status: LoadStatus::Missing,
            };
        }
        Err(err) => {
            warn!(
                target: "leadbot.durable",
                "failed to read {}: {}",
                path.display(),
                err
            );
            return Loaded {
                value: default,
                status: LoadStatus::Unreadable {
                    reason: err.to_string(),
                },
            };
        }
    };

    match serde_json::from_slice::<T>(&bytes) {
        Ok(value) => Loaded {
            value,
            status: LoadStatus::Parsed,
        },
        Err(err) => {
            let reason = err.to_string();
            let backup = match quarantine(path) {
                Ok(backup) => {
                    warn!(
                        target: "leadbot.durable",
                        "{} is corrupt ({}); quarantined to {}",
                        path.display(),
                        reason,
                        backup.display()
                    );
                    Some(backup)
                }
                Err(copy_err) => {
                    warn!(
                        target: "leadbot.durable",
                        "{} is corrupt ({}) and could not be quarantined: {}",
                        path.display(),
                        reason,
                        copy_err
                    );
                    None
                }
            };
            Loaded {
                value: default,
                status: LoadStatus::Corrupt { backup, reason },
            }
        }
    }
}

/// Copies `path` next to itself as `<name>.corrupt-<YYYYmmdd-HHMMSS>[-N]`
/// and returns the copy's path. The original is left in place.
pub fn quarantine(path: &Path) -> Result<PathBuf> {
    let backup = quarantine_path(path);
    fs::copy(path, &backup)?;
    Ok(backup)
}

fn quarantine_path(path: &Path) -> PathBuf {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    let base = format!(
        "{name}.{QUARANTINE_MARKER}-{}",
        Local::now().format("%Y%m%d-%H%M%S")
    );
    let mut candidate = dir.join(&base);
    let mut counter = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{base}-{counter}"));
        counter += 1;
    }
    candidate
}

/// Replaces `path` with `payload` through a temp file in the same
/// directory, so readers observe either the old or the new document.
pub fn write_atomic(path: &Path, payload: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .ok_or_else(|| LeadError::Validation(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(payload)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| LeadError::Io(err.error))?;
    Ok(())
}

pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut payload = serde_json::to_vec_pretty(value)?;
    payload.push(b'\n');
    write_atomic(path, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn quarantine_copies(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.contains(".corrupt-"))
                    .unwrap_or(false)
            })
            .collect()
    }

    #[test]
    fn missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Loaded<BTreeMap<String, u64>> =
            load(&dir.path().join("absent.json"), BTreeMap::new());
        assert!(loaded.value.is_empty());
        assert_eq!(loaded.status, LoadStatus::Missing);
        assert!(quarantine_copies(dir.path()).is_empty());
    }

    #[test]
    fn corrupt_file_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        fs::write(&path, b"{\"123\": {\"platform\": \"yt\"").unwrap();

        let loaded: Loaded<BTreeMap<String, serde_json::Value>> = load(&path, BTreeMap::new());
        assert!(loaded.value.is_empty());
        let LoadStatus::Corrupt { backup, .. } = &loaded.status else {
            panic!("expected corrupt status, got {:?}", loaded.status);
        };
        let backup = backup.clone().expect("quarantine copy");
        assert_eq!(
            fs::read(&backup).unwrap(),
            b"{\"123\": {\"platform\": \"yt\"".to_vec()
        );
        assert!(matches!(
            loaded.status.defect(&path),
            Some(LeadError::Corrupt { .. })
        ));
    }

    #[test]
    fn invalid_utf8_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        fs::write(&path, [0xff, 0xfe, 0x00, 0x7b]).unwrap();

        let loaded: Loaded<serde_json::Value> = load(&path, serde_json::Value::Null);
        assert!(loaded.value.is_null());
        assert!(matches!(loaded.status, LoadStatus::Corrupt { backup: Some(_), .. }));
        assert_eq!(quarantine_copies(dir.path()).len(), 1);
    }

    #[test]
    fn repeated_quarantine_gets_unique_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        fs::write(&path, b"not json").unwrap();

        let first = quarantine(&path).unwrap();
        let second = quarantine(&path).unwrap();
        assert_ne!(first, second);
        assert_eq!(quarantine_copies(dir.path()).len(), 2);
    }

    #[test]
    fn atomic_write_replaces_content_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        fs::write(&path, b"old").unwrap();

        let mut doc = BTreeMap::new();
        doc.insert("total".to_string(), 3u64);
        write_json_atomic(&path, &doc).unwrap();

        let loaded: Loaded<BTreeMap<String, u64>> = load(&path, BTreeMap::new());
        assert_eq!(loaded.status, LoadStatus::Parsed);
        assert_eq!(loaded.value.get("total"), Some(&3));
        let entries = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }
}
