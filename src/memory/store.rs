//! On-disk layout of the memory layers.
//!
//! Each layer is one JSON file `{dir}/{layer}.json` holding a versioned
//! envelope. Saves write a sibling temp file and rename it over the old one,
//! so a crash mid-flush leaves the previously committed file intact. A
//! `memory.lock` file holding the writer's PID enforces one writer per
//! directory; it is published complete by hard link, never written in place.

use std::io::Write;
use std::path::{Path, PathBuf};

use miette::Diagnostic;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::layers::LayerKind;

/// On-disk schema version of every layer envelope.
pub const SCHEMA_VERSION: u32 = 1;

const LOCK_FILE: &str = "memory.lock";

#[derive(Debug, Error, Diagnostic)]
pub enum MemoryError {
    #[error("memory I/O failed at {path}")]
    #[diagnostic(
        code(gridsynth::memory::io),
        help("Check that the memory directory exists and is writable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize memory layer {path}: {message}")]
    #[diagnostic(
        code(gridsynth::memory::serialize),
        help("The layer file may be corrupt; move it aside and the layer starts fresh.")
    )]
    Serialize { path: String, message: String },

    #[error("{path} holds layer \"{found}\", expected \"{expected}\"")]
    #[diagnostic(
        code(gridsynth::memory::schema),
        help("Layer files were renamed or copied between layers; restore the originals.")
    )]
    Schema {
        path: String,
        found: String,
        expected: String,
    },

    #[error("memory directory {path} is locked by process {pid}")]
    #[diagnostic(
        code(gridsynth::memory::locked),
        help(
            "Only one solver may write a memory directory at a time. Use a separate \
             --memory-dir, open it read-only, or wait for the other process to finish."
        )
    )]
    Locked { path: String, pid: u32 },
}

pub type MemoryResult<T> = std::result::Result<T, MemoryError>;

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    version: u32,
    layer: String,
    data: T,
}

/// Reads and atomically rewrites layer files under one directory.
#[derive(Debug, Clone)]
pub struct LayerStore {
    dir: PathBuf,
}

impl LayerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, kind: LayerKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    /// Load a layer. A missing file, or one written under another schema
    /// version, yields `None`.
    pub fn load<T: DeserializeOwned>(&self, kind: LayerKind) -> MemoryResult<Option<T>> {
        let path = self.path(kind);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path).map_err(|source| MemoryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let envelope: Envelope<serde_json::Value> =
            serde_json::from_str(&text).map_err(|e| MemoryError::Serialize {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        if envelope.version != SCHEMA_VERSION {
            tracing::warn!(
                layer = %kind,
                found = envelope.version,
                expected = SCHEMA_VERSION,
                "memory layer schema changed, starting fresh"
            );
            return Ok(None);
        }
        if envelope.layer != kind.as_str() {
            return Err(MemoryError::Schema {
                path: path.display().to_string(),
                found: envelope.layer,
                expected: kind.as_str().to_string(),
            });
        }
        serde_json::from_value(envelope.data)
            .map(Some)
            .map_err(|e| MemoryError::Serialize {
                path: path.display().to_string(),
                message: e.to_string(),
            })
    }

    /// Write the whole layer to a temp file, then rename it into place.
    pub fn save<T: Serialize>(&self, kind: LayerKind, data: &T) -> MemoryResult<()> {
        std::fs::create_dir_all(&self.dir).map_err(|source| MemoryError::Io {
            path: self.dir.display().to_string(),
            source,
        })?;
        let path = self.path(kind);
        let envelope = Envelope {
            version: SCHEMA_VERSION,
            layer: kind.as_str().to_string(),
            data,
        };
        let json = serde_json::to_vec_pretty(&envelope).map_err(|e| MemoryError::Serialize {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let tmp = path.with_extension("json.tmp");
        let io_err = |source| MemoryError::Io {
            path: tmp.display().to_string(),
            source,
        };
        let mut file = std::fs::File::create(&tmp).map_err(io_err)?;
        file.write_all(&json).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);

        std::fs::rename(&tmp, &path).map_err(|source| MemoryError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

// ---------------------------------------------------------------------------
// Writer lock
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
}

/// Exclusive writer lock on a memory directory, released on drop.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    /// Take the lock. A lock file left behind by a dead process is replaced.
    pub fn acquire(dir: &Path) -> MemoryResult<Self> {
        std::fs::create_dir_all(dir).map_err(|source| MemoryError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let path = dir.join(LOCK_FILE);
        match Self::create(&path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if let Some(pid) = read_holder(&path) {
                    if process_alive(pid) {
                        return Err(MemoryError::Locked {
                            path: dir.display().to_string(),
                            pid,
                        });
                    }
                }
                tracing::warn!(path = %path.display(), "removing stale memory lock");
                let _ = std::fs::remove_file(&path);
                Self::create(&path).map_err(|source| MemoryError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
            Err(source) => Err(MemoryError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    /// Write the PID to a private staging file and hard-link it into place,
    /// so the lock file never exists without its holder recorded.
    fn create(path: &Path) -> std::io::Result<Self> {
        let pid = std::process::id();
        let staging = path.with_extension(format!("lock.{pid}.tmp"));
        let json = serde_json::to_string(&LockInfo { pid }).map_err(std::io::Error::other)?;
        std::fs::write(&staging, json)?;
        let linked = std::fs::hard_link(&staging, path);
        let _ = std::fs::remove_file(&staging);
        linked?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn read_holder(path: &Path) -> Option<u32> {
    let text = std::fs::read_to_string(path).ok()?;
    serde_json::from_str::<LockInfo>(&text).ok().map(|i| i.pid)
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    // SAFETY: signal 0 performs the permission and existence check only.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::layers::CurriculumLayer;

    #[test]
    fn missing_layer_loads_as_none() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LayerStore::new(dir.path());
        let loaded: Option<CurriculumLayer> = store.load(LayerKind::Curriculum).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn save_replaces_without_leaving_temp_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LayerStore::new(dir.path());
        let mut layer = CurriculumLayer::new(0.3);
        store.save(LayerKind::Curriculum, &layer).unwrap();
        layer.record_task(Some(8));
        store.save(LayerKind::Curriculum, &layer).unwrap();
        let loaded: CurriculumLayer = store.load(LayerKind::Curriculum).unwrap().unwrap();
        assert_eq!(loaded, layer);
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["curriculum.json".to_string()]);
    }

    #[test]
    fn version_mismatch_starts_fresh() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LayerStore::new(dir.path());
        std::fs::write(
            store.path(LayerKind::Curriculum),
            r#"{"version": 999, "layer": "curriculum", "data": {}}"#,
        )
        .unwrap();
        let loaded: Option<CurriculumLayer> = store.load(LayerKind::Curriculum).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn wrong_layer_tag_is_schema_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LayerStore::new(dir.path());
        store.save(LayerKind::Curriculum, &CurriculumLayer::new(0.3)).unwrap();
        std::fs::rename(store.path(LayerKind::Curriculum), store.path(LayerKind::Priors)).unwrap();
        let err = store
            .load::<CurriculumLayer>(LayerKind::Priors)
            .unwrap_err();
        assert!(matches!(err, MemoryError::Schema { .. }));
    }

    #[test]
    fn lock_is_exclusive_and_released_on_drop() {
        let dir = tempfile::TempDir::new().unwrap();
        let lock = StoreLock::acquire(dir.path()).unwrap();
        assert!(lock.path().exists());
        #[cfg(unix)]
        assert!(matches!(
            StoreLock::acquire(dir.path()),
            Err(MemoryError::Locked { .. })
        ));
        let path = lock.path().to_path_buf();
        drop(lock);
        assert!(!path.exists());
        StoreLock::acquire(dir.path()).unwrap();
    }

    #[test]
    fn lock_file_is_published_with_its_pid() {
        let dir = tempfile::TempDir::new().unwrap();
        let lock = StoreLock::acquire(dir.path()).unwrap();
        assert_eq!(read_holder(lock.path()), Some(std::process::id()));
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![LOCK_FILE.to_string()]);

        // A competing writer never truncates or rewrites the published file.
        let before = std::fs::read_to_string(lock.path()).unwrap();
        let err = StoreLock::create(lock.path()).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read_to_string(lock.path()).unwrap(), before);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn unreadable_lock_is_treated_as_stale() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join(LOCK_FILE), "not json").unwrap();
        let lock = StoreLock::acquire(dir.path()).unwrap();
        assert!(lock.path().exists());
    }
}
