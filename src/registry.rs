//! Process-wide file-id registry.
//!
//! Maintains the bijection between absolute paths and 32-bit file ids. Id 0
//! is reserved as "none". The registry is shared with indexer workers, so
//! every lookup goes through a mutex; persistence is best-effort with a
//! short bounded retry.

use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

use crate::model::{FileId, NULL_FILE_ID};
use crate::DATABASE_VERSION;

#[derive(Serialize, Deserialize)]
struct PersistedRegistry {
    version: u32,
    // BTreeMap for a stable on-disk layout.
    paths: BTreeMap<FileId, PathBuf>,
    next_id: FileId,
}

#[derive(Default)]
struct RegistryState {
    path_to_id: FxHashMap<PathBuf, FileId>,
    id_to_path: FxHashMap<FileId, PathBuf>,
    next_id: FileId,
}

pub struct FileRegistry {
    state: Mutex<RegistryState>,
    file: Option<PathBuf>,
    save_retries: u32,
    save_backoff: Duration,
}

impl FileRegistry {
    /// Create a registry persisted at `file` (or in-memory only when
    /// `None`), loading any existing snapshot.
    pub fn init(file: Option<PathBuf>) -> Result<Self> {
        let mut state = RegistryState {
            next_id: 1,
            ..Default::default()
        };

        if let Some(ref path) = file {
            if path.exists() {
                let data = std::fs::File::open(path)
                    .with_context(|| format!("Failed to open registry file: {}", path.display()))?;
                let persisted: PersistedRegistry =
                    bincode::deserialize_from(std::io::BufReader::new(data)).with_context(
                        || format!("Failed to deserialize registry: {}", path.display()),
                    )?;
                if persisted.version != DATABASE_VERSION {
                    anyhow::bail!(
                        "Registry version mismatch: found {}, expected {}",
                        persisted.version,
                        DATABASE_VERSION
                    );
                }
                for (file_id, p) in persisted.paths {
                    state.path_to_id.insert(p.clone(), file_id);
                    state.id_to_path.insert(file_id, p);
                }
                state.next_id = persisted.next_id.max(1);
            }
        }

        Ok(Self {
            state: Mutex::new(state),
            file,
            save_retries: 3,
            save_backoff: Duration::from_millis(50),
        })
    }

    pub fn with_save_policy(mut self, retries: u32, backoff: Duration) -> Self {
        self.save_retries = retries;
        self.save_backoff = backoff;
        self
    }

    // A poisoned lock only means a worker panicked mid-lookup; the map
    // itself is still coherent, so keep serving.
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Id for an already-registered path, or `NULL_FILE_ID`.
    pub fn file_id(&self, path: &Path) -> FileId {
        let state = self.lock();
        state.path_to_id.get(path).copied().unwrap_or(NULL_FILE_ID)
    }

    /// Id for `path`, registering it if new.
    pub fn insert_file(&self, path: &Path) -> FileId {
        let mut state = self.lock();
        if let Some(&id) = state.path_to_id.get(path) {
            return id;
        }
        let id = state.next_id;
        state.next_id += 1;
        state.path_to_id.insert(path.to_path_buf(), id);
        state.id_to_path.insert(id, path.to_path_buf());
        id
    }

    pub fn path(&self, file_id: FileId) -> Option<PathBuf> {
        let state = self.lock();
        state.id_to_path.get(&file_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().id_to_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist the registry. Best-effort: each failed attempt is retried
    /// after a short back-off, and the final failure is logged, not
    /// propagated as a panic or process error.
    pub fn save(&self) -> Result<()> {
        let Some(ref path) = self.file else {
            return Ok(());
        };

        let snapshot = {
            let state = self.lock();
            PersistedRegistry {
                version: DATABASE_VERSION,
                paths: state
                    .id_to_path
                    .iter()
                    .map(|(id, p)| (*id, p.clone()))
                    .collect(),
                next_id: state.next_id,
            }
        };

        let mut last_err = None;
        for attempt in 0..=self.save_retries {
            match write_snapshot(path, &snapshot) {
                Ok(()) => {
                    debug!(path = %path.display(), files = snapshot.paths.len(), "Saved file registry");
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        attempt = attempt + 1,
                        error = %e,
                        "Failed to save file registry, will retry"
                    );
                    last_err = Some(e);
                    std::thread::sleep(self.save_backoff);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("registry save failed")))
    }
}

fn write_snapshot(path: &Path, snapshot: &PersistedRegistry) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create registry directory: {}", parent.display()))?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create registry file: {}", path.display()))?;
    bincode::serialize_into(std::io::BufWriter::new(file), snapshot)
        .with_context(|| format!("Failed to serialize registry: {}", path.display()))
}

/// Modification time of `path` in milliseconds since the epoch; 0 when the
/// file is gone or unreadable, which dirty detection treats as "vanished".
pub fn last_modified_ms(path: &Path) -> u64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
