//! Durable lock, cursors and retry counters.

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use docflow_engine::{FlowError, FlowResult};

use crate::queue::{Cursor, QueueKind};

/// State that must survive process restarts.
pub trait StateStore: Send + Sync {
    /// Set the lock if it is free. Returns false if it was already held.
    fn try_acquire_lock(&self) -> FlowResult<bool>;

    fn release_lock(&self) -> FlowResult<()>;

    fn is_locked(&self) -> FlowResult<bool>;

    /// Persisted cursor for a queue, if any.
    fn cursor(&self, queue: QueueKind) -> FlowResult<Option<Cursor>>;

    fn set_cursor(&self, queue: QueueKind, cursor: Cursor) -> FlowResult<()>;

    /// Retry counter for a queue, 0 when never set.
    fn retries(&self, queue: QueueKind) -> FlowResult<u32>;

    fn set_retries(&self, queue: QueueKind, retries: u32) -> FlowResult<()>;

    /// Move the cursor and reset the retry counter in one write.
    fn advance(&self, queue: QueueKind, cursor: Cursor) -> FlowResult<()>;
}

impl PersistedState {
    fn advance(&mut self, queue: QueueKind, cursor: Cursor) {
        self.cursors.insert(queue.as_str().to_string(), cursor);
        self.retries.insert(queue.as_str().to_string(), 0);
    }
}

/// Serialized form of the persisted state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub lock: bool,

    #[serde(default)]
    pub cursors: BTreeMap<String, Cursor>,

    #[serde(default)]
    pub retries: BTreeMap<String, u32>,
}

/// JSON file store; every write replaces the file atomically.
///
/// Each read-modify-write holds an OS lock on a `<state>.lock` sidecar file,
/// so stores in other processes see a consistent test-and-set.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");
        Self {
            path,
            lock_path: lock_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Open the sidecar and take the OS lock. Dropping the file releases it.
    fn lock_file(&self, exclusive: bool) -> FlowResult<File> {
        std::fs::create_dir_all(self.dir())?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)?;
        let locked = if exclusive {
            file.lock_exclusive()
        } else {
            file.lock_shared()
        };
        locked.map_err(|e| {
            FlowError::State(format!("cannot lock {}: {}", self.lock_path.display(), e))
        })?;
        Ok(file)
    }

    fn read(&self) -> FlowResult<PersistedState> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(PersistedState::default()),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                FlowError::State(format!("corrupt state file {}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PersistedState::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, state: &PersistedState) -> FlowResult<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(self.dir())?;
        let body = serde_json::to_vec_pretty(state)
            .map_err(|e| FlowError::State(format!("cannot serialize state: {}", e)))?;
        tmp.write_all(&body)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| FlowError::State(e.to_string()))?;
        Ok(())
    }

    fn update<T>(&self, f: impl FnOnce(&mut PersistedState) -> T) -> FlowResult<T> {
        let _lock = self.lock_file(true)?;
        let mut state = self.read()?;
        let result = f(&mut state);
        self.write(&state)?;
        Ok(result)
    }

    fn view<T>(&self, f: impl FnOnce(&PersistedState) -> T) -> FlowResult<T> {
        let _lock = self.lock_file(false)?;
        Ok(f(&self.read()?))
    }
}

impl StateStore for FileStateStore {
    fn try_acquire_lock(&self) -> FlowResult<bool> {
        self.update(|s| {
            if s.lock {
                false
            } else {
                s.lock = true;
                true
            }
        })
    }

    fn release_lock(&self) -> FlowResult<()> {
        self.update(|s| s.lock = false)
    }

    fn is_locked(&self) -> FlowResult<bool> {
        self.view(|s| s.lock)
    }

    fn cursor(&self, queue: QueueKind) -> FlowResult<Option<Cursor>> {
        self.view(|s| s.cursors.get(queue.as_str()).cloned())
    }

    fn set_cursor(&self, queue: QueueKind, cursor: Cursor) -> FlowResult<()> {
        self.update(|s| {
            s.cursors.insert(queue.as_str().to_string(), cursor);
        })
    }

    fn retries(&self, queue: QueueKind) -> FlowResult<u32> {
        self.view(|s| s.retries.get(queue.as_str()).copied().unwrap_or(0))
    }

    fn set_retries(&self, queue: QueueKind, retries: u32) -> FlowResult<()> {
        self.update(|s| {
            s.retries.insert(queue.as_str().to_string(), retries);
        })
    }

    fn advance(&self, queue: QueueKind, cursor: Cursor) -> FlowResult<()> {
        self.update(|s| s.advance(queue, cursor))
    }
}

/// In-process store used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: Mutex<PersistedState>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with an initial state.
    pub fn with_state(state: PersistedState) -> Self {
        Self {
            inner: Mutex::new(state),
        }
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> FlowResult<PersistedState> {
        self.with(|s| s.clone())
    }

    fn with<T>(&self, f: impl FnOnce(&mut PersistedState) -> T) -> FlowResult<T> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| FlowError::State("state guard poisoned".to_string()))?;
        Ok(f(&mut *state))
    }
}

impl StateStore for MemoryStateStore {
    fn try_acquire_lock(&self) -> FlowResult<bool> {
        self.with(|s| !std::mem::replace(&mut s.lock, true))
    }

    fn release_lock(&self) -> FlowResult<()> {
        self.with(|s| s.lock = false)
    }

    fn is_locked(&self) -> FlowResult<bool> {
        self.with(|s| s.lock)
    }

    fn cursor(&self, queue: QueueKind) -> FlowResult<Option<Cursor>> {
        self.with(|s| s.cursors.get(queue.as_str()).cloned())
    }

    fn set_cursor(&self, queue: QueueKind, cursor: Cursor) -> FlowResult<()> {
        self.with(|s| {
            s.cursors.insert(queue.as_str().to_string(), cursor);
        })
    }

    fn retries(&self, queue: QueueKind) -> FlowResult<u32> {
        self.with(|s| s.retries.get(queue.as_str()).copied().unwrap_or(0))
    }

    fn set_retries(&self, queue: QueueKind, retries: u32) -> FlowResult<()> {
        self.with(|s| {
            s.retries.insert(queue.as_str().to_string(), retries);
        })
    }

    fn advance(&self, queue: QueueKind, cursor: Cursor) -> FlowResult<()> {
        self.with(|s| s.advance(queue, cursor))
    }
}
