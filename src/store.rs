//! State store implementations.
//!
//! [`FileStateStore`] keeps one JSON record per scope on disk and replaces
//! it atomically. [`MemoryStateStore`] is an in-process equivalent for tests
//! and embedders.

use std::{
    collections::{HashMap, HashSet},
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use fs2::FileExt;
use tracing::debug;

use crate::{
    traits::{LoadedState, StateStore, StoreError},
    types::{RotationState, ScopeKey},
};

/// File-backed state store.
///
/// Layout under the store directory:
///
/// - `<scope>.json`: the committed [`RotationState`]
/// - `<scope>.lock`: advisory lock file held while a run may commit
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Creates a store rooted at `dir`. The directory is created on first
    /// lock or commit.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the state record for `scope`.
    pub fn state_path(&self, scope: &ScopeKey) -> PathBuf {
        self.dir.join(format!("{scope}.json"))
    }

    fn lock_path(&self, scope: &ScopeKey) -> PathBuf {
        self.dir.join(format!("{scope}.lock"))
    }

    fn ensure_dir(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            StoreError::Backend(format!("cannot create {}: {e}", self.dir.display()))
        })
    }

    fn parse(scope: &ScopeKey, bytes: &[u8]) -> Result<RotationState, String> {
        let state: RotationState = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
        if &state.scope_key != scope {
            return Err(format!("record belongs to scope {}", state.scope_key));
        }
        Ok(state)
    }
}

impl StateStore for FileStateStore {
    type Guard = ScopeLock;

    fn lock(&self, scope: &ScopeKey) -> Result<ScopeLock, StoreError> {
        self.ensure_dir()?;
        let path = self.lock_path(scope);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StoreError::Backend(format!("cannot open {}: {e}", path.display())))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(scope = %scope, path = %path.display(), "acquired scope lock");
                Ok(ScopeLock { file, path })
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || is_contended(&e) => {
                Err(StoreError::Locked { scope: scope.clone() })
            }
            Err(e) => {
                Err(StoreError::Backend(format!("cannot lock {}: {e}", path.display())))
            }
        }
    }

    fn load(&self, scope: &ScopeKey) -> LoadedState {
        let path = self.state_path(scope);
        let sentinel = RotationState::never_run(scope.clone());

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return LoadedState::Missing(sentinel),
            Err(e) => {
                return LoadedState::Recovered {
                    state: sentinel,
                    reason: format!("cannot read {}: {e}", path.display()),
                };
            }
        };

        match Self::parse(scope, &bytes) {
            Ok(state) => LoadedState::Existing(state),
            Err(reason) => LoadedState::Recovered {
                state: sentinel,
                reason: format!("malformed {}: {reason}", path.display()),
            },
        }
    }

    fn commit(&self, state: &RotationState) -> Result<(), StoreError> {
        self.ensure_dir()?;
        let path = self.state_path(&state.scope_key);
        let mut bytes = serde_json::to_vec_pretty(state)
            .map_err(|e| StoreError::Backend(format!("cannot encode state: {e}")))?;
        bytes.push(b'\n');

        let mut temp = tempfile::NamedTempFile::new_in(&self.dir).map_err(|e| {
            StoreError::Backend(format!("cannot create temp file in {}: {e}", self.dir.display()))
        })?;
        temp.as_file_mut()
            .write_all(&bytes)
            .map_err(|e| StoreError::Backend(format!("cannot write temp file: {e}")))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| StoreError::Backend(format!("cannot sync temp file: {e}")))?;
        temp.persist(&path).map_err(|e| {
            StoreError::Backend(format!("cannot replace {}: {}", path.display(), e.error))
        })?;

        debug!(scope = %state.scope_key, path = %path.display(), "committed rotation state");
        Ok(())
    }
}

// fs2 reports contention as the platform's lock error on some targets.
fn is_contended(err: &io::Error) -> bool {
    err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Exclusive hold on a scope of a [`FileStateStore`].
///
/// Released when dropped.
#[derive(Debug)]
pub struct ScopeLock {
    file: File,
    path: PathBuf,
}

impl ScopeLock {
    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScopeLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    states: HashMap<ScopeKey, RotationState>,
    held: HashSet<ScopeKey>,
    commits: usize,
}

/// In-memory state store.
///
/// Clones share the same underlying map, so a clone handed to an
/// orchestrator can be inspected afterwards.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the committed state for `scope`, if any.
    pub fn get(&self, scope: &ScopeKey) -> Option<RotationState> {
        self.with_inner(|inner| inner.states.get(scope).cloned())
    }

    /// Number of successful commits across all scopes.
    pub fn commit_count(&self) -> usize {
        self.with_inner(|inner| inner.commits)
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut MemoryInner) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut guard)
    }
}

impl StateStore for MemoryStateStore {
    type Guard = MemoryScopeLock;

    fn lock(&self, scope: &ScopeKey) -> Result<MemoryScopeLock, StoreError> {
        self.with_inner(|inner| {
            if inner.held.insert(scope.clone()) {
                Ok(MemoryScopeLock { inner: Arc::clone(&self.inner), scope: scope.clone() })
            } else {
                Err(StoreError::Locked { scope: scope.clone() })
            }
        })
    }

    fn load(&self, scope: &ScopeKey) -> LoadedState {
        self.get(scope).map_or_else(
            || LoadedState::Missing(RotationState::never_run(scope.clone())),
            LoadedState::Existing,
        )
    }

    fn commit(&self, state: &RotationState) -> Result<(), StoreError> {
        self.with_inner(|inner| {
            inner.states.insert(state.scope_key.clone(), state.clone());
            inner.commits += 1;
        });
        Ok(())
    }
}

/// Exclusive hold on a scope of a [`MemoryStateStore`].
#[derive(Debug)]
pub struct MemoryScopeLock {
    inner: Arc<Mutex<MemoryInner>>,
    scope: ScopeKey,
}

impl Drop for MemoryScopeLock {
    fn drop(&mut self) {
        let mut guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.held.remove(&self.scope);
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rstest::rstest;
    use tempfile::tempdir;

    use super::*;
    use crate::types::ItemId;

    fn scope(key: &str) -> ScopeKey {
        ScopeKey::new(key).unwrap()
    }

    fn advanced(key: &str, last: &str, cycle: u64) -> RotationState {
        RotationState {
            scope_key: scope(key),
            last_used_id: Some(ItemId::new(last).unwrap()),
            cycle_count: cycle,
            updated_at: Some(Utc.timestamp_opt(1_700_000_000, 0).unwrap()),
        }
    }

    #[test]
    fn missing_file_is_never_run() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        let loaded = store.load(&scope("acme"));
        assert!(matches!(loaded, LoadedState::Missing(ref s) if s.is_never_run()));
    }

    #[test]
    fn commit_then_load() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("nested/state"));
        let state = advanced("acme", "post-2.txt", 3);

        store.commit(&state).unwrap();
        assert_eq!(store.load(&scope("acme")), LoadedState::Existing(state.clone()));

        let next = advanced("acme", "post-1.txt", 3);
        store.commit(&next).unwrap();
        assert_eq!(store.load(&scope("acme")).into_state(), next);
    }

    #[test]
    fn scopes_are_independent() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        store.commit(&advanced("client-a", "x", 1)).unwrap();

        assert!(store.load(&scope("client-b")).state().is_never_run());
        assert!(store.state_path(&scope("client-a")).exists());
        assert!(!store.state_path(&scope("client-b")).exists());
    }

    #[rstest]
    #[case::garbage("not json at all")]
    #[case::truncated("{\"scope_key\":\"acme\",\"last_used_id\":\"po")]
    #[case::wrong_type("{\"scope_key\":\"acme\",\"cycle_count\":\"three\"}")]
    #[case::empty_id("{\"scope_key\":\"acme\",\"last_used_id\":\"  \"}")]
    #[case::foreign_scope("{\"scope_key\":\"other\",\"last_used_id\":\"a\"}")]
    fn malformed_file_recovers_to_sentinel(#[case] contents: &str) {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        fs::write(store.state_path(&scope("acme")), contents).unwrap();

        let loaded = store.load(&scope("acme"));
        assert!(loaded.recovery_reason().is_some());
        assert!(loaded.state().is_never_run());
        assert_eq!(loaded.state().scope_key, scope("acme"));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        fs::write(
            store.state_path(&scope("acme")),
            r#"{"scope_key":"acme","last_used_id":"b","cycle_count":2,"schema":7,"notes":{}}"#,
        )
        .unwrap();

        let loaded = store.load(&scope("acme"));
        let state = loaded.state();
        assert!(matches!(loaded, LoadedState::Existing(_)));
        assert_eq!(state.last_used_id.as_ref().map(ItemId::as_str), Some("b"));
        assert_eq!(state.cycle_count, 2);
        assert_eq!(state.updated_at, None);
    }

    #[test]
    fn commit_overwrites_corrupted_file() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        fs::write(store.state_path(&scope("acme")), b"\x00\x01garbage").unwrap();

        let state = advanced("acme", "a", 1);
        store.commit(&state).unwrap();
        assert_eq!(store.load(&scope("acme")), LoadedState::Existing(state));
    }

    #[test]
    fn commit_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        for cycle in 1..=3 {
            store.commit(&advanced("acme", "a", cycle)).unwrap();
        }
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, ["acme.json"]);
    }

    #[test]
    fn commit_to_unwritable_location_fails() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"file, not a directory").unwrap();
        let store = FileStateStore::new(blocker.join("state"));

        let err = store.commit(&advanced("acme", "a", 1)).unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[test]
    fn file_lock_is_exclusive_per_scope() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        let other = FileStateStore::new(dir.path());

        let guard = store.lock(&scope("acme")).unwrap();
        assert!(guard.path().ends_with("acme.lock"));
        assert!(matches!(other.lock(&scope("acme")), Err(StoreError::Locked { .. })));
        assert!(other.lock(&scope("beta")).is_ok());

        drop(guard);
        assert!(other.lock(&scope("acme")).is_ok());
    }

    #[test]
    fn memory_store_roundtrip_and_lock() {
        let store = MemoryStateStore::new();
        assert!(matches!(store.load(&scope("acme")), LoadedState::Missing(_)));

        let state = advanced("acme", "a", 1);
        store.commit(&state).unwrap();
        assert_eq!(store.get(&scope("acme")), Some(state));
        assert_eq!(store.commit_count(), 1);

        let guard = store.lock(&scope("acme")).unwrap();
        let clone = store.clone();
        assert!(matches!(clone.lock(&scope("acme")), Err(StoreError::Locked { .. })));
        drop(guard);
        assert!(clone.lock(&scope("acme")).is_ok());
    }
}
