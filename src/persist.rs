use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::errors::{RaftError, Result};
use crate::log::LogEntry;

/// Everything that must survive a crash: term, vote, the in-memory log
/// tail, and the compaction boundary. Snapshot bytes are persisted
/// alongside but separately addressable (see `Persister::save`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedState {
    pub current_term: u64,
    pub voted_for: Option<String>,
    pub log_tail: Vec<LogEntry>,
    pub last_included_index: u64,
    pub last_included_term: u64,
}

/// `save` atomically replaces the previously saved tuple; a peer that
/// crashes and restarts observes exactly the last successful save.
/// Implementations must not partially apply a save.
pub trait Persister: Send + Sync + 'static {
    fn save(&self, state: &PersistedState, snapshot: Option<&[u8]>) -> Result<()>;
    fn load(&self) -> Result<Option<(PersistedState, Option<Vec<u8>>)>>;
}

/// Writes state to a pair of files via write-to-temp-then-rename, which
/// is atomic on the same filesystem. Snapshot bytes live in a second
/// file so a large snapshot never needs to be rewritten just because
/// `current_term` changed.
pub struct FilePersister {
    state_path: PathBuf,
    snapshot_path: PathBuf,
}

impl FilePersister {
    pub fn new(base_dir: impl Into<PathBuf>, server_id: &str) -> Self {
        let base_dir = base_dir.into();
        Self {
            state_path: base_dir.join(format!("raft-state-{server_id}.bin")),
            snapshot_path: base_dir.join(format!("raft-snapshot-{server_id}.bin")),
        }
    }

    fn write_atomic(path: &PathBuf, bytes: &[u8]) -> Result<()> {
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, bytes)
            .map_err(|e| RaftError::PersistenceFailure(format!("write {tmp_path:?}: {e}")))?;
        std::fs::rename(&tmp_path, path)
            .map_err(|e| RaftError::PersistenceFailure(format!("rename onto {path:?}: {e}")))?;
        Ok(())
    }
}

impl Persister for FilePersister {
    fn save(&self, state: &PersistedState, snapshot: Option<&[u8]>) -> Result<()> {
        let bytes = bincode::serialize(state)
            .map_err(|e| RaftError::PersistenceFailure(format!("encode state: {e}")))?;
        Self::write_atomic(&self.state_path, &bytes)?;
        if let Some(snapshot) = snapshot {
            Self::write_atomic(&self.snapshot_path, snapshot)?;
        }
        Ok(())
    }

    fn load(&self) -> Result<Option<(PersistedState, Option<Vec<u8>>)>> {
        let state_bytes = match std::fs::read(&self.state_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(RaftError::PersistenceFailure(format!(
                    "read {:?}: {e}",
                    self.state_path
                )))
            }
        };
        let state: PersistedState = bincode::deserialize(&state_bytes)
            .map_err(|e| RaftError::PersistenceFailure(format!("decode state: {e}")))?;

        let snapshot = match std::fs::read(&self.snapshot_path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(RaftError::PersistenceFailure(format!(
                    "read {:?}: {e}",
                    self.snapshot_path
                )))
            }
        };

        Ok(Some((state, snapshot)))
    }
}

/// In-memory persister for tests: same atomicity contract (a reader
/// never observes a partially-applied save) without touching disk.
#[derive(Default)]
pub struct MemoryPersister {
    inner: Mutex<Option<(PersistedState, Option<Vec<u8>>)>>,
}

impl MemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persister for MemoryPersister {
    fn save(&self, state: &PersistedState, snapshot: Option<&[u8]>) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        let snapshot = snapshot.map(|b| b.to_vec()).or_else(|| {
            guard
                .as_ref()
                .and_then(|(_, existing)| existing.clone())
        });
        *guard = Some((state.clone(), snapshot));
        Ok(())
    }

    fn load(&self) -> Result<Option<(PersistedState, Option<Vec<u8>>)>> {
        Ok(self.inner.lock().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_persister_round_trips() {
        let p = MemoryPersister::new();
        assert!(p.load().unwrap().is_none());

        let state = PersistedState {
            current_term: 3,
            voted_for: Some("peer-a".to_string()),
            log_tail: vec![],
            last_included_index: 0,
            last_included_term: 0,
        };
        p.save(&state, Some(b"snap-bytes")).unwrap();

        let (loaded, snapshot) = p.load().unwrap().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(snapshot.unwrap(), b"snap-bytes");
    }

    #[test]
    fn memory_persister_keeps_snapshot_when_not_rewritten() {
        let p = MemoryPersister::new();
        let state = PersistedState {
            current_term: 1,
            voted_for: None,
            log_tail: vec![],
            last_included_index: 0,
            last_included_term: 0,
        };
        p.save(&state, Some(b"first")).unwrap();
        let state2 = PersistedState {
            current_term: 2,
            ..state
        };
        p.save(&state2, None).unwrap();
        let (_, snapshot) = p.load().unwrap().unwrap();
        assert_eq!(snapshot.unwrap(), b"first");
    }

    #[test]
    fn file_persister_round_trips() {
        let dir = std::env::temp_dir().join(format!(
            "raft-consensus-test-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let p = FilePersister::new(&dir, "node-a");
        assert!(p.load().unwrap().is_none());

        let state = PersistedState {
            current_term: 5,
            voted_for: Some("node-b".to_string()),
            log_tail: vec![LogEntry {
                index: 1,
                term: 5,
                command: b"x=1".to_vec(),
            }],
            last_included_index: 0,
            last_included_term: 0,
        };
        p.save(&state, Some(b"snap")).unwrap();

        let (loaded, snapshot) = p.load().unwrap().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(snapshot.unwrap(), b"snap");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
