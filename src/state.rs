use std::collections::HashMap;
use std::time::Instant;

use crate::errors::{RaftError, Result};
use crate::log::Log;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// A snapshot delivered to the apply pipeline out-of-band (ahead of any
/// committed entry it precedes), awaiting the application's
/// `CondInstallSnapshot` decision. `Peer::cond_install_snapshot` consumes
/// this by mutating `commit_index`/`last_applied`/`log`; the apply loop
/// only forwards the bytes once that decision lands.
#[derive(Debug, Clone)]
pub struct PendingSnapshot {
    pub last_included_index: u64,
    pub last_included_term: u64,
    pub bytes: Vec<u8>,
}

/// Everything one peer holds about itself and the cluster. Exclusively
/// owned; every read or write happens through `Peer::state`'s mutex.
pub struct PeerState {
    pub current_term: u64,
    pub voted_for: Option<String>,
    pub role: Role,
    pub log: Log,
    pub commit_index: u64,
    pub last_applied: u64,
    pub next_index: HashMap<String, u64>,
    pub match_index: HashMap<String, u64>,
    pub leader_id: Option<String>,
    pub last_heartbeat: Instant,
    pub pending_snapshot: Option<PendingSnapshot>,
    /// Bytes of the most recent snapshot this peer holds, re-served to
    /// followers that have fallen behind the compaction boundary.
    pub snapshot_bytes: Option<Vec<u8>>,
}

impl PeerState {
    pub fn new() -> Self {
        Self {
            current_term: 0,
            voted_for: None,
            role: Role::Follower,
            log: Log::new(),
            commit_index: 0,
            last_applied: 0,
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            leader_id: None,
            last_heartbeat: Instant::now(),
            pending_snapshot: None,
            snapshot_bytes: None,
        }
    }

    /// `log.last().index`, the up-to-date log check's comparison point.
    pub fn last_log_index(&self) -> u64 {
        self.log.last().index
    }

    pub fn last_log_term(&self) -> u64 {
        self.log.last().term
    }

    /// Appends `command` at `last().index + 1` under `current_term` iff
    /// this peer is the leader. Returns `(index, term)` on success,
    /// `None` (no state mutated) if not leader.
    pub fn submit(&mut self, command: Vec<u8>) -> Option<(u64, u64)> {
        if self.role != Role::Leader {
            return None;
        }
        let term = self.current_term;
        let index = self.log.append(term, command);
        Some((index, term))
    }

    /// Compacts the log through `up_to`, which must be a contiguous
    /// applied prefix. The term at `up_to` is read from the log before
    /// compaction; `up_to` equal to or below the current compaction
    /// boundary is rejected as `StaleSnapshot`.
    pub fn compact_log(&mut self, up_to: u64) -> Result<()> {
        let term = match self.log.get(up_to) {
            Some(entry) => entry.term,
            None if up_to == self.log.last_included_index() => self.log.last_included_term(),
            None => {
                return Err(RaftError::StaleSnapshot {
                    requested: up_to,
                    commit_index: self.commit_index,
                })
            }
        };
        self.log.compact(up_to, term)
    }

    /// Application-driven acceptance of an installed snapshot. Returns
    /// `false` (no-op) if the snapshot is not newer than `commit_index`;
    /// otherwise resets the log prefix and advances `commit_index` /
    /// `last_applied` to `last_included_index`.
    pub fn cond_install_snapshot(
        &mut self,
        last_included_index: u64,
        last_included_term: u64,
        bytes: Vec<u8>,
    ) -> bool {
        if last_included_index <= self.commit_index {
            return false;
        }
        self.log
            .reset_to_snapshot(last_included_index, last_included_term);
        self.commit_index = last_included_index;
        self.last_applied = last_included_index;
        self.snapshot_bytes = Some(bytes);
        true
    }
}

impl Default for PeerState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_rejected_when_not_leader() {
        let mut state = PeerState::new();
        assert!(state.submit(b"x".to_vec()).is_none());
        assert_eq!(state.last_log_index(), 0);
    }

    #[test]
    fn submit_appends_under_current_term_when_leader() {
        let mut state = PeerState::new();
        state.role = Role::Leader;
        state.current_term = 4;
        let (index, term) = state.submit(b"x=1".to_vec()).unwrap();
        assert_eq!((index, term), (1, 4));
        assert_eq!(state.log.get(1).unwrap().command, b"x=1");
    }

    #[test]
    fn cond_install_snapshot_rejects_stale() {
        let mut state = PeerState::new();
        state.commit_index = 10;
        assert!(!state.cond_install_snapshot(5, 1, b"snap".to_vec()));
        assert_eq!(state.commit_index, 10);
    }

    #[test]
    fn cond_install_snapshot_advances_cursors() {
        let mut state = PeerState::new();
        assert!(state.cond_install_snapshot(50, 3, b"snap".to_vec()));
        assert_eq!(state.commit_index, 50);
        assert_eq!(state.last_applied, 50);
        assert_eq!(state.log.last_included_index(), 50);
        assert_eq!(state.snapshot_bytes.as_deref(), Some(&b"snap"[..]));
    }
}
