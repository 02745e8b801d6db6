use serde::{Deserialize, Serialize};

use crate::errors::{RaftError, Result};

/// An immutable (index, term, command) triple. `index` is 1-based and
/// monotone; `command` is opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    pub command: Vec<u8>,
}

/// A point in the log identified by index and the term that created it.
/// Doubles as the "virtual entry" `(LastIncludedIndex, LastIncludedTerm, _)`
/// returned by `Log::last` when the in-memory tail is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogPosition {
    pub index: u64,
    pub term: u64,
}

/// An ordered sequence of entries plus a compaction prefix. Entries with
/// index <= `last_included_index` have been serialized into the latest
/// snapshot and are no longer held in memory.
#[derive(Debug, Clone, Default)]
pub struct Log {
    /// entries[i] has index == last_included_index + 1 + i
    entries: Vec<LogEntry>,
    last_included_index: u64,
    last_included_term: u64,
}

impl Log {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_included_index(&self) -> u64 {
        self.last_included_index
    }

    pub fn last_included_term(&self) -> u64 {
        self.last_included_term
    }

    fn tail_position(&self, index: u64) -> Option<usize> {
        if index <= self.last_included_index {
            return None;
        }
        let offset = index - self.last_included_index - 1;
        let pos = offset as usize;
        if pos < self.entries.len() {
            Some(pos)
        } else {
            None
        }
    }

    /// Entry at `i`, or absent when `i <= LastIncludedIndex` or `i` is
    /// beyond the end of the log.
    pub fn get(&self, index: u64) -> Option<&LogEntry> {
        self.tail_position(index).map(|pos| &self.entries[pos])
    }

    /// All entries with index strictly greater than `index`.
    pub fn after(&self, index: u64) -> &[LogEntry] {
        if index < self.last_included_index {
            return &self.entries[..];
        }
        let offset = (index - self.last_included_index) as usize;
        if offset >= self.entries.len() {
            &[]
        } else {
            &self.entries[offset..]
        }
    }

    /// The final real entry, or the virtual `(LastIncludedIndex,
    /// LastIncludedTerm, _)` entry when the tail is empty.
    pub fn last(&self) -> LogPosition {
        match self.entries.last() {
            Some(e) => LogPosition {
                index: e.index,
                term: e.term,
            },
            None => LogPosition {
                index: self.last_included_index,
                term: self.last_included_term,
            },
        }
    }

    /// Truncates the tail at `from` and appends `entries`, starting at
    /// index `from`. Idempotent: if `entries` exactly matches the
    /// existing suffix starting at `from`, the log is left unchanged so
    /// that a short, delayed reply can't discard entries a later,
    /// longer append already delivered.
    pub fn rewrite(&mut self, from: u64, entries: &[LogEntry]) {
        if entries.is_empty() {
            return;
        }

        let start_pos = if from <= self.last_included_index {
            0
        } else {
            (from - self.last_included_index - 1) as usize
        };

        let matches_existing = self.entries.len() >= start_pos + entries.len()
            && self.entries[start_pos..start_pos + entries.len()]
                .iter()
                .zip(entries.iter())
                .all(|(a, b)| a.term == b.term && a.index == b.index);

        if matches_existing {
            return;
        }

        self.entries.truncate(start_pos);
        self.entries.extend_from_slice(entries);
    }

    /// Appends a single new entry at `last().index + 1` with the given
    /// term, returning its index. Used by the leader when accepting a
    /// client submission.
    pub fn append(&mut self, term: u64, command: Vec<u8>) -> u64 {
        let index = self.last().index + 1;
        self.entries.push(LogEntry {
            index,
            term,
            command,
        });
        index
    }

    /// Discards all entries with index <= `up_to`, moving the
    /// compaction boundary forward.
    pub fn compact(&mut self, up_to: u64, up_to_term: u64) -> Result<()> {
        if up_to <= self.last_included_index {
            return Err(RaftError::StaleSnapshot {
                requested: up_to,
                commit_index: self.last_included_index,
            });
        }
        let keep_from = (up_to - self.last_included_index) as usize;
        if keep_from >= self.entries.len() {
            self.entries.clear();
        } else {
            self.entries.drain(0..keep_from);
        }
        self.last_included_index = up_to;
        self.last_included_term = up_to_term;
        Ok(())
    }

    /// Resets the log to start immediately after an installed snapshot,
    /// discarding any tail the log previously held. Used when accepting
    /// an out-of-order InstallSnapshot whose boundary is ahead of
    /// everything this peer has.
    pub fn reset_to_snapshot(&mut self, last_included_index: u64, last_included_term: u64) {
        self.entries.clear();
        self.last_included_index = last_included_index;
        self.last_included_term = last_included_term;
    }

    pub fn tail_entries(&self) -> &[LogEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: u64, term: u64) -> LogEntry {
        LogEntry {
            index,
            term,
            command: format!("cmd-{index}").into_bytes(),
        }
    }

    #[test]
    fn empty_log_last_is_virtual_origin() {
        let log = Log::new();
        assert_eq!(log.last(), LogPosition { index: 0, term: 0 });
        assert!(log.get(1).is_none());
    }

    #[test]
    fn append_and_get_are_contiguous() {
        let mut log = Log::new();
        let i1 = log.append(1, b"a".to_vec());
        let i2 = log.append(1, b"b".to_vec());
        assert_eq!((i1, i2), (1, 2));
        assert_eq!(log.get(1).unwrap().command, b"a");
        assert_eq!(log.last(), LogPosition { index: 2, term: 1 });
    }

    #[test]
    fn rewrite_is_idempotent_on_matching_suffix() {
        let mut log = Log::new();
        log.append(1, b"a".to_vec());
        log.append(1, b"b".to_vec());
        log.append(1, b"c".to_vec());

        // A short, delayed AppendEntries reporting only entries 2..=2
        // must not truncate entry 3.
        log.rewrite(2, &[entry(2, 1)]);
        assert_eq!(log.last().index, 3);
        assert_eq!(log.get(3).unwrap().command, b"c");
    }

    #[test]
    fn rewrite_truncates_on_conflict() {
        let mut log = Log::new();
        log.append(1, b"a".to_vec());
        log.append(1, b"b".to_vec());
        log.append(1, b"c".to_vec());

        log.rewrite(2, &[entry(2, 2)]);
        assert_eq!(log.last(), LogPosition { index: 2, term: 2 });
        assert!(log.get(3).is_none());
    }

    #[test]
    fn compact_rejects_stale_boundary() {
        let mut log = Log::new();
        log.append(1, b"a".to_vec());
        log.compact(1, 1).unwrap();
        assert!(matches!(
            log.compact(1, 1),
            Err(RaftError::StaleSnapshot { .. })
        ));
    }

    #[test]
    fn compact_discards_prefix_and_keeps_tail() {
        let mut log = Log::new();
        log.append(1, b"a".to_vec());
        log.append(1, b"b".to_vec());
        log.append(2, b"c".to_vec());

        log.compact(2, 1).unwrap();
        assert_eq!(log.last_included_index(), 2);
        assert!(log.get(1).is_none());
        assert!(log.get(2).is_none());
        assert_eq!(log.get(3).unwrap().command, b"c");
        assert_eq!(log.after(2).len(), 1);
    }
}
