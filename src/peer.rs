use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{error, info};
use tokio::sync::{mpsc, Mutex, Notify};

use crate::apply::ApplyMsg;
use crate::config::RaftConfig;
use crate::log::Log;
use crate::persist::{Persister, PersistedState};
use crate::rpc::RpcClient;
use crate::state::{PeerState, PendingSnapshot, Role};

/// A single Raft peer. Owns its state exclusively behind one mutex;
/// `R` is the outbound RPC transport, generic rather than boxed so the
/// same code path drives both the production TCP transport and the
/// in-process transport used in tests.
pub struct Peer<R: RpcClient> {
    pub(crate) config: RaftConfig,
    pub(crate) state: Mutex<PeerState>,
    persister: Box<dyn Persister>,
    pub(crate) apply_tx: mpsc::UnboundedSender<ApplyMsg>,
    pub(crate) rpc: R,

    pub(crate) stop: Notify,
    stopped: AtomicBool,

    pub(crate) apply_notify: Notify,
    pub(crate) commit_notify: Notify,
    pub(crate) heartbeat_notify: HashMap<String, Notify>,
    pub(crate) replicate_notify: HashMap<String, Notify>,
}

impl<R: RpcClient> Peer<R> {
    /// Constructs a peer, recovering `currentTerm`, `votedFor`, the log,
    /// and any snapshot from `persister`. Does not start any background
    /// worker — call `start` for that.
    pub async fn new(
        config: RaftConfig,
        persister: Box<dyn Persister>,
        rpc: R,
        apply_tx: mpsc::UnboundedSender<ApplyMsg>,
    ) -> Arc<Self> {
        let mut state = PeerState::new();

        match persister.load() {
            Ok(Some((persisted, snapshot))) => {
                state.current_term = persisted.current_term;
                state.voted_for = persisted.voted_for;
                let mut log = Log::new();
                log.reset_to_snapshot(persisted.last_included_index, persisted.last_included_term);
                log.rewrite(persisted.last_included_index + 1, &persisted.log_tail);
                state.log = log;
                if let Some(bytes) = snapshot {
                    // Already applied before the crash; fast-forward the
                    // cursors and hand the apply loop the bytes again so
                    // the application can re-install its state machine.
                    state.commit_index = persisted.last_included_index;
                    state.last_applied = persisted.last_included_index;
                    state.snapshot_bytes = Some(bytes.clone());
                    if persisted.last_included_index > 0 {
                        state.pending_snapshot = Some(PendingSnapshot {
                            last_included_index: persisted.last_included_index,
                            last_included_term: persisted.last_included_term,
                            bytes,
                        });
                    }
                }
                info!(
                    "[{}] recovered term={} voted_for={:?} log_len={}",
                    config.server_id,
                    state.current_term,
                    state.voted_for,
                    state.log.tail_entries().len()
                );
            }
            Ok(None) => {}
            Err(e) => {
                error!("[{}] failed to load persisted state: {e}", config.server_id);
            }
        }

        let mut heartbeat_notify = HashMap::new();
        let mut replicate_notify = HashMap::new();
        for peer_addr in &config.peers {
            heartbeat_notify.insert(peer_addr.clone(), Notify::new());
            replicate_notify.insert(peer_addr.clone(), Notify::new());
        }

        Arc::new(Self {
            config,
            state: Mutex::new(state),
            persister,
            apply_tx,
            rpc,
            stop: Notify::new(),
            stopped: AtomicBool::new(false),
            apply_notify: Notify::new(),
            commit_notify: Notify::new(),
            heartbeat_notify,
            replicate_notify,
        })
    }

    pub fn id(&self) -> &str {
        &self.config.server_id
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Spawns every background worker: the election timer, one
    /// heartbeat and one replication task per remote peer, the commit
    /// advancer, and the apply loop.
    pub fn start(self: &Arc<Self>) {
        tokio::spawn(Arc::clone(self).run_election_loop());
        tokio::spawn(Arc::clone(self).run_commit_loop());
        tokio::spawn(Arc::clone(self).run_apply_loop());
        for peer_addr in self.config.peers.clone() {
            tokio::spawn(Arc::clone(self).run_heartbeat_loop(peer_addr.clone()));
            tokio::spawn(Arc::clone(self).run_replication_loop(peer_addr));
        }
    }

    /// Closes the stop channel; every worker observes it on its next
    /// select and exits. After this, all operations become no-ops.
    pub fn kill(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            self.stop.notify_waiters();
        }
    }

    pub async fn get_state(&self) -> (u64, bool) {
        let state = self.state.lock().await;
        (state.current_term, state.role == Role::Leader)
    }

    /// Appends `command` at the end of the log if this peer is
    /// currently the leader, persists before returning, and wakes every
    /// follower's replicator. Returns `(0, 0, false)` without mutating
    /// anything if this peer is not the leader or has been killed.
    pub async fn submit(&self, command: Vec<u8>) -> (u64, u64, bool) {
        if self.is_stopped() {
            return (0, 0, false);
        }
        let outcome = {
            let mut state = self.state.lock().await;
            match state.submit(command) {
                Some((index, term)) => {
                    let persisted = self.persisted_snapshot(&state);
                    Some((index, term, persisted))
                }
                None => None,
            }
        };
        let Some((index, term, persisted)) = outcome else {
            return (0, 0, false);
        };
        self.persist_or_abort(&persisted, None);
        self.wake_all_replication();
        (index, term, true)
    }

    /// Application-driven compaction through `up_to`, a contiguous
    /// applied prefix. No-ops (propagates the error silently into a log
    /// line) if `up_to` is not ahead of the current compaction boundary
    /// — the application is expected to only call this with indices it
    /// has actually applied, so a stale call indicates an application
    /// bug, not a protocol condition worth surfacing as an RPC outcome.
    pub async fn snapshot(&self, up_to: u64, bytes: Vec<u8>) {
        if self.is_stopped() {
            return;
        }
        let persisted = {
            let mut state = self.state.lock().await;
            if let Err(e) = state.compact_log(up_to) {
                error!("[{}] snapshot({up_to}) rejected: {e}", self.id());
                return;
            }
            state.snapshot_bytes = Some(bytes.clone());
            self.persisted_snapshot(&state)
        };
        self.persist_or_abort(&persisted, Some(&bytes));
    }

    /// Accepts or rejects an out-of-band InstallSnapshot. Returns
    /// `false` without mutating anything if the snapshot is not newer
    /// than `commit_index`.
    pub async fn cond_install_snapshot(
        &self,
        last_included_index: u64,
        last_included_term: u64,
        bytes: Vec<u8>,
    ) -> bool {
        if self.is_stopped() {
            return false;
        }
        let (accepted, persisted) = {
            let mut state = self.state.lock().await;
            let accepted =
                state.cond_install_snapshot(last_included_index, last_included_term, bytes.clone());
            (accepted, self.persisted_snapshot(&state))
        };
        if accepted {
            self.persist_or_abort(&persisted, Some(&bytes));
        }
        accepted
    }

    pub(crate) fn persisted_snapshot(&self, state: &PeerState) -> PersistedState {
        PersistedState {
            current_term: state.current_term,
            voted_for: state.voted_for.clone(),
            log_tail: state.log.tail_entries().to_vec(),
            last_included_index: state.log.last_included_index(),
            last_included_term: state.log.last_included_term(),
        }
    }

    /// Persistence is the one failure mode spec.md §7 treats as fatal:
    /// a peer that can't durably record `(currentTerm, votedFor, log)`
    /// can no longer safely participate, so it stops itself rather than
    /// risk exposing an unpersisted decision.
    pub(crate) fn persist_or_abort(&self, state: &PersistedState, snapshot: Option<&[u8]>) {
        if let Err(e) = self.persister.save(state, snapshot) {
            error!("[{}] persistence failure, stopping peer: {e}", self.id());
            self.kill();
        }
    }

    pub(crate) fn wake_all_replication(&self) {
        for notify in self.replicate_notify.values() {
            notify.notify_one();
        }
    }

    pub(crate) fn wake_replication(&self, peer_addr: &str) {
        if let Some(notify) = self.replicate_notify.get(peer_addr) {
            notify.notify_one();
        }
    }

    pub(crate) fn wake_commit_advance(&self) {
        self.commit_notify.notify_one();
    }

    pub(crate) fn wake_apply(&self) {
        self.apply_notify.notify_one();
    }
}
