use std::sync::Arc;
use std::time::Instant;

use log::{debug, info};

use crate::log::LogEntry;
use crate::peer::Peer;
use crate::rpc::{
    AppendEntriesArgs, AppendEntriesReply, InstallSnapshotArgs, InstallSnapshotReply, RpcClient,
};
use crate::state::{PendingSnapshot, Role};

enum ReplicationPlan {
    InstallSnapshot,
    AppendEntries {
        term: u64,
        prev_log_index: u64,
        prev_log_term: u64,
        entries: Vec<LogEntry>,
        leader_commit: u64,
    },
}

impl<R: RpcClient> Peer<R> {
    pub(crate) async fn run_heartbeat_loop(self: Arc<Self>, peer_addr: String) {
        loop {
            let notify = self
                .heartbeat_notify
                .get(&peer_addr)
                .expect("heartbeat channel registered for every configured peer");
            tokio::select! {
                _ = self.stop.notified() => return,
                _ = notify.notified() => {}
                _ = tokio::time::sleep(self.config.heartbeat_period) => {}
            }
            if self.is_stopped() {
                return;
            }
            self.replicate_to(&peer_addr).await;
        }
    }

    pub(crate) async fn run_replication_loop(self: Arc<Self>, peer_addr: String) {
        loop {
            let notify = self
                .replicate_notify
                .get(&peer_addr)
                .expect("replicate channel registered for every configured peer");
            tokio::select! {
                _ = self.stop.notified() => return,
                _ = notify.notified() => {}
                _ = tokio::time::sleep(self.config.replication_check_period) => {}
            }
            if self.is_stopped() {
                return;
            }
            self.replicate_to(&peer_addr).await;
        }
    }

    /// One replication attempt for `peer_addr`: decides between
    /// InstallSnapshot and AppendEntries based on whether the
    /// follower's next probe point has fallen behind the compaction
    /// boundary, then sends exactly one RPC.
    async fn replicate_to(&self, peer_addr: &str) {
        if self.is_stopped() {
            return;
        }
        let plan = {
            let state = self.state.lock().await;
            if state.role != Role::Leader {
                return;
            }
            let last_included = state.log.last_included_index();
            let next_index = *state.next_index.get(peer_addr).unwrap_or(&(last_included + 1));

            if next_index <= last_included {
                ReplicationPlan::InstallSnapshot
            } else {
                let prev_log_index = next_index - 1;
                let prev_log_term = if prev_log_index == last_included {
                    state.log.last_included_term()
                } else {
                    state.log.get(prev_log_index).map(|e| e.term).unwrap_or(0)
                };
                ReplicationPlan::AppendEntries {
                    term: state.current_term,
                    prev_log_index,
                    prev_log_term,
                    entries: state.log.after(prev_log_index).to_vec(),
                    leader_commit: state.commit_index,
                }
            }
        };

        match plan {
            ReplicationPlan::InstallSnapshot => self.send_install_snapshot(peer_addr).await,
            ReplicationPlan::AppendEntries {
                term,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
            } => {
                self.send_append_entries(
                    peer_addr,
                    term,
                    prev_log_index,
                    prev_log_term,
                    entries,
                    leader_commit,
                )
                .await
            }
        }
    }

    async fn send_append_entries(
        &self,
        peer_addr: &str,
        term: u64,
        prev_log_index: u64,
        prev_log_term: u64,
        entries: Vec<LogEntry>,
        leader_commit: u64,
    ) {
        let entries_len = entries.len() as u64;
        let args = AppendEntriesArgs {
            term,
            leader_id: self.id().to_string(),
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit,
        };

        let reply = match self.rpc.append_entries(peer_addr, args).await {
            Ok(reply) => reply,
            Err(_) => return, // TransportFailure: no reply, retried on the next tick
        };

        if self.step_down_if_stale(reply.term).await {
            return;
        }

        let mut state = self.state.lock().await;
        if state.current_term != term || state.role != Role::Leader {
            return; // stale: term or role changed since we sent this request
        }

        if reply.success {
            // Idempotent under reordering: computed from the original
            // request parameters, never from current leader state.
            let new_match = prev_log_index + entries_len;
            state.match_index.insert(peer_addr.to_string(), new_match);
            state.next_index.insert(peer_addr.to_string(), new_match + 1);
            drop(state);
            self.wake_commit_advance();
        } else {
            state
                .next_index
                .insert(peer_addr.to_string(), reply.conflict_index + 1);
            drop(state);
            self.wake_replication(peer_addr);
        }
    }

    async fn send_install_snapshot(&self, peer_addr: &str) {
        let (term, args) = {
            let state = self.state.lock().await;
            if state.role != Role::Leader {
                return;
            }
            let args = InstallSnapshotArgs {
                term: state.current_term,
                leader_id: self.id().to_string(),
                last_included_index: state.log.last_included_index(),
                last_included_term: state.log.last_included_term(),
                data: state.snapshot_bytes.clone().unwrap_or_default(),
                done: true,
            };
            (state.current_term, args)
        };
        let last_included_index = args.last_included_index;

        let reply = match self.rpc.install_snapshot(peer_addr, args).await {
            Ok(reply) => reply,
            Err(_) => return,
        };

        if self.step_down_if_stale(reply.term).await {
            return;
        }

        let mut state = self.state.lock().await;
        if state.current_term != term || state.role != Role::Leader {
            return;
        }
        let new_match = last_included_index;
        let current = state.match_index.get(peer_addr).copied().unwrap_or(0);
        if new_match > current {
            state.match_index.insert(peer_addr.to_string(), new_match);
        }
        state
            .next_index
            .insert(peer_addr.to_string(), new_match + 1);
        drop(state);
        self.wake_replication(peer_addr);
    }

    /// `AppendEntries` handler (follower side). See spec.md §4.E for the
    /// numbered steps this follows exactly.
    pub async fn handle_append_entries(&self, args: AppendEntriesArgs) -> AppendEntriesReply {
        let mut state = self.state.lock().await;

        if args.term > state.current_term {
            state.current_term = args.term;
            state.role = Role::Follower;
            state.voted_for = None;
            let persisted = self.persisted_snapshot(&state);
            self.persist_or_abort(&persisted, None);
        }

        if args.term < state.current_term {
            return AppendEntriesReply {
                term: state.current_term,
                success: false,
                conflict_index: 0,
            };
        }

        state.last_heartbeat = Instant::now();
        state.role = Role::Follower;
        state.leader_id = Some(args.leader_id.clone());

        let last_included = state.log.last_included_index();

        if args.prev_log_index < last_included {
            // Leader is probing before our compaction boundary; tell it
            // to jump straight to the boundary.
            return AppendEntriesReply {
                term: state.current_term,
                success: false,
                conflict_index: last_included + 1,
            };
        }

        let prev_term_here = if args.prev_log_index == last_included {
            Some(state.log.last_included_term())
        } else {
            state.log.get(args.prev_log_index).map(|e| e.term)
        };

        let prev_term_here = match prev_term_here {
            Some(t) => t,
            None => {
                return AppendEntriesReply {
                    term: state.current_term,
                    success: false,
                    conflict_index: state.log.last().index,
                };
            }
        };

        if prev_term_here != args.prev_log_term {
            let mut i = args.prev_log_index;
            while i > last_included {
                let term_at_i = if i == last_included {
                    state.log.last_included_term()
                } else {
                    state.log.get(i).map(|e| e.term).unwrap_or(prev_term_here)
                };
                if term_at_i != prev_term_here {
                    break;
                }
                i -= 1;
            }
            return AppendEntriesReply {
                term: state.current_term,
                success: false,
                conflict_index: i,
            };
        }

        state.log.rewrite(args.prev_log_index + 1, &args.entries);
        let persisted = self.persisted_snapshot(&state);
        self.persist_or_abort(&persisted, None);

        let reply_term = state.current_term;
        if args.leader_commit > state.commit_index {
            state.commit_index = std::cmp::min(args.leader_commit, state.log.last().index);
            drop(state);
            self.wake_apply();
        }

        AppendEntriesReply {
            term: reply_term,
            success: true,
            conflict_index: 0,
        }
    }

    /// `InstallSnapshot` handler (follower side). Delivers the snapshot
    /// to the apply pipeline ahead of any subsequent committed entry;
    /// the application's eventual `CondInstallSnapshot` call is what
    /// actually resets the log and cursors.
    pub async fn handle_install_snapshot(&self, args: InstallSnapshotArgs) -> InstallSnapshotReply {
        let mut state = self.state.lock().await;

        if args.term > state.current_term {
            state.current_term = args.term;
            state.role = Role::Follower;
            state.voted_for = None;
            let persisted = self.persisted_snapshot(&state);
            self.persist_or_abort(&persisted, None);
        }

        if args.term < state.current_term {
            return InstallSnapshotReply {
                term: state.current_term,
            };
        }

        state.last_heartbeat = Instant::now();
        state.role = Role::Follower;
        state.leader_id = Some(args.leader_id.clone());

        if args.last_included_index <= state.commit_index {
            // Stale: we're already at least this far along.
            return InstallSnapshotReply {
                term: state.current_term,
            };
        }

        info!(
            "[{}] queuing snapshot up to index {} for apply",
            self.id(),
            args.last_included_index
        );
        state.pending_snapshot = Some(PendingSnapshot {
            last_included_index: args.last_included_index,
            last_included_term: args.last_included_term,
            bytes: args.data,
        });
        let term = state.current_term;
        drop(state);
        self.wake_apply();

        InstallSnapshotReply { term }
    }

    pub(crate) async fn run_commit_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.stop.notified() => return,
                _ = self.commit_notify.notified() => {}
                _ = tokio::time::sleep(self.config.replication_check_period) => {}
            }
            if self.is_stopped() {
                return;
            }
            self.advance_commit_index().await;
        }
    }

    /// Figure 8 safeguard: only ever commits by counting replicas on an
    /// entry from the leader's *current* term. A prior-term entry can
    /// only become committed as a side effect of a current-term entry
    /// advancing past it.
    async fn advance_commit_index(&self) {
        let mut state = self.state.lock().await;
        if state.role != Role::Leader {
            return;
        }

        let last_index = state.last_log_index();
        let current_term = state.current_term;
        let majority = self.config.majority();
        let mut advanced = false;

        let mut n = state.commit_index + 1;
        while n <= last_index {
            let mut count = 1; // the leader itself holds every entry up to last_index
            for match_index in state.match_index.values() {
                if *match_index >= n {
                    count += 1;
                }
            }
            let term_matches = state.log.get(n).map(|e| e.term) == Some(current_term);
            if count >= majority && term_matches {
                state.commit_index = n;
                advanced = true;
            }
            n += 1;
        }

        if advanced {
            debug!("[{}] commit_index advanced to {}", self.id(), state.commit_index);
            drop(state);
            self.wake_apply();
        }
    }
}
