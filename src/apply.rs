use log::{debug, warn};

use crate::peer::Peer;
use crate::rpc::RpcClient;

/// Delivered to the application in strictly increasing `index` order,
/// never duplicated. A `Snapshot` event always precedes any `Command`
/// event for an index beyond its boundary.
#[derive(Debug, Clone)]
pub enum ApplyMsg {
    Command {
        index: u64,
        term: u64,
        command: Vec<u8>,
    },
    Snapshot {
        last_included_index: u64,
        last_included_term: u64,
        bytes: Vec<u8>,
    },
}

impl<R: RpcClient> Peer<R> {
    /// Dedicated apply worker. Wakes on an explicit signal (new commit,
    /// accepted snapshot) or a periodic tick, and on each wake drains
    /// everything newly applicable before sleeping again.
    pub(crate) async fn run_apply_loop(self: std::sync::Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.stop.notified() => return,
                _ = self.apply_notify.notified() => {}
                _ = tokio::time::sleep(self.config.replication_check_period) => {}
            }
            if self.is_stopped() {
                return;
            }
            self.apply_ready().await;
        }
    }

    async fn apply_ready(&self) {
        // Deliver any snapshot accepted out-of-band before further
        // commands, then stream committed entries strictly by index.
        let pending_snapshot = {
            let mut state = self.state.lock().await;
            state.pending_snapshot.take()
        };
        if let Some(snapshot) = pending_snapshot {
            let msg = ApplyMsg::Snapshot {
                last_included_index: snapshot.last_included_index,
                last_included_term: snapshot.last_included_term,
                bytes: snapshot.bytes,
            };
            if self.apply_tx.send(msg).is_err() {
                warn!("[{}] apply sink closed, dropping snapshot event", self.id());
                return;
            }
        }

        loop {
            let next = {
                let mut state = self.state.lock().await;
                if state.last_applied >= state.commit_index {
                    None
                } else {
                    let next_index = state.last_applied + 1;
                    match state.log.get(next_index) {
                        Some(entry) => {
                            let msg = ApplyMsg::Command {
                                index: entry.index,
                                term: entry.term,
                                command: entry.command.clone(),
                            };
                            state.last_applied = next_index;
                            Some(msg)
                        }
                        None => {
                            // next_index fell inside the compacted
                            // prefix without a matching snapshot event;
                            // nothing to deliver until one arrives.
                            None
                        }
                    }
                }
            };
            match next {
                Some(msg) => {
                    debug!("[{}] applying {:?}", self.id(), msg);
                    if self.apply_tx.send(msg).is_err() {
                        warn!("[{}] apply sink closed, stopping apply loop", self.id());
                        return;
                    }
                }
                None => break,
            }
        }
    }
}
