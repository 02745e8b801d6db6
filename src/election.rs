use std::sync::Arc;
use std::time::{Duration, Instant};

use log::info;
use rand::Rng;

use crate::peer::Peer;
use crate::rpc::{RequestVoteArgs, RequestVoteReply, RpcClient};
use crate::state::Role;

impl<R: RpcClient> Peer<R> {
    pub(crate) async fn run_election_loop(self: Arc<Self>) {
        loop {
            let timeout = self.random_election_timeout();
            tokio::select! {
                _ = self.stop.notified() => return,
                _ = tokio::time::sleep(timeout) => {}
            }
            if self.is_stopped() {
                return;
            }
            let should_start = {
                let state = self.state.lock().await;
                state.role != Role::Leader && state.last_heartbeat.elapsed() >= timeout
            };
            if should_start {
                self.start_election().await;
            }
        }
    }

    fn random_election_timeout(&self) -> Duration {
        let (min, max) = (
            self.config.election_timeout_min.as_millis() as u64,
            self.config.election_timeout_max.as_millis() as u64,
        );
        let ms = if min >= max {
            min
        } else {
            rand::thread_rng().gen_range(min..=max)
        };
        Duration::from_millis(ms)
    }

    /// Transitions to candidate, increments the term, votes for self,
    /// persists, and solicits votes from every other peer. Becomes
    /// leader on reaching a majority while still a candidate in the
    /// same term; steps down on observing a higher term; otherwise
    /// falls back to follower once every peer has replied or failed.
    pub(crate) async fn start_election(self: &Arc<Self>) {
        let term = {
            let mut state = self.state.lock().await;
            if state.role == Role::Leader {
                return;
            }
            state.role = Role::Candidate;
            state.current_term += 1;
            state.voted_for = Some(self.id().to_string());
            state.last_heartbeat = Instant::now();
            let persisted = self.persisted_snapshot(&state);
            self.persist_or_abort(&persisted, None);
            state.current_term
        };

        let majority = self.config.majority();
        info!("[{}] starting election for term {term}", self.id());

        if majority <= 1 {
            self.become_leader(term).await;
            return;
        }

        let (last_log_index, last_log_term) = {
            let state = self.state.lock().await;
            (state.last_log_index(), state.last_log_term())
        };
        let args = RequestVoteArgs {
            term,
            candidate_id: self.id().to_string(),
            last_log_index,
            last_log_term,
        };

        let mut join_set = tokio::task::JoinSet::new();
        for peer_addr in self.config.peers.clone() {
            let this = Arc::clone(self);
            let args = args.clone();
            join_set.spawn(async move { this.rpc.request_vote(&peer_addr, args).await.ok() });
        }

        let mut votes_granted = 1usize; // self-vote
        while let Some(joined) = join_set.join_next().await {
            let Ok(Some(reply)) = joined else { continue };
            if self.step_down_if_stale(reply.term).await {
                return;
            }
            if !self.still_candidate_in(term).await {
                return;
            }
            if reply.vote_granted {
                votes_granted += 1;
                if votes_granted >= majority {
                    self.become_leader(term).await;
                    return;
                }
            }
        }

        let mut state = self.state.lock().await;
        if state.role == Role::Candidate && state.current_term == term {
            info!("[{}] election for term {term} failed, reverting to follower", self.id());
            state.role = Role::Follower;
        }
    }

    async fn still_candidate_in(&self, term: u64) -> bool {
        let state = self.state.lock().await;
        state.current_term == term && state.role == Role::Candidate
    }

    /// Returns true (and steps down) iff `observed_term` is strictly
    /// greater than our current term.
    pub(crate) async fn step_down_if_stale(&self, observed_term: u64) -> bool {
        let mut state = self.state.lock().await;
        if observed_term <= state.current_term {
            return false;
        }
        state.current_term = observed_term;
        state.role = Role::Follower;
        state.voted_for = None;
        let persisted = self.persisted_snapshot(&state);
        self.persist_or_abort(&persisted, None);
        true
    }

    pub(crate) async fn become_leader(self: &Arc<Self>, term: u64) {
        {
            let mut state = self.state.lock().await;
            if state.current_term != term || state.role != Role::Candidate {
                return;
            }
            state.role = Role::Leader;
            state.leader_id = Some(self.id().to_string());
            let next = state.last_log_index() + 1;
            for peer_addr in &self.config.peers {
                state.next_index.insert(peer_addr.clone(), next);
                state.match_index.insert(peer_addr.clone(), 0);
            }
            info!("[{}] became leader for term {term}", self.id());
        }
        // Immediately assert leadership with an empty AppendEntries.
        self.wake_all_replication();
    }

    /// `RequestVote` handler (component G dispatch over component D
    /// logic). Grants iff the term check passes, the vote hasn't
    /// already gone to someone else this term, and the candidate's log
    /// is at least as up to date as ours. A granted vote resets the
    /// election timer and is persisted before the reply is returned.
    pub async fn handle_request_vote(&self, args: RequestVoteArgs) -> RequestVoteReply {
        let mut state = self.state.lock().await;

        let mut need_persist = false;
        if args.term > state.current_term {
            state.current_term = args.term;
            state.role = Role::Follower;
            state.voted_for = None;
            need_persist = true;
        }

        let mut vote_granted = false;
        if args.term >= state.current_term {
            let can_vote = state.voted_for.is_none()
                || state.voted_for.as_deref() == Some(args.candidate_id.as_str());
            let my_last_term = state.last_log_term();
            let my_last_index = state.last_log_index();
            let candidate_up_to_date = args.last_log_term > my_last_term
                || (args.last_log_term == my_last_term && args.last_log_index >= my_last_index);

            if can_vote && candidate_up_to_date {
                state.voted_for = Some(args.candidate_id.clone());
                state.last_heartbeat = Instant::now();
                need_persist = true;
                vote_granted = true;
            }
        }

        let reply_term = state.current_term;
        if need_persist {
            let persisted = self.persisted_snapshot(&state);
            self.persist_or_abort(&persisted, None);
        }
        RequestVoteReply {
            term: reply_term,
            vote_granted,
        }
    }
}
