mod common;

use common::peer_addr;
use raft_consensus::{AppendEntriesArgs, LogEntry, MemoryPersister, Peer, RaftConfig};
use raft_consensus::transport::InProcessRpc;

fn entry(index: u64, term: u64) -> LogEntry {
    LogEntry {
        index,
        term,
        command: format!("cmd-{index}").into_bytes(),
    }
}

async fn bare_peer() -> std::sync::Arc<Peer<InProcessRpc>> {
    let config = RaftConfig::new(peer_addr(0), vec![peer_addr(1)]);
    let persister = Box::new(MemoryPersister::new());
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    Peer::new(config, persister, InProcessRpc::new(), tx).await
}

/// A conflicting probe skips an entire wrong term in a single round trip
/// instead of backing up one index at a time.
#[tokio::test]
async fn conflict_index_skips_whole_term() {
    let follower = bare_peer().await;

    let seed = AppendEntriesArgs {
        term: 2,
        leader_id: "leader-a".into(),
        prev_log_index: 0,
        prev_log_term: 0,
        entries: vec![
            entry(1, 1),
            entry(2, 1),
            entry(3, 1),
            entry(4, 2),
            entry(5, 2),
            entry(6, 2),
        ],
        leader_commit: 0,
    };
    let reply = follower.handle_append_entries(seed).await;
    assert!(reply.success);

    let probe = AppendEntriesArgs {
        term: 3,
        leader_id: "leader-b".into(),
        prev_log_index: 6,
        prev_log_term: 3,
        entries: vec![],
        leader_commit: 0,
    };
    let reply = follower.handle_append_entries(probe).await;
    assert!(!reply.success);
    assert_eq!(reply.conflict_index, 3, "should skip past every term-2 entry at once");
    assert_eq!(reply.term, 3, "follower adopts the higher term even on a failed append");
}

/// A follower whose log is shorter than the leader's probe point reports
/// its own last index so the leader backs all the way up to it.
#[tokio::test]
async fn conflict_index_on_short_log_reports_local_end() {
    let follower = bare_peer().await;

    let probe = AppendEntriesArgs {
        term: 1,
        leader_id: "leader-a".into(),
        prev_log_index: 5,
        prev_log_term: 1,
        entries: vec![],
        leader_commit: 0,
    };
    let reply = follower.handle_append_entries(probe).await;
    assert!(!reply.success);
    assert_eq!(reply.conflict_index, 0, "empty log reports its virtual origin");
}
