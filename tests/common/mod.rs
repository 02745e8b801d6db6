use std::sync::Arc;
use std::time::Duration;

use raft_consensus::{ApplyMsg, MemoryPersister, Peer, RaftConfig};
use raft_consensus::transport::InProcessRpc;
use tokio::sync::mpsc::UnboundedReceiver;

pub fn peer_addr(i: usize) -> String {
    format!("peer-{i}")
}

/// Spins up `n` in-process peers sharing one `InProcessRpc` registry, each
/// with its own `MemoryPersister`, and starts their background workers.
/// Returns the peers alongside the apply-channel receiver for each.
pub async fn spawn_cluster(
    n: usize,
) -> (
    Vec<Arc<Peer<InProcessRpc>>>,
    Vec<UnboundedReceiver<ApplyMsg>>,
    InProcessRpc,
) {
    let rpc = InProcessRpc::new();
    let mut peers = Vec::with_capacity(n);
    let mut receivers = Vec::with_capacity(n);

    for i in 0..n {
        let peer_addrs: Vec<String> = (0..n).filter(|&j| j != i).map(peer_addr).collect();
        let config = RaftConfig::new(peer_addr(i), peer_addrs);
        let persister = Box::new(MemoryPersister::new());
        let (apply_tx, apply_rx) = tokio::sync::mpsc::unbounded_channel();
        let peer = Peer::new(config, persister, rpc.clone(), apply_tx).await;
        rpc.register(&peer);
        peers.push(peer);
        receivers.push(apply_rx);
    }

    for peer in &peers {
        peer.start();
    }

    (peers, receivers, rpc)
}

/// Polls `get_state` until exactly one peer reports itself leader for a
/// single term, or the deadline passes.
pub async fn await_leader(peers: &[Arc<Peer<InProcessRpc>>]) -> Option<usize> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        let mut leaders = Vec::new();
        for (i, peer) in peers.iter().enumerate() {
            let (_, is_leader) = peer.get_state().await;
            if is_leader {
                leaders.push(i);
            }
        }
        if leaders.len() == 1 {
            return Some(leaders[0]);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    None
}

/// Drains applied `Command` events from `rx` until `index` has been
/// delivered or the deadline passes, returning the matching command bytes.
pub async fn await_applied_command(rx: &mut UnboundedReceiver<ApplyMsg>, index: u64) -> Vec<u8> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            panic!("timed out waiting for index {index} to be applied");
        }
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Some(ApplyMsg::Command { index: i, command, .. })) if i == index => {
                return command;
            }
            Ok(Some(_)) => continue,
            Ok(None) => panic!("apply channel closed before index {index} was delivered"),
            Err(_) => panic!("timed out waiting for index {index} to be applied"),
        }
    }
}
