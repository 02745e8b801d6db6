mod common;

use std::time::Duration;

use common::{await_leader, spawn_cluster};

/// Five peers starting together can have several candidates racing in
/// the same term on the first round; the cluster must still converge to
/// exactly one leader, and never more than one at a time afterward.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cluster_converges_to_a_single_leader() {
    let (peers, _receivers, _rpc) = spawn_cluster(5).await;

    let leader_idx = await_leader(&peers)
        .await
        .expect("a leader should emerge even if the first round splits the vote");
    let (term, _) = peers[leader_idx].get_state().await;
    assert!(term >= 1);

    for _ in 0..10 {
        let mut leaders = 0;
        for peer in &peers {
            let (_, is_leader) = peer.get_state().await;
            if is_leader {
                leaders += 1;
            }
        }
        assert!(leaders <= 1, "at most one peer may hold leadership at a time");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
