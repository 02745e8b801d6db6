mod common;

use common::{await_applied_command, await_leader, spawn_cluster};

/// Killing the leader forces a new election among the survivors, which
/// still make progress on new commands with the remaining majority.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cluster_recovers_after_leader_is_killed() {
    let (peers, mut receivers, rpc) = spawn_cluster(3).await;

    let first_leader = await_leader(&peers).await.expect("a leader should emerge");
    let (index, _term, ok) = peers[first_leader]
        .submit(b"before-crash".to_vec())
        .await;
    assert!(ok);
    let applied = await_applied_command(&mut receivers[first_leader], index).await;
    assert_eq!(applied, b"before-crash");

    peers[first_leader].kill();
    rpc.unregister(peers[first_leader].id());

    let survivors: Vec<usize> = (0..peers.len()).filter(|&i| i != first_leader).collect();
    let new_leader = loop {
        let mut found = None;
        for &i in &survivors {
            let (_, is_leader) = peers[i].get_state().await;
            if is_leader {
                found = Some(i);
                break;
            }
        }
        if let Some(i) = found {
            break i;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    };
    assert_ne!(new_leader, first_leader);

    let (index, _term, ok) = peers[new_leader].submit(b"after-crash".to_vec()).await;
    assert!(ok, "new leader must accept submissions");
    let applied = await_applied_command(&mut receivers[new_leader], index).await;
    assert_eq!(applied, b"after-crash");
}
