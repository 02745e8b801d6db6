mod common;

use common::{await_applied_command, await_leader, spawn_cluster};

/// Across a leader change, every peer that applies an index applies the
/// same command the original cluster agreed on — state machine safety
/// holds even though the entries that carried the early commands were
/// written under a term that is no longer current.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn commands_survive_a_leader_change_in_order() {
    let (peers, mut receivers, rpc) = spawn_cluster(5).await;

    let first_leader = await_leader(&peers).await.expect("a leader should emerge");
    let before = ["c1", "c2", "c3"];
    for cmd in before {
        let (index, _term, ok) = peers[first_leader].submit(cmd.as_bytes().to_vec()).await;
        assert!(ok);
        await_applied_command(&mut receivers[first_leader], index).await;
    }

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

    let after = ["c4", "c5"];
    for cmd in after {
        let (index, _term, ok) = peers[new_leader].submit(cmd.as_bytes().to_vec()).await;
        assert!(ok, "new leader must accept submissions");
        await_applied_command(&mut receivers[new_leader], index).await;
    }

    let expected = ["c1", "c2", "c3", "c4", "c5"];
    let new_leader_rx = &mut receivers[new_leader];
    for (i, cmd) in expected.iter().enumerate() {
        let applied = await_applied_command(new_leader_rx, (i + 1) as u64).await;
        assert_eq!(applied, cmd.as_bytes(), "index {} diverged across the leader change", i + 1);
    }
}
