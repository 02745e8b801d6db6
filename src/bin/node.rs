use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use log::{error, info};
use raft_consensus::{ApplyMsg, FilePersister, Peer, RaftConfig, TcpRpcClient};

/// Runs one Raft peer: exposes its RPC surface over TCP and logs every
/// event the apply pipeline delivers. A thin demo harness, not the
/// client-facing service layered on top of the core (out of scope for
/// this crate).
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// This peer's own id, also the host:port it listens on.
    #[arg(long)]
    id: String,

    /// Addresses of every other peer in the fixed set.
    #[arg(long, value_delimiter = ',')]
    peers: Vec<String>,

    /// Directory to persist state and snapshots under.
    #[arg(long, default_value = ".")]
    data_dir: String,

    /// If set, submits a demo command on this interval whenever this
    /// peer happens to be leader. Exists only to exercise the binary.
    #[arg(long)]
    demo_submit_interval_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let persister = Box::new(FilePersister::new(&args.data_dir, &args.id));
    let (apply_tx, mut apply_rx) = tokio::sync::mpsc::unbounded_channel();
    let config = RaftConfig::new(args.id.clone(), args.peers.clone());
    let rpc = TcpRpcClient::new();

    info!("[{}] starting with peers {:?}", args.id, args.peers);
    let peer = Peer::new(config, persister, rpc, apply_tx).await;
    peer.start();

    let bind_addr = args.id.clone();
    let listener_peer = Arc::clone(&peer);
    tokio::spawn(async move {
        if let Err(e) = raft_consensus::transport::serve(listener_peer, &bind_addr).await {
            error!("RPC listener stopped: {e}");
        }
    });

    if let Some(interval_ms) = args.demo_submit_interval_ms {
        let submit_peer = Arc::clone(&peer);
        let server_id = args.id.clone();
        tokio::spawn(async move {
            let mut counter = 0u64;
            loop {
                tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                counter += 1;
                let command = format!("tick-{counter}").into_bytes();
                let (index, term, is_leader) = submit_peer.submit(command).await;
                if is_leader {
                    info!("[{server_id}] submitted tick-{counter} at index={index} term={term}");
                }
            }
        });
    }

    while let Some(event) = apply_rx.recv().await {
        match event {
            ApplyMsg::Command {
                index,
                term,
                command,
            } => {
                info!(
                    "[{}] applied index={index} term={term} command={:?}",
                    args.id,
                    String::from_utf8_lossy(&command)
                );
            }
            ApplyMsg::Snapshot {
                last_included_index,
                last_included_term,
                bytes,
            } => {
                info!(
                    "[{}] applied snapshot through index={last_included_index} term={last_included_term} ({} bytes)",
                    args.id,
                    bytes.len()
                );
            }
        }
    }

    Ok(())
}
