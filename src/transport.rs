use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::errors::{RaftError, Result};
use crate::peer::Peer;
use crate::rpc::{
    AppendEntriesArgs, AppendEntriesReply, InstallSnapshotArgs, InstallSnapshotReply,
    RequestVoteArgs, RequestVoteReply, RpcClient,
};

/// Wire envelope for the TCP transport: one request, one matching
/// reply, length-prefixed JSON over a single short-lived connection —
/// adapted from the teacher's `write_u32(len)` + bytes framing.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum RaftMessage {
    RequestVote(RequestVoteArgs),
    RequestVoteReply(RequestVoteReply),
    AppendEntries(AppendEntriesArgs),
    AppendEntriesReply(AppendEntriesReply),
    InstallSnapshot(InstallSnapshotArgs),
    InstallSnapshotReply(InstallSnapshotReply),
}

async fn write_framed(stream: &mut TcpStream, message: &RaftMessage, target: &str) -> Result<()> {
    let map_io = |e: std::io::Error| RaftError::TransportFailure {
        target: target.to_string(),
        source: e,
    };
    let bytes = serde_json::to_vec(message).map_err(|e| RaftError::Codec(e.to_string()))?;
    stream
        .write_u32(bytes.len() as u32)
        .await
        .map_err(map_io)?;
    stream.write_all(&bytes).await.map_err(map_io)?;
    stream.flush().await.map_err(map_io)
}

async fn read_framed(stream: &mut TcpStream, target: &str) -> Result<RaftMessage> {
    let map_io = |e: std::io::Error| RaftError::TransportFailure {
        target: target.to_string(),
        source: e,
    };
    let len = stream.read_u32().await.map_err(map_io)?;
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await.map_err(map_io)?;
    serde_json::from_slice(&buf).map_err(|e| RaftError::Codec(e.to_string()))
}

/// Production `RpcClient`: dials `target` fresh for every call. No
/// connection pooling — peer-to-peer RPC volume in Raft is low enough
/// (one per heartbeat period per follower) that this is simpler than it
/// is slow.
#[derive(Clone, Default)]
pub struct TcpRpcClient;

impl TcpRpcClient {
    pub fn new() -> Self {
        Self
    }

    async fn call(&self, target: &str, request: RaftMessage) -> Result<RaftMessage> {
        let mut stream = TcpStream::connect(target)
            .await
            .map_err(|e| RaftError::TransportFailure {
                target: target.to_string(),
                source: e,
            })?;
        write_framed(&mut stream, &request, target).await?;
        read_framed(&mut stream, target).await
    }
}

impl RpcClient for TcpRpcClient {
    async fn append_entries(
        &self,
        target: &str,
        args: AppendEntriesArgs,
    ) -> Result<AppendEntriesReply> {
        match self.call(target, RaftMessage::AppendEntries(args)).await? {
            RaftMessage::AppendEntriesReply(reply) => Ok(reply),
            _ => Err(RaftError::Codec("unexpected reply to AppendEntries".into())),
        }
    }

    async fn request_vote(
        &self,
        target: &str,
        args: RequestVoteArgs,
    ) -> Result<RequestVoteReply> {
        match self.call(target, RaftMessage::RequestVote(args)).await? {
            RaftMessage::RequestVoteReply(reply) => Ok(reply),
            _ => Err(RaftError::Codec("unexpected reply to RequestVote".into())),
        }
    }

    async fn install_snapshot(
        &self,
        target: &str,
        args: InstallSnapshotArgs,
    ) -> Result<InstallSnapshotReply> {
        match self
            .call(target, RaftMessage::InstallSnapshot(args))
            .await?
        {
            RaftMessage::InstallSnapshotReply(reply) => Ok(reply),
            _ => Err(RaftError::Codec(
                "unexpected reply to InstallSnapshot".into(),
            )),
        }
    }
}

/// Binds `bind_addr` and serves inbound RPCs for `peer` until it is
/// killed or the listener errors out. Each connection carries exactly
/// one request/reply pair, dispatched to the matching handler in
/// `election.rs`/`replication.rs`.
pub async fn serve<R: RpcClient>(peer: Arc<Peer<R>>, bind_addr: &str) -> Result<()> {
    let listener =
        TcpListener::bind(bind_addr)
            .await
            .map_err(|e| RaftError::TransportFailure {
                target: bind_addr.to_string(),
                source: e,
            })?;

    loop {
        if peer.is_stopped() {
            return Ok(());
        }
        let (stream, _) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("accept failed on {bind_addr}: {e}");
                continue;
            }
        };
        let peer = Arc::clone(&peer);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(&peer, stream).await {
                debug!("[{}] inbound connection error: {e}", peer.id());
            }
        });
    }
}

async fn handle_connection<R: RpcClient>(peer: &Arc<Peer<R>>, mut stream: TcpStream) -> Result<()> {
    let request = read_framed(&mut stream, "inbound").await?;
    if peer.is_stopped() {
        return Ok(());
    }
    let reply = match request {
        RaftMessage::RequestVote(args) => {
            RaftMessage::RequestVoteReply(peer.handle_request_vote(args).await)
        }
        RaftMessage::AppendEntries(args) => {
            RaftMessage::AppendEntriesReply(peer.handle_append_entries(args).await)
        }
        RaftMessage::InstallSnapshot(args) => {
            RaftMessage::InstallSnapshotReply(peer.handle_install_snapshot(args).await)
        }
        _ => return Err(RaftError::Codec("unexpected request variant".into())),
    };
    write_framed(&mut stream, &reply, "inbound").await
}

/// Test-only transport: routes calls directly to in-process peer
/// instances with no sockets, so multi-peer scenarios run fast and
/// deterministically. All peers sharing one `InProcessRpc` must be
/// registered by address before any election can reach them.
#[derive(Clone, Default)]
pub struct InProcessRpc {
    registry: Arc<Mutex<HashMap<String, Weak<Peer<InProcessRpc>>>>>,
}

impl InProcessRpc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, peer: &Arc<Peer<InProcessRpc>>) {
        self.registry
            .lock()
            .unwrap()
            .insert(peer.id().to_string(), Arc::downgrade(peer));
    }

    /// Removes `id` from the registry so calls targeting it fail with
    /// `TransportFailure` until it is `register`ed again. Lets tests
    /// simulate a network partition without tearing the peer down.
    pub fn unregister(&self, id: &str) {
        self.registry.lock().unwrap().remove(id);
    }

    fn lookup(&self, target: &str) -> Result<Arc<Peer<InProcessRpc>>> {
        self.registry
            .lock()
            .unwrap()
            .get(target)
            .and_then(Weak::upgrade)
            .ok_or_else(|| RaftError::TransportFailure {
                target: target.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "peer not registered or already dropped",
                ),
            })
    }
}

impl RpcClient for InProcessRpc {
    async fn append_entries(
        &self,
        target: &str,
        args: AppendEntriesArgs,
    ) -> Result<AppendEntriesReply> {
        Ok(self.lookup(target)?.handle_append_entries(args).await)
    }

    async fn request_vote(
        &self,
        target: &str,
        args: RequestVoteArgs,
    ) -> Result<RequestVoteReply> {
        Ok(self.lookup(target)?.handle_request_vote(args).await)
    }

    async fn install_snapshot(
        &self,
        target: &str,
        args: InstallSnapshotArgs,
    ) -> Result<InstallSnapshotReply> {
        Ok(self.lookup(target)?.handle_install_snapshot(args).await)
    }
}
