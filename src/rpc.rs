use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::log::LogEntry;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteArgs {
    pub term: u64,
    pub candidate_id: String,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteReply {
    pub term: u64,
    pub vote_granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesArgs {
    pub term: u64,
    pub leader_id: String,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub entries: Vec<LogEntry>,
    pub leader_commit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesReply {
    pub term: u64,
    pub success: bool,
    /// Meaningful only when `success` is false: the index the leader
    /// should probe next, letting it skip an entire conflicting term in
    /// one round trip.
    pub conflict_index: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotArgs {
    pub term: u64,
    pub leader_id: String,
    pub last_included_index: u64,
    pub last_included_term: u64,
    pub data: Vec<u8>,
    pub done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotReply {
    pub term: u64,
}

/// Outbound RPC surface the replication and election modules drive.
/// Swappable so tests can run many peers in one process without real
/// sockets (`crate::transport::InProcessRpc`) while production wiring
/// uses a real one (`crate::transport::TcpRpcClient`).
///
/// A `Err` return is treated uniformly as `TransportFailure` by callers:
/// no reply, retried on the next tick. There is no distinct "ok but
/// malformed" case once a reply is returned — an endpoint that replies
/// at all is expected to produce a well-formed reply.
pub trait RpcClient: Send + Sync + 'static {
    fn append_entries(
        &self,
        target: &str,
        args: AppendEntriesArgs,
    ) -> impl std::future::Future<Output = Result<AppendEntriesReply>> + Send;

    fn request_vote(
        &self,
        target: &str,
        args: RequestVoteArgs,
    ) -> impl std::future::Future<Output = Result<RequestVoteReply>> + Send;

    fn install_snapshot(
        &self,
        target: &str,
        args: InstallSnapshotArgs,
    ) -> impl std::future::Future<Output = Result<InstallSnapshotReply>> + Send;
}
