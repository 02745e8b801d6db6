//! A Raft consensus core: a fixed set of peers cooperating to maintain
//! an identical, totally-ordered log of client-submitted commands.
//!
//! This crate implements the peer — its role state machine, log (with
//! compaction), election and replication protocols, and apply pipeline.
//! It does not implement a state machine or client-facing service;
//! those are external collaborators that call [`peer::Peer::submit`]
//! and drain the apply channel handed to [`peer::Peer::new`].

pub mod apply;
pub mod config;
pub mod election;
pub mod errors;
pub mod log;
pub mod peer;
pub mod persist;
pub mod replication;
pub mod rpc;
pub mod state;
pub mod transport;

pub use apply::ApplyMsg;
pub use config::RaftConfig;
pub use errors::{RaftError, Result};
pub use log::{Log, LogEntry, LogPosition};
pub use peer::Peer;
pub use persist::{FilePersister, MemoryPersister, PersistedState, Persister};
pub use rpc::{
    AppendEntriesArgs, AppendEntriesReply, InstallSnapshotArgs, InstallSnapshotReply,
    RequestVoteArgs, RequestVoteReply, RpcClient,
};
pub use state::{PeerState, Role};
pub use transport::{InProcessRpc, TcpRpcClient};
