use thiserror::Error;

/// Behavioral error taxonomy for the consensus core. Protocol-level
/// outcomes (stale term, higher term, log mismatch) are carried in RPC
/// reply fields instead of raised here — see `rpc.rs`.
#[derive(Debug, Error)]
pub enum RaftError {
    #[error("not the leader")]
    NotLeader { leader_hint: Option<String> },

    #[error("snapshot at index {requested} is not newer than commit index {commit_index}")]
    StaleSnapshot { requested: u64, commit_index: u64 },

    #[error("peer has been killed")]
    Stopped,

    #[error("transport failure talking to {target}: {source}")]
    TransportFailure {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to persist state: {0}")]
    PersistenceFailure(String),

    #[error("malformed RPC payload: {0}")]
    Codec(String),
}

pub type Result<T> = std::result::Result<T, RaftError>;
