use std::time::Duration;

/// Static configuration for one peer: its id, the addresses of every
/// other peer in the fixed set, and the timing constants from
/// spec.md §5. Election timeout must be randomized in a range at least
/// 3x the heartbeat period; the defaults here give a 5x margin.
#[derive(Debug, Clone)]
pub struct RaftConfig {
    pub server_id: String,
    pub peers: Vec<String>,
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub heartbeat_period: Duration,
    pub replication_check_period: Duration,
}

impl RaftConfig {
    pub fn new(server_id: impl Into<String>, peers: Vec<String>) -> Self {
        Self {
            server_id: server_id.into(),
            peers,
            election_timeout_min: Duration::from_millis(500),
            election_timeout_max: Duration::from_millis(1000),
            heartbeat_period: Duration::from_millis(100),
            replication_check_period: Duration::from_millis(20),
        }
    }

    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    pub fn majority(&self) -> usize {
        self.cluster_size() / 2 + 1
    }
}
