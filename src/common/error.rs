use std::time::Duration;

use thiserror::Error;

/// Rejections reported synchronously by `ConsensusProcessor::start`.
///
/// None of these change the node's state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("Cannot start consensus on a faulty node")]
    FaultyNode,

    #[error("Cannot start consensus on a stopped node")]
    Killed,
}

/// Process-level failures raised while bringing nodes up or driving a cluster.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("http server error: {0}")]
    Serve(#[from] std::io::Error),

    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("nodes not ready within {0:?}")]
    NotReady(Duration),

    #[error("invalid cluster layout: {0}")]
    InvalidLayout(String),

    #[error("invalid node configuration: {0}")]
    InvalidConfig(String),

    #[error("{nodes} nodes starting at port {base_port} do not fit in the port range")]
    PortRange { base_port: u16, nodes: usize },
}

pub type Result<T, E = NodeError> = std::result::Result<T, E>;
