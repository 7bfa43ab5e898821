use thiserror::Error;

/// Errors produced by the lifecycle event consumer.
#[derive(Debug, Error)]
pub enum EventError {
    /// The payload can never be decoded, no matter how often it is redelivered.
    #[error("malformed event: {0}")]
    Malformed(String),

    /// Broker I/O failed (connect, topology declaration, delivery, settlement).
    #[error("broker error: {0}")]
    Broker(String),

    /// A graph store mutation failed.
    #[error("graph store error: {0}")]
    Store(#[from] followgraph_core::Error),

    #[error("invalid consumer configuration: {0}")]
    InvalidConfig(String),
}

impl From<lapin::Error> for EventError {
    fn from(e: lapin::Error) -> Self {
        Self::Broker(e.to_string())
    }
}
