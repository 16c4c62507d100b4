use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Serial link unavailable: {0}")]
    LinkUnavailable(String),

    #[error("Handshake not confirmed ({lines_seen} lines received)")]
    HandshakeRejected { lines_seen: usize },

    #[error("Session already closed")]
    SessionClosed,

    #[error("Session not connected")]
    NotConnected,

    #[error("Session already connected")]
    AlreadyConnected,

    #[error("Sample value {0} outside ADC range 0..=1023")]
    InvalidSample(u32),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;
