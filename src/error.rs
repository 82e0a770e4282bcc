//! Error types for courier

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CourierError {
    #[error("Not connected")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed: {0}")]
    Closed(String),

    #[error("Stream handshake rejected: {0}")]
    Rejected(String),

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("History fetch failed: {0}")]
    History(String),
}
