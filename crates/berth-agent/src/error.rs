//! Host-agent call errors.

use thiserror::Error;

pub type AgentResult<T> = Result<T, AgentError>;

/// Transport-level failure talking to a host agent.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("connect to {host} failed: {reason}")]
    Connect { host: String, reason: String },

    #[error("call to {host} timed out after {millis}ms")]
    Timeout { host: String, millis: u64 },

    #[error("{host} answered HTTP {status}")]
    Http { host: String, status: u16 },

    #[error("request to {host} failed: {reason}")]
    Request { host: String, reason: String },

    #[error("invalid response from {host}: {reason}")]
    Decode { host: String, reason: String },
}
