//! ==============================================================================
//! error.rs - client error taxonomy
//! ==============================================================================
//!
//! purpose:
//!     the four ways a gateway call or a command can fail.
//!
//! ```text
//!     - Network: transport failure (connect, timeout, body read)
//!     - Protocol: the gateway answered, but not with what we expected
//!     - Conflict: the gateway says the target sensor no longer exists
//!     - Precondition: a command was refused locally before any gateway call
//! ```
//!
//! relationships:
//!     - produced by: gateway.rs (Network / Protocol / Conflict)
//!     - produced by: console.rs (Precondition)
//!     - retained by: cache.rs (last error of a failed entry)
//!
//! ==============================================================================

use crate::domain::SensorId;

pub type Result<T, E = ClientError> = std::result::Result<T, E>;

/// Errors are `Clone` so a cache entry can keep the last failure around for
/// display next to its stale data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("sensor {0} no longer exists")]
    Conflict(SensorId),

    #[error("cannot run command: {0}")]
    Precondition(Precondition),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Precondition {
    #[error("no sensor selected")]
    NoSelection,

    #[error("readings for sensor {0} are not loaded")]
    ReadingsNotLoaded(SensorId),
}

impl ClientError {
    pub fn network(err: impl std::fmt::Display) -> Self {
        ClientError::Network(err.to_string())
    }

    pub fn protocol(err: impl std::fmt::Display) -> Self {
        ClientError::Protocol(err.to_string())
    }

    /// Only transport failures are worth retrying; a malformed answer will
    /// be malformed again.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Network(_))
    }
}

impl From<Precondition> for ClientError {
    fn from(p: Precondition) -> Self {
        ClientError::Precondition(p)
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::protocol(err)
        } else {
            ClientError::network(err)
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::protocol(err)
    }
}
