//! Bridge error taxonomy.

use thiserror::Error;

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Error type for bridge operations.
///
/// Variants map to how a failure propagates: configuration and
/// authentication problems disable the affected phase, communication
/// failures surface to whichever accessory write triggered them, and
/// transport failures wait for the next scheduled resync.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Unusable startup configuration (missing credentials etc.).
    #[error("configuration error: {0}")]
    Config(String),

    /// Identity provider rejected credentials or a token grant.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Household or device discovery failed.
    #[error("discovery failed: {0}")]
    Discovery(String),

    /// A correlated request timed out or came back as an error report.
    #[error("service communication failure: {0}")]
    Communication(String),

    /// Connection or subscription level failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl BridgeError {
    /// Whether this error should be surfaced to the accessory host as a
    /// "service unavailable" signal rather than logged and retried.
    pub fn is_communication(&self) -> bool {
        matches!(self, BridgeError::Communication(_))
    }
}
