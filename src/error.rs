use crate::connectivity::DisconnectReason;
use std::time::Duration;
use thiserror::Error;

/// Why a station connection attempt did not come up.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("no address acquired within {0:?}")]
    Timeout(Duration),

    #[error("gave up after {0} reconnect attempts")]
    RetriesExhausted(u32),

    #[error("disconnected for non-retryable reason {0}")]
    NonRetryable(DisconnectReason),

    #[error("no valid wifi credentials stored")]
    MissingCredentials,
}
