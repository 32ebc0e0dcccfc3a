//! Channel Engine Error Hierarchy
//!
//! Two layers:
//! - [`ErrorInfo`]: the clonable, serializable error carried on the wire, attached to channel
//!   state changes and delivered to completion targets. One reason may fail many queued
//!   operations, hence `Clone`.
//! - [`Error`]: the crate-level error returned by async façade calls.

use std::fmt::Display;

use ::config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::*;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Channel, presence, transport or server failure with its wire-level reason
    #[error(transparent)]
    Channel(#[from] ErrorInfo),

    /// Client configuration could not be loaded or is invalid
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A blocking wait was abandoned before it could resolve
    #[error("Operation interrupted: {0}")]
    Interrupted(String),

    /// No async runtime was available to schedule timers
    #[error("Runtime unavailable: {0}")]
    Runtime(String),
}

impl Error {
    /// Wire-level reason, when the failure carries one
    pub fn info(&self) -> Option<&ErrorInfo> {
        match self {
            Error::Channel(info) => Some(info),
            _ => None,
        }
    }

    /// Error code of the wire-level reason
    pub fn code(&self) -> Option<u32> {
        self.info().map(|info| info.code)
    }
}

/// Classification of failures by how the engine reacts to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Operation invoked in an incompatible state; fails immediately
    StatePrecondition,
    /// Reported by the transport for one operation; siblings are unaffected
    Transport,
    /// Attach/detach deadline exceeded
    Timeout,
    /// ERROR envelope or server-side rejection
    Server,
    /// Payload decode failure
    Decode,
    /// Failed repair of membership (synthetic re-enter)
    ConsistencyRepair,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (code={code}, status={status_code})")]
pub struct ErrorInfo {
    pub code: u32,
    pub status_code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

impl ErrorInfo {
    pub fn new(
        code: u32,
        status_code: u16,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            status_code,
            message: message.into(),
            href: None,
        }
    }

    pub fn invalid_state(
        state: impl Display,
        operation: &str,
    ) -> Self {
        Self::new(
            INVALID_CHANNEL_STATE,
            STATUS_BAD_REQUEST,
            format!("Unable to {operation}; channel state = {state}"),
        )
    }

    pub fn attach_timeout(channel: &str) -> Self {
        Self::new(
            CHANNEL_OPERATION_TIMEOUT,
            STATUS_TIMEOUT,
            format!("Channel {channel} attach timed out"),
        )
    }

    pub fn detach_timeout(channel: &str) -> Self {
        Self::new(
            CHANNEL_OPERATION_TIMEOUT,
            STATUS_TIMEOUT,
            format!("Channel {channel} detach timed out"),
        )
    }

    pub fn connection_failed() -> Self {
        Self::new(CONNECTION_FAILED, STATUS_BAD_REQUEST, "Connection failed")
    }

    pub fn connection_closed() -> Self {
        Self::new(CONNECTION_CLOSED, STATUS_BAD_REQUEST, "Connection closed")
    }

    pub fn connection_suspended() -> Self {
        Self::new(CONNECTION_SUSPENDED, STATUS_BAD_REQUEST, "Connection suspended")
    }

    pub fn presence_needs_client_id() -> Self {
        Self::new(
            PRESENCE_NEEDS_CLIENT_ID,
            STATUS_BAD_REQUEST,
            "Unable to enter presence channel without a client id",
        )
    }

    pub fn presence_invalid_state(state: impl Display) -> Self {
        Self::new(
            PRESENCE_INVALID_STATE,
            STATUS_BAD_REQUEST,
            format!("Unable to update presence; channel state = {state}"),
        )
    }

    pub fn presence_out_of_sync() -> Self {
        Self::new(
            PRESENCE_OUT_OF_SYNC,
            STATUS_BAD_REQUEST,
            "Channel is suspended; presence state is out of sync",
        )
    }

    pub fn presence_reenter_failed(
        client_id: &str,
        cause: &ErrorInfo,
    ) -> Self {
        Self::new(
            PRESENCE_REENTER_FAILED,
            STATUS_BAD_REQUEST,
            format!("Unable to automatically re-enter {client_id} in presence: {}", cause.message),
        )
    }

    pub fn unrecoverable_delta(message: impl Into<String>) -> Self {
        Self::new(UNRECOVERABLE_DELTA_DECODE, STATUS_BAD_REQUEST, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(BAD_REQUEST, STATUS_BAD_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, STATUS_INTERNAL, message)
    }

    pub fn category(&self) -> ErrorCategory {
        match self.code {
            CHANNEL_OPERATION_TIMEOUT => ErrorCategory::Timeout,
            INVALID_CHANNEL_STATE | PRESENCE_NEEDS_CLIENT_ID | PRESENCE_INVALID_STATE | PRESENCE_OUT_OF_SYNC => {
                ErrorCategory::StatePrecondition
            }
            PRESENCE_REENTER_FAILED => ErrorCategory::ConsistencyRepair,
            UNRECOVERABLE_DELTA_DECODE => ErrorCategory::Decode,
            80000..=80999 => ErrorCategory::Transport,
            _ => ErrorCategory::Server,
        }
    }
}
