//! Connection collaborator: sends protocol envelopes and reports connection state.
//!
//! The engine never performs I/O itself. Inbound envelopes and connection
//! notifications are pushed into [`Channels`](crate::Channels) by the owner
//! of the connection.

use std::fmt::Display;

#[cfg(test)]
use mockall::automock;

use crate::proto::ProtocolMessage;
use crate::Completion;
use crate::ErrorInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Initialized,
    Connecting,
    Connected,
    Disconnected,
    Suspended,
    Closing,
    Closed,
    Failed,
}

impl ConnectionState {
    /// Reason an attach cannot even be attempted in this connection state.
    pub fn attach_blocker(&self) -> Option<ErrorInfo> {
        match self {
            ConnectionState::Closing | ConnectionState::Closed => Some(ErrorInfo::connection_closed()),
            ConnectionState::Suspended => Some(ErrorInfo::connection_suspended()),
            ConnectionState::Failed => Some(ErrorInfo::connection_failed()),
            _ => None,
        }
    }
}

impl Display for ConnectionState {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Initialized => "initialized",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Suspended => "suspended",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[cfg_attr(test, automock)]
pub trait Transport: Send + Sync + 'static {
    /// Hands `msg` to the connection.
    ///
    /// `completion` is invoked once the server acknowledges (or rejects) the
    /// message. A synchronous `Err` means the message was not accepted; the
    /// caller then fails `completion` itself. Implementations must not call
    /// back into the channel from inside `send`.
    fn send(
        &self,
        msg: ProtocolMessage,
        queue_if_disconnected: bool,
        completion: Completion,
    ) -> std::result::Result<(), ErrorInfo>;

    fn connection_state(&self) -> ConnectionState;

    /// Id of the current connection, once connected
    fn connection_id(&self) -> Option<String>;

    /// Client id this connection is authenticated as, if any
    fn client_id(&self) -> Option<String>;
}
