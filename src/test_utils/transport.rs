use parking_lot::Mutex;

use crate::proto::ProtocolMessage;
use crate::Completion;
use crate::ConnectionState;
use crate::ErrorInfo;
use crate::Transport;

/// One envelope handed to [`RecordingTransport::send`].
#[derive(Debug)]
pub struct SentMessage {
    pub msg: ProtocolMessage,
    pub queue_if_disconnected: bool,
    pub completion: Completion,
}

/// Transport that keeps every sent envelope together with its completion,
/// so tests decide when (and how) the server acknowledges it.
#[derive(Debug)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentMessage>>,
    state: Mutex<ConnectionState>,
    connection_id: Mutex<Option<String>>,
    client_id: Mutex<Option<String>>,
    reject_with: Mutex<Option<ErrorInfo>>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            state: Mutex::new(ConnectionState::Connected),
            connection_id: Mutex::new(Some(TEST_CONNECTION_ID.to_string())),
            client_id: Mutex::new(Some(TEST_CLIENT_ID.to_string())),
            reject_with: Mutex::new(None),
        }
    }
}

pub const TEST_CONNECTION_ID: &str = "conn-1";
pub const TEST_CLIENT_ID: &str = "client-1";

impl RecordingTransport {
    pub fn set_connection_state(
        &self,
        state: ConnectionState,
    ) {
        *self.state.lock() = state;
    }

    pub fn set_connection_id(
        &self,
        id: Option<&str>,
    ) {
        *self.connection_id.lock() = id.map(str::to_string);
    }

    pub fn set_client_id(
        &self,
        id: Option<&str>,
    ) {
        *self.client_id.lock() = id.map(str::to_string);
    }

    /// Makes every following `send` fail synchronously with `error`.
    pub fn reject_sends(
        &self,
        error: Option<ErrorInfo>,
    ) {
        *self.reject_with.lock() = error;
    }

    pub fn sent(&self) -> Vec<ProtocolMessage> {
        self.sent.lock().iter().map(|s| s.msg.clone()).collect()
    }

    pub fn take_sent(&self) -> Vec<SentMessage> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Action names of every sent envelope, in order.
    pub fn sent_actions(&self) -> Vec<&'static str> {
        self.sent.lock().iter().map(|s| s.msg.action.name()).collect()
    }

    pub fn count(
        &self,
        action: &str,
    ) -> usize {
        self.sent_actions().into_iter().filter(|a| *a == action).count()
    }

    /// Acknowledges every envelope sent so far.
    pub fn ack_all(&self) {
        for sent in self.take_sent() {
            sent.completion.succeed();
        }
    }

    /// Rejects every envelope sent so far with `error`.
    pub fn nack_all(
        &self,
        error: ErrorInfo,
    ) {
        for sent in self.take_sent() {
            sent.completion.fail(error.clone());
        }
    }
}

impl Transport for RecordingTransport {
    fn send(
        &self,
        msg: ProtocolMessage,
        queue_if_disconnected: bool,
        completion: Completion,
    ) -> std::result::Result<(), ErrorInfo> {
        if let Some(error) = self.reject_with.lock().clone() {
            return Err(error);
        }
        self.sent.lock().push(SentMessage {
            msg,
            queue_if_disconnected,
            completion,
        });
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn connection_id(&self) -> Option<String> {
        self.connection_id.lock().clone()
    }

    fn client_id(&self) -> Option<String> {
        self.client_id.lock().clone()
    }
}
