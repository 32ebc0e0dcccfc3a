#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use realtime_channels::proto::Action;
use realtime_channels::proto::Flags;
use realtime_channels::proto::Message;
use realtime_channels::proto::PresenceAction;
use realtime_channels::proto::PresenceMessage;
use realtime_channels::proto::ProtocolMessage;
use realtime_channels::BackoffPolicy;
use realtime_channels::ChannelContext;
use realtime_channels::Channels;
use realtime_channels::ClientConfig;
use realtime_channels::Completion;
use realtime_channels::ConnectionState;
use realtime_channels::ErrorInfo;
use realtime_channels::HistoryClient;
use realtime_channels::HistoryRequest;
use realtime_channels::MessagePage;
use realtime_channels::PassthroughCodec;
use realtime_channels::PresencePage;
use realtime_channels::Transport;

pub const CONNECTION_ID: &str = "conn-A";
pub const CLIENT_ID: &str = "client-A";

pub const ATTACH_TIMEOUT_MS: u64 = 2_000;
pub const RETRY_BASE_MS: u64 = 500;

/// Stands in for the connection: records outbound envelopes with their
/// completions until the test acknowledges them.
pub struct FakeConnection {
    sent: Mutex<Vec<(ProtocolMessage, Completion)>>,
    state: Mutex<ConnectionState>,
}

impl FakeConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            state: Mutex::new(ConnectionState::Connected),
        })
    }

    pub fn set_state(
        &self,
        state: ConnectionState,
    ) {
        *self.state.lock() = state;
    }

    pub fn actions(&self) -> Vec<&'static str> {
        self.sent.lock().iter().map(|(m, _)| m.action.name()).collect()
    }

    pub fn actions_for(
        &self,
        channel: &str,
    ) -> Vec<&'static str> {
        self.sent
            .lock()
            .iter()
            .filter(|(m, _)| m.channel == channel)
            .map(|(m, _)| m.action.name())
            .collect()
    }

    pub fn last(&self) -> Option<ProtocolMessage> {
        self.sent.lock().last().map(|(m, _)| m.clone())
    }

    pub fn ack_all(&self) {
        let sent = std::mem::take(&mut *self.sent.lock());
        for (_, completion) in sent {
            completion.succeed();
        }
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl Transport for FakeConnection {
    fn send(
        &self,
        msg: ProtocolMessage,
        _queue_if_disconnected: bool,
        completion: Completion,
    ) -> Result<(), ErrorInfo> {
        self.sent.lock().push((msg, completion));
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn connection_id(&self) -> Option<String> {
        Some(CONNECTION_ID.to_string())
    }

    fn client_id(&self) -> Option<String> {
        Some(CLIENT_ID.to_string())
    }
}

pub struct NoHistory;

#[async_trait]
impl HistoryClient for NoHistory {
    async fn messages(
        &self,
        _request: HistoryRequest,
    ) -> Result<MessagePage, ErrorInfo> {
        Err(ErrorInfo::bad_request("history unavailable"))
    }

    async fn presence(
        &self,
        _request: HistoryRequest,
    ) -> Result<PresencePage, ErrorInfo> {
        Err(ErrorInfo::bad_request("history unavailable"))
    }
}

pub fn config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.channel.attach_timeout_ms = ATTACH_TIMEOUT_MS;
    config.channel.detach_timeout_ms = ATTACH_TIMEOUT_MS;
    config.retry = BackoffPolicy {
        base_delay_ms: RETRY_BASE_MS,
        max_delay_ms: RETRY_BASE_MS * 2,
        jitter: 0.0,
    };
    config
}

pub fn channels() -> (Channels, Arc<FakeConnection>) {
    let connection = FakeConnection::new();
    let ctx = ChannelContext::new(
        connection.clone(),
        Arc::new(PassthroughCodec),
        Arc::new(NoHistory),
        config(),
    )
    .expect("context");
    (Channels::new(ctx), connection)
}

pub fn attached(
    channel: &str,
    flags: Flags,
    serial: &str,
) -> ProtocolMessage {
    ProtocolMessage::new(
        channel,
        Action::Attached {
            flags,
            params: None,
            error: None,
        },
    )
    .with_channel_serial(serial)
}

pub fn detached(channel: &str) -> ProtocolMessage {
    ProtocolMessage::new(channel, Action::Detached { error: None })
}

pub fn messages(
    channel: &str,
    id: &str,
    records: Vec<Message>,
) -> ProtocolMessage {
    ProtocolMessage::message(channel, records)
        .with_id(id)
        .with_connection_id("remote")
        .with_timestamp(1_000)
}

pub fn member(
    connection_id: &str,
    client_id: &str,
    action: PresenceAction,
    serial: u64,
) -> PresenceMessage {
    PresenceMessage::new(action, client_id)
        .with_connection_id(connection_id)
        .with_id(format!("{connection_id}:{serial}:0"))
        .with_timestamp(serial as i64)
}

pub fn sync_page(
    channel: &str,
    cursor: &str,
    records: Vec<PresenceMessage>,
) -> ProtocolMessage {
    ProtocolMessage::new(channel, Action::Sync { presence: records }).with_channel_serial(format!("sync-1:{cursor}"))
}

/// Lets spawned caller tasks run up to their next await point.
pub async fn settle() {
    for _ in 0..3 {
        tokio::task::yield_now().await;
    }
}
