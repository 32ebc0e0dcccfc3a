use std::sync::Arc;

use super::RecordingHistory;
use super::RecordingTransport;
use crate::proto::Action;
use crate::proto::Flags;
use crate::proto::PresenceAction;
use crate::proto::PresenceMessage;
use crate::proto::ProtocolMessage;
use crate::BackoffPolicy;
use crate::ChannelContext;
use crate::ClientConfig;
use crate::ErrorInfo;
use crate::PassthroughCodec;

pub const ATTACH_TIMEOUT_MS: u64 = 1_000;
pub const DETACH_TIMEOUT_MS: u64 = 1_000;
pub const RETRY_BASE_MS: u64 = 300;

/// Short, jitter-free timeouts so paused-clock tests can step through them.
pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.channel.attach_timeout_ms = ATTACH_TIMEOUT_MS;
    config.channel.detach_timeout_ms = DETACH_TIMEOUT_MS;
    config.retry = BackoffPolicy {
        base_delay_ms: RETRY_BASE_MS,
        max_delay_ms: RETRY_BASE_MS * 2,
        jitter: 0.0,
    };
    config
}

/// Context over a fresh [`RecordingTransport`] on the current runtime.
pub fn test_context(config: ClientConfig) -> (ChannelContext, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::default());
    let ctx = ChannelContext::new(
        transport.clone(),
        Arc::new(PassthroughCodec),
        Arc::new(RecordingHistory::default()),
        config,
    )
    .expect("test context");
    (ctx, transport)
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

pub fn detached(
    channel: &str,
    error: Option<ErrorInfo>,
) -> ProtocolMessage {
    ProtocolMessage::new(channel, Action::Detached { error })
}

pub fn server_error(
    channel: &str,
    error: ErrorInfo,
) -> ProtocolMessage {
    ProtocolMessage::new(channel, Action::Error { error })
}

/// Presence record as the server would send it: id `conn:serial:0`.
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

/// SYNC envelope; `cursor` empty marks the final page.
pub fn sync(
    channel: &str,
    cursor: &str,
    records: Vec<PresenceMessage>,
) -> ProtocolMessage {
    ProtocolMessage::new(channel, Action::Sync { presence: records }).with_channel_serial(format!("seq1:{cursor}"))
}
