//! Protocol envelopes exchanged with the transport collaborator.
//!
//! Each protocol action is a variant of [`Action`] carrying only the fields that
//! action uses, so handlers match exhaustively instead of probing optional
//! fields.
mod message;
mod presence;

pub use message::*;
pub use presence::*;


use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::ErrorInfo;

/// Channel parameters sent with ATTACH and echoed back on ATTACHED.
pub type ChannelParams = BTreeMap<String, String>;

/// Attach flag bits. Low bits are protocol flags, high bits carry channel modes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags(pub u32);

impl Flags {
    pub const HAS_PRESENCE: u32 = 1 << 0;
    pub const HAS_BACKLOG: u32 = 1 << 1;
    pub const RESUMED: u32 = 1 << 2;
    pub const TRANSIENT: u32 = 1 << 4;
    pub const ATTACH_RESUME: u32 = 1 << 5;

    pub fn empty() -> Self {
        Flags(0)
    }

    pub fn contains(
        &self,
        bit: u32,
    ) -> bool {
        self.0 & bit == bit
    }

    pub fn with(
        mut self,
        bit: u32,
    ) -> Self {
        self.0 |= bit;
        self
    }

    pub fn has_presence(&self) -> bool {
        self.contains(Self::HAS_PRESENCE)
    }

    pub fn resumed(&self) -> bool {
        self.contains(Self::RESUMED)
    }

    pub fn modes(&self) -> Vec<ChannelMode> {
        ChannelMode::ALL
            .iter()
            .copied()
            .filter(|mode| self.contains(mode.bit()))
            .collect()
    }

    pub fn with_modes(
        self,
        modes: &[ChannelMode],
    ) -> Self {
        modes.iter().fold(self, |flags, mode| flags.with(mode.bit()))
    }
}

/// Capabilities requested on attach and granted by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMode {
    Presence,
    Publish,
    Subscribe,
    PresenceSubscribe,
    AnnotationPublish,
    AnnotationSubscribe,
}

impl ChannelMode {
    pub const ALL: [ChannelMode; 6] = [
        ChannelMode::Presence,
        ChannelMode::Publish,
        ChannelMode::Subscribe,
        ChannelMode::PresenceSubscribe,
        ChannelMode::AnnotationPublish,
        ChannelMode::AnnotationSubscribe,
    ];

    pub fn bit(&self) -> u32 {
        match self {
            ChannelMode::Presence => 1 << 16,
            ChannelMode::Publish => 1 << 17,
            ChannelMode::Subscribe => 1 << 18,
            ChannelMode::PresenceSubscribe => 1 << 19,
            ChannelMode::AnnotationPublish => 1 << 21,
            ChannelMode::AnnotationSubscribe => 1 << 22,
        }
    }
}

/// One protocol action with its action-specific body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Attach {
        flags: Flags,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<ChannelParams>,
    },
    Attached {
        flags: Flags,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<ChannelParams>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorInfo>,
    },
    Detach {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorInfo>,
    },
    Detached {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorInfo>,
    },
    Message {
        messages: Vec<Message>,
    },
    Presence {
        presence: Vec<PresenceMessage>,
    },
    Sync {
        presence: Vec<PresenceMessage>,
    },
    Error {
        error: ErrorInfo,
    },
    Annotation {
        annotations: Vec<Annotation>,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Attach { .. } => "ATTACH",
            Action::Attached { .. } => "ATTACHED",
            Action::Detach { .. } => "DETACH",
            Action::Detached { .. } => "DETACHED",
            Action::Message { .. } => "MESSAGE",
            Action::Presence { .. } => "PRESENCE",
            Action::Sync { .. } => "SYNC",
            Action::Error { .. } => "ERROR",
            Action::Annotation { .. } => "ANNOTATION",
        }
    }
}

/// Protocol envelope addressed to one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_serial: Option<String>,
    #[serde(flatten)]
    pub action: Action,
}

impl ProtocolMessage {
    pub fn new(
        channel: impl Into<String>,
        action: Action,
    ) -> Self {
        Self {
            channel: channel.into(),
            id: None,
            connection_id: None,
            timestamp: None,
            channel_serial: None,
            action,
        }
    }

    pub fn attach(
        channel: impl Into<String>,
        flags: Flags,
        params: Option<ChannelParams>,
        channel_serial: Option<String>,
    ) -> Self {
        let mut msg = Self::new(channel, Action::Attach { flags, params });
        msg.channel_serial = channel_serial;
        msg
    }

    pub fn detach(channel: impl Into<String>) -> Self {
        Self::new(channel, Action::Detach { error: None })
    }

    pub fn message(
        channel: impl Into<String>,
        messages: Vec<Message>,
    ) -> Self {
        Self::new(channel, Action::Message { messages })
    }

    pub fn presence(
        channel: impl Into<String>,
        presence: Vec<PresenceMessage>,
    ) -> Self {
        Self::new(channel, Action::Presence { presence })
    }

    pub fn with_id(
        mut self,
        id: impl Into<String>,
    ) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_connection_id(
        mut self,
        connection_id: impl Into<String>,
    ) -> Self {
        self.connection_id = Some(connection_id.into());
        self
    }

    pub fn with_timestamp(
        mut self,
        timestamp: i64,
    ) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_channel_serial(
        mut self,
        channel_serial: impl Into<String>,
    ) -> Self {
        self.channel_serial = Some(channel_serial.into());
        self
    }

    /// Splits the envelope metadata from its action body.
    pub fn into_parts(self) -> (Envelope, Action) {
        let envelope = Envelope {
            id: self.id,
            connection_id: self.connection_id,
            timestamp: self.timestamp,
            channel_serial: self.channel_serial,
        };
        (envelope, self.action)
    }
}

/// Envelope fields that records inherit when they lack their own.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    pub id: Option<String>,
    pub connection_id: Option<String>,
    pub timestamp: Option<i64>,
    pub channel_serial: Option<String>,
}

impl Envelope {
    /// Id derived for the `index`-th record of this envelope.
    pub fn derived_id(
        &self,
        index: usize,
    ) -> Option<String> {
        self.id.as_ref().map(|id| format!("{id}:{index}"))
    }

    /// Whether a SYNC envelope's cursor says the sequence is finished.
    /// The serial has the form `sequenceId:cursor`; an empty cursor ends it.
    pub fn sync_finished(&self) -> bool {
        match self.channel_serial.as_deref().and_then(|s| s.split_once(':')) {
            Some((_, cursor)) => cursor.is_empty(),
            None => true,
        }
    }

    pub fn backfill_message(
        &self,
        index: usize,
        msg: &mut Message,
    ) {
        if msg.id.is_none() {
            msg.id = self.derived_id(index);
        }
        if msg.connection_id.is_none() {
            msg.connection_id = self.connection_id.clone();
        }
        if msg.timestamp.is_none() {
            msg.timestamp = self.timestamp;
        }
    }

    pub fn backfill_annotation(
        &self,
        index: usize,
        annotation: &mut Annotation,
    ) {
        if annotation.id.is_none() {
            annotation.id = self.derived_id(index);
        }
        if annotation.connection_id.is_none() {
            annotation.connection_id = self.connection_id.clone();
        }
        if annotation.timestamp.is_none() {
            annotation.timestamp = self.timestamp;
        }
    }

    pub fn backfill_presence(
        &self,
        index: usize,
        presence: &mut PresenceMessage,
    ) {
        if presence.id.is_none() {
            presence.id = self.derived_id(index);
        }
        if presence.connection_id.is_none() {
            presence.connection_id = self.connection_id.clone();
        }
        if presence.timestamp == 0 {
            presence.timestamp = self.timestamp.unwrap_or_default();
        }
    }
}
