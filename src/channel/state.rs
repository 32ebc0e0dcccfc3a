use std::fmt::Display;

use crate::proto::ChannelMode;
use crate::proto::ChannelParams;
use crate::ErrorInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Initialized,
    Attaching,
    Attached,
    Detaching,
    Detached,
    Suspended,
    Failed,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Initialized => "initialized",
            ChannelState::Attaching => "attaching",
            ChannelState::Attached => "attached",
            ChannelState::Detaching => "detaching",
            ChannelState::Detached => "detached",
            ChannelState::Suspended => "suspended",
            ChannelState::Failed => "failed",
        }
    }
}

impl Display for ChannelState {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What channel state listeners can filter on: entering a state, or an
/// `Update` that leaves the state unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelEvent {
    Initialized,
    Attaching,
    Attached,
    Detaching,
    Detached,
    Suspended,
    Failed,
    Update,
}

impl From<ChannelState> for ChannelEvent {
    fn from(state: ChannelState) -> Self {
        match state {
            ChannelState::Initialized => ChannelEvent::Initialized,
            ChannelState::Attaching => ChannelEvent::Attaching,
            ChannelState::Attached => ChannelEvent::Attached,
            ChannelState::Detaching => ChannelEvent::Detaching,
            ChannelState::Detached => ChannelEvent::Detached,
            ChannelState::Suspended => ChannelEvent::Suspended,
            ChannelState::Failed => ChannelEvent::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStateChange {
    pub event: ChannelEvent,
    pub previous: ChannelState,
    pub current: ChannelState,
    pub reason: Option<ErrorInfo>,
    /// Server kept the channel's continuity across this (re)attach
    pub resumed: bool,
}

impl ChannelStateChange {
    pub fn new(
        previous: ChannelState,
        current: ChannelState,
        reason: Option<ErrorInfo>,
        resumed: bool,
    ) -> Self {
        Self {
            event: current.into(),
            previous,
            current,
            reason,
            resumed,
        }
    }

    pub fn update(
        state: ChannelState,
        reason: Option<ErrorInfo>,
        resumed: bool,
    ) -> Self {
        Self {
            event: ChannelEvent::Update,
            previous: state,
            current: state,
            reason,
            resumed,
        }
    }
}

/// Server cursors recorded by the channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelProperties {
    /// Latest cursor from attach/message/presence traffic; cleared on detach, suspend and fail
    pub channel_serial: Option<String>,
    /// Cursor at the moment of attachment, anchoring "until attach" history
    pub attach_serial: Option<String>,
}

/// Caller-supplied attach options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelOptions {
    pub params: Option<ChannelParams>,
    pub modes: Option<Vec<ChannelMode>>,
    /// Overrides `channel.attach_on_subscribe` from the client config
    pub attach_on_subscribe: Option<bool>,
}

impl ChannelOptions {
    pub fn with_params(
        mut self,
        params: ChannelParams,
    ) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_modes(
        mut self,
        modes: Vec<ChannelMode>,
    ) -> Self {
        self.modes = Some(modes);
        self
    }

    /// Whether moving from `self` to `other` requires a fresh ATTACH.
    pub(crate) fn requires_reattach(
        &self,
        other: &ChannelOptions,
    ) -> bool {
        self.params != other.params || self.modes != other.modes
    }
}
