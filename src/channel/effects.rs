use crate::proto::Annotation;
use crate::proto::Message;
use crate::proto::PresenceMessage;
use crate::ChannelStateChange;
use crate::DeferredCompletions;

/// Side effects collected while the channel lock is held and applied after
/// it is released, so listeners and completions may call back into the
/// channel.
#[derive(Debug, Default)]
pub(crate) struct Effects {
    pub(crate) state_changes: Vec<ChannelStateChange>,
    pub(crate) completions: DeferredCompletions,
    pub(crate) messages: Vec<Message>,
    pub(crate) annotations: Vec<Annotation>,
    pub(crate) presence: Vec<PresenceMessage>,
    pub(crate) reenter: Vec<PresenceMessage>,
    /// Presence sync status or channel state changed; wake `get` waiters
    pub(crate) wake_sync_waiters: bool,
}
