//! Presence membership for a channel.
//!
//! [`PresenceMap`] holds the authoritative member set and runs sync
//! sequences. [`Presence`] is the caller-facing controller: it submits
//! enter/update/leave through the channel, answers `get` (optionally waiting
//! for an in-flight sync) and dispatches membership events.

mod map;
mod state;

pub use map::*;
pub(crate) use state::PresenceState;

#[cfg(test)]
mod presence_test;

use std::sync::Arc;

use tracing::debug;

use crate::channel::await_completion;
use crate::channel::ChannelShared;
use crate::constants::CHANNELS_RESOURCE;
use crate::constants::HISTORY_ACCEPT_HEADERS;
use crate::history::HistoryParams;
use crate::history::HistoryRequest;
use crate::history::PresencePage;
use crate::observer::BoxError;
use crate::observer::ListenerId;
use crate::proto::Payload;
use crate::proto::PresenceAction;
use crate::proto::PresenceMessage;
use crate::ChannelState;
use crate::Completion;
use crate::ErrorInfo;
use crate::Result;

/// Filters and wait behavior for [`Presence::get`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetParams {
    /// Wait for an in-flight sync before answering; defaults to `presence.wait_for_sync`
    pub wait_for_sync: Option<bool>,
    pub client_id: Option<String>,
    pub connection_id: Option<String>,
}

impl GetParams {
    pub fn with_wait_for_sync(
        mut self,
        wait: bool,
    ) -> Self {
        self.wait_for_sync = Some(wait);
        self
    }

    pub fn with_client_id(
        mut self,
        client_id: impl Into<String>,
    ) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_connection_id(
        mut self,
        connection_id: impl Into<String>,
    ) -> Self {
        self.connection_id = Some(connection_id.into());
        self
    }

    fn matches(
        &self,
        member: &PresenceMessage,
    ) -> bool {
        let client_ok = self
            .client_id
            .as_ref()
            .map_or(true, |id| member.client_id.as_ref() == Some(id));
        let connection_ok = self
            .connection_id
            .as_ref()
            .map_or(true, |id| member.connection_id.as_ref() == Some(id));
        client_ok && connection_ok
    }
}

/// Presence controller of one channel.
#[derive(Clone, Debug)]
pub struct Presence {
    shared: Arc<ChannelShared>,
}

impl Presence {
    pub(crate) fn new(shared: Arc<ChannelShared>) -> Self {
        Self { shared }
    }

    fn own_client_id(&self) -> std::result::Result<String, ErrorInfo> {
        self.shared
            .ctx
            .transport
            .client_id()
            .ok_or_else(ErrorInfo::presence_needs_client_id)
    }

    /// Submits a presence record. Sent at once when attached, queued (one per
    /// client id) while initialized or attaching, refused otherwise.
    pub fn update_presence(
        &self,
        record: PresenceMessage,
        completion: Completion,
    ) {
        self.shared.update_presence(record, completion);
    }

    async fn submit(
        &self,
        action: PresenceAction,
        client_id: std::result::Result<String, ErrorInfo>,
        data: Option<Payload>,
    ) -> Result<()> {
        let client_id = client_id?;
        let mut record = PresenceMessage::new(action, client_id);
        record.data = data;

        let (completion, rx) = Completion::channel();
        self.update_presence(record, completion);
        await_completion(rx).await
    }

    pub async fn enter(
        &self,
        data: Option<Payload>,
    ) -> Result<()> {
        self.submit(PresenceAction::Enter, self.own_client_id(), data).await
    }

    pub async fn update(
        &self,
        data: Option<Payload>,
    ) -> Result<()> {
        self.submit(PresenceAction::Update, self.own_client_id(), data).await
    }

    pub async fn leave(
        &self,
        data: Option<Payload>,
    ) -> Result<()> {
        self.submit(PresenceAction::Leave, self.own_client_id(), data).await
    }

    pub async fn enter_client(
        &self,
        client_id: impl Into<String>,
        data: Option<Payload>,
    ) -> Result<()> {
        self.submit(PresenceAction::Enter, Ok(client_id.into()), data).await
    }

    pub async fn update_client(
        &self,
        client_id: impl Into<String>,
        data: Option<Payload>,
    ) -> Result<()> {
        self.submit(PresenceAction::Update, Ok(client_id.into()), data).await
    }

    pub async fn leave_client(
        &self,
        client_id: impl Into<String>,
        data: Option<Payload>,
    ) -> Result<()> {
        self.submit(PresenceAction::Leave, Ok(client_id.into()), data).await
    }

    /// Current members matching `params`.
    ///
    /// With `wait_for_sync`, waits until an in-flight sync completes. A
    /// suspended channel fails with 91005 instead of waiting; states other
    /// than attached, attaching and suspended are invalid.
    ///
    /// A wait ends with an error when the channel leaves a state it can sync
    /// in: 91005 on suspend, 90001 on detach, failure or release. Dropping
    /// the returned future cancels the wait without reporting anything.
    pub async fn get(
        &self,
        params: GetParams,
    ) -> Result<Vec<PresenceMessage>> {
        let wait = params
            .wait_for_sync
            .unwrap_or(self.shared.ctx.config.presence.wait_for_sync);

        loop {
            let mut epoch = {
                let inner = self.shared.inner.lock();
                match inner.state {
                    ChannelState::Attached | ChannelState::Attaching => {
                        if !wait || inner.presence.sync_complete() {
                            return Ok(snapshot(&inner.presence, &params));
                        }
                    }
                    ChannelState::Suspended => {
                        if wait {
                            return Err(ErrorInfo::presence_out_of_sync().into());
                        }
                        return Ok(snapshot(&inner.presence, &params));
                    }
                    state => return Err(ErrorInfo::invalid_state(state, "get presence").into()),
                }
                // subscribed under the lock so no wake-up between check and wait is lost
                self.shared.sync_epoch.subscribe()
            };

            debug!(channel = %self.shared.name, "waiting for presence sync");
            // the sender lives in the channel this handle keeps alive
            if epoch.changed().await.is_err() {
                return Err(ErrorInfo::internal("presence sync notifier closed").into());
            }
        }
    }

    pub fn sync_complete(&self) -> bool {
        self.shared.inner.lock().presence.sync_complete()
    }

    /// Registers a listener for every presence event, or only for `action`.
    /// May implicitly attach the channel.
    pub fn subscribe<F>(
        &self,
        action: Option<PresenceAction>,
        listener: F,
    ) -> ListenerId
    where
        F: Fn(&PresenceMessage) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        let id = self.shared.presence_listeners.on(action, listener);
        self.shared.attach_on_subscribe();
        id
    }

    pub fn unsubscribe(
        &self,
        id: ListenerId,
    ) -> bool {
        self.shared.presence_listeners.off(id)
    }

    pub fn unsubscribe_all(&self) {
        self.shared.presence_listeners.off_all();
    }

    pub async fn history(
        &self,
        params: HistoryParams,
    ) -> Result<PresencePage> {
        let request = HistoryRequest {
            path: format!("{}/{}/presence/history", CHANNELS_RESOURCE, self.shared.name),
            headers: HISTORY_ACCEPT_HEADERS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            params: params.to_query(),
        };
        debug!(channel = %self.shared.name, path = %request.path, "querying presence history");
        Ok(self.shared.ctx.history.presence(request).await?)
    }
}

fn snapshot(
    presence: &PresenceState,
    params: &GetParams,
) -> Vec<PresenceMessage> {
    presence
        .members
        .values()
        .into_iter()
        .filter(|member| params.matches(member))
        .collect()
}
