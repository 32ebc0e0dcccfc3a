//! Channel façade: lifecycle, publishing, subscription and history for one
//! named channel.

mod context;
mod core;
mod effects;
mod state;
mod timers;

pub use context::*;
pub use state::*;

pub(crate) use self::core::ChannelShared;


use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::debug;

use crate::constants::CHANNELS_RESOURCE;
use crate::constants::HISTORY_ACCEPT_HEADERS;
use crate::history::HistoryParams;
use crate::history::HistoryRequest;
use crate::history::MessagePage;
use crate::observer::BoxError;
use crate::observer::ListenerId;
use crate::proto::Annotation;
use crate::proto::ChannelMode;
use crate::proto::ChannelParams;
use crate::proto::Message;
use crate::proto::ProtocolMessage;
use crate::Completion;
use crate::CompletionResult;
use crate::Error;
use crate::ErrorInfo;
use crate::Presence;
use crate::Result;

/// Handle to one channel. Cloning is cheap; all clones share state.
#[derive(Clone, Debug)]
pub struct Channel {
    shared: Arc<ChannelShared>,
}

impl Channel {
    pub(crate) fn new(
        name: impl Into<String>,
        ctx: ChannelContext,
        options: ChannelOptions,
    ) -> Self {
        Self {
            shared: ChannelShared::new(name.into(), ctx, options),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> ChannelState {
        self.shared.inner.lock().state
    }

    /// Reason attached to the last state change, if any.
    pub fn error_reason(&self) -> Option<ErrorInfo> {
        self.shared.inner.lock().error_reason.clone()
    }

    pub fn properties(&self) -> ChannelProperties {
        self.shared.inner.lock().properties.clone()
    }

    /// Params granted by the server on the last attach.
    pub fn params(&self) -> Option<ChannelParams> {
        self.shared.inner.lock().params.clone()
    }

    /// Modes granted by the server on the last attach.
    pub fn modes(&self) -> Option<Vec<ChannelMode>> {
        self.shared.inner.lock().modes.clone()
    }

    pub fn options(&self) -> ChannelOptions {
        self.shared.options.load().as_ref().clone()
    }

    pub fn presence(&self) -> Presence {
        Presence::new(self.shared.clone())
    }

    //--------------------------------------------------------------------
    // Lifecycle

    /// Requests attachment; `completion` fires once attached or on failure.
    pub fn attach_with(
        &self,
        force: bool,
        completion: Completion,
    ) {
        self.shared
            .transact(|inner, effects| self.shared.request_attach(inner, force, completion, effects));
    }

    pub async fn attach(&self) -> Result<()> {
        let (completion, rx) = Completion::channel();
        self.attach_with(false, completion);
        await_completion(rx).await
    }

    pub fn detach_with(
        &self,
        completion: Completion,
    ) {
        self.shared
            .transact(|inner, effects| self.shared.request_detach(inner, completion, effects));
    }

    pub async fn detach(&self) -> Result<()> {
        let (completion, rx) = Completion::channel();
        self.detach_with(completion);
        await_completion(rx).await
    }

    /// Replaces the attach options. Changed params or modes on an attached or
    /// attaching channel trigger a reattach; `completion` then fires on the
    /// next ATTACHED.
    pub fn set_options_with(
        &self,
        options: ChannelOptions,
        completion: Completion,
    ) {
        self.shared.set_options(options, completion);
    }

    pub async fn set_options(
        &self,
        options: ChannelOptions,
    ) -> Result<()> {
        let (completion, rx) = Completion::channel();
        self.set_options_with(options, completion);
        await_completion(rx).await
    }

    //--------------------------------------------------------------------
    // Publishing

    pub fn publish_with(
        &self,
        messages: Vec<Message>,
        completion: Completion,
    ) {
        self.shared.publish(messages, completion);
    }

    pub async fn publish(
        &self,
        messages: Vec<Message>,
    ) -> Result<()> {
        let (completion, rx) = Completion::channel();
        self.publish_with(messages, completion);
        await_completion(rx).await
    }

    //--------------------------------------------------------------------
    // Subscription

    /// Registers a message listener for every message, or only those named
    /// `name`. May implicitly attach the channel.
    pub fn subscribe<F>(
        &self,
        name: Option<&str>,
        listener: F,
    ) -> ListenerId
    where
        F: Fn(&Message) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        let id = self.shared.message_listeners.on(name.map(str::to_string), listener);
        self.shared.attach_on_subscribe();
        id
    }

    pub fn unsubscribe(
        &self,
        id: ListenerId,
    ) -> bool {
        self.shared.message_listeners.off(id)
    }

    pub fn unsubscribe_all(&self) {
        self.shared.message_listeners.off_all();
    }

    /// Registers an annotation listener for every annotation, or only those of
    /// type `kind`.
    pub fn subscribe_annotations<F>(
        &self,
        kind: Option<&str>,
        listener: F,
    ) -> ListenerId
    where
        F: Fn(&Annotation) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        let id = self.shared.annotation_listeners.on(kind.map(str::to_string), listener);
        self.shared.attach_on_subscribe();
        id
    }

    pub fn unsubscribe_annotations(
        &self,
        id: ListenerId,
    ) -> bool {
        self.shared.annotation_listeners.off(id)
    }

    /// Registers a state listener for every change, or only for `event`.
    pub fn on<F>(
        &self,
        event: Option<ChannelEvent>,
        listener: F,
    ) -> ListenerId
    where
        F: Fn(&ChannelStateChange) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.shared.state_listeners.on(event, listener)
    }

    pub fn once<F>(
        &self,
        event: Option<ChannelEvent>,
        listener: F,
    ) -> ListenerId
    where
        F: Fn(&ChannelStateChange) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.shared.state_listeners.once(event, listener)
    }

    pub fn off(
        &self,
        id: ListenerId,
    ) -> bool {
        self.shared.state_listeners.off(id)
    }

    //--------------------------------------------------------------------
    // History

    pub async fn history(
        &self,
        params: HistoryParams,
    ) -> Result<MessagePage> {
        let request = self.history_request("messages", &params)?;
        debug!(channel = %self.name(), path = %request.path, "querying message history");
        Ok(self.shared.ctx.history.messages(request).await?)
    }

    pub(crate) fn history_request(
        &self,
        resource: &str,
        params: &HistoryParams,
    ) -> Result<HistoryRequest> {
        let mut query = params.to_query();
        if params.until_attach {
            let inner = self.shared.inner.lock();
            if inner.state != ChannelState::Attached {
                return Err(ErrorInfo::bad_request("option untilAttach requires the channel to be attached").into());
            }
            let Some(serial) = inner.properties.attach_serial.clone() else {
                return Err(ErrorInfo::bad_request("channel has no attach serial").into());
            };
            query.push(("fromSerial".to_string(), serial));
        }

        Ok(HistoryRequest {
            path: format!("{}/{}/{}", CHANNELS_RESOURCE, self.name(), resource),
            headers: HISTORY_ACCEPT_HEADERS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            params: query,
        })
    }

    //--------------------------------------------------------------------
    // Driven by the connection

    pub(crate) fn on_protocol_message(
        &self,
        msg: ProtocolMessage,
    ) {
        self.shared.on_protocol_message(msg);
    }

    pub(crate) fn on_connection_failed(
        &self,
        reason: ErrorInfo,
    ) {
        self.shared.on_connection_failed(reason);
    }

    pub(crate) fn on_connection_closed(
        &self,
        reason: ErrorInfo,
    ) {
        self.shared.on_connection_closed(reason);
    }

    pub(crate) fn on_connection_suspended(
        &self,
        reason: ErrorInfo,
        notify: bool,
    ) {
        self.shared.on_connection_suspended(reason, notify);
    }

    pub(crate) fn on_connection_reconnected(&self) {
        self.shared.on_connection_reconnected();
    }

    pub(crate) fn set_reinitialized(&self) {
        self.shared.set_reinitialized();
    }

    pub(crate) fn release(&self) {
        self.shared.release();
    }
}

pub(crate) async fn await_completion(rx: oneshot::Receiver<CompletionResult>) -> Result<()> {
    match rx.await {
        Ok(result) => Ok(result?),
        Err(e) => Err(Error::Interrupted(e.to_string())),
    }
}
