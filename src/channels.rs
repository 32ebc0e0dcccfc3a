//! Registry of the channels of one connection.
//!
//! The connection owner pushes inbound envelopes and connection state
//! notifications here; they are routed to channels by name or fanned out to
//! every channel.

use dashmap::DashMap;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::proto::ProtocolMessage;
use crate::Channel;
use crate::ChannelContext;
use crate::ChannelOptions;
use crate::Completion;
use crate::ErrorInfo;

#[derive(Debug)]
pub struct Channels {
    ctx: ChannelContext,
    channels: DashMap<String, Channel>,
}

impl Channels {
    pub fn new(ctx: ChannelContext) -> Self {
        Self {
            ctx,
            channels: DashMap::new(),
        }
    }

    /// Returns the channel called `name`, creating it on first use.
    pub fn get(
        &self,
        name: &str,
    ) -> Channel {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(channel = %name, "creating channel");
                Channel::new(name, self.ctx.clone(), ChannelOptions::default())
            })
            .clone()
    }

    /// Like [`get`](Self::get), applying `options` to an existing channel.
    pub fn get_with_options(
        &self,
        name: &str,
        options: ChannelOptions,
    ) -> Channel {
        if let Some(existing) = self.channels.get(name).map(|c| c.clone()) {
            existing.set_options_with(options, Completion::none());
            return existing;
        }
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| Channel::new(name, self.ctx.clone(), options))
            .clone()
    }

    pub fn exists(
        &self,
        name: &str,
    ) -> bool {
        self.channels.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.channels.iter().map(|e| e.key().clone()).collect()
    }

    /// Detaches the channel, cancels its timers and forgets it.
    pub fn release(
        &self,
        name: &str,
    ) {
        if let Some((_, channel)) = self.channels.remove(name) {
            info!(channel = %name, "releasing channel");
            channel.release();
        }
    }

    /// Routes an inbound envelope to its channel.
    pub fn on_protocol_message(
        &self,
        msg: ProtocolMessage,
    ) {
        let channel = self.channels.get(&msg.channel).map(|c| c.clone());
        match channel {
            Some(channel) => channel.on_protocol_message(msg),
            None => warn!(
                channel = %msg.channel,
                action = msg.action.name(),
                "message received for unknown channel"
            ),
        }
    }

    fn all(&self) -> Vec<Channel> {
        self.channels.iter().map(|e| e.value().clone()).collect()
    }

    pub fn on_connection_failed(
        &self,
        reason: ErrorInfo,
    ) {
        for channel in self.all() {
            channel.on_connection_failed(reason.clone());
        }
    }

    pub fn on_connection_closed(
        &self,
        reason: ErrorInfo,
    ) {
        for channel in self.all() {
            channel.on_connection_closed(reason.clone());
        }
    }

    /// `notify = false` moves channels without emitting state changes.
    pub fn on_connection_suspended(
        &self,
        reason: ErrorInfo,
        notify: bool,
    ) {
        for channel in self.all() {
            channel.on_connection_suspended(reason.clone(), notify);
        }
    }

    pub fn on_connection_reconnected(&self) {
        for channel in self.all() {
            channel.on_connection_reconnected();
        }
    }

    /// Resets every channel to `initialized` after connection-level recovery failed.
    pub fn set_reinitialized(&self) {
        for channel in self.all() {
            channel.set_reinitialized();
        }
    }
}
