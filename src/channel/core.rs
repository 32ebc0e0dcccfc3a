//! Channel state machine and inbound protocol handling.
//!
//! All state lives in [`ChannelInner`] behind one mutex per channel. Every
//! entry point (caller, inbound envelope, connection notification, timer)
//! runs its transition inside [`ChannelShared::transact`], which collects
//! listener calls and completions into [`Effects`] and applies them after
//! the lock is dropped. Transport sends stay under the lock so that queued
//! operations leave in submission order.

use std::sync::Arc;
use std::sync::Weak;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::effects::Effects;
use super::timers::TimerKind;
use super::timers::TimerToken;
use super::timers::Timers;
use super::ChannelContext;
use crate::codec::DecodeError;
use crate::codec::Encoded;
use crate::constants::INVALID_CHANNEL_STATE;
use crate::constants::STATUS_BAD_REQUEST;
use crate::metrics::CHANNEL_REATTACH_ATTEMPTS;
use crate::metrics::PENDING_OPERATIONS_SENT;
use crate::observer::ObserverRegistry;
use crate::presence::PresenceState;
use crate::proto::Action;
use crate::proto::Annotation;
use crate::proto::ChannelMode;
use crate::proto::ChannelParams;
use crate::proto::Envelope;
use crate::proto::Flags;
use crate::proto::Message;
use crate::proto::Payload;
use crate::proto::PresenceAction;
use crate::proto::PresenceMessage;
use crate::proto::ProtocolMessage;
use crate::ChannelEvent;
use crate::ChannelOptions;
use crate::ChannelProperties;
use crate::ChannelState;
use crate::ChannelStateChange;
use crate::Completion;
use crate::ErrorInfo;
use crate::PendingQueue;

#[derive(Debug)]
pub(crate) struct ChannelInner {
    pub(crate) state: ChannelState,
    pub(crate) error_reason: Option<ErrorInfo>,
    pub(crate) properties: ChannelProperties,
    /// Params granted by the server on the last ATTACHED
    pub(crate) params: Option<ChannelParams>,
    /// Modes granted by the server on the last ATTACHED
    pub(crate) modes: Option<Vec<ChannelMode>>,
    pub(crate) resumed: bool,
    /// Ask the server to resume on the next ATTACH
    attach_resume: bool,
    pub(crate) retry_count: u32,
    decode_recovery: bool,
    /// detach() arrived while attaching
    pending_detach: bool,
    /// attach() arrived while detaching
    pending_attach: bool,
    state_before_detach: ChannelState,
    attach_waiters: Vec<Completion>,
    detach_waiters: Vec<Completion>,
    pub(crate) timers: Timers,
    pub(crate) presence: PresenceState,
    released: bool,
}

impl Default for ChannelInner {
    fn default() -> Self {
        Self {
            state: ChannelState::Initialized,
            error_reason: None,
            properties: ChannelProperties::default(),
            params: None,
            modes: None,
            resumed: false,
            attach_resume: false,
            retry_count: 0,
            decode_recovery: false,
            pending_detach: false,
            pending_attach: false,
            state_before_detach: ChannelState::Initialized,
            attach_waiters: Vec::new(),
            detach_waiters: Vec::new(),
            timers: Timers::default(),
            presence: PresenceState::default(),
            released: false,
        }
    }
}

pub(crate) struct ChannelShared {
    pub(crate) name: String,
    pub(crate) ctx: ChannelContext,
    pub(crate) options: ArcSwap<ChannelOptions>,
    pub(crate) inner: Mutex<ChannelInner>,
    pub(crate) state_listeners: ObserverRegistry<ChannelEvent, ChannelStateChange>,
    pub(crate) message_listeners: ObserverRegistry<String, Message>,
    pub(crate) annotation_listeners: ObserverRegistry<String, Annotation>,
    pub(crate) presence_listeners: ObserverRegistry<PresenceAction, PresenceMessage>,
    pub(crate) message_queue: PendingQueue<ProtocolMessage>,
    pub(crate) presence_queue: PendingQueue<PresenceMessage>,
    /// Bumped whenever a presence `get` waiter should re-check
    pub(crate) sync_epoch: watch::Sender<u64>,
    self_ref: Weak<ChannelShared>,
}

impl std::fmt::Debug for ChannelShared {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ChannelShared")
            .field("name", &self.name)
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl ChannelShared {
    pub(crate) fn new(
        name: String,
        ctx: ChannelContext,
        options: ChannelOptions,
    ) -> Arc<Self> {
        let (sync_epoch, _) = watch::channel(0u64);
        Arc::new_cyclic(|self_ref| Self {
            name,
            ctx,
            options: ArcSwap::from_pointee(options),
            inner: Mutex::new(ChannelInner::default()),
            state_listeners: ObserverRegistry::new("channel_state"),
            message_listeners: ObserverRegistry::new("channel_message"),
            annotation_listeners: ObserverRegistry::new("channel_annotation"),
            presence_listeners: ObserverRegistry::new("presence"),
            message_queue: PendingQueue::new("message"),
            presence_queue: PendingQueue::new("presence"),
            sync_epoch,
            self_ref: self_ref.clone(),
        })
    }

    /// Runs `f` under the channel lock, then applies the effects it collected.
    pub(crate) fn transact<R>(
        &self,
        f: impl FnOnce(&mut ChannelInner, &mut Effects) -> R,
    ) -> R {
        let mut effects = Effects::default();
        let result = {
            let mut inner = self.inner.lock();
            f(&mut inner, &mut effects)
        };
        self.apply(effects);
        result
    }

    fn apply(
        &self,
        effects: Effects,
    ) {
        let Effects {
            state_changes,
            completions,
            messages,
            annotations,
            presence,
            reenter,
            wake_sync_waiters,
        } = effects;

        if wake_sync_waiters {
            self.sync_epoch.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
        }
        for change in state_changes {
            self.state_listeners.emit(Some(&change.event), &change);
        }
        completions.run();
        for message in messages {
            self.message_listeners.emit(message.name.as_ref(), &message);
        }
        for annotation in annotations {
            self.annotation_listeners.emit(annotation.kind.as_ref(), &annotation);
        }
        for record in presence {
            self.presence_listeners.emit(Some(&record.action), &record);
        }
        for enter in reenter {
            self.reenter(enter);
        }
    }

    //--------------------------------------------------------------------
    // State transitions

    fn set_state(
        &self,
        inner: &mut ChannelInner,
        next: ChannelState,
        reason: Option<ErrorInfo>,
        resumed: bool,
        notify: bool,
        effects: &mut Effects,
    ) {
        let previous = inner.state;
        inner.state = next;
        inner.error_reason = reason.clone();
        if !matches!(next, ChannelState::Attaching | ChannelState::Suspended) {
            inner.retry_count = 0;
        }
        if previous != next {
            debug!(channel = %self.name, %previous, %next, "channel state transition");
            crate::metrics::CHANNEL_STATE_TRANSITIONS
                .with_label_values(&[next.as_str()])
                .inc();
            if notify {
                effects
                    .state_changes
                    .push(ChannelStateChange::new(previous, next, reason.clone(), resumed));
            }
        }
        effects.wake_sync_waiters = true;

        if !matches!(
            next,
            ChannelState::Detached | ChannelState::Suspended | ChannelState::Failed
        ) {
            return;
        }

        inner.properties.channel_serial = None;
        inner.pending_attach = false;
        inner.pending_detach = false;

        let queued_cause = reason
            .clone()
            .unwrap_or_else(|| ErrorInfo::invalid_state(next, "send queued operation"));
        effects.completions.extend(self.message_queue.fail_all(&queued_cause));
        effects.completions.extend(self.presence_queue.fail_all(&queued_cause));

        let attach_cause = reason.clone().unwrap_or_else(|| ErrorInfo::invalid_state(next, "attach"));
        for waiter in inner.attach_waiters.drain(..) {
            effects.completions.fail(waiter, attach_cause.clone());
        }

        match next {
            ChannelState::Detached => {
                inner.attach_resume = false;
                inner.presence.reset();
                for waiter in inner.detach_waiters.drain(..) {
                    effects.completions.succeed(waiter);
                }
            }
            ChannelState::Failed => {
                inner.attach_resume = false;
                inner.presence.reset();
                let detach_cause = reason.unwrap_or_else(|| ErrorInfo::invalid_state(next, "detach"));
                for waiter in inner.detach_waiters.drain(..) {
                    effects.completions.fail(waiter, detach_cause.clone());
                }
            }
            // presence members are kept while suspended
            _ => {}
        }
    }

    fn arm_timer(
        &self,
        inner: &mut ChannelInner,
        kind: TimerKind,
        delay: std::time::Duration,
    ) {
        let weak = self.self_ref.clone();
        inner.timers.arm(kind, delay, &self.ctx.runtime, move |token| {
            if let Some(shared) = weak.upgrade() {
                shared.on_timer(token);
            }
        });
    }

    pub(crate) fn request_attach(
        &self,
        inner: &mut ChannelInner,
        force: bool,
        completion: Completion,
        effects: &mut Effects,
    ) {
        match inner.state {
            ChannelState::Attached if !force => {
                effects.completions.succeed(completion);
                return;
            }
            ChannelState::Attaching if !force => {
                trace!(channel = %self.name, "attach already in progress");
                inner.attach_waiters.push(completion);
                return;
            }
            ChannelState::Detaching => {
                debug!(channel = %self.name, "attach requested while detaching; deferred");
                inner.pending_attach = true;
                inner.attach_waiters.push(completion);
                return;
            }
            _ => {}
        }

        let connection = self.ctx.transport.connection_state();
        if let Some(blocker) = connection.attach_blocker() {
            debug!(channel = %self.name, %connection, "attach refused by connection state");
            effects.completions.fail(completion, blocker);
            return;
        }

        inner.attach_waiters.push(completion);
        self.start_attach(inner, None, effects);
    }

    fn start_attach(
        &self,
        inner: &mut ChannelInner,
        reason: Option<ErrorInfo>,
        effects: &mut Effects,
    ) {
        inner.timers.cancel(TimerKind::Detach);
        inner.pending_attach = false;
        self.set_state(inner, ChannelState::Attaching, reason, false, true, effects);
        self.send_attach(inner);
        self.arm_timer(inner, TimerKind::Attach, self.ctx.config.channel.attach_timeout());
    }

    fn send_attach(
        &self,
        inner: &ChannelInner,
    ) {
        let options = self.options.load();
        let mut flags = Flags::empty().with_modes(options.modes.as_deref().unwrap_or_default());
        if inner.attach_resume {
            flags = flags.with(Flags::ATTACH_RESUME);
        }
        let msg = ProtocolMessage::attach(
            self.name.clone(),
            flags,
            options.params.clone(),
            inner.properties.channel_serial.clone(),
        );
        trace!(channel = %self.name, ?flags, "sending ATTACH");
        if let Err(e) = self.ctx.transport.send(msg, true, Completion::none()) {
            warn!(channel = %self.name, "ATTACH not accepted by transport: {}", e);
        }
    }

    pub(crate) fn request_detach(
        &self,
        inner: &mut ChannelInner,
        completion: Completion,
        effects: &mut Effects,
    ) {
        match inner.state {
            ChannelState::Initialized | ChannelState::Detached => effects.completions.succeed(completion),
            ChannelState::Detaching => inner.detach_waiters.push(completion),
            ChannelState::Attaching => {
                debug!(channel = %self.name, "detach requested while attaching; deferred");
                inner.pending_detach = true;
                inner.detach_waiters.push(completion);
            }
            ChannelState::Attached | ChannelState::Suspended | ChannelState::Failed => {
                inner.detach_waiters.push(completion);
                self.start_detach(inner, effects);
            }
        }
    }

    fn start_detach(
        &self,
        inner: &mut ChannelInner,
        effects: &mut Effects,
    ) {
        inner.timers.cancel(TimerKind::Attach);
        inner.timers.cancel(TimerKind::Reattach);
        inner.state_before_detach = inner.state;
        self.set_state(inner, ChannelState::Detaching, None, false, true, effects);
        self.send_detach();
        self.arm_timer(inner, TimerKind::Detach, self.ctx.config.channel.detach_timeout());
    }

    fn send_detach(&self) {
        trace!(channel = %self.name, "sending DETACH");
        if let Err(e) = self
            .ctx
            .transport
            .send(ProtocolMessage::detach(self.name.clone()), true, Completion::none())
        {
            warn!(channel = %self.name, "DETACH not accepted by transport: {}", e);
        }
    }

    fn suspend_and_retry(
        &self,
        inner: &mut ChannelInner,
        reason: ErrorInfo,
        effects: &mut Effects,
    ) {
        inner.timers.cancel(TimerKind::Attach);
        self.set_state(inner, ChannelState::Suspended, Some(reason), false, true, effects);
        inner.retry_count += 1;
        let delay = self.ctx.config.retry.delay_for_attempt(inner.retry_count);
        debug!(channel = %self.name, retry = inner.retry_count, ?delay, "reattach scheduled");
        self.arm_timer(inner, TimerKind::Reattach, delay);
    }

    //--------------------------------------------------------------------
    // Timers

    pub(crate) fn on_timer(
        &self,
        token: TimerToken,
    ) {
        self.transact(|inner, effects| {
            if !inner.timers.is_current(token) {
                debug!(channel = %self.name, ?token, "ignoring stale timer");
                return;
            }
            inner.timers.clear_fired(token);
            match token.kind {
                TimerKind::Attach => self.on_attach_timeout(inner, effects),
                TimerKind::Reattach => self.on_reattach_timer(inner, effects),
                TimerKind::Detach => self.on_detach_timeout(inner, effects),
            }
        });
    }

    fn on_attach_timeout(
        &self,
        inner: &mut ChannelInner,
        effects: &mut Effects,
    ) {
        if inner.state != ChannelState::Attaching {
            return;
        }
        let error = ErrorInfo::attach_timeout(&self.name);
        warn!(channel = %self.name, "attach timed out");

        if inner.pending_detach {
            self.set_state(inner, ChannelState::Detached, Some(error), false, true, effects);
        } else {
            self.suspend_and_retry(inner, error, effects);
        }
    }

    fn on_reattach_timer(
        &self,
        inner: &mut ChannelInner,
        effects: &mut Effects,
    ) {
        if inner.state != ChannelState::Suspended {
            return;
        }
        let connection = self.ctx.transport.connection_state();
        if connection.attach_blocker().is_some() {
            debug!(channel = %self.name, %connection, "connection inactive; waiting for reconnect");
            return;
        }
        CHANNEL_REATTACH_ATTEMPTS.inc();
        info!(channel = %self.name, retry = inner.retry_count, "reattaching suspended channel");
        let reason = inner.error_reason.clone();
        self.start_attach(inner, reason, effects);
    }

    fn on_detach_timeout(
        &self,
        inner: &mut ChannelInner,
        effects: &mut Effects,
    ) {
        if inner.state != ChannelState::Detaching {
            return;
        }
        let error = ErrorInfo::detach_timeout(&self.name);
        warn!(channel = %self.name, "detach timed out");
        for waiter in inner.detach_waiters.drain(..) {
            effects.completions.fail(waiter, error.clone());
        }

        let previous = inner.state_before_detach;
        let pending_attach = inner.pending_attach;
        let attach_waiters = std::mem::take(&mut inner.attach_waiters);
        self.set_state(inner, previous, Some(error), false, true, effects);
        inner.attach_waiters = attach_waiters;

        match previous {
            ChannelState::Attached => {
                for waiter in inner.attach_waiters.drain(..) {
                    effects.completions.succeed(waiter);
                }
                // a detach deferred from attaching left the queues unsent
                self.replay_message_queue(effects);
                self.flush_presence_queue(effects);
            }
            _ if pending_attach => {
                let reason = inner.error_reason.clone();
                self.start_attach(inner, reason, effects);
            }
            ChannelState::Suspended => {
                let delay = self.ctx.config.retry.delay_for_attempt(inner.retry_count.max(1));
                self.arm_timer(inner, TimerKind::Reattach, delay);
            }
            _ => {}
        }
    }

    //--------------------------------------------------------------------
    // Inbound protocol

    pub(crate) fn on_protocol_message(
        &self,
        msg: ProtocolMessage,
    ) {
        let (envelope, action) = msg.into_parts();
        trace!(channel = %self.name, action = action.name(), "inbound protocol message");

        self.transact(|inner, effects| {
            if inner.released {
                debug!(channel = %self.name, "ignoring message for released channel");
                return;
            }
            match action {
                Action::Attached { flags, params, error } => {
                    self.on_attached(inner, &envelope, flags, params, error, effects)
                }
                Action::Detached { error } | Action::Detach { error } => self.on_detached(inner, error, effects),
                Action::Error { error } => self.on_error(inner, error, effects),
                Action::Message { messages } => self.on_messages(inner, &envelope, messages, effects),
                Action::Presence { presence } => self.on_presence(inner, &envelope, presence, false, effects),
                Action::Sync { presence } => self.on_presence(inner, &envelope, presence, true, effects),
                Action::Annotation { annotations } => self.on_annotations(inner, &envelope, annotations, effects),
                Action::Attach { .. } => {
                    warn!(channel = %self.name, "unexpected ATTACH from server");
                }
            }
        });
    }

    fn on_attached(
        &self,
        inner: &mut ChannelInner,
        envelope: &Envelope,
        flags: Flags,
        params: Option<ChannelParams>,
        error: Option<ErrorInfo>,
        effects: &mut Effects,
    ) {
        if matches!(inner.state, ChannelState::Detaching | ChannelState::Detached) {
            debug!(channel = %self.name, state = %inner.state, "ATTACHED while detaching; re-sending DETACH");
            self.send_detach();
            return;
        }

        if let Some(serial) = &envelope.channel_serial {
            inner.properties.channel_serial = Some(serial.clone());
            inner.properties.attach_serial = Some(serial.clone());
        }
        inner.params = params;
        let modes = flags.modes();
        inner.modes = if modes.is_empty() { None } else { Some(modes) };
        inner.resumed = flags.resumed();
        inner.attach_resume = true;
        inner.decode_recovery = false;

        if inner.state == ChannelState::Attached {
            if !flags.resumed() {
                debug!(channel = %self.name, "ATTACHED without resume on attached channel");
                effects
                    .state_changes
                    .push(ChannelStateChange::update(ChannelState::Attached, error, false));
                self.presence_attached(inner, flags, effects);
            }
            return;
        }

        inner.timers.cancel(TimerKind::Attach);
        inner.timers.cancel(TimerKind::Reattach);
        self.set_state(inner, ChannelState::Attached, error, flags.resumed(), true, effects);
        for waiter in inner.attach_waiters.drain(..) {
            effects.completions.succeed(waiter);
        }

        if std::mem::take(&mut inner.pending_detach) {
            debug!(channel = %self.name, "applying deferred detach");
            self.start_detach(inner, effects);
            return;
        }

        self.replay_message_queue(effects);
        self.presence_attached(inner, flags, effects);
    }

    /// Sends queued messages in submission order.
    fn replay_message_queue(
        &self,
        effects: &mut Effects,
    ) {
        let queue_messages = self.ctx.config.channel.queue_messages;
        let transport = &self.ctx.transport;
        effects.completions.extend(
            self.message_queue
                .drain_and_send(|msg, completion| transport.send(msg, queue_messages, completion)),
        );
    }

    fn presence_attached(
        &self,
        inner: &mut ChannelInner,
        flags: Flags,
        effects: &mut Effects,
    ) {
        let own_connection = self.ctx.transport.connection_id();
        if let Some(outcome) =
            inner
                .presence
                .on_attached(flags.has_presence(), flags.resumed(), own_connection.as_deref())
        {
            effects.presence.extend(outcome.leaves);
            effects.reenter.extend(outcome.reenter);
        }
        effects.wake_sync_waiters = true;
        self.flush_presence_queue(effects);
    }

    /// Sends every queued presence update as one PRESENCE envelope.
    fn flush_presence_queue(
        &self,
        effects: &mut Effects,
    ) {
        let ops = self.presence_queue.take_all();
        if ops.is_empty() {
            return;
        }

        let count = ops.len();
        let mut records = Vec::with_capacity(count);
        let mut completion = Completion::none();
        for op in ops {
            records.push(op.payload);
            completion = completion.join(op.completion);
        }
        debug!(channel = %self.name, count, "flushing queued presence updates");

        let msg = ProtocolMessage::presence(self.name.clone(), records);
        let queue_messages = self.ctx.config.channel.queue_messages;
        match self.ctx.transport.send(msg, queue_messages, completion.clone()) {
            Ok(()) => PENDING_OPERATIONS_SENT
                .with_label_values(&["presence"])
                .inc_by(count as u64),
            Err(e) => effects.completions.fail(completion, e),
        }
    }

    fn on_detached(
        &self,
        inner: &mut ChannelInner,
        error: Option<ErrorInfo>,
        effects: &mut Effects,
    ) {
        match inner.state {
            ChannelState::Detaching => {
                inner.timers.cancel(TimerKind::Detach);
                let pending_attach = inner.pending_attach;
                let attach_waiters = std::mem::take(&mut inner.attach_waiters);
                self.set_state(inner, ChannelState::Detached, error, false, true, effects);
                inner.attach_waiters = attach_waiters;
                if pending_attach {
                    self.resume_deferred_attach(inner, effects);
                }
            }
            ChannelState::Attaching if inner.pending_detach => {
                inner.timers.cancel(TimerKind::Attach);
                self.set_state(inner, ChannelState::Detached, error, false, true, effects);
            }
            ChannelState::Attaching => {
                let reason = error.unwrap_or_else(|| {
                    ErrorInfo::new(
                        INVALID_CHANNEL_STATE,
                        STATUS_BAD_REQUEST,
                        format!("Channel {} detached by server while attaching", self.name),
                    )
                });
                self.suspend_and_retry(inner, reason, effects);
            }
            ChannelState::Attached | ChannelState::Suspended => {
                info!(channel = %self.name, "detached by server; reattaching");
                self.start_attach(inner, error, effects);
            }
            ChannelState::Initialized | ChannelState::Detached | ChannelState::Failed => {
                debug!(channel = %self.name, state = %inner.state, "ignoring DETACHED");
            }
        }
    }

    /// Starts the attach that was requested while a detach was in flight.
    fn resume_deferred_attach(
        &self,
        inner: &mut ChannelInner,
        effects: &mut Effects,
    ) {
        if let Some(blocker) = self.ctx.transport.connection_state().attach_blocker() {
            for waiter in inner.attach_waiters.drain(..) {
                effects.completions.fail(waiter, blocker.clone());
            }
            return;
        }
        self.start_attach(inner, None, effects);
    }

    fn on_error(
        &self,
        inner: &mut ChannelInner,
        error: ErrorInfo,
        effects: &mut Effects,
    ) {
        warn!(channel = %self.name, code = error.code, "channel error: {}", error.message);
        inner.timers.cancel_all();
        self.set_state(inner, ChannelState::Failed, Some(error), false, true, effects);
    }

    fn decode(
        &self,
        data: &mut Option<Payload>,
        encoding: &mut Option<String>,
    ) -> std::result::Result<(), DecodeError> {
        let decoded = self
            .ctx
            .codec
            .decode(&self.name, Encoded::new(data.clone(), encoding.clone()))?;
        *data = decoded.data;
        *encoding = decoded.encoding;
        Ok(())
    }

    fn on_messages(
        &self,
        inner: &mut ChannelInner,
        envelope: &Envelope,
        messages: Vec<Message>,
        effects: &mut Effects,
    ) {
        if inner.state != ChannelState::Attached {
            warn!(
                channel = %self.name,
                state = %inner.state,
                count = messages.len(),
                "dropping messages for channel that is not attached"
            );
            return;
        }
        if let Some(serial) = &envelope.channel_serial {
            inner.properties.channel_serial = Some(serial.clone());
        }

        for (index, mut message) in messages.into_iter().enumerate() {
            envelope.backfill_message(index, &mut message);
            match self.decode(&mut message.data, &mut message.encoding) {
                Ok(()) => {}
                Err(DecodeError::Recoverable(e)) => {
                    warn!(channel = %self.name, id = ?message.id, "delivering undecoded message: {}", e);
                }
                Err(DecodeError::UnrecoverableDelta(e)) => {
                    self.recover_from_decode_failure(inner, e, effects);
                    return;
                }
            }
            effects.messages.push(message);
        }
    }

    fn recover_from_decode_failure(
        &self,
        inner: &mut ChannelInner,
        error: ErrorInfo,
        effects: &mut Effects,
    ) {
        if inner.decode_recovery {
            debug!(channel = %self.name, "decode recovery already in progress");
            return;
        }
        warn!(channel = %self.name, "unrecoverable delta decode failure; reattaching: {}", error);
        inner.decode_recovery = true;
        self.start_attach(inner, Some(error), effects);
    }

    fn on_annotations(
        &self,
        inner: &mut ChannelInner,
        envelope: &Envelope,
        annotations: Vec<Annotation>,
        effects: &mut Effects,
    ) {
        if inner.state != ChannelState::Attached {
            warn!(
                channel = %self.name,
                state = %inner.state,
                count = annotations.len(),
                "dropping annotations for channel that is not attached"
            );
            return;
        }
        if let Some(serial) = &envelope.channel_serial {
            inner.properties.channel_serial = Some(serial.clone());
        }

        for (index, mut annotation) in annotations.into_iter().enumerate() {
            envelope.backfill_annotation(index, &mut annotation);
            if let Err(e) = self.decode(&mut annotation.data, &mut annotation.encoding) {
                warn!(channel = %self.name, id = ?annotation.id, "delivering undecoded annotation: {}", e);
            }
            effects.annotations.push(annotation);
        }
    }

    fn on_presence(
        &self,
        inner: &mut ChannelInner,
        envelope: &Envelope,
        records: Vec<PresenceMessage>,
        is_sync: bool,
        effects: &mut Effects,
    ) {
        if inner.state != ChannelState::Attached {
            warn!(
                channel = %self.name,
                state = %inner.state,
                count = records.len(),
                "dropping presence for channel that is not attached"
            );
            return;
        }
        if !is_sync {
            if let Some(serial) = &envelope.channel_serial {
                inner.properties.channel_serial = Some(serial.clone());
            }
        }

        let mut decoded = Vec::with_capacity(records.len());
        for (index, mut record) in records.into_iter().enumerate() {
            envelope.backfill_presence(index, &mut record);
            if let Err(e) = self.decode(&mut record.data, &mut record.encoding) {
                warn!(channel = %self.name, id = ?record.id, "keeping undecoded presence data: {}", e);
            }
            decoded.push(record);
        }

        let own_connection = self.ctx.transport.connection_id();
        let broadcast = inner.presence.apply(decoded, is_sync, own_connection.as_deref());
        effects.presence.extend(broadcast);

        if is_sync && envelope.sync_finished() {
            let outcome = inner.presence.end_sync(own_connection.as_deref());
            effects.presence.extend(outcome.leaves);
            effects.reenter.extend(outcome.reenter);
            effects.wake_sync_waiters = true;
        }
    }

    //--------------------------------------------------------------------
    // Outbound operations

    fn send_now(
        &self,
        msg: ProtocolMessage,
        completion: Completion,
        effects: &mut Effects,
    ) {
        let queue_messages = self.ctx.config.channel.queue_messages;
        if let Err(e) = self.ctx.transport.send(msg, queue_messages, completion.clone()) {
            effects.completions.fail(completion, e);
        }
    }

    /// Assigns idempotent ids when configured and encodes payloads.
    fn prepare_messages(
        &self,
        mut messages: Vec<Message>,
    ) -> std::result::Result<Vec<Message>, ErrorInfo> {
        if self.ctx.config.channel.idempotent_publishing && messages.iter().all(|m| m.id.is_none()) {
            let base_id = nanoid::nanoid!();
            for (index, message) in messages.iter_mut().enumerate() {
                message.id = Some(format!("{base_id}:{index}"));
            }
        }
        for message in messages.iter_mut() {
            let encoded = self.ctx.codec.encode(
                &self.name,
                Encoded::new(message.data.take(), message.encoding.take()),
            )?;
            message.data = encoded.data;
            message.encoding = encoded.encoding;
        }
        Ok(messages)
    }

    pub(crate) fn publish(
        &self,
        messages: Vec<Message>,
        completion: Completion,
    ) {
        let messages = match self.prepare_messages(messages) {
            Ok(messages) => messages,
            Err(e) => {
                completion.fail(e);
                return;
            }
        };
        let msg = ProtocolMessage::message(self.name.clone(), messages);

        self.transact(|inner, effects| match inner.state {
            ChannelState::Attached => self.send_now(msg, completion, effects),
            ChannelState::Initialized => {
                if let Some(blocker) = self.ctx.transport.connection_state().attach_blocker() {
                    effects.completions.fail(completion, blocker);
                    return;
                }
                self.message_queue.enqueue(msg, completion);
                self.request_attach(inner, false, Completion::none(), effects);
            }
            ChannelState::Attaching => self.message_queue.enqueue(msg, completion),
            state => effects
                .completions
                .fail(completion, ErrorInfo::invalid_state(state, "publish")),
        });
    }

    pub(crate) fn update_presence(
        &self,
        mut record: PresenceMessage,
        completion: Completion,
    ) {
        let Some(client_id) = record.client_id.clone() else {
            completion.fail(ErrorInfo::presence_needs_client_id());
            return;
        };
        match self.ctx.codec.encode(
            &self.name,
            Encoded::new(record.data.take(), record.encoding.take()),
        ) {
            Ok(encoded) => {
                record.data = encoded.data;
                record.encoding = encoded.encoding;
            }
            Err(e) => {
                completion.fail(e);
                return;
            }
        }

        self.transact(|inner, effects| match inner.state {
            ChannelState::Attached => {
                self.send_now(ProtocolMessage::presence(self.name.clone(), vec![record]), completion, effects)
            }
            ChannelState::Initialized => {
                if let Some(blocker) = self.ctx.transport.connection_state().attach_blocker() {
                    effects.completions.fail(completion, blocker);
                    return;
                }
                self.presence_queue.enqueue_keyed(client_id, record, completion);
                self.request_attach(inner, false, Completion::none(), effects);
            }
            ChannelState::Attaching => self.presence_queue.enqueue_keyed(client_id, record, completion),
            state => effects
                .completions
                .fail(completion, ErrorInfo::presence_invalid_state(state)),
        });
    }

    fn reenter(
        &self,
        enter: PresenceMessage,
    ) {
        let client_id = enter.client_id.clone().unwrap_or_default();
        info!(channel = %self.name, client_id = %client_id, "re-entering presence member lost by the server");
        let weak = self.self_ref.clone();
        let completion = Completion::from_fn(move |result| {
            if let (Err(cause), Some(shared)) = (result, weak.upgrade()) {
                warn!(channel = %shared.name, client_id = %client_id, "presence re-enter failed: {}", cause);
                shared.emit_update(ErrorInfo::presence_reenter_failed(&client_id, &cause));
            }
        });
        self.update_presence(enter, completion);
    }

    /// Emits an `Update` event carrying `reason` without changing state.
    pub(crate) fn emit_update(
        &self,
        reason: ErrorInfo,
    ) {
        let state = self.inner.lock().state;
        let change = ChannelStateChange::update(state, Some(reason), true);
        self.state_listeners.emit(Some(&ChannelEvent::Update), &change);
    }

    /// Attaches channels that are idle because nobody attached them yet.
    pub(crate) fn implicit_attach(&self) {
        self.transact(|inner, effects| {
            if matches!(
                inner.state,
                ChannelState::Initialized | ChannelState::Detached | ChannelState::Detaching
            ) {
                self.request_attach(inner, false, Completion::none(), effects);
            }
        });
    }

    /// Implicit attach on subscribe, unless disabled by options or config.
    pub(crate) fn attach_on_subscribe(&self) {
        let enabled = self
            .options
            .load()
            .attach_on_subscribe
            .unwrap_or(self.ctx.config.channel.attach_on_subscribe);
        if enabled {
            self.implicit_attach();
        }
    }

    pub(crate) fn set_options(
        &self,
        options: ChannelOptions,
        completion: Completion,
    ) {
        self.transact(|inner, effects| {
            let previous = self.options.swap(Arc::new(options));
            let changed = previous.requires_reattach(&self.options.load());
            if changed && matches!(inner.state, ChannelState::Attached | ChannelState::Attaching) {
                debug!(channel = %self.name, "channel options changed; reattaching");
                self.request_attach(inner, true, completion, effects);
            } else {
                effects.completions.succeed(completion);
            }
        });
    }

    //--------------------------------------------------------------------
    // Connection notifications

    pub(crate) fn on_connection_failed(
        &self,
        reason: ErrorInfo,
    ) {
        self.transact(|inner, effects| {
            if matches!(
                inner.state,
                ChannelState::Attached | ChannelState::Attaching | ChannelState::Suspended | ChannelState::Detaching
            ) {
                inner.timers.cancel_all();
                self.set_state(inner, ChannelState::Failed, Some(reason), false, true, effects);
            }
        });
    }

    pub(crate) fn on_connection_closed(
        &self,
        reason: ErrorInfo,
    ) {
        self.transact(|inner, effects| {
            if matches!(
                inner.state,
                ChannelState::Attached | ChannelState::Attaching | ChannelState::Suspended | ChannelState::Detaching
            ) {
                inner.timers.cancel_all();
                self.set_state(inner, ChannelState::Detached, Some(reason), false, true, effects);
            }
        });
    }

    pub(crate) fn on_connection_suspended(
        &self,
        reason: ErrorInfo,
        notify: bool,
    ) {
        self.transact(|inner, effects| match inner.state {
            ChannelState::Attaching if inner.pending_detach => {
                inner.timers.cancel_all();
                self.set_state(inner, ChannelState::Detached, Some(reason), false, notify, effects);
            }
            ChannelState::Attached | ChannelState::Attaching => {
                inner.timers.cancel(TimerKind::Attach);
                inner.timers.cancel(TimerKind::Reattach);
                self.set_state(inner, ChannelState::Suspended, Some(reason), false, notify, effects);
            }
            ChannelState::Detaching => {
                inner.timers.cancel(TimerKind::Detach);
                self.set_state(inner, ChannelState::Detached, Some(reason), false, notify, effects);
            }
            _ => {}
        });
    }

    pub(crate) fn on_connection_reconnected(&self) {
        self.transact(|inner, effects| {
            if matches!(
                inner.state,
                ChannelState::Attaching | ChannelState::Attached | ChannelState::Suspended
            ) {
                debug!(channel = %self.name, state = %inner.state, "connection reconnected; reattaching");
                self.start_attach(inner, None, effects);
            }
        });
    }

    pub(crate) fn set_reinitialized(&self) {
        self.transact(|inner, effects| {
            inner.timers.cancel_all();
            inner.pending_attach = false;
            inner.pending_detach = false;

            let cause = ErrorInfo::invalid_state(ChannelState::Initialized, "complete operation");
            effects.completions.extend(self.message_queue.fail_all(&cause));
            effects.completions.extend(self.presence_queue.fail_all(&cause));
            for waiter in inner.attach_waiters.drain(..).chain(inner.detach_waiters.drain(..)) {
                effects.completions.fail(waiter, cause.clone());
            }
            inner.presence.members.clear();
            inner.properties = ChannelProperties::default();
            self.set_state(inner, ChannelState::Initialized, None, false, true, effects);
        });
    }

    /// Detaches locally, cancels timers and ignores further inbound traffic.
    pub(crate) fn release(&self) {
        self.transact(|inner, effects| {
            if matches!(
                inner.state,
                ChannelState::Attached | ChannelState::Attaching | ChannelState::Suspended | ChannelState::Detaching
            ) {
                self.send_detach();
            }
            inner.timers.cancel_all();
            if inner.state != ChannelState::Detached {
                self.set_state(inner, ChannelState::Detached, None, false, true, effects);
            }
            inner.released = true;
        });
    }
}
