use tracing::debug;
use tracing::trace;

use super::map::MemberKeying;
use super::map::PresenceMap;
use crate::proto::PresenceAction;
use crate::proto::PresenceMessage;

/// Outcome of a finished sync sequence.
#[derive(Debug, Default)]
pub(crate) struct SyncOutcome {
    /// Synthesized leaves to broadcast
    pub(crate) leaves: Vec<PresenceMessage>,
    /// Own members to enter again because the server lost them
    pub(crate) reenter: Vec<PresenceMessage>,
}

/// Presence bookkeeping guarded by the channel lock.
#[derive(Debug)]
pub(crate) struct PresenceState {
    pub(crate) members: PresenceMap,
    /// Members entered through this connection, keyed by client id
    pub(crate) internal: PresenceMap,
    /// Set by a non-resumed attach; consumed when its sync ends
    reenter_pending: bool,
}

impl Default for PresenceState {
    fn default() -> Self {
        Self {
            members: PresenceMap::new(MemberKeying::Member),
            internal: PresenceMap::new(MemberKeying::ClientId),
            reenter_pending: false,
        }
    }
}

impl PresenceState {
    /// Starts the post-attach sync. Without server-side presence the sync
    /// ends at once and every known member leaves.
    pub(crate) fn on_attached(
        &mut self,
        has_presence: bool,
        resumed: bool,
        own_connection: Option<&str>,
    ) -> Option<SyncOutcome> {
        self.reenter_pending = !resumed;
        self.members.start_sync();
        if has_presence {
            None
        } else {
            Some(self.end_sync(own_connection))
        }
    }

    /// Applies inbound presence records and returns those to broadcast.
    pub(crate) fn apply(
        &mut self,
        records: Vec<PresenceMessage>,
        is_sync: bool,
        own_connection: Option<&str>,
    ) -> Vec<PresenceMessage> {
        if is_sync && !self.members.sync_in_progress() {
            self.members.start_sync();
        }

        let mut broadcast = Vec::with_capacity(records.len());
        for record in records {
            let own = own_connection.is_some() && record.connection_id.as_deref() == own_connection;
            match record.action {
                PresenceAction::Enter | PresenceAction::Update | PresenceAction::Present => {
                    if own {
                        self.internal.put(record.clone());
                    }
                    if self.members.put(record.clone()) {
                        broadcast.push(record);
                    }
                }
                PresenceAction::Leave => {
                    if own && !record.is_synthesized() {
                        self.internal.remove(&record);
                    }
                    if self.members.remove(&record) {
                        broadcast.push(record);
                    }
                }
                PresenceAction::Absent => {
                    trace!(id = ?record.id, "ignoring inbound absent record");
                }
            }
        }
        broadcast
    }

    pub(crate) fn end_sync(
        &mut self,
        own_connection: Option<&str>,
    ) -> SyncOutcome {
        let leaves = self.members.end_sync();
        let reenter = if std::mem::take(&mut self.reenter_pending) {
            self.missing_own_members(own_connection)
        } else {
            Vec::new()
        };
        SyncOutcome { leaves, reenter }
    }

    /// Own members absent from the authoritative set, as fresh `enter` records.
    fn missing_own_members(
        &self,
        own_connection: Option<&str>,
    ) -> Vec<PresenceMessage> {
        let Some(connection_id) = own_connection else {
            debug!("no connection id; skipping presence re-enter");
            return Vec::new();
        };

        self.internal
            .values()
            .into_iter()
            .filter_map(|member| {
                let client_id = member.client_id.clone()?;
                let key = format!("{connection_id}:{client_id}");
                if self.members.get(&key).is_some() {
                    return None;
                }
                let mut enter = PresenceMessage::new(PresenceAction::Enter, client_id);
                enter.data = member.data.clone();
                enter.encoding = member.encoding.clone();
                Some(enter)
            })
            .collect()
    }

    pub(crate) fn sync_complete(&self) -> bool {
        self.members.sync_complete()
    }

    /// Forgets every member, authoritative and own.
    pub(crate) fn reset(&mut self) {
        self.members.clear();
        self.internal.clear();
        self.reenter_pending = false;
    }
}
