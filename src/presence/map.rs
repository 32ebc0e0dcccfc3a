use std::collections::HashMap;
use std::collections::HashSet;

use tracing::debug;
use tracing::trace;

use crate::metrics::PRESENCE_SYNCS_COMPLETED;
use crate::metrics::PRESENCE_SYNTHESIZED_LEAVES;
use crate::proto::PresenceAction;
use crate::proto::PresenceMessage;
use crate::utils::time::now_millis;

/// How records are keyed in a [`PresenceMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKeying {
    /// `connectionId:clientId`, for the authoritative member set
    Member,
    /// `clientId` only, for the members entered through this connection
    ClientId,
}

/// One channel's member set, reconciled by the newness rule.
#[derive(Debug)]
pub struct PresenceMap {
    keying: MemberKeying,
    members: HashMap<String, PresenceMessage>,
    /// Members not yet reconfirmed by the sync in progress; `None` outside a sync
    residual: Option<HashSet<String>>,
    sync_complete: bool,
}

impl PresenceMap {
    pub fn new(keying: MemberKeying) -> Self {
        Self {
            keying,
            members: HashMap::new(),
            residual: None,
            sync_complete: false,
        }
    }

    pub fn key_of(
        &self,
        msg: &PresenceMessage,
    ) -> String {
        match self.keying {
            MemberKeying::Member => msg.member_key(),
            MemberKeying::ClientId => msg.client_id.clone().unwrap_or_default(),
        }
    }

    /// Stores `msg` unless the stored record for its key is at least as new.
    /// Returns whether the map changed.
    pub fn put(
        &mut self,
        msg: PresenceMessage,
    ) -> bool {
        let key = self.key_of(&msg);
        if let Some(residual) = self.residual.as_mut() {
            residual.remove(&key);
        }

        if let Some(existing) = self.members.get(&key) {
            if !msg.is_newer_than(existing) {
                trace!(key = %key, id = ?msg.id, "discarding stale presence update");
                return false;
            }
        }

        let mut stored = msg;
        if matches!(stored.action, PresenceAction::Enter | PresenceAction::Update) {
            stored.action = PresenceAction::Present;
        }
        self.members.insert(key, stored);
        true
    }

    /// Removes the member `msg` refers to, unless the stored record is newer.
    ///
    /// During a sync the member is replaced by an `absent` witness so that a
    /// stale `present` delivered later in the sync cannot resurrect it.
    /// Outside a sync the entry is dropped, so ordering against older records
    /// is only guaranteed while a sync is in progress; the next sync repairs
    /// a member resurrected by a late record.
    pub fn remove(
        &mut self,
        msg: &PresenceMessage,
    ) -> bool {
        let key = self.key_of(msg);
        let existing = self.members.get(&key);
        if let Some(existing) = existing {
            if !msg.is_newer_than(existing) {
                trace!(key = %key, id = ?msg.id, "discarding stale presence leave");
                return false;
            }
        }
        let changed = existing.map(|e| e.action != PresenceAction::Absent).unwrap_or(true);

        if self.residual.is_some() {
            let mut witness = msg.clone();
            witness.action = PresenceAction::Absent;
            self.members.insert(key, witness);
        } else {
            self.members.remove(&key);
        }
        changed
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<&PresenceMessage> {
        self.members.get(key).filter(|m| m.action != PresenceAction::Absent)
    }

    /// Snapshot of the present members.
    pub fn values(&self) -> Vec<PresenceMessage> {
        self.members
            .values()
            .filter(|m| m.action != PresenceAction::Absent)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.members.values().filter(|m| m.action != PresenceAction::Absent).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn start_sync(&mut self) {
        if self.residual.is_none() {
            debug!(members = self.members.len(), "presence sync started");
            self.residual = Some(self.members.keys().cloned().collect());
        }
        self.sync_complete = false;
    }

    /// Finishes the sync in progress and returns a synthesized `leave` for
    /// every member it did not reconfirm. Those members are removed.
    pub fn end_sync(&mut self) -> Vec<PresenceMessage> {
        self.members.retain(|_, m| m.action != PresenceAction::Absent);

        let mut leaves = Vec::new();
        if let Some(residual) = self.residual.take() {
            let now = now_millis();
            for key in residual {
                if let Some(mut member) = self.members.remove(&key) {
                    member.action = PresenceAction::Leave;
                    member.id = None;
                    member.timestamp = now;
                    leaves.push(member);
                }
            }
        }

        self.sync_complete = true;
        PRESENCE_SYNCS_COMPLETED.inc();
        PRESENCE_SYNTHESIZED_LEAVES.inc_by(leaves.len() as u64);
        debug!(members = self.members.len(), leaves = leaves.len(), "presence sync ended");
        leaves
    }

    pub fn sync_in_progress(&self) -> bool {
        self.residual.is_some()
    }

    pub fn sync_complete(&self) -> bool {
        self.sync_complete
    }

    pub fn clear(&mut self) {
        self.members.clear();
        self.residual = None;
    }
}
