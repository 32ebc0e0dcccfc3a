use std::cmp::Ordering;

use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use super::Payload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceAction {
    Absent,
    Present,
    Enter,
    Leave,
    Update,
}

/// One member's presence contribution from one connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceMessage {
    pub action: PresenceAction,
    /// `connectionId:msgSerial:index` for server-assigned ids
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

impl PresenceMessage {
    pub fn new(
        action: PresenceAction,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            action,
            id: None,
            client_id: Some(client_id.into()),
            connection_id: None,
            timestamp: 0,
            data: None,
            encoding: None,
        }
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
        self.timestamp = timestamp;
        self
    }

    pub fn with_data(
        mut self,
        data: impl Into<Payload>,
    ) -> Self {
        self.data = Some(data.into());
        self
    }

    /// `connectionId:clientId`
    pub fn member_key(&self) -> String {
        format!(
            "{}:{}",
            self.connection_id.as_deref().unwrap_or_default(),
            self.client_id.as_deref().unwrap_or_default()
        )
    }

    /// Synthesized records (implicit leaves) carry ids that are not prefixed
    /// with their own connection id, or no id at all.
    pub fn is_synthesized(&self) -> bool {
        match (&self.id, &self.connection_id) {
            (Some(id), Some(connection_id)) => !id.starts_with(connection_id.as_str()),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }

    /// Returns true if `self` supersedes `existing` for the same member key.
    ///
    /// Ties are not newer.
    pub fn is_newer_than(
        &self,
        existing: &PresenceMessage,
    ) -> bool {
        if self.is_synthesized() || existing.is_synthesized() {
            return self.timestamp > existing.timestamp;
        }

        match (self.serial_and_index(), existing.serial_and_index()) {
            (Some(incoming), Some(stored)) => incoming.cmp(&stored) == Ordering::Greater,
            _ => {
                warn!(
                    incoming = ?self.id,
                    stored = ?existing.id,
                    "presence ids not parseable, comparing by timestamp"
                );
                self.timestamp > existing.timestamp
            }
        }
    }

    /// Parses `(msgSerial, index)` from the tail of the id.
    fn serial_and_index(&self) -> Option<(u64, u64)> {
        let id = self.id.as_deref()?;
        let mut parts = id.rsplitn(3, ':');
        let index = parts.next()?.parse::<u64>().ok()?;
        let serial = parts.next()?.parse::<u64>().ok()?;
        parts.next()?;
        Some((serial, index))
    }
}
