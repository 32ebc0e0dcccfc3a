use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_ATTACH_TIMEOUT_MS;
use crate::constants::DEFAULT_DETACH_TIMEOUT_MS;
use crate::Error;
use crate::Result;

/// Channel lifecycle settings shared by every channel of a client
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChannelConfig {
    /// Deadline for ATTACHED after an ATTACH was sent; exceeding it suspends the channel
    #[serde(default = "default_attach_timeout_ms")]
    pub attach_timeout_ms: u64,

    /// Deadline for DETACHED after a DETACH was sent; exceeding it reverts the state
    #[serde(default = "default_detach_timeout_ms")]
    pub detach_timeout_ms: u64,

    /// Implicitly attach when a listener subscribes to an unattached channel
    #[serde(default = "default_true")]
    pub attach_on_subscribe: bool,

    /// Ask the transport to queue outbound envelopes while disconnected
    #[serde(default = "default_true")]
    pub queue_messages: bool,

    /// Assign `baseId:index` ids to published messages lacking one
    #[serde(default)]
    pub idempotent_publishing: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            attach_timeout_ms: default_attach_timeout_ms(),
            detach_timeout_ms: default_detach_timeout_ms(),
            attach_on_subscribe: true,
            queue_messages: true,
            idempotent_publishing: false,
        }
    }
}

impl ChannelConfig {
    pub fn attach_timeout(&self) -> Duration {
        Duration::from_millis(self.attach_timeout_ms)
    }

    pub fn detach_timeout(&self) -> Duration {
        Duration::from_millis(self.detach_timeout_ms)
    }

    pub(super) fn validate(&self) -> Result<()> {
        if self.attach_timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "attach_timeout_ms must be greater than 0".into(),
            )));
        }

        if self.detach_timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "detach_timeout_ms must be greater than 0".into(),
            )));
        }

        Ok(())
    }
}

fn default_attach_timeout_ms() -> u64 {
    DEFAULT_ATTACH_TIMEOUT_MS
}
fn default_detach_timeout_ms() -> u64 {
    DEFAULT_DETACH_TIMEOUT_MS
}
fn default_true() -> bool {
    true
}
