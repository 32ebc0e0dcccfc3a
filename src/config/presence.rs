use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PresenceConfig {
    /// Whether `Presence::get` waits for an in-flight sync unless told otherwise
    #[serde(default = "default_wait_for_sync")]
    pub wait_for_sync: bool,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            wait_for_sync: default_wait_for_sync(),
        }
    }
}

fn default_wait_for_sync() -> bool {
    true
}
