use std::time::Duration;

use config::ConfigError;
use rand::Rng;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_RETRY_BASE_DELAY_MS;
use crate::constants::DEFAULT_RETRY_JITTER;
use crate::constants::DEFAULT_RETRY_MAX_DELAY_MS;
use crate::Error;
use crate::Result;

/// Reattach backoff used while a channel keeps cycling through `suspended`
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Fraction of the delay that may be randomly shaved off, in `[0, 1)`
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl BackoffPolicy {
    /// Delay before reattach attempt `attempt` (1-based; 0 is treated as 1).
    ///
    /// The multiplier grows as `(attempt + 2) / 3` and saturates at 2, so the
    /// first retries come quickly and later ones settle at twice the base.
    pub fn delay_for_attempt(
        &self,
        attempt: u32,
    ) -> Duration {
        let attempt = attempt.max(1) as f64;
        let multiplier = ((attempt + 2.0) / 3.0).min(2.0);
        let mut delay = self.base_delay_ms as f64 * multiplier;

        if self.jitter > 0.0 {
            let factor = 1.0 - rand::thread_rng().gen_range(0.0..self.jitter);
            delay *= factor;
        }

        let bounded = (delay.round() as u64).min(self.max_delay_ms);
        Duration::from_millis(bounded)
    }

    pub(super) fn validate(&self) -> Result<()> {
        if self.base_delay_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "retry.base_delay_ms must be greater than 0".into(),
            )));
        }

        if self.max_delay_ms < self.base_delay_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "retry.max_delay_ms ({}) must be >= retry.base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            ))));
        }

        if !(0.0..1.0).contains(&self.jitter) {
            return Err(Error::Config(ConfigError::Message(
                "retry.jitter must be within [0, 1)".into(),
            )));
        }

        Ok(())
    }
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_RETRY_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_RETRY_MAX_DELAY_MS
}
fn default_jitter() -> f64 {
    DEFAULT_RETRY_JITTER
}
