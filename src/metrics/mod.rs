use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use tracing::error;


lazy_static! {
    pub static ref CHANNEL_STATE_TRANSITIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("channel_state_transitions", "Channel state transitions by target state"),
        &["state"]
    )
    .expect("metric can not be created");

    pub static ref PENDING_OPERATIONS_SENT: IntCounterVec = IntCounterVec::new(
        Opts::new("pending_operations_sent", "Queued operations replayed to the transport"),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref PENDING_OPERATIONS_FAILED: IntCounterVec = IntCounterVec::new(
        Opts::new("pending_operations_failed", "Queued operations failed before being sent"),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref PRESENCE_SYNCS_COMPLETED: IntCounter = IntCounter::new(
        "presence_syncs_completed",
        "Presence sync sequences completed"
    )
    .expect("metric can not be created");

    pub static ref PRESENCE_SYNTHESIZED_LEAVES: IntCounter = IntCounter::new(
        "presence_synthesized_leaves",
        "Leave events synthesized for members not reconfirmed by a sync"
    )
    .expect("metric can not be created");

    pub static ref CHANNEL_REATTACH_ATTEMPTS: IntCounter = IntCounter::new(
        "channel_reattach_attempts",
        "Reattach attempts started from the suspended state"
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER: Once = Once::new();

/// Registers every collector with `registry`.
pub fn register_custom_metrics(registry: &Registry) {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(CHANNEL_STATE_TRANSITIONS.clone()),
        Box::new(PENDING_OPERATIONS_SENT.clone()),
        Box::new(PENDING_OPERATIONS_FAILED.clone()),
        Box::new(PRESENCE_SYNCS_COMPLETED.clone()),
        Box::new(PRESENCE_SYNTHESIZED_LEAVES.clone()),
        Box::new(CHANNEL_REATTACH_ATTEMPTS.clone()),
    ];
    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            error!("collector can not be registered: {:?}", e);
        }
    }
}

/// Text exposition of the crate registry, for hosts that serve `/metrics`.
pub fn gather_metrics() -> String {
    REGISTER.call_once(|| register_custom_metrics(&REGISTRY));

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    }
    match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            error!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}
