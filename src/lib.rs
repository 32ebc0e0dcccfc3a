//! Client-side channel lifecycle and presence consistency engine for a
//! realtime publish/subscribe service.
//!
//! The engine sits between an application and a connection it does not
//! own. Callers attach, publish and enter presence through [`Channel`] and
//! [`Presence`]; the connection owner feeds inbound envelopes and connection
//! state into [`Channels`]. The engine keeps per-channel state, queues work
//! issued before a channel can send, and reconciles the presence member set
//! with the server.

mod channel;
mod channels;
mod codec;
mod config;
pub mod constants;
mod errors;
mod history;
mod metrics;
mod observer;
mod presence;
pub mod proto;
mod queue;
mod transport;
pub(crate) mod utils;

pub use channel::*;
pub use channels::*;
pub use codec::*;
pub use config::*;
pub use errors::*;
pub use history::*;
pub use metrics::*;
pub use observer::*;
pub use presence::*;
pub use queue::*;
pub use transport::*;

#[cfg(test)]
mod errors_test;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
