//! Fixtures shared by the unit tests: a transport that records what it is
//! asked to send, a canned history collaborator and envelope builders.
mod builders;
mod history;
mod transport;

pub use builders::*;
pub use history::*;
pub use transport::*;
