// -
// Error codes

/// Generic bad request.
pub const BAD_REQUEST: u32 = 40000;
/// The delta decoder could not reconstruct a payload; the channel must reattach.
pub const UNRECOVERABLE_DELTA_DECODE: u32 = 40018;
/// Internal engine failure.
pub const INTERNAL_ERROR: u32 = 50000;

/// Connection entered `failed`.
pub const CONNECTION_FAILED: u32 = 80000;
/// Connection entered `suspended`.
pub const CONNECTION_SUSPENDED: u32 = 80002;
/// Connection was closed.
pub const CONNECTION_CLOSED: u32 = 80017;

/// Operation is not allowed in the channel's current state.
pub const INVALID_CHANNEL_STATE: u32 = 90001;
/// Attach or detach did not complete within its deadline.
pub const CHANNEL_OPERATION_TIMEOUT: u32 = 90007;

/// Presence operation without a client id.
pub const PRESENCE_NEEDS_CLIENT_ID: u32 = 91000;
/// Presence operation in an incompatible channel state.
pub const PRESENCE_INVALID_STATE: u32 = 91001;
/// Automatic re-enter of a local member after a non-resumed attach failed.
pub const PRESENCE_REENTER_FAILED: u32 = 91004;
/// Presence set cannot be trusted (channel suspended).
pub const PRESENCE_OUT_OF_SYNC: u32 = 91005;

// -
// HTTP-ish status codes carried alongside error codes

pub(crate) const STATUS_BAD_REQUEST: u16 = 400;
pub(crate) const STATUS_INTERNAL: u16 = 500;
pub(crate) const STATUS_TIMEOUT: u16 = 504;

// -
// History collaborator

/// Accept headers supplied with every history query.
pub const HISTORY_ACCEPT_HEADERS: &[(&str, &str)] = &[("Accept", "application/json")];

/// Base resource of every channel on the REST side.
pub(crate) const CHANNELS_RESOURCE: &str = "/channels";

// -
// Defaults

pub(crate) const DEFAULT_ATTACH_TIMEOUT_MS: u64 = 10_000;
pub(crate) const DEFAULT_DETACH_TIMEOUT_MS: u64 = 10_000;
pub(crate) const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 15_000;
pub(crate) const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 60_000;
pub(crate) const DEFAULT_RETRY_JITTER: f64 = 0.2;
