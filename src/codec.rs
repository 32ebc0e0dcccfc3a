//! Payload codec collaborator (encoding chains, encryption, delta compression).

#[cfg(test)]
use mockall::automock;

use crate::proto::Payload;
use crate::ErrorInfo;

/// Payload body together with its remaining encoding chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Encoded {
    pub data: Option<Payload>,
    pub encoding: Option<String>,
}

impl Encoded {
    pub fn new(
        data: Option<Payload>,
        encoding: Option<String>,
    ) -> Self {
        Self { data, encoding }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    /// The record can still be delivered with its undecoded payload
    #[error("decode failed: {0}")]
    Recoverable(ErrorInfo),

    /// Delta base is missing or corrupt; the channel must reattach to recover
    #[error("unrecoverable delta decode failure: {0}")]
    UnrecoverableDelta(ErrorInfo),
}

#[cfg_attr(test, automock)]
pub trait Codec: Send + Sync + 'static {
    /// Decodes one inbound record's payload. `channel` scopes delta state.
    fn decode(
        &self,
        channel: &str,
        payload: Encoded,
    ) -> std::result::Result<Encoded, DecodeError>;

    /// Encodes one outbound record's payload.
    fn encode(
        &self,
        channel: &str,
        payload: Encoded,
    ) -> std::result::Result<Encoded, ErrorInfo>;
}

/// Leaves payloads untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughCodec;

impl Codec for PassthroughCodec {
    fn decode(
        &self,
        _channel: &str,
        payload: Encoded,
    ) -> std::result::Result<Encoded, DecodeError> {
        Ok(payload)
    }

    fn encode(
        &self,
        _channel: &str,
        payload: Encoded,
    ) -> std::result::Result<Encoded, ErrorInfo> {
        Ok(payload)
    }
}
