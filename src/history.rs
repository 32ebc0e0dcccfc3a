//! Paginated history query collaborator.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::proto::Message;
use crate::proto::PresenceMessage;
use crate::ErrorInfo;

/// Resource query handed to the history collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub params: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forwards,
    Backwards,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryParams {
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub direction: Option<Direction>,
    pub limit: Option<u32>,
    /// Only return records up to the point the channel attached
    pub until_attach: bool,
}

impl HistoryParams {
    pub(crate) fn to_query(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(start) = self.start {
            params.push(("start".to_string(), start.to_string()));
        }
        if let Some(end) = self.end {
            params.push(("end".to_string(), end.to_string()));
        }
        if let Some(direction) = self.direction {
            let value = match direction {
                Direction::Forwards => "forwards",
                Direction::Backwards => "backwards",
            };
            params.push(("direction".to_string(), value.to_string()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }
}

/// One page of a paginated result.
#[async_trait]
pub trait Page<T>: Send + Sync {
    fn items(&self) -> &[T];

    fn has_next(&self) -> bool;

    /// Fetches the following page, `None` past the last one.
    async fn next(&self) -> std::result::Result<Option<Box<dyn Page<T>>>, ErrorInfo>;
}

pub type MessagePage = Box<dyn Page<Message>>;
pub type PresencePage = Box<dyn Page<PresenceMessage>>;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait HistoryClient: Send + Sync + 'static {
    async fn messages(
        &self,
        request: HistoryRequest,
    ) -> std::result::Result<MessagePage, ErrorInfo>;

    async fn presence(
        &self,
        request: HistoryRequest,
    ) -> std::result::Result<PresencePage, ErrorInfo>;
}
