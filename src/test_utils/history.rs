use async_trait::async_trait;
use parking_lot::Mutex;

use crate::history::HistoryClient;
use crate::history::HistoryRequest;
use crate::history::MessagePage;
use crate::history::Page;
use crate::history::PresencePage;
use crate::proto::Message;
use crate::proto::PresenceMessage;
use crate::ErrorInfo;

/// Single page backed by a vector.
pub struct VecPage<T> {
    pub items: Vec<T>,
}

#[async_trait]
impl<T> Page<T> for VecPage<T>
where
    T: Send + Sync + 'static,
{
    fn items(&self) -> &[T] {
        &self.items
    }

    fn has_next(&self) -> bool {
        false
    }

    async fn next(&self) -> std::result::Result<Option<Box<dyn Page<T>>>, ErrorInfo> {
        Ok(None)
    }
}

/// History collaborator answering every query with fixed records and
/// remembering the requests it saw.
#[derive(Default)]
pub struct RecordingHistory {
    pub requests: Mutex<Vec<HistoryRequest>>,
    pub messages: Vec<Message>,
    pub presence: Vec<PresenceMessage>,
}

#[async_trait]
impl HistoryClient for RecordingHistory {
    async fn messages(
        &self,
        request: HistoryRequest,
    ) -> std::result::Result<MessagePage, ErrorInfo> {
        self.requests.lock().push(request);
        Ok(Box::new(VecPage {
            items: self.messages.clone(),
        }))
    }

    async fn presence(
        &self,
        request: HistoryRequest,
    ) -> std::result::Result<PresencePage, ErrorInfo> {
        self.requests.lock().push(request);
        Ok(Box::new(VecPage {
            items: self.presence.clone(),
        }))
    }
}
