use crate::store::{ChangeFeed, FeedId};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// One live change-feed registration and the task draining it.
///
/// Retiring aborts the listener and unsubscribes exactly once; dropping the
/// handle retires it.
pub struct SubscriptionHandle {
    id: FeedId,
    feed: Arc<dyn ChangeFeed>,
    listener: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: FeedId, feed: Arc<dyn ChangeFeed>, listener: JoinHandle<()>) -> Self {
        Self {
            id,
            feed,
            listener: Some(listener),
        }
    }

    pub fn id(&self) -> FeedId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.listener.is_some()
    }

    /// Returns `false` when the handle was already retired.
    pub fn retire(&mut self) -> bool {
        let Some(listener) = self.listener.take() else {
            return false;
        };
        listener.abort();
        self.feed.unsubscribe(self.id);
        true
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.retire();
    }
}
