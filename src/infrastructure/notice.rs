use crate::application::ports::NoticeSink;
use crate::domain::entities::UserNotice;
use tokio::sync::broadcast;
use tracing::debug;

const DEFAULT_CAPACITY: usize = 64;

/// Fans user notices out to every interested view.
#[derive(Clone)]
pub struct BroadcastNoticeSink {
    sender: broadcast::Sender<UserNotice>,
}

impl BroadcastNoticeSink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UserNotice> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNoticeSink {
    fn default() -> Self {
        Self::new()
    }
}

impl NoticeSink for BroadcastNoticeSink {
    fn notify(&self, notice: UserNotice) {
        if self.sender.send(notice).is_err() {
            debug!("Notice dropped: no subscribers");
        }
    }
}
