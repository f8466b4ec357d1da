use crate::domain::entities::UserNotice;

/// Receives user-visible notices (success confirmations, retryable failures).
pub trait NoticeSink: Send + Sync {
    fn notify(&self, notice: UserNotice);
}
