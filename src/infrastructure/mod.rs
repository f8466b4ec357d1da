pub mod http;
pub mod metrics;
pub mod notice;
pub mod push;

pub use http::HttpRemoteApi;
pub use metrics::{MutationOutcomeStatus, SyncMetrics, SyncMetricsSnapshot};
pub use notice::BroadcastNoticeSink;
pub use push::WebSocketPushTransport;
