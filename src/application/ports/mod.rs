pub mod notice_sink;
pub mod push_transport;
pub mod remote_api;

pub use notice_sink::NoticeSink;
pub use push_transport::PushTransport;
pub use remote_api::{RemoteApi, RemoteResult};
