pub mod frame;
pub mod websocket_transport;

pub use frame::{decode_frame, OutboundFrame};
pub use websocket_transport::WebSocketPushTransport;
