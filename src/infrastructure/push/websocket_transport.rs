use crate::application::ports::PushTransport;
use crate::domain::entities::PushSignal;
use crate::domain::value_objects::EntityId;
use crate::infrastructure::push::frame::{decode_frame, OutboundFrame};
use crate::shared::config::PushConfig;
use crate::shared::error::SyncError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::{Mutex, MutexGuard};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SIGNAL_BUFFER: usize = 256;

enum SessionEnd {
    Lost(String),
    Shutdown,
    ReceiverGone,
}

#[derive(Default)]
struct TransportState {
    outbound: Option<mpsc::UnboundedSender<OutboundFrame>>,
    task: Option<JoinHandle<()>>,
}

/// WebSocket push transport with bounded automatic reconnection.
pub struct WebSocketPushTransport {
    config: PushConfig,
    state: Mutex<TransportState>,
}

impl WebSocketPushTransport {
    pub fn new(config: PushConfig) -> Self {
        Self {
            config,
            state: Mutex::new(TransportState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn send_frame(&self, frame: OutboundFrame) -> Result<(), SyncError> {
        let state = self.state();
        let sender = state
            .outbound
            .as_ref()
            .ok_or_else(|| SyncError::Transport("push transport is not connected".to_string()))?;
        sender
            .send(frame)
            .map_err(|_| SyncError::Transport("push connection task has stopped".to_string()))
    }
}

#[async_trait]
impl PushTransport for WebSocketPushTransport {
    async fn connect(&self) -> Result<mpsc::Receiver<PushSignal>, SyncError> {
        if self.config.url.trim().is_empty() {
            return Err(SyncError::Configuration("push.url is empty".to_string()));
        }

        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_BUFFER);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_connection(self.config.clone(), signal_tx, outbound_rx));

        let mut state = self.state();
        if let Some(previous) = state.task.replace(task) {
            previous.abort();
        }
        state.outbound = Some(outbound_tx);
        Ok(signal_rx)
    }

    async fn join_project(&self, project_id: &EntityId) -> Result<(), SyncError> {
        self.send_frame(OutboundFrame::JoinProject(project_id.clone()))
    }

    async fn leave_project(&self, project_id: &EntityId) -> Result<(), SyncError> {
        self.send_frame(OutboundFrame::LeaveProject(project_id.clone()))
    }

    async fn disconnect(&self) -> Result<(), SyncError> {
        let task = {
            let mut state = self.state();
            // 送信側を閉じると接続タスクがCloseフレームを送って終了する
            state.outbound = None;
            state.task.take()
        };
        if let Some(task) = task {
            let abort = task.abort_handle();
            if tokio::time::timeout(self.config.reconnect_delay(), task)
                .await
                .is_err()
            {
                debug!("Push connection task did not stop in time, aborting");
                abort.abort();
            }
        }
        Ok(())
    }
}

impl Drop for WebSocketPushTransport {
    fn drop(&mut self) {
        if let Some(task) = self.state().task.take() {
            task.abort();
        }
    }
}

async fn run_connection(
    config: PushConfig,
    signals: mpsc::Sender<PushSignal>,
    mut outbound: mpsc::UnboundedReceiver<OutboundFrame>,
) {
    let mut failures: u32 = 0;

    loop {
        match tokio_tungstenite::connect_async(config.url.as_str()).await {
            Ok((stream, _)) => {
                failures = 0;
                info!("Push transport connected to {}", config.url);
                // 切断中に溜まった入退室はConnected後に張り直される
                while outbound.try_recv().is_ok() {}
                if signals.send(PushSignal::Connected).await.is_err() {
                    return;
                }

                match pump(stream, &signals, &mut outbound).await {
                    SessionEnd::Lost(reason) => {
                        warn!("Push connection lost: {}", reason);
                        if signals
                            .send(PushSignal::Disconnected { reason })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    SessionEnd::Shutdown => {
                        let _ = signals
                            .send(PushSignal::Disconnected {
                                reason: "client disconnect".to_string(),
                            })
                            .await;
                        return;
                    }
                    SessionEnd::ReceiverGone => return,
                }
            }
            Err(err) => {
                failures += 1;
                warn!(
                    "Push connection attempt {}/{} failed: {}",
                    failures, config.reconnect_attempts, err
                );
                if failures >= config.reconnect_attempts {
                    let _ = signals
                        .send(PushSignal::Disconnected {
                            reason: format!("gave up after {failures} failed attempts"),
                        })
                        .await;
                    return;
                }
            }
        }

        if outbound.is_closed() {
            return;
        }
        tokio::time::sleep(config.reconnect_delay()).await;
    }
}

async fn pump(
    stream: WsStream,
    signals: &mpsc::Sender<PushSignal>,
    outbound: &mut mpsc::UnboundedReceiver<OutboundFrame>,
) -> SessionEnd {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => match decode_frame(&text) {
                    Ok(event) => {
                        if signals.send(PushSignal::Event(event)).await.is_err() {
                            return SessionEnd::ReceiverGone;
                        }
                    }
                    Err(err) => warn!("Ignoring push frame: {}", err),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|frame| frame.reason.as_str().to_string())
                        .filter(|reason| !reason.is_empty())
                        .unwrap_or_else(|| "closed by server".to_string());
                    return SessionEnd::Lost(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return SessionEnd::Lost(err.to_string()),
                None => return SessionEnd::Lost("stream ended".to_string()),
            },
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    debug!("Sending {} frame", frame.event_name());
                    if let Err(err) = write.send(Message::Text(frame.encode().into())).await {
                        return SessionEnd::Lost(err.to_string());
                    }
                }
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
            },
        }
    }
}
