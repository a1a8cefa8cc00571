use async_trait::async_trait;
use common::model::{FetchTask, TaskAnnouncement, TaskAssignment, TaskResult, WireMessage};
use errors::{NodeError, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, timeout, Duration};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const WRITE_WAIT: Duration = Duration::from_secs(10);
const PONG_WAIT: Duration = Duration::from_secs(60);
const PING_PERIOD: Duration = Duration::from_secs(54);
const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);
const MAX_BACKOFF_SHIFT: u32 = 4;
const SEND_BUFFER_SIZE: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Callbacks for inbound server frames and connection lifecycle.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_task_announcement(&self, ann: TaskAnnouncement);
    async fn on_task_assigned(&self, task: TaskAssignment);
    async fn on_task_gone(&self, trace_id: String);
    fn on_connected(&self);
    fn on_disconnected(&self);
}

struct ClientState {
    send: Option<mpsc::Sender<String>>,
    conn_shutdown: Option<broadcast::Sender<()>>,
    reconnect_cancel: Option<broadcast::Sender<()>>,
    connected: bool,
    reconnect_attempts: u32,
    /// Bumped on every (re)connect so pumps of a dead connection cannot
    /// tear down a newer one.
    generation: u64,
}

/// WebSocket client with automatic exponential-backoff reconnection.
///
/// A dropped connection schedules a reconnect loop unless the client was
/// closed; a manual [`WsClient::reconnect`] cancels any pending loop and
/// redials immediately.
pub struct WsClient {
    server_url: String,
    node_id: String,
    auth_token: String,
    handler: OnceLock<Arc<dyn MessageHandler>>,
    state: Mutex<ClientState>,
    closed: AtomicBool,
}

impl WsClient {
    pub fn new(server_url: &str, node_id: &str, signature: &str) -> Self {
        WsClient {
            server_url: server_url.to_string(),
            node_id: node_id.to_string(),
            auth_token: format!("{node_id}:{signature}"),
            handler: OnceLock::new(),
            state: Mutex::new(ClientState {
                send: None,
                conn_shutdown: None,
                reconnect_cancel: None,
                connected: false,
                reconnect_attempts: 0,
                generation: 0,
            }),
            closed: AtomicBool::new(false),
        }
    }

    /// Must be called once before [`WsClient::connect`].
    pub fn set_handler(&self, handler: Arc<dyn MessageHandler>) {
        let _ = self.handler.set(handler);
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        let mut request = self
            .server_url
            .as_str()
            .into_client_request()
            .map_err(|e| NodeError::Dial(Box::new(e)))?;
        let token = HeaderValue::from_str(&self.auth_token)
            .map_err(|e| NodeError::Dial(Box::new(e)))?;
        request.headers_mut().insert("X-Auth-Token", token);

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| NodeError::Dial(Box::new(e)))?;
        let (sink, stream) = ws_stream.split();
        let (tx, rx) = mpsc::channel::<String>(SEND_BUFFER_SIZE);
        let (conn_shutdown_tx, _) = broadcast::channel::<()>(1);

        let generation = {
            let mut st = self.state.lock().unwrap();
            if let Some(cancel) = st.reconnect_cancel.take() {
                let _ = cancel.send(());
            }
            if let Some(old) = st.conn_shutdown.take() {
                let _ = old.send(());
            }
            st.generation += 1;
            st.send = Some(tx);
            st.conn_shutdown = Some(conn_shutdown_tx.clone());
            st.connected = true;
            st.reconnect_attempts = 0;
            st.generation
        };

        info!("[ws] connected to {}", self.server_url);
        if let Some(handler) = self.handler.get() {
            handler.on_connected();
        }

        tokio::spawn(read_pump(
            self.clone(),
            stream,
            generation,
            conn_shutdown_tx.subscribe(),
        ));
        tokio::spawn(write_pump(
            self.clone(),
            sink,
            rx,
            generation,
            conn_shutdown_tx.subscribe(),
        ));

        Ok(())
    }

    /// Tears down the current connection and dials again right away,
    /// cancelling any backoff in progress.
    pub async fn reconnect(self: &Arc<Self>) -> Result<()> {
        {
            let mut st = self.state.lock().unwrap();
            if let Some(cancel) = st.reconnect_cancel.take() {
                let _ = cancel.send(());
            }
            if let Some(old) = st.conn_shutdown.take() {
                let _ = old.send(());
            }
            st.send = None;
            st.connected = false;
            st.generation += 1;
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        self.connect().await
    }

    /// Permanent shutdown; no reconnection will follow.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut st = self.state.lock().unwrap();
        if let Some(cancel) = st.reconnect_cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(old) = st.conn_shutdown.take() {
            let _ = old.send(());
        }
        st.send = None;
        st.connected = false;
    }

    pub fn send_fetch_task(&self, trace_id: &str) -> Result<()> {
        self.send_message(&WireMessage::FetchTask(FetchTask {
            trace_id: trace_id.to_string(),
            node_id: self.node_id.clone(),
        }))
    }

    pub fn send_task_result(&self, mut result: TaskResult) -> Result<()> {
        result.node_id = self.node_id.clone();
        self.send_message(&WireMessage::TaskResult(result))
    }

    fn send_message(&self, msg: &WireMessage) -> Result<()> {
        let frame =
            serde_json::to_string(msg).map_err(|e| NodeError::Encode(Box::new(e)))?;
        let tx = self
            .state
            .lock()
            .unwrap()
            .send
            .clone()
            .ok_or(NodeError::NotConnected)?;
        tx.try_send(frame)
            .map_err(|_| NodeError::SendBufferFull.into())
    }

    fn handle_disconnect(self: &Arc<Self>, generation: u64) {
        let reconnect_rx = {
            let mut st = self.state.lock().unwrap();
            if st.generation != generation || !st.connected {
                return;
            }
            st.connected = false;
            st.send = None;
            if let Some(old) = st.conn_shutdown.take() {
                let _ = old.send(());
            }
            if self.closed.load(Ordering::SeqCst) {
                None
            } else {
                let (cancel_tx, cancel_rx) = broadcast::channel(1);
                st.reconnect_cancel = Some(cancel_tx);
                Some(cancel_rx)
            }
        };

        info!("[ws] disconnected from server");
        if let Some(handler) = self.handler.get() {
            handler.on_disconnected();
        }

        if let Some(cancel_rx) = reconnect_rx {
            let client = self.clone();
            tokio::spawn(async move {
                client.reconnect_loop(cancel_rx).await;
            });
        }
    }

    async fn reconnect_loop(self: Arc<Self>, mut cancel: broadcast::Receiver<()>) {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return;
            }

            let attempts = {
                let mut st = self.state.lock().unwrap();
                st.reconnect_attempts += 1;
                st.reconnect_attempts
            };
            let delay = reconnect_delay(attempts);
            info!("[ws] reconnecting in {delay:?} (attempt {attempts})...");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.recv() => return,
            }

            match self.connect().await {
                Ok(()) => {
                    info!("[ws] reconnected successfully");
                    return;
                }
                Err(e) => warn!("[ws] reconnect failed: {e}"),
            }
        }
    }

    async fn handle_frame(&self, raw: &str) {
        let msg: WireMessage = match serde_json::from_str(raw) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("[ws] invalid message: {e}");
                return;
            }
        };

        let handler = match self.handler.get() {
            Some(handler) => handler,
            None => return,
        };

        match msg {
            WireMessage::TaskAnnouncement(ann) => handler.on_task_announcement(ann).await,
            WireMessage::TaskAssigned(task) => handler.on_task_assigned(task).await,
            WireMessage::TaskGone(gone) => handler.on_task_gone(gone.trace_id).await,
            other => warn!(
                "[ws] unexpected message type {:?}",
                std::mem::discriminant(&other)
            ),
        }
    }
}

/// `5s * 2^min(attempts-1, 4)`, capped at 60s.
fn reconnect_delay(attempts: u32) -> Duration {
    let shift = attempts.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
    let delay = RECONNECT_INTERVAL * 2u32.pow(shift);
    delay.min(MAX_RECONNECT_DELAY)
}

async fn read_pump(
    client: Arc<WsClient>,
    mut stream: SplitStream<WsStream>,
    generation: u64,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let frame = tokio::select! {
            _ = shutdown.recv() => break,
            frame = timeout(PONG_WAIT, stream.next()) => frame,
        };

        match frame {
            Err(_) => {
                warn!("[ws] server missed the pong deadline");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                error!("[ws] read error: {e}");
                break;
            }
            Ok(Some(Ok(msg))) => match msg {
                Message::Text(text) => client.handle_frame(text.as_str()).await,
                Message::Binary(data) => {
                    if let Ok(text) = std::str::from_utf8(&data) {
                        client.handle_frame(text).await;
                    }
                }
                // Pings are answered by the protocol layer; both reset the
                // deadline by completing the timed read.
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Close(_) => break,
                Message::Frame(_) => {}
            },
        }
    }

    client.handle_disconnect(generation);
}

async fn write_pump(
    client: Arc<WsClient>,
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::Receiver<String>,
    generation: u64,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ping = interval(PING_PERIOD);
    ping.tick().await;

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let frame = match frame {
                    Some(frame) => frame,
                    None => break,
                };
                match timeout(WRITE_WAIT, sink.send(Message::Text(frame.into()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!("[ws] write error: {e}");
                        break;
                    }
                    Err(_) => {
                        error!("[ws] write deadline exceeded");
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                if timeout(WRITE_WAIT, sink.send(Message::Ping(Vec::new().into())))
                    .await
                    .map_or(true, |r| r.is_err())
                {
                    break;
                }
            }
            _ = shutdown.recv() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }

    client.handle_disconnect(generation);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps_at_sixty_seconds() {
        assert_eq!(reconnect_delay(1), Duration::from_secs(5));
        assert_eq!(reconnect_delay(2), Duration::from_secs(10));
        assert_eq!(reconnect_delay(3), Duration::from_secs(20));
        assert_eq!(reconnect_delay(4), Duration::from_secs(40));
        assert_eq!(reconnect_delay(5), Duration::from_secs(60));
        assert_eq!(reconnect_delay(12), Duration::from_secs(60));
    }

    #[test]
    fn auth_token_joins_node_id_and_signature() {
        let client = WsClient::new("ws://localhost:8080/ws", "node-1", "c2ln");
        assert_eq!(client.auth_token, "node-1:c2ln");
        assert!(!client.is_connected());
    }
}
