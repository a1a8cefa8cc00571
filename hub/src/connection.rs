use crate::hub::Hub;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, timeout, Duration};

/// Time allowed for a single outbound write.
pub(crate) const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Deadline for hearing anything (including pongs) from the peer.
pub(crate) const PONG_WAIT: Duration = Duration::from_secs(60);

/// Ping period. Must stay below PONG_WAIT.
pub(crate) const PING_PERIOD: Duration = Duration::from_millis(PONG_WAIT.as_millis() as u64 * 9 / 10);

/// Maximum inbound frame size (enforced at upgrade).
pub const MAX_MESSAGE_SIZE: usize = 1 << 20;

/// Outbound queue depth per connection. A full queue drops frames for that
/// node rather than stalling the broadcaster.
pub(crate) const SEND_BUFFER_SIZE: usize = 256;

/// Runs one authenticated node connection until it closes.
///
/// Registers the node, spawns the write pump, then drives the read pump on
/// the calling task. Unregistration happens on every exit path.
pub(crate) async fn run_connection(
    hub: Arc<Hub>,
    socket: WebSocket,
    node_id: String,
    shutdown: broadcast::Receiver<()>,
) {
    let (sink, stream) = socket.split();
    let (tx, rx) = mpsc::channel::<String>(SEND_BUFFER_SIZE);

    hub.register(&node_id, tx.clone());

    let write_node = node_id.clone();
    let writer = tokio::spawn(write_pump(sink, rx, write_node, shutdown));

    read_pump(&hub, stream, &node_id).await;

    hub.unregister(&node_id, &tx);
    writer.abort();
}

async fn read_pump(hub: &Arc<Hub>, mut stream: SplitStream<WebSocket>, node_id: &str) {
    loop {
        let frame = match timeout(PONG_WAIT, stream.next()).await {
            Err(_) => {
                warn!("[hub] node {node_id} missed the pong deadline");
                return;
            }
            Ok(None) => return,
            Ok(Some(Err(e))) => {
                error!("[hub] node {node_id} read error: {e}");
                return;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => hub.handle_frame(node_id, text.as_str()).await,
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => hub.handle_frame(node_id, text).await,
                Err(_) => warn!("[hub] node {node_id}: non-utf8 binary frame dropped"),
            },
            // Any frame, pongs included, already reset the deadline by
            // completing the timed read above.
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => {
                info!("[hub] node {node_id} closed the connection");
                return;
            }
        }
    }
}

async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<String>,
    node_id: String,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ping = interval(PING_PERIOD);
    // The first tick fires immediately; skip it so pings are spaced out.
    ping.tick().await;

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let frame = match frame {
                    Some(frame) => frame,
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return;
                    }
                };
                match timeout(WRITE_WAIT, sink.send(Message::Text(frame.into()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!("[hub] node {node_id} write error: {e}");
                        return;
                    }
                    Err(_) => {
                        error!("[hub] node {node_id} write deadline exceeded");
                        return;
                    }
                }
            }
            _ = ping.tick() => {
                let ping_frame = Message::Ping(Vec::new().into());
                if timeout(WRITE_WAIT, sink.send(ping_frame)).await.map_or(true, |r| r.is_err()) {
                    return;
                }
            }
            _ = shutdown.recv() => {
                let _ = sink.send(Message::Close(None)).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_period_leaves_room_before_the_pong_deadline() {
        assert!(PING_PERIOD < PONG_WAIT);
        assert_eq!(PING_PERIOD, Duration::from_secs(54));
    }
}
