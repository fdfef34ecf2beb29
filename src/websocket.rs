use axum::{
    body::Bytes,
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::connection::{ConnectionId, Transport};
use crate::hub::TelemetryHub;

/// How long a queued close frame may wait behind a stalled writer
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state for WebSocket handling
#[derive(Clone)]
pub struct StreamState {
    pub hub: Arc<TelemetryHub>,
}

enum Outbound {
    Text(String),
    Binary(Bytes),
    Ping,
    Close(u16, String),
}

impl Outbound {
    fn len(&self) -> usize {
        match self {
            Outbound::Text(text) => text.len(),
            Outbound::Binary(data) => data.len(),
            Outbound::Ping | Outbound::Close(..) => 0,
        }
    }
}

/// Transport backed by an axum WebSocket.
///
/// Sends go through an unbounded queue drained by a writer task; the byte
/// count of queued-but-unwritten messages is what the broadcaster sees as
/// the buffered amount. A close frame stuck behind a stalled writer for
/// longer than the close timeout tears the socket down.
pub struct WsTransport {
    tx: mpsc::UnboundedSender<Outbound>,
    buffered: Arc<AtomicUsize>,
    open: AtomicBool,
    shutdown: CancellationToken,
    close_timeout: Duration,
}

impl WsTransport {
    fn new(shutdown: CancellationToken, close_timeout: Duration) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            tx,
            buffered: Arc::new(AtomicUsize::new(0)),
            open: AtomicBool::new(true),
            shutdown,
            close_timeout,
        };
        (transport, rx)
    }

    fn enqueue(&self, item: Outbound) {
        if !self.is_open() {
            return;
        }
        let len = item.len();
        self.buffered.fetch_add(len, Ordering::SeqCst);
        if self.tx.send(item).is_err() {
            self.buffered.fetch_sub(len, Ordering::SeqCst);
        }
    }

    fn arm_close_timer(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let shutdown = self.shutdown.clone();
        let timeout = self.close_timeout;
        runtime.spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    debug!("Close frame not flushed within {:?}, dropping socket", timeout);
                    shutdown.cancel();
                }
            }
        });
    }
}

impl Transport for WsTransport {
    fn send_text(&self, text: String) {
        self.enqueue(Outbound::Text(text));
    }

    fn send_binary(&self, frame: Bytes) {
        self.enqueue(Outbound::Binary(frame));
    }

    fn ping(&self) {
        self.enqueue(Outbound::Ping);
    }

    fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.shutdown.is_cancelled()
    }

    fn close(&self, code: u16, reason: &str) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.tx.send(Outbound::Close(code, reason.to_string()));
            self.arm_close_timer();
        }
    }

    fn terminate(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
    }
}

/// Handle WebSocket upgrade
pub async fn handle_websocket(ws: WebSocketUpgrade, State(state): State<StreamState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

/// Drain the outbound queue into the socket
async fn write_loop(
    id: ConnectionId,
    mut sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    buffered: Arc<AtomicUsize>,
    shutdown: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            item = rx.recv() => item,
        };
        let Some(item) = item else {
            break;
        };

        let len = item.len();
        let (message, last) = match item {
            Outbound::Text(text) => (Message::Text(text.into()), false),
            Outbound::Binary(data) => (Message::Binary(data), false),
            Outbound::Ping => (Message::Ping(Bytes::new()), false),
            Outbound::Close(code, reason) => (
                Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })),
                true,
            ),
        };

        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            result = sender.send(message) => result,
        };
        buffered.fetch_sub(len, Ordering::SeqCst);

        if let Err(e) = result {
            debug!("Connection {} write failed: {}", id, e);
            break;
        }
        if last {
            break;
        }
    }

    shutdown.cancel();
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, hub: Arc<TelemetryHub>) {
    let (sender, mut receiver) = socket.split();
    let shutdown = CancellationToken::new();

    let (transport, rx) = WsTransport::new(shutdown.clone(), CLOSE_TIMEOUT);
    let buffered = transport.buffered.clone();

    let (id, handshake_token) = hub.accept(Arc::new(transport), Instant::now());
    info!("New WebSocket connection established: {}", id);

    tokio::spawn(write_loop(id, sender, rx, buffered, shutdown.clone()));

    {
        let hub = hub.clone();
        let timeout = hub.config().handshake_timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = handshake_token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => hub.handshake_timed_out(id),
            }
        });
    }

    loop {
        let msg = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            msg = receiver.next() => msg,
        };
        let msg = match msg {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                error!("WebSocket error on {}: {}", id, e);
                break;
            }
            None => break,
        };

        match msg {
            Message::Text(text) => hub.handle_message(id, text.as_str().as_bytes(), Instant::now()),
            Message::Binary(data) => hub.handle_message(id, &data, Instant::now()),
            Message::Pong(_) => hub.record_pong(id),
            // Pings are answered by the protocol layer
            Message::Ping(_) => {}
            Message::Close(_) => {
                info!("WebSocket connection {} closed by client", id);
                break;
            }
        }
    }

    shutdown.cancel();
    hub.on_transport_closed(id);
    info!("WebSocket connection {} terminated", id);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> (WsTransport, mpsc::UnboundedReceiver<Outbound>, CancellationToken) {
        let shutdown = CancellationToken::new();
        let (transport, rx) = WsTransport::new(shutdown.clone(), CLOSE_TIMEOUT);
        (transport, rx, shutdown)
    }

    #[test]
    fn test_buffered_amount_counts_queued_payload_bytes() {
        let (transport, mut rx, _) = transport();

        transport.send_text("hello".to_string());
        assert_eq!(transport.buffered_amount(), 5);

        transport.send_binary(Bytes::from(vec![0u8; 40]));
        assert_eq!(transport.buffered_amount(), 45);

        transport.ping();
        assert_eq!(transport.buffered_amount(), 45);

        assert!(matches!(rx.try_recv(), Ok(Outbound::Text(text)) if text == "hello"));
        assert!(matches!(rx.try_recv(), Ok(Outbound::Binary(data)) if data.len() == 40));
        assert!(matches!(rx.try_recv(), Ok(Outbound::Ping)));
    }

    #[test]
    fn test_sends_after_close_are_discarded() {
        let (transport, mut rx, _) = transport();
        transport.send_text("before".to_string());

        transport.close(1009, "Slow consumer");
        assert!(!transport.is_open());

        transport.send_text("after".to_string());
        transport.send_binary(Bytes::from(vec![0u8; 40]));
        assert_eq!(transport.buffered_amount(), 6);

        // A second close does not queue another frame
        transport.close(1000, "again");

        assert!(matches!(rx.try_recv(), Ok(Outbound::Text(_))));
        assert!(matches!(rx.try_recv(), Ok(Outbound::Close(1009, reason)) if reason == "Slow consumer"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_failed_send_is_not_counted() {
        let (transport, rx, _) = transport();
        drop(rx);

        transport.send_text("hello".to_string());
        transport.send_binary(Bytes::from(vec![0u8; 40]));
        assert_eq!(transport.buffered_amount(), 0);
    }

    #[test]
    fn test_terminate_cancels_socket() {
        let (transport, _rx, shutdown) = transport();
        transport.terminate();

        assert!(!transport.is_open());
        assert!(shutdown.is_cancelled());
    }

    #[test]
    fn test_cancelled_socket_reports_closed() {
        let (transport, _rx, shutdown) = transport();
        shutdown.cancel();
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_unflushed_close_tears_socket_down() {
        let shutdown = CancellationToken::new();
        // Nothing drains the queue, so the close frame never reaches the peer
        let (transport, _rx) = WsTransport::new(shutdown.clone(), Duration::from_millis(20));

        transport.close(1009, "Slow consumer");
        assert!(!shutdown.is_cancelled());

        tokio::time::timeout(Duration::from_secs(2), shutdown.cancelled())
            .await
            .expect("close timer never fired");
    }
}
