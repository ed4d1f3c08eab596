//! services/client/src/adapters/stomp.rs
//!
//! STOMP 1.2 over a raw WebSocket. Implements the `ChannelTransport` and
//! `ChannelConnection` ports from the `core` crate.
//!
//! One reader task owns the receiving half of the socket. It forwards MESSAGE
//! frames to the connection's inbound stream and completes receipt waiters.
//! The sending half is shared behind a mutex.

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use listening_room_core::ports::{
    ChannelConnection, ChannelLink, ChannelTransport, InboundFrame, InboundStream, PortError,
    PortResult,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

const ACCEPT_VERSION: &str = "1.2,1.1,1.0";

//=========================================================================================
// STOMP Frames
//=========================================================================================

/// A single STOMP frame. Header order is kept; the first occurrence wins on lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl StompFrame {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// CONNECT and CONNECTED frames never escape their headers.
    fn escapes_headers(&self) -> bool {
        self.command != "CONNECT" && self.command != "CONNECTED"
    }

    pub fn encode(&self) -> String {
        let escape = self.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(&self.command);
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parses one frame. Returns `None` for heart-beats (bare end-of-lines).
    pub fn decode(text: &str) -> PortResult<Option<Self>> {
        let text = text.trim_start_matches(['\r', '\n']);
        if text.is_empty() {
            return Ok(None);
        }

        let (head, rest) = split_head(text)
            .ok_or_else(|| PortError::Unexpected("STOMP frame without a header block".to_string()))?;

        let mut lines = head.lines();
        let command = lines.next().unwrap_or_default().trim_end_matches('\r');
        if command.is_empty() {
            return Err(PortError::Unexpected("STOMP frame without a command".to_string()));
        }

        let mut frame = StompFrame::new(command);
        let escape = frame.escapes_headers();
        for line in lines {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (name, value) = line.split_once(':').ok_or_else(|| {
                PortError::Unexpected(format!("malformed STOMP header line '{}'", line))
            })?;
            if escape {
                frame.headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                frame.headers.push((name.to_string(), value.to_string()));
            }
        }

        let body = match frame.get("content-length").and_then(|l| l.parse::<usize>().ok()) {
            Some(len) if len <= rest.len() && rest.is_char_boundary(len) => &rest[..len],
            _ => rest.split('\0').next().unwrap_or_default(),
        };
        frame.body = body.to_string();
        Ok(Some(frame))
    }
}

/// Splits at the blank line ending the headers. Accepts `\n` and `\r\n`.
fn split_head(text: &str) -> Option<(&str, &str)> {
    let lf = text.find("\n\n").map(|i| (i, 2));
    let crlf = text.find("\r\n\r\n").map(|i| (i, 4));
    let (at, skip) = match (lf, crlf) {
        (Some(a), Some(b)) => {
            if a.0 < b.0 {
                a
            } else {
                b
            }
        }
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => {
            // A frame with neither headers nor body: "COMMAND\n\0".
            let trimmed = text.trim_end_matches('\0').trim_end_matches(['\r', '\n']);
            return (!trimmed.contains('\n')).then_some((trimmed, ""));
        }
    };
    Some((&text[..at], &text[at + skip..]))
}

fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(value: &str) -> PortResult<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            other => {
                return Err(PortError::Unexpected(format!(
                    "invalid STOMP header escape '\\{}'",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

//=========================================================================================
// The Transport
//=========================================================================================

/// Opens STOMP sessions against a broker's WebSocket endpoint.
#[derive(Clone)]
pub struct StompTransport {
    endpoint: String,
    receipt_timeout: Duration,
}

impl StompTransport {
    pub fn new(endpoint: &str, receipt_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            receipt_timeout,
        }
    }

    /// The broker names the session after the `nickname` query parameter.
    fn url_for(&self, nickname: &str) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!(
            "{}{}nickname={}",
            self.endpoint,
            separator,
            urlencoding::encode(nickname)
        )
    }

    fn host(&self) -> String {
        self.endpoint
            .parse::<tungstenite::http::Uri>()
            .ok()
            .and_then(|uri| uri.host().map(str::to_string))
            .unwrap_or_else(|| "localhost".to_string())
    }
}

#[async_trait]
impl ChannelTransport for StompTransport {
    async fn connect(&self, nickname: &str) -> PortResult<ChannelLink> {
        let (connection, frames) = self.open(nickname).await?;
        Ok(ChannelLink {
            connection: Box::new(connection),
            frames,
        })
    }
}

impl StompTransport {
    /// Runs the WebSocket and STOMP handshakes and starts the reader task.
    async fn open(&self, nickname: &str) -> PortResult<(StompConnection, InboundStream)> {
        let url = self.url_for(nickname);
        debug!(url = %url, "Opening broker WebSocket");
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| PortError::Transport(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let connect = StompFrame::new("CONNECT")
            .header("accept-version", ACCEPT_VERSION)
            .header("host", &self.host())
            .header("heart-beat", "0,0")
            .header("login", nickname);
        sink.send(Message::Text(connect.encode()))
            .await
            .map_err(|e| PortError::Transport(e.to_string()))?;

        let connected = tokio::time::timeout(self.receipt_timeout, await_connected(&mut stream))
            .await
            .map_err(|_| PortError::Transport("broker did not answer CONNECT".to_string()))??;
        info!(
            version = connected.get("version").unwrap_or("1.0"),
            "STOMP session established"
        );

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            sink: Mutex::new(sink),
            receipts: std::sync::Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(0),
        });
        let reader = tokio::spawn(read_loop(stream, inbound_tx, shared.clone()));

        let frames = futures::stream::unfold(inbound_rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        });

        let connection = StompConnection {
            shared,
            reader: std::sync::Mutex::new(Some(reader)),
            receipt_timeout: self.receipt_timeout,
        };
        Ok((connection, frames.boxed()))
    }
}

async fn await_connected(stream: &mut futures::stream::SplitStream<WsStream>) -> PortResult<StompFrame> {
    while let Some(message) = stream.next().await {
        let message = message.map_err(|e| PortError::Transport(e.to_string()))?;
        let Some(text) = message_text(message) else {
            continue;
        };
        let Some(frame) = StompFrame::decode(&text)? else {
            continue;
        };
        match frame.command.as_str() {
            "CONNECTED" => return Ok(frame),
            "ERROR" => {
                let reason = frame.get("message").unwrap_or(&frame.body).to_string();
                return Err(PortError::Rejected(reason));
            }
            other => warn!(command = other, "Unexpected frame before CONNECTED"),
        }
    }
    Err(PortError::Transport(
        "broker closed the socket during the handshake".to_string(),
    ))
}

fn message_text(message: Message) -> Option<String> {
    match message {
        Message::Text(text) => Some(text),
        Message::Binary(data) => Some(String::from_utf8_lossy(&data).into_owned()),
        _ => None,
    }
}

//=========================================================================================
// The Connection
//=========================================================================================

struct Shared {
    sink: Mutex<WsSink>,
    receipts: std::sync::Mutex<HashMap<String, oneshot::Sender<()>>>,
    next_subscription: AtomicU64,
}

impl Shared {
    async fn send_frame(&self, frame: StompFrame) -> PortResult<()> {
        self.sink
            .lock()
            .await
            .send(Message::Text(frame.encode()))
            .await
            .map_err(|e| PortError::Transport(e.to_string()))
    }
}

pub struct StompConnection {
    shared: Arc<Shared>,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
    receipt_timeout: Duration,
}

#[async_trait]
impl ChannelConnection for StompConnection {
    async fn subscribe(&self, destination: &str) -> PortResult<String> {
        let id = format!(
            "sub-{}",
            self.shared.next_subscription.fetch_add(1, Ordering::SeqCst)
        );
        self.shared
            .send_frame(
                StompFrame::new("SUBSCRIBE")
                    .header("id", &id)
                    .header("destination", destination)
                    .header("ack", "auto"),
            )
            .await?;
        Ok(id)
    }

    async fn unsubscribe(&self, subscription_id: &str) -> PortResult<()> {
        self.shared
            .send_frame(StompFrame::new("UNSUBSCRIBE").header("id", subscription_id))
            .await
    }

    async fn send(&self, destination: &str, body: &str) -> PortResult<()> {
        self.shared
            .send_frame(
                StompFrame::new("SEND")
                    .header("destination", destination)
                    .header("content-type", "application/json")
                    .header("content-length", &body.len().to_string())
                    .body(body),
            )
            .await
    }

    async fn disconnect(&self) -> PortResult<()> {
        let receipt_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.shared
            .receipts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(receipt_id.clone(), tx);

        let sent = self
            .shared
            .send_frame(StompFrame::new("DISCONNECT").header("receipt", &receipt_id))
            .await;

        let acknowledged = match sent {
            Ok(()) => match tokio::time::timeout(self.receipt_timeout, rx).await {
                Ok(Ok(())) => Ok(()),
                // The reader ended first; the socket is gone either way.
                Ok(Err(_)) => Ok(()),
                Err(_) => Err(PortError::Transport(
                    "no receipt for DISCONNECT".to_string(),
                )),
            },
            Err(e) => Err(e),
        };

        if let Err(e) = self.shared.sink.lock().await.close().await {
            debug!("WebSocket close failed: {}", e);
        }
        let reader = self.reader.lock().ok().and_then(|mut r| r.take());
        if let Some(reader) = reader {
            reader.abort();
        }
        acknowledged
    }
}

async fn read_loop(
    mut stream: futures::stream::SplitStream<WsStream>,
    inbound: mpsc::UnboundedSender<InboundFrame>,
    shared: Arc<Shared>,
) {
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                warn!("Broker socket error: {}", e);
                break;
            }
        };
        if let Message::Close(reason) = &message {
            debug!(?reason, "Broker closed the socket");
            break;
        }
        let Some(text) = message_text(message) else {
            continue;
        };
        let frame = match StompFrame::decode(&text) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                warn!("Dropping undecodable frame: {}", e);
                continue;
            }
        };

        match frame.command.as_str() {
            "MESSAGE" => {
                let inbound_frame = InboundFrame {
                    subscription_id: frame.get("subscription").unwrap_or_default().to_string(),
                    destination: frame.get("destination").unwrap_or_default().to_string(),
                    body: frame.body,
                };
                if inbound.send(inbound_frame).is_err() {
                    break;
                }
            }
            "RECEIPT" => {
                let waiter = frame.get("receipt-id").and_then(|id| {
                    shared
                        .receipts
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .remove(id)
                });
                if let Some(waiter) = waiter {
                    let _ = waiter.send(());
                }
            }
            "ERROR" => {
                error!(
                    reason = frame.get("message").unwrap_or_default(),
                    "Broker sent an ERROR frame"
                );
                break;
            }
            other => debug!(command = other, "Ignoring frame"),
        }
    }

    // Pending receipt waiters see their sender dropped.
    shared
        .receipts
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clear();
}
