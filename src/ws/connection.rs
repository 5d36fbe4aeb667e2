//! Connection lifecycle (C9): per-socket read/write tasks, heartbeat and
//! inactivity timers, the bounded drop-oldest send queue, and the
//! `WsHandler` trait user code implements (spec.md §4.8).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace, warn};
use regex::Regex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::Instant;

use crate::error::{CloseCode, WsError};
use crate::pattern::CompiledPattern;
use crate::ws::deflate::{DeflateParams, PerMessageDeflate, COMPRESSION_THRESHOLD};
use crate::ws::frame::{Frame, Opcode};
use crate::ws::rooms::{ConnectionId, Registry};

/// A message queued for delivery to a single connection's write task.
/// Carried uncompressed — the write task owns the per-connection deflate
/// state and compresses immediately before framing.
#[derive(Debug, Clone)]
pub enum OutgoingMessage {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(CloseCode, String),
}

/// Bounded, drop-oldest outbound queue (spec.md §5 "back-pressure": a slow
/// client loses its oldest undelivered frames rather than stalling the
/// server or growing memory without bound).
pub struct Outbox {
    queue: Mutex<VecDeque<OutgoingMessage>>,
    notify: Notify,
    capacity: usize,
}

impl Outbox {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self { queue: Mutex::new(VecDeque::new()), notify: Notify::new(), capacity })
    }

    pub async fn push(&self, message: OutgoingMessage) {
        let mut queue = self.queue.lock().await;
        if queue.len() >= self.capacity {
            queue.pop_front();
            warn!("ws send queue full, dropping oldest frame");
        }
        queue.push_back(message);
        drop(queue);
        self.notify.notify_one();
    }

    pub async fn recv(&self) -> Option<OutgoingMessage> {
        loop {
            {
                let mut queue = self.queue.lock().await;
                if let Some(message) = queue.pop_front() {
                    return Some(message);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Non-blocking pop, used by tests asserting delivery without driving
    /// a full connection task.
    pub fn try_pop(&self) -> Option<OutgoingMessage> {
        self.queue.try_lock().ok()?.pop_front()
    }
}

/// A canned reply rule: an incoming text message matching `matcher` is
/// answered with `reply` without involving the user handler (spec.md §4.8
/// "responses" table), useful for scripting a mock without writing code.
#[derive(Clone)]
pub struct ResponseRule {
    pub matcher: Regex,
    pub reply: String,
}

fn canned_reply<'a>(rules: &'a [ResponseRule], text: &str) -> Option<&'a str> {
    rules.iter().find(|rule| rule.matcher.is_match(text)).map(|rule| rule.reply.as_str())
}

/// One inbound application message, already reassembled from any
/// continuation frames and decompressed.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    Text(String),
    Binary(Vec<u8>),
}

/// User-implemented behavior for one `wsHandlers` entry. All methods have
/// no-op defaults so a handler only needs to override what it cares about
/// (mirrors the optional-callback shape in `mockforge-ws`'s `WsHandler`).
#[async_trait]
pub trait WsHandler: Send + Sync {
    /// Run once, before the upgrade response is written (spec.md §4.6):
    /// `Ok(false)` rejects the connection with 401, `Err` maps to 500.
    async fn authenticate(&self, _request: &crate::http::Request) -> Result<bool, String> {
        Ok(true)
    }

    async fn on_connect(&self, _conn: &ConnectionHandle) {}

    async fn on_message(&self, _conn: &ConnectionHandle, _message: IncomingMessage) {}

    /// Called when a ping control frame arrives. Returning `true` suppresses
    /// the server's automatic pong reply (spec.md §4.8 "a user-provided
    /// `onPing` suppresses the automatic pong reply").
    async fn on_ping(&self, _conn: &ConnectionHandle, _payload: &[u8]) -> bool {
        false
    }

    /// `initiated_by_client` is `true` only when the peer sent a Close
    /// frame; server-initiated closes (timeouts, protocol errors, lost
    /// heartbeats) report `false` (spec.md §4.8).
    async fn on_close(&self, _conn: &ConnectionHandle, _code: CloseCode, _reason: &str, _initiated_by_client: bool) {}
}

/// Static configuration for one `wsHandlers[]` entry (spec.md §6).
pub struct WsHandlerConfig {
    pub pattern: CompiledPattern,
    pub subprotocols: Vec<String>,
    pub deflate_opt_in: bool,
    pub deflate_strict: bool,
    pub heartbeat_interval: Option<Duration>,
    pub inactivity_timeout: Option<Duration>,
    pub default_room: Option<String>,
    pub responses: Vec<ResponseRule>,
    pub handler: Arc<dyn WsHandler>,
    pub registry: Registry,
    pub send_queue_capacity: usize,
}

impl Default for WsHandlerConfig {
    fn default() -> Self {
        Self {
            pattern: CompiledPattern::compile("/**").expect("trivial pattern always compiles"),
            subprotocols: Vec::new(),
            deflate_opt_in: false,
            deflate_strict: false,
            heartbeat_interval: None,
            inactivity_timeout: None,
            default_room: None,
            responses: Vec::new(),
            handler: Arc::new(NoopHandler),
            registry: Registry::new(),
            send_queue_capacity: 1024,
        }
    }
}

struct NoopHandler;
#[async_trait]
impl WsHandler for NoopHandler {}

/// Handle passed to `WsHandler` callbacks and held by the connection task;
/// the only way user code or another connection's broadcast reaches this
/// socket.
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub path: String,
    registry: Registry,
    outbox: Arc<Outbox>,
    metadata: RwLock<std::collections::HashMap<String, Value>>,
}

impl ConnectionHandle {
    pub fn send_text(&self, text: impl Into<String>) {
        let outbox = Arc::clone(&self.outbox);
        let message = OutgoingMessage::Text(text.into());
        tokio::spawn(async move { outbox.push(message).await });
    }

    pub fn send_binary(&self, data: Vec<u8>) {
        let outbox = Arc::clone(&self.outbox);
        tokio::spawn(async move { outbox.push(OutgoingMessage::Binary(data)).await });
    }

    pub fn send_json(&self, value: &Value) -> Result<(), serde_json::Error> {
        self.send_text(serde_json::to_string(value)?);
        Ok(())
    }

    pub async fn join_room(&self, room: &str) {
        self.registry.join(&self.id, room).await;
    }

    pub async fn leave_room(&self, room: &str) {
        self.registry.leave(&self.id, room).await;
    }

    pub async fn broadcast_text(&self, text: impl Into<String>, room: Option<&str>, include_self: bool) {
        self.registry.broadcast(&self.id, OutgoingMessage::Text(text.into()), room, include_self).await;
    }

    pub async fn set_meta(&self, key: &str, value: Value) {
        self.metadata.write().await.insert(key.to_string(), value);
    }

    pub async fn get_meta(&self, key: &str) -> Option<Value> {
        self.metadata.read().await.get(key).cloned()
    }

    pub fn close(&self, code: CloseCode, reason: &str) {
        let outbox = Arc::clone(&self.outbox);
        let message = OutgoingMessage::Close(code, reason.to_string());
        tokio::spawn(async move { outbox.push(message).await });
    }
}

/// Drives one accepted WebSocket connection to completion: registers it,
/// runs the read loop (frame reassembly, heartbeat, inactivity timeout,
/// control-frame handling), and unregisters it on the way out. `split`
/// halves come from the caller's already-upgraded socket.
pub async fn run_connection<R, W>(
    id: ConnectionId,
    path: String,
    mut reader: BufReader<R>,
    mut writer: W,
    config: Arc<WsHandlerConfig>,
    deflate: Option<DeflateParams>,
) where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let outbox = Outbox::new(config.send_queue_capacity);
    config.registry.register(id.clone(), Arc::clone(&outbox)).await;

    let handle = Arc::new(ConnectionHandle {
        id: id.clone(),
        path,
        registry: config.registry.clone(),
        outbox: Arc::clone(&outbox),
        metadata: RwLock::new(std::collections::HashMap::new()),
    });

    if let Some(room) = &config.default_room {
        handle.join_room(room).await;
    }

    let mut tx_deflate = deflate.map(PerMessageDeflate::new);
    let mut rx_deflate = deflate.map(PerMessageDeflate::new);

    config.handler.on_connect(&handle).await;

    let writer_task = {
        let outbox = Arc::clone(&outbox);
        tokio::spawn(async move {
            while let Some(message) = outbox.recv().await {
                let frame = match message {
                    OutgoingMessage::Text(text) => build_data_frame(Opcode::Text, text.into_bytes(), &mut tx_deflate),
                    OutgoingMessage::Binary(bytes) => build_data_frame(Opcode::Binary, bytes, &mut tx_deflate),
                    OutgoingMessage::Ping(payload) => Frame::ping(payload).to_bytes(),
                    OutgoingMessage::Pong(payload) => Frame::pong(payload).to_bytes(),
                    OutgoingMessage::Close(code, reason) => {
                        let frame = Frame::close(code, &reason);
                        let bytes = frame.to_bytes();
                        let _ = writer.write_all(&bytes).await;
                        break;
                    }
                };
                if writer.write_all(&frame).await.is_err() {
                    break;
                }
            }
            let _ = writer.flush().await;
        })
    };

    let mut assembling: Option<(Opcode, Vec<u8>, bool)> = None;
    let mut last_activity = Instant::now();
    let mut missed_pongs: u32 = 0;
    let mut close_info: Option<(CloseCode, String, bool)> = None;

    loop {
        let read_fut = Frame::read(&mut reader);
        let timeout_fut = async {
            match config.inactivity_timeout {
                Some(d) => tokio::time::sleep_until(last_activity + d).await,
                None => std::future::pending().await,
            }
        };
        let heartbeat_fut = async {
            match config.heartbeat_interval {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            frame = read_fut => {
                let frame = match frame {
                    Ok(f) => f,
                    Err(e) => {
                        debug!("ws read error on {id}: {e}");
                        close_info = Some((e.close_code(), e.to_string(), false));
                        outbox.push(OutgoingMessage::Close(e.close_code(), e.to_string())).await;
                        break;
                    }
                };
                last_activity = Instant::now();
                // Any frame from the client — not just a pong — resets the
                // missed-pong counter (spec.md §4.8).
                missed_pongs = 0;

                match frame.opcode {
                    Opcode::Close => {
                        let (code, reason) = frame.close_code_and_reason();
                        let code = code.map(from_raw_close_code).unwrap_or(CloseCode::Normal);
                        close_info = Some((code, reason.clone(), true));
                        outbox.push(OutgoingMessage::Close(code, reason)).await;
                        break;
                    }
                    Opcode::Ping => {
                        if !config.handler.on_ping(&handle, &frame.payload).await {
                            outbox.push(OutgoingMessage::Pong(frame.payload)).await;
                        }
                    }
                    Opcode::Pong => {
                        trace!("pong received on {id}");
                    }
                    Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                        if let Err(err) = reassemble(&mut assembling, frame, &mut rx_deflate, &handle, &config).await {
                            close_info = Some((err.close_code(), err.to_string(), false));
                            outbox.push(OutgoingMessage::Close(err.close_code(), err.to_string())).await;
                            break;
                        }
                    }
                }
            }
            _ = timeout_fut => {
                debug!("ws inactivity timeout on {id}");
                close_info = Some((CloseCode::Normal, "inactivity timeout".into(), false));
                outbox.push(OutgoingMessage::Close(CloseCode::Normal, "inactivity timeout".into())).await;
                break;
            }
            _ = heartbeat_fut => {
                // After 3 consecutive missed pongs, give up (spec.md §4.8).
                if missed_pongs >= 3 {
                    debug!("ws heartbeat lost on {id}");
                    close_info = Some((CloseCode::ServerError, "heartbeat lost".into(), false));
                    outbox.push(OutgoingMessage::Close(CloseCode::ServerError, "heartbeat lost".into())).await;
                    break;
                }
                missed_pongs += 1;
                outbox.push(OutgoingMessage::Ping(Vec::new())).await;
            }
        }
    }

    let (close_code, close_reason, initiated_by_client) =
        close_info.unwrap_or((CloseCode::Normal, String::new(), false));
    config.handler.on_close(&handle, close_code, &close_reason, initiated_by_client).await;
    config.registry.unregister(&id).await;
    writer_task.abort();
}

fn from_raw_close_code(code: u16) -> CloseCode {
    match code {
        1000 => CloseCode::Normal,
        1002 => CloseCode::ProtocolError,
        1007 => CloseCode::InvalidPayload,
        1008 => CloseCode::Policy,
        1009 => CloseCode::TooBig,
        _ => CloseCode::ServerError,
    }
}

fn build_data_frame(opcode: Opcode, payload: Vec<u8>, deflate: &mut Option<PerMessageDeflate>) -> Vec<u8> {
    match deflate {
        Some(state) if payload.len() >= COMPRESSION_THRESHOLD => {
            let compressed = state.compress_message(&payload);
            Frame::data(true, opcode, compressed).with_rsv1(true).to_bytes()
        }
        _ => Frame::data(true, opcode, payload).to_bytes(),
    }
}

/// Accumulate continuation frames into one logical message, dispatch it to
/// the responses table (if it matches) or the user handler, and reset the
/// assembly buffer.
async fn reassemble(
    assembling: &mut Option<(Opcode, Vec<u8>, bool)>,
    frame: Frame,
    rx_deflate: &mut Option<PerMessageDeflate>,
    handle: &Arc<ConnectionHandle>,
    config: &Arc<WsHandlerConfig>,
) -> Result<(), WsError> {
    let (opcode, mut buffer, rsv1) = match assembling.take() {
        Some((opcode, buffer, rsv1)) => {
            if frame.opcode != Opcode::Continuation {
                return Err(WsError::Protocol("expected continuation frame".into()));
            }
            (opcode, buffer, rsv1)
        }
        None => (frame.opcode, Vec::new(), frame.rsv1),
    };

    let mut buffer = std::mem::take(&mut buffer);
    buffer.extend_from_slice(&frame.payload);

    if !frame.fin {
        *assembling = Some((opcode, buffer, rsv1));
        return Ok(());
    }

    let payload = if rsv1 {
        match rx_deflate {
            Some(state) => state.decompress_message(&buffer)?,
            None => return Err(WsError::Protocol("RSV1 set but no extension negotiated".into())),
        }
    } else {
        buffer
    };

    let message = match opcode {
        Opcode::Text => {
            let text = String::from_utf8(payload).map_err(|e| WsError::InvalidPayload(e.to_string()))?;
            IncomingMessage::Text(text)
        }
        Opcode::Binary => IncomingMessage::Binary(payload),
        _ => unreachable!("control opcodes never enter reassembly"),
    };

    if let IncomingMessage::Text(text) = &message {
        if let Some(reply) = canned_reply(&config.responses, text) {
            handle.send_text(reply.to_string());
            return Ok(());
        }
    }

    config.handler.on_message(handle, message).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn outbox_drops_oldest_when_over_capacity() {
        let outbox = Outbox::new(2);
        outbox.push(OutgoingMessage::Text("a".into())).await;
        outbox.push(OutgoingMessage::Text("b".into())).await;
        outbox.push(OutgoingMessage::Text("c".into())).await;

        let first = outbox.recv().await.unwrap();
        match first {
            OutgoingMessage::Text(t) => assert_eq!(t, "b"),
            _ => panic!("expected text"),
        }
        let second = outbox.recv().await.unwrap();
        match second {
            OutgoingMessage::Text(t) => assert_eq!(t, "c"),
            _ => panic!("expected text"),
        }
    }

    #[test]
    fn canned_reply_matches_configured_pattern() {
        let rules = vec![ResponseRule { matcher: Regex::new("^ping$").unwrap(), reply: "pong".into() }];
        assert_eq!(canned_reply(&rules, "ping"), Some("pong"));
        assert_eq!(canned_reply(&rules, "other"), None);
    }
}
