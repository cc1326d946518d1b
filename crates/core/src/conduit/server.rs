//! Conduit server: listener, handshake, clients.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use parking_lot::Mutex;
use sha1::{Digest, Sha1};
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::conduit::codec::{self, EncodedMessage};
use crate::conduit::frame::{
    self, CLOSE_NORMAL, CLOSE_PROTOCOL_ERROR, FrameDecoder, FrameEvent, OPCODE_BINARY,
    OPCODE_PONG,
};
use crate::crypto::rand64;
use crate::event_loop::EventLoop;

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upgrade requests larger than this are dropped without a response.
const MAX_HANDSHAKE_SIZE: usize = 16 * 1024;

/// Per-client outbound high-water mark; `emit` reports would-block beyond it.
const MAX_QUEUED_BYTES: usize = 16 * 1024 * 1024;

pub type StartCallback = Box<dyn FnOnce() + Send>;
pub type WriteCallback = Box<dyn FnOnce() + Send>;
pub type CloseCallback = Box<dyn FnOnce() + Send>;
/// Invoked on the loop for every decoded application message.
pub type ReceiveCallback = Arc<dyn Fn(&Client, EncodedMessage) + Send + Sync>;

enum WriteOp {
    /// Raw bytes (handshake response, pong).
    Raw(Vec<u8>),
    /// A data frame whose payload is written separately so retained buffers
    /// are never copied.
    Frame {
        header: Vec<u8>,
        payload: Arc<[u8]>,
        on_write: Option<WriteCallback>,
    },
    /// Optional close frame, then socket shutdown.
    Close {
        frame: Option<Vec<u8>>,
        on_close: Option<CloseCallback>,
    },
}

/// One accepted render-process connection.
pub struct Client {
    /// Server-assigned connection id (the clients map key).
    pub id: u64,
    client_id: AtomicU64,
    handshake_done: AtomicBool,
    closing: AtomicBool,
    closed: AtomicBool,
    writer: mpsc::UnboundedSender<WriteOp>,
    queued_bytes: Arc<AtomicUsize>,
}

impl Client {
    /// The id the render process presented at handshake (`?id=<u64>`).
    pub fn client_id(&self) -> u64 {
        self.client_id.load(Ordering::SeqCst)
    }

    pub fn is_handshake_done(&self) -> bool {
        self.handshake_done.load(Ordering::SeqCst)
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn send_raw(&self, bytes: Vec<u8>) -> bool {
        self.writer.send(WriteOp::Raw(bytes)).is_ok()
    }

    /// Emits an application message to this client as a single frame
    /// (unmasked, FIN=1, binary opcode unless overridden).
    ///
    /// Returns `false` while the client is closing or closed, when the
    /// queued outbound bytes exceed the high-water mark, and when the
    /// options block cannot be serialised. `on_write` fires once the write
    /// has completed; until then the caller is responsible for keeping
    /// `payload` alive — the shared-buffer retainer is the canonical way.
    pub fn emit(
        &self,
        options: &BTreeMap<String, String>,
        payload: Arc<[u8]>,
        opcode: u8,
        on_write: Option<WriteCallback>,
    ) -> bool {
        if self.is_closing() || self.is_closed() {
            return false;
        }

        let prefix = match codec::encode_prefix(options) {
            Ok(prefix) => prefix,
            Err(err) => {
                warn!(target = "runtime.conduit", error = %err, "refusing to emit message");
                return false;
            }
        };

        let mut header = frame::encode_server_frame_header(opcode, prefix.len() + payload.len());
        header.extend_from_slice(&prefix);

        let queued = header.len() + payload.len();
        if self.queued_bytes.load(Ordering::SeqCst) + queued > MAX_QUEUED_BYTES {
            warn!(
                target = "runtime.conduit",
                id = self.id,
                "outbound queue above high-water mark; dropping emit"
            );
            return false;
        }

        self.queued_bytes.fetch_add(queued, Ordering::SeqCst);
        let op = WriteOp::Frame {
            header,
            payload,
            on_write,
        };
        if self.writer.send(op).is_err() {
            self.queued_bytes.fetch_sub(queued, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Convenience wrapper for binary messages.
    pub fn emit_binary(
        &self,
        options: &BTreeMap<String, String>,
        payload: Arc<[u8]>,
        on_write: Option<WriteCallback>,
    ) -> bool {
        self.emit(options, payload, OPCODE_BINARY, on_write)
    }

    /// Closes the connection: no further frames are written, a close frame
    /// goes out when the handshake completed, and the socket shuts down on
    /// the loop. `callback` fires after `closed` is set.
    pub fn close(&self, callback: Option<CloseCallback>) {
        self.close_with(CLOSE_NORMAL, "", callback);
    }

    pub(crate) fn close_with(&self, status: u16, reason: &str, callback: Option<CloseCallback>) {
        if self.closed.load(Ordering::SeqCst) {
            if let Some(callback) = callback {
                callback();
            }
            return;
        }

        self.closing.store(true, Ordering::SeqCst);
        let close_frame = self
            .is_handshake_done()
            .then(|| frame::encode_close_frame(status, reason));

        let op = WriteOp::Close {
            frame: close_frame,
            on_close: callback,
        };
        if let Err(mpsc::error::SendError(op)) = self.writer.send(op) {
            // writer already gone; the socket is down
            self.closed.store(true, Ordering::SeqCst);
            if let WriteOp::Close {
                on_close: Some(callback),
                ..
            } = op
            {
                callback();
            }
        }
    }
}

/// The loopback WebSocket server. See the module docs.
pub struct Conduit {
    event_loop: Arc<EventLoop>,
    /// The conduit mutex: guards the client map.
    clients: Mutex<HashMap<u64, Arc<Client>>>,
    port: AtomicU16,
    is_starting: AtomicBool,
    listener: Mutex<Option<JoinHandle<()>>>,
    receive: Mutex<Option<ReceiveCallback>>,
}

impl Conduit {
    pub fn new(event_loop: Arc<EventLoop>) -> Self {
        Self {
            event_loop,
            clients: Mutex::new(HashMap::new()),
            port: AtomicU16::new(0),
            is_starting: AtomicBool::new(false),
            listener: Mutex::new(None),
            receive: Mutex::new(None),
        }
    }

    /// Installs the application-message handler.
    pub fn set_receive_callback(&self, callback: ReceiveCallback) {
        *self.receive.lock() = Some(callback);
    }

    /// The bound port, `0` until the listener is up.
    pub fn port(&self) -> u16 {
        self.port.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        let listening = self
            .listener
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished());
        listening || !self.clients.lock().is_empty()
    }

    pub fn has(&self, id: u64) -> bool {
        self.clients.lock().contains_key(&id)
    }

    pub fn get(&self, id: u64) -> Option<Arc<Client>> {
        self.clients.lock().get(&id).cloned()
    }

    pub fn clients(&self) -> Vec<Arc<Client>> {
        self.clients.lock().values().cloned().collect()
    }

    /// Binds an ephemeral loopback port and begins accepting. `callback`
    /// fires once the port is known. Idempotent while starting or active.
    pub fn start(self: &Arc<Self>, callback: Option<StartCallback>) {
        if self.is_active() || self.is_starting.swap(true, Ordering::SeqCst) {
            if let Some(callback) = callback {
                callback();
            }
            return;
        }

        let conduit = Arc::clone(self);
        match self.event_loop.spawn(conduit.run_listener(callback)) {
            Ok(task) => *self.listener.lock() = Some(task),
            Err(err) => {
                warn!(target = "runtime.conduit", error = %err, "conduit failed to start");
                self.is_starting.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Closes the listening socket and every client.
    pub fn stop(&self) {
        if let Some(task) = self.listener.lock().take() {
            task.abort();
        }
        self.port.store(0, Ordering::SeqCst);
        self.is_starting.store(false, Ordering::SeqCst);

        let clients: Vec<Arc<Client>> = {
            let mut clients = self.clients.lock();
            clients.drain().map(|(_, client)| client).collect()
        };
        for client in clients {
            client.close(None);
        }
    }

    fn remove_client(&self, id: u64) {
        self.clients.lock().remove(&id);
    }

    async fn run_listener(self: Arc<Self>, callback: Option<StartCallback>) {
        let _handle = (&self.event_loop).register_handle();

        let listener = match TcpListener::bind(("127.0.0.1", 0)).await {
            Ok(listener) => listener,
            Err(err) => {
                warn!(target = "runtime.conduit", error = %err, "failed to bind loopback socket");
                self.is_starting.store(false, Ordering::SeqCst);
                return;
            }
        };

        let port = listener
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or_default();
        self.port.store(port, Ordering::SeqCst);
        self.is_starting.store(false, Ordering::SeqCst);
        info!(target = "runtime.conduit", port, "conduit listening");

        if let Some(callback) = callback {
            callback();
        }

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let _ = stream.set_nodelay(true);
                    let (reader, writer) = stream.into_split();
                    let (tx, rx) = mpsc::unbounded_channel();

                    let client = Arc::new(Client {
                        id: rand64(),
                        client_id: AtomicU64::new(0),
                        handshake_done: AtomicBool::new(false),
                        closing: AtomicBool::new(false),
                        closed: AtomicBool::new(false),
                        writer: tx,
                        queued_bytes: Arc::new(AtomicUsize::new(0)),
                    });
                    debug!(target = "runtime.conduit", id = client.id, "client accepted");
                    self.clients.lock().insert(client.id, Arc::clone(&client));

                    tokio::spawn(run_writer(writer, rx, Arc::clone(&client)));
                    tokio::spawn(run_client(Arc::clone(&self), Arc::clone(&client), reader));
                }
                Err(err) => {
                    warn!(target = "runtime.conduit", error = %err, "accept failed");
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                }
            }
        }
    }
}

async fn run_writer(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<WriteOp>,
    client: Arc<Client>,
) {
    while let Some(op) = rx.recv().await {
        match op {
            WriteOp::Raw(bytes) => {
                if writer.write_all(&bytes).await.is_err() {
                    break;
                }
            }
            WriteOp::Frame {
                header,
                payload,
                on_write,
            } => {
                let queued = header.len() + payload.len();
                let result = async {
                    writer.write_all(&header).await?;
                    if !payload.is_empty() {
                        writer.write_all(&payload).await?;
                    }
                    writer.flush().await
                }
                .await;

                client.queued_bytes.fetch_sub(queued, Ordering::SeqCst);

                if let Err(err) = result {
                    debug!(target = "runtime.conduit", id = client.id, error = %err, "write failed");
                    break;
                }
                if let Some(on_write) = on_write {
                    on_write();
                }
            }
            WriteOp::Close { frame, on_close } => {
                if let Some(frame) = frame {
                    let _ = writer.write_all(&frame).await;
                }
                let _ = writer.shutdown().await;
                client.closed.store(true, Ordering::SeqCst);
                if let Some(on_close) = on_close {
                    on_close();
                }
                return;
            }
        }
    }

    client.closed.store(true, Ordering::SeqCst);
}

async fn run_client(conduit: Arc<Conduit>, client: Arc<Client>, mut reader: OwnedReadHalf) {
    let _handle = (&conduit.event_loop).register_handle();

    let mut buf = vec![0u8; 16 * 1024];
    let mut pending: Vec<u8> = Vec::new();
    let mut decoder = FrameDecoder::new();

    'read: loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                debug!(target = "runtime.conduit", id = client.id, error = %err, "read failed");
                break;
            }
        };

        let remainder;
        let mut bytes: &[u8] = &buf[..n];

        if !client.is_handshake_done() {
            pending.extend_from_slice(bytes);
            if pending.len() > MAX_HANDSHAKE_SIZE {
                debug!(target = "runtime.conduit", id = client.id, "oversized upgrade request");
                break;
            }

            match parse_handshake(&pending) {
                Handshake::Incomplete => continue,
                Handshake::Invalid => {
                    client.send_raw(b"HTTP/1.1 400 Bad Request\r\n\r\n".to_vec());
                    client.close(None);
                    break;
                }
                Handshake::Complete {
                    response,
                    client_id,
                    remainder: rest,
                } => {
                    client.client_id.store(client_id, Ordering::SeqCst);
                    client.send_raw(response);
                    client.handshake_done.store(true, Ordering::SeqCst);
                    debug!(
                        target = "runtime.conduit",
                        id = client.id,
                        client_id,
                        "handshake complete"
                    );
                    pending = Vec::new();
                    if rest.is_empty() {
                        continue;
                    }
                    remainder = rest;
                    bytes = &remainder;
                }
            }
        }

        let mut events = Vec::new();
        if let Err(violation) = decoder.feed(bytes, &mut events) {
            debug!(
                target = "runtime.conduit",
                id = client.id,
                error = %violation,
                "dropping connection"
            );
            client.close_with(CLOSE_PROTOCOL_ERROR, "protocol violation", None);
            break;
        }

        for event in events {
            match event {
                FrameEvent::Message { payload, .. } => match codec::decode(&payload) {
                    Ok(message) => {
                        let receive = conduit.receive.lock().clone();
                        if let Some(receive) = receive {
                            receive(&client, message);
                        }
                    }
                    Err(err) => {
                        debug!(
                            target = "runtime.conduit",
                            id = client.id,
                            error = %err,
                            "dropping undecodable message"
                        );
                    }
                },
                FrameEvent::Ping(data) => {
                    client.send_raw(frame::encode_server_frame(OPCODE_PONG, &data));
                }
                FrameEvent::Pong(_) => {}
                FrameEvent::Close { .. } => {
                    client.close(None);
                    break 'read;
                }
            }
        }
    }

    conduit.remove_client(client.id);
    if !client.is_closed() {
        client.close(None);
    }
}

/// Computes the `Sec-WebSocket-Accept` value for a client key.
pub(crate) fn handshake_accept(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

enum Handshake {
    Incomplete,
    Invalid,
    Complete {
        response: Vec<u8>,
        client_id: u64,
        remainder: Vec<u8>,
    },
}

fn parse_handshake(pending: &[u8]) -> Handshake {
    let Some(end) = find_subsequence(pending, b"\r\n\r\n") else {
        return Handshake::Incomplete;
    };

    let remainder = pending[end + 4..].to_vec();
    let Ok(head) = std::str::from_utf8(&pending[..end]) else {
        return Handshake::Invalid;
    };

    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    if parts.next() != Some("GET") {
        return Handshake::Invalid;
    }
    let target = parts.next().unwrap_or("/");

    let client_id = target
        .split_once('?')
        .map(|(_, query)| {
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == "id")
                .and_then(|(_, value)| value.parse().ok())
                .unwrap_or(0)
        })
        .unwrap_or(0);

    let mut key = None;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("sec-websocket-key") {
                key = Some(value.trim().to_string());
            }
        }
    }
    let Some(key) = key else {
        return Handshake::Invalid;
    };

    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        handshake_accept(&key)
    );

    Handshake::Complete {
        response: response.into_bytes(),
        client_id,
        remainder,
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::time::Duration;

    #[test]
    fn test_handshake_accept_vector() {
        // RFC 6455 §1.3 sample
        assert_eq!(
            handshake_accept("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_parse_handshake_extracts_client_id() {
        let request = b"GET /?id=42 HTTP/1.1\r\n\
                        Host: 127.0.0.1\r\n\
                        Upgrade: websocket\r\n\
                        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";
        match parse_handshake(request) {
            Handshake::Complete {
                response,
                client_id,
                remainder,
            } => {
                let response = String::from_utf8(response).unwrap();
                assert!(response.starts_with("HTTP/1.1 101"));
                assert!(response.contains("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
                assert_eq!(client_id, 42);
                assert!(remainder.is_empty());
            }
            _ => panic!("expected a complete handshake"),
        }
    }

    #[test]
    fn test_parse_handshake_incomplete_and_invalid() {
        assert!(matches!(
            parse_handshake(b"GET / HTTP/1.1\r\n"),
            Handshake::Incomplete
        ));
        assert!(matches!(
            parse_handshake(b"POST / HTTP/1.1\r\n\r\n"),
            Handshake::Invalid
        ));
        assert!(matches!(
            parse_handshake(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n"),
            Handshake::Invalid
        ));
    }

    fn mask_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
        let mask = [7u8, 11, 13, 17];
        let mut out = vec![0x80 | opcode];
        assert!(payload.len() <= 125);
        out.push(0x80 | payload.len() as u8);
        out.extend_from_slice(&mask);
        out.extend(
            payload
                .iter()
                .enumerate()
                .map(|(index, byte)| byte ^ mask[index % 4]),
        );
        out
    }

    #[test]
    fn test_conduit_round_trip_over_loopback() {
        let event_loop = Arc::new(EventLoop::new(true));
        event_loop.run().unwrap();

        let conduit = Arc::new(Conduit::new(Arc::clone(&event_loop)));
        let received: Arc<Mutex<Vec<(u64, EncodedMessage)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        conduit.set_receive_callback(Arc::new(move |client, message| {
            sink.lock().push((client.client_id(), message));
        }));

        let (started_tx, started_rx) = std::sync::mpsc::channel();
        conduit.start(Some(Box::new(move || {
            let _ = started_tx.send(());
        })));
        started_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("conduit did not start");
        let port = conduit.port();
        assert_ne!(port, 0);

        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        stream
            .write_all(
                b"GET /?id=99 HTTP/1.1\r\n\
                  Host: 127.0.0.1\r\n\
                  Upgrade: websocket\r\n\
                  Connection: Upgrade\r\n\
                  Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                  Sec-WebSocket-Version: 13\r\n\r\n",
            )
            .unwrap();

        let mut response = vec![0u8; 1024];
        let n = stream.read(&mut response).unwrap();
        let response = String::from_utf8_lossy(&response[..n]).to_string();
        assert!(response.starts_with("HTTP/1.1 101"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));

        // client -> server application message
        let mut options = BTreeMap::new();
        options.insert("route".to_string(), "ping".to_string());
        let body = codec::encode(&options, b"payload").unwrap();
        stream.write_all(&mask_frame(OPCODE_BINARY, &body)).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while received.lock().is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(4));
        }
        {
            let received = received.lock();
            assert_eq!(received.len(), 1);
            let (client_id, message) = &received[0];
            assert_eq!(*client_id, 99);
            assert_eq!(message.get("route"), "ping");
            assert_eq!(message.payload, b"payload");
        }

        // server -> client emit
        let clients = conduit.clients();
        assert_eq!(clients.len(), 1);
        let payload: Arc<[u8]> = Arc::from(b"pong".to_vec());
        let mut reply = BTreeMap::new();
        reply.insert("route".to_string(), "pong".to_string());
        assert!(clients[0].emit_binary(&reply, payload, None));

        let mut frame_head = [0u8; 2];
        stream.read_exact(&mut frame_head).unwrap();
        assert_eq!(frame_head[0], 0x82);
        let len = (frame_head[1] & 0x7f) as usize;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).unwrap();
        let message = codec::decode(&body).unwrap();
        assert_eq!(message.get("route"), "pong");
        assert_eq!(message.payload, b"pong");

        conduit.stop();
        assert!(!conduit.has(clients[0].id));
        event_loop.stop();
    }

    #[test]
    fn test_protocol_violation_closes_with_1002() {
        let event_loop = Arc::new(EventLoop::new(true));
        event_loop.run().unwrap();
        let conduit = Arc::new(Conduit::new(Arc::clone(&event_loop)));

        let (started_tx, started_rx) = std::sync::mpsc::channel();
        conduit.start(Some(Box::new(move || {
            let _ = started_tx.send(());
        })));
        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        let mut stream = TcpStream::connect(("127.0.0.1", conduit.port())).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        stream
            .write_all(
                b"GET / HTTP/1.1\r\n\
                  Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
            )
            .unwrap();
        let mut response = vec![0u8; 512];
        let n = stream.read(&mut response).unwrap();
        assert!(response[..n].starts_with(b"HTTP/1.1 101"));

        // unmasked client frame: protocol violation
        stream
            .write_all(&frame::encode_server_frame(OPCODE_BINARY, b"x"))
            .unwrap();

        let mut close = Vec::new();
        let mut byte = [0u8; 1];
        while let Ok(1) = stream.read(&mut byte) {
            close.push(byte[0]);
        }
        // close frame: FIN + opcode 8, status 1002
        assert!(close.len() >= 4);
        assert_eq!(close[0], 0x88);
        assert_eq!(u16::from_be_bytes([close[2], close[3]]), 1002);

        conduit.stop();
        event_loop.stop();
    }

    #[test]
    fn test_emit_refused_while_closing() {
        let event_loop = Arc::new(EventLoop::new(true));
        let (tx, _rx) = mpsc::unbounded_channel();
        let client = Client {
            id: 1,
            client_id: AtomicU64::new(0),
            handshake_done: AtomicBool::new(true),
            closing: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            writer: tx,
            queued_bytes: Arc::new(AtomicUsize::new(0)),
        };

        let payload: Arc<[u8]> = Arc::from(b"x".to_vec());
        assert!(!client.emit_binary(&BTreeMap::new(), payload, None));
        drop(event_loop);
    }
}
