//! Scheme-handler plumbing: requests, synthetic responses, and the handler
//! registries.
//!
//! The web view hands every URL with a registered scheme to
//! [`SchemeHandlers::handle`]; the handler produces a synthetic HTTP
//! response through a [`ResponseWriter`]. Writers are cloneable so
//! streaming producers (server-sent events, chunked transfers) and timeout
//! guards can write from wherever the work completes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::debug;
use url::Url;

use webrun_core::headers::Headers;
use webrun_core::{Error, Result};

struct RequestState {
    active: AtomicBool,
    cancelled: AtomicBool,
    cancel_handlers: Mutex<Vec<Box<dyn Fn() + Send>>>,
}

/// A request issued by the web view for a registered scheme.
#[derive(Clone)]
pub struct Request {
    pub method: String,
    pub scheme: String,
    pub hostname: String,
    /// Normalised to a leading `/` when non-empty, also for host-less URLs
    /// like `socket:fs`.
    pub pathname: String,
    pub query: String,
    pub fragment: String,
    pub headers: Headers,
    pub body: Option<Arc<[u8]>>,
    /// The renderer client issuing the request.
    pub client_id: u64,
    state: Arc<RequestState>,
}

impl Request {
    /// Parses a request URL.
    ///
    /// # Errors
    ///
    /// [`Error::BadRequest`] when the URL does not parse.
    pub fn new(method: impl Into<String>, url: &str) -> Result<Self> {
        let parsed = Url::parse(url)
            .map_err(|err| Error::BadRequest(format!("invalid request URL: {err}")))?;

        let mut pathname = parsed.path().to_string();
        if !pathname.is_empty() && !pathname.starts_with('/') {
            pathname.insert(0, '/');
        }

        Ok(Self {
            method: method.into(),
            scheme: parsed.scheme().to_string(),
            hostname: parsed.host_str().unwrap_or_default().to_string(),
            pathname,
            query: parsed.query().unwrap_or_default().to_string(),
            fragment: parsed.fragment().unwrap_or_default().to_string(),
            headers: Headers::new(),
            body: None,
            client_id: 0,
            state: Arc::new(RequestState {
                active: AtomicBool::new(true),
                cancelled: AtomicBool::new(false),
                cancel_handlers: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Reconstructs the request URL.
    pub fn url(&self) -> String {
        let mut url = format!("{}://{}{}", self.scheme, self.hostname, self.pathname);
        if !self.query.is_empty() {
            url.push('?');
            url.push_str(&self.query);
        }
        if !self.fragment.is_empty() {
            url.push('#');
            url.push_str(&self.fragment);
        }
        url
    }

    /// True until the response finishes or the peer aborts.
    pub fn is_active(&self) -> bool {
        self.state.active.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Registers a handler invoked if the peer aborts the request.
    pub fn on_cancel(&self, handler: impl Fn() + Send + 'static) {
        self.state.cancel_handlers.lock().push(Box::new(handler));
    }

    /// Marks the request aborted by the peer and runs cancel handlers.
    pub fn abort(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.active.store(false, Ordering::SeqCst);
        for handler in self.state.cancel_handlers.lock().iter() {
            handler();
        }
    }

    fn settle(&self) {
        self.state.active.store(false, Ordering::SeqCst);
    }
}

/// A finished synthetic response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }
}

pub type FinishCallback = Box<dyn FnOnce(Response) + Send>;

struct WriterState {
    response: Response,
    finished: bool,
    on_finish: Option<FinishCallback>,
}

/// Accumulates a response and delivers it exactly once.
#[derive(Clone)]
pub struct ResponseWriter {
    request: Request,
    state: Arc<Mutex<WriterState>>,
}

impl ResponseWriter {
    pub fn new(request: &Request, on_finish: FinishCallback) -> Self {
        Self {
            request: request.clone(),
            state: Arc::new(Mutex::new(WriterState {
                response: Response::default(),
                finished: false,
                on_finish: Some(on_finish),
            })),
        }
    }

    pub fn set_header(&self, name: &str, value: impl Into<webrun_core::headers::Value>) {
        self.state.lock().response.headers.set(name, value);
    }

    pub fn set_headers(&self, headers: &Headers) {
        let mut state = self.state.lock();
        for header in headers {
            state.response.headers.set(&header.name, header.value.as_str());
        }
    }

    pub fn write_head(&self, status: u16) {
        self.state.lock().response.status = status;
    }

    pub fn write(&self, bytes: &[u8]) {
        self.state.lock().response.body.extend_from_slice(bytes);
    }

    /// Appends one server-sent event.
    pub fn write_event(&self, name: &str, data: &str) {
        let mut event = String::new();
        if !name.is_empty() {
            event.push_str("event: ");
            event.push_str(name);
            event.push('\n');
        }
        if !data.is_empty() {
            event.push_str("data: ");
            event.push_str(data);
            event.push('\n');
        }
        if !event.is_empty() {
            event.push('\n');
            self.write(event.as_bytes());
        }
    }

    /// Points the render process at `location` without a body.
    pub fn redirect(&self, location: &str) {
        let mut state = self.state.lock();
        state.response.status = 302;
        state.response.headers.set("location", location);
    }

    /// Serialises `value` as the response body and finishes.
    pub fn send_json(&self, value: serde_json::Value) {
        {
            let mut state = self.state.lock();
            state
                .response
                .headers
                .set("content-type", "application/json");
            state.response.body = value.to_string().into_bytes();
        }
        self.finish();
    }

    /// Writes a failure body and finishes.
    pub fn fail(&self, message: &str) {
        self.fail_with(500, message);
    }

    /// Writes a failure body with an explicit status and finishes.
    pub fn fail_with(&self, status: u16, message: &str) {
        {
            let mut state = self.state.lock();
            state.response.status = status;
            state.response.body = message.as_bytes().to_vec();
        }
        self.finish();
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// Delivers the response. Later calls are no-ops, so a timeout guard and
    /// the normal path can race safely.
    pub fn finish(&self) {
        let callback = {
            let mut state = self.state.lock();
            if state.finished {
                return;
            }
            state.finished = true;
            state.on_finish.take()
        };

        self.request.settle();
        if let Some(callback) = callback {
            let response = { self.state.lock().response.clone() };
            callback(response);
        }
    }
}

pub type SchemeHandler = Arc<dyn Fn(Request, ResponseWriter) + Send + Sync>;

/// Scheme → handler registry.
#[derive(Default)]
pub struct SchemeHandlers {
    handlers: Mutex<HashMap<String, SchemeHandler>>,
}

impl SchemeHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler; `false` when the scheme is already taken.
    pub fn register(&self, scheme: &str, handler: SchemeHandler) -> bool {
        let mut handlers = self.handlers.lock();
        if handlers.contains_key(scheme) {
            return false;
        }
        handlers.insert(scheme.to_string(), handler);
        true
    }

    pub fn is_registered(&self, scheme: &str) -> bool {
        self.handlers.lock().contains_key(scheme)
    }

    /// Routes `request` to its scheme handler. Returns `false` for
    /// unregistered schemes.
    pub fn handle(&self, request: Request, on_finish: FinishCallback) -> bool {
        let handler = match self.handlers.lock().get(&request.scheme) {
            Some(handler) => Arc::clone(handler),
            None => {
                debug!(
                    target = "runtime.scheme",
                    scheme = %request.scheme,
                    "no handler for scheme"
                );
                return false;
            }
        };

        let writer = ResponseWriter::new(&request, on_finish);
        handler(request, writer);
        true
    }
}

/// Config-registered protocol handlers and their service-worker scopes.
#[derive(Default)]
pub struct ProtocolHandlers {
    handlers: Mutex<HashMap<String, ProtocolHandlerEntry>>,
}

#[derive(Debug, Clone, Default)]
struct ProtocolHandlerEntry {
    data: String,
    scope: String,
}

impl ProtocolHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a scheme; `false` when it already exists.
    pub fn register(&self, scheme: &str, data: &str) -> bool {
        let mut handlers = self.handlers.lock();
        if handlers.contains_key(scheme) {
            return false;
        }
        handlers.insert(
            scheme.to_string(),
            ProtocolHandlerEntry {
                data: data.to_string(),
                scope: String::new(),
            },
        );
        true
    }

    pub fn is_registered(&self, scheme: &str) -> bool {
        self.handlers.lock().contains_key(scheme)
    }

    pub fn data(&self, scheme: &str) -> String {
        self.handlers
            .lock()
            .get(scheme)
            .map(|entry| entry.data.clone())
            .unwrap_or_default()
    }

    pub fn set_service_worker_scope(&self, scheme: &str, scope: &str) {
        if let Some(entry) = self.handlers.lock().get_mut(scheme) {
            entry.scope = scope.to_string();
        }
    }

    pub fn service_worker_scope(&self, scheme: &str) -> String {
        self.handlers
            .lock()
            .get(scheme)
            .map(|entry| entry.scope.clone())
            .unwrap_or_default()
    }
}

/// Content type by file extension; `application/octet-stream` otherwise.
pub fn mime_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|extension| extension.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
        .as_str()
    {
        "html" | "htm" => "text/html",
        "js" | "mjs" => "text/javascript",
        "css" => "text/css",
        "json" => "application/json",
        "txt" => "text/plain",
        "xml" => "application/xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "wasm" => "application/wasm",
        "pdf" => "application/pdf",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        _ => "application/octet-stream",
    }
}
