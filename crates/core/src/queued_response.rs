//! Queued-response cache.
//!
//! Handlers that produce bodies too large to inline into a script park them
//! here; the render process fetches them through `ipc://post?id=…` and the
//! entry is removed after the fetch. Entries also expire on a TTL sweep and
//! on shutdown, so an abandoned response cannot outlive its usefulness.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::crypto::rand64;
use crate::headers::Headers;
use crate::javascript;

/// Cache deadline applied on every insertion.
pub const QUEUED_RESPONSE_TTL_MS: i64 = 32 * 1024;

/// Streaming producer for server-sent events: `(name, data, finished)`,
/// returning `false` to abort the stream.
pub type EventStreamFn = Box<dyn FnMut(&str, &str, bool) -> bool + Send>;
/// Streaming producer for chunked transfer: `(chunk, finished)`.
pub type ChunkStreamFn = Box<dyn FnMut(&[u8], bool) -> bool + Send>;

/// Slot a handler fills in to turn a queued response into a stream. The IPC
/// layer installs the writer; the producer keeps the cell and drives it.
pub type EventStreamCell = Arc<Mutex<Option<EventStreamFn>>>;
pub type ChunkStreamCell = Arc<Mutex<Option<ChunkStreamFn>>>;

/// A response payload held on behalf of the render process.
#[derive(Default, Clone)]
pub struct QueuedResponse {
    /// `0` means "assign a random id on insertion".
    pub id: u64,
    /// Absolute deadline in milliseconds since the epoch. Assigned by the
    /// cache, never by the caller.
    pub ttl: i64,
    pub worker_id: String,
    pub headers: Headers,
    pub body: Option<Arc<[u8]>>,
    pub length: usize,
    pub event_stream: Option<EventStreamCell>,
    pub chunk_stream: Option<ChunkStreamCell>,
}

impl QueuedResponse {
    pub fn with_body(body: impl Into<Vec<u8>>) -> Self {
        let body: Vec<u8> = body.into();
        let length = body.len();
        Self {
            body: Some(Arc::from(body)),
            length,
            ..Default::default()
        }
    }
}

impl fmt::Debug for QueuedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedResponse")
            .field("id", &self.id)
            .field("ttl", &self.ttl)
            .field("worker_id", &self.worker_id)
            .field("length", &self.length)
            .field("event_stream", &self.event_stream.is_some())
            .field("chunk_stream", &self.chunk_stream.is_some())
            .finish()
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

/// The cache itself. Every access goes through the posts mutex.
#[derive(Default)]
pub struct QueuedResponses {
    posts: Mutex<HashMap<u64, QueuedResponse>>,
}

impl QueuedResponses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts (or replaces) a response, stamping its deadline.
    pub fn put(&self, id: u64, mut response: QueuedResponse) {
        response.ttl = now_ms() + QUEUED_RESPONSE_TTL_MS;
        self.posts.lock().insert(id, response);
    }

    pub fn get(&self, id: u64) -> Option<QueuedResponse> {
        self.posts.lock().get(&id).cloned()
    }

    pub fn has(&self, id: u64) -> bool {
        self.posts.lock().contains_key(&id)
    }

    /// True when any cached response holds exactly this body allocation.
    pub fn has_body(&self, body: &Arc<[u8]>) -> bool {
        self.posts
            .lock()
            .values()
            .any(|response| match &response.body {
                Some(held) => Arc::ptr_eq(held, body),
                None => false,
            })
    }

    pub fn remove(&self, id: u64) {
        self.posts.lock().remove(&id);
    }

    pub fn remove_all(&self) {
        self.posts.lock().clear();
    }

    /// Removes every response whose deadline has passed. Driven by a sweep;
    /// an expired entry may remain visible for up to one sweep interval.
    pub fn expire(&self) {
        let now = now_ms();
        self.posts.lock().retain(|_, response| response.ttl >= now);
    }

    pub fn len(&self) -> usize {
        self.posts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.lock().is_empty()
    }

    /// Inserts `response` (assigning a random id when `response.id == 0`) and
    /// returns the script the render process evaluates to dequeue it.
    ///
    /// The script is a wire contract: it dispatches
    /// `(id, seq, params, headers, { workerId })` into the
    /// `RuntimeQueuedResponses` global queue.
    pub fn create(&self, seq: &str, params: &str, mut response: QueuedResponse) -> String {
        if response.id == 0 {
            response.id = rand64();
        }

        let id = response.id.to_string();
        let worker_id = response.worker_id.clone();
        let headers = response.headers.str().trim().to_string();

        let source = format!(
            "const globals = await import('socket:internal/globals');\n\
             const id = `{id}`;\n\
             const seq = `{seq}`;\n\
             const workerId = `{worker_id}`.trim() || null;\n\
             const headers = `{headers}`\n\
             \x20 .trim()\n\
             \x20 .split(/[\\r\\n]+/)\n\
             \x20 .filter(Boolean)\n\
             \x20 .map((header) => header.trim());\n\
             \n\
             let params = `{params}`;\n\
             \n\
             try {{\n\
             \x20 params = JSON.parse(params);\n\
             }} catch (err) {{\n\
             \x20 console.error(err.stack || err, params);\n\
             }}\n\
             \n\
             globals.get('RuntimeQueuedResponses').dispatch(\n\
             \x20 id,\n\
             \x20 seq,\n\
             \x20 params,\n\
             \x20 headers,\n\
             \x20 {{ workerId }}\n\
             );"
        );

        let script = javascript::create_script("queued-response.js", &source);
        self.put(response.id, response);
        script
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_assigns_ttl() {
        let cache = QueuedResponses::new();
        let mut response = QueuedResponse::with_body("abc");
        response.ttl = 1; // caller-supplied ttl is ignored
        cache.put(7, response);

        let stored = cache.get(7).unwrap();
        let now = now_ms();
        assert!(stored.ttl > now);
        assert!(stored.ttl <= now + QUEUED_RESPONSE_TTL_MS);
    }

    #[test]
    fn test_round_trip_and_remove() {
        let cache = QueuedResponses::new();
        cache.put(1, QueuedResponse::with_body("hello"));
        assert!(cache.has(1));
        assert_eq!(cache.get(1).unwrap().length, 5);

        cache.remove(1);
        assert!(!cache.has(1));
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn test_has_body_compares_identity() {
        let cache = QueuedResponses::new();
        let response = QueuedResponse::with_body("abc");
        let body = response.body.clone().unwrap();
        cache.put(1, response);

        assert!(cache.has_body(&body));
        let other: Arc<[u8]> = Arc::from(b"abc".to_vec());
        assert!(!cache.has_body(&other));
    }

    #[test]
    fn test_expire_removes_past_deadlines() {
        let cache = QueuedResponses::new();
        for id in 1..=3 {
            cache.put(id, QueuedResponse::default());
        }
        {
            let mut posts = cache.posts.lock();
            for response in posts.values_mut() {
                response.ttl = now_ms() - 1;
            }
        }

        cache.expire();
        assert!(!cache.has(1));
        assert!(!cache.has(2));
        assert!(!cache.has(3));
    }

    #[test]
    fn test_expire_keeps_live_entries() {
        let cache = QueuedResponses::new();
        cache.put(1, QueuedResponse::default());
        cache.expire();
        assert!(cache.has(1));
    }

    #[test]
    fn test_create_script_shape() {
        let cache = QueuedResponses::new();
        let mut response = QueuedResponse::with_body("abc");
        response.headers.set("content-type", "text/plain");

        let script = cache.create("7", "{\"a\":1}", response);

        assert!(script.contains("const seq = `7`;"));
        assert!(script.contains("let params = `{\"a\":1}`;"));
        assert!(script.contains("const headers = `Content-Type: text/plain`"));
        assert!(script.contains("RuntimeQueuedResponses"));

        // the interpolated id is the cache key
        let id_line = script
            .lines()
            .find(|line| line.starts_with("const id = "))
            .unwrap();
        let digits: String = id_line.chars().filter(char::is_ascii_digit).collect();
        let id: u64 = digits.parse().unwrap();
        assert!(cache.has(id));
        assert!(cache.get(id).unwrap().ttl > now_ms());
    }

    #[test]
    fn test_create_keeps_explicit_id() {
        let cache = QueuedResponses::new();
        let mut response = QueuedResponse::with_body("abc");
        response.id = 42;
        let script = cache.create("1", "null", response);
        assert!(script.contains("const id = `42`;"));
        assert!(cache.has(42));
    }

    #[test]
    fn test_remove_all() {
        let cache = QueuedResponses::new();
        cache.put(1, QueuedResponse::default());
        cache.put(2, QueuedResponse::default());
        cache.remove_all();
        assert!(cache.is_empty());
    }
}
