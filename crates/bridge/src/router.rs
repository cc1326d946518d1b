//! IPC command router.
//!
//! Maps command names onto handlers and invokes them on the event loop.
//! Individual command implementations live with their capability modules;
//! the router only owns the table and the dispatch discipline.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use webrun_core::headers::Headers;
use webrun_core::{Core, Error, QueuedResponse};

use crate::message::Message;

/// Outcome of one routed command.
#[derive(Debug, Default)]
pub struct RouteResult {
    pub seq: String,
    /// The command that produced this result.
    pub source: String,
    pub value: serde_json::Value,
    pub headers: Headers,
    /// Large or streaming payloads travel out-of-band as a queued response.
    pub queued_response: QueuedResponse,
}

impl RouteResult {
    pub fn ok(message: &Message, data: serde_json::Value) -> Self {
        Self {
            seq: message.seq.clone(),
            source: message.name.clone(),
            value: serde_json::json!({ "source": message.name, "data": data }),
            ..Default::default()
        }
    }

    pub fn err(message: &Message, error: &Error) -> Self {
        let mut value = error.json();
        value["source"] = serde_json::Value::String(message.name.clone());
        Self {
            seq: message.seq.clone(),
            source: message.name.clone(),
            value,
            ..Default::default()
        }
    }

    pub fn json(&self) -> String {
        self.value.to_string()
    }
}

pub type RouteResultCallback = Box<dyn FnOnce(RouteResult) + Send>;
pub type RouteHandler = Arc<dyn Fn(Message, RouteResultCallback) + Send + Sync>;

/// The command table. See the module docs.
pub struct Router {
    core: Arc<Core>,
    table: Mutex<HashMap<String, RouteHandler>>,
}

impl Router {
    pub fn new(core: Arc<Core>) -> Self {
        Self {
            core,
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a handler for a command name, replacing any existing one.
    pub fn map(&self, name: impl Into<String>, handler: RouteHandler) {
        self.table.lock().insert(name.into(), handler);
    }

    pub fn unmap(&self, name: &str) {
        self.table.lock().remove(name);
    }

    pub fn has(&self, name: &str) -> bool {
        self.table.lock().contains_key(name)
    }

    /// Invokes the handler for `message` on the event loop. Returns `false`
    /// when no handler is mapped or the loop refuses the work.
    pub fn invoke(&self, message: Message, callback: RouteResultCallback) -> bool {
        let handler = match self.table.lock().get(&message.name) {
            Some(handler) => Arc::clone(handler),
            None => {
                debug!(target = "runtime.router", name = %message.name, "unroutable command");
                return false;
            }
        };

        self.core.dispatch(move || handler(message, callback))
    }

    /// Parses `uri`, attaches `bytes`, and invokes the handler.
    pub fn invoke_uri(
        &self,
        uri: &str,
        bytes: Option<Arc<[u8]>>,
        callback: RouteResultCallback,
    ) -> bool {
        let mut message = match Message::parse(uri) {
            Ok(message) => message,
            Err(err) => {
                debug!(target = "runtime.router", error = %err, "unparseable command");
                return false;
            }
        };
        message.bytes = bytes;
        self.invoke(message, callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;
    use webrun_core::CoreOptions;

    fn core() -> Arc<Core> {
        Arc::new(Core::new(CoreOptions {
            dedicated_loop_thread: true,
        }))
    }

    #[test]
    fn test_invoke_routes_to_handler_on_loop() {
        let core = core();
        let router = Router::new(Arc::clone(&core));
        router.map(
            "ping",
            Arc::new(|message, callback| {
                callback(RouteResult::ok(&message, serde_json::json!({"pong": true})));
            }),
        );

        let (tx, rx) = mpsc::channel();
        let invoked = router.invoke_uri(
            "ipc://ping?seq=9",
            None,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        assert!(invoked);

        let result = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(result.seq, "9");
        assert_eq!(result.value["data"]["pong"], true);
        core.shutdown();
    }

    #[test]
    fn test_invoke_unmapped_returns_false() {
        let core = core();
        let router = Router::new(Arc::clone(&core));
        assert!(!router.invoke_uri("ipc://nope?seq=1", None, Box::new(|_| {})));
        core.shutdown();
    }

    #[test]
    fn test_error_result_shape() {
        let message = Message::parse("ipc://fs.read?seq=2").unwrap();
        let result = RouteResult::err(&message, &Error::NotFound("no file".to_string()));
        assert_eq!(result.value["err"]["type"], "NotFoundError");
        assert_eq!(result.value["source"], "fs.read");
    }
}
