//! IPC message parsing.
//!
//! Commands arrive as `ipc://<command>?arg=value&…` URLs, optionally with a
//! request body. The `seq` argument correlates a command with the render
//! process promise awaiting it.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use url::Url;

use webrun_core::{Error, Result};

/// Cancellation handle registered by long-running command handlers.
/// The scheme layer invokes it when the peer aborts the request.
#[derive(Default)]
pub struct MessageCancellation {
    handler: Mutex<Option<Box<dyn Fn() + Send>>>,
}

impl MessageCancellation {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_handler(&self, handler: impl Fn() + Send + 'static) {
        *self.handler.lock() = Some(Box::new(handler));
    }

    pub fn cancel(&self) {
        if let Some(handler) = self.handler.lock().as_ref() {
            handler();
        }
    }
}

/// A parsed IPC command.
#[derive(Clone, Default)]
pub struct Message {
    pub uri: String,
    /// The command name (the URL authority).
    pub name: String,
    pub seq: String,
    pub args: BTreeMap<String, String>,
    pub is_http: bool,
    pub cancel: Option<Arc<MessageCancellation>>,
    pub bytes: Option<Arc<[u8]>>,
}

impl Message {
    /// Parses an `ipc://` URL.
    ///
    /// # Errors
    ///
    /// [`Error::BadRequest`] when the URL does not parse or is not an `ipc:`
    /// URL with a command name.
    pub fn parse(uri: &str) -> Result<Self> {
        let url = Url::parse(uri)
            .map_err(|err| Error::BadRequest(format!("invalid message URI: {err}")))?;

        if url.scheme() != "ipc" {
            return Err(Error::BadRequest(format!(
                "expected an ipc: URI, got {uri}"
            )));
        }

        let name = url.host_str().unwrap_or_default().to_string();
        if name.is_empty() {
            return Err(Error::BadRequest("message URI has no command".to_string()));
        }

        let args: BTreeMap<String, String> = url.query_pairs().into_owned().collect();
        let seq = args.get("seq").cloned().unwrap_or_default();

        Ok(Self {
            uri: uri.to_string(),
            name,
            seq,
            args,
            is_http: false,
            cancel: None,
            bytes: None,
        })
    }

    /// Returns the named argument, or the empty string when absent.
    pub fn get(&self, key: &str) -> String {
        self.args.get(key).cloned().unwrap_or_default()
    }

    pub fn has(&self, key: &str) -> bool {
        self.args.contains_key(key)
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("name", &self.name)
            .field("seq", &self.seq)
            .field("args", &self.args)
            .field("is_http", &self.is_http)
            .finish()
    }
}
