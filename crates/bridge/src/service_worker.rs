//! Service-worker container contract.
//!
//! The container itself is a capability module; the bridge only needs
//! registration bookkeeping and scoped fetches, so that surface is a trait
//! the host implements. [`NullServiceWorkerContainer`] is the default for
//! hosts without workers.

use std::sync::Arc;

use webrun_core::headers::Headers;

/// How a worker script is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationKind {
    Classic,
    Module,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationState {
    Registered,
    Installing,
    Activated,
}

#[derive(Debug, Clone)]
pub struct RegistrationOptions {
    pub kind: RegistrationKind,
    pub scope: String,
    pub script_url: String,
    /// The scheme this registration serves, when registered for a protocol
    /// handler.
    pub scheme: String,
    pub id: u64,
}

/// A fetch dispatched into a worker.
#[derive(Clone)]
pub struct FetchRequest {
    pub method: String,
    pub scheme: String,
    pub hostname: String,
    pub pathname: String,
    pub query: String,
    pub headers: Headers,
    pub body: Option<Arc<[u8]>>,
    pub client: FetchClient,
}

/// The renderer client a fetch originates from.
#[derive(Clone, Default)]
pub struct FetchClient {
    pub id: u64,
    pub preload: String,
}

#[derive(Debug, Clone, Default)]
pub struct FetchResponse {
    /// `0` signals a failed fetch.
    pub status_code: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

pub type FetchCallback = Box<dyn FnOnce(FetchResponse) + Send>;

/// The container surface the bridge drives.
pub trait ServiceWorkerContainer: Send + Sync {
    fn has_registrations(&self) -> bool;

    /// Registers a worker, returning its registration id.
    fn register(&self, options: RegistrationOptions) -> u64;

    fn unregister(&self, id: u64);

    fn registration_state(&self, id: u64) -> Option<RegistrationState>;

    /// The registration whose script URL matches, if any. The developer
    /// file-watch path uses this to re-register changed workers.
    fn find_registration_by_script_url(&self, script_url: &str) -> Option<RegistrationOptions>;

    /// Dispatches a fetch. Returns `false` when no worker can take it; the
    /// callback fires at most once otherwise.
    fn fetch(&self, request: FetchRequest, callback: FetchCallback) -> bool;
}

/// A container with no workers: nothing registers, every fetch is refused.
#[derive(Default)]
pub struct NullServiceWorkerContainer;

impl ServiceWorkerContainer for NullServiceWorkerContainer {
    fn has_registrations(&self) -> bool {
        false
    }

    fn register(&self, options: RegistrationOptions) -> u64 {
        options.id
    }

    fn unregister(&self, _id: u64) {}

    fn registration_state(&self, _id: u64) -> Option<RegistrationState> {
        None
    }

    fn find_registration_by_script_url(&self, _script_url: &str) -> Option<RegistrationOptions> {
        None
    }

    fn fetch(&self, _request: FetchRequest, _callback: FetchCallback) -> bool {
        false
    }
}
