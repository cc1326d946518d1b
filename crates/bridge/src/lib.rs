//! IPC bridge between a web view and the runtime core.
//!
//! Each hosted web view gets one [`Bridge`]: it parses `ipc://` messages,
//! routes commands, answers scheme-handler requests (`ipc`, `socket`,
//! `node`, and config-registered protocol schemes), enforces the navigation
//! policy, and evaluates result scripts in the render process.
//!
//! The concrete capability modules (filesystem, sockets, notifications, …)
//! register their command handlers on the [`router::Router`]; the service
//! worker container is a host-implemented trait.

pub mod bridge;
pub mod message;
pub mod navigator;
pub mod preload;
pub mod router;
pub mod scheme;
pub mod service_worker;

pub use bridge::{Bridge, BridgeOptions, EvaluateCallback, NavigateCallback};
pub use message::{Message, MessageCancellation};
pub use navigator::{Location, Navigator, Resolution, ResolutionKind};
pub use preload::inject_html_preload;
pub use router::{RouteHandler, RouteResult, RouteResultCallback, Router};
pub use scheme::{
    ProtocolHandlers, Request, Response, ResponseWriter, SchemeHandlers, mime_type,
};
pub use service_worker::{
    FetchCallback, FetchClient, FetchRequest, FetchResponse, NullServiceWorkerContainer,
    RegistrationKind, RegistrationOptions, RegistrationState, ServiceWorkerContainer,
};
