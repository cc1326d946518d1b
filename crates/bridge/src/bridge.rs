//! The IPC bridge: everything one web view needs from the core.
//!
//! A bridge owns the router, the navigator, and the scheme-handler table for
//! one web view, and knows how to evaluate scripts in its render process.
//! The built-in scheme handlers (`ipc`, `socket`, `node`, plus every
//! config-registered protocol scheme) are installed by
//! [`Bridge::configure_scheme_handlers`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use webrun_core::config::{Config, keys};
use webrun_core::javascript;
use webrun_core::{Core, QueuedResponse, cwd, rand64};

use crate::message::{Message, MessageCancellation};
use crate::navigator::Navigator;
use crate::preload::inject_html_preload;
use crate::router::{RouteResult, RouteResultCallback, Router};
use crate::scheme::{
    FinishCallback, ProtocolHandlers, Request, ResponseWriter, SchemeHandlers, mime_type,
};
use crate::service_worker::{
    FetchClient, FetchRequest, RegistrationKind, RegistrationOptions, RegistrationState,
    ServiceWorkerContainer,
};

/// Service-worker fetches time out after this and answer 408.
const SERVICE_WORKER_FETCH_TIMEOUT_MS: u64 = 32_000;

/// Node core modules importable through the `node:` scheme.
const ALLOWED_NODE_CORE_MODULES: &[&str] = &[
    "async_hooks",
    "assert",
    "buffer",
    "console",
    "constants",
    "child_process",
    "crypto",
    "dgram",
    "dns",
    "dns/promises",
    "events",
    "fs",
    "fs/constants",
    "fs/promises",
    "http",
    "https",
    "ip",
    "module",
    "net",
    "os",
    "os/constants",
    "path",
    "path/posix",
    "path/win32",
    "perf_hooks",
    "process",
    "querystring",
    "stream",
    "stream/web",
    "string_decoder",
    "sys",
    "test",
    "timers",
    "timers/promises",
    "tty",
    "url",
    "util",
    "vm",
    "worker_threads",
];

pub type EvaluateCallback = Box<dyn Fn(&str) + Send>;
pub type NavigateCallback = Box<dyn Fn(&str) + Send>;

/// The render-process side of the bridge: script evaluation plus the emit
/// and resolve statements. Holds the core weakly so closures parked on core
/// timers never keep the core alive.
pub(crate) struct RenderSink {
    core: Weak<Core>,
    evaluate: Mutex<Option<EvaluateCallback>>,
}

impl RenderSink {
    fn new(core: &Arc<Core>) -> Arc<Self> {
        Arc::new(Self {
            core: Arc::downgrade(core),
            evaluate: Mutex::new(None),
        })
    }

    fn set_evaluator(&self, callback: EvaluateCallback) {
        *self.evaluate.lock() = Some(callback);
    }

    fn evaluate(&self, script: &str) -> bool {
        let Some(core) = self.core.upgrade() else {
            return false;
        };
        if core.is_shutting_down() {
            return false;
        }
        match self.evaluate.lock().as_ref() {
            Some(evaluate) => {
                evaluate(script);
                true
            }
            None => false,
        }
    }

    pub(crate) fn emit(&self, name: &str, data: &str) -> bool {
        let encoded = javascript::encode_uri_component(data);
        self.evaluate(&javascript::emit_to_render_process(name, &encoded))
    }

    fn resolve(&self, seq: &str, status: &str, data: &str) -> bool {
        let encoded = javascript::encode_uri_component(data);
        self.evaluate(&javascript::resolve_to_render_process(seq, status, &encoded))
    }
}

/// Construction options for [`Bridge`].
#[derive(Default)]
pub struct BridgeOptions {
    /// The preload snippet injected into served HTML documents.
    pub preload: String,
    /// Where application resources live; the process working directory when
    /// unset.
    pub application_resources: Option<PathBuf>,
}

/// One web view's bridge to the core. See the module docs.
pub struct Bridge {
    pub id: u64,
    core: Arc<Core>,
    user_config: Config,
    router: Arc<Router>,
    navigator: Arc<Navigator>,
    scheme_handlers: Arc<SchemeHandlers>,
    protocol_handlers: Arc<ProtocolHandlers>,
    service_worker: Arc<dyn ServiceWorkerContainer>,
    sink: Arc<RenderSink>,
    navigate: Mutex<Option<NavigateCallback>>,
    preload: String,
    application_resources: PathBuf,
}

impl Bridge {
    pub fn new(
        core: Arc<Core>,
        user_config: Config,
        service_worker: Arc<dyn ServiceWorkerContainer>,
        options: BridgeOptions,
    ) -> Self {
        let sink = RenderSink::new(&core);
        let navigator_sink = Arc::clone(&sink);
        let navigator = Arc::new(Navigator::new(
            user_config.clone(),
            Arc::new(move |name, value| {
                navigator_sink.emit(name, &value.to_string());
            }),
        ));

        Self {
            id: rand64(),
            router: Arc::new(Router::new(Arc::clone(&core))),
            navigator,
            scheme_handlers: Arc::new(SchemeHandlers::new()),
            protocol_handlers: Arc::new(ProtocolHandlers::new()),
            service_worker,
            sink,
            navigate: Mutex::new(None),
            preload: options.preload,
            application_resources: options
                .application_resources
                .unwrap_or_else(|| PathBuf::from(cwd())),
            core,
            user_config,
        }
    }

    pub fn core(&self) -> &Arc<Core> {
        &self.core
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn navigator(&self) -> &Arc<Navigator> {
        &self.navigator
    }

    pub fn scheme_handlers(&self) -> &Arc<SchemeHandlers> {
        &self.scheme_handlers
    }

    /// Installs the host's script evaluator.
    pub fn set_evaluate_javascript_callback(&self, callback: EvaluateCallback) {
        self.sink.set_evaluator(callback);
    }

    pub fn set_navigate_callback(&self, callback: NavigateCallback) {
        *self.navigate.lock() = Some(callback);
    }

    /// Evaluates a script in the render process. `false` during shutdown or
    /// before an evaluator is installed.
    pub fn evaluate_javascript(&self, script: &str) -> bool {
        self.sink.evaluate(script)
    }

    /// Enqueues work onto the core loop; `false` during shutdown.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.core.dispatch(job)
    }

    pub fn navigate(&self, url: &str) -> bool {
        if self.core.is_shutting_down() {
            return false;
        }
        match self.navigate.lock().as_ref() {
            Some(navigate) => {
                navigate(url);
                true
            }
            None => false,
        }
    }

    /// Routes an `ipc://` URI into the command table.
    pub fn route(
        &self,
        uri: &str,
        bytes: Option<Arc<[u8]>>,
        callback: RouteResultCallback,
    ) -> bool {
        self.router.invoke_uri(uri, bytes, callback)
    }

    /// Sends a command result to the render process: as a queued-response
    /// script when a body is attached (or for unsolicited `-1` sequences),
    /// as a resolve statement otherwise.
    pub fn send(&self, seq: &str, data: &str, response: QueuedResponse) -> bool {
        if self.core.is_shutting_down() {
            return false;
        }

        if response.body.is_some() || seq == "-1" {
            let script = self.core.create_queued_response(seq, data, response);
            return self.sink.evaluate(&script);
        }

        let seq = if seq.is_empty() { "-1" } else { seq };
        self.sink.resolve(seq, "0", data)
    }

    /// Emits a named event into the render process.
    pub fn emit(&self, name: &str, data: &str) -> bool {
        if self.core.is_shutting_down() {
            return false;
        }
        self.sink.emit(name, data)
    }

    pub fn allowed_node_core_modules(&self) -> &'static [&'static str] {
        ALLOWED_NODE_CORE_MODULES
    }

    /// Handles a developer file change: reloads a matching service worker
    /// first (waiting for it to re-activate), then emits `filedidchange`.
    /// Honors `webview_watch`, `webview_watch_reload`, and
    /// `webview_service_worker_mode = "hybrid"`.
    pub fn notify_file_changed(&self, path: &Path) {
        if !self.user_config.is_truthy(keys::WEBVIEW_WATCH) {
            return;
        }

        let relative = path
            .strip_prefix(&self.application_resources)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        let payload = serde_json::json!({ "path": relative }).to_string();

        let reloadable = self.user_config.get(keys::WEBVIEW_SERVICE_WORKER_MODE) != "hybrid"
            && self.user_config.is_not_disabled(keys::WEBVIEW_WATCH_RELOAD);

        if reloadable {
            let script_url = format!(
                "socket://{}{}{}",
                self.user_config.get(keys::META_BUNDLE_IDENTIFIER),
                if relative.starts_with('/') { "" } else { "/" },
                relative
            );

            if let Some(registration) = self
                .service_worker
                .find_registration_by_script_url(&script_url)
            {
                self.service_worker.unregister(registration.id);

                let reload_timeout: u64 = self
                    .user_config
                    .get(keys::WEBVIEW_WATCH_SERVICE_WORKER_RELOAD_TIMEOUT)
                    .parse()
                    .unwrap_or(500);
                let service_worker = Arc::clone(&self.service_worker);
                let sink = Arc::clone(&self.sink);
                let weak_core = Arc::downgrade(&self.core);
                let event_payload = payload.clone();

                self.core.set_timeout(8, move || {
                    let id = service_worker.register(registration.clone());
                    let Some(core) = weak_core.upgrade() else {
                        return;
                    };
                    let poll_core = Weak::clone(&weak_core);
                    core.set_interval(8, move |cancel| {
                        let activated = service_worker.registration_state(id)
                            == Some(RegistrationState::Activated);
                        if !activated {
                            return;
                        }
                        cancel.cancel();

                        let Some(core) = poll_core.upgrade() else {
                            return;
                        };
                        let sink = Arc::clone(&sink);
                        let event_payload = event_payload.clone();
                        core.set_timeout(reload_timeout, move || {
                            sink.emit("filedidchange", &event_payload);
                        });
                    });
                });
                return;
            }
        }

        self.sink.emit("filedidchange", &payload);
    }

    /// Installs the built-in scheme handlers plus every protocol scheme the
    /// configuration registers.
    pub fn configure_scheme_handlers(&self) {
        self.register_ipc_scheme();
        self.register_socket_scheme();
        self.register_node_scheme();
        self.register_protocol_schemes();
    }

    /// Routes a scheme request, answering `false` for unregistered schemes.
    pub fn handle_scheme_request(&self, request: Request, on_finish: FinishCallback) -> bool {
        self.scheme_handlers.handle(request, on_finish)
    }

    fn register_ipc_scheme(&self) {
        let core = Arc::clone(&self.core);
        let router = Arc::clone(&self.router);

        self.scheme_handlers.register(
            "ipc",
            Arc::new(move |request, writer| {
                let mut message = match Message::parse(&request.url()) {
                    Ok(message) => message,
                    Err(err) => {
                        writer.write_head(400);
                        writer.send_json(err.json());
                        return;
                    }
                };

                // special case: fetch-and-remove of a queued response
                if message.name == "post" {
                    let id: u64 = match message.get("id").parse() {
                        Ok(id) => id,
                        Err(_) => {
                            writer.write_head(400);
                            writer.send_json(serde_json::json!({
                                "err": { "message": "Invalid 'id' given in parameters" }
                            }));
                            return;
                        }
                    };

                    let Some(response) = core.get_queued_response(id) else {
                        writer.write_head(404);
                        writer.send_json(serde_json::json!({
                            "err": {
                                "message":
                                    "A 'QueuedResponse' was not found for the given 'id' in parameters",
                                "type": "NotFoundError"
                            }
                        }));
                        return;
                    };

                    writer.write_head(200);
                    for header in &response.headers {
                        writer.set_header(&header.name, header.value.as_str());
                    }
                    if let Some(body) = &response.body {
                        writer.write(body);
                    }
                    writer.finish();
                    core.remove_queued_response(id);
                    return;
                }

                message.is_http = true;
                let cancel = MessageCancellation::new();
                message.cancel = Some(Arc::clone(&cancel));
                message.bytes = request.body.clone();
                request.on_cancel(move || cancel.cancel());

                let resolve_suppressed = message.get("resolve") == "false";
                let result_request = request.clone();
                let result_writer = writer.clone();

                let invoked = router.invoke(
                    message,
                    Box::new(move |result: RouteResult| {
                        if !result_request.is_active() {
                            return;
                        }
                        let writer = result_writer;

                        writer.set_headers(&result.headers);
                        writer.set_header("access-control-allow-origin", "*");
                        writer.set_header("access-control-allow-methods", "GET, POST, PUT, DELETE");
                        writer.set_header("access-control-allow-headers", "*");
                        writer.set_header("access-control-allow-credentials", "true");

                        if let Some(event_stream) = &result.queued_response.event_stream {
                            writer.set_header("content-type", "text/event-stream");
                            writer.set_header("cache-control", "no-store");

                            let stream_request = result_request.clone();
                            let stream_writer = writer.clone();
                            *event_stream.lock() = Some(Box::new(move |name, data, finished| {
                                if stream_request.is_cancelled() {
                                    return false;
                                }
                                stream_writer.write_head(200);
                                stream_writer.write_event(name, data);
                                if finished {
                                    stream_writer.finish();
                                }
                                true
                            }));
                            return;
                        }

                        if let Some(chunk_stream) = &result.queued_response.chunk_stream {
                            writer.set_header("transfer-encoding", "chunked");

                            let stream_request = result_request.clone();
                            let stream_writer = writer.clone();
                            *chunk_stream.lock() = Some(Box::new(move |chunk, finished| {
                                if stream_request.is_cancelled() {
                                    return false;
                                }
                                stream_writer.write_head(200);
                                stream_writer.write(chunk);
                                if finished {
                                    stream_writer.finish();
                                }
                                true
                            }));
                            return;
                        }

                        if let Some(body) = &result.queued_response.body {
                            writer.write(body);
                        } else {
                            writer.write(result.json().as_bytes());
                        }
                        writer.finish();
                    }),
                );

                if !invoked {
                    writer.write_head(404);
                    writer.send_json(serde_json::json!({
                        "err": {
                            "message": "Not found",
                            "type": "NotFoundError",
                            "url": request.url()
                        }
                    }));
                    return;
                }

                if resolve_suppressed {
                    writer.write_head(200);
                    writer.finish();
                }
            }),
        );
    }

    fn register_socket_scheme(&self) {
        let core = Arc::clone(&self.core);
        let config = self.user_config.clone();
        let navigator = Arc::clone(&self.navigator);
        let service_worker = Arc::clone(&self.service_worker);
        let preload = self.preload.clone();
        let resources = self.application_resources.clone();

        self.scheme_handlers.register(
            "socket",
            Arc::new(move |request, writer| {
                let bundle_identifier = config.get(keys::META_BUNDLE_IDENTIFIER);

                // application resource or service-worker request at
                // `socket://<bundle_identifier>/*`
                if request.hostname == bundle_identifier {
                    let resolved = navigator.location.resolve(&request.pathname, &resources);

                    if resolved.redirect {
                        if request.method == "GET" {
                            let mut location = resolved.pathname.clone();
                            if !request.query.is_empty() {
                                location.push('?');
                                location.push_str(&request.query);
                            }
                            if !request.fragment.is_empty() {
                                location.push('#');
                                location.push_str(&request.fragment);
                            }
                            writer.redirect(&location);
                            writer.finish();
                            return;
                        }
                    }

                    let mut resource_path = PathBuf::new();
                    if resolved.is_mount() {
                        resource_path = resolved.mount_filename().unwrap().to_path_buf();
                    } else if resolved.is_resource() {
                        resource_path = resources.join(&resolved.pathname[1..]);
                    } else if request.pathname.is_empty() || request.pathname == "/" {
                        let default_index = config.get(keys::WEBVIEW_DEFAULT_INDEX);
                        if !default_index.is_empty() {
                            resource_path = if let Some(stripped) =
                                default_index.strip_prefix("./")
                            {
                                resources.join(stripped)
                            } else if let Some(stripped) = default_index.strip_prefix('/') {
                                resources.join(stripped)
                            } else {
                                resources.join(default_index)
                            };
                        }
                    }

                    if !resource_path.as_os_str().is_empty() {
                        let content_location = resource_path
                            .strip_prefix(&resources)
                            .map(|relative| format!("/{}", relative.to_string_lossy()))
                            .unwrap_or_default();
                        serve_resource(&request, &writer, &resource_path, &content_location, &preload);
                        return;
                    }

                    // unknown path: let a service worker take it
                    if service_worker.has_registrations() {
                        let fetch = FetchRequest {
                            method: request.method.clone(),
                            scheme: request.scheme.clone(),
                            hostname: request.hostname.clone(),
                            pathname: request.pathname.clone(),
                            query: request.query.clone(),
                            headers: request.headers.clone(),
                            body: request.body.clone(),
                            client: FetchClient {
                                id: request.client_id,
                                preload: preload.clone(),
                            },
                        };
                        if fetch_via_service_worker(
                            &core,
                            service_worker.as_ref(),
                            &request,
                            &writer,
                            fetch,
                            "ServiceWorker request timed out.",
                        ) {
                            return;
                        }
                    }

                    writer.write_head(404);
                    writer.finish();
                    return;
                }

                // module import `socket:<module>`: proxy to the canonical
                // resource URL so the module is instantiated exactly once
                if request.hostname.is_empty() {
                    let mut pathname = request.pathname.clone();
                    if !pathname.ends_with(".js") {
                        pathname.push_str(".js");
                    }

                    let content_location = format!("/socket{pathname}");
                    let resource_path = resources.join(&content_location[1..]);

                    if resource_path.is_file() {
                        let url =
                            format!("socket://{bundle_identifier}/socket{pathname}");
                        let module = module_stub(&url);
                        writer.set_header("content-type", "text/javascript");
                        writer.set_header("content-length", module.len() as u64);
                        writer.set_header("content-location", content_location.as_str());
                        writer.write_head(200);
                        writer.write(module.as_bytes());
                    } else {
                        writer.write_head(404);
                    }
                    writer.finish();
                    return;
                }

                writer.write_head(404);
                writer.finish();
            }),
        );
    }

    fn register_node_scheme(&self) {
        let config = self.user_config.clone();
        let resources = self.application_resources.clone();

        self.scheme_handlers.register(
            "node",
            Arc::new(move |request, writer| {
                if !request.hostname.is_empty() {
                    writer.write_head(404);
                    writer.finish();
                    return;
                }

                let module_name = request.pathname.trim_start_matches('/');
                if !ALLOWED_NODE_CORE_MODULES.contains(&module_name) {
                    writer.write_head(404);
                    writer.finish();
                    return;
                }

                let mut pathname = request.pathname.clone();
                if !pathname.ends_with(".js") {
                    pathname.push_str(".js");
                }

                let mut content_location = format!("/socket{pathname}");
                let mut resource_path = resources.join(&content_location[1..]);

                if !resource_path.is_file() {
                    // `<module>/index.js` layout fallback
                    let trimmed = request.pathname.trim_end_matches('/');
                    content_location = format!("/socket{trimmed}/index.js");
                    resource_path = resources.join(&content_location[1..]);
                }

                if resource_path.is_file() {
                    let url = format!(
                        "socket://{}{}",
                        config.get(keys::META_BUNDLE_IDENTIFIER),
                        content_location
                    );
                    let module = module_stub(&url);
                    writer.set_header("content-type", "text/javascript");
                    writer.set_header("content-length", module.len() as u64);
                    writer.set_header("content-location", content_location.as_str());
                    writer.write_head(200);
                    writer.write(module.as_bytes());
                } else {
                    writer.write_head(404);
                }
                writer.finish();
            }),
        );
    }

    fn register_protocol_schemes(&self) {
        // `npm:` defaults to a bundled service worker. The default is staged
        // locally so configuration can claim the scheme with its own script
        // first; only the merged outcome reaches the registry.
        let mut schemes: BTreeMap<String, String> = BTreeMap::new();
        schemes.insert(
            "npm".to_string(),
            "/socket/npm/service-worker.js".to_string(),
        );

        for entry in self
            .user_config
            .get(keys::WEBVIEW_PROTOCOL_HANDLERS)
            .split(' ')
        {
            let scheme = entry.trim().trim_end_matches(':');
            if scheme.is_empty() {
                continue;
            }
            if self.protocol_handlers.register(scheme, "") {
                schemes.insert(scheme.to_string(), String::new());
            }
        }

        for (scheme, data) in self
            .user_config
            .with_prefix(keys::WEBVIEW_PROTOCOL_HANDLERS_PREFIX)
        {
            let scheme = scheme.trim().trim_end_matches(':');
            if scheme.is_empty() {
                continue;
            }
            if self.protocol_handlers.register(scheme, data) {
                schemes.insert(scheme.to_string(), data.to_string());
            }
        }

        // claim the npm default unless configuration already took the scheme
        if let Some(data) = schemes.get("npm") {
            self.protocol_handlers.register("npm", data);
        }

        for (scheme, script) in schemes {
            let mut script_url = script.trim().to_string();
            if script_url.is_empty() {
                // navigation-only scheme; nothing serves it
                continue;
            }
            if !script_url.starts_with('.') && !script_url.starts_with('/') {
                continue;
            }
            if let Some(stripped) = script_url.strip_prefix('.') {
                script_url = stripped.to_string();
            }

            let scope = match script_url.rfind('/') {
                Some(0) | None => "/".to_string(),
                Some(position) => script_url[..position].to_string(),
            };

            let registration_id = rand64();
            let absolute_script_url = format!(
                "socket://{}{}",
                self.user_config.get(keys::META_BUNDLE_IDENTIFIER),
                script_url
            );

            self.service_worker.register(RegistrationOptions {
                kind: RegistrationKind::Module,
                scope: scope.clone(),
                script_url: absolute_script_url,
                scheme: scheme.clone(),
                id: registration_id,
            });
            self.protocol_handlers
                .set_service_worker_scope(&scheme, &scope);

            let core = Arc::clone(&self.core);
            let config = self.user_config.clone();
            let service_worker = Arc::clone(&self.service_worker);
            let protocol_handlers = Arc::clone(&self.protocol_handlers);
            let preload = self.preload.clone();

            let registered = self.scheme_handlers.register(
                &scheme,
                Arc::new(move |request, writer| {
                    if !service_worker.has_registrations() {
                        writer.write_head(404);
                        writer.finish();
                        return;
                    }

                    let hostname = if request.scheme == "npm" {
                        config.get(keys::META_BUNDLE_IDENTIFIER).to_string()
                    } else {
                        request.hostname.clone()
                    };

                    let scope = protocol_handlers.service_worker_scope(&request.scheme);
                    let pathname = if scope.is_empty() {
                        request.pathname.clone()
                    } else {
                        format!("{scope}{}", request.pathname)
                    };

                    let fetch = FetchRequest {
                        method: request.method.clone(),
                        scheme: request.scheme.clone(),
                        hostname,
                        pathname,
                        query: request.query.clone(),
                        headers: request.headers.clone(),
                        body: request.body.clone(),
                        client: FetchClient {
                            id: request.client_id,
                            preload: preload.clone(),
                        },
                    };

                    if !fetch_via_service_worker(
                        &core,
                        service_worker.as_ref(),
                        &request,
                        &writer,
                        fetch,
                        "Protocol handler ServiceWorker request timed out.",
                    ) {
                        writer.write_head(404);
                        writer.finish();
                    }
                }),
            );

            if !registered {
                debug!(target = "runtime.bridge", %scheme, "scheme already registered");
            }
        }
    }
}

/// Serves a file resource: `OPTIONS` answers CORS, `HEAD` answers metadata,
/// `GET` streams the body (HTML gets the preload injected).
fn serve_resource(
    request: &Request,
    writer: &ResponseWriter,
    resource_path: &Path,
    content_location: &str,
    preload: &str,
) {
    if !resource_path.is_file() {
        writer.write_head(404);
        writer.finish();
        return;
    }

    if !content_location.is_empty() {
        writer.set_header("content-location", content_location);
    }

    match request.method.as_str() {
        "OPTIONS" => {
            writer.set_header("access-control-allow-origin", "*");
            writer.set_header("access-control-allow-methods", "GET, HEAD");
            writer.set_header("access-control-allow-headers", "*");
            writer.set_header("access-control-allow-credentials", "true");
            writer.write_head(200);
        }
        "HEAD" => {
            let content_type = mime_type(resource_path);
            writer.set_header("content-type", content_type);
            if let Ok(metadata) = std::fs::metadata(resource_path) {
                writer.set_header("content-length", metadata.len());
            }
            writer.write_head(200);
        }
        _ => {
            let contents = match std::fs::read(resource_path) {
                Ok(contents) => contents,
                Err(err) => {
                    writer.fail(&format!("failed to read resource: {err}"));
                    return;
                }
            };

            let content_type = mime_type(resource_path);
            if content_type == "text/html" {
                let html =
                    inject_html_preload(&String::from_utf8_lossy(&contents), preload);
                writer.set_header("content-type", content_type);
                writer.set_header("content-length", html.len() as u64);
                writer.write_head(200);
                writer.write(html.as_bytes());
            } else {
                writer.set_header("content-type", content_type);
                writer.set_header("content-length", contents.len() as u64);
                writer.write_head(200);
                writer.write(&contents);
            }
        }
    }

    writer.finish();
}

/// Dispatches a fetch into the service worker, arming the 32 s timeout that
/// answers 408 when the request is still active. Returns whether a worker
/// accepted the fetch.
fn fetch_via_service_worker(
    core: &Arc<Core>,
    service_worker: &dyn ServiceWorkerContainer,
    request: &Request,
    writer: &ResponseWriter,
    fetch: FetchRequest,
    timeout_message: &'static str,
) -> bool {
    let fetch_request = request.clone();
    let fetch_writer = writer.clone();
    let fetched = service_worker.fetch(
        fetch,
        Box::new(move |response| {
            if !fetch_request.is_active() {
                return;
            }
            if response.status_code == 0 {
                fetch_writer.fail("ServiceWorker request failed");
            } else {
                fetch_writer.set_headers(&response.headers);
                fetch_writer.write_head(response.status_code);
                fetch_writer.write(&response.body);
                fetch_writer.finish();
            }
        }),
    );

    if fetched {
        let timeout_request = request.clone();
        let timeout_writer = writer.clone();
        core.set_timeout(SERVICE_WORKER_FETCH_TIMEOUT_MS, move || {
            if timeout_request.is_active() {
                timeout_writer.fail_with(408, timeout_message);
            }
        });
    }

    fetched
}

/// The re-export stub served for `socket:<module>` and `node:<module>`
/// imports, proxying to the canonical resource URL.
fn module_stub(url: &str) -> String {
    format!("import module from '{url}'\nexport * from '{url}'\nexport default module")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service_worker::NullServiceWorkerContainer;
    use std::sync::mpsc;
    use std::time::Duration;
    use webrun_core::CoreOptions;

    fn test_bridge(resources: PathBuf, config: Config) -> Bridge {
        let core = Arc::new(Core::new(CoreOptions {
            dedicated_loop_thread: true,
        }));
        Bridge::new(
            core,
            config,
            Arc::new(NullServiceWorkerContainer),
            BridgeOptions {
                preload: "globalThis.__preload__ = true;".to_string(),
                application_resources: Some(resources),
            },
        )
    }

    fn respond(bridge: &Bridge, method: &str, url: &str) -> crate::scheme::Response {
        let (tx, rx) = mpsc::channel();
        let handled = bridge.handle_scheme_request(
            Request::new(method, url).unwrap(),
            Box::new(move |response| {
                let _ = tx.send(response);
            }),
        );
        assert!(handled, "no handler for {url}");
        rx.recv_timeout(Duration::from_secs(2)).unwrap()
    }

    fn config_with_bundle() -> Config {
        Config::from([(keys::META_BUNDLE_IDENTIFIER, "com.example.app")])
    }

    #[test]
    fn test_ipc_post_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = test_bridge(dir.path().to_path_buf(), config_with_bundle());
        bridge.configure_scheme_handlers();

        let mut queued = QueuedResponse::with_body("payload bytes");
        queued.headers.set("content-type", "text/plain");
        bridge.core().put_queued_response(7, queued);

        let response = respond(&bridge, "GET", "ipc://post?id=7");
        assert_eq!(response.status, 200);
        assert_eq!(response.headers.get("content-type").value, "text/plain");
        assert_eq!(response.body, b"payload bytes");

        // fetched exactly once
        assert!(!bridge.core().has_queued_response(7));
        let response = respond(&bridge, "GET", "ipc://post?id=7");
        assert_eq!(response.status, 404);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["err"]["type"], "NotFoundError");

        bridge.core().shutdown();
    }

    #[test]
    fn test_ipc_post_bad_id() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = test_bridge(dir.path().to_path_buf(), config_with_bundle());
        bridge.configure_scheme_handlers();

        let response = respond(&bridge, "GET", "ipc://post?id=not-a-number");
        assert_eq!(response.status, 400);
        bridge.core().shutdown();
    }

    #[test]
    fn test_ipc_routes_command_with_cors() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = test_bridge(dir.path().to_path_buf(), config_with_bundle());
        bridge.configure_scheme_handlers();
        bridge.router().map(
            "platform.info",
            Arc::new(|message, callback| {
                callback(RouteResult::ok(&message, serde_json::json!({"os": "linux"})));
            }),
        );

        let response = respond(&bridge, "GET", "ipc://platform.info?seq=1");
        assert_eq!(response.status, 200);
        assert_eq!(response.headers.get("access-control-allow-origin").value, "*");
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["data"]["os"], "linux");

        let response = respond(&bridge, "GET", "ipc://no.such.command?seq=2");
        assert_eq!(response.status, 404);
        bridge.core().shutdown();
    }

    #[test]
    fn test_socket_serves_resources_with_preload() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("index.html"),
            "<html><head></head><body>hi</body></html>",
        )
        .unwrap();
        std::fs::write(dir.path().join("app.js"), "export default 1").unwrap();

        let bridge = test_bridge(dir.path().to_path_buf(), config_with_bundle());
        bridge.configure_scheme_handlers();

        let response = respond(&bridge, "GET", "socket://com.example.app/index.html");
        assert_eq!(response.status, 200);
        assert_eq!(response.headers.get("content-type").value, "text/html");
        let body = String::from_utf8(response.body).unwrap();
        assert!(body.contains("globalThis.__preload__ = true;"));

        let response = respond(&bridge, "GET", "socket://com.example.app/app.js");
        assert_eq!(response.status, 200);
        assert_eq!(
            response.headers.get("content-type").value,
            "text/javascript"
        );
        assert_eq!(response.body, b"export default 1");

        let response = respond(&bridge, "HEAD", "socket://com.example.app/app.js");
        assert_eq!(response.status, 200);
        assert!(response.body.is_empty());
        assert_eq!(response.headers.get("content-length").value, "16");

        let response = respond(&bridge, "OPTIONS", "socket://com.example.app/app.js");
        assert_eq!(response.status, 200);
        assert_eq!(response.headers.get("access-control-allow-origin").value, "*");

        let response = respond(&bridge, "GET", "socket://com.example.app/missing");
        assert_eq!(response.status, 404);
        bridge.core().shutdown();
    }

    #[test]
    fn test_socket_redirects_to_directory_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/index.html"), "<html></html>").unwrap();

        let bridge = test_bridge(dir.path().to_path_buf(), config_with_bundle());
        bridge.configure_scheme_handlers();

        let response = respond(&bridge, "GET", "socket://com.example.app/docs?tab=1");
        assert_eq!(response.status, 302);
        assert_eq!(response.headers.get("location").value, "/docs/?tab=1");
        bridge.core().shutdown();
    }

    #[test]
    fn test_socket_default_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.html"), "<html></html>").unwrap();

        let mut config = config_with_bundle();
        config.set(keys::WEBVIEW_DEFAULT_INDEX, "./main.html");
        let bridge = test_bridge(dir.path().to_path_buf(), config);
        bridge.configure_scheme_handlers();

        let response = respond(&bridge, "GET", "socket://com.example.app/");
        assert_eq!(response.status, 200);
        assert_eq!(response.headers.get("content-type").value, "text/html");
        bridge.core().shutdown();
    }

    #[test]
    fn test_socket_module_proxy_stub() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("socket")).unwrap();
        std::fs::write(dir.path().join("socket/fs.js"), "// fs module").unwrap();

        let bridge = test_bridge(dir.path().to_path_buf(), config_with_bundle());
        bridge.configure_scheme_handlers();

        let response = respond(&bridge, "GET", "socket:fs");
        assert_eq!(response.status, 200);
        let body = String::from_utf8(response.body).unwrap();
        assert_eq!(
            body,
            "import module from 'socket://com.example.app/socket/fs.js'\n\
             export * from 'socket://com.example.app/socket/fs.js'\n\
             export default module"
        );
        assert_eq!(
            response.headers.get("content-location").value,
            "/socket/fs.js"
        );

        let response = respond(&bridge, "GET", "socket:missing");
        assert_eq!(response.status, 404);
        bridge.core().shutdown();
    }

    #[test]
    fn test_node_module_allow_list() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("socket")).unwrap();
        std::fs::write(dir.path().join("socket/fs.js"), "// fs").unwrap();
        std::fs::write(dir.path().join("socket/leftpad.js"), "// nope").unwrap();

        let bridge = test_bridge(dir.path().to_path_buf(), config_with_bundle());
        bridge.configure_scheme_handlers();

        let response = respond(&bridge, "GET", "node:fs");
        assert_eq!(response.status, 200);
        assert!(
            String::from_utf8(response.body)
                .unwrap()
                .contains("socket://com.example.app/socket/fs.js")
        );

        // present on disk but not a node core module
        let response = respond(&bridge, "GET", "node:leftpad");
        assert_eq!(response.status, 404);
        bridge.core().shutdown();
    }

    #[test]
    fn test_send_uses_queued_response_for_bodies() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = test_bridge(dir.path().to_path_buf(), config_with_bundle());

        let scripts: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&scripts);
        bridge.set_evaluate_javascript_callback(Box::new(move |script| {
            sink.lock().push(script.to_string());
        }));

        assert!(bridge.send("3", "{\"ok\":true}", QueuedResponse::with_body("big")));
        assert!(bridge.send("4", "plain result", QueuedResponse::default()));
        assert!(bridge.emit("ready", "now"));

        let scripts = scripts.lock();
        assert!(scripts[0].contains("RuntimeQueuedResponses"));
        assert!(scripts[1].contains("__runtime_resolve__(`4`, `0`, `plain%20result`)"));
        assert!(scripts[2].contains("__runtime_emit__(`ready`, `now`)"));

        bridge.core().shutdown();
    }

    #[test]
    fn test_send_refused_after_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = test_bridge(dir.path().to_path_buf(), config_with_bundle());
        bridge.set_evaluate_javascript_callback(Box::new(|_| {}));

        bridge.core().shutdown();
        assert!(!bridge.send("1", "x", QueuedResponse::default()));
        assert!(!bridge.emit("event", "x"));
        assert!(!bridge.dispatch(|| {}));
    }

    #[test]
    fn test_notify_file_changed_emits_event() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_with_bundle();
        config.set(keys::WEBVIEW_WATCH, "true");
        let bridge = test_bridge(dir.path().to_path_buf(), config);

        let scripts: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&scripts);
        bridge.set_evaluate_javascript_callback(Box::new(move |script| {
            sink.lock().push(script.to_string());
        }));

        bridge.notify_file_changed(&dir.path().join("src/app.js"));
        let scripts = scripts.lock();
        assert_eq!(scripts.len(), 1);
        assert!(scripts[0].contains("__runtime_emit__(`filedidchange`"));

        bridge.core().shutdown();
    }

    #[test]
    fn test_notify_file_changed_disabled_without_watch() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = test_bridge(dir.path().to_path_buf(), config_with_bundle());

        let scripts: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&scripts);
        bridge.set_evaluate_javascript_callback(Box::new(move |script| {
            sink.lock().push(script.to_string());
        }));

        bridge.notify_file_changed(&dir.path().join("src/app.js"));
        assert!(scripts.lock().is_empty());
        bridge.core().shutdown();
    }
}
