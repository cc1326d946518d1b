//! Navigation: location resolution, mount roots, and the navigation policy.
//!
//! The web view asks two questions answered here: "what file does this
//! pathname mean?" (the location resolver, including user-configured mount
//! roots) and "may this URL be navigated to at all?" (the allow-list).
//! Application-protocol URLs are never navigated; they surface to the
//! application as an `applicationurl` event instead.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use tracing::debug;
use url::Url;

use webrun_core::config::{Config, Platform, keys};
use webrun_core::cwd;

/// Sink for events surfaced to the application (`applicationurl`).
pub type EventSink = Arc<dyn Fn(&str, serde_json::Value) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ResolutionKind {
    #[default]
    Unknown,
    Resource,
    Mount {
        filename: PathBuf,
    },
}

/// Outcome of resolving a request pathname against a directory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Resolution {
    pub pathname: String,
    pub redirect: bool,
    pub kind: ResolutionKind,
}

impl Resolution {
    pub fn is_unknown(&self) -> bool {
        self.kind == ResolutionKind::Unknown
    }

    pub fn is_resource(&self) -> bool {
        self.kind == ResolutionKind::Resource
    }

    pub fn is_mount(&self) -> bool {
        matches!(self.kind, ResolutionKind::Mount { .. })
    }

    pub fn mount_filename(&self) -> Option<&Path> {
        match &self.kind {
            ResolutionKind::Mount { filename } => Some(filename),
            _ => None,
        }
    }
}

/// A user-configured mount root: a host directory exposed under a virtual
/// URL prefix.
#[derive(Debug, Clone)]
struct Mount {
    host_path: PathBuf,
    virtual_prefix: String,
}

/// Resolves request pathnames to files.
///
/// Direct file navigation always wins, `/foo/index.html` has precedence
/// over `foo.html`, and `/foo` redirects to `/foo/` when `/foo/index.html`
/// exists.
#[derive(Debug, Clone, Default)]
pub struct Location {
    mounts: Vec<Mount>,
}

impl Location {
    /// Builds the mount table from `webview_navigator_mounts_*` entries.
    /// Platform-prefixed keys apply only to the matching platform; `~` and
    /// the `$HOST_*` variables expand to host directories.
    pub fn new(config: &Config) -> Self {
        Self::with_platform(config, Platform::current())
    }

    fn with_platform(config: &Config, platform: Platform) -> Self {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| cwd());
        let container = cwd();

        let mut mounts = Vec::new();
        for (key, virtual_prefix) in config.with_prefix(keys::WEBVIEW_NAVIGATOR_MOUNTS_PREFIX) {
            if key.starts_with("android") && !platform.android {
                continue;
            }
            if key.starts_with("ios") && !platform.ios {
                continue;
            }
            if key.starts_with("linux") && !platform.linux {
                continue;
            }
            if key.starts_with("mac") && !platform.mac {
                continue;
            }
            if key.starts_with("win") && !platform.win {
                continue;
            }

            let path = key
                .trim_start_matches("android_")
                .trim_start_matches("ios_")
                .trim_start_matches("linux_")
                .trim_start_matches("mac_")
                .trim_start_matches("win_")
                .replace("$HOST_HOME", &home)
                .replace('~', &home)
                .replace("$HOST_CONTAINER", &container)
                .replace("$HOST_PROCESS_WORKING_DIRECTORY", &container);

            mounts.push(Mount {
                host_path: PathBuf::from(path),
                virtual_prefix: virtual_prefix.to_string(),
            });
        }

        Self { mounts }
    }

    /// Resolves `pathname`, trying mount roots whose virtual prefix matches
    /// before falling back to `dirname`.
    pub fn resolve(&self, pathname: &str, dirname: &Path) -> Resolution {
        for mount in &self.mounts {
            if let Some(relative) = pathname.strip_prefix(&mount.virtual_prefix) {
                let mut resolution = resolve_location_pathname(relative, &mount.host_path);
                if !resolution.pathname.is_empty() {
                    let filename = mount.host_path.join(&resolution.pathname[1..]);
                    resolution.kind = ResolutionKind::Mount { filename };
                    return resolution;
                }
            }
        }

        resolve_location_pathname(pathname, dirname)
    }
}

/// The three resolution rules, in order: the exact file, a directory index
/// (redirecting `/foo` to `/foo/`), then the `.html`-suffixed sibling.
fn resolve_location_pathname(pathname: &str, dirname: &Path) -> Resolution {
    let relative = pathname.strip_prefix('/').unwrap_or(pathname);
    let filename = dirname.join(relative);

    if filename.is_file() {
        return Resolution {
            pathname: rooted(&filename, dirname),
            redirect: false,
            kind: ResolutionKind::Resource,
        };
    }

    let index = filename.join("index.html");
    if index.is_file() {
        if pathname.ends_with('/') {
            return Resolution {
                pathname: rooted(&index, dirname),
                redirect: false,
                kind: ResolutionKind::Resource,
            };
        }
        return Resolution {
            pathname: format!("{}/", rooted(&filename, dirname)),
            redirect: true,
            kind: ResolutionKind::Resource,
        };
    }

    let html = filename.with_extension("html");
    if html.is_file() {
        return Resolution {
            pathname: rooted(&html, dirname),
            redirect: false,
            kind: ResolutionKind::Resource,
        };
    }

    Resolution::default()
}

fn rooted(filename: &Path, dirname: &Path) -> String {
    let relative = filename.strip_prefix(dirname).unwrap_or(filename);
    let mut pathname = String::from("/");
    pathname.push_str(&relative.to_string_lossy().replace('\\', "/"));
    pathname
}

/// The dev-server origin allowed during development.
pub fn dev_host() -> String {
    std::env::var("WEBRUN_DEV_HOST").unwrap_or_else(|_| "http://localhost:3000".to_string())
}

/// Answers navigation-policy questions for the web view.
pub struct Navigator {
    config: Config,
    pub location: Location,
    events: EventSink,
}

impl Navigator {
    pub fn new(config: Config, events: EventSink) -> Self {
        let location = Location::new(&config);
        Self {
            config,
            location,
            events,
        }
    }

    /// Decides whether the web view may navigate from `current_url` to
    /// `requested_url`. Application links and application-protocol URLs are
    /// refused and surfaced as an `applicationurl` event.
    pub fn handle_navigation_request(&self, current_url: &str, requested_url: &str) -> bool {
        let app_links = self.config.get(keys::META_APPLICATION_LINKS);
        if !app_links.is_empty() {
            if let Some(host) = Url::parse(current_url).ok().and_then(|url| {
                url.host_str().map(str::to_string)
            }) {
                let matches_link = app_links
                    .split(' ')
                    .filter(|entry| !entry.trim().is_empty())
                    .any(|entry| entry.split('?').next() == Some(host.as_str()));
                if matches_link {
                    (self.events)(
                        "applicationurl",
                        serde_json::json!({ "url": requested_url }),
                    );
                    return false;
                }
            }
        }

        let application_protocol = self.config.get(keys::META_APPLICATION_PROTOCOL);
        if !application_protocol.is_empty()
            && requested_url.starts_with(application_protocol)
            && !requested_url.starts_with(&format!(
                "socket://{}",
                self.config.get(keys::META_BUNDLE_IDENTIFIER)
            ))
        {
            (self.events)(
                "applicationurl",
                serde_json::json!({ "url": requested_url }),
            );
            return false;
        }

        if !self.is_navigation_request_allowed(requested_url) {
            debug!(target = "runtime.navigator", url = requested_url, "navigation refused");
            return false;
        }

        true
    }

    /// The allow-list proper: configured protocol-handler schemes, the
    /// `webview_navigator_policies_allowed` globs, and the built-in
    /// `socket:` / `npm:` / dev-host origins.
    pub fn is_navigation_request_allowed(&self, requested_url: &str) -> bool {
        for entry in self
            .config
            .get(keys::WEBVIEW_PROTOCOL_HANDLERS)
            .split(' ')
        {
            let scheme = entry.trim().trim_end_matches(':');
            if !scheme.is_empty() && requested_url.starts_with(&format!("{scheme}:")) {
                return true;
            }
        }

        for (scheme, _) in self
            .config
            .with_prefix(keys::WEBVIEW_PROTOCOL_HANDLERS_PREFIX)
        {
            let scheme = scheme.trim().trim_end_matches(':');
            if !scheme.is_empty() && requested_url.starts_with(&format!("{scheme}:")) {
                return true;
            }
        }

        for pattern in self
            .config
            .get(keys::WEBVIEW_NAVIGATOR_POLICIES_ALLOWED)
            .split(' ')
        {
            let pattern = pattern.trim();
            if pattern.is_empty() {
                continue;
            }
            if let Some(regex) = glob_to_regex(pattern) {
                if regex.is_match(requested_url) {
                    return true;
                }
            }
        }

        requested_url.starts_with("socket:")
            || requested_url.starts_with("npm:")
            || requested_url.starts_with(&dev_host())
    }
}

/// Turns an allow-list glob into an anchored regex: `*` becomes `(.*)`,
/// `.` and `/` are escaped.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let escaped = pattern
        .replace('.', "\\.")
        .replace('/', "\\/")
        .replace('*', "(.*)");
    Regex::new(&format!("^{escaped}$")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn write(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    /// Tree:
    ///   a.html
    ///   b/index.html
    ///   c/x.html
    fn resolver_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("a.html"), "a");
        write(&dir.path().join("b/index.html"), "b");
        write(&dir.path().join("c/x.html"), "x");
        dir
    }

    #[test]
    fn test_resolver_precedence() {
        let dir = resolver_tree();
        let location = Location::default();

        let resolved = location.resolve("/a", dir.path());
        assert_eq!(resolved.pathname, "/a.html");
        assert!(!resolved.redirect);

        let resolved = location.resolve("/b", dir.path());
        assert_eq!(resolved.pathname, "/b/");
        assert!(resolved.redirect);

        let resolved = location.resolve("/b/", dir.path());
        assert_eq!(resolved.pathname, "/b/index.html");
        assert!(!resolved.redirect);

        let resolved = location.resolve("/c/x", dir.path());
        assert_eq!(resolved.pathname, "/c/x.html");
        assert!(!resolved.redirect);

        assert!(location.resolve("/missing", dir.path()).is_unknown());
    }

    #[test]
    fn test_direct_file_wins_over_index() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("a-conflict-index.html"), "file");
        write(&dir.path().join("a-conflict-index/index.html"), "index");

        let location = Location::default();
        let resolved = location.resolve("/a-conflict-index.html", dir.path());
        assert_eq!(resolved.pathname, "/a-conflict-index.html");

        // without the extension the directory index takes over via redirect
        let resolved = location.resolve("/a-conflict-index", dir.path());
        assert!(resolved.redirect);
    }

    #[test]
    fn test_mount_resolution() {
        let media = tempfile::tempdir().unwrap();
        write(&media.path().join("movie.html"), "m");
        let resources = tempfile::tempdir().unwrap();

        let config = Config::from([(
            format!(
                "webview_navigator_mounts_{}",
                media.path().to_string_lossy()
            )
            .as_str(),
            "/media",
        )]);
        let location = Location::new(&config);

        let resolved = location.resolve("/media/movie", resources.path());
        assert!(resolved.is_mount());
        assert_eq!(resolved.pathname, "/movie.html");
        assert_eq!(
            resolved.mount_filename().unwrap(),
            media.path().join("movie.html")
        );

        // outside the prefix, mounts are ignored
        assert!(location.resolve("/other", resources.path()).is_unknown());
    }

    fn navigator_with(config: Config) -> (Navigator, Arc<Mutex<Vec<(String, String)>>>) {
        let events: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let navigator = Navigator::new(
            config,
            Arc::new(move |name, value| {
                sink.lock()
                    .push((name.to_string(), value["url"].as_str().unwrap().to_string()));
            }),
        );
        (navigator, events)
    }

    #[test]
    fn test_navigation_allow_list() {
        let (navigator, events) = navigator_with(Config::from([
            (
                keys::WEBVIEW_NAVIGATOR_POLICIES_ALLOWED,
                "https://api.example.com/*",
            ),
            (keys::META_APPLICATION_PROTOCOL, "myapp"),
            (keys::META_BUNDLE_IDENTIFIER, "com.example.app"),
        ]));

        let current = "socket://com.example.app/index.html";
        assert!(navigator.handle_navigation_request(current, "https://api.example.com/v1/ping"));
        assert!(navigator.handle_navigation_request(current, "socket:foo"));
        assert!(!navigator.handle_navigation_request(current, "http://evil/"));
        assert!(events.lock().is_empty());

        assert!(!navigator.handle_navigation_request(current, "myapp://open?x=1"));
        assert_eq!(
            *events.lock(),
            vec![("applicationurl".to_string(), "myapp://open?x=1".to_string())]
        );
    }

    #[test]
    fn test_protocol_handler_schemes_allowed() {
        let (navigator, _) = navigator_with(Config::from([
            (keys::WEBVIEW_PROTOCOL_HANDLERS, "gopher: finger:"),
            ("webview_protocol-handlers_mailto", "/mail/sw.js"),
        ]));

        assert!(navigator.is_navigation_request_allowed("gopher://x"));
        assert!(navigator.is_navigation_request_allowed("finger://y"));
        assert!(navigator.is_navigation_request_allowed("mailto:someone@example.com"));
        assert!(!navigator.is_navigation_request_allowed("https://example.com/"));
    }

    #[test]
    fn test_application_links_refused_and_surfaced() {
        let (navigator, events) = navigator_with(Config::from([(
            keys::META_APPLICATION_LINKS,
            "app.example.com?trust=full",
        )]));

        let allowed = navigator
            .handle_navigation_request("https://app.example.com/home", "https://anywhere/else");
        assert!(!allowed);
        assert_eq!(events.lock()[0].0, "applicationurl");
    }

    #[test]
    fn test_glob_is_anchored() {
        let (navigator, _) = navigator_with(Config::from([(
            keys::WEBVIEW_NAVIGATOR_POLICIES_ALLOWED,
            "https://api.example.com/*",
        )]));

        assert!(!navigator.is_navigation_request_allowed("https://apixexample.com/"));
        assert!(!navigator.is_navigation_request_allowed("evil.https://api.example.com/x"));
    }
}
