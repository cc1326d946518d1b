//! Parsed user configuration.
//!
//! The core never parses configuration files; it consumes an already-parsed
//! string map. All values are strings and `"false"` is the only falsey value.

use std::collections::BTreeMap;

/// Well-known configuration keys recognised by the runtime.
pub mod keys {
    pub const WEBVIEW_WATCH: &str = "webview_watch";
    pub const WEBVIEW_WATCH_RELOAD: &str = "webview_watch_reload";
    pub const WEBVIEW_SERVICE_WORKER_MODE: &str = "webview_service_worker_mode";
    pub const WEBVIEW_WATCH_SERVICE_WORKER_RELOAD_TIMEOUT: &str =
        "webview_watch_service_worker_reload_timeout";
    pub const WEBVIEW_DEFAULT_INDEX: &str = "webview_default_index";
    pub const WEBVIEW_NAVIGATOR_POLICIES_ALLOWED: &str = "webview_navigator_policies_allowed";
    pub const WEBVIEW_NAVIGATOR_MOUNTS_PREFIX: &str = "webview_navigator_mounts_";
    pub const WEBVIEW_PROTOCOL_HANDLERS: &str = "webview_protocol-handlers";
    pub const WEBVIEW_PROTOCOL_HANDLERS_PREFIX: &str = "webview_protocol-handlers_";
    pub const META_BUNDLE_IDENTIFIER: &str = "meta_bundle_identifier";
    pub const META_APPLICATION_PROTOCOL: &str = "meta_application_protocol";
    pub const META_APPLICATION_LINKS: &str = "meta_application_links";
    pub const META_TITLE: &str = "meta_title";
    pub const META_VERSION: &str = "meta_version";
    pub const META_COPYRIGHT: &str = "meta_copyright";
    pub const TRAY_TOOLTIP: &str = "tray_tooltip";
    pub const PERMISSIONS_ALLOW_PREFIX: &str = "permissions_allow_";
}

/// An ordered map of configuration entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    entries: BTreeMap<String, String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value for `key`, or the empty string when absent.
    pub fn get(&self, key: &str) -> &str {
        self.entries.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn get_opt(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// True when the key is present with any value other than `"false"`.
    pub fn is_truthy(&self, key: &str) -> bool {
        matches!(self.get_opt(key), Some(value) if value != "false")
    }

    /// True unless the key is explicitly set to `"false"`. Used for settings
    /// that default to enabled, e.g. `webview_watch_reload` and the
    /// `permissions_allow_*` family.
    pub fn is_not_disabled(&self, key: &str) -> bool {
        !matches!(self.get_opt(key), Some("false"))
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Iterates `(suffix, value)` pairs of entries whose key starts with
    /// `prefix`, with the prefix stripped.
    pub fn with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.entries.iter().filter_map(move |(key, value)| {
            key.strip_prefix(prefix)
                .map(|suffix| (suffix, value.as_str()))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for Config {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Config {
    fn from(entries: [(&str, &str); N]) -> Self {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

/// The platform the runtime was built for, used to filter
/// platform-prefixed configuration entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct Platform {
    pub android: bool,
    pub ios: bool,
    pub linux: bool,
    pub mac: bool,
    pub win: bool,
}

impl Platform {
    pub const fn current() -> Self {
        Self {
            android: cfg!(target_os = "android"),
            ios: cfg!(target_os = "ios"),
            linux: cfg!(target_os = "linux"),
            mac: cfg!(target_os = "macos"),
            win: cfg!(target_os = "windows"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_false_is_the_only_falsey_value() {
        let config = Config::from([("a", "true"), ("b", "false"), ("c", "1")]);
        assert!(config.is_truthy("a"));
        assert!(!config.is_truthy("b"));
        assert!(config.is_truthy("c"));
        assert!(!config.is_truthy("missing"));

        assert!(config.is_not_disabled("a"));
        assert!(!config.is_not_disabled("b"));
        assert!(config.is_not_disabled("missing"));
    }

    #[test]
    fn test_prefix_iteration() {
        let config = Config::from([
            ("webview_navigator_mounts_~/media", "/media"),
            ("webview_navigator_mounts_linux_/tmp", "/tmp"),
            ("meta_title", "app"),
        ]);
        let mounts: Vec<_> = config
            .with_prefix(keys::WEBVIEW_NAVIGATOR_MOUNTS_PREFIX)
            .collect();
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0], ("~/media", "/media"));
    }
}
