//! Process-wide working-directory state.
//!
//! Lazily initialised on first read and stable afterwards unless explicitly
//! overridden with [`set_cwd`]. Hosts that relocate application resources
//! (bundles, containers) call [`set_cwd`] once during startup, before any
//! resolver touches the filesystem.

use once_cell::sync::Lazy;
use parking_lot::Mutex;

static STATE: Lazy<Mutex<String>> = Lazy::new(|| Mutex::new(String::new()));

/// Overrides the cached working directory.
pub fn set_cwd(value: impl Into<String>) {
    *STATE.lock() = value.into();
}

/// Returns the cached working directory, initialising it from the process
/// working directory on first read.
pub fn cwd() -> String {
    let mut state = STATE.lock();
    if !state.is_empty() {
        return state.clone();
    }

    *state = std::env::current_dir()
        .map(|path| path.to_string_lossy().into_owned())
        .unwrap_or_default();
    state.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_overrides_and_sticks() {
        set_cwd("/tmp/app-resources");
        assert_eq!(cwd(), "/tmp/app-resources");
        assert_eq!(cwd(), "/tmp/app-resources");
    }
}
