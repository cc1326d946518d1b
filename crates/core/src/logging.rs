//! Default tracing subscriber for hosts that embed the runtime without
//! installing their own.

use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

/// Installs a compact stderr subscriber filtered by `RUST_LOG`, falling
/// back to `directive` (e.g. `"info"` or `"webrun_core=debug"`) when the
/// environment sets nothing.
///
/// # Errors
///
/// [`Error::Internal`] when a global subscriber is already installed; the
/// existing subscriber stays in place.
pub fn init_logging(directive: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|err| Error::Internal(format!("tracing subscriber already installed: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_install_is_refused() {
        // the first call may lose the race with another test's subscriber;
        // either way a second install must report Internal
        let _ = init_logging("debug");
        let err = init_logging("debug").unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }
}
