//! Script snippets evaluated in the render process.
//!
//! These are wire contracts: the render-side runtime looks the entry points
//! up by name, so the emitted text is part of the external interface and
//! changes here must be coordinated with the render bundle.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC};

/// Characters left verbatim by JavaScript's `encodeURIComponent`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Percent-encodes `value` exactly as `encodeURIComponent` would, so the
/// render process can decode with `decodeURIComponent`.
pub fn encode_uri_component(value: &str) -> String {
    percent_encoding::utf8_percent_encode(value, URI_COMPONENT).to_string()
}

/// Wraps `source` in the async evaluation shell used for every script the
/// core injects, tagged with a source URL for render-side stack traces.
pub fn create_script(name: &str, source: &str) -> String {
    format!(
        ";(async function () {{\n{source}\n}})();\n//# sourceURL=runtime/{name}\n"
    )
}

/// A single statement dispatching an event into the render process.
pub fn emit_to_render_process(name: &str, encoded_value: &str) -> String {
    format!("globalThis.__runtime_emit__(`{name}`, `{encoded_value}`);")
}

/// A single statement resolving an in-flight IPC sequence in the render
/// process.
pub fn resolve_to_render_process(seq: &str, status: &str, encoded_value: &str) -> String {
    format!("globalThis.__runtime_resolve__(`{seq}`, `{status}`, `{encoded_value}`);")
}
