//! Application message codec for the Conduit.
//!
//! Every application message is a binary payload of the form:
//!
//! ```text
//! u16 optionsLength (big-endian)
//! optionsBytes[optionsLength]   -- UTF-8, key=value&key=value urlencoded
//! payloadBytes[rest]
//! ```

use std::collections::BTreeMap;

use url::form_urlencoded;

use crate::error::{Error, Result};

/// A decoded Conduit message: an options map plus an opaque payload.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EncodedMessage {
    pub options: BTreeMap<String, String>,
    pub payload: Vec<u8>,
}

impl EncodedMessage {
    /// Returns the value for `key`, or the empty string when absent.
    pub fn get(&self, key: &str) -> String {
        self.options.get(key).cloned().unwrap_or_default()
    }

    pub fn has(&self, key: &str) -> bool {
        self.options.contains_key(key)
    }

    /// Removes and returns the value for `key`; empty string when absent.
    pub fn pluck(&mut self, key: &str) -> String {
        self.options.remove(key).unwrap_or_default()
    }
}

/// Decodes a message body.
///
/// # Errors
///
/// [`Error::BadRequest`] when the body is shorter than its declared options
/// block or the options are not valid UTF-8.
pub fn decode(bytes: &[u8]) -> Result<EncodedMessage> {
    if bytes.len() < 2 {
        return Err(Error::BadRequest(
            "message shorter than the options length prefix".to_string(),
        ));
    }

    let options_len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
    let rest = &bytes[2..];
    if rest.len() < options_len {
        return Err(Error::BadRequest(format!(
            "declared options length {options_len} exceeds message size"
        )));
    }

    let (options_bytes, payload) = rest.split_at(options_len);
    if std::str::from_utf8(options_bytes).is_err() {
        return Err(Error::BadRequest(
            "message options are not valid UTF-8".to_string(),
        ));
    }

    let options = form_urlencoded::parse(options_bytes)
        .into_owned()
        .collect::<BTreeMap<String, String>>();

    Ok(EncodedMessage {
        options,
        payload: payload.to_vec(),
    })
}

/// Encodes an options map and payload into a message body.
///
/// # Errors
///
/// [`Error::BadRequest`] when the serialised options exceed 65,535 bytes.
pub fn encode(options: &BTreeMap<String, String>, payload: &[u8]) -> Result<Vec<u8>> {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in options {
        serializer.append_pair(key, value);
    }
    let options_bytes = serializer.finish().into_bytes();

    if options_bytes.len() > u16::MAX as usize {
        return Err(Error::BadRequest(format!(
            "serialised options of {} bytes exceed the u16 length field",
            options_bytes.len()
        )));
    }

    let mut bytes = Vec::with_capacity(2 + options_bytes.len() + payload.len());
    bytes.extend_from_slice(&(options_bytes.len() as u16).to_be_bytes());
    bytes.extend_from_slice(&options_bytes);
    bytes.extend_from_slice(payload);
    Ok(bytes)
}

/// Encodes only the prefix (length field + options block); the payload is
/// appended by the writer. Used for zero-copy emission.
pub fn encode_prefix(options: &BTreeMap<String, String>) -> Result<Vec<u8>> {
    encode(options, &[])
}
