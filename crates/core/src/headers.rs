//! Case-insensitive, insertion-ordered header container.
//!
//! Used for queued responses, scheme-handler responses, and the Conduit
//! handshake. Names are stored lowercased; `str()` serialises them in
//! Proper-Case for the wire.

use std::fmt;

/// A single header entry. The name is always stored lowercased and trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl AsRef<str>, value: impl Into<Value>) -> Self {
        Self {
            name: name.as_ref().trim().to_lowercase(),
            value: value.into().0.trim().to_string(),
        }
    }
}

/// A header value convertible from the scalar types handlers produce.
pub struct Value(String);

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value(if value { "true" } else { "false" }.to_string())
    }
}

macro_rules! value_from_number {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Value {
            fn from(value: $ty) -> Self {
                Value(value.to_string())
            }
        })*
    };
}

value_from_number!(i32, i64, u32, u64, usize, f32, f64);

/// Insertion-ordered header map with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<Header>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a serialized header block (one `Name: value` entry per line).
    /// Lines without a separator are skipped.
    pub fn parse(source: &str) -> Self {
        let mut headers = Headers::new();
        for entry in source.split('\n') {
            if let Some((name, value)) = entry.split_once(':') {
                if name.trim().is_empty() {
                    continue;
                }
                headers.set(name, value.trim());
            }
        }
        headers
    }

    /// Sets a header, replacing the value of an existing entry with the same
    /// (case-insensitive) name or appending a new one.
    pub fn set(&mut self, name: impl AsRef<str>, value: impl Into<Value>) {
        let header = Header::new(name, value);
        for entry in &mut self.entries {
            if entry.name == header.name {
                entry.value = header.value;
                return;
            }
        }
        self.entries.push(header);
    }

    pub fn has(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.entries.iter().any(|h| h.name == name)
    }

    /// Returns the named header, or an empty one when absent.
    pub fn get(&self, name: &str) -> Header {
        let name = name.to_lowercase();
        self.entries
            .iter()
            .find(|h| h.name == name)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the named header, erroring when absent.
    pub fn at(&self, name: &str) -> crate::Result<&Header> {
        let lowered = name.to_lowercase();
        self.entries
            .iter()
            .find(|h| h.name == lowered)
            .ok_or_else(|| crate::Error::NotFound(format!("header does not exist: {name}")))
    }

    /// Mutable access to a header value, inserting an empty entry when the
    /// name is absent.
    pub fn value_mut(&mut self, name: &str) -> &mut String {
        if !self.has(name) {
            self.set(name, "");
        }
        let name = name.to_lowercase();
        let entry = self
            .entries
            .iter_mut()
            .find(|h| h.name == name)
            .expect("entry was just inserted");
        &mut entry.value
    }

    pub fn erase(&mut self, name: &str) -> bool {
        let name = name.to_lowercase();
        match self.entries.iter().position(|h| h.name == name) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        self.entries.clear();
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Header> {
        self.entries.iter()
    }

    /// Serialises entries as `Proper-Case-Name: value` lines joined by `\n`.
    pub fn str(&self) -> String {
        self.entries
            .iter()
            .map(|entry| {
                let name = entry
                    .name
                    .split('-')
                    .map(proper_case)
                    .collect::<Vec<_>>()
                    .join("-");
                format!("{}: {}", name, entry.value)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// JSON object view with lowercased names.
    pub fn json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for entry in &self.entries {
            map.insert(
                entry.name.clone(),
                serde_json::Value::String(entry.value.clone()),
            );
        }
        serde_json::Value::Object(map)
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.str())
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a Header;
    type IntoIter = std::slice::Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.set(name, value);
        }
        headers
    }
}

fn proper_case(segment: &str) -> String {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
