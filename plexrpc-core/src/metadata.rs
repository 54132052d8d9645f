//! Ordered, case-insensitive RPC metadata.
//!
//! Metadata is a multi-map from lowercased keys to text or binary values.
//! Duplicate keys are allowed and insertion order is preserved, both within
//! a key and across distinct keys. Keys with the `-bin` suffix carry opaque
//! bytes and are base64-coded when rendered in text form.

use std::time::Duration;

use base64::Engine;
use bytes::Bytes;

use crate::headers;

/// A single metadata value, either printable text or opaque bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetadataValue {
    Text(String),
    Binary(Bytes),
}

impl MetadataValue {
    /// The text content, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            MetadataValue::Binary(_) => None,
        }
    }

    /// The raw bytes, if this is a binary value.
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            MetadataValue::Text(_) => None,
            MetadataValue::Binary(b) => Some(b),
        }
    }

    /// Render the value the way it appears on the wire: text verbatim,
    /// binary as unpadded base64.
    pub fn wire_text(&self) -> String {
        match self {
            MetadataValue::Text(s) => s.clone(),
            MetadataValue::Binary(b) => {
                base64::engine::general_purpose::STANDARD_NO_PAD.encode(b)
            }
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Text(s.to_owned())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Text(s)
    }
}

impl From<Bytes> for MetadataValue {
    fn from(b: Bytes) -> Self {
        MetadataValue::Binary(b)
    }
}

impl From<Vec<u8>> for MetadataValue {
    fn from(b: Vec<u8>) -> Self {
        MetadataValue::Binary(Bytes::from(b))
    }
}

/// Server pushback parsed from `grpc-retry-pushback-ms`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryPushback {
    /// No pushback header present.
    None,
    /// Wait this long before the next attempt.
    RetryAfter(Duration),
    /// The server asked the client to stop retrying.
    StopRetrying,
}

/// Ordered case-insensitive multi-map of request, response, and trailer
/// headers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(String, MetadataValue)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value for `key`, keeping any existing values.
    pub fn add(&mut self, key: impl AsRef<str>, value: impl Into<MetadataValue>) {
        self.entries
            .push((normalize_key(key.as_ref()), value.into()));
    }

    /// Replace all values for `key` with a single value.
    pub fn set(&mut self, key: impl AsRef<str>, value: impl Into<MetadataValue>) {
        let key = normalize_key(key.as_ref());
        self.entries.retain(|(k, _)| *k != key);
        self.entries.push((key, value.into()));
    }

    /// Remove all values for `key`.
    pub fn remove(&mut self, key: impl AsRef<str>) {
        let key = normalize_key(key.as_ref());
        self.entries.retain(|(k, _)| *k != key);
    }

    /// All values for `key`, in insertion order.
    pub fn values<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a MetadataValue> {
        let key = normalize_key(key);
        self.entries
            .iter()
            .filter(move |(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    /// The first value for `key`.
    pub fn first(&self, key: &str) -> Option<&MetadataValue> {
        self.values(key).next()
    }

    /// The first text value for `key`.
    pub fn first_text(&self, key: &str) -> Option<&str> {
        self.first(key).and_then(MetadataValue::as_text)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.first(key).is_some()
    }

    /// Iterate all entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append every entry of `other`, preserving its order.
    pub fn merge(&mut self, other: Metadata) {
        self.entries.extend(other.entries);
    }

    /// Read `grpc-timeout`.
    pub fn timeout(&self) -> Option<Duration> {
        decode_timeout(self.first_text(headers::GRPC_TIMEOUT)?)
    }

    /// Write `grpc-timeout`, encoded with the smallest unit whose value
    /// fits in eight digits.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.set(headers::GRPC_TIMEOUT, encode_timeout(timeout));
    }

    /// Read `grpc-previous-rpc-attempts`.
    pub fn previous_rpc_attempts(&self) -> Option<u32> {
        self.first_text(headers::GRPC_PREVIOUS_RPC_ATTEMPTS)?
            .parse()
            .ok()
    }

    /// Write `grpc-previous-rpc-attempts`.
    pub fn set_previous_rpc_attempts(&mut self, attempts: u32) {
        self.set(headers::GRPC_PREVIOUS_RPC_ATTEMPTS, attempts.to_string());
    }

    /// Read `grpc-retry-pushback-ms`.
    ///
    /// A missing header means no pushback. A negative or unparseable value
    /// means the server wants retries to stop.
    pub fn retry_pushback(&self) -> RetryPushback {
        let Some(value) = self.first(headers::GRPC_RETRY_PUSHBACK_MS) else {
            return RetryPushback::None;
        };
        match value.as_text().and_then(|s| s.trim().parse::<i64>().ok()) {
            Some(ms) if ms >= 0 => RetryPushback::RetryAfter(Duration::from_millis(ms as u64)),
            _ => RetryPushback::StopRetrying,
        }
    }
}

impl FromIterator<(String, MetadataValue)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (String, MetadataValue)>>(iter: I) -> Self {
        let mut metadata = Metadata::new();
        for (key, value) in iter {
            metadata.add(key, value);
        }
        metadata
    }
}

fn normalize_key(key: &str) -> String {
    key.to_ascii_lowercase()
}

/// Timeout units in ascending size, with their length in nanoseconds.
const TIMEOUT_UNITS: [(u8, u64); 6] = [
    (b'n', 1),
    (b'u', 1_000),
    (b'm', 1_000_000),
    (b'S', 1_000_000_000),
    (b'M', 60 * 1_000_000_000),
    (b'H', 3_600 * 1_000_000_000),
];

/// `grpc-timeout` values carry at most eight digits.
const MAX_TIMEOUT_VALUE: u64 = 99_999_999;

fn encode_timeout(timeout: Duration) -> String {
    let nanos = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
    for (unit, per) in TIMEOUT_UNITS {
        // Round up so the encoded timeout never lands before the real one.
        let value = nanos.div_ceil(per);
        if value <= MAX_TIMEOUT_VALUE {
            return format!("{}{}", value, unit as char);
        }
    }
    format!("{}H", MAX_TIMEOUT_VALUE)
}

fn decode_timeout(text: &str) -> Option<Duration> {
    if !text.is_ascii() {
        return None;
    }
    let (digits, unit) = text.split_at(text.len().checked_sub(1)?);
    if digits.is_empty() || digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: u64 = digits.parse().ok()?;
    let per = TIMEOUT_UNITS
        .iter()
        .find(|(u, _)| *u == unit.as_bytes()[0])
        .map(|(_, per)| *per)?;
    Some(Duration::from_nanos(value.checked_mul(per)?))
}
