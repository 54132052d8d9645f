//! RPC outcomes and the error carrier.
//!
//! [`Status`] is the outcome of a completed RPC; a status whose code is
//! [`Code::Ok`] is a success and every other code is a failure. [`RpcError`]
//! is the failure carrier surfaced to callers and handlers: it never holds
//! `Ok`, and it carries the trailing metadata the server attached so callers
//! can inspect server-supplied diagnostics.

use std::sync::Arc;

use crate::code::Code;
use crate::headers;
use crate::metadata::Metadata;

type Source = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// The outcome of an RPC: a code, a human-readable message, and an optional
/// underlying cause.
#[derive(Clone, Debug, Default)]
pub struct Status {
    code: Code,
    message: String,
    source: Option<Source>,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// The success status.
    pub fn ok() -> Self {
        Self::new(Code::Ok, "")
    }

    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        self.source = Some(Arc::from(source.into()));
        self
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }

    pub fn source(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// Render this status as trailer metadata: `grpc-status`, a
    /// percent-encoded `grpc-message`, and the caller's trailing entries.
    pub fn to_trailers(&self, trailing_metadata: &Metadata) -> Metadata {
        let mut trailers = Metadata::new();
        trailers.add(headers::GRPC_STATUS, self.code.value().to_string());
        if !self.message.is_empty() {
            trailers.add(headers::GRPC_MESSAGE, percent_encode(&self.message));
        }
        trailers.merge(trailing_metadata.clone());
        trailers
    }

    /// Parse a status out of trailer metadata. `None` when `grpc-status` is
    /// missing or malformed.
    pub fn from_trailers(trailers: &Metadata) -> Option<Status> {
        let code = trailers
            .first_text(headers::GRPC_STATUS)?
            .trim()
            .parse::<i32>()
            .ok()
            .and_then(Code::from_i32)?;
        let message = trailers
            .first_text(headers::GRPC_MESSAGE)
            .map(percent_decode)
            .unwrap_or_default();
        Some(Status::new(code, message))
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            f.write_str(self.code.as_str())
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

/// The failure carrier: a non-`Ok` code, a message, an optional cause, and
/// the metadata that accompanied the failure.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RpcError {
    code: Code,
    message: String,
    metadata: Metadata,
    #[source]
    source: Option<Source>,
}

impl RpcError {
    /// Create a new error. `code` must not be `Ok`; use
    /// [`RpcError::from_status`] when the code is not statically known.
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        debug_assert!(code != Code::Ok, "RpcError cannot carry Code::Ok");
        Self {
            code,
            message: message.into(),
            metadata: Metadata::new(),
            source: None,
        }
    }

    /// Build an error from a status and metadata. `None` iff the status is
    /// `Ok`.
    pub fn from_status(status: Status, metadata: Metadata) -> Option<Self> {
        if status.is_ok() {
            return None;
        }
        Some(Self {
            code: status.code,
            message: status.message,
            metadata,
            source: status.source,
        })
    }

    /// Coerce an arbitrary error into an `RpcError`.
    ///
    /// An error that already is one passes through unchanged; anything else
    /// becomes `Unknown` with the original error attached as the cause.
    pub fn wrap<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        let boxed: Box<dyn std::error::Error + Send + Sync> = error.into();
        match boxed.downcast::<RpcError>() {
            Ok(rpc) => *rpc,
            Err(other) => {
                let message = other.to_string();
                Self {
                    code: Code::Unknown,
                    message,
                    metadata: Metadata::new(),
                    source: Some(Arc::from(other)),
                }
            }
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        self.source = Some(Arc::from(source.into()));
        self
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// The status this error corresponds to.
    pub fn to_status(&self) -> Status {
        Status {
            code: self.code,
            message: self.message.clone(),
            source: self.source.clone(),
        }
    }

    // Convenience constructors for the codes the runtime itself raises.

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(Code::Cancelled, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(Code::Unknown, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(Code::ResourceExhausted, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }

    /// Map a raw HTTP rejection (no `grpc-status` present) to an error.
    pub fn from_http_status(status: u16) -> Self {
        Self::new(
            Code::from_http_status(status),
            format!("HTTP status {status} before RPC framing"),
        )
    }
}

/// Percent-encode a `grpc-message` value.
///
/// Bytes outside the printable ASCII range and `%` itself are encoded as
/// `%XX`; everything else passes through.
pub fn percent_encode(message: &str) -> String {
    let mut encoded = String::with_capacity(message.len());
    for byte in message.bytes() {
        match byte {
            b'%' => encoded.push_str("%25"),
            0x20..=0x7E => encoded.push(byte as char),
            other => {
                encoded.push('%');
                encoded.push_str(&format!("{other:02X}"));
            }
        }
    }
    encoded
}

/// Decode a percent-encoded `grpc-message` value.
///
/// Decoding is lenient: malformed escapes pass through untouched and the
/// result is interpreted as UTF-8 with replacement.
pub fn percent_decode(message: &str) -> String {
    let bytes = message.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 3 <= bytes.len() {
            let hex = [bytes[i + 1], bytes[i + 2]];
            if let Some(value) = std::str::from_utf8(&hex)
                .ok()
                .and_then(|h| u8::from_str_radix(h, 16).ok())
            {
                decoded.push(value);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}
