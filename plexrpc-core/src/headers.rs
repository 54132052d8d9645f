//! Wire header names reserved by the runtime.

use crate::compression::Encoding;
use crate::metadata::Metadata;
use crate::method::MethodDescriptor;

pub const GRPC_TIMEOUT: &str = "grpc-timeout";
pub const GRPC_ENCODING: &str = "grpc-encoding";
pub const GRPC_ACCEPT_ENCODING: &str = "grpc-accept-encoding";
pub const GRPC_STATUS: &str = "grpc-status";
pub const GRPC_MESSAGE: &str = "grpc-message";
pub const GRPC_PREVIOUS_RPC_ATTEMPTS: &str = "grpc-previous-rpc-attempts";
pub const GRPC_RETRY_PUSHBACK_MS: &str = "grpc-retry-pushback-ms";

pub const CONTENT_TYPE: &str = "content-type";
pub const CONTENT_TYPE_GRPC: &str = "application/grpc";
pub const TE: &str = "te";
pub const USER_AGENT: &str = "user-agent";

pub const PSEUDO_METHOD: &str = ":method";
pub const PSEUDO_PATH: &str = ":path";
pub const PSEUDO_SCHEME: &str = ":scheme";
pub const PSEUDO_AUTHORITY: &str = ":authority";

/// URI scheme of the connection, carried in the `:scheme` pseudo-header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// Whether a key is reserved for the runtime.
///
/// User writes to reserved keys are accepted, but the runtime may overwrite
/// them when it emits the headers it owns.
pub fn is_reserved(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("grpc-")
        || key.starts_with(':')
        || matches!(key.as_str(), CONTENT_TYPE | TE | USER_AGENT)
}

/// Build the request headers a call opens with: the pseudo-headers, the
/// transport requirements, and the negotiation offer.
pub fn request_headers(
    descriptor: &MethodDescriptor,
    scheme: Scheme,
    user_agent: &str,
    accept_encoding: &[Encoding],
) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.add(PSEUDO_METHOD, "POST");
    metadata.add(PSEUDO_SCHEME, scheme.as_str());
    metadata.add(PSEUDO_PATH, descriptor.path());
    metadata.add(TE, "trailers");
    metadata.add(CONTENT_TYPE, CONTENT_TYPE_GRPC);
    metadata.add(USER_AGENT, user_agent);
    if !accept_encoding.is_empty() {
        metadata.add(GRPC_ACCEPT_ENCODING, Encoding::render_list(accept_encoding));
    }
    metadata
}
