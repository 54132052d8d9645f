//! Compression negotiation.
//!
//! The runtime negotiates which algorithm a stream uses; the algorithms
//! themselves live in the transport. The client offers its supported set in
//! `grpc-accept-encoding` and may pick one in `grpc-encoding`; a server that
//! does not support the client's pick rejects the RPC trailers-only with its
//! own supported set attached.

use crate::headers;
use crate::metadata::Metadata;
use crate::status::RpcError;

/// A message compression algorithm identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Identity,
    Deflate,
    Gzip,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Identity => "identity",
            Encoding::Deflate => "deflate",
            Encoding::Gzip => "gzip",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "identity" => Some(Encoding::Identity),
            "deflate" => Some(Encoding::Deflate),
            "gzip" => Some(Encoding::Gzip),
            _ => None,
        }
    }

    /// Parse a `grpc-accept-encoding` list, skipping unknown algorithms.
    pub fn parse_list(list: &str) -> Vec<Encoding> {
        list.split(',').filter_map(Encoding::from_name).collect()
    }

    /// Render an algorithm list for `grpc-accept-encoding`.
    pub fn render_list(encodings: &[Encoding]) -> String {
        encodings
            .iter()
            .map(Encoding::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-side negotiation: validate the client's `grpc-encoding` pick
/// against the supported set.
///
/// Identity is always acceptable. On a mismatch the returned error is the
/// trailers-only rejection the server sends: `Unimplemented` with
/// `grpc-accept-encoding` listing what the server does support.
pub fn negotiate(requested: Option<&str>, supported: &[Encoding]) -> Result<Encoding, RpcError> {
    let Some(name) = requested else {
        return Ok(Encoding::Identity);
    };
    let encoding = Encoding::from_name(name);
    match encoding {
        Some(Encoding::Identity) => Ok(Encoding::Identity),
        Some(encoding) if supported.contains(&encoding) => Ok(encoding),
        _ => {
            let mut metadata = Metadata::new();
            metadata.add(
                headers::GRPC_ACCEPT_ENCODING,
                Encoding::render_list(supported),
            );
            Err(RpcError::unimplemented(format!(
                "message encoding {name:?} is not supported"
            ))
            .with_metadata(metadata))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::Code;

    #[test]
    fn test_parse_list_skips_unknown() {
        let parsed = Encoding::parse_list("gzip, snappy ,identity");
        assert_eq!(parsed, vec![Encoding::Gzip, Encoding::Identity]);
    }

    #[test]
    fn test_render_list() {
        let list = [Encoding::Identity, Encoding::Deflate, Encoding::Gzip];
        assert_eq!(Encoding::render_list(&list), "identity,deflate,gzip");
    }

    #[test]
    fn test_negotiate_defaults_to_identity() {
        assert_eq!(negotiate(None, &[Encoding::Gzip]).unwrap(), Encoding::Identity);
        assert_eq!(
            negotiate(Some("identity"), &[]).unwrap(),
            Encoding::Identity
        );
    }

    #[test]
    fn test_negotiate_accepts_supported_pick() {
        let picked = negotiate(Some("gzip"), &[Encoding::Gzip, Encoding::Deflate]).unwrap();
        assert_eq!(picked, Encoding::Gzip);
    }

    #[test]
    fn test_negotiate_rejects_unsupported_pick() {
        let err = negotiate(Some("gzip"), &[Encoding::Deflate]).unwrap_err();
        assert_eq!(err.code(), Code::Unimplemented);
        assert_eq!(
            err.metadata().first_text(headers::GRPC_ACCEPT_ENCODING),
            Some("deflate")
        );
    }

    #[test]
    fn test_negotiate_rejects_unknown_algorithm() {
        let err = negotiate(Some("snappy"), &[Encoding::Gzip]).unwrap_err();
        assert_eq!(err.code(), Code::Unimplemented);
    }
}
