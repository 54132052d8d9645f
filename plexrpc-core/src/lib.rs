//! Shared protocol types for the plexrpc RPC runtime.
//!
//! This crate holds the vocabulary both halves of the runtime speak:
//! - [`Code`], [`Status`], and [`RpcError`]: RPC outcomes and failures
//! - [`Metadata`]: ordered case-insensitive request/response/trailer headers
//! - [`MethodDescriptor`]: RPC method identity
//! - [`frame`]: length-prefixed message framing
//! - [`RequestPart`]/[`ResponsePart`] and the [`RpcStream`] halves a
//!   transport produces
//! - [`Serializer`]/[`Deserializer`] codec seams with a prost-backed
//!   implementation
//! - [`compression`]: algorithm negotiation (the algorithms themselves are a
//!   transport concern)

pub mod code;
pub mod codec;
pub mod compression;
pub mod frame;
pub mod headers;
pub mod metadata;
pub mod method;
pub mod status;
pub mod stream;

pub use code::Code;
pub use codec::{Deserializer, ProstCodec, Serializer};
pub use compression::Encoding;
pub use metadata::{Metadata, MetadataValue, RetryPushback};
pub use method::MethodDescriptor;
pub use status::{RpcError, Status};
pub use stream::{
    ClientStream, Inbound, Outbound, RequestPart, ResponsePart, RpcStream, ServerStream,
    DEFAULT_STREAM_BUFFER,
};
