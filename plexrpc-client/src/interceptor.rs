//! Client interceptors.
//!
//! An interceptor wraps one attempt of a call: it receives the serialized
//! request, the call context, and a continuation, and returns the raw
//! response. Interceptors compose in the order they were added; the first
//! one added sees the request first and the response last.
//!
//! An interceptor may rewrite request metadata, wrap the message streams,
//! short-circuit with a synthetic response, or just observe the outcome.
//! Errors that are not [`RpcError`] should be coerced with
//! [`RpcError::wrap`] before they surface.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::Stream;
use plexrpc_core::{Metadata, MethodDescriptor, RpcError};

use crate::response::StreamingResponse;

/// The serialized request message stream of one attempt.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Bytes, RpcError>> + Send + 'static>>;

/// The raw (serialized) response interceptors see.
pub type RawResponse = StreamingResponse<Bytes>;

/// The serialized view of one attempt's request.
pub struct RpcRequest {
    pub metadata: Metadata,
    pub messages: MessageStream,
}

impl std::fmt::Debug for RpcRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcRequest")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Context shared by every interceptor of an attempt.
#[derive(Clone, Debug)]
pub struct ClientContext {
    pub descriptor: MethodDescriptor,
    /// 1-indexed attempt number within the call.
    pub attempt: u32,
    pub deadline: Option<Instant>,
    pub max_request_message_bytes: Option<usize>,
    pub max_response_message_bytes: Option<usize>,
    pub wait_for_ready: bool,
}

/// The continuation that invokes the rest of the chain and, ultimately, the
/// stream processor against the transport.
pub type Next = Box<dyn FnOnce(RpcRequest, ClientContext) -> BoxFuture<'static, RawResponse> + Send>;

/// A client interceptor.
pub trait ClientInterceptor: Send + Sync {
    fn intercept(
        &self,
        request: RpcRequest,
        context: ClientContext,
        next: Next,
    ) -> BoxFuture<'static, RawResponse>;
}

/// An ordered interceptor chain.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn ClientInterceptor>>,
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("count", &self.interceptors.len())
            .finish()
    }
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, interceptor: Arc<dyn ClientInterceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Fold the chain around `base`. The first interceptor added becomes
    /// the outermost layer.
    pub fn wrap(&self, base: Next) -> Next {
        let mut next = base;
        for interceptor in self.interceptors.iter().rev() {
            let interceptor = interceptor.clone();
            let inner = next;
            next = Box::new(move |request, context| interceptor.intercept(request, context, inner));
        }
        next
    }
}

/// An interceptor that appends fixed metadata entries to every request.
#[derive(Clone, Debug)]
pub struct MetadataInterceptor {
    entries: Metadata,
}

impl MetadataInterceptor {
    pub fn new(entries: Metadata) -> Self {
        Self { entries }
    }
}

impl ClientInterceptor for MetadataInterceptor {
    fn intercept(
        &self,
        mut request: RpcRequest,
        context: ClientContext,
        next: Next,
    ) -> BoxFuture<'static, RawResponse> {
        request.metadata.merge(self.entries.clone());
        next(request, context)
    }
}
