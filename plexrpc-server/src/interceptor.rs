//! Server interceptors.
//!
//! Like their client counterparts, server interceptors wrap a continuation
//! over the serialized request and response. Each registered interceptor
//! additionally carries a [`InterceptorSubject`]; when a handler is
//! registered, the router computes the ordered list of interceptors whose
//! subject applies to that method, and only those run for its RPCs.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::Stream;
use plexrpc_core::{Metadata, MethodDescriptor, RpcError};

use crate::context::ServerContext;

/// A serialized message stream.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Bytes, RpcError>> + Send + 'static>>;

/// The serialized view of an inbound request.
pub struct ServerRpcRequest {
    pub metadata: Metadata,
    pub messages: MessageStream,
}

impl std::fmt::Debug for ServerRpcRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRpcRequest")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// The serialized contents of an accepted response.
pub struct ServerRpcContents {
    pub metadata: Metadata,
    pub messages: MessageStream,
    pub trailing_metadata: Metadata,
}

impl std::fmt::Debug for ServerRpcContents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRpcContents")
            .field("metadata", &self.metadata)
            .field("trailing_metadata", &self.trailing_metadata)
            .finish_non_exhaustive()
    }
}

/// The serialized response a handler execution produced.
pub struct ServerRpcResponse {
    pub accepted: Result<ServerRpcContents, RpcError>,
}

impl ServerRpcResponse {
    pub fn accepted(contents: ServerRpcContents) -> Self {
        Self {
            accepted: Ok(contents),
        }
    }

    pub fn rejected(error: RpcError) -> Self {
        Self {
            accepted: Err(error),
        }
    }
}

/// The continuation invoking the rest of the chain and the handler.
pub type Next =
    Box<dyn FnOnce(ServerRpcRequest, ServerContext) -> BoxFuture<'static, ServerRpcResponse> + Send>;

/// A server interceptor.
pub trait ServerInterceptor: Send + Sync {
    fn intercept(
        &self,
        request: ServerRpcRequest,
        context: ServerContext,
        next: Next,
    ) -> BoxFuture<'static, ServerRpcResponse>;
}

/// Which methods a registered interceptor applies to.
#[derive(Clone, Debug)]
pub enum InterceptorSubject {
    /// Every method of every service.
    All,
    /// Every method of the named services.
    Services(HashSet<String>),
    /// Exactly the named methods.
    Methods(HashSet<MethodDescriptor>),
}

impl InterceptorSubject {
    pub fn services<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        InterceptorSubject::Services(names.into_iter().map(Into::into).collect())
    }

    pub fn methods<I>(descriptors: I) -> Self
    where
        I: IntoIterator<Item = MethodDescriptor>,
    {
        InterceptorSubject::Methods(descriptors.into_iter().collect())
    }

    /// Whether an interceptor with this subject runs for `descriptor`.
    pub fn applies_to(&self, descriptor: &MethodDescriptor) -> bool {
        match self {
            InterceptorSubject::All => true,
            InterceptorSubject::Services(services) => services.contains(descriptor.service()),
            InterceptorSubject::Methods(methods) => methods.contains(descriptor),
        }
    }
}

/// The ordered interceptors selected for one method.
#[derive(Clone, Default)]
pub(crate) struct ServerInterceptorChain {
    interceptors: Vec<Arc<dyn ServerInterceptor>>,
}

impl ServerInterceptorChain {
    /// Select the interceptors applying to `descriptor`, preserving
    /// registration order.
    pub(crate) fn select(
        registered: &[(Arc<dyn ServerInterceptor>, InterceptorSubject)],
        descriptor: &MethodDescriptor,
    ) -> Self {
        Self {
            interceptors: registered
                .iter()
                .filter(|(_, subject)| subject.applies_to(descriptor))
                .map(|(interceptor, _)| interceptor.clone())
                .collect(),
        }
    }

    pub(crate) fn wrap(&self, base: Next) -> Next {
        let mut next = base;
        for interceptor in self.interceptors.iter().rev() {
            let interceptor = interceptor.clone();
            let inner = next;
            next = Box::new(move |request, context| interceptor.intercept(request, context, inner));
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_all() {
        let descriptor = MethodDescriptor::new("a.B", "C");
        assert!(InterceptorSubject::All.applies_to(&descriptor));
    }

    #[test]
    fn test_subject_services() {
        let subject = InterceptorSubject::services(["a.B"]);
        assert!(subject.applies_to(&MethodDescriptor::new("a.B", "C")));
        assert!(subject.applies_to(&MethodDescriptor::new("a.B", "D")));
        assert!(!subject.applies_to(&MethodDescriptor::new("x.Y", "C")));
    }

    #[test]
    fn test_subject_methods() {
        let subject = InterceptorSubject::methods([MethodDescriptor::new("a.B", "C")]);
        assert!(subject.applies_to(&MethodDescriptor::new("a.B", "C")));
        assert!(!subject.applies_to(&MethodDescriptor::new("a.B", "D")));
    }

    #[test]
    fn test_select_preserves_order_and_filters() {
        struct Noop;
        impl ServerInterceptor for Noop {
            fn intercept(
                &self,
                request: ServerRpcRequest,
                context: ServerContext,
                next: Next,
            ) -> BoxFuture<'static, ServerRpcResponse> {
                next(request, context)
            }
        }

        let registered: Vec<(Arc<dyn ServerInterceptor>, InterceptorSubject)> = vec![
            (Arc::new(Noop), InterceptorSubject::All),
            (Arc::new(Noop), InterceptorSubject::services(["other.Svc"])),
            (
                Arc::new(Noop),
                InterceptorSubject::methods([MethodDescriptor::new("a.B", "C")]),
            ),
        ];
        let chain =
            ServerInterceptorChain::select(&registered, &MethodDescriptor::new("a.B", "C"));
        assert_eq!(chain.interceptors.len(), 2);

        let chain =
            ServerInterceptorChain::select(&registered, &MethodDescriptor::new("a.B", "Other"));
        assert_eq!(chain.interceptors.len(), 1);
    }
}
