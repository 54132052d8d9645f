//! Request routing and the per-RPC dispatch path.
//!
//! The router maps method descriptors to registered handlers. Dispatch
//! reads the request metadata off the inbound stream, negotiates the
//! message encoding, runs the method's interceptor chain into the handler,
//! and frames the response back: initial metadata, messages, then the
//! terminal status with trailing metadata. Unknown methods get a
//! trailers-only `Unimplemented` response.

use std::collections::HashMap;
use std::sync::Arc;

use plexrpc_core::{
    compression, headers, Code, Encoding, MethodDescriptor, RequestPart, ResponsePart, RpcError,
    ServerStream, Status,
};
use tokio_stream::StreamExt;

use crate::context::ServerContext;
use crate::handler::RpcHandler;
use crate::interceptor::{
    InterceptorSubject, MessageStream, Next, ServerInterceptor, ServerInterceptorChain,
    ServerRpcRequest,
};

/// A transport feeding inbound RPCs to the router.
pub trait ServerTransport: Send + 'static {
    /// The next inbound stream with its per-RPC context, or `None` once
    /// the transport has shut down.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Option<(ServerStream, ServerContext)>> + Send;
}

#[derive(Clone)]
struct Route {
    handler: RpcHandler,
    chain: ServerInterceptorChain,
}

/// Maps method descriptors to handlers and their interceptor chains.
pub struct Router {
    interceptors: Vec<(Arc<dyn ServerInterceptor>, InterceptorSubject)>,
    routes: HashMap<MethodDescriptor, Route>,
    supported_encodings: Vec<Encoding>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            interceptors: Vec::new(),
            routes: HashMap::new(),
            supported_encodings: vec![Encoding::Identity],
        }
    }

    /// Register an interceptor for the given subject.
    ///
    /// Interceptors apply to handlers registered after them; each
    /// handler's chain is computed at registration time.
    pub fn with_interceptor(
        mut self,
        interceptor: Arc<dyn ServerInterceptor>,
        subject: InterceptorSubject,
    ) -> Self {
        self.interceptors.push((interceptor, subject));
        self
    }

    /// Declare the message encodings this server accepts.
    pub fn with_supported_encodings(mut self, encodings: Vec<Encoding>) -> Self {
        self.supported_encodings = encodings;
        self
    }

    /// Register a handler, replacing any previous handler for the same
    /// descriptor.
    pub fn register(mut self, descriptor: MethodDescriptor, handler: RpcHandler) -> Self {
        let chain = ServerInterceptorChain::select(&self.interceptors, &descriptor);
        if self
            .routes
            .insert(descriptor.clone(), Route { handler, chain })
            .is_some()
        {
            tracing::debug!(%descriptor, "replaced existing handler");
        }
        self
    }

    pub fn handles(&self, descriptor: &MethodDescriptor) -> bool {
        self.routes.contains_key(descriptor)
    }

    /// Accept RPCs from `transport` until it shuts down, dispatching each
    /// on its own task.
    pub async fn serve<T: ServerTransport>(self: Arc<Self>, mut transport: T) {
        while let Some((stream, context)) = transport.accept().await {
            let router = self.clone();
            tokio::spawn(async move {
                router.dispatch(stream, context).await;
            });
        }
    }

    /// Run one inbound RPC to completion.
    pub async fn dispatch(&self, stream: ServerStream, context: ServerContext) {
        let ServerStream {
            descriptor,
            mut inbound,
            mut outbound,
        } = stream;

        let Some(route) = self.routes.get(&descriptor) else {
            tracing::debug!(%descriptor, "rejecting unknown method");
            reject(
                &mut outbound,
                RpcError::unimplemented("Requested RPC isn't implemented by this server."),
            )
            .await;
            return;
        };

        let metadata = match inbound.next().await {
            Some(Ok(RequestPart::Metadata(metadata))) => metadata,
            Some(Ok(RequestPart::Message(_))) => {
                reject(
                    &mut outbound,
                    RpcError::internal("transport bug: message part before metadata"),
                )
                .await;
                return;
            }
            Some(Err(error)) => {
                tracing::debug!(%descriptor, %error, "stream failed before metadata");
                context.cancellation().cancel();
                return;
            }
            None => {
                context.cancellation().cancel();
                return;
            }
        };

        // Encoding negotiation happens before the handler runs; a pick the
        // server does not support is a trailers-only rejection carrying
        // the supported set.
        let encoding = match compression::negotiate(
            metadata.first_text(headers::GRPC_ENCODING),
            &self.supported_encodings,
        ) {
            Ok(encoding) => encoding,
            Err(error) => {
                reject(&mut outbound, error).await;
                return;
            }
        };

        let cancellation = context.cancellation().clone();
        let messages: MessageStream = Box::pin(async_stream::stream! {
            let mut inbound = inbound;
            loop {
                match inbound.next().await {
                    Some(Ok(RequestPart::Message(payload))) => yield Ok(payload),
                    Some(Ok(RequestPart::Metadata(_))) => {
                        yield Err(RpcError::internal(
                            "transport bug: second metadata part in request",
                        ));
                        break;
                    }
                    Some(Err(error)) => {
                        cancellation.cancel();
                        yield Err(error);
                        break;
                    }
                    None => break,
                }
            }
        });

        let handler = route.handler.clone();
        let terminal: Next =
            Box::new(move |request, context| handler.call(request, context));
        let call = route.chain.wrap(terminal);
        let response = call(ServerRpcRequest { metadata, messages }, context.clone()).await;

        match response.accepted {
            Err(error) => {
                tracing::debug!(%descriptor, code = %error.code(), "handler rejected the call");
                reject(&mut outbound, error).await;
            }
            Ok(contents) => {
                let mut initial_metadata = contents.metadata;
                if encoding != Encoding::Identity {
                    initial_metadata.set(headers::GRPC_ENCODING, encoding.as_str());
                }
                if outbound
                    .send(ResponsePart::Metadata(initial_metadata))
                    .await
                    .is_err()
                {
                    context.cancellation().cancel();
                    return;
                }
                let mut messages = contents.messages;
                loop {
                    match messages.next().await {
                        Some(Ok(payload)) => {
                            if outbound
                                .send(ResponsePart::Message(payload))
                                .await
                                .is_err()
                            {
                                context.cancellation().cancel();
                                return;
                            }
                        }
                        Some(Err(error)) => {
                            let trailers = error.metadata().clone();
                            let _ = outbound
                                .send(ResponsePart::Status(error.to_status(), trailers))
                                .await;
                            outbound.finish();
                            return;
                        }
                        None => break,
                    }
                }
                let _ = outbound
                    .send(ResponsePart::Status(
                        Status::ok(),
                        contents.trailing_metadata,
                    ))
                    .await;
                outbound.finish();
            }
        }
    }
}

/// Write a trailers-only rejection.
async fn reject(
    outbound: &mut plexrpc_core::Outbound<ResponsePart>,
    error: RpcError,
) {
    debug_assert!(error.code() != Code::Ok);
    let trailers = error.metadata().clone();
    let _ = outbound
        .send(ResponsePart::Status(error.to_status(), trailers))
        .await;
    outbound.finish();
}
