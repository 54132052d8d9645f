//! Server-side RPC dispatch for plexrpc.
//!
//! A [`Router`] maps method descriptors to registered handlers in the four
//! shapes (unary, client-streaming, server-streaming, bidirectional) and
//! dispatches each inbound stream through the interceptors selected for
//! its method. Every RPC carries a [`ServerContext`] with an
//! [`RpcCancellationHandle`] the transport cancels through out-of-band
//! stream events.
//!
//! # Example
//!
//! ```ignore
//! use plexrpc_server::{Router, RpcHandler, ServerRequest, ServerResponse};
//! use plexrpc_core::{MethodDescriptor, ProstCodec};
//! use std::sync::Arc;
//!
//! let router = Router::new().register(
//!     MethodDescriptor::new("echo.Echo", "Get"),
//!     RpcHandler::unary(
//!         Arc::new(ProstCodec::new()),
//!         Arc::new(ProstCodec::new()),
//!         |request: ServerRequest<EchoRequest>, _context| async move {
//!             Ok(ServerResponse::new(EchoResponse { text: request.message.text }))
//!         },
//!     ),
//! );
//! Arc::new(router).serve(transport).await;
//! ```

pub mod cancellation;
pub mod context;
pub mod handler;
pub mod interceptor;
mod router;
mod task;

pub use cancellation::{
    bind_cancellation, HandlerId, RpcCancellationHandle, StreamEvent, StreamEventSource,
    StreamEventSubscription,
};
pub use context::ServerContext;
pub use handler::{
    RequestMessages, ResponseProducer, ResponseWriter, RpcHandler, ServerRequest, ServerResponse,
    StreamingServerRequest, StreamingServerResponse,
};
pub use interceptor::{
    InterceptorSubject, MessageStream, Next, ServerInterceptor, ServerRpcContents,
    ServerRpcRequest, ServerRpcResponse,
};
pub use router::{Router, ServerTransport};
