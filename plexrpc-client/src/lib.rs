//! Client-side RPC execution engine for plexrpc.
//!
//! The client drives calls against a pluggable [`Transport`] in four
//! interaction shapes: unary, client-streaming, server-streaming, and
//! bidirectional-streaming. Each call runs under an execution policy:
//!
//! - **one-shot**: a single attempt
//! - **retry**: sequential attempts with exponential backoff, server
//!   pushback, and a shared throttle
//! - **hedging**: staggered concurrent attempts, first accepted response
//!   wins
//!
//! Policies come from the per-client [`ServiceConfig`] (loaded from its
//! JSON form) or per-call [`CallOptions`]. Requests and responses flow
//! through an ordered chain of [`ClientInterceptor`]s on every attempt.
//!
//! # Example
//!
//! ```ignore
//! use plexrpc_client::{CallOptions, Client, MemoryTransport};
//! use plexrpc_core::{Metadata, MethodDescriptor};
//!
//! let (transport, listener) = MemoryTransport::new();
//! // ... hand `listener` to a server ...
//!
//! let client = Client::builder(transport)
//!     .service_config(plexrpc_client::ServiceConfig::from_json(CONFIG_JSON)?)
//!     .build();
//!
//! let descriptor = MethodDescriptor::new("echo.Echo", "Get");
//! let response = client
//!     .unary::<EchoRequest, EchoResponse>(
//!         &descriptor,
//!         Metadata::new(),
//!         EchoRequest { text: "hello".into() },
//!         CallOptions::new(),
//!     )
//!     .await?;
//! println!("{:?}", response.message);
//! ```

pub mod backoff;
mod client;
pub mod config;
mod executor;
pub mod interceptor;
pub mod options;
mod processor;
pub mod replay;
pub mod request;
pub mod response;
mod task;
pub mod throttle;
pub mod transport;

pub use client::{Client, ClientBuilder, DEFAULT_REPLAY_CAPACITY};
pub use config::{
    ConfigError, HedgingPolicy, LoadBalancingConfig, MethodConfig, RetryPolicy, RetryThrottling,
    ServiceConfig,
};
pub use interceptor::{
    ClientContext, ClientInterceptor, InterceptorChain, MessageStream, MetadataInterceptor, Next,
    RawResponse, RpcRequest,
};
pub use options::{CallOptions, ExecutionPolicy};
pub use processor::StreamProcessor;
pub use replay::{ReplayBuffer, ReplayError, ReplaySubscriber};
pub use request::{ClientRequest, MessageProducer, RequestWriter};
pub use response::{Body, ClientResponse, ResponseContents, StreamingResponse};
pub use throttle::RetryThrottle;
pub use transport::{with_stream, MemoryListener, MemoryTransport, Transport};
