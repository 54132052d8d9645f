//! The call entry point.
//!
//! A [`Client`] pairs a transport with a service config and an interceptor
//! chain, and executes calls in all four interaction shapes. Every call
//! flows through [`Client::execute`], which resolves per-call policy,
//! builds the request headers, dispatches to the one-shot, retry, or
//! hedging executor, and finally runs the caller's response handler, all
//! under the call deadline.

use std::sync::Arc;
use std::time::Instant;

use plexrpc_core::headers::{self, Scheme};
use plexrpc_core::{
    Deserializer, Encoding, Metadata, MethodDescriptor, ProstCodec, RpcError, Serializer,
};

use crate::config::ServiceConfig;
use crate::executor::{
    execute_hedging, execute_one_shot, execute_retry, into_typed, spawn_producer, with_deadline,
    AttemptEnv,
};
use crate::interceptor::{ClientInterceptor, InterceptorChain};
use crate::options::{self, CallOptions, ExecutionPolicy};
use crate::request::{ClientRequest, RequestWriter};
use crate::response::{ClientResponse, StreamingResponse};
use crate::throttle::RetryThrottle;
use crate::transport::Transport;

/// Default capacity of the retry/hedging replay buffer, in messages.
pub const DEFAULT_REPLAY_CAPACITY: usize = 64;

const DEFAULT_USER_AGENT: &str = concat!("plexrpc/", env!("CARGO_PKG_VERSION"));

/// An RPC client bound to one transport.
pub struct Client<T> {
    transport: Arc<T>,
    interceptors: InterceptorChain,
    config: ServiceConfig,
    throttle: Option<Arc<RetryThrottle>>,
    scheme: Scheme,
    user_agent: String,
    accept_encoding: Vec<Encoding>,
    replay_capacity: usize,
}

impl<T: Transport> Client<T> {
    pub fn builder(transport: T) -> ClientBuilder<T> {
        ClientBuilder {
            transport,
            interceptors: InterceptorChain::new(),
            config: ServiceConfig::empty(),
            scheme: Scheme::Http,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_encoding: vec![Encoding::Identity],
            replay_capacity: DEFAULT_REPLAY_CAPACITY,
        }
    }

    /// The service config this client runs under.
    pub fn service_config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Execute a call and hand the response to `handler`.
    ///
    /// This is the general form behind the four shape-specific methods.
    /// The handler runs inside the call's deadline scope; on caller
    /// cancellation it never runs at all.
    pub async fn execute<Req, Res, H, Fut, R>(
        &self,
        descriptor: &MethodDescriptor,
        request: ClientRequest<Req>,
        call_options: CallOptions,
        serializer: Arc<dyn Serializer<Req>>,
        deserializer: Arc<dyn Deserializer<Res>>,
        handler: H,
    ) -> Result<R, RpcError>
    where
        Req: Send + 'static,
        Res: Send + 'static,
        H: FnOnce(StreamingResponse<Res>) -> Fut,
        Fut: Future<Output = Result<R, RpcError>>,
    {
        let method_config = self.config.method_config(descriptor);
        let resolved = options::resolve(&call_options, method_config);
        let deadline = resolved.timeout.map(|timeout| Instant::now() + timeout);

        let (user_metadata, producer) = request.into_parts();
        let mut metadata = headers::request_headers(
            descriptor,
            self.scheme,
            &self.user_agent,
            &self.accept_encoding,
        );
        if let Some(timeout) = resolved.timeout {
            metadata.set_timeout(timeout);
        }
        metadata.merge(user_metadata);

        let env = AttemptEnv {
            transport: self.transport.clone(),
            descriptor: descriptor.clone(),
            interceptors: self.interceptors.clone(),
            deadline,
            max_request_message_bytes: resolved.max_request_message_bytes,
            max_response_message_bytes: resolved.max_response_message_bytes,
            wait_for_ready: resolved.wait_for_ready,
        };
        let throttle = self.throttle.clone();
        let replay_capacity = self.replay_capacity;

        with_deadline(deadline, async move {
            let raw = match resolved.policy {
                ExecutionPolicy::OneShot => {
                    let messages = spawn_producer(producer, serializer);
                    execute_one_shot(env, metadata, messages).await
                }
                ExecutionPolicy::Retry(policy) => {
                    execute_retry(
                        env,
                        &policy,
                        throttle,
                        metadata,
                        producer,
                        serializer,
                        replay_capacity,
                    )
                    .await
                }
                ExecutionPolicy::Hedging(policy) => {
                    execute_hedging(
                        env,
                        &policy,
                        throttle,
                        metadata,
                        producer,
                        serializer,
                        replay_capacity,
                    )
                    .await
                }
            };
            handler(into_typed(raw, deserializer)).await
        })
        .await
    }

    /// Unary call: one request message, one response message.
    pub async fn unary<Req, Res>(
        &self,
        descriptor: &MethodDescriptor,
        metadata: Metadata,
        message: Req,
        call_options: CallOptions,
    ) -> Result<ClientResponse<Res>, RpcError>
    where
        Req: prost::Message + Send + 'static,
        Res: prost::Message + Default + Send + 'static,
    {
        self.execute(
            descriptor,
            ClientRequest::single(metadata, message),
            call_options,
            Arc::new(ProstCodec::new()),
            Arc::new(ProstCodec::new()),
            |response| response.into_single(),
        )
        .await
    }

    /// Client-streaming call: a request message stream, one response
    /// message.
    pub async fn client_streaming<Req, Res, P, Fut>(
        &self,
        descriptor: &MethodDescriptor,
        metadata: Metadata,
        producer: P,
        call_options: CallOptions,
    ) -> Result<ClientResponse<Res>, RpcError>
    where
        Req: prost::Message + Send + 'static,
        Res: prost::Message + Default + Send + 'static,
        P: FnOnce(RequestWriter<Req>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), RpcError>> + Send + 'static,
    {
        self.execute(
            descriptor,
            ClientRequest::stream(metadata, producer),
            call_options,
            Arc::new(ProstCodec::new()),
            Arc::new(ProstCodec::new()),
            |response| response.into_single(),
        )
        .await
    }

    /// Server-streaming call: one request message, a response body the
    /// handler consumes.
    pub async fn server_streaming<Req, Res, H, Fut, R>(
        &self,
        descriptor: &MethodDescriptor,
        metadata: Metadata,
        message: Req,
        call_options: CallOptions,
        handler: H,
    ) -> Result<R, RpcError>
    where
        Req: prost::Message + Send + 'static,
        Res: prost::Message + Default + Send + 'static,
        H: FnOnce(StreamingResponse<Res>) -> Fut,
        Fut: Future<Output = Result<R, RpcError>>,
    {
        self.execute(
            descriptor,
            ClientRequest::single(metadata, message),
            call_options,
            Arc::new(ProstCodec::new()),
            Arc::new(ProstCodec::new()),
            handler,
        )
        .await
    }

    /// Bidirectional-streaming call: a request message stream and a
    /// response body the handler consumes.
    pub async fn bidi_streaming<Req, Res, P, PFut, H, Fut, R>(
        &self,
        descriptor: &MethodDescriptor,
        metadata: Metadata,
        producer: P,
        call_options: CallOptions,
        handler: H,
    ) -> Result<R, RpcError>
    where
        Req: prost::Message + Send + 'static,
        Res: prost::Message + Default + Send + 'static,
        P: FnOnce(RequestWriter<Req>) -> PFut + Send + 'static,
        PFut: Future<Output = Result<(), RpcError>> + Send + 'static,
        H: FnOnce(StreamingResponse<Res>) -> Fut,
        Fut: Future<Output = Result<R, RpcError>>,
    {
        self.execute(
            descriptor,
            ClientRequest::stream(metadata, producer),
            call_options,
            Arc::new(ProstCodec::new()),
            Arc::new(ProstCodec::new()),
            handler,
        )
        .await
    }
}

/// Builder for [`Client`].
pub struct ClientBuilder<T> {
    transport: T,
    interceptors: InterceptorChain,
    config: ServiceConfig,
    scheme: Scheme,
    user_agent: String,
    accept_encoding: Vec<Encoding>,
    replay_capacity: usize,
}

impl<T: Transport> ClientBuilder<T> {
    /// Append an interceptor; the first one added sees requests first.
    pub fn interceptor(mut self, interceptor: Arc<dyn ClientInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn service_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn accept_encoding(mut self, encodings: Vec<Encoding>) -> Self {
        self.accept_encoding = encodings;
        self
    }

    /// Capacity of the replayable request buffer used by retry and
    /// hedging, in messages.
    pub fn replay_capacity(mut self, capacity: usize) -> Self {
        self.replay_capacity = capacity;
        self
    }

    pub fn build(self) -> Client<T> {
        // A throttle carried by the transport wins over one configured on
        // this client; both are shared channel-wide either way.
        let throttle = self
            .transport
            .retry_throttle()
            .or_else(|| {
                self.config
                    .retry_throttling
                    .as_ref()
                    .map(|throttling| Arc::new(throttling.build()))
            });
        Client {
            transport: Arc::new(self.transport),
            interceptors: self.interceptors,
            config: self.config,
            throttle,
            scheme: self.scheme,
            user_agent: self.user_agent,
            accept_encoding: self.accept_encoding,
            replay_capacity: self.replay_capacity,
        }
    }
}
