//! Handler shapes and the typed bridge into the serialized pipeline.
//!
//! Handlers come in the same four shapes as client calls: unary,
//! client-streaming, server-streaming, and bidirectional. The runtime
//! asserts that single-request shapes receive exactly one message, and
//! converts single responses into one-message streams before framing.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::Stream;
use plexrpc_core::{Deserializer, Metadata, RpcError, Serializer};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::context::ServerContext;
use crate::interceptor::{MessageStream, ServerRpcContents, ServerRpcRequest, ServerRpcResponse};
use crate::task::{Guarded, TaskGuard};

/// Messages buffered between a response producer and the framing loop.
const RESPONSE_BUFFER: usize = 16;

/// A single-message request.
#[derive(Debug)]
pub struct ServerRequest<T> {
    pub metadata: Metadata,
    pub message: T,
}

/// The typed inbound message sequence of a streaming request.
///
/// Iterable at most once, in transport order.
pub struct RequestMessages<T> {
    stream: Pin<Box<dyn Stream<Item = Result<T, RpcError>> + Send + 'static>>,
}

impl<T: Send + 'static> RequestMessages<T> {
    fn from_raw(raw: MessageStream, deserializer: Arc<dyn Deserializer<T>>) -> Self {
        let stream = Box::pin(async_stream::stream! {
            let mut raw = raw;
            while let Some(item) = raw.next().await {
                match item.and_then(|payload| deserializer.deserialize(payload)) {
                    Ok(message) => yield Ok(message),
                    Err(error) => {
                        yield Err(error);
                        break;
                    }
                }
            }
        });
        Self { stream }
    }

    pub async fn next(&mut self) -> Option<Result<T, RpcError>> {
        self.stream.next().await
    }
}

impl<T> Stream for RequestMessages<T> {
    type Item = Result<T, RpcError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.as_mut().poll_next(cx)
    }
}

/// A streaming request.
pub struct StreamingServerRequest<T> {
    pub metadata: Metadata,
    pub messages: RequestMessages<T>,
}

/// A single-message response.
#[derive(Debug)]
pub struct ServerResponse<T> {
    pub metadata: Metadata,
    pub message: T,
    pub trailing_metadata: Metadata,
}

impl<T> ServerResponse<T> {
    pub fn new(message: T) -> Self {
        Self {
            metadata: Metadata::new(),
            message,
            trailing_metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_trailing_metadata(mut self, trailing_metadata: Metadata) -> Self {
        self.trailing_metadata = trailing_metadata;
        self
    }
}

/// Writer handed to a streaming response producer.
#[derive(Debug)]
pub struct ResponseWriter<T> {
    tx: mpsc::Sender<Result<T, RpcError>>,
}

impl<T> ResponseWriter<T> {
    fn new(tx: mpsc::Sender<Result<T, RpcError>>) -> Self {
        Self { tx }
    }

    /// Send one response message, waiting for buffer space.
    pub async fn write(&mut self, message: T) -> Result<(), RpcError> {
        self.tx
            .send(Ok(message))
            .await
            .map_err(|_| RpcError::cancelled("response stream consumer went away"))
    }
}

/// The closure producing a streaming response's messages.
pub type ResponseProducer<T> =
    Box<dyn FnOnce(ResponseWriter<T>) -> BoxFuture<'static, Result<(), RpcError>> + Send>;

/// A streaming response: initial metadata, a message producer, and
/// trailing metadata.
pub struct StreamingServerResponse<T> {
    pub metadata: Metadata,
    pub producer: ResponseProducer<T>,
    pub trailing_metadata: Metadata,
}

impl<T: Send + 'static> StreamingServerResponse<T> {
    pub fn new<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(ResponseWriter<T>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), RpcError>> + Send + 'static,
    {
        Self {
            metadata: Metadata::new(),
            producer: Box::new(move |writer| Box::pin(producer(writer))),
            trailing_metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_trailing_metadata(mut self, trailing_metadata: Metadata) -> Self {
        self.trailing_metadata = trailing_metadata;
        self
    }
}

pub(crate) trait ErasedHandler: Send + Sync {
    fn call(
        &self,
        request: ServerRpcRequest,
        context: ServerContext,
    ) -> BoxFuture<'static, ServerRpcResponse>;
}

/// A registered, type-erased RPC handler.
#[derive(Clone)]
pub struct RpcHandler {
    inner: Arc<dyn ErasedHandler>,
}

impl RpcHandler {
    pub(crate) fn call(
        &self,
        request: ServerRpcRequest,
        context: ServerContext,
    ) -> BoxFuture<'static, ServerRpcResponse> {
        self.inner.call(request, context)
    }

    /// A unary handler: one request message, one response message.
    pub fn unary<Req, Res, F, Fut>(
        deserializer: Arc<dyn Deserializer<Req>>,
        serializer: Arc<dyn Serializer<Res>>,
        handler: F,
    ) -> Self
    where
        Req: Send + 'static,
        Res: Send + 'static,
        F: Fn(ServerRequest<Req>, ServerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ServerResponse<Res>, RpcError>> + Send + 'static,
    {
        struct Unary<Req, Res, F> {
            deserializer: Arc<dyn Deserializer<Req>>,
            serializer: Arc<dyn Serializer<Res>>,
            handler: Arc<F>,
        }
        impl<Req, Res, F, Fut> ErasedHandler for Unary<Req, Res, F>
        where
            Req: Send + 'static,
            Res: Send + 'static,
            F: Fn(ServerRequest<Req>, ServerContext) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<ServerResponse<Res>, RpcError>> + Send + 'static,
        {
            fn call(
                &self,
                request: ServerRpcRequest,
                context: ServerContext,
            ) -> BoxFuture<'static, ServerRpcResponse> {
                let deserializer = self.deserializer.clone();
                let serializer = self.serializer.clone();
                let handler = self.handler.clone();
                Box::pin(async move {
                    let typed = match read_single(request, deserializer).await {
                        Ok(typed) => typed,
                        Err(error) => return ServerRpcResponse::rejected(error),
                    };
                    match (*handler)(typed, context).await {
                        Ok(response) => single_contents(response, serializer),
                        Err(error) => ServerRpcResponse::rejected(error),
                    }
                })
            }
        }
        Self {
            inner: Arc::new(Unary {
                deserializer,
                serializer,
                handler: Arc::new(handler),
            }),
        }
    }

    /// A client-streaming handler: a request stream, one response message.
    pub fn client_streaming<Req, Res, F, Fut>(
        deserializer: Arc<dyn Deserializer<Req>>,
        serializer: Arc<dyn Serializer<Res>>,
        handler: F,
    ) -> Self
    where
        Req: Send + 'static,
        Res: Send + 'static,
        F: Fn(StreamingServerRequest<Req>, ServerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ServerResponse<Res>, RpcError>> + Send + 'static,
    {
        struct ClientStreaming<Req, Res, F> {
            deserializer: Arc<dyn Deserializer<Req>>,
            serializer: Arc<dyn Serializer<Res>>,
            handler: F,
        }
        impl<Req, Res, F, Fut> ErasedHandler for ClientStreaming<Req, Res, F>
        where
            Req: Send + 'static,
            Res: Send + 'static,
            F: Fn(StreamingServerRequest<Req>, ServerContext) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<ServerResponse<Res>, RpcError>> + Send + 'static,
        {
            fn call(
                &self,
                request: ServerRpcRequest,
                context: ServerContext,
            ) -> BoxFuture<'static, ServerRpcResponse> {
                let serializer = self.serializer.clone();
                let typed = StreamingServerRequest {
                    metadata: request.metadata,
                    messages: RequestMessages::from_raw(
                        request.messages,
                        self.deserializer.clone(),
                    ),
                };
                let future = (self.handler)(typed, context);
                Box::pin(async move {
                    match future.await {
                        Ok(response) => single_contents(response, serializer),
                        Err(error) => ServerRpcResponse::rejected(error),
                    }
                })
            }
        }
        Self {
            inner: Arc::new(ClientStreaming {
                deserializer,
                serializer,
                handler,
            }),
        }
    }

    /// A server-streaming handler: one request message, a response stream.
    pub fn server_streaming<Req, Res, F, Fut>(
        deserializer: Arc<dyn Deserializer<Req>>,
        serializer: Arc<dyn Serializer<Res>>,
        handler: F,
    ) -> Self
    where
        Req: Send + 'static,
        Res: Send + 'static,
        F: Fn(ServerRequest<Req>, ServerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StreamingServerResponse<Res>, RpcError>> + Send + 'static,
    {
        struct ServerStreaming<Req, Res, F> {
            deserializer: Arc<dyn Deserializer<Req>>,
            serializer: Arc<dyn Serializer<Res>>,
            handler: Arc<F>,
        }
        impl<Req, Res, F, Fut> ErasedHandler for ServerStreaming<Req, Res, F>
        where
            Req: Send + 'static,
            Res: Send + 'static,
            F: Fn(ServerRequest<Req>, ServerContext) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<StreamingServerResponse<Res>, RpcError>> + Send + 'static,
        {
            fn call(
                &self,
                request: ServerRpcRequest,
                context: ServerContext,
            ) -> BoxFuture<'static, ServerRpcResponse> {
                let deserializer = self.deserializer.clone();
                let serializer = self.serializer.clone();
                let handler = self.handler.clone();
                Box::pin(async move {
                    let typed = match read_single(request, deserializer).await {
                        Ok(typed) => typed,
                        Err(error) => return ServerRpcResponse::rejected(error),
                    };
                    match (*handler)(typed, context).await {
                        Ok(response) => streaming_contents(response, serializer),
                        Err(error) => ServerRpcResponse::rejected(error),
                    }
                })
            }
        }
        Self {
            inner: Arc::new(ServerStreaming {
                deserializer,
                serializer,
                handler: Arc::new(handler),
            }),
        }
    }

    /// A bidirectional handler: a request stream and a response stream.
    pub fn bidi_streaming<Req, Res, F, Fut>(
        deserializer: Arc<dyn Deserializer<Req>>,
        serializer: Arc<dyn Serializer<Res>>,
        handler: F,
    ) -> Self
    where
        Req: Send + 'static,
        Res: Send + 'static,
        F: Fn(StreamingServerRequest<Req>, ServerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StreamingServerResponse<Res>, RpcError>> + Send + 'static,
    {
        struct Bidi<Req, Res, F> {
            deserializer: Arc<dyn Deserializer<Req>>,
            serializer: Arc<dyn Serializer<Res>>,
            handler: F,
        }
        impl<Req, Res, F, Fut> ErasedHandler for Bidi<Req, Res, F>
        where
            Req: Send + 'static,
            Res: Send + 'static,
            F: Fn(StreamingServerRequest<Req>, ServerContext) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<StreamingServerResponse<Res>, RpcError>> + Send + 'static,
        {
            fn call(
                &self,
                request: ServerRpcRequest,
                context: ServerContext,
            ) -> BoxFuture<'static, ServerRpcResponse> {
                let serializer = self.serializer.clone();
                let typed = StreamingServerRequest {
                    metadata: request.metadata,
                    messages: RequestMessages::from_raw(
                        request.messages,
                        self.deserializer.clone(),
                    ),
                };
                let future = (self.handler)(typed, context);
                Box::pin(async move {
                    match future.await {
                        Ok(response) => streaming_contents(response, serializer),
                        Err(error) => ServerRpcResponse::rejected(error),
                    }
                })
            }
        }
        Self {
            inner: Arc::new(Bidi {
                deserializer,
                serializer,
                handler,
            }),
        }
    }
}

impl std::fmt::Debug for RpcHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RpcHandler")
    }
}

/// Read the exactly-one message single-request shapes require.
fn read_single<Req: Send + 'static>(
    request: ServerRpcRequest,
    deserializer: Arc<dyn Deserializer<Req>>,
) -> impl Future<Output = Result<ServerRequest<Req>, RpcError>> + Send + 'static {
    async move {
        let metadata = request.metadata;
        let mut messages = request.messages;
        let payload = match messages.next().await {
            Some(Ok(payload)) => payload,
            Some(Err(error)) => return Err(error),
            None => {
                return Err(RpcError::internal(
                    "expected exactly one request message, got none",
                ));
            }
        };
        match messages.next().await {
            None => {}
            Some(Err(error)) => return Err(error),
            Some(Ok(_)) => {
                return Err(RpcError::internal(
                    "expected exactly one request message, got more",
                ));
            }
        }
        Ok(ServerRequest {
            metadata,
            message: deserializer.deserialize(payload)?,
        })
    }
}

/// Convert a single response into a one-message stream for framing.
fn single_contents<Res>(
    response: ServerResponse<Res>,
    serializer: Arc<dyn Serializer<Res>>,
) -> ServerRpcResponse {
    match serializer.serialize(&response.message) {
        Ok(payload) => ServerRpcResponse::accepted(ServerRpcContents {
            metadata: response.metadata,
            messages: Box::pin(futures::stream::once(async move { Ok(payload) })),
            trailing_metadata: response.trailing_metadata,
        }),
        Err(error) => ServerRpcResponse::rejected(error),
    }
}

/// Run a streaming response's producer into a serialized message stream.
fn streaming_contents<Res: Send + 'static>(
    response: StreamingServerResponse<Res>,
    serializer: Arc<dyn Serializer<Res>>,
) -> ServerRpcResponse {
    let (tx, rx) = mpsc::channel::<Result<Res, RpcError>>(RESPONSE_BUFFER);
    let failure_tx = tx.clone();
    let producer = response.producer;
    let guard = TaskGuard::spawn(async move {
        if let Err(error) = producer(ResponseWriter::new(tx)).await {
            let _ = failure_tx.send(Err(error)).await;
        }
    });
    let messages = ReceiverStream::new(rx)
        .map(move |item| item.and_then(|message| serializer.serialize(&message)));
    ServerRpcResponse::accepted(ServerRpcContents {
        metadata: response.metadata,
        messages: Box::pin(Guarded::new(messages, guard)),
        trailing_metadata: response.trailing_metadata,
    })
}
