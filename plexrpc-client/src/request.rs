//! Caller-facing requests.

use futures::future::BoxFuture;
use plexrpc_core::{Metadata, RpcError};
use tokio::sync::mpsc;

/// Writer handed to a request producer; each [`write`](RequestWriter::write)
/// enqueues one message for the attempt in flight.
#[derive(Debug)]
pub struct RequestWriter<T> {
    tx: mpsc::Sender<Result<T, RpcError>>,
}

impl<T> RequestWriter<T> {
    pub(crate) fn new(tx: mpsc::Sender<Result<T, RpcError>>) -> Self {
        Self { tx }
    }

    /// Enqueue one request message, waiting for buffer space.
    pub async fn write(&mut self, message: T) -> Result<(), RpcError> {
        self.tx
            .send(Ok(message))
            .await
            .map_err(|_| RpcError::cancelled("request stream consumer went away"))
    }
}

/// The closure that produces a call's request messages.
///
/// Invoked at most once per call; retry and hedging replay the produced
/// sequence through a buffer instead of running the producer again.
pub type MessageProducer<T> =
    Box<dyn FnOnce(RequestWriter<T>) -> BoxFuture<'static, Result<(), RpcError>> + Send>;

/// A caller-facing request: metadata plus either a single message or a
/// producer writing a message stream.
pub enum ClientRequest<T> {
    Single {
        metadata: Metadata,
        message: T,
    },
    Stream {
        metadata: Metadata,
        producer: MessageProducer<T>,
    },
}

impl<T: Send + 'static> ClientRequest<T> {
    pub fn single(metadata: Metadata, message: T) -> Self {
        ClientRequest::Single { metadata, message }
    }

    pub fn stream<F, Fut>(metadata: Metadata, producer: F) -> Self
    where
        F: FnOnce(RequestWriter<T>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), RpcError>> + Send + 'static,
    {
        ClientRequest::Stream {
            metadata,
            producer: Box::new(move |writer| Box::pin(producer(writer))),
        }
    }

    pub fn metadata(&self) -> &Metadata {
        match self {
            ClientRequest::Single { metadata, .. } | ClientRequest::Stream { metadata, .. } => {
                metadata
            }
        }
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        match self {
            ClientRequest::Single { metadata, .. } | ClientRequest::Stream { metadata, .. } => {
                metadata
            }
        }
    }

    /// Split into metadata and a producer; a single message becomes a
    /// producer that writes it once.
    pub(crate) fn into_parts(self) -> (Metadata, MessageProducer<T>) {
        match self {
            ClientRequest::Single { metadata, message } => (
                metadata,
                Box::new(move |mut writer: RequestWriter<T>| {
                    Box::pin(async move { writer.write(message).await }) as BoxFuture<'static, _>
                }),
            ),
            ClientRequest::Stream { metadata, producer } => (metadata, producer),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ClientRequest<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientRequest::Single { metadata, message } => f
                .debug_struct("ClientRequest::Single")
                .field("metadata", metadata)
                .field("message", message)
                .finish(),
            ClientRequest::Stream { metadata, .. } => f
                .debug_struct("ClientRequest::Stream")
                .field("metadata", metadata)
                .finish_non_exhaustive(),
        }
    }
}
