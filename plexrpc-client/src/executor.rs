//! Attempt executors.
//!
//! A call runs under one of three execution policies: one-shot (a single
//! attempt), retry (sequential attempts with exponential backoff, server
//! pushback, and throttling), or hedging (staggered concurrent attempts).
//! This module holds the plumbing they share: the per-attempt environment,
//! the producer pump, replay subscription streams, deadline wrapping, and
//! the raw-to-typed response conversion.

mod hedging;
mod one_shot;
mod retry;

pub(crate) use hedging::execute as execute_hedging;
pub(crate) use one_shot::execute as execute_one_shot;
pub(crate) use retry::execute as execute_retry;

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use plexrpc_core::{Deserializer, Metadata, MethodDescriptor, RpcError, Serializer};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::interceptor::{ClientContext, InterceptorChain, MessageStream, Next, RawResponse, RpcRequest};
use crate::processor::StreamProcessor;
use crate::replay::{ReplayBuffer, ReplayError, ReplaySubscriber};
use crate::request::{MessageProducer, RequestWriter};
use crate::response::StreamingResponse;
use crate::task::{Guarded, TaskGuard};
use crate::transport::Transport;

/// Messages buffered between a producer and its consumer.
const PRODUCER_BUFFER: usize = 16;

/// Everything an attempt needs besides its message stream.
pub(crate) struct AttemptEnv<T> {
    pub transport: Arc<T>,
    pub descriptor: MethodDescriptor,
    pub interceptors: InterceptorChain,
    pub deadline: Option<Instant>,
    pub max_request_message_bytes: Option<usize>,
    pub max_response_message_bytes: Option<usize>,
    pub wait_for_ready: bool,
}

impl<T> Clone for AttemptEnv<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            descriptor: self.descriptor.clone(),
            interceptors: self.interceptors.clone(),
            deadline: self.deadline,
            max_request_message_bytes: self.max_request_message_bytes,
            max_response_message_bytes: self.max_response_message_bytes,
            wait_for_ready: self.wait_for_ready,
        }
    }
}

impl<T: Transport> AttemptEnv<T> {
    fn context(&self, attempt: u32) -> ClientContext {
        ClientContext {
            descriptor: self.descriptor.clone(),
            attempt,
            deadline: self.deadline,
            max_request_message_bytes: self.max_request_message_bytes,
            max_response_message_bytes: self.max_response_message_bytes,
            wait_for_ready: self.wait_for_ready,
        }
    }

    /// Run one attempt: open a stream, thread the request through the
    /// interceptor chain, and hand it to the stream processor.
    pub(crate) async fn run(
        &self,
        metadata: Metadata,
        messages: MessageStream,
        attempt: u32,
    ) -> RawResponse {
        let transport = self.transport.clone();
        let base: Next = Box::new(move |request, context| {
            Box::pin(async move {
                match transport.open_stream(&context.descriptor).await {
                    Ok(stream) => StreamProcessor::execute(request, &context, stream).await,
                    Err(error) => StreamingResponse::rejected(error),
                }
            })
        });
        let call = self.interceptors.wrap(base);
        call(RpcRequest { metadata, messages }, self.context(attempt)).await
    }
}

/// Bound `future` by `deadline`; expiry cancels everything inside and
/// surfaces `DeadlineExceeded`.
pub(crate) async fn with_deadline<R>(
    deadline: Option<Instant>,
    future: impl Future<Output = Result<R, RpcError>>,
) -> Result<R, RpcError> {
    match deadline {
        None => future.await,
        Some(deadline) => tokio::time::timeout_at(deadline.into(), future)
            .await
            .unwrap_or_else(|_| Err(RpcError::deadline_exceeded("call deadline expired"))),
    }
}

/// Run a producer into a serialized message stream for a single attempt.
///
/// The producer task is owned by the returned stream; dropping the stream
/// tears the producer down.
pub(crate) fn spawn_producer<Req: Send + 'static>(
    producer: MessageProducer<Req>,
    serializer: Arc<dyn Serializer<Req>>,
) -> MessageStream {
    let (tx, rx) = mpsc::channel::<Result<Req, RpcError>>(PRODUCER_BUFFER);
    let failure_tx = tx.clone();
    let guard = TaskGuard::spawn(async move {
        if let Err(error) = producer(RequestWriter::new(tx)).await {
            let _ = failure_tx.send(Err(error)).await;
        }
    });
    let stream = ReceiverStream::new(rx)
        .map(move |item| item.and_then(|message| serializer.serialize(&message)));
    Box::pin(Guarded::new(stream, vec![guard]))
}

/// Run a producer once into a replay buffer shared by all attempts.
pub(crate) fn spawn_pump<Req: Send + 'static>(
    producer: MessageProducer<Req>,
    serializer: Arc<dyn Serializer<Req>>,
    buffer: ReplayBuffer<Bytes>,
) -> TaskGuard {
    TaskGuard::spawn(async move {
        let (tx, mut rx) = mpsc::channel::<Result<Req, RpcError>>(PRODUCER_BUFFER);
        let produce = producer(RequestWriter::new(tx));
        let drain = async {
            while let Some(item) = rx.recv().await {
                match item.and_then(|message| serializer.serialize(&message)) {
                    Ok(payload) => buffer.push(payload).await,
                    Err(error) => {
                        // Stop the producer too; its next write fails.
                        rx.close();
                        return Err(error);
                    }
                }
            }
            Ok(())
        };
        match tokio::join!(produce, drain) {
            (_, Err(error)) => buffer.fail(error),
            (Err(error), Ok(())) => buffer.fail(error),
            (Ok(()), Ok(())) => buffer.close(),
        }
    })
}

/// A message stream reading one attempt's view of the replay buffer.
pub(crate) fn subscriber_stream(mut subscriber: ReplaySubscriber<Bytes>) -> MessageStream {
    Box::pin(async_stream::stream! {
        loop {
            match subscriber.next().await {
                Ok(Some(payload)) => yield Ok(payload),
                Ok(None) => break,
                Err(ReplayError::Invalidated) => {
                    yield Err(RpcError::cancelled("attempt was invalidated"));
                    break;
                }
                Err(ReplayError::Failed(error)) => {
                    yield Err(error);
                    break;
                }
            }
        }
    })
}

/// Deserialize an accepted raw response lazily into the typed response.
pub(crate) fn into_typed<Res: Send + 'static>(
    raw: RawResponse,
    deserializer: Arc<dyn Deserializer<Res>>,
) -> StreamingResponse<Res> {
    match raw.accepted {
        Ok(contents) => StreamingResponse {
            accepted: Ok(crate::response::ResponseContents {
                metadata: contents.metadata,
                body: contents
                    .body
                    .map_messages(move |payload| deserializer.deserialize(payload)),
            }),
        },
        Err(error) => StreamingResponse::rejected(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_with_deadline_passthrough() {
        let result = with_deadline(None, async { Ok::<_, RpcError>(1) }).await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_deadline_expiry() {
        let deadline = Instant::now() + Duration::from_millis(50);
        let result = with_deadline(Some(deadline), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, RpcError>(1)
        })
        .await;
        assert_eq!(
            result.unwrap_err().code(),
            plexrpc_core::Code::DeadlineExceeded
        );
    }

    #[tokio::test]
    async fn test_spawn_producer_serializes_in_order() {
        struct PlainText;
        impl Serializer<String> for PlainText {
            fn serialize(&self, message: &String) -> Result<Bytes, RpcError> {
                Ok(Bytes::from(message.clone().into_bytes()))
            }
        }

        let producer: MessageProducer<String> = Box::new(|mut writer| {
            Box::pin(async move {
                writer.write("one".to_string()).await?;
                writer.write("two".to_string()).await?;
                Ok(())
            })
        });
        let mut stream = spawn_producer(producer, Arc::new(PlainText));
        assert_eq!(stream.next().await.unwrap().unwrap().as_ref(), b"one");
        assert_eq!(stream.next().await.unwrap().unwrap().as_ref(), b"two");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_spawn_pump_fills_buffer_and_closes() {
        struct PlainText;
        impl Serializer<String> for PlainText {
            fn serialize(&self, message: &String) -> Result<Bytes, RpcError> {
                Ok(Bytes::from(message.clone().into_bytes()))
            }
        }

        let buffer = ReplayBuffer::new(8);
        let subscriber = buffer.subscribe().unwrap();
        let producer: MessageProducer<String> = Box::new(|mut writer| {
            Box::pin(async move {
                writer.write("a".to_string()).await?;
                Ok(())
            })
        });
        let _pump = spawn_pump(producer, Arc::new(PlainText), buffer.clone());

        let mut stream = subscriber_stream(subscriber);
        assert_eq!(stream.next().await.unwrap().unwrap().as_ref(), b"a");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_spawn_pump_propagates_producer_failure() {
        struct PlainText;
        impl Serializer<String> for PlainText {
            fn serialize(&self, message: &String) -> Result<Bytes, RpcError> {
                Ok(Bytes::from(message.clone().into_bytes()))
            }
        }

        let buffer = ReplayBuffer::new(8);
        let subscriber = buffer.subscribe().unwrap();
        let producer: MessageProducer<String> = Box::new(|_| {
            Box::pin(async move { Err(RpcError::internal("producer exploded")) })
        });
        let _pump = spawn_pump(producer, Arc::new(PlainText), buffer.clone());

        let mut stream = subscriber_stream(subscriber);
        let error = stream.next().await.unwrap().unwrap_err();
        assert_eq!(error.code(), plexrpc_core::Code::Internal);
    }
}
